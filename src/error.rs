use thiserror::Error;

/// Failures from the USB block transport layer (§4.1).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no device matching vid={vid:#06x} pid={pid:#06x}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("short transfer: expected {expected} bytes, got {actual}")]
    TransferShort { expected: usize, actual: usize },

    #[error("usb transfer error: {0}")]
    TransferError(String),

    #[error("failed to open device or claim its interface: {0}")]
    OpenFailed(String),

    #[error("usb context/enumeration failure: {0}")]
    ContextInit(String),

    #[error("transport cancelled")]
    Cancelled,
}

impl TransportError {
    /// Short reads are treated as a disconnect per §4.1, same as any other transfer error.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::TransferShort { .. } | TransportError::TransferError(_)
        )
    }
}

/// Failures from decoding/encoding a 4 KiB block (§4.2).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("inbound magic mismatch: expected GLCI, got {0:#010x}")]
    MagicMismatch(u32),

    #[error("payload truncated before expected field")]
    ShortField,

    #[error("string field is not valid UTF-16")]
    InvalidString,
}

/// Failures surfaced by a command handler (§4.4, §7 "Request-failure"/"Resource").
///
/// Every variant here maps to `respond_failure(0xDEAD)` at the dispatcher; none of
/// them are fatal to the session.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("index {idx} out of range (len {len})")]
    IndexOutOfRange { idx: u32, len: u32 },

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("invalid file type {0}")]
    InvalidFileType(u32),

    #[error("invalid StartFile mode {0}")]
    InvalidMode(u32),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request: {0}")]
    Codec(#[from] CodecError),
}

/// Failures from loading/persisting the special-path catalog (§6a).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("could not determine a home directory for the default config path")]
    NoHomeDir,
}
