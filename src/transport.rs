//! USB bulk transport: device discovery, blocking block I/O, and cancellation (§4.1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::codec::BLOCK_SIZE;
use crate::error::TransportError;

pub const GOLDLEAF_VID: u16 = 0x057E;
pub const GOLDLEAF_PID: u16 = 0x3000;
const ENDPOINT_IN: u8 = 0x81;
const ENDPOINT_OUT: u8 = 0x01;
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Per-transfer timeout; also the cadence at which a pending transfer re-checks
/// the cancellation flag, bounding cancellation latency to this value (§4.1, §5).
const TRANSFER_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// A block-oriented transport: fixed-size reads, best-effort-sized writes. The
/// dispatcher and handlers are written against this trait, not against `rusb`
/// directly, so they can be tested with [`MockTransport`] in CI.
pub trait BlockTransport {
    fn read_block(&mut self) -> Result<[u8; BLOCK_SIZE], TransportError>;
    fn write_block(&mut self, block: &[u8]) -> Result<(), TransportError>;
}

/// Shared cancellation flag, observed by the discovery loop and blocking
/// transfers alike (§5 "Cancellation semantics").
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The three states of §4.1's discovery state machine. `UsbTransport` itself is
/// only ever the `Connected` state's payload; `Scanning`/`Terminated` are
/// represented by the absence of a connected transport in the caller's loop
/// (see `server::run`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Scanning,
    Connected,
    Terminated,
}

/// A live USB connection to a Goldleaf-compatible device: claimed interface,
/// bulk IN/OUT endpoints, blocking transfers.
pub struct UsbTransport {
    handle: rusb::DeviceHandle<rusb::GlobalContext>,
    cancel: CancelToken,
}

impl UsbTransport {
    /// Polls every 500 ms for a device matching `vid`/`pid` until found or until
    /// `cancel` is raised. Blocking by design — run on its own thread.
    pub fn connect(vid: u16, pid: u16, cancel: CancelToken) -> Result<Self, TransportError> {
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            match Self::try_open(vid, pid, cancel.clone()) {
                Ok(transport) => return Ok(transport),
                Err(TransportError::DeviceNotFound { .. }) => {
                    thread::sleep(DISCOVERY_POLL_INTERVAL);
                }
                Err(TransportError::OpenFailed(e)) => {
                    // Transient: device mid-enumeration, interface held by another
                    // process, a permission race. Retryable, not fatal (§6, §9).
                    warn!("transient device open failure, retrying: {e}");
                    thread::sleep(DISCOVERY_POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_open(vid: u16, pid: u16, cancel: CancelToken) -> Result<Self, TransportError> {
        // A failure to enumerate at all means the underlying USB library/context
        // itself couldn't be initialized — genuinely fatal per §6.
        let devices = rusb::devices().map_err(|e| TransportError::ContextInit(e.to_string()))?;
        let device = devices
            .iter()
            .find(|d| match d.device_descriptor() {
                Ok(desc) => desc.vendor_id() == vid && desc.product_id() == pid,
                Err(_) => false,
            })
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        // Opening the device or claiming its interface can fail transiently (the
        // device is still initializing, another process holds the interface); this
        // must not be fatal, so it gets its own variant the caller retries on.
        let mut handle = device
            .open()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        handle
            .claim_interface(0)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        info!("goldleaf device connected (vid={vid:#06x} pid={pid:#06x})");
        Ok(UsbTransport { handle, cancel })
    }

    /// Product string descriptor, queried after `Connected` (§4.1).
    pub fn product_string(&self) -> Option<String> {
        let desc = self.handle.device().device_descriptor().ok()?;
        self.handle
            .read_product_string_ascii(&desc)
            .ok()
            .filter(|s| !s.is_empty())
    }

    /// Serial number string descriptor, queried after `Connected` (§4.1).
    pub fn serial_number_string(&self) -> Option<String> {
        let desc = self.handle.device().device_descriptor().ok()?;
        self.handle
            .read_serial_number_string_ascii(&desc)
            .ok()
            .filter(|s| !s.is_empty())
    }
}

impl BlockTransport for UsbTransport {
    fn read_block(&mut self) -> Result<[u8; BLOCK_SIZE], TransportError> {
        let mut buf = [0u8; BLOCK_SIZE];
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            match self
                .handle
                .read_bulk(ENDPOINT_IN, &mut buf, TRANSFER_POLL_TIMEOUT)
            {
                Ok(n) if n == BLOCK_SIZE => return Ok(buf),
                Ok(n) => {
                    warn!("short read: expected {BLOCK_SIZE} bytes, got {n}");
                    return Err(TransportError::TransferShort {
                        expected: BLOCK_SIZE,
                        actual: n,
                    });
                }
                Err(rusb::Error::Timeout) => {
                    debug!("read_block poll timed out, re-checking cancellation");
                    continue;
                }
                Err(e) => return Err(TransportError::TransferError(e.to_string())),
            }
        }
    }

    fn write_block(&mut self, block: &[u8]) -> Result<(), TransportError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            match self
                .handle
                .write_bulk(ENDPOINT_OUT, block, TRANSFER_POLL_TIMEOUT)
            {
                Ok(n) if n == block.len() => return Ok(()),
                Ok(n) => {
                    return Err(TransportError::TransferShort {
                        expected: block.len(),
                        actual: n,
                    })
                }
                Err(rusb::Error::Timeout) => {
                    debug!("write_block poll timed out, re-checking cancellation");
                    continue;
                }
                Err(e) => return Err(TransportError::TransferError(e.to_string())),
            }
        }
    }
}

/// An in-memory transport double satisfying [`BlockTransport`], used to drive
/// the dispatcher and handlers in tests without real hardware (SPEC_FULL.md §6b).
#[cfg(test)]
pub struct MockTransport {
    pub inbound: std::collections::VecDeque<[u8; BLOCK_SIZE]>,
    pub outbound: Vec<Vec<u8>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new(inbound: Vec<[u8; BLOCK_SIZE]>) -> Self {
        MockTransport {
            inbound: inbound.into(),
            outbound: Vec::new(),
        }
    }
}

#[cfg(test)]
impl BlockTransport for MockTransport {
    fn read_block(&mut self) -> Result<[u8; BLOCK_SIZE], TransportError> {
        self.inbound
            .pop_front()
            .ok_or(TransportError::TransferError("no more blocks queued".into()))
    }

    fn write_block(&mut self, block: &[u8]) -> Result<(), TransportError> {
        self.outbound.push(block.to_vec());
        Ok(())
    }
}
