//! 4 KiB block framing and the little-endian / UTF-16LE wire format (§3, §4.2).

use log::warn;

use crate::error::CodecError;

/// Every frame, either direction, is exactly this many bytes.
pub const BLOCK_SIZE: usize = 4096;

/// "GLCI" little-endian, device → host request magic.
pub const MAGIC_IN: u32 = 0x4943_4C47;
/// "GLCO" little-endian, host → device response magic.
pub const MAGIC_OUT: u32 = 0x4F43_4C47;

/// Generic failure status used for all recoverable per-request errors.
pub const STATUS_FAILURE: u32 = 0xDEAD;

/// A 4 KiB block already read off the IN endpoint, with a cursor for sequential
/// field decoding. Handlers keep decoding from the same block until they've
/// consumed every field the opcode's contract defines.
pub struct InboundBlock {
    buf: [u8; BLOCK_SIZE],
    pos: usize,
}

impl InboundBlock {
    pub fn new(buf: [u8; BLOCK_SIZE]) -> Self {
        InboundBlock { buf, pos: 0 }
    }

    /// Reads and validates the `GLCI` magic, returning the codec error that makes
    /// the session protocol-fatal on mismatch (see §4.2, §7).
    pub fn read_magic(&mut self) -> Result<(), CodecError> {
        let magic = self.read_u32()?;
        if magic != MAGIC_IN {
            return Err(CodecError::MagicMismatch(magic));
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Reads `u32 char_count` followed by `char_count * 2` bytes of UTF-16LE.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let char_count = self.read_u32()? as usize;
        let bytes = self.take(char_count * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        char::decode_utf16(units)
            .collect::<Result<String, _>>()
            .map_err(|_| CodecError::InvalidString)
    }

    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(CodecError::ShortField);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// An append buffer for a single response frame, built up field by field and
/// finished into an exact 4096-byte block (§4.2 "Response encoding").
pub struct OutboundBlock {
    buf: Vec<u8>,
}

impl OutboundBlock {
    /// `response_start()`: reset outbound, append `GLCO` and status `0`.
    pub fn start() -> Self {
        let mut buf = Vec::with_capacity(BLOCK_SIZE);
        buf.extend_from_slice(&MAGIC_OUT.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        OutboundBlock { buf }
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Writes `u32 char_count` (UTF-16 code units, not bytes or scalar values)
    /// followed by the UTF-16LE encoding of `s`, no BOM.
    pub fn write_string(&mut self, s: &str) -> &mut Self {
        let units: Vec<u16> = s.encode_utf16().collect();
        self.write_u32(units.len() as u32);
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
        self
    }

    /// `response_end()`: zero-pad to exactly 4096 bytes.
    ///
    /// A handler's payload can legitimately overflow a block: `GetDirectory`,
    /// `GetFile`, `GetSpecialPath`, and `SelectFile` all encode host-derived,
    /// unbounded-length paths as UTF-16LE, and the device can grow one past the
    /// limit (deeply nested `Create`d directories, a long special-path alias or
    /// host path). Per §7 every command path must end in either a full 4 KiB
    /// frame or a controlled session teardown, never a process abort, so an
    /// overflow here falls back to a `0xDEAD` failure frame instead of
    /// panicking.
    pub fn end(&mut self) -> [u8; BLOCK_SIZE] {
        if self.buf.len() > BLOCK_SIZE {
            warn!(
                "response payload ({} bytes) overflowed a {BLOCK_SIZE}-byte block, failing the request",
                self.buf.len()
            );
            return OutboundBlock::failure(STATUS_FAILURE);
        }
        self.buf.resize(BLOCK_SIZE, 0);
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(&self.buf);
        out
    }

    /// `respond_failure(code)`: a fresh header carrying a non-zero status and no
    /// payload, already padded to a full block.
    pub fn failure(code: u32) -> [u8; BLOCK_SIZE] {
        let mut buf = vec![0u8; BLOCK_SIZE];
        buf[0..4].copy_from_slice(&MAGIC_OUT.to_le_bytes());
        buf[4..8].copy_from_slice(&code.to_le_bytes());
        buf.try_into().unwrap()
    }

    /// `respond_empty()`: `start()` immediately followed by `end()`.
    pub fn empty() -> [u8; BLOCK_SIZE] {
        OutboundBlock::start().end()
    }
}
