//! Opcode table and the per-connection command loop (§4.4 dispatcher, §4.4
//! file-session semantics for `ReadFile`/`WriteFile`).

use std::path::Path;

use log::{debug, warn};

use crate::codec::{InboundBlock, OutboundBlock, BLOCK_SIZE, STATUS_FAILURE};
use crate::error::{CodecError, TransportError};
use crate::handlers::{self, Collaborators};
use crate::pathspace::denormalize;
use crate::session::FileSession;
use crate::transport::BlockTransport;

/// The eighteen opcodes, in their fixed wire order (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Invalid = 0,
    GetDriveCount = 1,
    GetDriveInfo = 2,
    StatPath = 3,
    GetFileCount = 4,
    GetFile = 5,
    GetDirectoryCount = 6,
    GetDirectory = 7,
    StartFile = 8,
    ReadFile = 9,
    WriteFile = 10,
    EndFile = 11,
    Create = 12,
    Delete = 13,
    Rename = 14,
    GetSpecialPathCount = 15,
    GetSpecialPath = 16,
    SelectFile = 17,
}

impl Opcode {
    pub fn from_u32(v: u32) -> Option<Opcode> {
        Some(match v {
            0 => Opcode::Invalid,
            1 => Opcode::GetDriveCount,
            2 => Opcode::GetDriveInfo,
            3 => Opcode::StatPath,
            4 => Opcode::GetFileCount,
            5 => Opcode::GetFile,
            6 => Opcode::GetDirectoryCount,
            7 => Opcode::GetDirectory,
            8 => Opcode::StartFile,
            9 => Opcode::ReadFile,
            10 => Opcode::WriteFile,
            11 => Opcode::EndFile,
            12 => Opcode::Create,
            13 => Opcode::Delete,
            14 => Opcode::Rename,
            15 => Opcode::GetSpecialPathCount,
            16 => Opcode::GetSpecialPath,
            17 => Opcode::SelectFile,
            _ => return None,
        })
    }
}

/// Outcome of a fatal command-loop condition: either the session must end and
/// the outer loop reconnects (§4.2 "Codec errors", §7), or the transport itself
/// is gone (§4.1 disconnect/cancellation).
#[derive(Debug)]
pub enum SessionError {
    ProtocolFatal(CodecError),
    Transport(TransportError),
}

/// Owns the collaborators and the file-session record for one device
/// connection. A fresh `Dispatcher` is created per connection so a prior
/// session's open reader/writer can never leak into the next one.
pub struct Dispatcher<'a> {
    collab: Collaborators<'a>,
    session: FileSession,
}

impl<'a> Dispatcher<'a> {
    pub fn new(collab: Collaborators<'a>) -> Self {
        Dispatcher {
            collab,
            session: FileSession::new(),
        }
    }

    /// Runs the command loop until the transport disconnects, is cancelled, or
    /// a protocol-fatal condition ends the session.
    pub fn run<T: BlockTransport>(&mut self, transport: &mut T) -> SessionError {
        loop {
            if let Err(e) = self.run_one(transport) {
                self.session.teardown();
                return e;
            }
        }
    }

    /// Services exactly one request. Recoverable per-request failures are
    /// turned into a `0xDEAD` reply and swallowed here (§7 "Request-failure");
    /// only protocol-fatal and transport errors propagate.
    fn run_one<T: BlockTransport>(&mut self, transport: &mut T) -> Result<(), SessionError> {
        let raw = transport.read_block().map_err(SessionError::Transport)?;
        let mut inbound = InboundBlock::new(raw);

        if let Err(e) = inbound.read_magic() {
            let CodecError::MagicMismatch(magic) = e else {
                unreachable!("read_magic only ever returns MagicMismatch")
            };
            warn!("magic mismatch 0x{magic:08x}, ending session for reconnect");
            return Err(SessionError::ProtocolFatal(CodecError::MagicMismatch(magic)));
        }

        let opcode_raw = inbound
            .read_u32()
            .expect("opcode field is always present in a full 4096-byte block");

        match Opcode::from_u32(opcode_raw) {
            None => {
                warn!("unknown opcode {opcode_raw}, no response sent");
                Ok(())
            }
            Some(Opcode::Invalid) => {
                warn!("Invalid opcode (0) received, no response sent");
                Ok(())
            }
            Some(Opcode::ReadFile) => self.read_file(&mut inbound, transport),
            Some(Opcode::WriteFile) => self.write_file(&mut inbound, transport),
            Some(op) => {
                let block = handlers::dispatch(op, &mut inbound, &self.collab, &mut self.session)
                    .unwrap_or_else(|e| {
                        debug!("handler failure for {op:?}: {e}");
                        OutboundBlock::failure(STATUS_FAILURE)
                    });
                transport.write_block(&block).map_err(SessionError::Transport)
            }
        }
    }

    fn fail<T: BlockTransport>(&self, transport: &mut T) -> Result<(), SessionError> {
        transport
            .write_block(&OutboundBlock::failure(STATUS_FAILURE))
            .map_err(SessionError::Transport)
    }

    /// `ReadFile`: the header block (bytes_read) is only emitted once the data
    /// has been read successfully, so a failure never leaves a half-sent reply.
    fn read_file<T: BlockTransport>(
        &mut self,
        inbound: &mut InboundBlock,
        transport: &mut T,
    ) -> Result<(), SessionError> {
        let (vpath, offset, size) = match (|| -> Result<_, CodecError> {
            Ok((inbound.read_string()?, inbound.read_u64()?, inbound.read_u64()?))
        })() {
            Ok(fields) => fields,
            Err(_) => return self.fail(transport),
        };

        let host_path = denormalize(&vpath);
        let data = match self.session.read(Path::new(&host_path), offset, size) {
            Ok(data) => data,
            Err(_) => return self.fail(transport),
        };

        let mut header = OutboundBlock::start();
        header.write_u64(data.len() as u64);
        transport
            .write_block(&header.end())
            .map_err(SessionError::Transport)?;

        for chunk in data.chunks(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            transport.write_block(&block).map_err(SessionError::Transport)?;
        }
        Ok(())
    }

    /// `WriteFile`: reads exactly `length` bytes across as many follow-up
    /// blocks as needed (§9 "WriteFile length semantics"), before attempting
    /// the write, so a write failure is still a clean `0xDEAD` reply.
    fn write_file<T: BlockTransport>(
        &mut self,
        inbound: &mut InboundBlock,
        transport: &mut T,
    ) -> Result<(), SessionError> {
        let (vpath, length) = match (|| -> Result<_, CodecError> {
            Ok((inbound.read_string()?, inbound.read_u64()?))
        })() {
            Ok(fields) => fields,
            Err(_) => return self.fail(transport),
        };

        let mut data = Vec::with_capacity(length as usize);
        let mut remaining = length as usize;
        while remaining > 0 {
            let block = transport.read_block().map_err(SessionError::Transport)?;
            let take = remaining.min(BLOCK_SIZE);
            data.extend_from_slice(&block[..take]);
            remaining -= take;
        }

        let host_path = denormalize(&vpath);
        match self.session.write(Path::new(&host_path), &data) {
            Ok(()) => transport
                .write_block(&OutboundBlock::empty())
                .map_err(SessionError::Transport),
            Err(_) => self.fail(transport),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MAGIC_IN, MAGIC_OUT};
    use crate::config::YamlSpecialPathCatalog;
    use crate::pathspace::{normalize, NullFilePicker, StdDriveProvider};
    use crate::transport::MockTransport;

    fn request_block(opcode: u32, fields: impl FnOnce(&mut OutboundBlock)) -> [u8; BLOCK_SIZE] {
        let mut buf = Vec::with_capacity(BLOCK_SIZE);
        buf.extend_from_slice(&MAGIC_IN.to_le_bytes());
        buf.extend_from_slice(&opcode.to_le_bytes());
        // reuse OutboundBlock purely as an append buffer for the payload fields
        let mut appended = OutboundBlock::start();
        fields(&mut appended);
        // OutboundBlock::start() already wrote an 8-byte GLCO+status header we don't want here
        let block = appended.end();
        buf.extend_from_slice(&block[8..]);
        buf.resize(BLOCK_SIZE, 0);
        buf.try_into().unwrap()
    }

    fn fresh_dispatcher() -> (tempfile::TempDir, YamlSpecialPathCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog =
            YamlSpecialPathCatalog::load_or_default(dir.path().join("catalog.yaml")).unwrap();
        (dir, catalog)
    }

    fn collab(catalog: &YamlSpecialPathCatalog) -> Collaborators {
        Collaborators {
            drives: &StdDriveProvider,
            catalog,
            picker: &NullFilePicker,
        }
    }

    #[test]
    fn get_drive_count_scenario_from_spec() {
        if cfg!(windows) {
            return;
        }
        let (_dir, catalog) = fresh_dispatcher();
        let mut transport = MockTransport::new(vec![request_block(1, |_| {})]);
        let mut dispatcher = Dispatcher::new(collab(&catalog));
        dispatcher.run_one(&mut transport).unwrap();

        let out = &transport.outbound[0];
        assert_eq!(&out[0..4], &MAGIC_OUT.to_le_bytes());
        assert_eq!(&out[4..8], &0u32.to_le_bytes());
        assert_eq!(&out[8..12], &1u32.to_le_bytes());
        assert!(out[12..].iter().all(|&b| b == 0));
    }

    #[test]
    fn get_drive_info_idx_99_fails_with_0xdead() {
        let (_dir, catalog) = fresh_dispatcher();
        let mut transport = MockTransport::new(vec![request_block(2, |b| {
            b.write_u32(99);
        })]);
        let mut dispatcher = Dispatcher::new(collab(&catalog));
        dispatcher.run_one(&mut transport).unwrap();

        let out = &transport.outbound[0];
        assert_eq!(&out[4..8], &STATUS_FAILURE.to_le_bytes());
        assert!(out[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn magic_mismatch_is_protocol_fatal_with_no_response() {
        let (_dir, catalog) = fresh_dispatcher();
        let bad_block = [0u8; BLOCK_SIZE];
        let mut transport = MockTransport::new(vec![bad_block]);
        let mut dispatcher = Dispatcher::new(collab(&catalog));
        let err = dispatcher.run_one(&mut transport).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolFatal(_)));
        assert!(transport.outbound.is_empty());
    }

    #[test]
    fn invalid_opcode_zero_produces_no_response() {
        let (_dir, catalog) = fresh_dispatcher();
        let mut transport = MockTransport::new(vec![request_block(0, |_| {})]);
        let mut dispatcher = Dispatcher::new(collab(&catalog));
        dispatcher.run_one(&mut transport).unwrap();
        assert!(transport.outbound.is_empty());
    }

    #[test]
    fn unknown_opcode_produces_no_response() {
        let (_dir, catalog) = fresh_dispatcher();
        let mut transport = MockTransport::new(vec![request_block(999, |_| {})]);
        let mut dispatcher = Dispatcher::new(collab(&catalog));
        dispatcher.run_one(&mut transport).unwrap();
        assert!(transport.outbound.is_empty());
    }

    #[test]
    fn stat_path_scenario_for_a_1024_byte_file() {
        if cfg!(windows) {
            return;
        }
        let (_dir, catalog) = fresh_dispatcher();
        let data_dir = tempfile::tempdir().unwrap();
        let file = data_dir.path().join("file.txt");
        std::fs::write(&file, vec![0u8; 1024]).unwrap();
        let vpath = normalize(&file.to_string_lossy());

        let mut transport = MockTransport::new(vec![request_block(3, |b| {
            b.write_string(&vpath);
        })]);
        let mut dispatcher = Dispatcher::new(collab(&catalog));
        dispatcher.run_one(&mut transport).unwrap();

        let out = &transport.outbound[0];
        assert_eq!(&out[4..8], &0u32.to_le_bytes());
        assert_eq!(&out[8..12], &1u32.to_le_bytes()); // ftype = file
        assert_eq!(u64::from_le_bytes(out[12..20].try_into().unwrap()), 1024);
    }

    #[test]
    fn write_then_read_file_round_trips_through_the_dispatcher() {
        if cfg!(windows) {
            return;
        }
        let (_dir, catalog) = fresh_dispatcher();
        let data_dir = tempfile::tempdir().unwrap();
        let file = data_dir.path().join("roundtrip.bin");
        let vpath = normalize(&file.to_string_lossy());
        let payload = b"hello from the switch".to_vec();

        // WriteFile: header (vpath, length) + exactly one follow-up block of raw bytes.
        let header = request_block(10, |b| {
            b.write_string(&vpath);
            b.write_u64(payload.len() as u64);
        });
        let mut raw_block = [0u8; BLOCK_SIZE];
        raw_block[..payload.len()].copy_from_slice(&payload);

        let mut transport = MockTransport::new(vec![header, raw_block]);
        let mut dispatcher = Dispatcher::new(collab(&catalog));
        dispatcher.run_one(&mut transport).unwrap();
        assert_eq!(transport.outbound.len(), 1);
        assert_eq!(&transport.outbound[0][4..8], &0u32.to_le_bytes());
        assert_eq!(std::fs::read(&file).unwrap(), payload);

        // ReadFile: header (vpath, offset, size) -> bytes_read header block + raw data block(s).
        let read_req = request_block(9, |b| {
            b.write_string(&vpath);
            b.write_u64(0);
            b.write_u64(1024);
        });
        let mut transport = MockTransport::new(vec![read_req]);
        let mut dispatcher = Dispatcher::new(collab(&catalog));
        dispatcher.run_one(&mut transport).unwrap();

        assert_eq!(transport.outbound.len(), 2);
        let bytes_read = u64::from_le_bytes(transport.outbound[0][8..16].try_into().unwrap());
        assert_eq!(bytes_read, payload.len() as u64);
        assert_eq!(&transport.outbound[1][..payload.len()], &payload[..]);
    }
}
