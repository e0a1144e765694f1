//! Per-connection file-transfer session state (§3 "FileSession", §4.4 file-session semantics).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// `StartFile`'s `mode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read = 1,
    CreateWrite = 2,
    Append = 3,
}

impl OpenMode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(OpenMode::Read),
            2 => Some(OpenMode::CreateWrite),
            3 => Some(OpenMode::Append),
            _ => None,
        }
    }
}

/// Holds at most one open reader and one open writer, scoped to the lifetime of
/// a single device connection. Replaces the original's process-global file
/// handles (SPEC_FULL.md §9 "Global file-session state").
#[derive(Default)]
pub struct FileSession {
    reader: Option<File>,
    writer: Option<File>,
}

impl FileSession {
    pub fn new() -> Self {
        FileSession::default()
    }

    /// `StartFile`: opening a new reader/writer while one is already open closes
    /// the prior one silently (the `Option` assignment below drops it).
    pub fn start_file(&mut self, host_path: &Path, mode: OpenMode) -> io::Result<()> {
        match mode {
            OpenMode::Read => {
                self.reader = Some(File::open(host_path)?);
            }
            OpenMode::CreateWrite => {
                self.writer = Some(
                    OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(host_path)?,
                );
            }
            OpenMode::Append => {
                let mut f = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .open(host_path)?;
                f.seek(SeekFrom::End(0))?;
                self.writer = Some(f);
            }
        }
        Ok(())
    }

    /// `ReadFile`: seeks to `offset` and reads up to `size` bytes. Opens the file
    /// on demand if no reader is currently open. Short reads at EOF are returned
    /// as-is, not as an error.
    pub fn read(&mut self, host_path: &Path, offset: u64, size: u64) -> io::Result<Vec<u8>> {
        if self.reader.is_none() {
            self.reader = Some(File::open(host_path)?);
        }
        let reader = self.reader.as_mut().expect("just populated");
        reader.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break; // EOF: short read, not an error
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// `WriteFile`: appends to the open writer, or if none is open, writes `data`
    /// to `host_path` in one atomic call.
    pub fn write(&mut self, host_path: &Path, data: &[u8]) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.write_all(data),
            None => {
                let mut f = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(host_path)?;
                f.write_all(data)
            }
        }
    }

    /// `EndFile`: mode `1` closes the reader; any other mode closes the writer.
    pub fn end_file(&mut self, mode: u32) {
        if mode == 1 {
            self.reader = None;
        } else {
            self.writer = None;
        }
    }

    /// Mandatory teardown on transport disconnect (§3, §5).
    pub fn teardown(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn start_file_mode3_on_missing_file_creates_and_seeks_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.txt");
        let mut session = FileSession::new();
        session.start_file(&path, OpenMode::Append).unwrap();
        assert!(session.has_writer());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn read_at_eof_returns_short_read_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut session = FileSession::new();
        let data = session.read(&path, 0, 1024).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn write_without_open_writer_is_atomic_single_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut session = FileSession::new();
        session.write(&path, b"abc").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn at_most_one_reader_and_one_writer() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let mut session = FileSession::new();
        session.start_file(&a, OpenMode::Read).unwrap();
        assert!(session.has_reader());
        session.start_file(&b, OpenMode::Read).unwrap();
        assert!(session.has_reader());
        // second open silently replaced the first; still only one reader slot
        assert!(session.reader.is_some());
    }

    #[test]
    fn end_file_mode_1_closes_reader_other_modes_close_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"x").unwrap();

        let mut session = FileSession::new();
        session.start_file(&path, OpenMode::Read).unwrap();
        session.start_file(&path, OpenMode::CreateWrite).unwrap();
        session.end_file(1);
        assert!(!session.has_reader());
        assert!(session.has_writer());
        session.end_file(2);
        assert!(!session.has_writer());
    }

    #[test]
    fn teardown_closes_both() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"x").unwrap();

        let mut session = FileSession::new();
        session.start_file(&path, OpenMode::Read).unwrap();
        session.start_file(&path, OpenMode::CreateWrite).unwrap();
        session.teardown();
        assert!(!session.has_reader());
        assert!(!session.has_writer());
    }
}
