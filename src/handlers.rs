//! The eighteen command handlers (§4.4). `ReadFile`/`WriteFile` stream raw bulk
//! payload over the transport directly and live in [`crate::dispatch`]; every
//! other opcode is handled here, decoding its input fields from the inbound
//! block and returning a single finished response block.

use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::{InboundBlock, OutboundBlock, BLOCK_SIZE};
use crate::dispatch::Opcode;
use crate::error::HandlerError;
use crate::pathspace::{denormalize, normalize, DriveProvider, FilePicker, SpecialPathCatalog};
use crate::session::{FileSession, OpenMode};

/// The original hardcodes an example path here; we do the same, just with our
/// own placeholder rather than theirs (§4.4 "well-known placeholder").
const SELECT_FILE_PLACEHOLDER_HOST_PATH: &str = "/home/goldleaf-agent/placeholder-selection";

pub struct Collaborators<'a> {
    pub drives: &'a dyn DriveProvider,
    pub catalog: &'a dyn SpecialPathCatalog,
    pub picker: &'a dyn FilePicker,
}

pub fn get_drive_count(collab: &Collaborators) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let count = collab.drives.list_drives().len() as u32;
    Ok(OutboundBlock::start().write_u32(count).end())
}

pub fn get_drive_info(
    inbound: &mut InboundBlock,
    collab: &Collaborators,
) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let idx = inbound.read_u32()?;
    let drives = collab.drives.list_drives();
    let drive = drives
        .get(idx as usize)
        .ok_or(HandlerError::IndexOutOfRange {
            idx,
            len: drives.len() as u32,
        })?;
    Ok(OutboundBlock::start()
        .write_string(&drive.label)
        .write_string(&drive.id)
        .write_u32(0)
        .write_u32(0)
        .end())
}

pub fn stat_path(inbound: &mut InboundBlock) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let vpath = inbound.read_string()?;
    let host_path = denormalize(&vpath);
    let meta = fs::metadata(&host_path)?;
    let (ftype, size) = if meta.is_dir() {
        (2u32, 0u64)
    } else if meta.is_file() {
        (1u32, meta.len())
    } else {
        return Err(HandlerError::NotFound(vpath));
    };
    Ok(OutboundBlock::start()
        .write_u32(ftype)
        .write_u64(size)
        .end())
}

/// Directory entries sorted by filename, for stable indexing across the
/// separate `GetFileCount`/`GetFile` (or `GetDirectoryCount`/`GetDirectory`)
/// round trips the device makes while enumerating a directory.
fn sorted_dir_entries(host_dir: &Path) -> std::io::Result<Vec<std::fs::DirEntry>> {
    let mut entries: Vec<_> = fs::read_dir(host_dir)?.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn files_in(host_dir: &Path) -> std::io::Result<Vec<String>> {
    Ok(sorted_dir_entries(host_dir)?
        .into_iter()
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect())
}

fn dirs_in(host_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    Ok(sorted_dir_entries(host_dir)?
        .into_iter()
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect())
}

pub fn get_file_count(inbound: &mut InboundBlock) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let vdir = inbound.read_string()?;
    let count = files_in(Path::new(&denormalize(&vdir)))?.len() as u32;
    Ok(OutboundBlock::start().write_u32(count).end())
}

pub fn get_file(inbound: &mut InboundBlock) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let vdir = inbound.read_string()?;
    let idx = inbound.read_u32()?;
    let files = files_in(Path::new(&denormalize(&vdir)))?;
    let name = files.get(idx as usize).ok_or(HandlerError::IndexOutOfRange {
        idx,
        len: files.len() as u32,
    })?;
    Ok(OutboundBlock::start().write_string(name).end())
}

pub fn get_directory_count(inbound: &mut InboundBlock) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let vdir = inbound.read_string()?;
    let count = dirs_in(Path::new(&denormalize(&vdir)))?.len() as u32;
    Ok(OutboundBlock::start().write_u32(count).end())
}

pub fn get_directory(inbound: &mut InboundBlock) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let vdir = inbound.read_string()?;
    let idx = inbound.read_u32()?;
    let dirs = dirs_in(Path::new(&denormalize(&vdir)))?;
    let child = dirs.get(idx as usize).ok_or(HandlerError::IndexOutOfRange {
        idx,
        len: dirs.len() as u32,
    })?;
    let virtual_path = normalize(&child.to_string_lossy());
    Ok(OutboundBlock::start().write_string(&virtual_path).end())
}

pub fn start_file(
    inbound: &mut InboundBlock,
    session: &mut FileSession,
) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let vpath = inbound.read_string()?;
    let mode_raw = inbound.read_u32()?;
    let mode = OpenMode::from_u32(mode_raw).ok_or(HandlerError::InvalidMode(mode_raw))?;
    session.start_file(Path::new(&denormalize(&vpath)), mode)?;
    Ok(OutboundBlock::empty())
}

pub fn end_file(inbound: &mut InboundBlock, session: &mut FileSession) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let mode = inbound.read_u32()?;
    session.end_file(mode);
    Ok(OutboundBlock::empty())
}

#[cfg(unix)]
fn create_directory(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(0o755).create(path)
}

#[cfg(not(unix))]
fn create_directory(path: &Path) -> std::io::Result<()> {
    fs::create_dir(path)
}

pub fn create(inbound: &mut InboundBlock) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let ftype = inbound.read_u32()?;
    let vpath = inbound.read_string()?;
    let host_path = denormalize(&vpath);
    match ftype {
        1 => {
            fs::File::create(&host_path)?;
        }
        2 => create_directory(Path::new(&host_path))?,
        _ => return Err(HandlerError::InvalidFileType(ftype)),
    }
    Ok(OutboundBlock::empty())
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    let meta = fs::metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

pub fn delete(inbound: &mut InboundBlock) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let ftype = inbound.read_u32()?;
    let vpath = inbound.read_string()?;
    if ftype != 1 && ftype != 2 {
        return Err(HandlerError::InvalidFileType(ftype));
    }
    remove_any(Path::new(&denormalize(&vpath)))?;
    Ok(OutboundBlock::empty())
}

pub fn rename(inbound: &mut InboundBlock) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let ftype = inbound.read_u32()?;
    let vold = inbound.read_string()?;
    let vnew = inbound.read_string()?;
    if ftype != 1 && ftype != 2 {
        return Err(HandlerError::InvalidFileType(ftype));
    }
    fs::rename(denormalize(&vold), denormalize(&vnew))?;
    Ok(OutboundBlock::empty())
}

pub fn get_special_path_count(collab: &Collaborators) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    Ok(OutboundBlock::start().write_u32(collab.catalog.size()).end())
}

pub fn get_special_path(
    inbound: &mut InboundBlock,
    collab: &Collaborators,
) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let idx = inbound.read_u32()?;
    let list = collab.catalog.list();
    let entry = list.get(idx as usize).ok_or(HandlerError::IndexOutOfRange {
        idx,
        len: list.len() as u32,
    })?;
    Ok(OutboundBlock::start()
        .write_string(&entry.alias)
        .write_string(&normalize(&entry.host_path))
        .end())
}

pub fn select_file(collab: &Collaborators) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    let host_path = collab
        .picker
        .pick()
        .unwrap_or_else(|| SELECT_FILE_PLACEHOLDER_HOST_PATH.to_string());
    Ok(OutboundBlock::start().write_string(&normalize(&host_path)).end())
}

/// Routes every opcode except `Invalid`/`ReadFile`/`WriteFile`, which the
/// dispatcher's command loop handles directly (the latter two stream raw bulk
/// payload over the transport, outside the single-block response shape).
pub fn dispatch(
    op: Opcode,
    inbound: &mut InboundBlock,
    collab: &Collaborators,
    session: &mut FileSession,
) -> Result<[u8; BLOCK_SIZE], HandlerError> {
    match op {
        Opcode::GetDriveCount => get_drive_count(collab),
        Opcode::GetDriveInfo => get_drive_info(inbound, collab),
        Opcode::StatPath => stat_path(inbound),
        Opcode::GetFileCount => get_file_count(inbound),
        Opcode::GetFile => get_file(inbound),
        Opcode::GetDirectoryCount => get_directory_count(inbound),
        Opcode::GetDirectory => get_directory(inbound),
        Opcode::StartFile => start_file(inbound, session),
        Opcode::EndFile => end_file(inbound, session),
        Opcode::Create => create(inbound),
        Opcode::Delete => delete(inbound),
        Opcode::Rename => rename(inbound),
        Opcode::GetSpecialPathCount => get_special_path_count(collab),
        Opcode::GetSpecialPath => get_special_path(inbound, collab),
        Opcode::SelectFile => select_file(collab),
        Opcode::Invalid | Opcode::ReadFile | Opcode::WriteFile => {
            unreachable!("handled directly by the dispatcher's command loop")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::YamlSpecialPathCatalog;
    use crate::pathspace::{NullFilePicker, StdDriveProvider};

    fn collab(catalog: &YamlSpecialPathCatalog) -> Collaborators {
        Collaborators {
            drives: &StdDriveProvider,
            catalog,
            picker: &NullFilePicker,
        }
    }

    fn fresh_catalog() -> (tempfile::TempDir, YamlSpecialPathCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog =
            YamlSpecialPathCatalog::load_or_default(dir.path().join("catalog.yaml")).unwrap();
        (dir, catalog)
    }

    #[test]
    fn get_drive_count_reports_one_drive_on_unix() {
        if cfg!(windows) {
            return;
        }
        let (_d, catalog) = fresh_catalog();
        let block = get_drive_count(&collab(&catalog)).unwrap();
        let mut inbound = InboundBlock::new(block);
        inbound.read_u32().unwrap();
        inbound.read_u32().unwrap();
        assert_eq!(inbound.read_u32().unwrap(), 1);
    }

    #[test]
    fn get_drive_info_out_of_range_is_index_error() {
        let (_d, catalog) = fresh_catalog();
        let mut request = InboundBlock::new({
            let mut b = OutboundBlock::start();
            b.write_u32(99);
            b.end()
        });
        request.read_u32().unwrap();
        request.read_u32().unwrap();
        let err = get_drive_info(&mut request, &collab(&catalog)).unwrap_err();
        assert!(matches!(err, HandlerError::IndexOutOfRange { idx: 99, .. }));
    }

    #[test]
    fn stat_path_reports_file_size() {
        let (_d, catalog) = fresh_catalog();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, vec![0u8; 1024]).unwrap();

        let mut request = InboundBlock::new({
            let mut b = OutboundBlock::start();
            b.write_string(&normalize(&file.to_string_lossy()));
            b.end()
        });
        request.read_u32().unwrap();
        request.read_u32().unwrap();

        let block = stat_path(&mut request).unwrap();
        let mut resp = InboundBlock::new(block);
        resp.read_u32().unwrap();
        resp.read_u32().unwrap();
        assert_eq!(resp.read_u32().unwrap(), 1);
        assert_eq!(resp.read_u64().unwrap(), 1024);

        let _ = &collab(&catalog); // keep catalog alive for the tempdir lifetime
    }

    #[test]
    fn get_file_and_get_directory_are_sorted_and_distinct() {
        let (_d, catalog) = fresh_catalog();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let files = files_in(dir.path()).unwrap();
        assert_eq!(files, vec!["a.txt".to_string(), "b.txt".to_string()]);

        let dirs = dirs_in(dir.path()).unwrap();
        assert_eq!(dirs.len(), 1);
        let _ = &collab(&catalog);
    }

    #[test]
    fn create_ftype_zero_is_rejected() {
        let mut request = InboundBlock::new({
            let mut b = OutboundBlock::start();
            b.write_u32(0);
            b.write_string("Home:/x");
            b.end()
        });
        request.read_u32().unwrap();
        request.read_u32().unwrap();
        let err = create(&mut request).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidFileType(0)));
    }

    #[test]
    fn select_file_falls_back_to_placeholder_without_a_picker() {
        let (_d, catalog) = fresh_catalog();
        let block = select_file(&collab(&catalog)).unwrap();
        let mut resp = InboundBlock::new(block);
        resp.read_u32().unwrap();
        resp.read_u32().unwrap();
        let path = resp.read_string().unwrap();
        assert_eq!(path, normalize(SELECT_FILE_PLACEHOLDER_HOST_PATH));
    }
}
