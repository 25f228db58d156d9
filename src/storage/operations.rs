//! Storage operations
//!
//! Filesystem primitives behind the FTP file commands. Everything here works
//! on paths already produced by the resolver; OS failures come back as
//! `StorageError` so the protocol layer never sees a raw `io::Error`.

use chrono::{DateTime, NaiveDateTime, Utc};
use filetime::FileTime;
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::StorageError;
use crate::storage::validation::ResolvedPath;
use crate::transfer::modes::{TransferType, ascii_encoded_len};

/// Format used by MDTM replies and by the two-argument MDTM form.
const MDTM_FORMAT: &str = "%Y%m%d%H%M%S";

/// Creates exactly one directory; parents are never created implicitly.
pub fn make_directory(path: &ResolvedPath) -> Result<(), StorageError> {
    fs::create_dir(path.real_path())?;
    info!("Created directory {}", path.virtual_path());
    Ok(())
}

pub fn remove_directory(path: &ResolvedPath) -> Result<(), StorageError> {
    path.ensure_not_root()?;
    let metadata = fs::symlink_metadata(path.real_path())?;
    if !metadata.is_dir() {
        return Err(StorageError::NotADirectory);
    }
    fs::remove_dir(path.real_path())?;
    info!("Removed directory {}", path.virtual_path());
    Ok(())
}

/// Deletes a file or a symlink; directories are refused.
pub fn delete_file(path: &ResolvedPath) -> Result<(), StorageError> {
    let metadata = fs::symlink_metadata(path.real_path())?;
    if metadata.is_dir() {
        return Err(StorageError::IsADirectory);
    }
    fs::remove_file(path.real_path())?;
    info!("Deleted {}", path.virtual_path());
    Ok(())
}

/// Checks an RNFR source exists. A symlink is renamed as itself.
pub fn check_rename_source(path: &ResolvedPath) -> Result<(), StorageError> {
    path.ensure_not_root()?;
    fs::symlink_metadata(path.real_path())?;
    Ok(())
}

pub fn rename_path(from: &ResolvedPath, to: &ResolvedPath) -> Result<(), StorageError> {
    from.ensure_not_root()?;
    to.ensure_not_root()?;
    fs::rename(from.real_path(), to.real_path())?;
    info!("Renamed {} -> {}", from.virtual_path(), to.virtual_path());
    Ok(())
}

/// Size of a regular file as it would travel over the data connection in
/// the given transfer type.
pub fn file_size(
    path: &ResolvedPath,
    root: &Path,
    transfer_type: TransferType,
) -> Result<u64, StorageError> {
    let real = path.canonical_within(root)?;
    let metadata = fs::metadata(&real)?;
    if metadata.is_dir() {
        return Err(StorageError::IsADirectory);
    }

    match transfer_type {
        TransferType::Binary => Ok(metadata.len()),
        TransferType::Ascii => Ok(ascii_encoded_len(File::open(&real)?)?),
    }
}

/// `file_size` run on the blocking pool. An ASCII size reads the whole
/// file, which must not stall the async workers.
pub async fn file_size_off_thread(
    path: ResolvedPath,
    root: PathBuf,
    transfer_type: TransferType,
) -> Result<u64, StorageError> {
    tokio::task::spawn_blocking(move || file_size(&path, &root, transfer_type))
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))?
}

pub fn modification_time(path: &ResolvedPath, root: &Path) -> Result<SystemTime, StorageError> {
    let real = path.canonical_within(root)?;
    let metadata = fs::metadata(&real)?;
    if metadata.is_dir() {
        return Err(StorageError::IsADirectory);
    }
    Ok(metadata.modified()?)
}

pub fn set_modification_time(
    path: &ResolvedPath,
    root: &Path,
    time: DateTime<Utc>,
) -> Result<(), StorageError> {
    let real = path.canonical_within(root)?;
    if fs::metadata(&real)?.is_dir() {
        return Err(StorageError::IsADirectory);
    }
    let mtime = FileTime::from_unix_time(time.timestamp(), 0);
    filetime::set_file_mtime(&real, mtime)?;
    debug!("Set mtime of {} to {time}", path.virtual_path());
    Ok(())
}

#[cfg(unix)]
pub fn change_mode(path: &ResolvedPath, root: &Path, mode: u32) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    let real = path.canonical_within(root)?;
    fs::set_permissions(&real, fs::Permissions::from_mode(mode & 0o7777))?;
    info!("Changed mode of {} to {mode:o}", path.virtual_path());
    Ok(())
}

#[cfg(not(unix))]
pub fn change_mode(path: &ResolvedPath, root: &Path, _mode: u32) -> Result<(), StorageError> {
    path.canonical_within(root)?;
    Err(StorageError::PermissionDenied)
}

/// Parses `YYYYMMDDHHMMSS` (UTC), as used by MDTM.
pub fn parse_mdtm_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.len() != 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(value, MDTM_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn format_mdtm_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(MDTM_FORMAT).to_string()
}

/// Opens a regular file for RETR and returns it with its length.
pub fn open_for_retrieve(path: &ResolvedPath, root: &Path) -> Result<(File, u64), StorageError> {
    let real = path.canonical_within(root)?;
    let file = File::open(&real)?;
    let metadata = file.metadata()?;
    if metadata.is_dir() {
        return Err(StorageError::IsADirectory);
    }
    Ok((file, metadata.len()))
}

/// Current length of an upload target, `None` when it does not exist yet.
pub fn existing_length(path: &ResolvedPath, root: &Path) -> Result<Option<u64>, StorageError> {
    match fs::symlink_metadata(path.real_path()) {
        Ok(_) => {
            let real = path.canonical_within(root)?;
            let metadata = fs::metadata(real)?;
            if metadata.is_dir() {
                return Err(StorageError::IsADirectory);
            }
            Ok(Some(metadata.len()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Opens an upload target positioned at `offset`, discarding anything
/// after it. An offset of zero truncates.
pub fn open_for_store(path: &ResolvedPath, offset: u64) -> Result<File, StorageError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path.real_path())?;
    file.set_len(offset)?;
    file.seek(SeekFrom::Start(offset))?;
    Ok(file)
}

pub fn open_for_append(path: &ResolvedPath) -> Result<File, StorageError> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.real_path())?)
}
