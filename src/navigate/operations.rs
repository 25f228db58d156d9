//! Navigation operations implementation

use std::fs;
use std::path::Path;

use crate::error::{PathError, StorageError};
use crate::storage::validation::{real_to_virtual_path, resolve_path};

/// Resolves a CWD target and returns the new virtual working directory.
///
/// Symlinks are followed; the reported directory is the link's real
/// location inside the root.
pub fn change_directory(
    server_root: &Path,
    home: &str,
    current_virtual_path: &str,
    target_path: &str,
) -> Result<String, StorageError> {
    let resolved = resolve_path(server_root, home, current_virtual_path, target_path)?;
    let canonical = resolved.canonical_within(server_root)?;

    if !fs::metadata(&canonical)?.is_dir() {
        return Err(StorageError::NotADirectory);
    }
    // Reading the directory is what a client will do next; refuse early
    // when it is not permitted.
    fs::read_dir(&canonical)?;

    real_to_virtual_path(server_root, &canonical).ok_or(StorageError::Path(PathError::OutsideRoot))
}

/// Parent of the current directory, clamped at the root.
pub fn parent_directory(current_virtual_path: &str) -> String {
    match current_virtual_path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

/// Quotes a directory for a 257 reply, doubling embedded quotes.
pub fn quote_path(virtual_path: &str) -> String {
    format!("\"{}\"", virtual_path.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cwd_clamps_and_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("work/share")).unwrap();
        fs::write(root.join("work/file"), b"").unwrap();

        assert_eq!(
            change_directory(&root, "/", "/work", "share").unwrap(),
            "/work/share"
        );
        assert_eq!(change_directory(&root, "/", "/work", "../../../..").unwrap(), "/");
        assert_eq!(change_directory(&root, "/work", "/", "~").unwrap(), "/work");
        assert!(matches!(
            change_directory(&root, "/", "/", "missing"),
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            change_directory(&root, "/", "/", "work/file"),
            Err(StorageError::NotADirectory)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn cwd_into_symlink_reports_real_location() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("real/inner")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();
        fs::write(root.join("plain"), b"").unwrap();
        std::os::unix::fs::symlink(root.join("plain"), root.join("filelink")).unwrap();

        assert_eq!(change_directory(&root, "/", "/", "link/inner").unwrap(), "/real/inner");
        assert!(matches!(
            change_directory(&root, "/", "/", "filelink"),
            Err(StorageError::NotADirectory)
        ));
    }

    #[test]
    fn parent_clamps_at_root() {
        assert_eq!(parent_directory("/a/b"), "/a");
        assert_eq!(parent_directory("/a"), "/");
        assert_eq!(parent_directory("/"), "/");
    }

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(quote_path("/a\"b"), "\"/a\"\"b\"");
    }
}
