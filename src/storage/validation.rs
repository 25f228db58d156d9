//! Path validation
//!
//! Maps client-visible virtual paths onto the real filesystem. Normalization
//! is purely lexical; the filesystem is only consulted to make sure symlinked
//! components cannot lead outside the virtual root.

use std::path::{Path, PathBuf};

use crate::error::{PathError, StorageError};

/// A virtual path together with the real path it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    virtual_path: String,
    real_path: PathBuf,
}

impl ResolvedPath {
    /// Normalized, absolute virtual path (always starts with `/`).
    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    pub fn real_path(&self) -> &Path {
        &self.real_path
    }

    pub fn is_root(&self) -> bool {
        self.virtual_path == "/"
    }

    /// Destructive operations (RMD, RNFR, RNTO) may not target the root.
    pub fn ensure_not_root(&self) -> Result<(), PathError> {
        if self.is_root() {
            Err(PathError::RootDirectory)
        } else {
            Ok(())
        }
    }

    /// Last segment of the virtual path; empty for the root.
    pub fn file_name(&self) -> &str {
        self.virtual_path.rsplit('/').next().unwrap_or_default()
    }

    /// Follows every symlink and checks the target is still inside `root`.
    pub fn canonical_within(&self, root: &Path) -> Result<PathBuf, StorageError> {
        let canonical = self.real_path.canonicalize()?;
        if canonical.starts_with(root) {
            Ok(canonical)
        } else {
            Err(PathError::OutsideRoot.into())
        }
    }
}

/// Lexically resolves `target` against the current virtual directory.
///
/// `~` (alone or followed by `/`) expands to `home`. Empty and `.` segments
/// are dropped; `..` above the root clamps to the root.
pub fn resolve_virtual_path(cwd: &str, home: &str, target: &str) -> String {
    let (base, rest) = if target.starts_with('/') {
        ("", target)
    } else if target == "~" || target.starts_with("~/") {
        (home, &target[1..])
    } else {
        (cwd, target)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(rest.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Joins a normalized virtual path onto the real root.
pub fn virtual_to_real_path(server_root: &Path, virtual_path: &str) -> PathBuf {
    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        server_root.to_path_buf()
    } else {
        server_root.join(relative)
    }
}

/// Maps a canonical real path back into the virtual namespace.
pub fn real_to_virtual_path(server_root: &Path, real_path: &Path) -> Option<String> {
    let relative = real_path.strip_prefix(server_root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("/{}", segments.join("/")))
}

/// Resolves a command argument to a virtual/real path pair.
///
/// The final component is not followed, so operations like RNFR and DELE act
/// on a symlink itself. Its parent directory, however, must canonicalize to
/// somewhere inside the root.
pub fn resolve_path(
    server_root: &Path,
    home: &str,
    cwd: &str,
    target: &str,
) -> Result<ResolvedPath, PathError> {
    let virtual_path = resolve_virtual_path(cwd, home, target);
    let real_path = virtual_to_real_path(server_root, &virtual_path);

    if virtual_path != "/" {
        if let Some(parent) = real_path.parent() {
            // A missing parent surfaces later as NotFound from the actual operation.
            if let Ok(canonical_parent) = parent.canonicalize() {
                if !canonical_parent.starts_with(server_root) {
                    return Err(PathError::OutsideRoot);
                }
            }
        }
    }

    Ok(ResolvedPath {
        virtual_path,
        real_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_relative_and_absolute_paths() {
        assert_eq!(resolve_virtual_path("/a", "/", "b"), "/a/b");
        assert_eq!(resolve_virtual_path("/a", "/", "/b//c/./d/"), "/b/c/d");
        assert_eq!(resolve_virtual_path("/a/b", "/", "../c"), "/a/c");
        assert_eq!(resolve_virtual_path("/a", "/", "."), "/a");
        assert_eq!(resolve_virtual_path("/", "/", ""), "/");
    }

    #[test]
    fn dot_dot_above_root_clamps() {
        assert_eq!(resolve_virtual_path("/", "/", ".."), "/");
        assert_eq!(resolve_virtual_path("/a", "/", "../../../../etc"), "/etc");
        assert_eq!(resolve_virtual_path("/a", "/", "/../../x/.."), "/");
    }

    #[test]
    fn tilde_expands_to_home() {
        assert_eq!(resolve_virtual_path("/tmp", "/work/share", "~"), "/work/share");
        assert_eq!(resolve_virtual_path("/tmp", "/work/share", "~/x"), "/work/share/x");
        // only a bare tilde is special
        assert_eq!(resolve_virtual_path("/tmp", "/work", "~x"), "/tmp/~x");
    }

    #[test]
    fn never_escapes_root_lexically() {
        let root = Path::new("/srv/ftp");
        let segments = ["..", ".", "a", "..", "b", "../..", "", "~"];
        for cwd in ["/", "/a", "/a/b/c"] {
            for first in segments {
                for second in segments {
                    let target = format!("{first}/{second}/../..");
                    let resolved = resolve_virtual_path(cwd, "/", &target);
                    let real = virtual_to_real_path(root, &resolved);
                    assert!(real.starts_with(root), "{cwd} + {target} -> {real:?}");
                }
            }
        }
    }

    #[test]
    fn real_and_virtual_round_trip() {
        let root = Path::new("/srv/ftp");
        assert_eq!(virtual_to_real_path(root, "/"), PathBuf::from("/srv/ftp"));
        assert_eq!(
            real_to_virtual_path(root, Path::new("/srv/ftp/a/b")).as_deref(),
            Some("/a/b")
        );
        assert_eq!(real_to_virtual_path(root, root).as_deref(), Some("/"));
        assert_eq!(real_to_virtual_path(root, Path::new("/etc")), None);
    }

    #[test]
    fn root_is_protected_from_destructive_operations() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let resolved = resolve_path(&root, "/", "/", "..").unwrap();
        assert!(resolved.is_root());
        assert_eq!(resolved.ensure_not_root(), Err(PathError::RootDirectory));
        assert_eq!(resolved.file_name(), "");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_parent_outside_root_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();

        assert_eq!(
            resolve_path(&root, "/", "/", "escape/file"),
            Err(PathError::OutsideRoot)
        );
        // the link itself may still be addressed (e.g. to delete it)
        let link = resolve_path(&root, "/", "/", "escape").unwrap();
        assert!(matches!(
            link.canonical_within(&root),
            Err(StorageError::Path(PathError::OutsideRoot))
        ));
    }
}
