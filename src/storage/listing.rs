//! Directory listings
//!
//! Collects the entries named by a LIST/NLST/STAT argument and renders them
//! either `ls -l` style or as bare names. Every call re-reads the
//! filesystem.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use glob::{MatchOptions, Pattern};
use log::debug;
use std::fs::{self, Metadata};
use std::path::Path;
use std::time::SystemTime;

use crate::error::StorageError;
use crate::storage::validation::{ResolvedPath, resolve_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One line of a listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub link_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    /// LIST and STAT: `ls -l` style lines.
    Long,
    /// NLST: names only.
    NameOnly,
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Drops leading `ls` option tokens such as `-la`.
fn strip_options(arg: &str) -> &str {
    let mut rest = arg.trim();
    while rest.starts_with('-') {
        rest = match rest.split_once(' ') {
            Some((_, tail)) => tail.trim_start(),
            None => "",
        };
    }
    rest
}

fn has_glob(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

/// Collects the entries a listing argument refers to.
///
/// * no argument: the current directory
/// * a directory: its contents
/// * a file: that single entry, named as given
/// * a glob in the last segment: the matching entries of its directory
///
/// A path that does not exist, or a glob nothing matches, yields an empty
/// listing. Escaping the root is an error.
pub fn collect_entries(
    root: &Path,
    home: &str,
    cwd: &str,
    arg: Option<&str>,
) -> Result<Vec<DirEntry>, StorageError> {
    let target = strip_options(arg.unwrap_or_default());

    let (dir_part, pattern) = match target.rsplit_once('/') {
        Some((dir, last)) if has_glob(last) => (if dir.is_empty() { "/" } else { dir }, Some(last)),
        None if has_glob(target) => ("", Some(target)),
        _ => (target, None),
    };

    let resolved = resolve_path(root, home, cwd, dir_part)?;
    let real = match resolved.canonical_within(root) {
        Ok(real) => real,
        Err(StorageError::NotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let metadata = fs::metadata(&real)?;
    if !metadata.is_dir() {
        if pattern.is_some() {
            return Ok(Vec::new());
        }
        let name = if target.is_empty() {
            resolved.file_name().to_string()
        } else {
            target.to_string()
        };
        return Ok(vec![describe(&resolved, name)?]);
    }

    let matcher = match pattern {
        // An unparsable pattern cannot match anything.
        Some(p) => match Pattern::new(p) {
            Ok(compiled) => Some(compiled),
            Err(_) => return Ok(Vec::new()),
        },
        None => None,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(&real)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(matcher) = &matcher {
            if !matcher.matches_with(&name, GLOB_OPTIONS) {
                continue;
            }
        }
        match entry_from_metadata(&entry.path(), name) {
            Ok(item) => entries.push(item),
            // raced with a delete
            Err(StorageError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("Listing of {} has {} entries", resolved.virtual_path(), entries.len());
    Ok(entries)
}

fn describe(resolved: &ResolvedPath, name: String) -> Result<DirEntry, StorageError> {
    entry_from_metadata(resolved.real_path(), name)
}

fn entry_from_metadata(path: &Path, name: String) -> Result<DirEntry, StorageError> {
    let metadata = fs::symlink_metadata(path)?;
    let file_type = metadata.file_type();
    let (kind, link_target) = if file_type.is_symlink() {
        let target = fs::read_link(path)?.to_string_lossy().into_owned();
        (EntryKind::Symlink, Some(target))
    } else if file_type.is_dir() {
        (EntryKind::Directory, None)
    } else {
        (EntryKind::File, None)
    };

    let (mode, nlink, uid, gid) = unix_fields(&metadata, kind);
    Ok(DirEntry {
        name,
        kind,
        size: metadata.len(),
        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        mode,
        nlink,
        uid,
        gid,
        link_target,
    })
}

#[cfg(unix)]
fn unix_fields(metadata: &Metadata, _kind: EntryKind) -> (u32, u64, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.mode(), metadata.nlink(), metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
fn unix_fields(metadata: &Metadata, kind: EntryKind) -> (u32, u64, u32, u32) {
    let mode = match kind {
        EntryKind::Directory => 0o755,
        EntryKind::Symlink => 0o777,
        EntryKind::File if metadata.permissions().readonly() => 0o444,
        EntryKind::File => 0o644,
    };
    (mode, 1, 0, 0)
}

fn permission_string(kind: EntryKind, mode: u32) -> String {
    let mut out = String::with_capacity(10);
    out.push(match kind {
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::File => '-',
    });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn format_date(modified: SystemTime, now: DateTime<Utc>) -> String {
    let modified = DateTime::<Utc>::from(modified);
    let six_months = ChronoDuration::days(182);
    if modified > now - six_months && modified <= now + ChronoDuration::hours(1) {
        modified.format("%b %d %H:%M").to_string()
    } else {
        modified.format("%b %d  %Y").to_string()
    }
}

/// Formats one entry as an `ls -l` line, without line terminator.
pub fn format_long(entry: &DirEntry, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "{} {:>4} {:<8} {:<8} {:>12} {} {}",
        permission_string(entry.kind, entry.mode),
        entry.nlink,
        entry.uid,
        entry.gid,
        entry.size,
        format_date(entry.modified, now),
        entry.name
    );
    if let Some(target) = &entry.link_target {
        line.push_str(" -> ");
        line.push_str(target);
    }
    line
}

/// Renders entries one per line.
pub fn format_lines(entries: &[DirEntry], format: ListingFormat) -> Vec<String> {
    let now = Utc::now();
    entries
        .iter()
        .map(|entry| match format {
            ListingFormat::Long => format_long(entry, now),
            ListingFormat::NameOnly => entry.name.clone(),
        })
        .collect()
}

/// Renders entries as CRLF-terminated bytes for the data connection.
pub fn render_listing(entries: &[DirEntry], format: ListingFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 64);
    for line in format_lines(entries, format) {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn populated() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir(root.join("docs")).unwrap();
        fs::write(root.join("docs/a.txt"), b"aaa").unwrap();
        fs::write(root.join("docs/b.txt"), b"b").unwrap();
        fs::write(root.join("docs/c.bin"), b"cc").unwrap();
        (dir, root)
    }

    fn names(entries: &[DirEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn lists_directory_sorted() {
        let (_dir, root) = populated();
        let entries = collect_entries(&root, "/", "/docs", None).unwrap();
        assert_eq!(names(&entries), ["a.txt", "b.txt", "c.bin"]);
        let entries = collect_entries(&root, "/", "/", Some("-la docs")).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn glob_filters_last_segment() {
        let (_dir, root) = populated();
        let entries = collect_entries(&root, "/", "/", Some("docs/*.txt")).unwrap();
        assert_eq!(names(&entries), ["a.txt", "b.txt"]);
        let entries = collect_entries(&root, "/", "/docs", Some("?.bin")).unwrap();
        assert_eq!(names(&entries), ["c.bin"]);
    }

    #[test]
    fn no_match_and_missing_paths_are_empty() {
        let (_dir, root) = populated();
        assert!(collect_entries(&root, "/", "/", Some("docs/*.xyz")).unwrap().is_empty());
        assert!(collect_entries(&root, "/", "/", Some("nowhere")).unwrap().is_empty());
    }

    #[test]
    fn single_file_keeps_given_name() {
        let (_dir, root) = populated();
        let entries = collect_entries(&root, "/", "/", Some("docs/a.txt")).unwrap();
        assert_eq!(names(&entries), ["docs/a.txt"]);
        assert_eq!(entries[0].size, 3);
        assert_eq!(entries[0].kind, EntryKind::File);
    }

    #[test]
    fn long_format_looks_like_ls() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let recent = Utc.with_ymd_and_hms(2024, 5, 20, 13, 45, 0).unwrap();
        let old = Utc.with_ymd_and_hms(2019, 1, 2, 0, 0, 0).unwrap();

        let mut entry = DirEntry {
            name: "report.txt".into(),
            kind: EntryKind::File,
            size: 1234,
            modified: recent.into(),
            mode: 0o100644,
            nlink: 1,
            uid: 1000,
            gid: 1000,
            link_target: None,
        };
        assert_eq!(
            format_long(&entry, now),
            "-rw-r--r--    1 1000     1000             1234 May 20 13:45 report.txt"
        );

        entry.kind = EntryKind::Symlink;
        entry.mode = 0o777;
        entry.modified = old.into();
        entry.link_target = Some("target".into());
        assert_eq!(
            format_long(&entry, now),
            "lrwxrwxrwx    1 1000     1000             1234 Jan 02  2019 report.txt -> target"
        );
    }

    #[test]
    fn name_only_rendering_is_crlf_terminated() {
        let (_dir, root) = populated();
        let entries = collect_entries(&root, "/", "/docs", Some("*.txt")).unwrap();
        assert_eq!(
            render_listing(&entries, ListingFormat::NameOnly),
            b"a.txt\r\nb.txt\r\n"
        );
    }

    #[test]
    fn options_are_stripped() {
        assert_eq!(strip_options("-la"), "");
        assert_eq!(strip_options("-l -a dir"), "dir");
        assert_eq!(strip_options("dir"), "dir");
    }
}
