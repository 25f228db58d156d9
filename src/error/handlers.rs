//! Error handlers
//!
//! Maps the error taxonomy onto FTP reply codes and logs failures.

use log::{debug, warn};

use crate::error::types::ErrorKind;

/// Default FTP reply code for an error kind. Handlers may pick a more
/// specific code where the command contract requires it.
pub fn error_to_ftp_code(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::AuthRequired => 530,
        ErrorKind::InvalidRequest => 553,
        ErrorKind::NotFound
        | ErrorKind::NotADirectory
        | ErrorKind::IsADirectory
        | ErrorKind::PermissionDenied
        | ErrorKind::AlreadyExists
        | ErrorKind::NotEmpty => 550,
        ErrorKind::InvalidPath => 553,
        ErrorKind::BadChannelState => 425,
        ErrorKind::BadSequence => 503,
        ErrorKind::Unsupported => 502,
        ErrorKind::SyntaxError => 501,
        ErrorKind::LocalError => 451,
    }
}

/// Log a failed command. Expected client mistakes stay at debug level.
pub fn handle_error(verb: &str, kind: ErrorKind, err: &dyn std::error::Error) {
    match kind {
        ErrorKind::LocalError | ErrorKind::BadChannelState => warn!("{verb} failed: {err}"),
        _ => debug!("{verb} failed ({kind:?}): {err}"),
    }
}
