//! Error types
//!
//! Defines domain-specific error types for each layer of the FTP server and
//! the reply-level taxonomy (`ErrorKind`) every one of them folds into before
//! anything reaches the control channel.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Reply-level classification of a failed command.
///
/// Handlers report one of these alongside the reply they send, so callers
/// (and tests) can reason about failures without parsing reply text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthRequired,
    InvalidRequest,
    NotFound,
    NotADirectory,
    IsADirectory,
    PermissionDenied,
    AlreadyExists,
    NotEmpty,
    InvalidPath,
    BadChannelState,
    BadSequence,
    Unsupported,
    SyntaxError,
    LocalError,
}

/// Authentication module errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Please login with USER and PASS.")]
    NotLoggedIn,
    #[error("Login with USER first.")]
    NoUsername,
    #[error("Login incorrect.")]
    InvalidCredentials,
    #[error("Can't change to another user.")]
    AlreadyLoggedIn,
    #[error("Malformed input: {0}")]
    MalformedInput(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::NotLoggedIn | AuthError::InvalidCredentials | AuthError::AlreadyLoggedIn => {
                ErrorKind::AuthRequired
            }
            AuthError::NoUsername => ErrorKind::BadSequence,
            AuthError::MalformedInput(_) => ErrorKind::SyntaxError,
        }
    }
}

/// Path resolution errors raised before any filesystem access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Permission denied")]
    OutsideRoot,
    #[error("Operation not permitted on the root directory")]
    RootDirectory,
}

impl PathError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PathError::OutsideRoot => ErrorKind::PermissionDenied,
            PathError::RootDirectory => ErrorKind::InvalidPath,
        }
    }
}

/// Storage module errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No such file or directory")]
    NotFound,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    IsADirectory,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("File exists")]
    AlreadyExists,
    #[error("Directory not empty")]
    NotEmpty,
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound => ErrorKind::NotFound,
            StorageError::NotADirectory => ErrorKind::NotADirectory,
            StorageError::IsADirectory => ErrorKind::IsADirectory,
            StorageError::PermissionDenied => ErrorKind::PermissionDenied,
            StorageError::AlreadyExists => ErrorKind::AlreadyExists,
            StorageError::NotEmpty => ErrorKind::NotEmpty,
            StorageError::Path(e) => e.kind(),
            StorageError::Io(_) => ErrorKind::LocalError,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound,
            io::ErrorKind::NotADirectory => StorageError::NotADirectory,
            io::ErrorKind::IsADirectory => StorageError::IsADirectory,
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied,
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists,
            io::ErrorKind::DirectoryNotEmpty => StorageError::NotEmpty,
            _ => StorageError::Io(error),
        }
    }
}

/// Transfer module errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Use PORT or PASV first.")]
    DataChannelNotInitialized,
    #[error("Failed to bind to {0}: {1}")]
    PortBindingFailed(SocketAddr, io::Error),
    #[error("No available port for data connection")]
    NoAvailablePort,
    #[error("Failed to connect to {0}: {1}")]
    ConnectFailed(SocketAddr, io::Error),
    #[error("Timeout waiting for data connection")]
    ConnectionTimeout,
    #[error("Rejected data connection from {0}")]
    ForeignPeer(SocketAddr),
    #[error("Illegal {0} command.")]
    InvalidPortCommand(&'static str),
    #[error("IP mismatch: expected {expected}, got {provided}")]
    IpMismatch { expected: String, provided: String },
    #[error("Privileged port {0} refused")]
    PrivilegedPort(u16),
    #[error("Network protocol not supported")]
    UnsupportedProtocol,
    #[error("Network protocol does not match the control connection")]
    ProtocolMismatch,
    #[error("PORT/PASV not allowed after EPSV ALL.")]
    EpsvAllActive,
    #[error("Restart offset {offset} is beyond end of file ({size} bytes)")]
    RestartBeyondEof { offset: u64, size: u64 },
    #[error("Cannot append with a restart marker set.")]
    RestartWithAppend,
    #[error("Data connection timed out")]
    Timeout,
    #[error("Data connection failed: {0}")]
    Network(io::Error),
    #[error("Local file error: {0}")]
    LocalFile(io::Error),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidPortCommand(_) => ErrorKind::SyntaxError,
            TransferError::IpMismatch { .. } | TransferError::PrivilegedPort(_) => {
                ErrorKind::PermissionDenied
            }
            TransferError::UnsupportedProtocol | TransferError::ProtocolMismatch => {
                ErrorKind::Unsupported
            }
            TransferError::EpsvAllActive => ErrorKind::BadSequence,
            TransferError::LocalFile(_) => ErrorKind::LocalError,
            _ => ErrorKind::BadChannelState,
        }
    }
}

/// Control-line parsing errors, caught before any handler runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown command.")]
    UnknownCommand(String),
    #[error("Syntax error in parameters or arguments.")]
    MissingArgument(String),
    #[error("Invalid request")]
    InvalidEncoding(String),
    #[error("Command too long.")]
    LineTooLong,
}

impl ProtocolError {
    /// Upper-cased verb of the offending line, empty when unknown.
    pub fn verb(&self) -> &str {
        match self {
            ProtocolError::UnknownCommand(verb)
            | ProtocolError::MissingArgument(verb)
            | ProtocolError::InvalidEncoding(verb) => verb,
            ProtocolError::LineTooLong => "",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::UnknownCommand(_) => ErrorKind::Unsupported,
            ProtocolError::MissingArgument(_) | ProtocolError::LineTooLong => ErrorKind::SyntaxError,
            ProtocolError::InvalidEncoding(_) => ErrorKind::InvalidRequest,
        }
    }
}

/// General FTP server error that encompasses all error types
#[derive(Debug, Error)]
pub enum FtpServerError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified_by_kind() {
        let cases = [
            (io::ErrorKind::NotFound, ErrorKind::NotFound),
            (io::ErrorKind::NotADirectory, ErrorKind::NotADirectory),
            (io::ErrorKind::IsADirectory, ErrorKind::IsADirectory),
            (io::ErrorKind::PermissionDenied, ErrorKind::PermissionDenied),
            (io::ErrorKind::AlreadyExists, ErrorKind::AlreadyExists),
            (io::ErrorKind::DirectoryNotEmpty, ErrorKind::NotEmpty),
            (io::ErrorKind::Other, ErrorKind::LocalError),
        ];
        for (io_kind, expected) in cases {
            let err = StorageError::from(io::Error::from(io_kind));
            assert_eq!(err.kind(), expected, "{io_kind:?}");
        }
    }

    #[test]
    fn storage_messages_name_the_cause() {
        assert_eq!(StorageError::NotFound.to_string(), "No such file or directory");
        assert_eq!(
            StorageError::from(PathError::RootDirectory).kind(),
            ErrorKind::InvalidPath
        );
    }
}
