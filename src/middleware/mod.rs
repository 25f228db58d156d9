//! Server middleware
//!
//! Provides connection and command logging.

pub mod logging;

pub use logging::{log_command, log_connection, log_disconnection, log_reply};
