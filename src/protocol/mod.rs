//! FTP Protocol implementation
//!
//! Handles FTP command parsing, validation, and response generation.

pub mod commands;
pub mod data_handlers;
pub mod handlers;
pub mod responses;

pub use commands::{Command, CommandResult, CommandStatus, parse_command};
pub use data_handlers::completion_replies;
pub use handlers::{handle_command, handle_protocol_error, server_status};
pub use responses::Reply;
