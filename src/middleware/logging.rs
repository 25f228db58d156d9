//! Logging middleware
//!
//! Provides connection and command logging. Passwords never reach the log.

use log::{debug, info};
use std::net::SocketAddr;

use crate::protocol::{Command, Reply};

/// Log a client connection
pub fn log_connection(client_addr: SocketAddr) {
    info!("Client connected: {client_addr}");
}

pub fn log_disconnection(client_addr: SocketAddr) {
    info!("Client disconnected: {client_addr}");
}

/// Log a client command, masking the PASS argument
pub fn log_command(client_addr: SocketAddr, command: &Command) {
    debug!("{client_addr} -> {}", describe_command(command));
}

pub fn log_reply(client_addr: SocketAddr, reply: &Reply) {
    debug!("{client_addr} <- {} {}", reply.code(), reply.text());
}

fn describe_command(command: &Command) -> String {
    match command {
        Command::PASS(_) => "PASS ****".to_string(),
        other => format!("{other:?}"),
    }
}
