//! Transfer result types
//!
//! Defines result structures returned by transfer operations.

use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;

/// Result of setting up passive mode
#[derive(Debug)]
pub struct PassiveModeResult {
    pub data_socket: SocketAddr,
    pub listener: TcpListener,
}

/// Result of validating a PORT/EPRT target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveModeResult {
    pub data_socket: SocketAddr,
}

/// Address family of a connection, as numbered by EPRT/EPSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(ip: IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn from_protocol(number: &str) -> Option<Self> {
        match number {
            "1" => Some(AddressFamily::V4),
            "2" => Some(AddressFamily::V6),
            _ => None,
        }
    }

    pub fn protocol_number(self) -> u8 {
        match self {
            AddressFamily::V4 => 1,
            AddressFamily::V6 => 2,
        }
    }
}

/// Parsed EPSV argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpsvRequest {
    /// No argument: use the control connection's family.
    Default,
    Family(AddressFamily),
    /// `EPSV ALL`: refuse PORT/PASV/EPRT for the rest of the session.
    All,
}

/// How a data transfer ended.
#[derive(Debug)]
pub enum TransferOutcome {
    Completed { bytes: u64 },
    Aborted { bytes: u64 },
    Failed(crate::error::TransferError),
}
