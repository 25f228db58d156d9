//! Module `data_channel`
//!
//! Holds the data channel a session has armed with PORT/EPRT or PASV/EPSV and
//! turns it into a connected stream when a transfer command needs one.

use log::{debug, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::error::TransferError;

/// A data channel armed for the next transfer.
#[derive(Debug)]
pub enum DataChannel {
    /// Server connects out to the client (PORT/EPRT).
    Active { target: SocketAddr },
    /// Server waits for the client on a listening socket (PASV/EPSV).
    Passive { listener: TcpListener },
}

impl DataChannel {
    pub fn is_passive(&self) -> bool {
        matches!(self, DataChannel::Passive { .. })
    }
}

/// Establishes the data connection for an armed channel.
///
/// * Active mode connects to the client-specified address.
/// * Passive mode accepts one connection, which must come from the control
///   peer's address unless `allow_foreign` is set.
///
/// Both directions give up after `limit`.
pub async fn setup_data_stream(
    channel: DataChannel,
    control_peer: IpAddr,
    allow_foreign: bool,
    limit: Duration,
) -> Result<TcpStream, TransferError> {
    match channel {
        DataChannel::Active { target } => {
            info!("Active mode: connecting to client data socket {target}");
            match timeout(limit, TcpStream::connect(target)).await {
                Ok(Ok(stream)) => {
                    debug!("Connected to {target} in active mode");
                    Ok(stream)
                }
                Ok(Err(e)) => Err(TransferError::ConnectFailed(target, e)),
                Err(_) => Err(TransferError::ConnectionTimeout),
            }
        }
        DataChannel::Passive { listener } => {
            let (stream, peer) = match timeout(limit, listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => return Err(TransferError::Network(e)),
                Err(_) => return Err(TransferError::ConnectionTimeout),
            };

            if !allow_foreign && peer.ip().to_canonical() != control_peer.to_canonical() {
                warn!("Rejected data connection from {peer}; control peer is {control_peer}");
                return Err(TransferError::ForeignPeer(peer));
            }

            debug!("Passive data connection accepted from {peer}");
            Ok(stream)
        }
    }
}
