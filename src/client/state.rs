//! Module `state`
//!
//! Defines the `Session` struct holding everything one control connection
//! knows about its client: authentication, working directory, transfer
//! parameters and the pending restart/rename markers.

use std::net::SocketAddr;

use crate::storage::ResolvedPath;
use crate::transfer::{AddressFamily, DataChannel, TransferType};

/// Per-connection FTP session state.
#[derive(Debug)]
pub struct Session {
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    pending_user: Option<String>,
    username: Option<String>,
    current_virtual_path: String,
    transfer_type: TransferType,
    restart_offset: u64,
    rename_from: Option<ResolvedPath>,
    data_channel: Option<DataChannel>,
    epsv_all: bool,
}

impl Session {
    /// Creates a session for a freshly accepted control connection,
    /// starting in the configured home directory.
    pub fn new(peer_addr: SocketAddr, local_addr: SocketAddr, home: &str) -> Self {
        Self {
            peer_addr,
            local_addr,
            pending_user: None,
            username: None,
            current_virtual_path: home.to_string(),
            transfer_type: TransferType::default(),
            restart_offset: 0,
            rename_from: None,
            data_channel: None,
            epsv_all: false,
        }
    }

    // --------------------
    // Connection
    // --------------------

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address family of the control connection, fixed at connect time.
    pub fn address_family(&self) -> AddressFamily {
        AddressFamily::of(self.local_addr.ip())
    }

    // --------------------
    // Authentication
    // --------------------

    pub fn is_logged_in(&self) -> bool {
        self.username.is_some()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn pending_user(&self) -> Option<&str> {
        self.pending_user.as_deref()
    }

    /// Records the USER argument until PASS arrives.
    pub fn set_pending_user(&mut self, username: String) {
        self.pending_user = Some(username);
    }

    /// Completes login for the pending user.
    pub fn login(&mut self) {
        self.username = self.pending_user.take();
    }

    pub fn clear_pending_user(&mut self) {
        self.pending_user = None;
    }

    // --------------------
    // Navigation
    // --------------------

    /// Current virtual directory; always absolute.
    pub fn current_virtual_path(&self) -> &str {
        &self.current_virtual_path
    }

    pub fn set_current_virtual_path(&mut self, path: String) {
        self.current_virtual_path = path;
    }

    // --------------------
    // Transfer parameters
    // --------------------

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn set_transfer_type(&mut self, transfer_type: TransferType) {
        self.transfer_type = transfer_type;
    }

    pub fn restart_offset(&self) -> u64 {
        self.restart_offset
    }

    pub fn set_restart_offset(&mut self, offset: u64) {
        self.restart_offset = offset;
    }

    /// Consumes the restart marker; the next transfer starts from scratch.
    pub fn take_restart_offset(&mut self) -> u64 {
        std::mem::take(&mut self.restart_offset)
    }

    /// Stores the source of a pending rename.
    pub fn set_rename_from(&mut self, path: ResolvedPath) {
        self.rename_from = Some(path);
    }

    /// Removes the rename source. Called before every command so that
    /// RNTO only pairs with an immediately preceding RNFR.
    pub fn take_rename_from(&mut self) -> Option<ResolvedPath> {
        self.rename_from.take()
    }

    // --------------------
    // Data channel
    // --------------------

    /// Arms a data channel, replacing (and closing) any unused one.
    pub fn set_data_channel(&mut self, channel: DataChannel) {
        self.data_channel = Some(channel);
    }

    pub fn take_data_channel(&mut self) -> Option<DataChannel> {
        self.data_channel.take()
    }

    pub fn has_data_channel(&self) -> bool {
        self.data_channel.is_some()
    }

    pub fn data_channel_is_passive(&self) -> bool {
        self.data_channel
            .as_ref()
            .is_some_and(DataChannel::is_passive)
    }

    pub fn is_epsv_all(&self) -> bool {
        self.epsv_all
    }

    /// After `EPSV ALL` only EPSV may set up data connections.
    pub fn set_epsv_all(&mut self) {
        self.epsv_all = true;
    }
}
