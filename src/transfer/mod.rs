//! Transfer module for FTP server
//!
//! Handles data channel management, ASCII/binary transfer types and the
//! streaming of files and listings over data connections.

pub mod data_channel;
pub mod file_ops;
pub mod modes;
pub mod operations;
pub mod results;

// Re-export key types and functions
pub use data_channel::{DataChannel, setup_data_stream};
pub use file_ops::{PreparedTransfer, TransferHandle, TransferJob, TransferSettings};
pub use modes::{AsciiDecoder, AsciiEncoder, TransferType, ascii_encoded_len};
pub use operations::{
    format_pasv_reply, parse_eprt_argument, parse_epsv_argument, parse_port_argument,
    setup_active_mode, setup_passive_mode,
};
pub use results::{ActiveModeResult, AddressFamily, EpsvRequest, PassiveModeResult, TransferOutcome};
