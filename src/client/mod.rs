//! Client management system
//!
//! Handles client connections, per-session state and the connection limit.

pub mod handler;
pub mod registry;
pub mod state;

pub use handler::handle_client;
pub use registry::{ClientGuard, ClientRegistry};
pub use state::Session;
