//! Server core functionality
//!
//! Binds the control listener and hands each accepted connection to its
//! own session task.

pub mod core;

pub use core::Server;
