//! Authentication system
//!
//! Handles user accounts and credential validation.

pub mod credentials;
pub mod validator;

pub use credentials::UserAccount;
pub use validator::{validate_password, validate_user};
