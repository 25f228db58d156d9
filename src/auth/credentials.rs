//! Credential storage
//!
//! Accounts come from the server configuration; there is no built-in user.

use serde::Deserialize;

/// A configured login.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UserAccount {
    pub username: String,
    pub password: String,
}

impl UserAccount {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Finds the account for `username`, if one is configured.
pub(crate) fn lookup<'a>(users: &'a [UserAccount], username: &str) -> Option<&'a UserAccount> {
    users.iter().find(|account| account.username == username)
}
