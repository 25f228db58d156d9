//! Authentication validator
//!
//! Implements FTP user authentication logic, including username and password validation.

use super::credentials::{UserAccount, lookup};
use crate::error::AuthError;

const MAX_CREDENTIAL_LENGTH: usize = 256;

/// Performs basic input sanitation to check for malicious or malformed usernames/passwords.
fn is_valid_input(input: &str, allow_empty: bool) -> bool {
    (allow_empty || !input.trim().is_empty())
        && input.len() <= MAX_CREDENTIAL_LENGTH
        && !input.contains(['\r', '\n', '\0'])
}

/// Checks that a USER argument is well formed.
///
/// Whether the account exists is only revealed after PASS.
pub fn validate_user(username: &str) -> Result<(), AuthError> {
    if !is_valid_input(username, false) {
        return Err(AuthError::MalformedInput("Invalid username format".into()));
    }
    Ok(())
}

/// Validates that the provided password matches the stored password for the username.
pub fn validate_password(
    users: &[UserAccount],
    username: &str,
    password: &str,
) -> Result<(), AuthError> {
    if !is_valid_input(password, true) {
        return Err(AuthError::MalformedInput("Invalid password format".into()));
    }

    match lookup(users, username) {
        Some(account) if account.password == password => Ok(()),
        _ => Err(AuthError::InvalidCredentials),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Vec<UserAccount> {
        vec![UserAccount::new("alice", "alice123")]
    }

    #[test]
    fn accepts_matching_password() {
        assert!(validate_password(&users(), "alice", "alice123").is_ok());
    }

    #[test]
    fn unknown_user_and_wrong_password_look_the_same() {
        let unknown = validate_password(&users(), "mallory", "alice123").unwrap_err();
        let wrong = validate_password(&users(), "alice", "nope").unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[test]
    fn rejects_blank_username() {
        assert!(validate_user("   ").is_err());
        assert!(validate_user("alice").is_ok());
    }
}
