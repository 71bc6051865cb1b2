//! Argon2id password hashing shared by admin accounts and the employee portal.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    Hash(String),

    #[error("Failed to verify password: {0}")]
    Verify(String),

    #[error("Stored password hash is not a valid PHC string")]
    InvalidHash,

    #[error("Password rejected: {}", .0.join("; "))]
    TooWeak(Vec<&'static str>),
}

/// Hashes `password` into a PHC string with a fresh salt.
///
/// ```
/// let hash = fd_core::hash_password("Portal2024").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Checks `password` against a stored PHC hash.
///
/// A mismatch is `Ok(false)`; only a malformed hash or an internal argon2
/// failure is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHash)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Verify(e.to_string())),
    }
}

/// Returns the list of rules `password` breaks. Empty means acceptable.
pub fn validate_password_strength(password: &str) -> Vec<&'static str> {
    let mut problems = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LEN {
        problems.push("must be at least 8 characters long");
    }
    if !password.chars().any(char::is_lowercase) {
        problems.push("must contain a lowercase letter");
    }
    if !password.chars().any(char::is_uppercase) {
        problems.push("must contain an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        problems.push("must contain a digit");
    }

    problems
}

/// Validates then hashes. Used by every path that sets a new password.
pub fn hash_new_password(password: &str) -> Result<String, PasswordError> {
    let problems = validate_password_strength(password);
    if !problems.is_empty() {
        return Err(PasswordError::TooWeak(problems));
    }
    hash_password(password)
}

/// Generates a random password that satisfies [`validate_password_strength`].
pub fn generate_password(len: usize) -> String {
    let len = len.max(MIN_PASSWORD_LEN);
    let mut rng = rand::thread_rng();
    loop {
        let candidate: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        if validate_password_strength(&candidate).is_empty() {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("Helpdesk42").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Helpdesk42", &hash).unwrap());
        assert!(!verify_password("helpdesk42", &hash).unwrap());
    }

    #[test]
    fn test_salted_hashes_differ() {
        let a = hash_password("Helpdesk42").unwrap();
        let b = hash_password("Helpdesk42").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash() {
        assert!(matches!(
            verify_password("x", "plaintext"),
            Err(PasswordError::InvalidHash)
        ));
    }

    #[test]
    fn test_strength_rules() {
        assert!(validate_password_strength("Helpdesk42").is_empty());
        assert_eq!(validate_password_strength("Hd4").len(), 1);
        assert!(validate_password_strength("alllowercase1")
            .contains(&"must contain an uppercase letter"));
        assert!(validate_password_strength("NoDigitsAtAll").contains(&"must contain a digit"));
    }

    #[test]
    fn test_hash_new_password_rejects_weak() {
        let err = hash_new_password("short").unwrap_err();
        assert!(matches!(err, PasswordError::TooWeak(ref p) if p.len() >= 2));
        assert!(err.to_string().contains("at least 8"));
    }

    #[test]
    fn test_generated_password_is_strong() {
        for _ in 0..20 {
            let pw = generate_password(16);
            assert_eq!(pw.len(), 16);
            assert!(validate_password_strength(&pw).is_empty());
        }
        assert_eq!(generate_password(2).len(), MIN_PASSWORD_LEN);
    }
}
