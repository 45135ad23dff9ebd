//! # Password Hashing
//!
//! `PasswordHasher` is a trait, not a concrete argon2 wrapper - the spec
//! calls the hashing primitive an external collaborator, so the library
//! ships a default implementation rather than hard-wiring one.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};

use crate::error::IdentityError;

/// Hashes and verifies passwords. Implementations MUST be safe to share
/// across threads and MUST perform verification in constant time with
/// respect to the candidate password.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, IdentityError>;
    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool, IdentityError>;
}

/// Argon2id with OWASP-recommended parameters: 64 MiB memory, 3 iterations,
/// 4 parallel lanes.
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
}

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        let params = Params::new(64 * 1024, 3, 4, None).expect("valid argon2 params");
        Self {
            argon2: Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params),
        }
    }
}

impl Default for Argon2PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, plaintext: &str) -> Result<String, IdentityError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| IdentityError::Unknown(format!("password hashing failed: {e}")))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool, IdentityError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| IdentityError::Unknown(format!("invalid password hash: {e}")))?;
        Ok(self
            .argon2
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrips() {
        let hasher = Argon2PasswordHasher::new();
        let hash = hasher.hash("correct horse battery staple").unwrap();
        assert!(hasher.verify("correct horse battery staple", &hash).unwrap());
        assert!(!hasher.verify("wrong password", &hash).unwrap());
    }

    #[test]
    fn same_password_hashes_differently_each_time() {
        let hasher = Argon2PasswordHasher::new();
        let a = hasher.hash("same-password").unwrap();
        let b = hasher.hash("same-password").unwrap();
        assert_ne!(a, b, "salts must differ per hash call");
    }
}
