//! Password hashing.
//!
//! Each user carries its own salt (stored beside the hash) so a salt can be
//! rotated together with the password on reset.

use thiserror::Error;
use uuid::Uuid;

use storedesk_core::DomainError;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("invalid salt: {0}")]
    InvalidSalt(String),

    #[error("hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

impl From<PasswordError> for DomainError {
    fn from(err: PasswordError) -> Self {
        DomainError::storage(err.to_string())
    }
}

pub trait PasswordHasher: Send + Sync {
    /// Fresh random salt in its stored representation.
    fn generate_salt(&self) -> String;

    fn hash(&self, plain: &str, salt: &str) -> Result<String, PasswordError>;

    fn verify(&self, plain: &str, hash: &str) -> Result<bool, PasswordError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn generate_salt(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn hash(&self, plain: &str, salt: &str) -> Result<String, PasswordError> {
        let raw = Uuid::parse_str(salt)
            .map_err(|e| PasswordError::InvalidSalt(e.to_string()))?
            .into_bytes();
        Ok(bcrypt::hash_with_salt(plain, self.cost, raw)?.to_string())
    }

    fn verify(&self, plain: &str, hash: &str) -> Result<bool, PasswordError> {
        Ok(bcrypt::verify(plain, hash)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hasher = BcryptHasher::new(4);
        let salt = hasher.generate_salt();
        let hash = hasher.hash("s3cret", &salt).unwrap();
        assert!(hasher.verify("s3cret", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn same_salt_gives_same_hash() {
        let hasher = BcryptHasher::new(4);
        let salt = hasher.generate_salt();
        assert_eq!(hasher.hash("pw", &salt).unwrap(), hasher.hash("pw", &salt).unwrap());
        assert_ne!(
            hasher.hash("pw", &salt).unwrap(),
            hasher.hash("pw", &hasher.generate_salt()).unwrap()
        );
    }

    #[test]
    fn malformed_salt_is_rejected() {
        let err = BcryptHasher::new(4).hash("pw", "not-a-salt").unwrap_err();
        assert!(matches!(err, PasswordError::InvalidSalt(_)));
    }
}
