//! Key generation
//!
//! Keys are random, URL-safe and short. Uniqueness is not promised here, the directory rejects
//! duplicates when saving

use rand_core::OsRng;
use rand_core::TryRngCore;
use thiserror::Error;

/// Characters a key is made of, 64 of them so every random byte maps without bias
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Key generation errors
#[derive(Debug, Error)]
pub enum Error {
    /// The entropy source could not deliver
    #[error("Entropy source failure: {0}")]
    Entropy(String),
}

/// Produces candidate keys
pub trait KeyGenerator: Send + Sync + 'static {
    /// Generate a key of exactly `length` characters
    ///
    /// # Errors
    ///
    /// Only when no randomness is available, this is not retried
    fn generate(&self, length: usize) -> Result<String, Error>;
}

/// Key generator backed by the operating system's random source
#[derive(Clone, Copy, Debug, Default)]
pub struct UrlSafeKeyGenerator;

impl KeyGenerator for UrlSafeKeyGenerator {
    fn generate(&self, length: usize) -> Result<String, Error> {
        let mut bytes = vec![0_u8; length];

        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| Error::Entropy(err.to_string()))?;

        Ok(bytes
            .iter()
            .map(|byte| char::from(ALPHABET[usize::from(byte & 0x3f)]))
            .collect())
    }
}
