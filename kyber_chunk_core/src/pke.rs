//! The bounded-message public-key primitive the chunk codec is built on.

use std::fmt;

use rand_core::{CryptoRng, RngCore};
use thiserror::Error;

use crate::preset::SecurityLevel;

#[derive(Debug, Error)]
pub enum PkeError {
    #[error("plaintext block of {len} bytes exceeds the {max}-byte limit")]
    MessageTooLong { len: usize, max: usize },

    #[error("expected {expected} bytes of coins, found {found}")]
    InvalidCoinLength { expected: usize, found: usize },

    #[error("ciphertext length mismatch: expected {expected}, found {found}")]
    CiphertextLength { expected: usize, found: usize },

    #[error("ciphertext encodes a coefficient outside the ring")]
    CiphertextEncoding,

    #[error("key for {key} used with a {primitive} primitive")]
    LevelMismatch {
        key: SecurityLevel,
        primitive: SecurityLevel,
    },

    #[error("secret key does not match the public key")]
    KeyMismatch,

    #[error("malformed {kind} key: {reason}")]
    MalformedKey {
        kind: &'static str,
        reason: String,
    },
}

/// Opaque output of one encryption call.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Ciphertext {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Ciphertext {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.0[..self.0.len().min(8)];
        write!(f, "Ciphertext({} bytes, {}..)", self.0.len(), hex::encode(prefix))
    }
}

/// A public-key scheme that encrypts at most `max_message_bytes` per call.
///
/// `decrypt` always returns a block of exactly `max_message_bytes`, with the
/// encrypted bytes followed by the zero padding the primitive added. A wrong
/// key is not required to produce an error.
pub trait BoundedPke: Send + Sync {
    type PublicKey: Send + Sync;
    type SecretKey: Send + Sync;

    fn level(&self) -> SecurityLevel;

    fn max_message_bytes(&self) -> usize;

    fn coin_bytes(&self) -> usize;

    fn ciphertext_bytes(&self) -> usize;

    fn generate_keypair<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
    ) -> (Self::SecretKey, Self::PublicKey);

    fn encrypt(
        &self,
        block: &[u8],
        public_key: &Self::PublicKey,
        coins: &[u8],
    ) -> Result<Ciphertext, PkeError>;

    fn decrypt(
        &self,
        ciphertext: &Ciphertext,
        secret_key: &Self::SecretKey,
    ) -> Result<Vec<u8>, PkeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_truncated() {
        let ct = Ciphertext::from_bytes(vec![0xAB; 1152]);
        assert_eq!(format!("{ct:?}"), "Ciphertext(1152 bytes, abababababababab..)");
    }
}
