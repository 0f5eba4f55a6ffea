//! Ordered ciphertext sequences and where they are kept.
//!
//! The persisted layout is the raw concatenation of every ciphertext in
//! order. There is no delimiter or index; the fixed per-level ciphertext
//! length is what recovers the boundaries on load.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::RwLock;
use thiserror::Error;

use crate::pke::Ciphertext;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{len} bytes is not a whole number of {ciphertext_len}-byte ciphertexts")]
    RaggedStream { len: usize, ciphertext_len: usize },
}

/// Ciphertexts in chunk order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptedStream {
    ciphertexts: Vec<Ciphertext>,
}

impl EncryptedStream {
    pub fn new(ciphertexts: Vec<Ciphertext>) -> Self {
        Self { ciphertexts }
    }

    pub fn len(&self) -> usize {
        self.ciphertexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertexts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Ciphertext> {
        self.ciphertexts.iter()
    }

    pub fn as_slice(&self) -> &[Ciphertext] {
        &self.ciphertexts
    }

    pub fn into_ciphertexts(self) -> Vec<Ciphertext> {
        self.ciphertexts
    }

    /// Total serialized size in bytes.
    pub fn byte_len(&self) -> usize {
        self.ciphertexts.iter().map(Ciphertext::len).sum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        for ciphertext in &self.ciphertexts {
            out.extend_from_slice(ciphertext.as_bytes());
        }
        out
    }

    /// Splits a concatenated stream back into `ciphertext_len`-byte pieces.
    pub fn from_bytes(bytes: &[u8], ciphertext_len: usize) -> Result<Self, StoreError> {
        if ciphertext_len == 0 || bytes.len() % ciphertext_len != 0 {
            return Err(StoreError::RaggedStream {
                len: bytes.len(),
                ciphertext_len,
            });
        }
        let ciphertexts = bytes
            .chunks(ciphertext_len)
            .map(|piece| Ciphertext::from_bytes(piece.to_vec()))
            .collect();
        Ok(Self { ciphertexts })
    }
}

impl From<Vec<Ciphertext>> for EncryptedStream {
    fn from(ciphertexts: Vec<Ciphertext>) -> Self {
        Self::new(ciphertexts)
    }
}

impl<'a> IntoIterator for &'a EncryptedStream {
    type Item = &'a Ciphertext;
    type IntoIter = std::slice::Iter<'a, Ciphertext>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Somewhere an encrypted stream can be written and read back.
pub trait CiphertextStore: Send + Sync {
    fn store(&self, stream: &EncryptedStream) -> Result<(), StoreError>;

    fn load(&self) -> Result<EncryptedStream, StoreError>;
}

/// Keeps the last stored stream in memory. Loading before any store yields
/// an empty stream.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stream: RwLock<EncryptedStream>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CiphertextStore for MemoryStore {
    fn store(&self, stream: &EncryptedStream) -> Result<(), StoreError> {
        *self.stream.write() = stream.clone();
        Ok(())
    }

    fn load(&self) -> Result<EncryptedStream, StoreError> {
        Ok(self.stream.read().clone())
    }
}

/// Raw concatenated ciphertexts in a single file.
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
    ciphertext_len: usize,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>, ciphertext_len: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ciphertext_len,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CiphertextStore for FileStore {
    fn store(&self, stream: &EncryptedStream) -> Result<(), StoreError> {
        let bytes = stream.to_bytes();
        fs::write(&self.path, &bytes).map_err(|err| self.io_error(err))?;
        debug!(
            "stored {} ciphertexts ({} bytes) to {}",
            stream.len(),
            bytes.len(),
            self.path.display()
        );
        Ok(())
    }

    fn load(&self) -> Result<EncryptedStream, StoreError> {
        let bytes = fs::read(&self.path).map_err(|err| self.io_error(err))?;
        EncryptedStream::from_bytes(&bytes, self.ciphertext_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_stream() -> EncryptedStream {
        EncryptedStream::new(vec![
            Ciphertext::from_bytes(vec![1; 6]),
            Ciphertext::from_bytes(vec![0; 6]),
            Ciphertext::from_bytes(vec![0xFF; 6]),
        ])
    }

    #[test]
    fn bytes_are_plain_concatenation() {
        let stream = sample_stream();
        let bytes = stream.to_bytes();
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[6..12], &[0; 6]);
        assert_eq!(EncryptedStream::from_bytes(&bytes, 6).unwrap(), stream);
    }

    #[test]
    fn ragged_lengths_are_rejected() {
        let err = EncryptedStream::from_bytes(&[0u8; 13], 6).unwrap_err();
        assert!(matches!(
            err,
            StoreError::RaggedStream {
                len: 13,
                ciphertext_len: 6
            }
        ));
        assert!(EncryptedStream::from_bytes(&[], 0).is_err());
        assert!(EncryptedStream::from_bytes(&[], 6).unwrap().is_empty());
    }

    #[test]
    fn memory_store_keeps_last_stream() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_empty());
        store.store(&sample_stream()).unwrap();
        assert_eq!(store.load().unwrap(), sample_stream());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("stream.bin"), 6);
        store.store(&sample_stream()).unwrap();
        assert_eq!(fs::metadata(store.path()).unwrap().len(), 18);
        assert_eq!(store.load().unwrap(), sample_stream());
    }

    #[test]
    fn file_store_reports_missing_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.bin"), 6);
        assert!(matches!(store.load(), Err(StoreError::Io { .. })));
    }
}
