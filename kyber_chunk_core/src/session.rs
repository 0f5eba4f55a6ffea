use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use crate::codec::{ChunkCodec, ChunkError, CodecConfig};
use crate::crypto::{KeyPair, LatticePke, PublicKey, SecretKey, keygen};
use crate::pke::BoundedPke;
use crate::preset::SecurityLevel;
use crate::rng::EntropySource;
use crate::stream::{CiphertextStore, EncryptedStream, FileStore, StoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Codec(#[from] ChunkError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Stable high-level entry point: one security level, one codec
/// configuration, lattice backend.
pub struct ChunkSession {
    codec: ChunkCodec<LatticePke>,
}

impl ChunkSession {
    pub fn new(level: SecurityLevel, config: CodecConfig) -> Result<Self, SessionError> {
        let codec = ChunkCodec::new(LatticePke::new(level), config)?;
        Ok(Self { codec })
    }

    pub fn with_entropy(mut self, entropy: impl EntropySource + 'static) -> Self {
        self.codec = self.codec.with_entropy(entropy);
        self
    }

    pub fn level(&self) -> SecurityLevel {
        self.codec.pke().level()
    }

    pub fn codec(&self) -> &ChunkCodec<LatticePke> {
        &self.codec
    }

    /// Fixed byte length of every ciphertext this session produces.
    pub fn ciphertext_bytes(&self) -> usize {
        self.codec.pke().ciphertext_bytes()
    }

    pub fn generate_keypair(&self) -> KeyPair {
        keygen(self.level())
    }

    pub fn encrypt_bytes(
        &self,
        public_key: &PublicKey,
        data: &[u8],
    ) -> Result<EncryptedStream, SessionError> {
        Ok(self.codec.encode(public_key, data)?)
    }

    pub fn decrypt_bytes(
        &self,
        secret_key: &SecretKey,
        stream: &EncryptedStream,
    ) -> Result<Vec<u8>, SessionError> {
        Ok(self.codec.decode(secret_key, stream.as_slice())?)
    }

    /// Encrypts `data` and hands the stream to `store`. Returns the chunk count.
    pub fn encrypt_to(
        &self,
        public_key: &PublicKey,
        data: &[u8],
        store: &dyn CiphertextStore,
    ) -> Result<usize, SessionError> {
        let stream = self.encrypt_bytes(public_key, data)?;
        store.store(&stream)?;
        Ok(stream.len())
    }

    pub fn decrypt_from(
        &self,
        secret_key: &SecretKey,
        store: &dyn CiphertextStore,
    ) -> Result<Vec<u8>, SessionError> {
        let stream = store.load()?;
        self.decrypt_bytes(secret_key, &stream)
    }

    /// A file store sized for this session's ciphertexts.
    pub fn file_store(&self, path: impl AsRef<Path>) -> FileStore {
        FileStore::new(path, self.ciphertext_bytes())
    }

    /// Encrypts the file at `input` into raw concatenated ciphertexts at `output`.
    pub fn encrypt_file(
        &self,
        public_key: &PublicKey,
        input: &Path,
        output: &Path,
    ) -> Result<usize, SessionError> {
        let data = fs::read(input).map_err(|source| SessionError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let chunks = self.encrypt_to(public_key, &data, &self.file_store(output))?;
        info!(
            "encrypted {} ({} bytes) into {chunks} chunks at {}",
            input.display(),
            data.len(),
            output.display()
        );
        Ok(chunks)
    }

    /// Decrypts a file written by `encrypt_file`.
    pub fn decrypt_file(
        &self,
        secret_key: &SecretKey,
        input: &Path,
        output: &Path,
    ) -> Result<usize, SessionError> {
        let plaintext = self.decrypt_from(secret_key, &self.file_store(input))?;
        fs::write(output, &plaintext).map_err(|source| SessionError::Io {
            path: output.to_path_buf(),
            source,
        })?;
        Ok(plaintext.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Framing;
    use crate::stream::MemoryStore;
    use tempfile::tempdir;

    #[test]
    fn session_encrypt_decrypt_bytes() {
        let session = ChunkSession::new(SecurityLevel::Kyber512, CodecConfig::default()).unwrap();
        let pair = session.generate_keypair();
        let stream = session.encrypt_bytes(&pair.public, b"hello\0\0").unwrap();
        assert_eq!(session.decrypt_bytes(&pair.secret, &stream).unwrap(), b"hello\0\0");
    }

    #[test]
    fn session_memory_store_roundtrip() {
        let session = ChunkSession::new(
            SecurityLevel::Kyber768,
            CodecConfig::strip_zeros(32).with_workers(2),
        )
        .unwrap();
        let pair = session.generate_keypair();
        let store = MemoryStore::new();
        let message = vec![0x5Au8; 100];
        assert_eq!(session.encrypt_to(&pair.public, &message, &store).unwrap(), 4);
        assert_eq!(session.decrypt_from(&pair.secret, &store).unwrap(), message);
    }

    #[test]
    fn session_encrypt_decrypt_file() {
        let session = ChunkSession::new(SecurityLevel::Kyber512, CodecConfig::default()).unwrap();
        let pair = session.generate_keypair();
        let dir = tempdir().unwrap();
        let input = dir.path().join("plain.txt");
        let cipher = dir.path().join("encrypted_message.bin");
        let output = dir.path().join("decrypted_message.txt");
        fs::write(&input, b"file-data spanning more than one chunk of plaintext").unwrap();

        let chunks = session.encrypt_file(&pair.public, &input, &cipher).unwrap();
        assert_eq!(
            fs::metadata(&cipher).unwrap().len() as usize,
            chunks * session.ciphertext_bytes()
        );
        session.decrypt_file(&pair.secret, &cipher, &output).unwrap();
        assert_eq!(fs::read(&output).unwrap(), fs::read(&input).unwrap());
    }

    #[test]
    fn session_rejects_truncated_file() {
        let session = ChunkSession::new(SecurityLevel::Kyber512, CodecConfig::default()).unwrap();
        let pair = session.generate_keypair();
        let dir = tempdir().unwrap();
        let cipher = dir.path().join("stream.bin");
        session
            .encrypt_to(&pair.public, b"payload", &session.file_store(&cipher))
            .unwrap();
        let mut bytes = fs::read(&cipher).unwrap();
        bytes.pop();
        fs::write(&cipher, &bytes).unwrap();
        let err = session
            .decrypt_file(&pair.secret, &cipher, &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::RaggedStream { .. })));
    }

    #[test]
    fn session_invalid_config_is_reported() {
        let config = CodecConfig::default()
            .with_framing(Framing::LengthPrefixed)
            .with_chunk_size(32);
        assert!(matches!(
            ChunkSession::new(SecurityLevel::Kyber512, config),
            Err(SessionError::Codec(ChunkError::InvalidConfiguration(_)))
        ));
    }
}
