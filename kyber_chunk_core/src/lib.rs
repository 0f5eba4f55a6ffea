//! Variable-length public-key encryption over a bounded lattice primitive.
//!
//! A Module-LWE scheme encrypts at most [`MAX_CHUNK_SIZE`] bytes per call.
//! [`ChunkCodec`] splits longer plaintexts into blocks, encrypts each block
//! with fresh coins on a small worker pool and reassembles the plaintext in
//! order on decryption. The default framing length-prefixes every block and
//! binds its index; the zero-stripping framing is kept for compatibility with
//! existing streams.
//!
//! The lattice backend favors clarity over speed (schoolbook multiplication,
//! no NTT) and has not been audited. Chunks carry no authentication.

pub mod codec;
pub mod crypto;
pub mod pke;
pub mod pool;
pub mod preset;
pub mod ring;
pub mod rng;
pub mod session;
pub mod stream;
pub mod versioning;

pub use crate::codec::{
    ChunkCodec, ChunkError, CodecConfig, FRAME_HEADER_BYTES, Framing, decode, decode_framed,
    encode, encode_framed,
};
pub use crate::crypto::{KeyPair, LatticePke, PublicKey, SecretKey, keygen, keygen_with_rng};
pub use crate::pke::{BoundedPke, Ciphertext, PkeError};
pub use crate::pool::{effective_workers, map_ordered};
pub use crate::preset::{
    COIN_BYTES, MAX_CHUNK_SIZE, SecurityLevel, SecurityPreset, security_preset,
};
pub use crate::ring::{KYBER_RING, RingElement, RingParams};
pub use crate::rng::{
    EntropySource, OsEntropy, SecureRng, SeededEntropy, derive_session_rng, random_bytes,
    secure_rng,
};
pub use crate::session::{ChunkSession, SessionError};
pub use crate::stream::{CiphertextStore, EncryptedStream, FileStore, MemoryStore, StoreError};
pub use crate::versioning::*;
