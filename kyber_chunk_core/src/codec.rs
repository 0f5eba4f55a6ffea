//! Chunking and reassembly over a [`BoundedPke`].
//!
//! Two framings are supported:
//!
//! * [`Framing::StripZeros`] slices the plaintext into `chunk_size` windows,
//!   encrypts each window as is and, on decode, strips every trailing zero
//!   byte of each recovered block. Chunks that genuinely end in `0x00` lose
//!   those bytes.
//! * [`Framing::LengthPrefixed`] prepends a five byte header to every window:
//!
//!   ```text
//!   byte 0     bit 7 final chunk, bit 6 reserved (0), bits 0..=5 data length
//!   bytes 1..5 chunk index, u32 big-endian
//!   ```
//!
//!   The decoder truncates by the length field and rejects reordered,
//!   dropped, duplicated or truncated streams. Empty input still produces a
//!   single final frame.
//!
//! A stream does not record its framing. The decoder must be configured with
//! the framing the encoder used. Reading a framed stream with strip-zeros
//! returns the header bytes as plaintext instead of failing.
//!
//! Coins are drawn serially in chunk order; the primitive calls then run on
//! the worker pool.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{LatticePke, PublicKey, SecretKey};
use crate::pke::{BoundedPke, Ciphertext, PkeError};
use crate::pool::{effective_workers, map_ordered};
use crate::preset::SecurityLevel;
use crate::rng::{EntropySource, OsEntropy};
use crate::stream::EncryptedStream;

pub const FRAME_HEADER_BYTES: usize = 5;
const FINAL_FLAG: u8 = 0x80;
const RESERVED_FLAG: u8 = 0x40;
const LENGTH_MASK: u8 = 0x3F;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Primitive(#[from] PkeError),

    #[error("entropy source failed: {0}")]
    Entropy(#[from] rand_core::Error),

    #[error("malformed frame at chunk {index}: {reason}")]
    MalformedFrame { index: usize, reason: &'static str },

    #[error("chunk out of order: expected index {expected}, found {found}")]
    ChunkOutOfOrder { expected: usize, found: u32 },

    #[error("final-chunk flag on chunk {index} of {total}")]
    UnexpectedFinalChunk { index: usize, total: usize },

    #[error("stream ended without a final chunk")]
    MissingFinalChunk,

    #[error("{chunks} chunks exceed the frame index space")]
    StreamTooLong { chunks: usize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    StripZeros,
    #[default]
    LengthPrefixed,
}

impl Framing {
    /// Plaintext bytes one chunk can carry under this framing.
    pub fn capacity(self, max_message_bytes: usize) -> usize {
        match self {
            Framing::StripZeros => max_message_bytes,
            Framing::LengthPrefixed => max_message_bytes
                .saturating_sub(FRAME_HEADER_BYTES)
                .min(LENGTH_MASK as usize),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    /// `None` uses the framing's full capacity.
    pub chunk_size: Option<usize>,
    pub framing: Framing,
    /// `0` means one worker per available CPU.
    pub workers: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            chunk_size: None,
            framing: Framing::LengthPrefixed,
            workers: 0,
        }
    }
}

impl CodecConfig {
    pub fn strip_zeros(chunk_size: usize) -> Self {
        Self {
            chunk_size: Some(chunk_size),
            framing: Framing::StripZeros,
            workers: 0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Checks the chunk size against the primitive and returns the size in use.
    pub fn resolve_chunk_size(&self, max_message_bytes: usize) -> Result<usize, ChunkError> {
        let capacity = self.framing.capacity(max_message_bytes);
        if capacity == 0 {
            return Err(ChunkError::InvalidConfiguration(format!(
                "{:?} framing leaves no room for data in a {max_message_bytes}-byte block",
                self.framing
            )));
        }
        let chunk_size = self.chunk_size.unwrap_or(capacity);
        if chunk_size == 0 || chunk_size > capacity {
            return Err(ChunkError::InvalidConfiguration(format!(
                "chunk size {chunk_size} outside 1..={capacity} for {:?} framing",
                self.framing
            )));
        }
        Ok(chunk_size)
    }
}

struct Job {
    block: Zeroizing<Vec<u8>>,
    coins: Zeroizing<Vec<u8>>,
}

/// A bounded primitive plus the configuration that turns it into a
/// variable-length encryption facility.
pub struct ChunkCodec<P: BoundedPke> {
    pke: P,
    config: CodecConfig,
    chunk_size: usize,
    /// Window size strip-zeros decoding checks non-final blocks against.
    expected_window: Option<usize>,
    entropy: Box<dyn EntropySource>,
}

impl<P: BoundedPke> ChunkCodec<P> {
    pub fn new(pke: P, config: CodecConfig) -> Result<Self, ChunkError> {
        let chunk_size = config.resolve_chunk_size(pke.max_message_bytes())?;
        Ok(Self {
            pke,
            config,
            chunk_size,
            expected_window: Some(chunk_size),
            entropy: Box::new(OsEntropy),
        })
    }

    /// For decoders that cannot know the window size the stream was written with.
    pub(crate) fn without_window_check(mut self) -> Self {
        self.expected_window = None;
        self
    }

    pub fn with_entropy(mut self, entropy: impl EntropySource + 'static) -> Self {
        self.entropy = Box::new(entropy);
        self
    }

    pub fn pke(&self) -> &P {
        &self.pke
    }

    pub fn config(&self) -> CodecConfig {
        self.config
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of ciphertexts `encode` produces for `plaintext_len` bytes.
    pub fn chunk_count(&self, plaintext_len: usize) -> usize {
        let windows = plaintext_len.div_ceil(self.chunk_size);
        match self.config.framing {
            Framing::StripZeros => windows,
            Framing::LengthPrefixed => windows.max(1),
        }
    }

    pub fn encode(
        &self,
        public_key: &P::PublicKey,
        plaintext: &[u8],
    ) -> Result<EncryptedStream, ChunkError> {
        let blocks = match self.config.framing {
            Framing::StripZeros => plaintext
                .chunks(self.chunk_size)
                .map(|window| Zeroizing::new(window.to_vec()))
                .collect(),
            Framing::LengthPrefixed => self.frame_blocks(plaintext)?,
        };
        let mut jobs = Vec::with_capacity(blocks.len());
        for block in blocks {
            let mut coins = Zeroizing::new(vec![0u8; self.pke.coin_bytes()]);
            self.entropy.fill(&mut coins)?;
            jobs.push(Job { block, coins });
        }

        let workers = effective_workers(self.config.workers);
        debug!(
            "encode level={} framing={:?} chunk_size={} plaintext_len={} chunks={} workers={}",
            self.pke.level(),
            self.config.framing,
            self.chunk_size,
            plaintext.len(),
            jobs.len(),
            workers
        );
        let ciphertexts = map_ordered(&jobs, workers, |_, job| {
            self.pke
                .encrypt(&job.block, public_key, &job.coins)
                .map_err(ChunkError::from)
        })?;
        Ok(EncryptedStream::new(ciphertexts))
    }

    pub fn decode(
        &self,
        secret_key: &P::SecretKey,
        ciphertexts: &[Ciphertext],
    ) -> Result<Vec<u8>, ChunkError> {
        let workers = effective_workers(self.config.workers);
        debug!(
            "decode level={} framing={:?} chunks={} workers={}",
            self.pke.level(),
            self.config.framing,
            ciphertexts.len(),
            workers
        );
        let blocks = map_ordered(ciphertexts, workers, |_, ciphertext| {
            self.pke
                .decrypt(ciphertext, secret_key)
                .map(Zeroizing::new)
                .map_err(ChunkError::from)
        })?;
        match self.config.framing {
            Framing::StripZeros => {
                let (plaintext, shortened) = strip_and_join(&blocks, self.expected_window);
                if shortened > 0 {
                    warn!(
                        "zero stripping shortened {shortened} full-length chunk(s); trailing 0x00 bytes were lost"
                    );
                }
                Ok(plaintext)
            }
            Framing::LengthPrefixed => unframe_blocks(&blocks),
        }
    }

    fn frame_blocks(&self, plaintext: &[u8]) -> Result<Vec<Zeroizing<Vec<u8>>>, ChunkError> {
        let total = self.chunk_count(plaintext.len());
        if total as u64 > u64::from(u32::MAX) + 1 {
            return Err(ChunkError::StreamTooLong { chunks: total });
        }
        let mut windows: Vec<&[u8]> = plaintext.chunks(self.chunk_size).collect();
        if windows.is_empty() {
            windows.push(&[]);
        }
        Ok(windows
            .into_iter()
            .enumerate()
            .map(|(index, window)| frame(index as u32, index + 1 == total, window))
            .collect())
    }
}

fn frame(index: u32, is_final: bool, data: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut block = Zeroizing::new(Vec::with_capacity(FRAME_HEADER_BYTES + data.len()));
    let mut flags = data.len() as u8 & LENGTH_MASK;
    if is_final {
        flags |= FINAL_FLAG;
    }
    block.push(flags);
    block.extend_from_slice(&index.to_be_bytes());
    block.extend_from_slice(data);
    block
}

/// With a known chunk size, every block but the last carried exactly that
/// many bytes, so stripping below it means genuine zeros were lost.
/// Returns the joined plaintext and the number of such shortened blocks.
fn strip_and_join(blocks: &[Zeroizing<Vec<u8>>], chunk_size: Option<usize>) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(blocks.iter().map(|b| b.len()).sum());
    let mut truncated = 0usize;
    for (position, block) in blocks.iter().enumerate() {
        let end = block.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
        if let Some(expected) = chunk_size {
            if position + 1 < blocks.len() && end < expected {
                truncated += 1;
            }
        }
        out.extend_from_slice(&block[..end]);
    }
    (out, truncated)
}

fn unframe_blocks(blocks: &[Zeroizing<Vec<u8>>]) -> Result<Vec<u8>, ChunkError> {
    let total = blocks.len();
    if total == 0 {
        return Err(ChunkError::MissingFinalChunk);
    }
    let mut out = Vec::with_capacity(total * blocks[0].len());
    for (position, block) in blocks.iter().enumerate() {
        if block.len() < FRAME_HEADER_BYTES {
            return Err(ChunkError::MalformedFrame {
                index: position,
                reason: "block shorter than the frame header",
            });
        }
        let flags = block[0];
        if flags & RESERVED_FLAG != 0 {
            return Err(ChunkError::MalformedFrame {
                index: position,
                reason: "reserved flag set",
            });
        }
        let len = (flags & LENGTH_MASK) as usize;
        let body = &block[FRAME_HEADER_BYTES..];
        if len > body.len() {
            return Err(ChunkError::MalformedFrame {
                index: position,
                reason: "length exceeds block",
            });
        }
        if body[len..].iter().any(|&b| b != 0) {
            return Err(ChunkError::MalformedFrame {
                index: position,
                reason: "non-zero padding",
            });
        }
        let mut index_bytes = [0u8; 4];
        index_bytes.copy_from_slice(&block[1..FRAME_HEADER_BYTES]);
        let found = u32::from_be_bytes(index_bytes);
        if found as usize != position {
            return Err(ChunkError::ChunkOutOfOrder {
                expected: position,
                found,
            });
        }
        let is_final = flags & FINAL_FLAG != 0;
        if is_final && position + 1 != total {
            return Err(ChunkError::UnexpectedFinalChunk {
                index: position,
                total,
            });
        }
        if !is_final && position + 1 == total {
            return Err(ChunkError::MissingFinalChunk);
        }
        out.extend_from_slice(&body[..len]);
    }
    Ok(out)
}

/// Encrypts `plaintext` in `chunk_size` windows with zero-stripping framing.
pub fn encode(
    public_key: &PublicKey,
    plaintext: &[u8],
    chunk_size: usize,
    level: SecurityLevel,
) -> Result<Vec<Ciphertext>, ChunkError> {
    let codec = ChunkCodec::new(LatticePke::new(level), CodecConfig::strip_zeros(chunk_size))?;
    Ok(codec.encode(public_key, plaintext)?.into_ciphertexts())
}

/// Decrypts every ciphertext in order and strips trailing zeros per block.
pub fn decode(
    private_key: &SecretKey,
    ciphertexts: &[Ciphertext],
    level: SecurityLevel,
) -> Result<Vec<u8>, ChunkError> {
    let pke = LatticePke::new(level);
    let codec = ChunkCodec::new(pke, CodecConfig::strip_zeros(pke.max_message_bytes()))?
        .without_window_check();
    codec.decode(private_key, ciphertexts)
}

/// Length-prefixed counterpart of [`encode`].
pub fn encode_framed(
    public_key: &PublicKey,
    plaintext: &[u8],
    level: SecurityLevel,
) -> Result<Vec<Ciphertext>, ChunkError> {
    let codec = ChunkCodec::new(LatticePke::new(level), CodecConfig::default())?;
    Ok(codec.encode(public_key, plaintext)?.into_ciphertexts())
}

/// Length-prefixed counterpart of [`decode`].
pub fn decode_framed(
    private_key: &SecretKey,
    ciphertexts: &[Ciphertext],
    level: SecurityLevel,
) -> Result<Vec<u8>, ChunkError> {
    let codec = ChunkCodec::new(LatticePke::new(level), CodecConfig::default())?;
    codec.decode(private_key, ciphertexts)
}
