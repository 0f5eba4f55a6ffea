use log::trace;
use rand_core::{CryptoRng, RngCore};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

use crate::pke::{BoundedPke, Ciphertext, PkeError};
use crate::preset::{
    COIN_BYTES, MATRIX_SEED_BYTES, MAX_CHUNK_SIZE, SecurityLevel, SecurityPreset, security_preset,
};
use crate::ring::{KYBER_RING, PACKED_POLY_BYTES, RingElement, dot};
use crate::rng::{derive_session_rng, secure_rng};
use crate::versioning::{KEYPAIR_VERSION, PUBLIC_KEY_VERSION, expect_version};

const KEY_CHECK_BYTE: u8 = 0xA5;
const MATRIX_LABEL: &[u8] = b"kyber-chunk::matrix";
const ENCRYPT_NOISE_LABEL: &[u8] = b"kyber-chunk::encrypt-noise";

#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    level: SecurityLevel,
    t: Vec<RingElement>,
    rho: [u8; MATRIX_SEED_BYTES],
    matrix: Vec<Vec<RingElement>>,
}

impl PublicKey {
    fn new(level: SecurityLevel, t: Vec<RingElement>, rho: [u8; MATRIX_SEED_BYTES]) -> Self {
        let matrix = expand_matrix(&rho, level.preset().k);
        Self {
            level,
            t,
            rho,
            matrix,
        }
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// `t` packed polynomial by polynomial, followed by the matrix seed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.level.preset().public_key_bytes());
        for poly in &self.t {
            out.extend_from_slice(&poly.to_bytes());
        }
        out.extend_from_slice(&self.rho);
        out
    }

    pub fn from_bytes(level: SecurityLevel, bytes: &[u8]) -> Result<Self, PkeError> {
        let preset = level.preset();
        if bytes.len() != preset.public_key_bytes() {
            return Err(PkeError::MalformedKey {
                kind: "public",
                reason: format!(
                    "expected {} bytes, found {}",
                    preset.public_key_bytes(),
                    bytes.len()
                ),
            });
        }
        let (polys, seed) = bytes.split_at(PACKED_POLY_BYTES * preset.k);
        let t = unpack_vector(polys, "public")?;
        let mut rho = [0u8; MATRIX_SEED_BYTES];
        rho.copy_from_slice(seed);
        Ok(Self::new(level, t, rho))
    }

    /// BLAKE3 digest of the packed key, for display and logging.
    pub fn fingerprint(&self) -> [u8; 32] {
        *blake3::hash(&self.to_bytes()).as_bytes()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("level", &self.level)
            .field("fingerprint", &hex::encode(&self.fingerprint()[..8]))
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    level: SecurityLevel,
    s: Vec<RingElement>,
}

impl SecretKey {
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.level.preset().secret_key_bytes()));
        for poly in &self.s {
            out.extend_from_slice(&poly.to_bytes());
        }
        out
    }

    pub fn from_bytes(level: SecurityLevel, bytes: &[u8]) -> Result<Self, PkeError> {
        let preset = level.preset();
        if bytes.len() != preset.secret_key_bytes() {
            return Err(PkeError::MalformedKey {
                kind: "secret",
                reason: format!(
                    "expected {} bytes, found {}",
                    preset.secret_key_bytes(),
                    bytes.len()
                ),
            });
        }
        let s = unpack_vector(bytes, "secret")?;
        Ok(Self { level, s })
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        for poly in &mut self.s {
            poly.wipe();
        }
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    pub fn level(&self) -> SecurityLevel {
        self.public.level
    }

    /// Checks that `secret` opens what `public` seals by running one
    /// fixed-coin encryption through both halves.
    pub fn verify(&self) -> Result<(), PkeError> {
        let pke = LatticePke::new(self.level());
        let block = [KEY_CHECK_BYTE; MAX_CHUNK_SIZE];
        let coins = [0u8; COIN_BYTES];
        let ciphertext = pke.encrypt(&block, &self.public, &coins)?;
        if pke.decrypt(&ciphertext, &self.secret)? != block {
            return Err(PkeError::KeyMismatch);
        }
        Ok(())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("PublicKey", 3)?;
        state.serialize_field("version", &PUBLIC_KEY_VERSION)?;
        state.serialize_field("level", &self.level)?;
        state.serialize_field("key", &hex::encode(self.to_bytes()))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            level: SecurityLevel,
            key: String,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, PUBLIC_KEY_VERSION, "PublicKey")?;
        let bytes = hex::decode(&helper.key).map_err(serde::de::Error::custom)?;
        PublicKey::from_bytes(helper.level, &bytes).map_err(serde::de::Error::custom)
    }
}

impl Serialize for KeyPair {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secret = Zeroizing::new(hex::encode(self.secret.to_bytes().as_slice()));
        let mut state = serializer.serialize_struct("KeyPair", 4)?;
        state.serialize_field("version", &KEYPAIR_VERSION)?;
        state.serialize_field("level", &self.level())?;
        state.serialize_field("public", &hex::encode(self.public.to_bytes()))?;
        state.serialize_field("secret", secret.as_str())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for KeyPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            level: SecurityLevel,
            public: String,
            secret: String,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, KEYPAIR_VERSION, "KeyPair")?;
        let secret_hex = Zeroizing::new(helper.secret);
        let public_bytes = hex::decode(&helper.public).map_err(serde::de::Error::custom)?;
        let secret_bytes = Zeroizing::new(
            hex::decode(secret_hex.as_str()).map_err(serde::de::Error::custom)?,
        );
        let public =
            PublicKey::from_bytes(helper.level, &public_bytes).map_err(serde::de::Error::custom)?;
        let secret =
            SecretKey::from_bytes(helper.level, &secret_bytes).map_err(serde::de::Error::custom)?;
        let pair = KeyPair { public, secret };
        pair.verify().map_err(serde::de::Error::custom)?;
        Ok(pair)
    }
}

/// Module-LWE CPA encryption over `Z_3329[x]/(x^256 + 1)` with one message
/// bit per coefficient. Ciphertexts are left uncompressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatticePke {
    preset: SecurityPreset,
}

impl LatticePke {
    pub fn new(level: SecurityLevel) -> Self {
        Self {
            preset: security_preset(level),
        }
    }

    pub fn preset(&self) -> SecurityPreset {
        self.preset
    }

    pub fn keypair_with_rng<R: CryptoRng + RngCore>(&self, rng: &mut R) -> KeyPair {
        let (secret, public) = self.generate_keypair(rng);
        KeyPair { public, secret }
    }

    fn check_level(&self, key: SecurityLevel) -> Result<(), PkeError> {
        if key != self.preset.level {
            return Err(PkeError::LevelMismatch {
                key,
                primitive: self.preset.level,
            });
        }
        Ok(())
    }
}

impl BoundedPke for LatticePke {
    type PublicKey = PublicKey;
    type SecretKey = SecretKey;

    fn level(&self) -> SecurityLevel {
        self.preset.level
    }

    fn max_message_bytes(&self) -> usize {
        self.preset.max_chunk_size
    }

    fn coin_bytes(&self) -> usize {
        self.preset.coin_bytes
    }

    fn ciphertext_bytes(&self) -> usize {
        self.preset.ciphertext_bytes()
    }

    fn generate_keypair<R: CryptoRng + RngCore>(&self, rng: &mut R) -> (SecretKey, PublicKey) {
        let k = self.preset.k;
        let mut rho = [0u8; MATRIX_SEED_BYTES];
        rng.fill_bytes(&mut rho);
        let s: Vec<_> = (0..k)
            .map(|_| RingElement::sample_cbd(KYBER_RING, self.preset.eta1, rng))
            .collect();
        let matrix = expand_matrix(&rho, k);
        let t = matrix
            .iter()
            .map(|row| {
                let e = RingElement::sample_cbd(KYBER_RING, self.preset.eta1, rng);
                dot(row, &s).add(&e)
            })
            .collect();
        let secret = SecretKey {
            level: self.preset.level,
            s,
        };
        let public = PublicKey {
            level: self.preset.level,
            t,
            rho,
            matrix,
        };
        (secret, public)
    }

    fn encrypt(
        &self,
        block: &[u8],
        public_key: &PublicKey,
        coins: &[u8],
    ) -> Result<Ciphertext, PkeError> {
        self.check_level(public_key.level)?;
        if block.len() > self.preset.max_chunk_size {
            return Err(PkeError::MessageTooLong {
                len: block.len(),
                max: self.preset.max_chunk_size,
            });
        }
        if coins.len() != self.preset.coin_bytes {
            return Err(PkeError::InvalidCoinLength {
                expected: self.preset.coin_bytes,
                found: coins.len(),
            });
        }

        let k = self.preset.k;
        let mut noise = derive_session_rng(coins, 0, ENCRYPT_NOISE_LABEL);
        let r: Vec<_> = (0..k)
            .map(|_| RingElement::sample_cbd(KYBER_RING, self.preset.eta1, &mut noise))
            .collect();

        let mut out = Vec::with_capacity(self.preset.ciphertext_bytes());
        for column in 0..k {
            let e1 = RingElement::sample_cbd(KYBER_RING, self.preset.eta2, &mut noise);
            let u = (0..k)
                .fold(RingElement::zero(KYBER_RING), |acc, row| {
                    acc.add(&public_key.matrix[row][column].mul(&r[row]))
                })
                .add(&e1);
            out.extend_from_slice(&u.to_bytes());
        }
        let e2 = RingElement::sample_cbd(KYBER_RING, self.preset.eta2, &mut noise);
        let v = dot(&public_key.t, &r).add(&e2).add(&encode_message(block));
        out.extend_from_slice(&v.to_bytes());

        trace!(
            "encrypt level={} block_len={} ciphertext_len={}",
            self.preset.level,
            block.len(),
            out.len()
        );
        Ok(Ciphertext::from_bytes(out))
    }

    fn decrypt(&self, ciphertext: &Ciphertext, secret_key: &SecretKey) -> Result<Vec<u8>, PkeError> {
        self.check_level(secret_key.level)?;
        let expected = self.preset.ciphertext_bytes();
        if ciphertext.len() != expected {
            return Err(PkeError::CiphertextLength {
                expected,
                found: ciphertext.len(),
            });
        }
        let (u_bytes, v_bytes) = ciphertext
            .as_bytes()
            .split_at(PACKED_POLY_BYTES * self.preset.k);
        let u = u_bytes
            .chunks_exact(PACKED_POLY_BYTES)
            .map(|chunk| RingElement::from_bytes(KYBER_RING, chunk))
            .collect::<Option<Vec<_>>>()
            .ok_or(PkeError::CiphertextEncoding)?;
        let v = RingElement::from_bytes(KYBER_RING, v_bytes).ok_or(PkeError::CiphertextEncoding)?;
        let w = v.sub(&dot(&secret_key.s, &u));
        Ok(decode_message(&w, self.preset.max_chunk_size))
    }
}

pub fn keygen(level: SecurityLevel) -> KeyPair {
    let mut rng = secure_rng();
    keygen_with_rng(level, &mut rng)
}

pub fn keygen_with_rng<R: CryptoRng + RngCore>(level: SecurityLevel, rng: &mut R) -> KeyPair {
    LatticePke::new(level).keypair_with_rng(rng)
}

fn expand_matrix(rho: &[u8; MATRIX_SEED_BYTES], k: usize) -> Vec<Vec<RingElement>> {
    (0..k)
        .map(|row| {
            (0..k)
                .map(|column| {
                    let mut rng = derive_session_rng(rho, (row * k + column) as u64, MATRIX_LABEL);
                    RingElement::random_uniform(KYBER_RING, &mut rng)
                })
                .collect()
        })
        .collect()
}

fn unpack_vector(bytes: &[u8], kind: &'static str) -> Result<Vec<RingElement>, PkeError> {
    bytes
        .chunks_exact(PACKED_POLY_BYTES)
        .map(|chunk| {
            RingElement::from_bytes(KYBER_RING, chunk).ok_or_else(|| PkeError::MalformedKey {
                kind,
                reason: "coefficient outside the ring".to_string(),
            })
        })
        .collect()
}

/// Spreads the block LSB-first over the coefficients; missing bytes are zero.
fn encode_message(block: &[u8]) -> RingElement {
    let half = KYBER_RING.half_modulus();
    let mut coeffs = vec![0i64; KYBER_RING.degree];
    for (byte_index, &byte) in block.iter().enumerate() {
        for bit in 0..8 {
            if (byte >> bit) & 1 == 1 {
                coeffs[byte_index * 8 + bit] = half;
            }
        }
    }
    RingElement::from_coeffs(KYBER_RING, coeffs)
}

fn decode_message(element: &RingElement, block_len: usize) -> Vec<u8> {
    let quarter = KYBER_RING.modulus / 4;
    let mut out = vec![0u8; block_len];
    for (index, &coeff) in element.coeffs().iter().enumerate().take(block_len * 8) {
        if KYBER_RING.center(coeff).abs() > quarter {
            out[index / 8] |= 1 << (index % 8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn deterministic_pair(level: SecurityLevel, label: u8) -> KeyPair {
        let mut rng = ChaCha20Rng::from_seed([label; 32]);
        keygen_with_rng(level, &mut rng)
    }

    #[test]
    fn per_level_roundtrip() {
        for level in SecurityLevel::ALL {
            let pke = LatticePke::new(level);
            let pair = deterministic_pair(level, level.params_k());
            let messages: [&[u8]; 4] = [b"", b"tiny", &[0xFF; 32], b"Kyber test message!"];
            for msg in messages {
                let ct = pke.encrypt(msg, &pair.public, &[0x11; 32]).unwrap();
                assert_eq!(ct.len(), pke.ciphertext_bytes());
                let block = pke.decrypt(&ct, &pair.secret).unwrap();
                assert_eq!(block.len(), 32);
                assert_eq!(&block[..msg.len()], msg);
                assert!(block[msg.len()..].iter().all(|&b| b == 0));
            }
        }
    }

    #[test]
    fn equal_coins_give_equal_ciphertexts() {
        let pke = LatticePke::new(SecurityLevel::Kyber512);
        let pair = deterministic_pair(SecurityLevel::Kyber512, 1);
        let a = pke.encrypt(b"same", &pair.public, &[5; 32]).unwrap();
        let b = pke.encrypt(b"same", &pair.public, &[5; 32]).unwrap();
        let c = pke.encrypt(b"same", &pair.public, &[6; 32]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn oversized_block_rejected() {
        let pke = LatticePke::new(SecurityLevel::Kyber768);
        let pair = deterministic_pair(SecurityLevel::Kyber768, 2);
        let err = pke.encrypt(&[1u8; 33], &pair.public, &[0; 32]).unwrap_err();
        assert!(matches!(err, PkeError::MessageTooLong { len: 33, max: 32 }));
    }

    #[test]
    fn short_coins_rejected() {
        let pke = LatticePke::new(SecurityLevel::Kyber512);
        let pair = deterministic_pair(SecurityLevel::Kyber512, 3);
        let err = pke.encrypt(b"x", &pair.public, &[0; 16]).unwrap_err();
        assert!(matches!(
            err,
            PkeError::InvalidCoinLength {
                expected: 32,
                found: 16
            }
        ));
    }

    #[test]
    fn wrong_key_returns_garbage_without_error() {
        let pke = LatticePke::new(SecurityLevel::Kyber512);
        let alice = deterministic_pair(SecurityLevel::Kyber512, 4);
        let mallory = deterministic_pair(SecurityLevel::Kyber512, 5);
        let msg = b"only alice may read this";
        let ct = pke.encrypt(msg, &alice.public, &[9; 32]).unwrap();
        let block = pke.decrypt(&ct, &mallory.secret).unwrap();
        assert_ne!(&block[..msg.len()], msg);
    }

    #[test]
    fn level_mismatch_rejected() {
        let pke = LatticePke::new(SecurityLevel::Kyber1024);
        let pair = deterministic_pair(SecurityLevel::Kyber512, 6);
        let err = pke.encrypt(b"x", &pair.public, &[0; 32]).unwrap_err();
        assert!(matches!(err, PkeError::LevelMismatch { .. }));
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        let pke = LatticePke::new(SecurityLevel::Kyber512);
        let pair = deterministic_pair(SecurityLevel::Kyber512, 7);
        let ct = pke.encrypt(b"x", &pair.public, &[0; 32]).unwrap();
        let short = Ciphertext::from_bytes(ct.as_bytes()[..100].to_vec());
        let err = pke.decrypt(&short, &pair.secret).unwrap_err();
        assert!(matches!(
            err,
            PkeError::CiphertextLength {
                expected: 1152,
                found: 100
            }
        ));
    }

    #[test]
    fn key_bytes_roundtrip() {
        let pair = deterministic_pair(SecurityLevel::Kyber768, 8);
        let public = PublicKey::from_bytes(SecurityLevel::Kyber768, &pair.public.to_bytes()).unwrap();
        let secret =
            SecretKey::from_bytes(SecurityLevel::Kyber768, &pair.secret.to_bytes()).unwrap();
        assert_eq!(public, pair.public);
        assert_eq!(secret, pair.secret);
        assert!(PublicKey::from_bytes(SecurityLevel::Kyber512, &pair.public.to_bytes()).is_err());
    }

    #[test]
    fn keypair_serialization_roundtrip() {
        let pair = deterministic_pair(SecurityLevel::Kyber512, 9);
        let encoded = serde_json::to_vec(&pair).unwrap();
        let decoded: KeyPair = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(pair, decoded);
    }

    #[test]
    fn keypair_rejects_unknown_version() {
        let pair = deterministic_pair(SecurityLevel::Kyber512, 10);
        let mut value = serde_json::to_value(&pair).unwrap();
        value["version"] = serde_json::json!(99);
        let err = serde_json::from_value::<KeyPair>(value).unwrap_err();
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn keypair_rejects_mismatched_halves() {
        let first = deterministic_pair(SecurityLevel::Kyber512, 12);
        let second = deterministic_pair(SecurityLevel::Kyber512, 13);
        let mut value = serde_json::to_value(&first).unwrap();
        value["secret"] = serde_json::to_value(&second).unwrap()["secret"].clone();
        let err = serde_json::from_value::<KeyPair>(value).unwrap_err();
        assert!(err.to_string().contains("does not match"));
        assert!(first.verify().is_ok());
    }

    #[test]
    fn public_key_serialization_roundtrip() {
        let pair = deterministic_pair(SecurityLevel::Kyber1024, 14);
        let encoded = serde_json::to_string(&pair.public).unwrap();
        let decoded: PublicKey = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, pair.public);
        assert_eq!(decoded.level(), SecurityLevel::Kyber1024);
        assert!(serde_json::from_str::<KeyPair>(&encoded).is_err());
    }

    #[test]
    fn public_key_rejects_unknown_version() {
        let pair = deterministic_pair(SecurityLevel::Kyber512, 15);
        let mut value = serde_json::to_value(&pair.public).unwrap();
        value["version"] = serde_json::json!(2);
        let err = serde_json::from_value::<PublicKey>(value).unwrap_err();
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn secret_key_debug_hides_material() {
        let pair = deterministic_pair(SecurityLevel::Kyber512, 11);
        let rendered = format!("{:?}", pair.secret);
        assert_eq!(rendered, "SecretKey { level: Kyber512, .. }");
    }
}
