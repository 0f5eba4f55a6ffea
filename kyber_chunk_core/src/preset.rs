use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ring::PACKED_POLY_BYTES;

/// Largest plaintext block the primitive accepts per call (one bit per
/// coefficient of a degree-256 polynomial).
pub const MAX_CHUNK_SIZE: usize = 32;
/// Length of the coins consumed by a single encryption call.
pub const COIN_BYTES: usize = 32;
/// Length of the public matrix seed stored at the end of a public key.
pub const MATRIX_SEED_BYTES: usize = 32;

/// Parameter set of the lattice backend, named after the Kyber variant whose
/// module rank it shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityLevel {
    Kyber512,
    Kyber768,
    Kyber1024,
}

impl SecurityLevel {
    pub const ALL: [SecurityLevel; 3] = [
        SecurityLevel::Kyber512,
        SecurityLevel::Kyber768,
        SecurityLevel::Kyber1024,
    ];

    /// Module rank `k`.
    pub fn params_k(self) -> u8 {
        match self {
            SecurityLevel::Kyber512 => 2,
            SecurityLevel::Kyber768 => 3,
            SecurityLevel::Kyber1024 => 4,
        }
    }

    pub fn from_params_k(k: u8) -> Option<Self> {
        match k {
            2 => Some(SecurityLevel::Kyber512),
            3 => Some(SecurityLevel::Kyber768),
            4 => Some(SecurityLevel::Kyber1024),
            _ => None,
        }
    }

    pub fn preset(self) -> SecurityPreset {
        security_preset(self)
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Kyber512 => write!(f, "kyber512"),
            SecurityLevel::Kyber768 => write!(f, "kyber768"),
            SecurityLevel::Kyber1024 => write!(f, "kyber1024"),
        }
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kyber512" | "512" | "2" => Ok(SecurityLevel::Kyber512),
            "kyber768" | "768" | "3" => Ok(SecurityLevel::Kyber768),
            "kyber1024" | "1024" | "4" => Ok(SecurityLevel::Kyber1024),
            other => Err(format!("unknown security level: {other}")),
        }
    }
}

impl TryFrom<u8> for SecurityLevel {
    type Error = String;

    fn try_from(k: u8) -> Result<Self, Self::Error> {
        SecurityLevel::from_params_k(k).ok_or_else(|| format!("unsupported params_k: {k}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecurityPreset {
    pub level: SecurityLevel,
    pub k: usize,
    pub eta1: u32,
    pub eta2: u32,
    pub max_chunk_size: usize,
    pub coin_bytes: usize,
}

impl SecurityPreset {
    pub fn ciphertext_bytes(&self) -> usize {
        PACKED_POLY_BYTES * (self.k + 1)
    }

    pub fn public_key_bytes(&self) -> usize {
        PACKED_POLY_BYTES * self.k + MATRIX_SEED_BYTES
    }

    pub fn secret_key_bytes(&self) -> usize {
        PACKED_POLY_BYTES * self.k
    }
}

pub fn security_preset(level: SecurityLevel) -> SecurityPreset {
    match level {
        SecurityLevel::Kyber512 => SecurityPreset {
            level,
            k: 2,
            eta1: 3,
            eta2: 2,
            max_chunk_size: MAX_CHUNK_SIZE,
            coin_bytes: COIN_BYTES,
        },
        SecurityLevel::Kyber768 => SecurityPreset {
            level,
            k: 3,
            eta1: 2,
            eta2: 2,
            max_chunk_size: MAX_CHUNK_SIZE,
            coin_bytes: COIN_BYTES,
        },
        SecurityLevel::Kyber1024 => SecurityPreset {
            level,
            k: 4,
            eta1: 2,
            eta2: 2,
            max_chunk_size: MAX_CHUNK_SIZE,
            coin_bytes: COIN_BYTES,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_k_roundtrip() {
        for level in SecurityLevel::ALL {
            assert_eq!(SecurityLevel::from_params_k(level.params_k()), Some(level));
        }
        assert_eq!(SecurityLevel::from_params_k(5), None);
        assert!(SecurityLevel::try_from(1u8).is_err());
    }

    #[test]
    fn sizes_follow_module_rank() {
        let sizes: Vec<_> = SecurityLevel::ALL
            .iter()
            .map(|level| level.preset().ciphertext_bytes())
            .collect();
        assert_eq!(sizes, vec![1152, 1536, 1920]);
        assert_eq!(security_preset(SecurityLevel::Kyber512).public_key_bytes(), 800);
    }

    #[test]
    fn parses_names_and_ranks() {
        assert_eq!("2".parse::<SecurityLevel>(), Ok(SecurityLevel::Kyber512));
        assert_eq!("Kyber768".parse::<SecurityLevel>(), Ok(SecurityLevel::Kyber768));
        assert!("kyber9000".parse::<SecurityLevel>().is_err());
    }
}
