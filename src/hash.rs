// src/hash.rs

//! Checksums for source integrity and content addressing
//!
//! Formulas pin every download with a checksum. Two algorithms are supported:
//! - **SHA-256**: what formula authors declare for upstream sources
//! - **XXH128**: fast, non-cryptographic; used for local fixtures and for
//!   internal fingerprints where tamper resistance is not the point
//!
//! A checksum is written either prefixed (`sha256:<hex>`) or as a bare
//! 64-character hex string, which is read as SHA-256.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use xxhash_rust::xxh3::Xxh3;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (256-bit cryptographic hash)
    #[default]
    Sha256,
    /// XXH128 (128-bit non-cryptographic hash)
    Xxh128,
}

impl HashAlgorithm {
    /// Digest length in hex characters
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Xxh128 => 32,
        }
    }

    /// Algorithm name as used in prefixed checksums
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Xxh128 => "xxh128",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "xxh128" | "xxh3" => Ok(Self::Xxh128),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Checksum parse errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
    /// Hex string has the wrong length for the algorithm
    InvalidLength { expected: usize, got: usize },
    /// Hex string contains non-hex characters
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// An expected or computed digest together with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    /// The algorithm used
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    /// Create a checksum, validating length and hex characters
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        if value.len() != algorithm.hex_len() {
            return Err(HashError::InvalidLength {
                expected: algorithm.hex_len(),
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }
        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    /// Parse `algo:hex` or a bare SHA-256 hex string
    pub fn parse(s: &str) -> Result<Self, HashError> {
        match s.split_once(':') {
            Some((algo, hex)) => Self::new(algo.parse()?, hex),
            None => Self::new(HashAlgorithm::Sha256, s),
        }
    }

    /// Hex digest
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Prefixed form, e.g. `sha256:abc...`
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.value)
    }

    /// Hash `path` with this checksum's algorithm and compare
    pub fn matches_file(&self, path: &Path) -> io::Result<bool> {
        Ok(hash_file(self.algorithm, path)? == *self)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefixed_string())
    }
}

impl FromStr for Checksum {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_string())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher over any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Xxh128(Box<Xxh3>),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Xxh128 => HasherState::Xxh128(Box::new(Xxh3::new())),
        };
        Self { algorithm, state }
    }

    /// Feed more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Xxh128(hasher) => hasher.update(data),
        }
    }

    /// Finalize into a checksum
    pub fn finalize(self) -> Checksum {
        let value = match self.state {
            HasherState::Sha256(hasher) => hex::encode(hasher.finalize()),
            HasherState::Xxh128(hasher) => format!("{:032x}", hasher.digest128()),
        };
        Checksum {
            algorithm: self.algorithm,
            value,
        }
    }
}

/// Hash a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Checksum {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hash everything a reader yields
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<Checksum> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Hash a file, streaming its contents
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<Checksum> {
    let mut file = std::fs::File::open(path)?;
    hash_reader(algorithm, &mut file)
}

/// SHA-256 of a byte slice as bare hex
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}
