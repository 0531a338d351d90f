//! Content digests for layers, blobs and manifests.
//!
//! This module provides:
//! - `Digest`: an `algorithm:hex` content address (e.g. `sha256:e3b0c4...`)
//! - `Hashable`: digest of a value's canonical JSON serialization

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Algorithm name used for every digest this crate computes.
pub const SHA256: &str = "sha256";

const SHA256_HEX_LEN: usize = 64;

/// Error parsing a digest string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
  #[error("invalid digest format (expected 'algorithm:hash'): '{0}'")]
  Format(String),

  #[error("invalid digest '{0}': hash must be lowercase hex")]
  Hex(String),

  #[error("invalid sha256 digest '{0}': expected 64 lowercase hex characters")]
  Sha256(String),
}

/// A content-addressable digest.
///
/// Serialized as its string form, e.g. `"sha256:abc..."`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
  algorithm: String,
  hex: String,
}

impl Digest {
  /// Parse a digest string in `algorithm:hash` format.
  ///
  /// The hash must be lowercase hex; `sha256` digests carry exactly 64 characters.
  pub fn parse(digest: &str) -> Result<Self, DigestError> {
    let (algorithm, hex) = digest
      .split_once(':')
      .ok_or_else(|| DigestError::Format(digest.to_string()))?;

    if algorithm.is_empty() || hex.is_empty() {
      return Err(DigestError::Format(digest.to_string()));
    }

    if !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
      return Err(match algorithm {
        SHA256 => DigestError::Sha256(digest.to_string()),
        _ => DigestError::Hex(digest.to_string()),
      });
    }

    if algorithm == SHA256 && hex.len() != SHA256_HEX_LEN {
      return Err(DigestError::Sha256(digest.to_string()));
    }

    Ok(Self {
      algorithm: algorithm.to_string(),
      hex: hex.to_string(),
    })
  }

  /// SHA-256 digest of arbitrary bytes.
  pub fn of_bytes(data: &[u8]) -> Self {
    Self {
      algorithm: SHA256.to_string(),
      hex: hex::encode(Sha256::digest(data)),
    }
  }

  pub fn algorithm(&self) -> &str {
    &self.algorithm
  }

  pub fn hex(&self) -> &str {
    &self.hex
  }

  /// First 12 hex characters, for log output.
  pub fn short(&self) -> &str {
    &self.hex[..self.hex.len().min(12)]
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.algorithm, self.hex)
  }
}

impl FromStr for Digest {
  type Err = DigestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<String> for Digest {
  type Error = DigestError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<Digest> for String {
  fn from(value: Digest) -> Self {
    value.to_string()
  }
}

/// Digest of a value's JSON serialization.
///
/// The same bytes `serde_json::to_vec` produces are hashed, so a value written
/// with `to_vec` is addressable by the digest returned here.
pub trait Hashable: Serialize {
  fn compute_digest(&self) -> Result<Digest, serde_json::Error> {
    let serialized = serde_json::to_vec(self)?;
    Ok(Digest::of_bytes(&serialized))
  }
}
