//! Context-triggered piecewise hashing: signature computation and scoring.

pub mod ctph;
pub mod rolling;
pub mod score;

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use ctph::compute_signature;
pub use score::score;

/// Smallest block size a signature can carry.
pub const MIN_BLOCK_SIZE: u64 = 3;
/// Upper bound on the characters of either digest.
pub const MAX_DIGEST_LEN: usize = 64;
/// Digest alphabet: one character per chunk boundary.
pub const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A fuzzy signature at two adjacent granularities.
///
/// `digest_a` is triggered at `block_size`, `digest_b` at `2 * block_size`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSignature {
    pub block_size: u64,
    pub digest_a: String,
    pub digest_b: String,
}

impl FileSignature {
    pub fn empty() -> Self {
        Self {
            block_size: MIN_BLOCK_SIZE,
            digest_a: String::new(),
            digest_b: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.digest_a.is_empty() && self.digest_b.is_empty()
    }
}

impl fmt::Display for FileSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.block_size, self.digest_a, self.digest_b)
    }
}

impl FromStr for FileSignature {
    type Err = Error;

    /// Parse the `block_size:digest_a:digest_b` text form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');
        let (Some(bs), Some(a), Some(b)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::Input(format!("malformed signature '{}'", s)));
        };

        let block_size: u64 = bs
            .parse()
            .map_err(|_| Error::Input(format!("invalid block size '{}'", bs)))?;
        if block_size < MIN_BLOCK_SIZE || block_size % MIN_BLOCK_SIZE != 0 {
            return Err(Error::Input(format!("invalid block size {}", block_size)));
        }
        if !(block_size / MIN_BLOCK_SIZE).is_power_of_two() {
            return Err(Error::Input(format!("invalid block size {}", block_size)));
        }

        for digest in [a, b] {
            if digest.len() > MAX_DIGEST_LEN {
                return Err(Error::Input(format!(
                    "digest longer than {} characters",
                    MAX_DIGEST_LEN
                )));
            }
            if let Some(c) = digest.bytes().find(|c| !ALPHABET.contains(c)) {
                return Err(Error::Input(format!(
                    "invalid digest character '{}'",
                    c as char
                )));
            }
        }

        Ok(FileSignature {
            block_size,
            digest_a: a.to_string(),
            digest_b: b.to_string(),
        })
    }
}

/// Stable record identifier: blake3 of the full content, hex encoded.
pub fn content_id(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
