//! Content fingerprint of a historical series

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of the exact bit pattern of a series, hex encoded.
///
/// Values that compare equal but differ in representation (`0.0` and `-0.0`,
/// or results of different rounding paths) produce different fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(series: &[f64]) -> Self {
        let mut hasher = Sha256::new();
        for value in series {
            hasher.update(value.to_le_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
