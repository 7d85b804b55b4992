//! Salted one-way PIN digests.
//!
//! digest = H(salt || pin) with a fresh per-speaker salt. The raw PIN never
//! reaches the store and is never logged.

use bson::{Binary, spec::BinarySubtype};
use koegate_db::models::PinDigest;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// PINs are exactly this many ASCII digits.
pub const PIN_LENGTH: usize = 4;

const SALT_LENGTH: usize = 16;

#[derive(Debug, Error)]
pub enum PinError {
    #[error("PIN must be exactly 4 digits")]
    InvalidPin,
    #[error("unsupported PIN algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Sha256,
}

impl Algorithm {
    fn parse(name: &str) -> Result<Self, PinError> {
        match name {
            "sha256" => Ok(Algorithm::Sha256),
            other => Err(PinError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
        }
    }

    fn digest(self, salt: &[u8], pin: &str) -> Vec<u8> {
        match self {
            Algorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(salt);
                hasher.update(pin.as_bytes());
                hasher.finalize().to_vec()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PinHasher {
    algorithm: Algorithm,
}

impl PinHasher {
    pub fn new(algorithm: &str) -> Result<Self, PinError> {
        Ok(Self {
            algorithm: Algorithm::parse(algorithm)?,
        })
    }

    /// Rejects anything that is not exactly four ASCII digits.
    pub fn validate(pin: &str) -> Result<(), PinError> {
        if pin.len() != PIN_LENGTH || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PinError::InvalidPin);
        }
        Ok(())
    }

    /// Derives a fresh salted digest for storage.
    pub fn digest(&self, pin: &str) -> Result<PinDigest, PinError> {
        Self::validate(pin)?;

        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        let digest = self.algorithm.digest(&salt, pin);

        Ok(PinDigest {
            algorithm: self.algorithm.name().to_string(),
            salt: Binary {
                subtype: BinarySubtype::Generic,
                bytes: salt.to_vec(),
            },
            digest: Binary {
                subtype: BinarySubtype::Generic,
                bytes: digest,
            },
        })
    }

    /// Recomputes the digest with the stored salt and compares in constant
    /// time. A digest produced by an unknown algorithm never verifies.
    pub fn verify(pin: &str, stored: &PinDigest) -> bool {
        if Self::validate(pin).is_err() {
            return false;
        }
        let algorithm = match Algorithm::parse(&stored.algorithm) {
            Ok(a) => a,
            Err(_) => return false,
        };
        let candidate = algorithm.digest(&stored.salt.bytes, pin);
        constant_time_eq(&candidate, &stored.digest.bytes)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
