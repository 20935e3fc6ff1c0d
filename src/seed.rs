// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Seed handling and address derivation seams
//!
//! The seed is fetched on demand through a `SeedProvider`, which lets
//! keystore or hardware-wallet integrations front the secret. The seed is
//! never persisted by the account core and must never appear in logs or
//! events; `Seed`'s `Debug` impl is redacted accordingly.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::tangle::{is_trytes_of_exact_length, Hash, HASH_TRYTES_SIZE};

/// An 81-tryte seed.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed(String);

impl Seed {
    /// Validates and wraps an 81-tryte seed.
    pub fn from_trytes(trytes: impl Into<String>) -> Result<Seed> {
        let trytes = trytes.into();
        if !is_trytes_of_exact_length(&trytes, HASH_TRYTES_SIZE) {
            return Err(Error::InvalidSeed);
        }
        Ok(Seed(trytes))
    }

    pub fn as_trytes(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(<redacted>)")
    }
}

/// The account identifier: hex digest of the SHA-256 hash of the seed.
pub fn account_id(seed: &Seed) -> String {
    hex::encode(Sha256::digest(seed.as_trytes().as_bytes()))
}

/// Supplies the seed on demand.
pub trait SeedProvider: Send + Sync {
    fn seed(&self) -> Result<Seed>;
}

/// Seed provider keeping the seed in memory.
pub struct InMemorySeedProvider {
    seed: Seed,
}

impl InMemorySeedProvider {
    pub fn new(seed: Seed) -> Self {
        Self { seed }
    }
}

impl SeedProvider for InMemorySeedProvider {
    fn seed(&self) -> Result<Seed> {
        Ok(self.seed.clone())
    }
}

/// The number of key fragments securing an address. Fixed for the lifetime
/// of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
}

impl Default for SecurityLevel {
    fn default() -> Self {
        SecurityLevel::Medium
    }
}

/// Derives deposit addresses from the seed and a key index.
///
/// The actual cryptographic derivation lives in the signing backend; the
/// account core only requires determinism and uniqueness per
/// `(seed, index, security)` triple. With `checksum` the returned address
/// carries the 9-tryte checksum appended to its 81 trytes.
pub trait AddressGenerator: Send + Sync {
    fn generate(
        &self,
        seed: &Seed,
        index: u64,
        security: SecurityLevel,
        checksum: bool,
    ) -> Result<Hash>;
}
