// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Account state store
//!
//! One record per account identifier: the monotonic key index, the active
//! conditional deposit requests and the pending transfers with their known
//! tail hashes. Every trait operation is atomic at its own granularity;
//! `add_pending_transfer` is the critical one, inserting the transfer and
//! freeing its consumed inputs in a single step.
//!
//! Clients of the store must assume another actor removed a pending transfer
//! since their last read: `add_tail_hash` reports
//! `StoreError::PendingTransferNotFound` instead of re-creating the record.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deposit::Request;
use crate::error::Result;
use crate::seed::SecurityLevel;
use crate::tangle::{
    pad_trytes, transactions_from_trytes, Bundle, Hash, Trytes, TRANSACTION_TRYTES_SIZE,
};

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account not found")]
    AccountNotFound,

    /// The referenced pending transfer no longer exists; it may have been
    /// confirmed and removed concurrently.
    #[error("pending transfer not found")]
    PendingTransferNotFound,

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// A deposit request as kept in the store, together with the security level
/// its address was derived with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDepositRequest {
    pub security_level: SecurityLevel,
    #[serde(flatten)]
    pub request: Request,
}

/// A transfer that has been broadcast but not yet confirmed.
///
/// `bundle` holds the attached frames in ascending bundle order, compressed
/// by trimming the trailing `9` filler per frame. `tails` is append-only and
/// ordered oldest to newest; the first element doubles as the record's key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub bundle: Vec<Trytes>,
    pub tails: Vec<Hash>,
}

/// Compresses attached bundle frames into a pending transfer record.
/// The caller appends the origin tail hash.
pub fn trytes_to_pending_transfer(bundle_trytes: &[Trytes]) -> PendingTransfer {
    PendingTransfer {
        bundle: bundle_trytes
            .iter()
            .map(|t| t.trim_end_matches('9').to_string())
            .collect(),
        tails: Vec::new(),
    }
}

/// Reconstructs the bundle of a pending transfer by padding each frame back
/// to its full width and parsing it.
pub fn pending_transfer_to_bundle(pt: &PendingTransfer) -> Result<Bundle> {
    let frames = pt
        .bundle
        .iter()
        .map(|t| pad_trytes(t, TRANSACTION_TRYTES_SIZE))
        .collect::<Result<Vec<_>>>()?;
    transactions_from_trytes(&frames)
}

/// The full persisted state of one account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub key_index: u64,
    #[serde(default)]
    pub deposit_requests: HashMap<u64, StoredDepositRequest>,
    #[serde(default)]
    pub pending_transfers: HashMap<Hash, PendingTransfer>,
}

impl AccountState {
    /// Whether this account has never issued a key index nor holds any
    /// requests or transfers.
    pub fn is_new(&self) -> bool {
        self.key_index == 0
            && self.deposit_requests.is_empty()
            && self.pending_transfers.is_empty()
    }
}

/// Persists account states. Implementations may use optimistic concurrency
/// or per-account locking; each method must be atomic on its own.
#[async_trait]
pub trait Store: Send + Sync {
    /// Loads the state for `id`, creating an empty record if none exists.
    async fn load_account(&self, id: &str) -> Result<AccountState, StoreError>;

    /// Removes the record for `id`. Errors with `AccountNotFound` if absent.
    async fn remove_account(&self, id: &str) -> Result<(), StoreError>;

    /// Reads the current key index.
    async fn read_index(&self, id: &str) -> Result<u64, StoreError>;

    /// Writes the key index. The value must never decrease.
    async fn write_index(&self, id: &str, index: u64) -> Result<(), StoreError>;

    async fn add_deposit_request(
        &self,
        id: &str,
        index: u64,
        request: &StoredDepositRequest,
    ) -> Result<(), StoreError>;

    async fn remove_deposit_request(&self, id: &str, index: u64) -> Result<(), StoreError>;

    async fn get_deposit_requests(
        &self,
        id: &str,
    ) -> Result<HashMap<u64, StoredDepositRequest>, StoreError>;

    /// Inserts the pending transfer keyed by its origin tail hash and
    /// removes the deposit requests consumed as inputs, in one atomic step.
    async fn add_pending_transfer(
        &self,
        id: &str,
        origin_tail: &str,
        bundle_trytes: &[Trytes],
        remove_indices: &[u64],
    ) -> Result<(), StoreError>;

    async fn remove_pending_transfer(&self, id: &str, origin_tail: &str)
        -> Result<(), StoreError>;

    /// Appends a new tail hash to the transfer's tail list. Errors with
    /// `PendingTransferNotFound` if the transfer no longer exists.
    async fn add_tail_hash(
        &self,
        id: &str,
        origin_tail: &str,
        new_tail: &str,
    ) -> Result<(), StoreError>;

    async fn get_pending_transfers(
        &self,
        id: &str,
    ) -> Result<HashMap<Hash, PendingTransfer>, StoreError>;
}
