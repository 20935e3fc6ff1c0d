// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node API seam
//!
//! The account core drives a remote ledger node through this trait. Concrete
//! clients (JSON-RPC over HTTP, embedded test nodes) live outside the core;
//! they own signing, proof-of-work delegation and the ledger wire encoding.
//!
//! Frame ordering conventions:
//! - `prepare_transfers` returns frames in descending bundle index order,
//!   ready to be handed to `attach_to_tangle`;
//! - `attach_to_tangle` takes frames in descending order and returns the
//!   attached frames ascending, tail first.

use async_trait::async_trait;
use thiserror::Error;

use crate::seed::{Seed, SecurityLevel};
use crate::tangle::{Bundle, Hash, Trytes, HASH_TRYTES_SIZE};

/// Message the node reports when a promotion reference fell behind the
/// maximum depth. Matched as a fallback for clients that cannot map the
/// condition onto a structured error.
pub const REFERENCE_TOO_OLD_MSG: &str = "reference transaction is too old";

/// Errors raised by the node client.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The reference transaction handed to tip selection is too far behind
    /// the current tips.
    #[error("reference transaction is too old")]
    ReferenceTooOld,

    /// Any other transport, parse or remote-node error.
    #[error("node request failed: {0}")]
    Other(#[from] anyhow::Error),
}

impl NodeError {
    /// Whether this error signals a too-old promotion reference. Prefers the
    /// structured variant and falls back to the node's message text.
    pub fn is_reference_too_old(&self) -> bool {
        match self {
            NodeError::ReferenceTooOld => true,
            NodeError::Other(e) => e.to_string().contains(REFERENCE_TOO_OLD_MSG),
        }
    }
}

/// A single recipient of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Target address, 90 trytes (81 plus checksum) for recipients.
    pub address: Hash,
    pub value: u64,
    pub message: Option<Trytes>,
    pub tag: Option<Trytes>,
}

impl Transfer {
    /// A zero-value transfer to the all-`9`s address, used for promotions.
    pub fn empty() -> Transfer {
        Transfer {
            address: "9".repeat(HASH_TRYTES_SIZE),
            value: 0,
            message: None,
            tag: None,
        }
    }
}

/// An input funding a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// The input address with checksum.
    pub address: Hash,
    pub key_index: u64,
    pub balance: u64,
    pub security: SecurityLevel,
}

/// Options for `prepare_transfers`.
#[derive(Debug, Clone, Default)]
pub struct PrepareTransfersOptions {
    pub inputs: Vec<Input>,
    pub remainder_address: Option<Hash>,
    /// Unix seconds stamped into the bundle essence.
    pub timestamp: Option<u64>,
}

/// Trunk and branch returned by tip selection.
#[derive(Debug, Clone)]
pub struct TransactionsToApprove {
    pub trunk: Hash,
    pub branch: Hash,
}

/// The node RPC surface consumed by the account core.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Builds and signs a bundle transferring to `transfers`, consuming
    /// `options.inputs` and sending change to `options.remainder_address`.
    async fn prepare_transfers(
        &self,
        seed: &Seed,
        transfers: &[Transfer],
        options: &PrepareTransfersOptions,
    ) -> Result<Vec<Trytes>, NodeError>;

    /// Tip selection. With `reference`, the random walk must keep the
    /// referenced transaction in its past cone.
    async fn get_transactions_to_approve(
        &self,
        depth: u64,
        reference: Option<&Hash>,
    ) -> Result<TransactionsToApprove, NodeError>;

    /// Proof-of-work over the given frames.
    async fn attach_to_tangle(
        &self,
        trunk: &Hash,
        branch: &Hash,
        mwm: u64,
        trytes: &[Trytes],
    ) -> Result<Vec<Trytes>, NodeError>;

    /// Stores and gossips the attached frames.
    async fn store_and_broadcast(&self, trytes: &[Trytes]) -> Result<(), NodeError>;

    /// Fetches the full bundle identified by its tail transaction.
    async fn get_bundle(&self, tail: &Hash) -> Result<Bundle, NodeError>;

    /// Fetches every bundle referencing any of the given addresses,
    /// optionally resolving inclusion states onto the transactions.
    async fn get_bundles_from_addresses(
        &self,
        addrs: &[Hash],
        inclusion_states: bool,
    ) -> Result<Vec<Bundle>, NodeError>;

    /// Confirmation state per tail, against the latest milestone.
    async fn get_latest_inclusion(&self, tails: &[Hash]) -> Result<Vec<bool>, NodeError>;

    /// Balances of the given addresses as seen by `tip`.
    async fn get_balances(
        &self,
        addrs: &[Hash],
        threshold: u64,
        tip: &Hash,
    ) -> Result<Vec<u64>, NodeError>;

    /// The latest solid subtangle milestone, used to pin a consistent view
    /// for balance queries.
    async fn get_latest_solid_subtangle_milestone(&self) -> Result<Hash, NodeError>;

    /// The node's judgment whether the given tail could still be confirmed,
    /// plus an informational message when it cannot.
    async fn check_consistency(&self, tail: &Hash) -> Result<(bool, String), NodeError>;

    /// Raw frames for the given transaction hashes.
    async fn get_trytes(&self, hashes: &[Hash]) -> Result<Vec<Trytes>, NodeError>;
}
