// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Account error taxonomy
//!
//! Validation and business errors are returned to callers. Backend errors
//! raised inside background plugins are surfaced as `Error` events instead;
//! the loops themselves never abort.

use thiserror::Error;

use crate::node::NodeError;
use crate::store::StoreError;

/// Result type for account operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the account core
#[derive(Debug, Error)]
pub enum Error {
    #[error("account is not running")]
    AccountNotRunning,

    #[error("no recipients specified for the transfer")]
    EmptyRecipients,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid seed")]
    InvalidSeed,

    #[error("deposit request defines no timeout")]
    TimeoutNotSpecified,

    #[error("deposit request timeout is below the minimum allowed window")]
    TimeoutTooLow,

    #[error("insufficient balance: want {wanted}, have {available}")]
    InsufficientBalance { wanted: u64, available: u64 },

    #[error("tail transaction is not promotable")]
    UnpromotableTail,

    #[error("missing account setting: {0}")]
    MissingSetting(&'static str),

    #[error("invalid trytes: {0}")]
    InvalidTrytes(String),

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("invalid magnet link: {0}")]
    InvalidMagnetLink(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
