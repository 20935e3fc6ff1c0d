// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Account module for a ledger with probabilistic confirmation semantics.
//!
//! An [`account::Account`] keeps one seed's state consistent with the remote
//! ledger: it selects inputs from conditional deposit requests, builds and
//! broadcasts transfers, and runs background plugins which poll for
//! confirmations and deposits and keep pending bundles promotable. State is
//! persisted through a pluggable [`store::Store`]; the remote node is
//! reached through [`node::NodeApi`].

pub mod account;
pub mod clock;
pub mod deposit;
pub mod error;
pub mod events;
pub mod input;
pub mod node;
pub mod oracle;
pub mod plugins;
pub mod seed;
pub mod settings;
pub mod store;
pub mod tangle;
pub mod timer;

#[cfg(test)]
mod tests;

pub use account::{Account, Recipient};
pub use error::{Error, Result};
pub use settings::AccountBuilder;
