// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Account façade
//!
//! A thread-safe object encapsulating address management, input selection
//! and the send pipeline for one seed. External operations are serialised
//! behind a read/write lock; the background plugins run on their own tasks
//! and meet the façade at the store.
//!
//! The send pipeline's durability point is the atomic
//! `add_pending_transfer` commit: everything before it is fail-fast, a
//! broadcast failure after it is reported to the caller but the poller and
//! promoter will drive the already-persisted transfer to completion.

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::deposit::{Conditions, Request};
use crate::error::{Error, Result};
use crate::events::AccountEvent;
use crate::input::InputSelection;
use crate::node::{PrepareTransfersOptions, Transfer};
use crate::plugins::AccountHandle;
use crate::seed::account_id;
use crate::settings::{AccountCtx, Settings};
use crate::store::StoredDepositRequest;
use crate::tangle::{
    is_address_with_checksum, strip_checksum, transactions_from_trytes, Bundle, Hash, Transaction,
};

/// A single recipient of a send operation.
pub type Recipient = Transfer;

/// Minimum time between now and a requested deposit timeout, in seconds.
const ALLOCATE_TIMEOUT_LEEWAY: u64 = 5 * 60;

/// A long-lived account bound to one seed.
pub struct Account {
    id: String,
    inner: RwLock<Inner>,
}

struct Inner {
    running: bool,
    settings: Settings,
    last_key_index: u64,
}

impl Account {
    /// Creates the account for the seed supplied by the settings' seed
    /// provider. The account is inert until `start` is called.
    pub fn new(settings: Settings) -> Result<Account> {
        let seed = settings.seed_provider.seed()?;
        Ok(Account {
            id: account_id(&seed),
            inner: RwLock::new(Inner {
                running: false,
                settings,
                last_key_index: 0,
            }),
        })
    }

    /// The account's identifier: hex digest of the hashed seed.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Loads the persisted state and starts all plugins.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner.settings.store.load_account(&self.id).await?;
        inner.last_key_index = state.key_index;

        let handle = AccountHandle::new(&self.id);
        for plugin in inner.settings.plugins.values() {
            plugin.start(handle.clone()).await?;
        }
        inner.running = true;
        info!("[Account] {} started", self.id);
        Ok(())
    }

    /// Cleanly shuts the account down, draining every plugin's in-flight
    /// tick before returning.
    pub async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.running {
            return Err(Error::AccountNotRunning);
        }
        inner.running = false;
        shutdown_plugins(&inner.settings).await?;
        inner.settings.events.emit(AccountEvent::Shutdown);
        info!("[Account] {} shut down", self.id);
        Ok(())
    }

    /// Swaps the settings record. All plugins are shut down first, so no
    /// plugin tick ever observes a torn record, then restarted from the new
    /// settings.
    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.running {
            return Err(Error::AccountNotRunning);
        }
        shutdown_plugins(&inner.settings).await?;
        inner.settings = settings;
        let handle = AccountHandle::new(&self.id);
        for plugin in inner.settings.plugins.values() {
            plugin.start(handle.clone()).await?;
        }
        Ok(())
    }

    /// Sends the given amounts to the recipients, selecting inputs from the
    /// account's deposit requests and allocating a remainder address for any
    /// change.
    pub async fn send(&self, recipients: Vec<Recipient>) -> Result<Bundle> {
        let mut inner = self.inner.write().await;
        if !inner.running {
            return Err(Error::AccountNotRunning);
        }
        if recipients.is_empty() {
            return Err(Error::EmptyRecipients);
        }
        for recipient in &recipients {
            if !is_address_with_checksum(&recipient.address) {
                return Err(Error::InvalidAddress(recipient.address.clone()));
            }
        }

        let ctx = inner.settings.ctx(&self.id);
        let input_selection = inner.settings.input_selection.clone();
        let mut remainder: Option<Hash> = None;
        let result = send_inner(
            &ctx,
            input_selection.as_ref(),
            &mut inner.last_key_index,
            &recipients,
            &mut remainder,
        )
        .await;

        // the send failed before its commit point: free the remainder
        // request again, best effort
        if result.is_err() {
            if let Some(address) = &remainder {
                cleanup_remainder(&ctx, address).await;
            }
        }
        result
    }

    /// Allocates a new conditional deposit request. The timeout must be set
    /// and lie comfortably in the future.
    pub async fn allocate_deposit_request(&self, request: &Request) -> Result<Conditions> {
        let mut inner = self.inner.write().await;
        if !inner.running {
            return Err(Error::AccountNotRunning);
        }
        let timeout_at = request.timeout_at.ok_or(Error::TimeoutNotSpecified)?;
        let ctx = inner.settings.ctx(&self.id);
        let now = ctx.clock.now()?;
        if timeout_at.saturating_sub(ALLOCATE_TIMEOUT_LEEWAY) < now {
            return Err(Error::TimeoutTooLow);
        }
        allocate_deposit_request_inner(&ctx, &mut inner.last_key_index, request).await
    }

    /// The balance currently usable by input selection. Use
    /// `total_balance` for the funds across all allocated deposit
    /// addresses.
    pub async fn available_balance(&self) -> Result<u64> {
        let inner = self.inner.read().await;
        if !inner.running {
            return Err(Error::AccountNotRunning);
        }
        let ctx = inner.settings.ctx(&self.id);
        let selected = inner.settings.input_selection.select(&ctx, 0, true).await?;
        Ok(selected.sum)
    }

    /// The balance across all allocated deposit addresses. Not everything in
    /// it is usable for transfers; see `available_balance`.
    pub async fn total_balance(&self) -> Result<u64> {
        let inner = self.inner.read().await;
        if !inner.running {
            return Err(Error::AccountNotRunning);
        }
        let ctx = inner.settings.ctx(&self.id);
        let state = ctx.store.load_account(&self.id).await?;
        if state.deposit_requests.is_empty() {
            return Ok(0);
        }
        let milestone = ctx.api.get_latest_solid_subtangle_milestone().await?;
        let seed = ctx.seed_provider.seed()?;
        let mut addrs = Vec::with_capacity(state.deposit_requests.len());
        for (key_index, stored) in &state.deposit_requests {
            addrs.push(ctx.address_generator.generate(
                &seed,
                *key_index,
                stored.security_level,
                true,
            )?);
        }
        let balances = ctx.api.get_balances(&addrs, 100, &milestone).await?;
        Ok(balances.iter().sum())
    }

    /// Whether the account has never issued an address or transfer.
    pub async fn is_new(&self) -> Result<bool> {
        let inner = self.inner.read().await;
        if !inner.running {
            return Err(Error::AccountNotRunning);
        }
        let state = inner.settings.store.load_account(&self.id).await?;
        Ok(state.is_new())
    }
}

async fn shutdown_plugins(settings: &Settings) -> Result<()> {
    for plugin in settings.plugins.values() {
        plugin.shutdown().await.map_err(|e| {
            Error::Internal(format!(
                "unable to shutdown plugin {}: {}",
                plugin.name(),
                e
            ))
        })?;
    }
    Ok(())
}

async fn send_inner(
    ctx: &AccountCtx,
    input_selection: &dyn InputSelection,
    last_key_index: &mut u64,
    recipients: &[Recipient],
    remainder: &mut Option<Hash>,
) -> Result<Bundle> {
    let transfer_sum: u64 = recipients.iter().map(|r| r.value).sum();
    let now = ctx.clock.now()?;
    let seed = ctx.seed_provider.seed()?;

    let mut inputs = Vec::new();
    let mut for_removal: Vec<u64> = Vec::new();
    if transfer_sum > 0 {
        let selected = input_selection.select(ctx, transfer_sum, false).await?;
        inputs = selected.inputs;
        for_removal = selected.to_remove;

        // route any surplus into a freshly allocated remainder request
        if selected.sum > transfer_sum {
            let surplus = selected.sum - transfer_sum;
            let conditions = allocate_deposit_request_inner(
                ctx,
                last_key_index,
                &Request {
                    timeout_at: None,
                    multi_use: false,
                    expected_amount: Some(surplus),
                },
            )
            .await?;
            *remainder = Some(conditions.address);
        }
    }

    let options = PrepareTransfersOptions {
        inputs,
        remainder_address: remainder.clone(),
        timestamp: Some(now),
    };
    let prepared = ctx.api.prepare_transfers(&seed, recipients, &options).await?;
    let tips = ctx.api.get_transactions_to_approve(ctx.depth, None).await?;
    let powed = ctx
        .api
        .attach_to_tangle(&tips.trunk, &tips.branch, ctx.mwm, &prepared)
        .await?;
    let tail_frame = powed
        .first()
        .ok_or_else(|| Error::Internal("attach returned an empty bundle".to_string()))?;
    let tail = Transaction::from_trytes(tail_frame)?;

    // commit: record the pending transfer and free the consumed inputs in
    // one atomic store operation
    ctx.store
        .add_pending_transfer(&ctx.id, &tail.hash, &powed, &for_removal)
        .await?;
    remainder.take();

    let bundle = transactions_from_trytes(&powed)?;
    ctx.api.store_and_broadcast(&powed).await?;

    ctx.events
        .emit(AccountEvent::SendingTransfer(bundle.clone()));
    info!("[Account] sent transfer, tail {}", tail.hash);
    Ok(bundle)
}

async fn allocate_deposit_request_inner(
    ctx: &AccountCtx,
    last_key_index: &mut u64,
    request: &Request,
) -> Result<Conditions> {
    let seed = ctx.seed_provider.seed()?;
    *last_key_index += 1;
    let index = *last_key_index;
    let address = ctx
        .address_generator
        .generate(&seed, index, ctx.security_level, true)?;
    // the index is persisted before the request itself; a crash in between
    // leaves a gap index, which monotonicity tolerates
    ctx.store.write_index(&ctx.id, index).await?;
    let stored = StoredDepositRequest {
        security_level: ctx.security_level,
        request: request.clone(),
    };
    ctx.store.add_deposit_request(&ctx.id, index, &stored).await?;
    Ok(Conditions {
        request: request.clone(),
        address,
    })
}

/// Locates the deposit request backing `address` by re-deriving addresses
/// and removes it. There is no reverse index; the scan is acceptable because
/// send failures after a remainder allocation are rare.
async fn cleanup_remainder(ctx: &AccountCtx, address: &Hash) {
    let emit_failure = |e: &dyn std::fmt::Display| {
        ctx.events.emit(AccountEvent::Error(format!(
            "unable to cleanup allocated remainder address during failed send: {}",
            e
        )));
    };
    let requests = match ctx.store.get_deposit_requests(&ctx.id).await {
        Ok(requests) => requests,
        Err(e) => {
            emit_failure(&e);
            return;
        }
    };
    let seed = match ctx.seed_provider.seed() {
        Ok(seed) => seed,
        Err(e) => {
            emit_failure(&e);
            return;
        }
    };
    let cropped = strip_checksum(address);
    let mut found = None;
    for (key_index, stored) in requests {
        match ctx
            .address_generator
            .generate(&seed, key_index, stored.security_level, false)
        {
            Ok(addr) if addr == cropped => {
                found = Some(key_index);
                break;
            }
            _ => continue,
        }
    }
    let key_index = match found {
        Some(key_index) => key_index,
        None => return,
    };
    if let Err(e) = ctx.store.remove_deposit_request(&ctx.id, key_index).await {
        emit_failure(&e);
        return;
    }
    debug!(
        "[Account] freed remainder request at index {} after failed send",
        key_index
    );
}
