// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transfer poller plugin
//!
//! On every tick the poller checks the inclusion state of all pending
//! transfers and classifies ledger activity on the account's own deposit
//! addresses. The outgoing and incoming checks run concurrently; they work
//! on independent data. Errors abort the affected check for the tick only,
//! the next tick starts from scratch.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{stop_runtime, AccountHandle, Plugin, PluginRuntime};
use crate::error::Result;
use crate::events::{AccountEvent, EventMachine};
use crate::node::NodeApi;
use crate::seed::{AddressGenerator, SeedProvider};
use crate::store::{pending_transfer_to_bundle, PendingTransfer, Store, StoredDepositRequest};
use crate::tangle::{is_value_bundle, tail_transaction, validate_bundle, Bundle, Hash};
use crate::timer::SyncIntervalTimer;

pub const POLLER_PLUGIN_NAME: &str = "transfer-poller";

/// Filters the bundles fetched for the account's deposit addresses and
/// emits the appropriate receive events. Filters are stateful across ticks.
pub trait ReceiveEventFilter: Send {
    fn apply(
        &mut self,
        events: &dyn EventMachine,
        bundles: &[Bundle],
        own_deposit_addrs: &HashSet<Hash>,
        own_spent_addrs: &HashSet<Hash>,
    );
}

/// The default receive filter, deduplicating by tail transaction hash.
///
/// With `skip_first` the first application emits nothing; on startup the
/// ledger history is considered already seen.
pub struct PerTailReceiveEventFilter {
    receiving: HashSet<Hash>,
    received: HashSet<Hash>,
    skip_first: bool,
}

impl PerTailReceiveEventFilter {
    pub fn new(skip_first: bool) -> Self {
        Self {
            receiving: HashSet::new(),
            received: HashSet::new(),
            skip_first,
        }
    }
}

impl ReceiveEventFilter for PerTailReceiveEventFilter {
    fn apply(
        &mut self,
        events: &dyn EventMachine,
        bundles: &[Bundle],
        own_deposit_addrs: &HashSet<Hash>,
        own_spent_addrs: &HashSet<Hash>,
    ) {
        let mut receiving_bundles: HashMap<Hash, &Bundle> = HashMap::new();
        let mut received_bundles: HashMap<Hash, &Bundle> = HashMap::new();

        for bundle in bundles {
            if validate_bundle(bundle).is_err() {
                continue;
            }
            // transfers to own remainder addresses spend from an own spent
            // address; value transfers spending a deposit address are our
            // own sends, not deposits
            let is_transfer_to_own_remainder = bundle
                .iter()
                .any(|tx| tx.value < 0 && own_spent_addrs.contains(&tx.address));
            let is_spend_from_own_addr = bundle
                .iter()
                .any(|tx| tx.value < 0 && own_deposit_addrs.contains(&tx.address));
            if is_transfer_to_own_remainder || is_spend_from_own_addr {
                continue;
            }
            let tail = match tail_transaction(bundle) {
                Some(tail) => tail,
                None => continue,
            };
            if tail.persistence.unwrap_or(false) {
                received_bundles.insert(tail.hash.clone(), bundle);
            } else {
                receiving_bundles.insert(tail.hash.clone(), bundle);
            }
        }

        let mut out: Vec<AccountEvent> = Vec::new();

        for (tail_hash, bundle) in receiving_bundles {
            if self.receiving.contains(&tail_hash) {
                continue;
            }
            self.receiving.insert(tail_hash);
            if is_value_bundle(bundle) {
                out.push(AccountEvent::ReceivingDeposit((*bundle).clone()));
            } else {
                out.push(AccountEvent::ReceivedMessage((*bundle).clone()));
            }
        }

        for (tail_hash, bundle) in received_bundles {
            if self.received.contains(&tail_hash) {
                continue;
            }
            let seen_receiving = self.receiving.contains(&tail_hash);
            self.received.insert(tail_hash);
            if is_value_bundle(bundle) {
                out.push(AccountEvent::ReceivedDeposit((*bundle).clone()));
                continue;
            }
            // a confirmed message bundle whose receiving was already
            // announced stays silent
            if !seen_receiving {
                out.push(AccountEvent::ReceivedMessage((*bundle).clone()));
            }
        }

        if self.skip_first {
            self.skip_first = false;
            return;
        }
        for event in out {
            events.emit(event);
        }
    }
}

/// Periodically detects confirmations of outgoing transfers and deposits to
/// the account's addresses.
pub struct TransferPoller {
    worker: Arc<PollerWorker>,
    interval: Duration,
    runtime: Mutex<Option<PluginRuntime>>,
}

struct PollerWorker {
    api: Arc<dyn NodeApi>,
    store: Arc<dyn Store>,
    events: Arc<dyn EventMachine>,
    seed_provider: Arc<dyn SeedProvider>,
    address_generator: Arc<dyn AddressGenerator>,
    filter: Mutex<Box<dyn ReceiveEventFilter>>,
}

impl TransferPoller {
    pub fn new(
        api: Arc<dyn NodeApi>,
        store: Arc<dyn Store>,
        events: Arc<dyn EventMachine>,
        seed_provider: Arc<dyn SeedProvider>,
        address_generator: Arc<dyn AddressGenerator>,
        filter: Box<dyn ReceiveEventFilter>,
        interval: Duration,
    ) -> Self {
        Self {
            worker: Arc::new(PollerWorker {
                api,
                store,
                events,
                seed_provider,
                address_generator,
                filter: Mutex::new(filter),
            }),
            interval,
            runtime: Mutex::new(None),
        }
    }

    /// Awaits the current polling tick (if any), pauses the task, runs one
    /// tick inline, then resumes the periodic task.
    pub async fn manual_poll(&self) -> Result<()> {
        let (timer, account) = {
            let runtime = self.runtime.lock().await;
            match runtime.as_ref() {
                Some(rt) => (rt.timer.clone(), rt.account.clone()),
                None => return Ok(()),
            }
        };
        let guard = timer.pause().await?;
        self.worker.poll_transfers(account.id()).await;
        guard.resume();
        Ok(())
    }
}

#[async_trait]
impl Plugin for TransferPoller {
    fn name(&self) -> &'static str {
        POLLER_PLUGIN_NAME
    }

    async fn start(&self, account: AccountHandle) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Ok(());
        }
        let (timer, handle) = SyncIntervalTimer::new(self.interval);
        let worker = self.worker.clone();
        let acc = account.clone();
        let task = tokio::spawn(async move {
            timer
                .start(move || {
                    let worker = worker.clone();
                    let acc = acc.clone();
                    async move { worker.poll_transfers(acc.id()).await }
                })
                .await;
        });
        *runtime = Some(PluginRuntime {
            timer: handle,
            task,
            account,
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        stop_runtime(&self.runtime).await
    }
}

impl PollerWorker {
    fn emit_error(&self, context: &str, err: &dyn Display) {
        warn!("[Poller] {}: {}", context, err);
        self.events
            .emit(AccountEvent::Error(format!("{}: {}", context, err)));
    }

    async fn poll_transfers(&self, id: &str) {
        let pending = match self.store.get_pending_transfers(id).await {
            Ok(pending) => pending,
            Err(e) => {
                self.emit_error("unable to load pending transfers for polling transfers", &e);
                return;
            }
        };
        let requests = match self.store.get_deposit_requests(id).await {
            Ok(requests) => requests,
            Err(e) => {
                self.emit_error("unable to load deposit requests for polling transfers", &e);
                return;
            }
        };

        tokio::join!(
            self.check_outgoing_transfers(id, &pending),
            self.check_incoming_transfers(&requests, &pending),
        );
    }

    async fn check_outgoing_transfers(&self, id: &str, pending: &HashMap<Hash, PendingTransfer>) {
        for (origin_tail, transfer) in pending {
            if transfer.tails.is_empty() {
                continue;
            }
            let states = match self.api.get_latest_inclusion(&transfer.tails).await {
                Ok(states) => states,
                Err(e) => {
                    self.emit_error("unable to check latest inclusion state", &e);
                    return;
                }
            };
            // the first confirmed tail wins; the other reattachments are
            // orphaned on the ledger and irrelevant
            for (i, confirmed) in states.iter().enumerate() {
                if !*confirmed {
                    continue;
                }
                let bundle = match self.api.get_bundle(&transfer.tails[i]).await {
                    Ok(bundle) => bundle,
                    Err(e) => {
                        self.emit_error("unable to get confirmed bundle", &e);
                        return;
                    }
                };
                self.events.emit(AccountEvent::TransferConfirmed(bundle));
                if let Err(e) = self.store.remove_pending_transfer(id, origin_tail).await {
                    self.emit_error("unable to remove confirmed transfer from store", &e);
                    return;
                }
                debug!(
                    "[Poller] transfer {} confirmed by tail {}",
                    origin_tail, transfer.tails[i]
                );
                break;
            }
        }
    }

    async fn check_incoming_transfers(
        &self,
        requests: &HashMap<u64, StoredDepositRequest>,
        pending: &HashMap<Hash, PendingTransfer>,
    ) {
        if requests.is_empty() {
            return;
        }
        let seed = match self.seed_provider.seed() {
            Ok(seed) => seed,
            Err(e) => {
                self.emit_error("unable to get seed for incoming transfers check", &e);
                return;
            }
        };

        let mut deposit_addrs: HashSet<Hash> = HashSet::new();
        let mut query: Vec<Hash> = Vec::with_capacity(requests.len());
        for (key_index, stored) in requests {
            let addr = match self.address_generator.generate(
                &seed,
                *key_index,
                stored.security_level,
                false,
            ) {
                Ok(addr) => addr,
                Err(e) => {
                    self.emit_error("unable to compute deposit address", &e);
                    return;
                }
            };
            deposit_addrs.insert(addr.clone());
            query.push(addr);
        }

        // our own input addresses across all pending transfers; deposits
        // into them are our own remainders
        let mut spent_addrs: HashSet<Hash> = HashSet::new();
        for transfer in pending.values() {
            let bundle = match pending_transfer_to_bundle(transfer) {
                Ok(bundle) => bundle,
                Err(e) => {
                    self.emit_error("unable to reconstruct pending transfer bundle", &e);
                    return;
                }
            };
            for tx in &bundle {
                if tx.value < 0 {
                    spent_addrs.insert(tx.address.clone());
                }
            }
        }

        let bundles = match self.api.get_bundles_from_addresses(&query, true).await {
            Ok(bundles) => bundles,
            Err(e) => {
                self.emit_error("unable to fetch bundles from deposit addresses", &e);
                return;
            }
        };

        let mut filter = self.filter.lock().await;
        filter.apply(
            self.events.as_ref(),
            &bundles,
            &deposit_addrs,
            &spent_addrs,
        );
    }
}
