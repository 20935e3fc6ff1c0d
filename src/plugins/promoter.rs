// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Promoter/reattacher plugin
//!
//! Keeps pending bundles reachable by tip selection. Per tick and transfer,
//! the newest consistent and recent-enough tail is promoted with a
//! zero-value bundle; failing that, the bundle is reattached under fresh
//! tips, the new tail is recorded and then promoted.
//!
//! The plugin never deletes pending transfers; confirmation handling is the
//! poller's exclusive right. When recording a reattachment tail hits
//! `PendingTransferNotFound`, the poller confirmed the transfer mid-cycle
//! and the promoter simply stops working on it for the tick.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{stop_runtime, AccountHandle, Plugin, PluginRuntime};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::{AccountEvent, EventMachine, PromotionReattachmentEvent};
use crate::node::{NodeApi, PrepareTransfersOptions, Transfer, TransactionsToApprove};
use crate::seed::Seed;
use crate::store::{pending_transfer_to_bundle, PendingTransfer, Store, StoreError};
use crate::tangle::{bundle_to_trytes, Bundle, Hash, Transaction, Trytes, HASH_TRYTES_SIZE};
use crate::timer::SyncIntervalTimer;

pub const PROMOTER_PLUGIN_NAME: &str = "promoter-reattacher";

/// Upper bound for the tip-selection depth while promoting; past it the
/// tail is unpromotable.
const MAX_DEPTH: u64 = 15;

/// A tail older than this cannot be promoted without exceeding max depth.
const APPROX_ABOVE_MAX_DEPTH_SECS: u64 = 5 * 60;

/// Periodically promotes or reattaches every pending transfer.
pub struct Promoter {
    worker: Arc<PromoterWorker>,
    interval: Duration,
    runtime: Mutex<Option<PluginRuntime>>,
}

struct PromoterWorker {
    api: Arc<dyn NodeApi>,
    store: Arc<dyn Store>,
    events: Arc<dyn EventMachine>,
    clock: Arc<dyn Clock>,
    depth: u64,
    mwm: u64,
}

impl Promoter {
    pub fn new(
        api: Arc<dyn NodeApi>,
        store: Arc<dyn Store>,
        events: Arc<dyn EventMachine>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        depth: u64,
        mwm: u64,
    ) -> Self {
        Self {
            worker: Arc::new(PromoterWorker {
                api,
                store,
                events,
                clock,
                depth,
                mwm,
            }),
            interval,
            runtime: Mutex::new(None),
        }
    }

    /// Awaits the current promotion/reattachment cycle (if any), pauses the
    /// task, runs one cycle inline, then resumes the periodic task.
    pub async fn manual_poll(&self) -> Result<()> {
        let (timer, account) = {
            let runtime = self.runtime.lock().await;
            match runtime.as_ref() {
                Some(rt) => (rt.timer.clone(), rt.account.clone()),
                None => return Ok(()),
            }
        };
        let guard = timer.pause().await?;
        self.worker.promote_transfers(account.id()).await;
        guard.resume();
        Ok(())
    }
}

#[async_trait]
impl Plugin for Promoter {
    fn name(&self) -> &'static str {
        PROMOTER_PLUGIN_NAME
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
                    async move { worker.promote_transfers(acc.id()).await }
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

impl PromoterWorker {
    fn emit_error(&self, context: &str, err: &dyn Display) {
        warn!("[Promoter] {}: {}", context, err);
        self.events
            .emit(AccountEvent::Error(format!("{}: {}", context, err)));
    }

    async fn promote_transfers(&self, id: &str) {
        let pending = match self.store.get_pending_transfers(id).await {
            Ok(pending) => pending,
            Err(e) => {
                self.emit_error("unable to load pending transfers for promotion", &e);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        for (origin_tail, transfer) in &pending {
            self.process_transfer(id, origin_tail, transfer).await;
        }
    }

    async fn process_transfer(&self, id: &str, origin_tail: &Hash, transfer: &PendingTransfer) {
        // walk the tails newest to oldest for one that is consistent and
        // still recent enough to promote
        let mut tail_to_promote: Option<Hash> = None;
        for tail in transfer.tails.iter().rev() {
            let consistent = match self.api.check_consistency(tail).await {
                Ok((consistent, _)) => consistent,
                Err(_) => continue,
            };
            if !consistent {
                continue;
            }
            let frames = match self.api.get_trytes(std::slice::from_ref(tail)).await {
                Ok(frames) => frames,
                Err(_) => continue,
            };
            let frame = match frames.first() {
                Some(frame) => frame,
                None => continue,
            };
            let tx = match Transaction::from_trytes(frame) {
                Ok(tx) => tx,
                Err(_) => continue,
            };
            if !self.recent_enough(tx.timestamp) {
                continue;
            }
            tail_to_promote = Some(tail.clone());
            break;
        }

        let bundle = match pending_transfer_to_bundle(transfer) {
            Ok(bundle) => bundle,
            Err(e) => {
                self.emit_error("unable to reconstruct pending transfer bundle", &e);
                return;
            }
        };
        let bundle_hash = match bundle.first() {
            Some(tx) => tx.bundle.clone(),
            None => {
                self.emit_error("pending transfer holds an empty bundle", &origin_tail);
                return;
            }
        };

        if let Some(tail) = tail_to_promote {
            match self.promote(&tail).await {
                Ok(promotion_tail) => {
                    debug!("[Promoter] promoted {} via {}", origin_tail, promotion_tail);
                    self.events.emit(AccountEvent::Promotion(
                        PromotionReattachmentEvent {
                            origin_tail: origin_tail.clone(),
                            bundle_hash,
                            promotion_tail: Some(promotion_tail),
                            reattachment_tail: None,
                        },
                    ));
                }
                Err(e) => self.emit_error("unable to promote", &e),
            }
            return;
        }

        let reattachment_tail = match self.reattach(&bundle).await {
            Ok(tail) => tail,
            Err(e) => {
                self.emit_error("unable to reattach", &e);
                return;
            }
        };
        debug!(
            "[Promoter] reattached {} as {}",
            origin_tail, reattachment_tail
        );
        self.events.emit(AccountEvent::Reattachment(
            PromotionReattachmentEvent {
                origin_tail: origin_tail.clone(),
                bundle_hash: bundle_hash.clone(),
                promotion_tail: None,
                reattachment_tail: Some(reattachment_tail.clone()),
            },
        ));
        match self
            .store
            .add_tail_hash(id, origin_tail, &reattachment_tail)
            .await
        {
            Ok(()) => {}
            Err(StoreError::PendingTransferNotFound) => {
                // the poller confirmed the transfer in the meantime
                debug!(
                    "[Promoter] transfer {} was confirmed concurrently",
                    origin_tail
                );
                return;
            }
            Err(e) => {
                self.emit_error("unable to store reattachment tail hash", &e);
                return;
            }
        }
        match self.promote(&reattachment_tail).await {
            Ok(promotion_tail) => {
                self.events.emit(AccountEvent::Promotion(
                    PromotionReattachmentEvent {
                        origin_tail: origin_tail.clone(),
                        bundle_hash,
                        promotion_tail: Some(promotion_tail),
                        reattachment_tail: None,
                    },
                ));
            }
            Err(e) => self.emit_error("unable to promote", &e),
        }
    }

    fn recent_enough(&self, timestamp: u64) -> bool {
        match self.clock.now() {
            Ok(now) => now.saturating_sub(timestamp) < APPROX_ABOVE_MAX_DEPTH_SECS,
            Err(_) => false,
        }
    }

    /// Promotes the given tail with a zero-value bundle referencing it,
    /// widening the tip-selection depth while the node reports the
    /// reference as too old.
    async fn promote(&self, tail: &Hash) -> Result<Hash> {
        let mut depth = self.depth;
        let tips = loop {
            match self
                .api
                .get_transactions_to_approve(depth, Some(tail))
                .await
            {
                Ok(tips) => break tips,
                Err(e) if e.is_reference_too_old() => {
                    depth += 1;
                    if depth > MAX_DEPTH {
                        return Err(Error::UnpromotableTail);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };
        let seed = Seed::from_trytes("9".repeat(HASH_TRYTES_SIZE))?;
        let transfers = [Transfer::empty()];
        let prepared = self
            .api
            .prepare_transfers(&seed, &transfers, &PrepareTransfersOptions::default())
            .await?;
        self.attach_and_broadcast(&prepared, &tips).await
    }

    /// Reattaches the bundle under fresh tips and returns the new tail.
    async fn reattach(&self, bundle: &Bundle) -> Result<Hash> {
        let tips = self.api.get_transactions_to_approve(self.depth, None).await?;
        let mut frames = bundle_to_trytes(bundle)?;
        // proof-of-work wants the highest bundle index first
        frames.reverse();
        self.attach_and_broadcast(&frames, &tips).await
    }

    async fn attach_and_broadcast(
        &self,
        frames: &[Trytes],
        tips: &TransactionsToApprove,
    ) -> Result<Hash> {
        let attached = self
            .api
            .attach_to_tangle(&tips.trunk, &tips.branch, self.mwm, frames)
            .await?;
        self.api.store_and_broadcast(&attached).await?;
        let tail_frame = attached
            .first()
            .ok_or_else(|| Error::Internal("attach returned an empty bundle".to_string()))?;
        Ok(Transaction::from_trytes(tail_frame)?.hash)
    }
}
