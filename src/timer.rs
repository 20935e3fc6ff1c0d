// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sync-interval timer
//!
//! Drives the periodic work of a plugin and offers an idle rendezvous
//! between ticks: a paused caller holds the loop's idle token until it
//! resumes, guaranteeing no tick runs in between. With a zero interval the
//! timer never ticks and serves purely as a pause-rendezvous stub.
//!
//! Shutdown is cooperative: an in-flight tick always runs to completion
//! before the loop observes the cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

struct PauseRequest {
    ack: oneshot::Sender<()>,
    resume: oneshot::Receiver<()>,
}

/// The loop half of the timer. Consumed by `start`.
pub struct SyncIntervalTimer {
    interval: Option<Duration>,
    pause_rx: mpsc::Receiver<PauseRequest>,
    cancel: CancellationToken,
}

/// Handle for pausing and stopping a running timer loop.
#[derive(Clone)]
pub struct SyncTimerHandle {
    pause_tx: mpsc::Sender<PauseRequest>,
    cancel: CancellationToken,
}

/// Proof that the timer loop is idle. The loop stays paused until the guard
/// is resumed or dropped.
pub struct PauseGuard {
    resume: oneshot::Sender<()>,
}

impl PauseGuard {
    /// Returns the idle token, letting the loop continue.
    pub fn resume(self) {
        let _ = self.resume.send(());
    }
}

impl SyncIntervalTimer {
    /// Creates a timer and its control handle. A zero interval yields a
    /// tickless rendezvous stub.
    pub fn new(interval: Duration) -> (SyncIntervalTimer, SyncTimerHandle) {
        let (pause_tx, pause_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let timer = SyncIntervalTimer {
            interval: (!interval.is_zero()).then_some(interval),
            pause_rx,
            cancel: cancel.clone(),
        };
        let handle = SyncTimerHandle { pause_tx, cancel };
        (timer, handle)
    }

    /// Runs the timer loop until stopped, calling `f` on every tick. Blocks
    /// the calling task for the lifetime of the loop.
    pub async fn start<F, Fut>(mut self, mut f: F)
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        match self.interval {
            None => loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    Some(req) = self.pause_rx.recv() => {
                        Self::rendezvous(req).await;
                    }
                }
            },
            Some(period) => {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // the first tick of a tokio interval fires immediately;
                // consume it so the first run happens one period from now
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        Some(req) = self.pause_rx.recv() => {
                            Self::rendezvous(req).await;
                        }
                        _ = interval.tick() => {
                            f().await;
                            // re-check shutdown before waiting out another period
                            if self.cancel.is_cancelled() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn rendezvous(req: PauseRequest) {
        if req.ack.send(()).is_ok() {
            // a dropped guard resumes the loop as well
            let _ = req.resume.await;
        }
    }
}

impl SyncTimerHandle {
    /// Waits for the currently executing tick (if any) to finish, pauses the
    /// loop and hands back its idle token.
    pub async fn pause(&self) -> Result<PauseGuard> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        self.pause_tx
            .send(PauseRequest {
                ack: ack_tx,
                resume: resume_rx,
            })
            .await
            .map_err(|_| Error::Internal("timer loop has stopped".to_string()))?;
        ack_rx
            .await
            .map_err(|_| Error::Internal("timer loop has stopped".to_string()))?;
        Ok(PauseGuard { resume: resume_tx })
    }

    /// Signals the loop to stop after the in-flight tick, if any.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
