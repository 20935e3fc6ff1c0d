// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Account event machine
//!
//! The account and its plugins emit events describing ledger activity. The
//! event machine is multi-producer/multi-consumer; emission never blocks the
//! emitting task. Listeners that fall behind lose the oldest events rather
//! than stalling the account.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::tangle::{Bundle, Hash};

/// Payload of promotion and reattachment events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionReattachmentEvent {
    /// The tail transaction hash of the first bundle broadcast to the
    /// network.
    pub origin_tail: Hash,
    /// The bundle hash of the promoted/reattached bundle.
    pub bundle_hash: Hash,
    /// The tail transaction hash of the promotion transaction, if this was
    /// a promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_tail: Option<Hash>,
    /// The tail transaction hash of the reattached bundle, if this was a
    /// reattachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reattachment_tail: Option<Hash>,
}

/// Events emitted by the account and its plugins.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    /// A transfer was built and handed to the network.
    SendingTransfer(Bundle),
    /// A pending transfer got confirmed by a milestone.
    TransferConfirmed(Bundle),
    /// A deposit to an own address is visible but unconfirmed.
    ReceivingDeposit(Bundle),
    /// A deposit to an own address got confirmed.
    ReceivedDeposit(Bundle),
    /// A zero-value bundle addressed to an own address was received.
    ReceivedMessage(Bundle),
    /// A pending transfer's tail was promoted.
    Promotion(PromotionReattachmentEvent),
    /// A pending transfer was reattached under fresh tips.
    Reattachment(PromotionReattachmentEvent),
    /// An internal error of any kind, mostly out of background tasks.
    Error(String),
    /// The account shut down cleanly. Emitted once.
    Shutdown,
}

/// Emits account events to whoever listens.
pub trait EventMachine: Send + Sync {
    fn emit(&self, event: AccountEvent);
}

/// An event machine dropping every event. The default.
pub struct DiscardEventMachine;

impl EventMachine for DiscardEventMachine {
    fn emit(&self, _event: AccountEvent) {}
}

/// Event machine fanning events out over a tokio broadcast channel.
pub struct BroadcastEventMachine {
    tx: broadcast::Sender<AccountEvent>,
}

impl BroadcastEventMachine {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Opens a new listener channel receiving every event emitted from now
    /// on.
    pub fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.tx.subscribe()
    }
}

impl EventMachine for BroadcastEventMachine {
    fn emit(&self, event: AccountEvent) {
        // a send error only means there is currently no listener
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_listeners_does_not_panic() {
        let em = BroadcastEventMachine::new(8);
        em.emit(AccountEvent::Shutdown);
    }

    #[tokio::test]
    async fn test_broadcast_fanout() {
        let em = BroadcastEventMachine::new(8);
        let mut rx_a = em.subscribe();
        let mut rx_b = em.subscribe();
        em.emit(AccountEvent::Error("boom".to_string()));
        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await.unwrap() {
                AccountEvent::Error(msg) => assert_eq!(msg, "boom"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_discard_machine() {
        DiscardEventMachine.emit(AccountEvent::Shutdown);
    }
}
