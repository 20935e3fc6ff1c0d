// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Crate-level tests driving the account, poller and promoter against a
//! scripted mock node and the in-memory store.

mod scenarios;

use tokio::sync::broadcast;

use crate::events::AccountEvent;

/// Collects every event emitted so far.
pub(crate) fn drain(rx: &mut broadcast::Receiver<AccountEvent>) -> Vec<AccountEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
