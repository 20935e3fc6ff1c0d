// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios across the façade, the poller and the promoter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::broadcast;

use super::mock::{
    address_with_checksum, hash_of, mock_address, MockAddressGenerator, MockNode,
};
use super::drain;
use crate::account::{Account, Recipient};
use crate::clock::FixedClock;
use crate::deposit::Request;
use crate::error::Error;
use crate::events::{AccountEvent, BroadcastEventMachine};
use crate::input::DefaultInputSelection;
use crate::plugins::poller::{PerTailReceiveEventFilter, TransferPoller};
use crate::plugins::promoter::Promoter;
use crate::plugins::{AccountHandle, Plugin};
use crate::seed::{InMemorySeedProvider, Seed, SecurityLevel};
use crate::settings::{AccountBuilder, Settings};
use crate::store::memory::MemoryStore;
use crate::store::{
    AccountState, PendingTransfer, Store, StoreError, StoredDepositRequest,
};
use crate::tangle::{Hash, Transaction, Trytes};

const NOW: u64 = 1_000_000;

fn seed() -> Seed {
    Seed::from_trytes("9".repeat(81)).unwrap()
}

fn funded_request(expected: Option<u64>, timeout_at: Option<u64>) -> StoredDepositRequest {
    StoredDepositRequest {
        security_level: SecurityLevel::Medium,
        request: Request {
            timeout_at,
            multi_use: false,
            expected_amount: expected,
        },
    }
}

struct TestEnv {
    node: Arc<MockNode>,
    store: Arc<MemoryStore>,
    rx: broadcast::Receiver<AccountEvent>,
    account: Account,
}

fn build_account_with_store(store: Arc<dyn Store>) -> (Arc<MockNode>, broadcast::Receiver<AccountEvent>, Account) {
    let node = Arc::new(MockNode::new());
    let events = Arc::new(BroadcastEventMachine::new(64));
    let rx = events.subscribe();
    let account = AccountBuilder::new()
        .with_api(node.clone())
        .with_store(store)
        .with_seed_provider(Arc::new(InMemorySeedProvider::new(seed())))
        .with_address_generator(Arc::new(MockAddressGenerator))
        .with_clock(Arc::new(FixedClock(NOW)))
        .with_events(events)
        .build()
        .unwrap();
    (node, rx, account)
}

fn build_account() -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let (node, rx, account) = build_account_with_store(store.clone());
    TestEnv {
        node,
        store,
        rx,
        account,
    }
}

async fn state_of(store: &MemoryStore, account: &Account) -> AccountState {
    store.load_account(account.id()).await.unwrap()
}

#[tokio::test]
async fn test_zero_value_send() {
    let mut env = build_account();
    env.account.start().await.unwrap();

    let bundle = env
        .account
        .send(vec![Recipient {
            address: address_with_checksum("RECEIVER"),
            value: 0,
            message: None,
            tag: None,
        }])
        .await
        .unwrap();

    assert_eq!(bundle.len(), 1);
    let tail_hash = bundle[0].hash.clone();
    let state = state_of(&env.store, &env.account).await;
    assert_eq!(state.key_index, 0);
    assert!(state.deposit_requests.is_empty());
    assert_eq!(state.pending_transfers.len(), 1);
    assert_eq!(
        state.pending_transfers[&tail_hash].tails,
        vec![tail_hash.clone()]
    );

    let events = drain(&mut env.rx);
    let sending = events
        .iter()
        .filter(|e| matches!(e, AccountEvent::SendingTransfer(_)))
        .count();
    assert_eq!(sending, 1);
    assert_eq!(env.node.broadcast_count(), 1);
}

#[tokio::test]
async fn test_funded_send_with_change() {
    let mut env = build_account();
    let id = env.account.id().to_string();
    env.store.load_account(&id).await.unwrap();
    env.store
        .add_deposit_request(&id, 1, &funded_request(Some(100), Some(NOW + 1_000_000)))
        .await
        .unwrap();
    env.store
        .add_deposit_request(&id, 2, &funded_request(Some(50), Some(NOW + 1_000_000)))
        .await
        .unwrap();
    env.store.write_index(&id, 2).await.unwrap();
    env.node.set_balance(&mock_address(1, true), 100);
    env.node.set_balance(&mock_address(2, true), 50);

    env.account.start().await.unwrap();
    let bundle = env
        .account
        .send(vec![Recipient {
            address: address_with_checksum("RECEIVER"),
            value: 120,
            message: None,
            tag: None,
        }])
        .await
        .unwrap();

    // recipient, two inputs, remainder
    assert_eq!(bundle.len(), 4);
    let state = state_of(&env.store, &env.account).await;
    assert_eq!(state.key_index, 3);
    assert_eq!(state.deposit_requests.len(), 1);
    let remainder = &state.deposit_requests[&3];
    assert_eq!(remainder.request.timeout_at, None);
    assert_eq!(remainder.request.expected_amount, Some(30));
    assert_eq!(state.pending_transfers.len(), 1);

    let events = drain(&mut env.rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, AccountEvent::SendingTransfer(_))));
}

#[tokio::test]
async fn test_send_insufficient_balance() {
    let mut env = build_account();
    let id = env.account.id().to_string();
    env.store.load_account(&id).await.unwrap();
    env.store
        .add_deposit_request(&id, 1, &funded_request(None, Some(NOW + 1_000_000)))
        .await
        .unwrap();
    env.store.write_index(&id, 1).await.unwrap();
    env.node.set_balance(&mock_address(1, true), 10);

    env.account.start().await.unwrap();
    let err = env
        .account
        .send(vec![Recipient {
            address: address_with_checksum("RECEIVER"),
            value: 100,
            message: None,
            tag: None,
        }])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientBalance { .. }));

    // nothing changed, nothing was broadcast
    let state = state_of(&env.store, &env.account).await;
    assert_eq!(state.deposit_requests.len(), 1);
    assert!(state.pending_transfers.is_empty());
    assert_eq!(env.node.broadcast_count(), 0);
    assert!(drain(&mut env.rx).is_empty());
}

#[tokio::test]
async fn test_account_requires_start() {
    let env = build_account();
    assert!(matches!(
        env.account.send(vec![]).await,
        Err(Error::AccountNotRunning)
    ));
    assert!(matches!(
        env.account.available_balance().await,
        Err(Error::AccountNotRunning)
    ));
    assert!(matches!(
        env.account.shutdown().await,
        Err(Error::AccountNotRunning)
    ));
}

#[tokio::test]
async fn test_send_validates_recipients() {
    let env = build_account();
    env.account.start().await.unwrap();
    assert!(matches!(
        env.account.send(vec![]).await,
        Err(Error::EmptyRecipients)
    ));
    let err = env
        .account
        .send(vec![Recipient {
            address: hash_of("TOOSHORT"),
            value: 0,
            message: None,
            tag: None,
        }])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)));
}

#[tokio::test]
async fn test_allocate_deposit_request() {
    let mut env = build_account();
    env.account.start().await.unwrap();

    assert!(matches!(
        env.account
            .allocate_deposit_request(&Request::default())
            .await,
        Err(Error::TimeoutNotSpecified)
    ));
    assert!(matches!(
        env.account
            .allocate_deposit_request(&Request {
                timeout_at: Some(NOW + 100),
                ..Request::default()
            })
            .await,
        Err(Error::TimeoutTooLow)
    ));

    let conditions = env
        .account
        .allocate_deposit_request(&Request {
            timeout_at: Some(NOW + 1_000),
            multi_use: false,
            expected_amount: Some(500),
        })
        .await
        .unwrap();
    assert_eq!(conditions.address, mock_address(1, true));

    let state = state_of(&env.store, &env.account).await;
    assert_eq!(state.key_index, 1);
    assert_eq!(
        state.deposit_requests[&1].request.expected_amount,
        Some(500)
    );
    assert!(drain(&mut env.rx).is_empty());
}

#[tokio::test]
async fn test_is_new_flips_after_allocation() {
    let env = build_account();
    env.account.start().await.unwrap();
    assert!(env.account.is_new().await.unwrap());
    env.account
        .allocate_deposit_request(&Request {
            timeout_at: Some(NOW + 1_000),
            ..Request::default()
        })
        .await
        .unwrap();
    assert!(!env.account.is_new().await.unwrap());
}

#[tokio::test]
async fn test_balances() {
    let env = build_account();
    let id = env.account.id().to_string();
    env.store.load_account(&id).await.unwrap();
    // fulfilled request, counted by both views
    env.store
        .add_deposit_request(&id, 1, &funded_request(Some(100), Some(NOW + 1_000_000)))
        .await
        .unwrap();
    // unfulfilled expected amount: total only
    env.store
        .add_deposit_request(&id, 2, &funded_request(Some(500), Some(NOW + 1_000_000)))
        .await
        .unwrap();
    env.store.write_index(&id, 2).await.unwrap();
    env.node.set_balance(&mock_address(1, true), 100);
    env.node.set_balance(&mock_address(2, true), 70);

    env.account.start().await.unwrap();
    assert_eq!(env.account.available_balance().await.unwrap(), 100);
    assert_eq!(env.account.total_balance().await.unwrap(), 170);
}

#[tokio::test]
async fn test_shutdown_emits_event_once() {
    let mut env = build_account();
    env.account.start().await.unwrap();
    env.account.shutdown().await.unwrap();
    let events = drain(&mut env.rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, AccountEvent::Shutdown))
            .count(),
        1
    );
    assert!(matches!(
        env.account.shutdown().await,
        Err(Error::AccountNotRunning)
    ));
}

#[tokio::test]
async fn test_update_settings_swaps_record() {
    let env = build_account();
    env.account.start().await.unwrap();

    let node = Arc::new(MockNode::new());
    let settings = Settings {
        api: node.clone(),
        store: env.store.clone(),
        seed_provider: Arc::new(InMemorySeedProvider::new(seed())),
        address_generator: Arc::new(MockAddressGenerator),
        clock: Arc::new(FixedClock(NOW)),
        events: Arc::new(BroadcastEventMachine::new(8)),
        input_selection: Arc::new(DefaultInputSelection),
        mwm: 9,
        depth: 2,
        security_level: SecurityLevel::Medium,
        plugins: HashMap::new(),
    };
    env.account.update_settings(settings).await.unwrap();

    // sends now run against the swapped node client
    env.account
        .send(vec![Recipient {
            address: address_with_checksum("RECEIVER"),
            value: 0,
            message: None,
            tag: None,
        }])
        .await
        .unwrap();
    assert_eq!(node.broadcast_count(), 1);
    assert_eq!(env.node.broadcast_count(), 0);
}

/// Store wrapper failing the commit, simulating a crash between
/// proof-of-work and the pending-transfer commit.
struct FailingCommitStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl Store for FailingCommitStore {
    async fn load_account(&self, id: &str) -> Result<AccountState, StoreError> {
        self.inner.load_account(id).await
    }
    async fn remove_account(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove_account(id).await
    }
    async fn read_index(&self, id: &str) -> Result<u64, StoreError> {
        self.inner.read_index(id).await
    }
    async fn write_index(&self, id: &str, index: u64) -> Result<(), StoreError> {
        self.inner.write_index(id, index).await
    }
    async fn add_deposit_request(
        &self,
        id: &str,
        index: u64,
        request: &StoredDepositRequest,
    ) -> Result<(), StoreError> {
        self.inner.add_deposit_request(id, index, request).await
    }
    async fn remove_deposit_request(&self, id: &str, index: u64) -> Result<(), StoreError> {
        self.inner.remove_deposit_request(id, index).await
    }
    async fn get_deposit_requests(
        &self,
        id: &str,
    ) -> Result<HashMap<u64, StoredDepositRequest>, StoreError> {
        self.inner.get_deposit_requests(id).await
    }
    async fn add_pending_transfer(
        &self,
        _id: &str,
        _origin_tail: &str,
        _bundle_trytes: &[Trytes],
        _remove_indices: &[u64],
    ) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow!("simulated crash before commit")))
    }
    async fn remove_pending_transfer(
        &self,
        id: &str,
        origin_tail: &str,
    ) -> Result<(), StoreError> {
        self.inner.remove_pending_transfer(id, origin_tail).await
    }
    async fn add_tail_hash(
        &self,
        id: &str,
        origin_tail: &str,
        new_tail: &str,
    ) -> Result<(), StoreError> {
        self.inner.add_tail_hash(id, origin_tail, new_tail).await
    }
    async fn get_pending_transfers(
        &self,
        id: &str,
    ) -> Result<HashMap<Hash, PendingTransfer>, StoreError> {
        self.inner.get_pending_transfers(id).await
    }
}

#[tokio::test]
async fn test_failed_commit_keeps_inputs_and_frees_remainder() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(FailingCommitStore {
        inner: inner.clone(),
    });
    let (node, mut rx, account) = build_account_with_store(store);
    let id = account.id().to_string();
    inner.load_account(&id).await.unwrap();
    inner
        .add_deposit_request(&id, 1, &funded_request(Some(100), Some(NOW + 1_000_000)))
        .await
        .unwrap();
    inner
        .add_deposit_request(&id, 2, &funded_request(Some(50), Some(NOW + 1_000_000)))
        .await
        .unwrap();
    inner.write_index(&id, 2).await.unwrap();
    node.set_balance(&mock_address(1, true), 100);
    node.set_balance(&mock_address(2, true), 50);

    account.start().await.unwrap();
    let err = account
        .send(vec![Recipient {
            address: address_with_checksum("RECEIVER"),
            value: 120,
            message: None,
            tag: None,
        }])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    let state = inner.load_account(&id).await.unwrap();
    // no input marked for removal has been removed
    assert!(state.deposit_requests.contains_key(&1));
    assert!(state.deposit_requests.contains_key(&2));
    // the allocated remainder request was cleaned up again; its key index
    // remains as a gap
    assert!(!state.deposit_requests.contains_key(&3));
    assert_eq!(state.key_index, 3);
    assert!(state.pending_transfers.is_empty());
    assert_eq!(node.broadcast_count(), 0);
    // cleanup succeeded, so no error event was emitted
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_broadcast_failure_after_commit_keeps_transfer() {
    let mut env = build_account();
    env.node.set_fail_broadcast(true);
    env.account.start().await.unwrap();

    let err = env
        .account
        .send(vec![Recipient {
            address: address_with_checksum("RECEIVER"),
            value: 0,
            message: None,
            tag: None,
        }])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Node(_)));

    // the transfer is durable; the background plugins will finish the job
    let state = state_of(&env.store, &env.account).await;
    assert_eq!(state.pending_transfers.len(), 1);
    let events = drain(&mut env.rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, AccountEvent::SendingTransfer(_))));
}

fn promoter_setup() -> (
    Arc<MockNode>,
    Arc<MemoryStore>,
    broadcast::Receiver<AccountEvent>,
    Promoter,
) {
    let node = Arc::new(MockNode::new());
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(BroadcastEventMachine::new(64));
    let rx = events.subscribe();
    let promoter = Promoter::new(
        node.clone(),
        store.clone(),
        events,
        Arc::new(FixedClock(NOW)),
        Duration::from_secs(3_600),
        3,
        14,
    );
    (node, store, rx, promoter)
}

fn pending_tail_tx(label: &str, bundle_label: &str, age_secs: u64) -> Transaction {
    Transaction {
        hash: hash_of(label),
        address: hash_of("DEST"),
        value: 0,
        timestamp: NOW - age_secs,
        current_index: 0,
        last_index: 0,
        bundle: hash_of(bundle_label),
        ..Transaction::default()
    }
}

#[tokio::test]
async fn test_promotion_path() {
    let (node, store, mut rx, promoter) = promoter_setup();
    let id = "acc";
    store.load_account(id).await.unwrap();

    // sole tail: consistent and two minutes old
    let tail = pending_tail_tx("TAILA", "BNDLA", 120);
    let frames = vec![tail.to_trytes().unwrap()];
    store
        .add_pending_transfer(id, &tail.hash, &frames, &[])
        .await
        .unwrap();
    node.set_consistent(&tail.hash);
    node.register_transaction(tail.clone());

    promoter.start(AccountHandle::new(id)).await.unwrap();
    promoter.manual_poll().await.unwrap();
    promoter.shutdown().await.unwrap();

    let events = drain(&mut rx);
    let promotions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AccountEvent::Promotion(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(promotions.len(), 1);
    assert_eq!(promotions[0].origin_tail, tail.hash);
    assert_eq!(promotions[0].bundle_hash, hash_of("BNDLA"));
    assert!(promotions[0].promotion_tail.is_some());
    assert!(!events
        .iter()
        .any(|e| matches!(e, AccountEvent::Reattachment(_) | AccountEvent::Error(_))));

    // promotion does not append tails
    let transfers = store.get_pending_transfers(id).await.unwrap();
    assert_eq!(transfers[&tail.hash].tails.len(), 1);
}

#[tokio::test]
async fn test_reattachment_path() {
    let (node, store, mut rx, promoter) = promoter_setup();
    let id = "acc";
    store.load_account(id).await.unwrap();

    // sole tail is inconsistent, forcing a reattachment
    let tail = pending_tail_tx("TAILB", "BNDLB", 120);
    let frames = vec![tail.to_trytes().unwrap()];
    store
        .add_pending_transfer(id, &tail.hash, &frames, &[])
        .await
        .unwrap();
    node.register_transaction(tail.clone());

    promoter.start(AccountHandle::new(id)).await.unwrap();
    promoter.manual_poll().await.unwrap();
    promoter.shutdown().await.unwrap();

    let events = drain(&mut rx);
    let kinds: Vec<&AccountEvent> = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                AccountEvent::Reattachment(_) | AccountEvent::Promotion(_)
            )
        })
        .collect();
    assert_eq!(kinds.len(), 2);
    assert!(matches!(kinds[0], AccountEvent::Reattachment(_)));
    assert!(matches!(kinds[1], AccountEvent::Promotion(_)));

    let transfers = store.get_pending_transfers(id).await.unwrap();
    let tails = &transfers[&tail.hash].tails;
    assert_eq!(tails.len(), 2);
    assert_eq!(tails[0], tail.hash);
    if let AccountEvent::Reattachment(r) = kinds[0] {
        assert_eq!(r.reattachment_tail.as_ref(), Some(&tails[1]));
        assert_eq!(r.origin_tail, tail.hash);
    }
}

#[tokio::test]
async fn test_unpromotable_tail() {
    let (node, store, mut rx, promoter) = promoter_setup();
    let id = "acc";
    store.load_account(id).await.unwrap();

    let tail = pending_tail_tx("TAILC", "BNDLC", 60);
    let frames = vec![tail.to_trytes().unwrap()];
    store
        .add_pending_transfer(id, &tail.hash, &frames, &[])
        .await
        .unwrap();
    node.set_consistent(&tail.hash);
    node.register_transaction(tail.clone());
    node.set_reference_always_too_old(true);

    promoter.start(AccountHandle::new(id)).await.unwrap();
    promoter.manual_poll().await.unwrap();
    promoter.shutdown().await.unwrap();

    let events = drain(&mut rx);
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AccountEvent::Error(msg) => Some(msg.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("not promotable"));
    assert!(!events
        .iter()
        .any(|e| matches!(e, AccountEvent::Promotion(_) | AccountEvent::Reattachment(_))));

    // the pending transfer is untouched
    let transfers = store.get_pending_transfers(id).await.unwrap();
    assert_eq!(transfers[&tail.hash].tails.len(), 1);
}

/// Store wrapper whose `add_tail_hash` races a concurrent confirmation: the
/// transfer vanishes right before the append.
struct ConfirmingStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl Store for ConfirmingStore {
    async fn load_account(&self, id: &str) -> Result<AccountState, StoreError> {
        self.inner.load_account(id).await
    }
    async fn remove_account(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove_account(id).await
    }
    async fn read_index(&self, id: &str) -> Result<u64, StoreError> {
        self.inner.read_index(id).await
    }
    async fn write_index(&self, id: &str, index: u64) -> Result<(), StoreError> {
        self.inner.write_index(id, index).await
    }
    async fn add_deposit_request(
        &self,
        id: &str,
        index: u64,
        request: &StoredDepositRequest,
    ) -> Result<(), StoreError> {
        self.inner.add_deposit_request(id, index, request).await
    }
    async fn remove_deposit_request(&self, id: &str, index: u64) -> Result<(), StoreError> {
        self.inner.remove_deposit_request(id, index).await
    }
    async fn get_deposit_requests(
        &self,
        id: &str,
    ) -> Result<HashMap<u64, StoredDepositRequest>, StoreError> {
        self.inner.get_deposit_requests(id).await
    }
    async fn add_pending_transfer(
        &self,
        id: &str,
        origin_tail: &str,
        bundle_trytes: &[Trytes],
        remove_indices: &[u64],
    ) -> Result<(), StoreError> {
        self.inner
            .add_pending_transfer(id, origin_tail, bundle_trytes, remove_indices)
            .await
    }
    async fn remove_pending_transfer(
        &self,
        id: &str,
        origin_tail: &str,
    ) -> Result<(), StoreError> {
        self.inner.remove_pending_transfer(id, origin_tail).await
    }
    async fn add_tail_hash(
        &self,
        id: &str,
        origin_tail: &str,
        new_tail: &str,
    ) -> Result<(), StoreError> {
        self.inner.remove_pending_transfer(id, origin_tail).await?;
        self.inner.add_tail_hash(id, origin_tail, new_tail).await
    }
    async fn get_pending_transfers(
        &self,
        id: &str,
    ) -> Result<HashMap<Hash, PendingTransfer>, StoreError> {
        self.inner.get_pending_transfers(id).await
    }
}

#[tokio::test]
async fn test_confirmation_race_treated_as_success() {
    let node = Arc::new(MockNode::new());
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(ConfirmingStore {
        inner: inner.clone(),
    });
    let events = Arc::new(BroadcastEventMachine::new(64));
    let mut rx = events.subscribe();
    let promoter = Promoter::new(
        node.clone(),
        store,
        events,
        Arc::new(FixedClock(NOW)),
        Duration::from_secs(3_600),
        3,
        14,
    );
    let id = "acc";
    inner.load_account(id).await.unwrap();
    let tail = pending_tail_tx("TAILD", "BNDLD", 120);
    let frames = vec![tail.to_trytes().unwrap()];
    inner
        .add_pending_transfer(id, &tail.hash, &frames, &[])
        .await
        .unwrap();
    node.register_transaction(tail.clone());

    promoter.start(AccountHandle::new(id)).await.unwrap();
    promoter.manual_poll().await.unwrap();
    promoter.shutdown().await.unwrap();

    // reattachment happened, then the poller's confirmation won the race:
    // no promotion, no error
    let events = drain(&mut rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, AccountEvent::Reattachment(_)))
            .count(),
        1
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, AccountEvent::Promotion(_) | AccountEvent::Error(_))));
    assert!(inner
        .get_pending_transfers(id)
        .await
        .unwrap()
        .is_empty());
}

fn poller_setup() -> (
    Arc<MockNode>,
    Arc<MemoryStore>,
    broadcast::Receiver<AccountEvent>,
    TransferPoller,
) {
    let node = Arc::new(MockNode::new());
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(BroadcastEventMachine::new(64));
    let rx = events.subscribe();
    let poller = TransferPoller::new(
        node.clone(),
        store.clone(),
        events,
        Arc::new(InMemorySeedProvider::new(seed())),
        Arc::new(MockAddressGenerator),
        Box::new(PerTailReceiveEventFilter::new(false)),
        Duration::from_secs(3_600),
    );
    (node, store, rx, poller)
}

#[tokio::test]
async fn test_poller_confirms_outgoing_transfer() {
    let (node, store, mut rx, poller) = poller_setup();
    let id = "acc";
    store.load_account(id).await.unwrap();

    let tail = pending_tail_tx("TAILE", "BNDLE", 30);
    let frames = vec![tail.to_trytes().unwrap()];
    store
        .add_pending_transfer(id, &tail.hash, &frames, &[])
        .await
        .unwrap();
    node.register_bundle(vec![tail.clone()]);
    node.confirm(&tail.hash);

    poller.start(AccountHandle::new(id)).await.unwrap();
    poller.manual_poll().await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, AccountEvent::TransferConfirmed(_)))
            .count(),
        1
    );
    assert!(store.get_pending_transfers(id).await.unwrap().is_empty());

    // idempotence: a tick against an unchanged ledger emits nothing
    poller.manual_poll().await.unwrap();
    poller.shutdown().await.unwrap();
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_poller_detects_incoming_deposit() {
    let (node, store, mut rx, poller) = poller_setup();
    let id = "acc";
    store.load_account(id).await.unwrap();
    store
        .add_deposit_request(&id, 1, &funded_request(Some(100), Some(NOW + 1_000_000)))
        .await
        .unwrap();
    store.write_index(id, 1).await.unwrap();

    let deposit_addr = mock_address(1, false);
    let incoming = vec![
        Transaction {
            hash: hash_of("TAILIN"),
            address: deposit_addr.clone(),
            value: 100,
            current_index: 0,
            last_index: 1,
            bundle: hash_of("BNDLIN"),
            persistence: Some(false),
            ..Transaction::default()
        },
        Transaction {
            hash: hash_of("TXIN"),
            address: hash_of("SENDER"),
            value: -100,
            current_index: 1,
            last_index: 1,
            bundle: hash_of("BNDLIN"),
            ..Transaction::default()
        },
    ];
    node.add_address_bundle(&deposit_addr, incoming);

    poller.start(AccountHandle::new(id)).await.unwrap();
    poller.manual_poll().await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, AccountEvent::ReceivingDeposit(_)))
            .count(),
        1
    );

    // unchanged ledger, no duplicate events
    poller.manual_poll().await.unwrap();
    poller.shutdown().await.unwrap();
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_poller_ignores_own_remainder_transfer() {
    let (node, store, mut rx, poller) = poller_setup();
    let id = "acc";
    store.load_account(id).await.unwrap();
    store
        .add_deposit_request(&id, 1, &funded_request(Some(100), Some(NOW + 1_000_000)))
        .await
        .unwrap();
    store.write_index(id, 1).await.unwrap();

    // a pending transfer spending from SPENT
    let spend = Transaction {
        hash: hash_of("TAILSPEND"),
        address: hash_of("SPENT"),
        value: -100,
        current_index: 0,
        last_index: 0,
        bundle: hash_of("BNDLSPEND"),
        ..Transaction::default()
    };
    store
        .add_pending_transfer(id, &spend.hash, &[spend.to_trytes().unwrap()], &[])
        .await
        .unwrap();

    // an incoming bundle whose input is SPENT: our own remainder coming back
    let deposit_addr = mock_address(1, false);
    let remainder_back = vec![
        Transaction {
            hash: hash_of("TAILREM"),
            address: deposit_addr.clone(),
            value: 100,
            current_index: 0,
            last_index: 1,
            bundle: hash_of("BNDLREM"),
            persistence: Some(false),
            ..Transaction::default()
        },
        Transaction {
            hash: hash_of("TXREM"),
            address: hash_of("SPENT"),
            value: -100,
            current_index: 1,
            last_index: 1,
            bundle: hash_of("BNDLREM"),
            ..Transaction::default()
        },
    ];
    node.add_address_bundle(&deposit_addr, remainder_back);

    poller.start(AccountHandle::new(id)).await.unwrap();
    poller.manual_poll().await.unwrap();
    poller.shutdown().await.unwrap();

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(
        e,
        AccountEvent::ReceivingDeposit(_)
            | AccountEvent::ReceivedDeposit(_)
            | AccountEvent::ReceivedMessage(_)
    )));
}
