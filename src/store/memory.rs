// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory reference store
//!
//! Keeps every account record under a single read/write lock, which gives
//! each store operation per-process atomicity for free. Useful as the
//! default back-end and as the reference semantics for durable back-ends.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    trytes_to_pending_transfer, AccountState, PendingTransfer, Store, StoreError,
    StoredDepositRequest,
};
use crate::tangle::{Hash, Trytes};

/// In-memory account store.
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, AccountState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_account(&self, id: &str) -> Result<AccountState, StoreError> {
        let mut accounts = self.accounts.write().await;
        Ok(accounts.entry(id.to_string()).or_default().clone())
    }

    async fn remove_account(&self, id: &str) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        accounts
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::AccountNotFound)
    }

    async fn read_index(&self, id: &str) -> Result<u64, StoreError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(id)
            .map(|state| state.key_index)
            .ok_or(StoreError::AccountNotFound)
    }

    async fn write_index(&self, id: &str, index: u64) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.get_mut(id).ok_or(StoreError::AccountNotFound)?;
        if index < state.key_index {
            return Err(StoreError::Backend(anyhow!(
                "key index must not decrease: {} < {}",
                index,
                state.key_index
            )));
        }
        state.key_index = index;
        Ok(())
    }

    async fn add_deposit_request(
        &self,
        id: &str,
        index: u64,
        request: &StoredDepositRequest,
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.get_mut(id).ok_or(StoreError::AccountNotFound)?;
        state.deposit_requests.insert(index, request.clone());
        Ok(())
    }

    async fn remove_deposit_request(&self, id: &str, index: u64) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.get_mut(id).ok_or(StoreError::AccountNotFound)?;
        state.deposit_requests.remove(&index);
        Ok(())
    }

    async fn get_deposit_requests(
        &self,
        id: &str,
    ) -> Result<HashMap<u64, StoredDepositRequest>, StoreError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(id)
            .map(|state| state.deposit_requests.clone())
            .ok_or(StoreError::AccountNotFound)
    }

    async fn add_pending_transfer(
        &self,
        id: &str,
        origin_tail: &str,
        bundle_trytes: &[Trytes],
        remove_indices: &[u64],
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.get_mut(id).ok_or(StoreError::AccountNotFound)?;
        let mut transfer = trytes_to_pending_transfer(bundle_trytes);
        transfer.tails.push(origin_tail.to_string());
        state
            .pending_transfers
            .insert(origin_tail.to_string(), transfer);
        for index in remove_indices {
            state.deposit_requests.remove(index);
        }
        Ok(())
    }

    async fn remove_pending_transfer(
        &self,
        id: &str,
        origin_tail: &str,
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.get_mut(id).ok_or(StoreError::AccountNotFound)?;
        state.pending_transfers.remove(origin_tail);
        Ok(())
    }

    async fn add_tail_hash(
        &self,
        id: &str,
        origin_tail: &str,
        new_tail: &str,
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.get_mut(id).ok_or(StoreError::AccountNotFound)?;
        let transfer = state
            .pending_transfers
            .get_mut(origin_tail)
            .ok_or(StoreError::PendingTransferNotFound)?;
        if !transfer.tails.iter().any(|t| t == new_tail) {
            transfer.tails.push(new_tail.to_string());
        }
        Ok(())
    }

    async fn get_pending_transfers(
        &self,
        id: &str,
    ) -> Result<HashMap<Hash, PendingTransfer>, StoreError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(id)
            .map(|state| state.pending_transfers.clone())
            .ok_or(StoreError::AccountNotFound)
    }
}
