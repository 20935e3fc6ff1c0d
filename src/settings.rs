// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Account settings and builder
//!
//! A settings record bundles every collaborator of an account: node client,
//! store, seed provider, address generator, clock, event machine, input
//! selection strategy and the plugin set. `UpdateSettings` swaps the whole
//! record at a plugin-quiescent point, so a record is never observed torn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::account::Account;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::events::{DiscardEventMachine, EventMachine};
use crate::input::{DefaultInputSelection, InputSelection};
use crate::node::NodeApi;
use crate::plugins::poller::{PerTailReceiveEventFilter, TransferPoller};
use crate::plugins::promoter::Promoter;
use crate::plugins::Plugin;
use crate::seed::{AddressGenerator, SecurityLevel, SeedProvider};
use crate::store::Store;

/// Default minimum weight magnitude for proof-of-work.
pub const DEFAULT_MWM: u64 = 14;
/// Default tip-selection depth.
pub const DEFAULT_DEPTH: u64 = 3;
/// Default interval of the poller and promoter plugins.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Settings used by an account.
#[derive(Clone)]
pub struct Settings {
    pub api: Arc<dyn NodeApi>,
    pub store: Arc<dyn Store>,
    pub seed_provider: Arc<dyn SeedProvider>,
    pub address_generator: Arc<dyn AddressGenerator>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventMachine>,
    pub input_selection: Arc<dyn InputSelection>,
    pub mwm: u64,
    pub depth: u64,
    /// Must not change over the lifetime of an account; create a fresh
    /// account (and seed) for a different level instead.
    pub security_level: SecurityLevel,
    pub plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl Settings {
    /// Snapshot of the service handles handed to operations and strategies.
    pub(crate) fn ctx(&self, id: &str) -> AccountCtx {
        AccountCtx {
            id: id.to_string(),
            api: self.api.clone(),
            store: self.store.clone(),
            seed_provider: self.seed_provider.clone(),
            address_generator: self.address_generator.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            security_level: self.security_level,
            mwm: self.mwm,
            depth: self.depth,
        }
    }
}

/// The per-operation view of an account's collaborators, as consumed by the
/// send pipeline and input selection strategies.
#[derive(Clone)]
pub struct AccountCtx {
    pub id: String,
    pub api: Arc<dyn NodeApi>,
    pub store: Arc<dyn Store>,
    pub seed_provider: Arc<dyn SeedProvider>,
    pub address_generator: Arc<dyn AddressGenerator>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventMachine>,
    pub security_level: SecurityLevel,
    pub mwm: u64,
    pub depth: u64,
}

/// Fluent builder assembling the settings of an account.
pub struct AccountBuilder {
    api: Option<Arc<dyn NodeApi>>,
    store: Option<Arc<dyn Store>>,
    seed_provider: Option<Arc<dyn SeedProvider>>,
    address_generator: Option<Arc<dyn AddressGenerator>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventMachine>,
    input_selection: Arc<dyn InputSelection>,
    mwm: u64,
    depth: u64,
    security_level: SecurityLevel,
    plugins: HashMap<String, Arc<dyn Plugin>>,
    default_plugins: bool,
}

impl Default for AccountBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountBuilder {
    pub fn new() -> Self {
        Self {
            api: None,
            store: None,
            seed_provider: None,
            address_generator: None,
            clock: Arc::new(SystemClock),
            events: Arc::new(DiscardEventMachine),
            input_selection: Arc::new(DefaultInputSelection),
            mwm: DEFAULT_MWM,
            depth: DEFAULT_DEPTH,
            security_level: SecurityLevel::default(),
            plugins: HashMap::new(),
            default_plugins: false,
        }
    }

    /// Sets the node client to use.
    pub fn with_api(mut self, api: Arc<dyn NodeApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Sets the store back-end to use.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the seed provider to use.
    pub fn with_seed_provider(mut self, provider: Arc<dyn SeedProvider>) -> Self {
        self.seed_provider = Some(provider);
        self
    }

    /// Sets the address derivation backend to use.
    pub fn with_address_generator(mut self, generator: Arc<dyn AddressGenerator>) -> Self {
        self.address_generator = Some(generator);
        self
    }

    /// Sets the minimum weight magnitude used to send transactions.
    pub fn with_mwm(mut self, mwm: u64) -> Self {
        self.mwm = mwm;
        self
    }

    /// Sets the depth used when searching for transactions to approve.
    pub fn with_depth(mut self, depth: u64) -> Self {
        self.depth = depth;
        self
    }

    /// Sets the security level of the account.
    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    /// Sets the clock used to get time information.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the strategy determining inputs and usable balance.
    pub fn with_input_selection(mut self, strategy: Arc<dyn InputSelection>) -> Self {
        self.input_selection = strategy;
        self
    }

    /// Instructs the account to emit events through the given machine.
    pub fn with_events(mut self, events: Arc<dyn EventMachine>) -> Self {
        self.events = events;
        self
    }

    /// Adds a plugin, keyed by its name.
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.insert(plugin.name().to_string(), plugin);
        self
    }

    /// Adds the transfer poller (per-tail receive filter, first pass
    /// suppressed) and the promoter-reattacher, both at the default 30s
    /// interval, next to any custom plugins. Accounts built without any
    /// plugin get these by default.
    pub fn with_default_plugins(mut self) -> Self {
        self.default_plugins = true;
        self
    }

    /// Builds the settings and the account from them. The store defaults to
    /// the in-memory back-end.
    pub fn build(self) -> Result<Account> {
        let api = self.api.ok_or(Error::MissingSetting("api"))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(crate::store::memory::MemoryStore::new()));
        let seed_provider = self
            .seed_provider
            .ok_or(Error::MissingSetting("seed_provider"))?;
        let address_generator = self
            .address_generator
            .ok_or(Error::MissingSetting("address_generator"))?;

        let mut plugins = self.plugins;
        if self.default_plugins || plugins.is_empty() {
            let poller: Arc<dyn Plugin> = Arc::new(TransferPoller::new(
                api.clone(),
                store.clone(),
                self.events.clone(),
                seed_provider.clone(),
                address_generator.clone(),
                Box::new(PerTailReceiveEventFilter::new(true)),
                DEFAULT_SYNC_INTERVAL,
            ));
            let promoter: Arc<dyn Plugin> = Arc::new(Promoter::new(
                api.clone(),
                store.clone(),
                self.events.clone(),
                self.clock.clone(),
                DEFAULT_SYNC_INTERVAL,
                self.depth,
                self.mwm,
            ));
            plugins.insert(poller.name().to_string(), poller);
            plugins.insert(promoter.name().to_string(), promoter);
        }

        let settings = Settings {
            api,
            store,
            seed_provider,
            address_generator,
            clock: self.clock,
            events: self.events,
            input_selection: self.input_selection,
            mwm: self.mwm,
            depth: self.depth,
            security_level: self.security_level,
            plugins,
        };
        Account::new(settings)
    }
}
