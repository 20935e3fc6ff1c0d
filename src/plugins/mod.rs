// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Account plugins
//!
//! A plugin owns one long-running background task per account, driven by a
//! `SyncIntervalTimer`. The account façade starts every configured plugin on
//! `Start` and drains them on `Shutdown`/`UpdateSettings`; a plugin's
//! in-flight tick always completes before its shutdown returns.

pub mod poller;
pub mod promoter;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::timer::SyncTimerHandle;

/// The account-side view handed to plugins on start.
#[derive(Clone)]
pub struct AccountHandle {
    id: Arc<String>,
}

impl AccountHandle {
    pub fn new(id: &str) -> Self {
        Self {
            id: Arc::new(id.to_string()),
        }
    }

    /// The identifier of the account this plugin serves.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// A component hooking into the account's lifecycle.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name of the plugin, used as its key in the settings record.
    fn name(&self) -> &'static str;

    /// Spawns the plugin's background task. Returns once the task is
    /// running.
    async fn start(&self, account: AccountHandle) -> Result<()>;

    /// Stops the background task, waiting for an in-flight tick to drain.
    async fn shutdown(&self) -> Result<()>;
}

/// Handles of a started plugin task.
pub(crate) struct PluginRuntime {
    pub timer: SyncTimerHandle,
    pub task: JoinHandle<()>,
    pub account: AccountHandle,
}

pub(crate) async fn stop_runtime(runtime: &Mutex<Option<PluginRuntime>>) -> Result<()> {
    let taken = runtime.lock().await.take();
    if let Some(rt) = taken {
        rt.timer.stop();
        rt.task
            .await
            .map_err(|e| Error::Internal(format!("plugin task failed: {}", e)))?;
    }
    Ok(())
}
