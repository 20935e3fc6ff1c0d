// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Time sources
//!
//! All timestamps in the account core are unix seconds. The clock is a seam
//! so tests and NTP-backed deployments can inject their own notion of now.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// A source of the current unix time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<u64>;
}

/// System UTC clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| Error::Internal(format!("system time before unix epoch: {}", e)))
    }
}

/// A clock pinned to a fixed instant, mainly for tests.
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now(&self) -> Result<u64> {
        Ok(self.0)
    }
}
