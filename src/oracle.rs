// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Send oracles
//!
//! An oracle judges whether paying into a conditional deposit request still
//! makes sense, e.g. before a wallet funds a magnet link someone shared out
//! of band. Sources return a verdict and, when negative, a reason.

use std::sync::Arc;

use crate::clock::Clock;
use crate::deposit::Conditions;
use crate::error::Result;

/// A source contributing to the decision whether to pay into the given
/// deposit conditions.
pub trait OracleSource: Send + Sync {
    /// Returns whether sending is ok plus a message telling why not.
    fn ok(&self, conditions: &Conditions) -> Result<(bool, String)>;
}

/// Rejects conditions that are expired or expire within the configured
/// remaining-time threshold.
pub struct TimeDecider {
    clock: Arc<dyn Clock>,
    remaining_threshold: u64,
}

impl TimeDecider {
    /// `remaining_threshold` is the minimum number of seconds that must be
    /// left between now and the conditions' timeout.
    pub fn new(clock: Arc<dyn Clock>, remaining_threshold: u64) -> Self {
        Self {
            clock,
            remaining_threshold,
        }
    }
}

impl OracleSource for TimeDecider {
    fn ok(&self, conditions: &Conditions) -> Result<(bool, String)> {
        let timeout_at = match conditions.request.timeout_at {
            Some(t) => t,
            None => return Ok((false, "conditions define no timeout".to_string())),
        };
        let now = self.clock.now()?;
        if now > timeout_at {
            return Ok((
                false,
                format!(
                    "conditions expired at unix {}, it is currently {}",
                    timeout_at, now
                ),
            ));
        }
        if now + self.remaining_threshold > timeout_at {
            return Ok((
                false,
                format!(
                    "conditions expire at unix {}, within the remaining time threshold of {}s",
                    timeout_at, self.remaining_threshold
                ),
            ));
        }
        Ok((true, String::new()))
    }
}
