// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Input selection
//!
//! Chooses inputs for a transfer out of the account's conditional deposit
//! requests, honouring their rules: remainder and fulfilled requests are the
//! cheap primary bucket, timed-out requests form the secondary bucket whose
//! zero-balance members must be probed for incoming consistent transfers
//! before they may be freed from the store. All balance queries are pinned
//! to one solid subtangle milestone.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::node::Input;
use crate::seed::SecurityLevel;
use crate::settings::AccountCtx;
use crate::tangle::{strip_checksum, Hash};

/// Outcome of an input selection run. In balance-check mode only `sum` is
/// populated.
#[derive(Debug, Clone, Default)]
pub struct SelectedInputs {
    /// The gathered balance, or the advisory balance in balance-check mode.
    pub sum: u64,
    /// Inputs funding the transfer.
    pub inputs: Vec<Input>,
    /// Key indices of deposit requests to free once the transfer commits.
    pub to_remove: Vec<u64>,
}

/// Strategy computing the inputs for a transfer, or the usable balance when
/// `balance_check` is set. Implementations must obey the conditional deposit
/// request rules to keep the account consistent.
#[async_trait]
pub trait InputSelection: Send + Sync {
    async fn select(
        &self,
        ctx: &AccountCtx,
        transfer_value: u64,
        balance_check: bool,
    ) -> Result<SelectedInputs>;
}

struct Candidate {
    key_index: u64,
    expected_amount: Option<u64>,
    security: SecurityLevel,
    address: Hash,
}

/// The default strategy: fulfilled and timed-out deposit addresses.
pub struct DefaultInputSelection;

#[async_trait]
impl InputSelection for DefaultInputSelection {
    async fn select(
        &self,
        ctx: &AccountCtx,
        transfer_value: u64,
        balance_check: bool,
    ) -> Result<SelectedInputs> {
        let requests = ctx.store.get_deposit_requests(&ctx.id).await?;

        // no deposit requests, therefore no balance
        if requests.is_empty() {
            if balance_check {
                return Ok(SelectedInputs::default());
            }
            return Err(Error::InsufficientBalance {
                wanted: transfer_value,
                available: 0,
            });
        }

        // pin one milestone so every balance query shares the same view
        let milestone = ctx.api.get_latest_solid_subtangle_milestone().await?;
        let now = ctx.clock.now()?;
        let seed = ctx.seed_provider.seed()?;

        let mut sorted: Vec<_> = requests.into_iter().collect();
        sorted.sort_by_key(|(index, _)| *index);

        // primary requests are tried first; timed-out requests go secondary
        // because probing them for incoming transfers is expensive
        let mut primary: Vec<Candidate> = Vec::new();
        let mut secondary: Vec<Candidate> = Vec::new();
        for (key_index, stored) in sorted {
            let request = &stored.request;
            let timed_out = match request.timeout_at {
                None => {
                    if request.expected_amount.is_none() {
                        return Err(Error::Internal(format!(
                            "remainder request at index {} without expected amount",
                            key_index
                        )));
                    }
                    false
                }
                Some(timeout_at) => now > timeout_at,
            };
            // multi-use requests without an expected amount are only usable
            // once timed out
            if !timed_out
                && request.timeout_at.is_some()
                && request.multi_use
                && request.expected_amount.is_none()
            {
                continue;
            }
            let address =
                ctx.address_generator
                    .generate(&seed, key_index, stored.security_level, true)?;
            let candidate = Candidate {
                key_index,
                expected_amount: request.expected_amount,
                security: stored.security_level,
                address,
            };
            if timed_out {
                secondary.push(candidate);
            } else {
                primary.push(candidate);
            }
        }

        let mut query: Vec<Hash> = Vec::with_capacity(primary.len() + secondary.len());
        query.extend(primary.iter().map(|c| c.address.clone()));
        query.extend(secondary.iter().map(|c| c.address.clone()));
        let balances = ctx.api.get_balances(&query, 100, &milestone).await?;
        if balances.len() != query.len() {
            return Err(Error::Internal(format!(
                "balance response covers {} of {} addresses",
                balances.len(),
                query.len()
            )));
        }

        let mut sum: u64 = 0;
        let mut inputs: Vec<Input> = Vec::new();
        let mut to_remove: Vec<u64> = Vec::new();

        for (i, candidate) in primary.iter().enumerate() {
            let balance = balances[i];
            // skip addresses whose expected amount is not reached yet
            if let Some(expected) = candidate.expected_amount {
                if balance < expected {
                    continue;
                }
            }
            sum += balance;
            if balance == 0 || balance_check {
                continue;
            }
            inputs.push(Input {
                address: candidate.address.clone(),
                key_index: candidate.key_index,
                balance,
                security: candidate.security,
            });
            to_remove.push(candidate.key_index);
            if sum >= transfer_value {
                break;
            }
        }

        // primary addresses could not fund the transfer, pull in the
        // timed-out ones
        if sum < transfer_value || balance_check {
            for (i, candidate) in secondary.iter().enumerate() {
                let balance = balances[primary.len() + i];
                if balance == 0 {
                    if balance_check {
                        continue;
                    }
                    // a timed-out empty address may still see a consistent
                    // incoming transfer; keep its request in that case
                    match has_incoming_consistent_value_transfer(
                        ctx,
                        strip_checksum(&candidate.address),
                    )
                    .await
                    {
                        Ok(false) => to_remove.push(candidate.key_index),
                        Ok(true) | Err(_) => {}
                    }
                    continue;
                }
                sum += balance;
                if balance_check {
                    continue;
                }
                to_remove.push(candidate.key_index);
                inputs.push(Input {
                    address: candidate.address.clone(),
                    key_index: candidate.key_index,
                    balance,
                    security: candidate.security,
                });
                if sum >= transfer_value {
                    break;
                }
            }
        }

        if balance_check {
            return Ok(SelectedInputs {
                sum,
                ..Default::default()
            });
        }

        if sum < transfer_value {
            return Err(Error::InsufficientBalance {
                wanted: transfer_value,
                available: sum,
            });
        }

        Ok(SelectedInputs {
            sum,
            inputs,
            to_remove,
        })
    }
}

/// Whether at least one unconfirmed but consistent bundle deposits a
/// positive value onto `addr`. Reattachments of already confirmed bundles
/// are ignored by bundle hash.
pub(crate) async fn has_incoming_consistent_value_transfer(
    ctx: &AccountCtx,
    addr: &str,
) -> Result<bool> {
    let bundles = ctx
        .api
        .get_bundles_from_addresses(&[addr.to_string()], true)
        .await?;
    let mut persisted: HashSet<Hash> = HashSet::new();
    for bundle in &bundles {
        let head = match bundle.first() {
            Some(tx) => tx,
            None => continue,
        };
        if head.persistence.unwrap_or(false) {
            persisted.insert(head.bundle.clone());
            continue;
        }
        // skip reattachments of an already confirmed bundle
        if persisted.contains(&head.bundle) {
            continue;
        }
        let deposits_to_addr = bundle.iter().any(|tx| tx.value > 0 && tx.address == addr);
        if !deposits_to_addr {
            continue;
        }
        let (consistent, _) = ctx.api.check_consistency(&head.hash).await?;
        if consistent {
            return Ok(true);
        }
    }
    Ok(false)
}
