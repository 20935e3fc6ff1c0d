// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Conditional deposit requests
//!
//! A conditional deposit request (CDR) is a deposit address issued together
//! with a timeout, an optional expected amount and a multi-use flag. The
//! conditions serialize to a magnet link for out-of-band sharing:
//! `iota://<addressWithChecksum>/?t=<unixSeconds>&m=<bool>&am=<u64>`.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::node::Transfer;
use crate::tangle::{is_address_with_checksum, Hash};

const CONDITION_EXPIRES: &str = "t";
const CONDITION_MULTI_USE: &str = "m";
const CONDITION_AMOUNT: &str = "am";

/// A new deposit request against the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Unix time after which the deposit address becomes invalid.
    /// A request without a timeout is a remainder request; only the send
    /// pipeline creates those.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<u64>,
    /// Whether to expect multiple deposits to this address within the
    /// timeout. A single-use address is considered for input selection as
    /// soon as one deposit fulfilling the conditions is available.
    #[serde(default)]
    pub multi_use: bool,
    /// The expected deposit amount. Once the timeout is hit the address is
    /// considered for input selection regardless.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<u64>,
}

/// Conditions under which a deposit address may be funded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(flatten)]
    pub request: Request,
    pub address: Hash,
}

impl Conditions {
    /// Serializes the conditions into a magnet link URL.
    pub fn as_magnet_link(&self) -> String {
        format!(
            "iota://{}/?{}={}&{}={}&{}={}",
            self.address,
            CONDITION_EXPIRES,
            self.request.timeout_at.unwrap_or(0),
            CONDITION_MULTI_USE,
            self.request.multi_use,
            CONDITION_AMOUNT,
            self.request.expected_amount.unwrap_or(0),
        )
    }

    /// Converts the conditions into a transfer paying the expected amount
    /// (or nothing) into the deposit address.
    pub fn as_transfer(&self) -> Transfer {
        Transfer {
            address: self.address.clone(),
            value: self.request.expected_amount.unwrap_or(0),
            message: None,
            tag: None,
        }
    }
}

/// Parses a magnet link URL into deposit conditions.
pub fn parse_magnet_link(s: &str) -> Result<Conditions> {
    let link =
        Url::parse(s).map_err(|e| Error::InvalidMagnetLink(format!("unparseable URL: {}", e)))?;
    let address = link.host_str().unwrap_or_default().to_string();
    if !is_address_with_checksum(&address) {
        return Err(Error::InvalidMagnetLink(
            "address must be 90 trytes long".to_string(),
        ));
    }
    let mut timeout_at = None;
    let mut multi_use = false;
    let mut expected_amount = None;
    for (key, value) in link.query_pairs() {
        match key.as_ref() {
            CONDITION_EXPIRES => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| Error::InvalidMagnetLink("invalid expire timestamp".to_string()))?;
                timeout_at = Some(secs);
            }
            CONDITION_MULTI_USE => multi_use = value == "true",
            CONDITION_AMOUNT => {
                let amount: u64 = value
                    .parse()
                    .map_err(|_| Error::InvalidMagnetLink("invalid expected amount".to_string()))?;
                expected_amount = Some(amount);
            }
            _ => {}
        }
    }
    let timeout_at = timeout_at
        .ok_or_else(|| Error::InvalidMagnetLink("invalid expire timestamp".to_string()))?;
    let expected_amount = expected_amount
        .ok_or_else(|| Error::InvalidMagnetLink("invalid expected amount".to_string()))?;
    Ok(Conditions {
        request: Request {
            timeout_at: Some(timeout_at),
            multi_use,
            expected_amount: Some(expected_amount),
        },
        address,
    })
}
