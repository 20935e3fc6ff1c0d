// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction and bundle model
//!
//! Transactions travel between the account core, the store and the node
//! client as fixed-width tryte frames over the alphabet `9A-Z`. The frame
//! layout here is an internal interchange format; the ledger's trinary wire
//! encoding is produced by the node client and is not reimplemented. All
//! numeric fields use a base-27 big-endian encoding with `9` as the zero
//! tryte, which keeps `9` as the universal filler: a frame compresses by
//! trimming trailing `9`s and reloads by padding back to the full width.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Trytes over the alphabet `9A-Z`.
pub type Trytes = String;

/// An 81-tryte hash (transaction, bundle, address or milestone).
pub type Hash = String;

/// A bundle is an ordered set of transactions, ascending by bundle index.
/// The transaction at index 0 is the tail.
pub type Bundle = Vec<Transaction>;

pub const TRYTE_ALPHABET: &[u8] = b"9ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const HASH_TRYTES_SIZE: usize = 81;
pub const ADDRESS_CHECKSUM_TRYTES_SIZE: usize = 9;
pub const ADDRESS_WITH_CHECKSUM_TRYTES_SIZE: usize =
    HASH_TRYTES_SIZE + ADDRESS_CHECKSUM_TRYTES_SIZE;
pub const TAG_TRYTES_SIZE: usize = 27;
pub const SIGNATURE_FRAGMENT_TRYTES_SIZE: usize = 2187;

/// Width of an unsigned numeric field. 27^14 exceeds u64::MAX.
pub const COUNTER_TRYTES_SIZE: usize = 14;
/// Width of the signed value field: one sign tryte plus the magnitude.
pub const VALUE_TRYTES_SIZE: usize = 1 + COUNTER_TRYTES_SIZE;

/// Total frame width. The signature/message fragment sits at the end of the
/// frame so that zero-value transactions compress to almost nothing.
pub const TRANSACTION_TRYTES_SIZE: usize = 5 * HASH_TRYTES_SIZE
    + VALUE_TRYTES_SIZE
    + 3 * COUNTER_TRYTES_SIZE
    + TAG_TRYTES_SIZE
    + SIGNATURE_FRAGMENT_TRYTES_SIZE;

/// Checks that every character of `s` is a tryte.
pub fn is_trytes(s: &str) -> bool {
    s.bytes().all(|b| b == b'9' || b.is_ascii_uppercase())
}

/// Checks that `s` is trytes of exactly `len` characters.
pub fn is_trytes_of_exact_length(s: &str, len: usize) -> bool {
    s.len() == len && is_trytes(s)
}

/// Checks that `s` is an 81-tryte hash.
pub fn is_hash(s: &str) -> bool {
    is_trytes_of_exact_length(s, HASH_TRYTES_SIZE)
}

/// Checks that `s` is a 90-tryte address (81 trytes plus checksum).
pub fn is_address_with_checksum(s: &str) -> bool {
    is_trytes_of_exact_length(s, ADDRESS_WITH_CHECKSUM_TRYTES_SIZE)
}

/// Returns the first 81 trytes of an address, dropping the checksum if one
/// is attached.
pub fn strip_checksum(addr: &str) -> &str {
    if addr.len() > HASH_TRYTES_SIZE {
        &addr[..HASH_TRYTES_SIZE]
    } else {
        addr
    }
}

/// Right-pads `s` with `9` filler up to `len`.
pub fn pad_trytes(s: &str, len: usize) -> Result<Trytes> {
    if s.len() > len {
        return Err(Error::InvalidTrytes(format!(
            "field of {} trytes exceeds width {}",
            s.len(),
            len
        )));
    }
    let mut out = String::with_capacity(len);
    out.push_str(s);
    while out.len() < len {
        out.push('9');
    }
    Ok(out)
}

fn tryte_digit(b: u8) -> Result<u64> {
    match b {
        b'9' => Ok(0),
        b'A'..=b'Z' => Ok((b - b'A') as u64 + 1),
        _ => Err(Error::InvalidTrytes(format!(
            "character {:?} is not a tryte",
            b as char
        ))),
    }
}

/// Encodes `v` as a fixed-width base-27 big-endian tryte string.
pub fn encode_u64(mut v: u64, width: usize) -> Result<Trytes> {
    let mut digits = vec![b'9'; width];
    let mut i = width;
    while v > 0 {
        if i == 0 {
            return Err(Error::InvalidTrytes(format!(
                "value does not fit into {} trytes",
                width
            )));
        }
        i -= 1;
        digits[i] = TRYTE_ALPHABET[(v % 27) as usize];
        v /= 27;
    }
    Ok(digits.into_iter().map(|b| b as char).collect())
}

/// Decodes a fixed-width base-27 big-endian tryte string.
pub fn decode_u64(s: &str) -> Result<u64> {
    let mut v: u64 = 0;
    for b in s.bytes() {
        let d = tryte_digit(b)?;
        v = v
            .checked_mul(27)
            .and_then(|v| v.checked_add(d))
            .ok_or_else(|| Error::InvalidTrytes(format!("numeric overflow in {:?}", s)))?;
    }
    Ok(v)
}

/// Encodes a signed value: a sign tryte (`9` positive, `N` negative)
/// followed by the base-27 magnitude.
pub fn encode_i64(v: i64) -> Result<Trytes> {
    let mut out = String::with_capacity(VALUE_TRYTES_SIZE);
    out.push(if v < 0 { 'N' } else { '9' });
    out.push_str(&encode_u64(v.unsigned_abs(), COUNTER_TRYTES_SIZE)?);
    Ok(out)
}

/// Decodes a signed value field.
pub fn decode_i64(s: &str) -> Result<i64> {
    let (sign, magnitude) = s.split_at(1);
    let mag = decode_u64(magnitude)?;
    if mag > i64::MAX as u64 {
        return Err(Error::InvalidTrytes(format!(
            "value magnitude overflows i64 in {:?}",
            s
        )));
    }
    match sign {
        "N" => Ok(-(mag as i64)),
        "9" => Ok(mag as i64),
        _ => Err(Error::InvalidTrytes(format!(
            "invalid sign tryte in {:?}",
            s
        ))),
    }
}

/// A single transaction of a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub address: Hash,
    pub value: i64,
    pub timestamp: u64,
    pub current_index: u64,
    pub last_index: u64,
    pub bundle: Hash,
    pub trunk: Hash,
    pub branch: Hash,
    pub tag: Trytes,
    pub signature_message_fragment: Trytes,
    /// Inclusion state as reported by the node, if it was queried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<bool>,
}

impl Transaction {
    /// Serializes the transaction into its fixed-width tryte frame.
    pub fn to_trytes(&self) -> Result<Trytes> {
        let mut out = String::with_capacity(TRANSACTION_TRYTES_SIZE);
        out.push_str(&pad_trytes(&self.hash, HASH_TRYTES_SIZE)?);
        out.push_str(&pad_trytes(&self.address, HASH_TRYTES_SIZE)?);
        out.push_str(&encode_i64(self.value)?);
        out.push_str(&encode_u64(self.timestamp, COUNTER_TRYTES_SIZE)?);
        out.push_str(&encode_u64(self.current_index, COUNTER_TRYTES_SIZE)?);
        out.push_str(&encode_u64(self.last_index, COUNTER_TRYTES_SIZE)?);
        out.push_str(&pad_trytes(&self.bundle, HASH_TRYTES_SIZE)?);
        out.push_str(&pad_trytes(&self.trunk, HASH_TRYTES_SIZE)?);
        out.push_str(&pad_trytes(&self.branch, HASH_TRYTES_SIZE)?);
        out.push_str(&pad_trytes(&self.tag, TAG_TRYTES_SIZE)?);
        out.push_str(&pad_trytes(
            &self.signature_message_fragment,
            SIGNATURE_FRAGMENT_TRYTES_SIZE,
        )?);
        Ok(out)
    }

    /// Parses a transaction from its fixed-width tryte frame.
    pub fn from_trytes(trytes: &str) -> Result<Transaction> {
        if !is_trytes_of_exact_length(trytes, TRANSACTION_TRYTES_SIZE) {
            return Err(Error::InvalidTrytes(format!(
                "transaction frame must be {} trytes, got {}",
                TRANSACTION_TRYTES_SIZE,
                trytes.len()
            )));
        }
        fn take<'a>(frame: &'a str, pos: &mut usize, len: usize) -> &'a str {
            let s = &frame[*pos..*pos + len];
            *pos += len;
            s
        }
        let mut pos = 0;
        let hash = take(trytes, &mut pos, HASH_TRYTES_SIZE).to_string();
        let address = take(trytes, &mut pos, HASH_TRYTES_SIZE).to_string();
        let value = decode_i64(take(trytes, &mut pos, VALUE_TRYTES_SIZE))?;
        let timestamp = decode_u64(take(trytes, &mut pos, COUNTER_TRYTES_SIZE))?;
        let current_index = decode_u64(take(trytes, &mut pos, COUNTER_TRYTES_SIZE))?;
        let last_index = decode_u64(take(trytes, &mut pos, COUNTER_TRYTES_SIZE))?;
        let bundle = take(trytes, &mut pos, HASH_TRYTES_SIZE).to_string();
        let trunk = take(trytes, &mut pos, HASH_TRYTES_SIZE).to_string();
        let branch = take(trytes, &mut pos, HASH_TRYTES_SIZE).to_string();
        // variable-length fields are stored canonically without the filler
        let tag = take(trytes, &mut pos, TAG_TRYTES_SIZE)
            .trim_end_matches('9')
            .to_string();
        let signature_message_fragment = take(trytes, &mut pos, SIGNATURE_FRAGMENT_TRYTES_SIZE)
            .trim_end_matches('9')
            .to_string();
        Ok(Transaction {
            hash,
            address,
            value,
            timestamp,
            current_index,
            last_index,
            bundle,
            trunk,
            branch,
            tag,
            signature_message_fragment,
            persistence: None,
        })
    }
}

/// Serializes every transaction of a bundle, keeping the bundle order.
pub fn bundle_to_trytes(bundle: &Bundle) -> Result<Vec<Trytes>> {
    bundle.iter().map(Transaction::to_trytes).collect()
}

/// Parses a list of frames into transactions, keeping the given order.
pub fn transactions_from_trytes(trytes: &[Trytes]) -> Result<Bundle> {
    trytes
        .iter()
        .map(|t| Transaction::from_trytes(t))
        .collect()
}

/// The tail transaction of a bundle (bundle index 0).
pub fn tail_transaction(bundle: &Bundle) -> Option<&Transaction> {
    bundle.iter().find(|tx| tx.current_index == 0)
}

/// Whether the bundle moves any value.
pub fn is_value_bundle(bundle: &Bundle) -> bool {
    bundle.iter().any(|tx| tx.value != 0)
}

/// Structural bundle validation: contiguous ascending indices, a consistent
/// last index and a zero value sum.
pub fn validate_bundle(bundle: &Bundle) -> Result<()> {
    if bundle.is_empty() {
        return Err(Error::InvalidBundle("bundle is empty".to_string()));
    }
    let last = (bundle.len() - 1) as u64;
    let mut sum: i64 = 0;
    for (i, tx) in bundle.iter().enumerate() {
        if tx.current_index != i as u64 {
            return Err(Error::InvalidBundle(format!(
                "transaction at position {} carries bundle index {}",
                i, tx.current_index
            )));
        }
        if tx.last_index != last {
            return Err(Error::InvalidBundle(format!(
                "transaction {} declares last index {}, bundle has {}",
                i, tx.last_index, last
            )));
        }
        sum += tx.value;
    }
    if sum != 0 {
        return Err(Error::InvalidBundle(format!(
            "bundle values sum to {}, expected 0",
            sum
        )));
    }
    Ok(())
}
