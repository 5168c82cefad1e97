//! The stored-value envelope: a single flag byte distinguishing a live
//! value from a tombstone, prefixed to the caller's payload.
//!
//! Neither the WAL nor the SSTable layer know this format exists — to
//! them a value is just an opaque byte slice. Only the engine
//! serializes and interprets it, which is what lets a tombstone
//! written today correctly shadow a value for the same key sitting in
//! an SSTable built yesterday.

use std::fmt;

const LIVE: u8 = 0x00;
const TOMBSTONE: u8 = 0x01;

#[derive(Debug)]
pub struct DecodeError(String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for DecodeError {}

/// A value as stored in the WAL and in SSTables: either live data or a
/// tombstone marking a prior deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    deleted: bool,
    payload: Vec<u8>,
}

impl Value {
    pub fn live(payload: Vec<u8>) -> Self {
        Self {
            deleted: false,
            payload,
        }
    }

    pub fn tombstone() -> Self {
        Self {
            deleted: true,
            payload: Vec::new(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let flag = if self.deleted { TOMBSTONE } else { LIVE };
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push(flag);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn deserialize(raw: &[u8]) -> Result<Self, DecodeError> {
        let (&flag, payload) = raw
            .split_first()
            .ok_or_else(|| DecodeError("value record is empty, missing flag byte".into()))?;
        let deleted = match flag {
            LIVE => false,
            TOMBSTONE => true,
            other => return Err(DecodeError(format!("unknown value flag byte 0x{other:02x}"))),
        };
        Ok(Self {
            deleted,
            payload: payload.to_vec(),
        })
    }

    /// Consumes the value, returning its payload unless it is a
    /// tombstone.
    pub fn into_live_payload(self) -> Option<Vec<u8>> {
        if self.deleted {
            None
        } else {
            Some(self.payload)
        }
    }
}
