//! On-the-wire message envelope: a self-describing record containing the
//! message id, publish timestamp, publishing client-id, and the opaque
//! payload (spec §4.2, §6.3).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A decoded message. Field order in the JSON form is unspecified and
/// decoding must be insensitive to it; `serde_json` already gives us that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub ts: i64,
    pub src: String,
    pub data: String,
}

impl Envelope {
    pub fn new(id: u64, src: impl Into<String>, data: impl Into<String>) -> Self {
        Envelope {
            id,
            ts: now_micros(),
            src: src.into(),
            data: data.into(),
        }
    }

    /// Encode to the JSON wire form. The `id` field guarantees no two
    /// messages in a channel ever encode identically.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire form. A decode failure is a `BackendError`
    /// per spec §4.2: the envelope is corrupt.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            Error::backend_with_source(format!("corrupt envelope: {raw:.64}"), e)
        })
    }
}

/// Microseconds since the Unix epoch, captured by this process's clock. No
/// clock-sync assumption is made across peers (spec §4.2).
fn now_micros() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_micros() as i64
}
