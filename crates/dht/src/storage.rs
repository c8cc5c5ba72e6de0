//! Ephemeral key/value storage entries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use ipv7_wire::Address;

/// Default lifetime of a stored entry.
pub const DEFAULT_STORAGE_TTL: Duration = Duration::from_secs(3600);

/// A value stored in the DHT.
///
/// The signature is carried for the publisher's benefit; verifying it against
/// the publisher's key is delegated to the identity layer and not enforced
/// during storage or retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub publisher: Address,
    pub signature: Vec<u8>,
    /// Epoch milliseconds at which the entry was stored.
    pub stored_at: u64,
    /// Lifetime in milliseconds.
    pub ttl_ms: u64,
}

impl StorageEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.stored_at) > self.ttl_ms
    }
}
