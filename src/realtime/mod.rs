// Realtime database collaborator for friendchat
// The hosted database owns persistence, auth and fan-out. This module only
// describes the contract the client core relies on: live subscriptions that
// deliver full snapshots, one-shot reads, and (multi-path) writes.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod paths;

pub use memory::MemoryStore;

/// Opaque id of a standing subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// Full value at the subscribed path; `None` when nothing is stored there.
    Value(Option<Value>),
    /// The backend dropped the subscription (permission change, shutdown...).
    /// No further events follow for this handle.
    Cancelled(String),
}

/// One snapshot delivered for one subscription. Deliveries for the same
/// handle arrive in order; nothing is promised across handles.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub handle: SubscriptionHandle,
    pub path: String,
    pub event: SnapshotEvent,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("realtime database unavailable: {0}")]
    Unavailable(String),

    #[error("invalid path {0:?}")]
    InvalidPath(String),

    #[error("failed to encode value: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encode(e.to_string())
    }
}

/// Multi-path update: `None` deletes the value at that path.
pub type WriteBatch = BTreeMap<String, Option<Value>>;

pub trait LiveStore: Send + Sync {
    /// Start a standing subscription. The current value is delivered right
    /// away, then again after every change touching `path`, until released.
    fn subscribe(&self, path: &str) -> Result<SubscriptionHandle, StoreError>;

    /// Read the current value once without staying subscribed.
    fn subscribe_once(&self, path: &str) -> Result<Option<Value>, StoreError>;

    fn release(&self, handle: SubscriptionHandle);

    fn write(&self, path: &str, value: Option<Value>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.insert(path.to_string(), value);
        self.write_many(batch)
    }

    /// Apply every update of the batch atomically.
    fn write_many(&self, updates: WriteBatch) -> Result<(), StoreError>;

    /// Fresh child key. Keys sort in creation order.
    fn push_key(&self) -> String;
}
