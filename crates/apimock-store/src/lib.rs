//! Persistence layer: a key-value store with change notifications and the
//! mock repository built on top of it.

mod error;
mod local;
mod repository;

pub use error::StoreError;
pub use local::LocalStore;
pub use repository::{GLOBAL_ENABLED_KEY, MOCKS_KEY, MockRepository};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Keys written by one `set` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub keys: Vec<String>,
}

impl StorageChange {
    pub fn touches(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// Local key-value storage with change subscription.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Values for the requested keys. Absent keys are missing from the map.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError>;

    /// Write every entry, then notify subscribers once.
    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}
