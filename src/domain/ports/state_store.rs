//! Durable state store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Key/value store for arbiter snapshots.
///
/// A missing key is `Ok(None)`, never an error: callers treat it as a
/// fresh start.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn write_state(&self, key: &str, snapshot: &serde_json::Value) -> DomainResult<()>;

    async fn read_state(&self, key: &str) -> DomainResult<Option<serde_json::Value>>;

    /// All stored keys, sorted.
    async fn list_keys(&self) -> DomainResult<Vec<String>>;
}
