//! In-memory state store for tests and ephemeral runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::ports::StateStore;

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn write_state(&self, key: &str, snapshot: &serde_json::Value) -> DomainResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    async fn read_state(&self, key: &str) -> DomainResult<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn list_keys(&self) -> DomainResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_missing() {
        let store = InMemoryStateStore::new();
        assert!(store.read_state("nope").await.unwrap().is_none());
        store.write_state("k", &serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(store.read_state("k").await.unwrap().unwrap()["x"], 1);
        assert_eq!(store.list_keys().await.unwrap(), vec!["k"]);
    }
}
