//! Endpoint Type Registry (C5): a `device_id -> endpoint_type` map that
//! survives session churn, used by the command path to recover a device's
//! type for reply-topic construction without touching the session table.

use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct EndpointTypeRegistry {
    types: RwLock<HashMap<String, String>>,
}

impl Default for EndpointTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointTypeRegistry {
    pub fn new() -> Self {
        Self { types: RwLock::new(HashMap::new()) }
    }

    pub async fn set(&self, device_id: &str, endpoint_type: &str) {
        self.types.write().await.insert(device_id.to_string(), endpoint_type.to_string());
    }

    pub async fn get(&self, device_id: &str) -> Option<String> {
        self.types.read().await.get(device_id).cloned()
    }

    /// Clears a device's entry, called on deletion or expiry (spec §3).
    pub async fn remove(&self, device_id: &str) -> Option<String> {
        self.types.write().await.remove(device_id)
    }

    pub async fn len(&self) -> usize {
        self.types.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.types.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_and_remove_roundtrip() {
        let registry = EndpointTypeRegistry::new();
        registry.set("dev1", "sensor").await;
        assert_eq!(registry.get("dev1").await, Some("sensor".to_string()));
        assert_eq!(registry.len().await, 1);

        let removed = registry.remove("dev1").await;
        assert_eq!(removed, Some("sensor".to_string()));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_device_is_none() {
        let registry = EndpointTypeRegistry::new();
        assert_eq!(registry.get("ghost").await, None);
    }
}
