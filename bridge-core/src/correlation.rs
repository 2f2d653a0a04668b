//! Async correlation table: tracks pending CoAP GET/PUT requests that
//! returned a queued `async-response-id` instead of a synchronous result,
//! until the matching `async-responses` entry arrives (spec §3, §8's
//! "never both" invariant).

use crate::types::AsyncCorrelationRecord;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct CorrelationTable {
    pending: RwLock<HashMap<String, AsyncCorrelationRecord>>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self { pending: RwLock::new(HashMap::new()) }
    }

    pub async fn insert(&self, record: AsyncCorrelationRecord) {
        self.pending.write().await.insert(record.async_id.clone(), record);
    }

    /// Removes and returns the correlation record for `async_id`, if any
    /// is still pending. Called once the matching `async-responses` entry
    /// or the timeout fires, whichever comes first.
    pub async fn take(&self, async_id: &str) -> Option<AsyncCorrelationRecord> {
        self.pending.write().await.remove(async_id)
    }

    pub async fn contains(&self, async_id: &str) -> bool {
        self.pending.read().await.contains_key(async_id)
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoapVerb;

    fn record(async_id: &str) -> AsyncCorrelationRecord {
        AsyncCorrelationRecord {
            async_id: async_id.to_string(),
            verb: CoapVerb::Get,
            inbound_topic: "devices/dev1/messages/devicebound/coap_verb=get".to_string(),
            reply_topic: "devices/dev1/messages/devicebound/cmd-response".to_string(),
            original_message: Vec::new(),
            device_id: "dev1".to_string(),
            uri: "/3/0/0".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_then_take_removes_entry() {
        let table = CorrelationTable::new();
        table.insert(record("ar-123")).await;
        assert!(table.contains("ar-123").await);

        let taken = table.take("ar-123").await.unwrap();
        assert_eq!(taken.device_id, "dev1");
        assert!(!table.contains("ar-123").await);
    }

    #[tokio::test]
    async fn take_unknown_id_is_none() {
        let table = CorrelationTable::new();
        assert!(table.take("ghost").await.is_none());
    }
}
