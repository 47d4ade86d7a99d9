//! In-process trace backend

use super::{TraceBackend, TraceError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Hash-of-hashes kept in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryTraceBackend {
    records: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryTraceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct records written so far
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TraceBackend for InMemoryTraceBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set_field(&self, key: &str, field: &str, value: String) -> Result<(), TraceError> {
        let mut records = self.records.write().await;
        records
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, TraceError> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_fields() {
        let backend = InMemoryTraceBackend::new();
        assert!(backend.is_empty().await);

        backend
            .set_field("trace:a", "action", "routine".to_string())
            .await
            .unwrap();
        backend
            .set_field("trace:a", "metadata", "{}".to_string())
            .await
            .unwrap();

        let fields = backend.get_fields("trace:a").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["action"], "routine");
        assert_eq!(backend.len().await, 1);
        assert!(backend.get_fields("trace:b").await.unwrap().is_empty());
    }
}
