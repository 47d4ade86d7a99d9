//! Decision trace store
//!
//! One record per document, keyed `trace:<source_id>`, holding independently
//! addressable subfields. Writes are field-scoped overwrites and never span
//! more than one subfield, so a failure mid-pipeline leaves earlier subfields
//! readable.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryTraceBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisTraceBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const METADATA_FIELD: &str = "metadata";
pub const ACTION_FIELD: &str = "action";
pub const DECISION_TRACE_FIELD: &str = "decision_trace";

/// Storage key of a document's trace record
pub fn trace_key(source_id: &str) -> String {
    format!("trace:{source_id}")
}

/// Subfield holding an agent's extracted fields
pub fn agent_fields_field(agent_name: &str) -> String {
    format!("{agent_name}_fields")
}

/// Trace store errors
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Trace backend error: {0}")]
    Backend(String),

    #[error("Trace serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raw key/subfield storage. Values are opaque strings to the backend.
#[async_trait]
pub trait TraceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Overwrite one subfield of a record, creating the record if needed
    async fn set_field(&self, key: &str, field: &str, value: String) -> Result<(), TraceError>;

    /// All subfields of a record; empty when the record was never written
    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, TraceError>;
}

/// A trace record as read back, subfields decoded from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceRecord(BTreeMap<String, Value>);

impl TraceRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.get(METADATA_FIELD)
    }

    pub fn action(&self) -> Option<&str> {
        self.get(ACTION_FIELD).and_then(Value::as_str)
    }

    pub fn agent_fields(&self, agent_name: &str) -> Option<&Value> {
        self.get(&agent_fields_field(agent_name))
    }

    pub fn decision_trace(&self) -> Option<&Value> {
        self.get(DECISION_TRACE_FIELD)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }
}

/// Handle to the trace store, cheap to clone and shared by every agent
#[derive(Clone)]
pub struct TraceStore {
    backend: Arc<dyn TraceBackend>,
}

impl std::fmt::Debug for TraceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl TraceStore {
    pub fn new(backend: Arc<dyn TraceBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryTraceBackend::new()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Overwrite the metadata subfield, stamping it with the current UTC time
    /// unless the caller supplied a non-empty timestamp. Returns what was stored.
    pub async fn log_metadata(
        &self,
        source_id: &str,
        mut metadata: Map<String, Value>,
    ) -> Result<Value, TraceError> {
        let has_timestamp = match metadata.get("timestamp") {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !has_timestamp {
            metadata.insert(
                "timestamp".to_string(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }

        let value = Value::Object(metadata);
        self.write_json(source_id, METADATA_FIELD, &value).await?;
        Ok(value)
    }

    pub async fn log_agent_fields<T>(
        &self,
        source_id: &str,
        agent_name: &str,
        fields: &T,
    ) -> Result<(), TraceError>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.write_json(source_id, &agent_fields_field(agent_name), fields)
            .await
    }

    /// The action is stored as the bare name, not JSON-encoded
    pub async fn log_action(&self, source_id: &str, action: &str) -> Result<(), TraceError> {
        debug!(source_id, action, "Logging action");
        self.backend
            .set_field(&trace_key(source_id), ACTION_FIELD, action.to_string())
            .await
    }

    pub async fn log_decision_trace<T>(&self, source_id: &str, trace: &T) -> Result<(), TraceError>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.write_json(source_id, DECISION_TRACE_FIELD, trace).await
    }

    /// Read every subfield back; `None` when nothing was ever written for the id
    pub async fn get_full_trace(&self, source_id: &str) -> Result<Option<TraceRecord>, TraceError> {
        let raw = self.backend.get_fields(&trace_key(source_id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }

        let record = raw
            .into_iter()
            .map(|(field, stored)| {
                let value = serde_json::from_str(&stored).unwrap_or(Value::String(stored));
                (field, value)
            })
            .collect();

        Ok(Some(TraceRecord(record)))
    }

    async fn write_json<T>(&self, source_id: &str, field: &str, value: &T) -> Result<(), TraceError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let encoded = serde_json::to_string(value)?;
        debug!(source_id, field, bytes = encoded.len(), "Writing trace subfield");
        self.backend
            .set_field(&trace_key(source_id), field, encoded)
            .await
    }
}
