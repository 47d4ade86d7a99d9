//! JSON agent: schema detection and exhaustive field validation

use super::FormatAgent;
use crate::action::Action;
use crate::classifier::detect_schema;
use crate::document::Intent;
use crate::trace::TraceStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Expected JSON kind of a required field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Int,
    String,
    Number,
    List,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::Int => "int",
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::List => "list",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::List => value.is_array(),
        }
    }
}

const REQUIRED_FIELDS: [(&str, FieldKind); 4] = [
    ("order_id", FieldKind::Int),
    ("customer", FieldKind::String),
    ("amount", FieldKind::Number),
    ("items", FieldKind::List),
];

/// One anomaly per missing or mistyped required field, in schema order
pub fn validate_fields(value: &Value) -> Vec<String> {
    let object = value.as_object();
    REQUIRED_FIELDS
        .iter()
        .filter_map(|(name, kind)| match object.and_then(|o| o.get(*name)) {
            None => Some(format!("Missing field: {name}")),
            Some(v) if !kind.matches(v) => {
                Some(format!("Type error: {name} should be {}", kind.name()))
            }
            Some(_) => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonFields {
    /// True iff `anomalies` is empty
    pub valid: bool,
    #[serde(rename = "type")]
    pub schema_type: Option<Intent>,
    pub data: Option<Value>,
    pub anomalies: Vec<String>,
}

impl JsonFields {
    pub fn from_content(content: &str) -> Self {
        let data: Value = match serde_json::from_str(content) {
            Ok(data) => data,
            Err(_) => {
                return Self {
                    valid: false,
                    schema_type: None,
                    data: None,
                    anomalies: vec!["Invalid JSON".to_string()],
                }
            }
        };

        let anomalies = validate_fields(&data);
        Self {
            valid: anomalies.is_empty(),
            schema_type: detect_schema(&data),
            data: Some(data),
            anomalies,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonAgent {
    store: TraceStore,
}

impl JsonAgent {
    pub fn new(store: TraceStore) -> Self {
        Self { store }
    }
}

impl FormatAgent for JsonAgent {
    type Fields = JsonFields;

    fn name(&self) -> &'static str {
        "json_agent"
    }

    fn source(&self) -> &'static str {
        "json"
    }

    fn trace_step(&self) -> &'static str {
        "json_processed"
    }

    fn trace_store(&self) -> &TraceStore {
        &self.store
    }

    fn extract(&self, text: &str) -> JsonFields {
        JsonFields::from_content(text)
    }

    fn decide_action(&self, fields: &JsonFields) -> Action {
        if fields.valid {
            Action::Accept
        } else {
            Action::Alert
        }
    }
}
