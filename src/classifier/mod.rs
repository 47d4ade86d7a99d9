//! Document classifier: format sniffing plus a fallback chain of intent strategies

pub mod strategy;

pub use strategy::{
    detect_schema, parse_label, IntentInput, IntentStrategy, KeywordIntentStrategy,
    LlmIntentStrategy, SchemaIntentStrategy,
};

use crate::agents::email::looks_like_email;
use crate::document::{file_extension, Classification, Format, Intent};
use crate::observability::metrics::metrics;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Detect a document's format: extension first, then content sniffing
pub fn detect_format(filename: &str, content: &str) -> Format {
    if let Some(format) = file_extension(filename).and_then(|ext| Format::from_extension(&ext)) {
        return format;
    }

    if serde_json::from_str::<Value>(content).is_ok() {
        return Format::Json;
    }

    if looks_like_email(content) {
        return Format::Email;
    }

    Format::Unknown
}

/// Ordered intent strategies; the first confident answer wins
#[derive(Clone)]
pub struct Classifier {
    strategies: Vec<Arc<dyn IntentStrategy>>,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("strategies", &self.tier_names())
            .finish()
    }
}

impl Classifier {
    pub fn new(strategies: Vec<Arc<dyn IntentStrategy>>) -> Self {
        Self { strategies }
    }

    /// Schema match then keyword rules, no model
    pub fn rule_based() -> Self {
        Self::new(vec![
            Arc::new(SchemaIntentStrategy),
            Arc::new(KeywordIntentStrategy::default()),
        ])
    }

    /// Schema match, then the model, then keyword rules
    pub fn with_llm(llm: LlmIntentStrategy) -> Self {
        Self::new(vec![
            Arc::new(SchemaIntentStrategy),
            Arc::new(llm),
            Arc::new(KeywordIntentStrategy::default()),
        ])
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn detect_format(&self, filename: &str, content: &str) -> Format {
        detect_format(filename, content)
    }

    pub async fn detect_intent(&self, format: Format, content: &str) -> Intent {
        let parsed = if format == Format::Json {
            serde_json::from_str::<Value>(content).ok()
        } else {
            None
        };
        let input = IntentInput {
            format,
            content,
            parsed_json: parsed.as_ref(),
        };

        for strategy in &self.strategies {
            if let Some(intent) = strategy.detect(&input).await {
                info!(tier = strategy.name(), intent = %intent, "Intent decided");
                metrics().intent_decided(strategy.name());
                return intent;
            }
            debug!(tier = strategy.name(), "Strategy deferred");
        }

        info!(tier = "none", intent = %Intent::Unknown, "Intent decided");
        metrics().intent_decided("none");
        Intent::Unknown
    }

    pub async fn classify(&self, filename: &str, content: &str) -> Classification {
        let format = self.detect_format(filename, content);
        let intent = self.detect_intent(format, content).await;
        Classification { format, intent }
    }
}
