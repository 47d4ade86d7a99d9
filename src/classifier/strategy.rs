//! Intent detection strategies
//!
//! Each strategy answers `Some(intent)` when it is confident and `None` to
//! defer to the next one. Strategies never fail outward: a broken model call
//! is the same as no answer.

use crate::document::{Format, Intent};
use crate::llm::provider::{CompletionRequest, LlmProvider, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a strategy gets to look at
#[derive(Debug, Clone, Copy)]
pub struct IntentInput<'a> {
    pub format: Format,
    pub content: &'a str,
    /// Parsed document when the format is JSON and the content parses
    pub parsed_json: Option<&'a Value>,
}

#[async_trait]
pub trait IntentStrategy: Send + Sync {
    /// Tier name recorded with every decision
    fn name(&self) -> &'static str;

    async fn detect(&self, input: &IntentInput<'_>) -> Option<Intent>;
}

const INVOICE_KEYS: [&str; 3] = ["order_id", "customer", "amount"];
const RFQ_KEYS: [&str; 3] = ["rfq_id", "customer", "items"];

/// Match a JSON object against the known document schemas by key presence
pub fn detect_schema(value: &Value) -> Option<Intent> {
    let object = value.as_object()?;
    let has_all = |keys: &[&str]| keys.iter().all(|key| object.contains_key(*key));

    if has_all(&INVOICE_KEYS) {
        Some(Intent::Invoice)
    } else if has_all(&RFQ_KEYS) {
        Some(Intent::Rfq)
    } else {
        None
    }
}

/// Structured JSON documents are recognised by their keys alone
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaIntentStrategy;

#[async_trait]
impl IntentStrategy for SchemaIntentStrategy {
    fn name(&self) -> &'static str {
        "schema"
    }

    async fn detect(&self, input: &IntentInput<'_>) -> Option<Intent> {
        if input.format != Format::Json {
            return None;
        }
        input.parsed_json.and_then(detect_schema)
    }
}

/// Largest slice of document text sent to the model
const MAX_PROMPT_CHARS: usize = 8000;

const CLASSIFIER_SYSTEM_PROMPT: &str = "You classify business documents. \
Answer with exactly one label from: RFQ, Complaint, Invoice, Regulation, Fraud Risk. \
Reply with the label only.";

/// Language-model classification over the closed label set
pub struct LlmIntentStrategy {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl LlmIntentStrategy {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: 10,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_completion_request(&self, content: &str) -> CompletionRequest {
        let excerpt: String = content.chars().take(MAX_PROMPT_CHARS).collect();
        CompletionRequest {
            messages: vec![
                Message::system(CLASSIFIER_SYSTEM_PROMPT),
                Message::user(format!("Document:\n{excerpt}")),
            ],
            model: self.model.clone(),
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            metadata: Default::default(),
        }
    }
}

/// Find the first known label mentioned in a model answer, in label order
pub fn parse_label(answer: &str) -> Option<Intent> {
    let answer = answer.to_lowercase();
    Intent::LABELS
        .into_iter()
        .find(|intent| answer.contains(&intent.label().to_lowercase()))
}

#[async_trait]
impl IntentStrategy for LlmIntentStrategy {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn detect(&self, input: &IntentInput<'_>) -> Option<Intent> {
        if input.content.trim().is_empty() {
            return None;
        }

        let request = self.build_completion_request(input.content);
        let response = match tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(provider = self.provider.name(), error = %e, "Model classification failed");
                return None;
            }
            Err(_) => {
                warn!(
                    provider = self.provider.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Model classification timed out"
                );
                return None;
            }
        };

        let answer = response.content.unwrap_or_default();
        let intent = parse_label(&answer);
        if intent.is_none() {
            debug!(answer = %answer.trim(), "Model answer has no recognised label");
        }
        intent
    }
}

/// Case-insensitive substring rules, intents checked in table order
#[derive(Debug, Clone)]
pub struct KeywordIntentStrategy {
    rules: Vec<(Intent, Vec<String>)>,
}

impl KeywordIntentStrategy {
    pub fn new(rules: Vec<(Intent, Vec<String>)>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(intent, keywords)| {
                (
                    intent,
                    keywords.into_iter().map(|k| k.to_lowercase()).collect(),
                )
            })
            .collect();
        Self { rules }
    }
}

impl Default for KeywordIntentStrategy {
    fn default() -> Self {
        let table: [(Intent, &[&str]); 5] = [
            (
                Intent::Rfq,
                &["request for quote", "quotation", "quote needed", "rfq"],
            ),
            (
                Intent::Complaint,
                &[
                    "not satisfied",
                    "complaint",
                    "issue",
                    "problem",
                    "bad experience",
                    "unsatisfied",
                ],
            ),
            (
                Intent::Invoice,
                &["invoice", "bill", "amount due", "payment due", "billed"],
            ),
            (
                Intent::Regulation,
                &["regulation", "compliance", "policy", "gdpr", "fda"],
            ),
            (
                Intent::FraudRisk,
                &["fraud", "suspicious", "unauthorized", "risk", "scam"],
            ),
        ];

        Self::new(
            table
                .into_iter()
                .map(|(intent, words)| (intent, words.iter().map(|w| w.to_string()).collect()))
                .collect(),
        )
    }
}

#[async_trait]
impl IntentStrategy for KeywordIntentStrategy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn detect(&self, input: &IntentInput<'_>) -> Option<Intent> {
        let content = input.content.to_lowercase();
        self.rules
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| content.contains(k.as_str())))
            .map(|(intent, _)| *intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockLlmProvider;
    use serde_json::json;

    fn text(content: &str) -> IntentInput<'_> {
        IntentInput {
            format: Format::Email,
            content,
            parsed_json: None,
        }
    }

    #[test]
    fn test_detect_schema() {
        assert_eq!(
            detect_schema(&json!({"order_id": 1, "customer": "A", "amount": 2.0})),
            Some(Intent::Invoice)
        );
        assert_eq!(
            detect_schema(&json!({"rfq_id": 1, "customer": "A", "items": [], "extra": true})),
            Some(Intent::Rfq)
        );
        assert_eq!(detect_schema(&json!({"customer": "A"})), None);
        assert_eq!(detect_schema(&json!([1, 2, 3])), None);
    }

    #[tokio::test]
    async fn test_schema_strategy_only_applies_to_json() {
        let value = json!({"order_id": 1, "customer": "A", "amount": 2.0});
        let strategy = SchemaIntentStrategy;

        let json_input = IntentInput {
            format: Format::Json,
            content: "",
            parsed_json: Some(&value),
        };
        assert_eq!(strategy.detect(&json_input).await, Some(Intent::Invoice));

        let email_input = IntentInput {
            format: Format::Email,
            ..json_input
        };
        assert_eq!(strategy.detect(&email_input).await, None);
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("Complaint"), Some(Intent::Complaint));
        assert_eq!(parse_label("  fraud risk.\n"), Some(Intent::FraudRisk));
        assert_eq!(parse_label("The label is: INVOICE"), Some(Intent::Invoice));
        assert_eq!(parse_label("no idea"), None);
        assert_eq!(parse_label(""), None);
    }

    #[tokio::test]
    async fn test_keyword_table_order() {
        let strategy = KeywordIntentStrategy::default();
        assert_eq!(
            strategy.detect(&text("We need a QUOTATION for your services.")).await,
            Some(Intent::Rfq)
        );
        assert_eq!(
            strategy.detect(&text("I have a complaint about your product.")).await,
            Some(Intent::Complaint)
        );
        // "issue" (Complaint) is checked before "invoice"
        assert_eq!(
            strategy.detect(&text("Issue with the invoice")).await,
            Some(Intent::Complaint)
        );
        assert_eq!(
            strategy.detect(&text("Suspicious login detected")).await,
            Some(Intent::FraudRisk)
        );
        assert_eq!(strategy.detect(&text("Hello there")).await, None);
    }

    #[tokio::test]
    async fn test_llm_strategy_accepts_known_label() {
        let provider = Arc::new(MockLlmProvider::single_response("Regulation"));
        let strategy = LlmIntentStrategy::new(provider.clone(), "mock-model");

        let intent = strategy.detect(&text("New GDPR guidance attached")).await;
        assert_eq!(intent, Some(Intent::Regulation));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_strategy_defers_on_failure_and_garbage() {
        let failing = Arc::new(MockLlmProvider::with_failure());
        let strategy = LlmIntentStrategy::new(failing, "mock-model");
        assert_eq!(strategy.detect(&text("anything")).await, None);

        let garbage = Arc::new(MockLlmProvider::single_response("I cannot tell"));
        let strategy = LlmIntentStrategy::new(garbage, "mock-model");
        assert_eq!(strategy.detect(&text("anything")).await, None);
    }

    #[tokio::test]
    async fn test_llm_strategy_times_out() {
        let slow = Arc::new(
            MockLlmProvider::single_response("Invoice").with_delay(Duration::from_millis(200)),
        );
        let strategy =
            LlmIntentStrategy::new(slow, "mock-model").with_timeout(Duration::from_millis(20));
        assert_eq!(strategy.detect(&text("invoice")).await, None);
    }

    #[tokio::test]
    async fn test_llm_strategy_skips_empty_content() {
        let provider = Arc::new(MockLlmProvider::single_response("Invoice"));
        let strategy = LlmIntentStrategy::new(provider.clone(), "mock-model");
        assert_eq!(strategy.detect(&text("   ")).await, None);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_prompt_is_truncated() {
        let provider = Arc::new(MockLlmProvider::single_response("Invoice"));
        let strategy = LlmIntentStrategy::new(provider, "mock-model").with_max_tokens(5);
        let long = "x".repeat(MAX_PROMPT_CHARS * 2);
        let request = strategy.build_completion_request(&long);

        assert_eq!(request.max_tokens, Some(5));
        assert!(request.messages[1].content.len() < MAX_PROMPT_CHARS + 20);
    }
}
