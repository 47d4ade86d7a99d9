//! Action delivery over HTTP with bounded exponential backoff

use super::{ActionPayload, ActionResult, RetryPolicy};
use crate::action_span;
use crate::config::{endpoints_for_base_url, ActionsSection};
use crate::observability::metrics::metrics;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn, Instrument};

/// Maps action names to receiver URLs and delivers payloads
#[derive(Debug, Clone)]
pub struct ActionRouter {
    endpoints: HashMap<String, String>,
    client: Client,
    policy: RetryPolicy,
}

impl ActionRouter {
    pub fn new(endpoints: HashMap<String, String>, policy: RetryPolicy) -> Self {
        Self {
            endpoints,
            client: Client::new(),
            policy,
        }
    }

    pub fn from_config(section: &ActionsSection) -> Self {
        Self::new(
            section
                .endpoints
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            RetryPolicy::from(section),
        )
    }

    /// The five default receivers mounted under `base_url`
    pub fn default_endpoints(base_url: &str) -> HashMap<String, String> {
        endpoints_for_base_url(base_url).into_iter().collect()
    }

    pub fn has_endpoint(&self, action: &str) -> bool {
        self.endpoints.contains_key(action)
    }

    pub fn endpoint(&self, action: &str) -> Option<&str> {
        self.endpoints.get(action).map(String::as_str)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `payload` to the receiver for `action`.
    ///
    /// Unmapped names fail immediately with no network call. Otherwise up to
    /// `max_attempts` POSTs are made, waiting `base * 2^(n-1)` after failed
    /// attempt n except the last. The payload (and its request id) is
    /// identical on every attempt.
    pub async fn route_action(&self, action: &str, payload: &ActionPayload) -> ActionResult {
        let Some(endpoint) = self.endpoints.get(action) else {
            warn!(action, "No endpoint for action");
            metrics().action_rejected(action);
            return ActionResult::Error {
                message: format!("No endpoint for action: {action}"),
            };
        };

        let span = action_span!(
            action,
            endpoint = %endpoint,
            request_id = %payload.request_id,
            source_id = %payload.source_id
        );
        self.deliver(action, endpoint, payload).instrument(span).await
    }

    async fn deliver(&self, action: &str, endpoint: &str, payload: &ActionPayload) -> ActionResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, "Posting action");

            match self.post_once(endpoint, payload).await {
                Ok(response) => {
                    info!(attempt, "Action delivered");
                    metrics().action_delivered(action, attempt);
                    return ActionResult::Success {
                        endpoint: endpoint.to_string(),
                        response,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Action delivery attempt failed");
                    last_error = e;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        metrics().action_failed(action, max_attempts);
        ActionResult::Failed {
            endpoint: endpoint.to_string(),
            error: last_error,
            retries: max_attempts,
        }
    }

    async fn post_once(&self, endpoint: &str, payload: &ActionPayload) -> Result<Value, String> {
        let response = self
            .client
            .post(endpoint)
            .header("Idempotency-Key", payload.request_id.to_string())
            .json(payload)
            .timeout(self.policy.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("Request timed out after {:?}", self.policy.request_timeout)
                } else {
                    format!("Request failed: {e}")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Receiver returned status {status}"));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read response body: {e}"))?;

        Ok(parse_response_body(&body))
    }
}

/// Empty body becomes `{}`, non-JSON body becomes a JSON string
fn parse_response_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Default::default());
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[test]
    fn test_parse_response_body() {
        assert_eq!(parse_response_body(b""), json!({}));
        assert_eq!(parse_response_body(b"  \n"), json!({}));
        assert_eq!(parse_response_body(br#"{"ok": true}"#), json!({"ok": true}));
        assert_eq!(parse_response_body(b"logged"), json!("logged"));
    }

    #[test]
    fn test_default_endpoints() {
        let endpoints = ActionRouter::default_endpoints("http://crm:9000");
        assert_eq!(endpoints.len(), 5);
        assert_eq!(endpoints["flagged"], "http://crm:9000/compliance/flag");
    }

    #[tokio::test]
    async fn test_unknown_action_returns_error_immediately() {
        let router = ActionRouter::new(
            ActionRouter::default_endpoints("http://127.0.0.1:9"),
            RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(5)),
        );

        let started = Instant::now();
        let result = router
            .route_action("nonexistent", &ActionPayload::new("doc", json!({})))
            .await;

        assert!(matches!(result, ActionResult::Error { ref message } if message.contains("nonexistent")));
        assert_eq!(result.attempts(), 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_from_config_uses_section_endpoints() {
        let section = ActionsSection::default();
        let router = ActionRouter::from_config(&section);
        assert!(router.has_endpoint("routine"));
        assert!(!router.has_endpoint("accept"));
        assert_eq!(router.policy().max_attempts, 3);
        assert_eq!(
            router.endpoint("escalate"),
            Some("http://localhost:8001/crm/escalate")
        );
    }
}
