//! Follow-up actions and their delivery to downstream systems

pub mod router;

pub use router::ActionRouter;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Closed set of follow-up actions an agent may decide on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Escalate,
    Routine,
    Alert,
    Flagged,
    Accepted,
    /// Valid JSON document. Has no default receiver and is routed as `routine`.
    Accept,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Escalate,
        Action::Routine,
        Action::Alert,
        Action::Flagged,
        Action::Accepted,
        Action::Accept,
    ];

    /// Fallback for names that cannot be routed
    pub const DEFAULT: Action = Action::Routine;

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Escalate => "escalate",
            Action::Routine => "routine",
            Action::Alert => "alert",
            Action::Flagged => "flagged",
            Action::Accepted => "accepted",
            Action::Accept => "accept",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == name)
    }

    /// Unrecognised names become the default action instead of an error
    pub fn coerce(name: &str) -> Self {
        Self::from_name(name).unwrap_or(Self::DEFAULT)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown action: {s}"))
    }
}

/// Body POSTed to an action receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Stable across retries of one delivery; also sent as `Idempotency-Key`
    pub request_id: Uuid,
    pub source_id: String,
    pub result: Value,
}

impl ActionPayload {
    pub fn new(source_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            source_id: source_id.into(),
            result,
        }
    }
}

/// Outcome of routing one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ActionResult {
    Success {
        endpoint: String,
        response: Value,
        attempts: u32,
    },
    Failed {
        endpoint: String,
        error: String,
        retries: u32,
    },
    /// The action could not be routed at all; nothing was sent
    Error { message: String },
}

impl ActionResult {
    pub fn status(&self) -> &'static str {
        match self {
            ActionResult::Success { .. } => "success",
            ActionResult::Failed { .. } => "failed",
            ActionResult::Error { .. } => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success { .. })
    }

    /// Number of HTTP attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            ActionResult::Success { attempts, .. } => *attempts,
            ActionResult::Failed { retries, .. } => *retries,
            ActionResult::Error { .. } => 0,
        }
    }
}

/// Bounded exponential backoff for action delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first included. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, request_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            request_timeout,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): base * 2^(attempt-1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl From<&crate::config::ActionsSection> for RetryPolicy {
    fn from(section: &crate::config::ActionsSection) -> Self {
        Self::new(section.max_attempts, section.base_delay(), section.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.as_str()), Some(action));
            assert_eq!(action.to_string().parse::<Action>(), Ok(action));
        }
        assert_eq!(
            serde_json::to_value(Action::Escalate).unwrap(),
            json!("escalate")
        );
    }

    #[test]
    fn test_unknown_action_coerces_to_routine() {
        assert_eq!(Action::coerce("teleport"), Action::Routine);
        assert_eq!(Action::coerce("ESCALATE"), Action::Routine);
        assert_eq!(Action::coerce("alert"), Action::Alert);
        assert!("teleport".parse::<Action>().is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_policy_keeps_at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_action_result_wire_shape() {
        let success = ActionResult::Success {
            endpoint: "http://localhost:8001/crm/log".to_string(),
            response: json!({}),
            attempts: 1,
        };
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({
                "status": "success",
                "endpoint": "http://localhost:8001/crm/log",
                "response": {},
                "attempts": 1
            })
        );

        let error = ActionResult::Error {
            message: "Unknown action: teleport".to_string(),
        };
        assert_eq!(serde_json::to_value(&error).unwrap()["status"], "error");
        assert_eq!(error.attempts(), 0);
        assert_eq!(error.status(), "error");
    }

    #[test]
    fn test_payload_gets_fresh_request_id() {
        let a = ActionPayload::new("doc", json!({}));
        let b = ActionPayload::new("doc", json!({}));
        assert_ne!(a.request_id, b.request_id);
    }
}
