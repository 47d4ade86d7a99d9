//! Email agent: header extraction, urgency and tone

use super::FormatAgent;
use crate::action::Action;
use crate::trace::TraceStore;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static FROM_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^From:[ \t]*(.*)$").expect("From header pattern is valid"));

static SUBJECT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Subject:[ \t]*(.*)$").expect("Subject header pattern is valid")
});

const URGENT_KEYWORDS: [&str; 5] = ["urgent", "immediately", "asap", "important", "high priority"];

const TONE_TABLE: [(Tone, &[&str]); 3] = [
    (
        Tone::Escalation,
        &["not acceptable", "unhappy", "angry", "frustrated", "escalate"],
    ),
    (Tone::Polite, &["please", "kindly", "would you", "thank you"]),
    (
        Tone::Threatening,
        &["legal action", "lawsuit", "report", "compensation"],
    ),
];

const ISSUE_FALLBACK_CHARS: usize = 50;

/// True when content carries both a `From:` and a `Subject:` header line
pub fn looks_like_email(content: &str) -> bool {
    let content = normalize_line_endings(content);
    FROM_HEADER.is_match(&content) && SUBJECT_HEADER.is_match(&content)
}

fn normalize_line_endings(content: &str) -> std::borrow::Cow<'_, str> {
    if content.contains('\r') {
        std::borrow::Cow::Owned(content.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        std::borrow::Cow::Borrowed(content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Escalation,
    Polite,
    Threatening,
    Neutral,
}

/// First tone category with a keyword present, else neutral
pub fn detect_tone(content: &str) -> Tone {
    let content = content.to_lowercase();
    TONE_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| content.contains(k)))
        .map(|(tone, _)| *tone)
        .unwrap_or(Tone::Neutral)
}

pub fn detect_urgency(content: &str) -> Urgency {
    let content = content.to_lowercase();
    if URGENT_KEYWORDS.iter().any(|k| content.contains(k)) {
        Urgency::High
    } else {
        Urgency::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailFields {
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub urgency: Urgency,
    pub issue: String,
    pub tone: Tone,
    pub action: Action,
}

impl EmailFields {
    pub fn from_content(content: &str) -> Self {
        let content = normalize_line_endings(content);

        let header = |pattern: &Regex| {
            pattern
                .captures(&content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        };
        let sender = header(&FROM_HEADER).unwrap_or_else(|| "Unknown".to_string());
        let subject = header(&SUBJECT_HEADER);

        let body = match content.split_once("\n\n") {
            Some((_, body)) => body.to_string(),
            None => content.to_string(),
        };

        let urgency = detect_urgency(&content);
        let tone = detect_tone(&content);
        let issue = subject
            .clone()
            .unwrap_or_else(|| body.chars().take(ISSUE_FALLBACK_CHARS).collect());

        let action = if matches!(tone, Tone::Escalation | Tone::Threatening)
            || urgency == Urgency::High
        {
            Action::Escalate
        } else {
            Action::Routine
        };

        Self {
            sender,
            subject: subject.unwrap_or_else(|| "No Subject".to_string()),
            body,
            urgency,
            issue,
            tone,
            action,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailAgent {
    store: TraceStore,
}

impl EmailAgent {
    pub fn new(store: TraceStore) -> Self {
        Self { store }
    }
}

impl FormatAgent for EmailAgent {
    type Fields = EmailFields;

    fn name(&self) -> &'static str {
        "email_agent"
    }

    fn source(&self) -> &'static str {
        "email"
    }

    fn trace_step(&self) -> &'static str {
        "email_processed"
    }

    fn trace_store(&self) -> &TraceStore {
        &self.store
    }

    fn extract(&self, text: &str) -> EmailFields {
        EmailFields::from_content(text)
    }

    fn decide_action(&self, fields: &EmailFields) -> Action {
        fields.action
    }
}
