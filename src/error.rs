//! Pipeline error types
//!
//! Maps internal failures to the HTTP-facing error envelope. Upstream model
//! failures and malformed documents never reach this type: they degrade inside
//! the classifier and agents. What remains is unsupported input and faults.

use crate::trace::TraceError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Main error type for document processing
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unsupported format: {filename}")]
    UnsupportedFormat { filename: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Trace store error: {0}")]
    Trace(#[from] TraceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

/// JSON body returned to HTTP callers on failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PipelineError {
    /// Create unsupported format error
    pub fn unsupported_format<S: Into<String>>(filename: S) -> Self {
        Self::UnsupportedFormat {
            filename: filename.into(),
        }
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::UnsupportedFormat { .. } => 415,
            PipelineError::InvalidInput { .. } => 400,
            _ => 500,
        }
    }

    /// Convert to the caller-facing error body
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            PipelineError::UnsupportedFormat { .. } => ErrorResponse {
                error: "Unsupported format".to_string(),
                detail: None,
            },
            PipelineError::InvalidInput { message } => ErrorResponse {
                error: "Invalid input".to_string(),
                detail: Some(sanitize_error_message(message)),
            },
            other => ErrorResponse {
                error: "Document processing failed".to_string(),
                detail: Some(sanitize_error_message(&other.to_string())),
            },
        }
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Redact credentials and sensitive paths, and bound the message length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
