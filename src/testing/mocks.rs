//! Mock implementations for testing
//!
//! Stand-ins for the model provider, the PDF parser and the trace backend so
//! the pipeline can be exercised without network access or real documents.

use crate::agents::pdf::{PdfError, PdfTextExtractor};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::trace::{TraceBackend, TraceError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock LLM provider for testing
#[derive(Debug)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub should_fail: bool,
    pub delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    /// Cycles through `responses`, one per call
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            should_fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Sleep before answering, to exercise caller timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[call % self.responses.len()].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 1,
                total_tokens: 11,
            },
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
enum PdfBehaviour {
    Pages(Vec<String>),
    Error(String),
    Panic,
}

/// Mock PDF parser returning canned pages
#[derive(Debug, Clone)]
pub struct MockPdfExtractor {
    behaviour: PdfBehaviour,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockPdfExtractor {
    fn with_behaviour(behaviour: PdfBehaviour) -> Self {
        Self {
            behaviour,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_pages(pages: Vec<String>) -> Self {
        Self::with_behaviour(PdfBehaviour::Pages(pages))
    }

    /// Single page containing `text`
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::with_pages(vec![text.into()])
    }

    pub fn with_error(message: impl Into<String>) -> Self {
        Self::with_behaviour(PdfBehaviour::Error(message.into()))
    }

    /// Panics inside the parser, like a malformed font table can
    pub fn panicking() -> Self {
        Self::with_behaviour(PdfBehaviour::Panic)
    }

    /// Block the extraction thread before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared handle to the call counter, usable after the mock is moved
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl PdfTextExtractor for MockPdfExtractor {
    fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<String>, PdfError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        match &self.behaviour {
            PdfBehaviour::Pages(pages) => Ok(pages.clone()),
            PdfBehaviour::Error(message) => Err(PdfError::Parse(message.clone())),
            PdfBehaviour::Panic => panic!("mock PDF parser panic"),
        }
    }
}

/// Trace backend that fails every read, and every write past a limit
#[derive(Debug, Default)]
pub struct FailingTraceBackend {
    /// Writes that succeed before failures start
    allowed_writes: usize,
    writes: AtomicUsize,
}

impl FailingTraceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept every write; reads still fail
    pub fn failing_reads() -> Self {
        Self::failing_after(usize::MAX)
    }

    /// Let the first `n` writes through, then fail
    pub fn failing_after(n: usize) -> Self {
        Self {
            allowed_writes: n,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TraceBackend for FailingTraceBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn set_field(&self, _key: &str, field: &str, _value: String) -> Result<(), TraceError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if n < self.allowed_writes {
            Ok(())
        } else {
            Err(TraceError::Backend(format!(
                "mock backend refused write of {field}"
            )))
        }
    }

    async fn get_fields(&self, _key: &str) -> Result<HashMap<String, String>, TraceError> {
        Err(TraceError::Backend("mock backend unavailable".to_string()))
    }
}
