//! Per-document pipeline: classify, extract, decide, deliver, read back
//!
//! One [`Orchestrator`] serves every request. Documents are independent: each
//! call to [`Orchestrator::process`] runs its steps strictly in sequence and
//! shares nothing with concurrent calls except the trace store and the HTTP
//! client, both of which are safe for concurrent use.

use crate::action::{Action, ActionPayload, ActionResult, ActionRouter};
use crate::agents::{AgentSet, ExtractedFields, PdfSettings};
use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::document::{Classification, Document, Format};
use crate::document_span;
use crate::error::{PipelineError, PipelineResult};
use crate::observability::metrics::metrics;
use crate::trace::{TraceRecord, TraceStore};
use bytes::Bytes;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Everything the pipeline learned about one document
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub source_id: String,
    pub classification: Classification,
    pub processing_result: ExtractedFields,
    /// The action actually routed, after coercion to `routine`
    pub action: Action,
    pub action_router_result: ActionResult,
    pub full_trace: Option<TraceRecord>,
}

/// Sequences classifier, format agent, action router and trace store
#[derive(Debug, Clone)]
pub struct Orchestrator {
    classifier: Classifier,
    agents: AgentSet,
    router: ActionRouter,
    store: TraceStore,
}

impl Orchestrator {
    pub fn new(
        classifier: Classifier,
        agents: AgentSet,
        router: ActionRouter,
        store: TraceStore,
    ) -> Self {
        Self {
            classifier,
            agents,
            router,
            store,
        }
    }

    /// Build the default agents and router from configuration around the
    /// given classifier and store
    pub fn from_config(config: &AppConfig, classifier: Classifier, store: TraceStore) -> Self {
        let agents = AgentSet::with_store(store.clone(), PdfSettings::from(&config.pdf));
        let router = ActionRouter::from_config(&config.actions);
        Self::new(classifier, agents, router, store)
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn router(&self) -> &ActionRouter {
        &self.router
    }

    pub fn trace_store(&self) -> &TraceStore {
        &self.store
    }

    /// Run one uploaded document through the whole pipeline.
    ///
    /// Unknown formats fail with [`PipelineError::UnsupportedFormat`] before
    /// anything is written to the trace store. Failures after the first trace
    /// write leave the fields already committed in place. A failed read-back
    /// after delivery yields a report without `full_trace`.
    pub async fn process(
        &self,
        filename: &str,
        bytes: impl Into<Bytes>,
    ) -> PipelineResult<ProcessingReport> {
        let bytes = bytes.into();
        let span = document_span!(filename = %filename, size_bytes = bytes.len());
        let started = Instant::now();
        metrics().document_received();

        let result = self.run(filename, bytes).instrument(span.clone()).await;

        let elapsed = started.elapsed();
        let _guard = span.enter();
        match &result {
            Ok(report) => {
                metrics().document_processed(report.classification.format, elapsed);
                info!(
                    source_id = %report.source_id,
                    format = %report.classification.format,
                    intent = %report.classification.intent,
                    action = %report.action,
                    status = report.action_router_result.status(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Document processed"
                );
            }
            Err(PipelineError::UnsupportedFormat { .. }) => {
                metrics().document_unsupported(elapsed);
                info!("Unsupported document format");
            }
            Err(e) => {
                metrics().document_failed(elapsed);
                warn!(error = %e, "Document processing failed");
            }
        }
        result
    }

    async fn run(&self, filename: &str, bytes: Bytes) -> PipelineResult<ProcessingReport> {
        if filename.trim().is_empty() {
            return Err(PipelineError::invalid_input("filename must not be empty"));
        }

        let mut document = Document::new(filename, bytes);
        let format = self.classifier.detect_format(filename, &document.text);
        if format == Format::Unknown {
            return Err(PipelineError::unsupported_format(filename));
        }
        document.format = format;

        // Read once: the intent tiers and the agent see the same text
        let text = self.agents.read_text(format, &document).await;
        let intent = self.classifier.detect_intent(format, &text).await;
        let classification = Classification { format, intent };

        let outcome = self
            .agents
            .dispatch_text(&document, &text, classification)
            .await?;

        let action = if self.router.has_endpoint(outcome.action.as_str()) {
            outcome.action
        } else {
            debug!(decided = %outcome.action, "No receiver for action, routing as routine");
            Action::DEFAULT
        };

        let payload = ActionPayload::new(
            document.source_id.clone(),
            serde_json::to_value(&outcome.fields)?,
        );
        let action_router_result = self.router.route_action(action.as_str(), &payload).await;

        // The action has already gone out; a failed read-back must not hide its result
        let full_trace = match self.store.get_full_trace(&document.source_id).await {
            Ok(trace) => trace,
            Err(e) => {
                warn!(error = %e, "Trace read-back failed, reporting without full trace");
                None
            }
        };

        Ok(ProcessingReport {
            source_id: document.source_id,
            classification,
            processing_result: outcome.fields,
            action,
            action_router_result,
            full_trace,
        })
    }
}
