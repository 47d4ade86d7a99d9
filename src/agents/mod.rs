//! Format agents: field extraction, action decision and trace logging per format
//!
//! Every agent follows the same four trace writes, in order: metadata, its
//! own fields, the action, then the decision step. The shared sequence lives
//! in [`FormatAgent::process`]; agents supply how the text is read, field
//! extraction and the action rule.

pub mod email;
pub mod json;
pub mod pdf;

pub use email::{EmailAgent, EmailFields, Tone, Urgency};
pub use json::{JsonAgent, JsonFields};
pub use pdf::{PdfAgent, PdfExtractBackend, PdfFields, PdfFlag, PdfSettings, PdfTextExtractor};

use crate::action::Action;
use crate::agent_span;
use crate::document::{Classification, Document, Format};
use crate::error::{PipelineError, PipelineResult};
use crate::trace::TraceStore;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, Instrument};

/// Result of one agent run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOutcome<F> {
    pub fields: F,
    pub action: Action,
}

impl<F> AgentOutcome<F> {
    pub fn map_fields<G>(self, f: impl FnOnce(F) -> G) -> AgentOutcome<G> {
        AgentOutcome {
            fields: f(self.fields),
            action: self.action,
        }
    }
}

/// The step record written as `decision_trace`
#[derive(Debug, Serialize)]
pub struct DecisionStep<'a, F> {
    pub step: &'static str,
    pub fields: &'a F,
    pub action: Action,
}

#[async_trait]
pub trait FormatAgent: Send + Sync {
    type Fields: Serialize + Clone + Send + Sync;

    /// Agent name; also the prefix of its trace subfield
    fn name(&self) -> &'static str;

    /// Value of `metadata.source`
    fn source(&self) -> &'static str;

    /// Value of `decision_trace.step`
    fn trace_step(&self) -> &'static str;

    fn trace_store(&self) -> &TraceStore;

    /// Text the agent analyses. Defaults to the decoded body.
    async fn read_text(&self, document: &Document) -> String {
        document.text.clone()
    }

    fn extract(&self, text: &str) -> Self::Fields;

    fn decide_action(&self, fields: &Self::Fields) -> Action;

    async fn process(
        &self,
        document: &Document,
        classification: Classification,
    ) -> PipelineResult<AgentOutcome<Self::Fields>> {
        let text = self.read_text(document).await;
        self.process_text(document, &text, classification).await
    }

    /// Run the trace sequence over text already produced by [`Self::read_text`]
    async fn process_text(
        &self,
        document: &Document,
        text: &str,
        classification: Classification,
    ) -> PipelineResult<AgentOutcome<Self::Fields>> {
        let span = agent_span!(agent = self.name(), source_id = %document.source_id);
        async {
            let store = self.trace_store();
            let source_id = document.source_id.as_str();

            let mut metadata = Map::new();
            metadata.insert("source".to_string(), Value::from(self.source()));
            metadata.insert("filename".to_string(), Value::from(document.filename.as_str()));
            metadata.insert(
                "classification".to_string(),
                serde_json::to_value(classification)?,
            );
            store.log_metadata(source_id, metadata).await?;

            let fields = self.extract(text);
            store.log_agent_fields(source_id, self.name(), &fields).await?;

            let action = self.decide_action(&fields);
            store.log_action(source_id, action.as_str()).await?;

            store
                .log_decision_trace(
                    source_id,
                    &DecisionStep {
                        step: self.trace_step(),
                        fields: &fields,
                        action,
                    },
                )
                .await?;

            debug!(action = %action, "Agent finished");
            Ok::<_, PipelineError>(AgentOutcome { fields, action })
        }
        .instrument(span)
        .await
    }
}

/// Fields produced by whichever agent handled the document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractedFields {
    Email(EmailFields),
    Json(JsonFields),
    Pdf(PdfFields),
}

/// One agent per concrete format, sharing a trace store
#[derive(Debug, Clone)]
pub struct AgentSet {
    email: EmailAgent,
    json: JsonAgent,
    pdf: PdfAgent,
}

impl AgentSet {
    pub fn new(email: EmailAgent, json: JsonAgent, pdf: PdfAgent) -> Self {
        Self { email, json, pdf }
    }

    /// Default agents over `store`
    pub fn with_store(store: TraceStore, pdf_settings: PdfSettings) -> Self {
        Self::new(
            EmailAgent::new(store.clone()),
            JsonAgent::new(store.clone()),
            PdfAgent::new(store, pdf_settings),
        )
    }

    pub fn pdf(&self) -> &PdfAgent {
        &self.pdf
    }

    /// Text the agent for `format` would analyse
    pub async fn read_text(&self, format: Format, document: &Document) -> String {
        match format {
            Format::Email => self.email.read_text(document).await,
            Format::Json => self.json.read_text(document).await,
            Format::Pdf => self.pdf.read_text(document).await,
            Format::Unknown => document.text.clone(),
        }
    }

    /// Run the agent matching `classification.format`
    pub async fn dispatch(
        &self,
        document: &Document,
        classification: Classification,
    ) -> PipelineResult<AgentOutcome<ExtractedFields>> {
        let text = self.read_text(classification.format, document).await;
        self.dispatch_text(document, &text, classification).await
    }

    /// Like [`Self::dispatch`], over text the caller already read
    pub async fn dispatch_text(
        &self,
        document: &Document,
        text: &str,
        classification: Classification,
    ) -> PipelineResult<AgentOutcome<ExtractedFields>> {
        match classification.format {
            Format::Email => Ok(self
                .email
                .process_text(document, text, classification)
                .await?
                .map_fields(ExtractedFields::Email)),
            Format::Json => Ok(self
                .json
                .process_text(document, text, classification)
                .await?
                .map_fields(ExtractedFields::Json)),
            Format::Pdf => Ok(self
                .pdf
                .process_text(document, text, classification)
                .await?
                .map_fields(ExtractedFields::Pdf)),
            Format::Unknown => Err(PipelineError::unsupported_format(&document.filename)),
        }
    }
}
