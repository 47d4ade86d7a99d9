//! doc-triage
//!
//! Classifies incoming business documents by format and intent, extracts
//! structured fields with a format-specific agent, decides a follow-up action,
//! delivers it to a downstream receiver with bounded retry, and keeps a
//! per-document decision trace.
//!
//! # Overview
//!
//! - [`classifier`]: format sniffing and the schema, model, keyword intent chain
//! - [`agents`]: email, JSON and PDF field extraction and action rules
//! - [`action`]: the action set and HTTP delivery with exponential backoff
//! - [`trace`]: the decision trace store (in memory, or Redis with the `redis` feature)
//! - [`orchestrator`]: runs one document through every stage
//! - [`server`]: the warp HTTP surface
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use doc_triage::{AppConfig, Classifier, Orchestrator, TraceStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TraceStore::in_memory();
//! let orchestrator = Orchestrator::from_config(
//!     &AppConfig::default(),
//!     Classifier::rule_based(),
//!     store,
//! );
//!
//! let report = orchestrator
//!     .process(
//!         "complaint.eml",
//!         "From: jane@example.com\nSubject: Complaint\n\nThis is not acceptable.",
//!     )
//!     .await?;
//! assert_eq!(report.action.as_str(), "escalate");
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod agents;
pub mod classifier;
pub mod config;
pub mod document;
pub mod error;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod server;
pub mod testing;
pub mod trace;

pub use action::{Action, ActionPayload, ActionResult, ActionRouter, RetryPolicy};
pub use classifier::Classifier;
pub use config::AppConfig;
pub use document::{Classification, Document, Format, Intent};
pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{Orchestrator, ProcessingReport};
pub use trace::{TraceRecord, TraceStore};
