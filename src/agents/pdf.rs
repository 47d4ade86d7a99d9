//! PDF agent: failure-tolerant text extraction, invoice totals and compliance mentions

use super::FormatAgent;
use crate::action::Action;
use crate::config::PdfSection;
use crate::document::Document;
use crate::trace::TraceStore;
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

const PDF_HEADER: &[u8] = b"%PDF-";
const EOF_MARKER: &[u8] = b"%%EOF";

const COMPLIANCE_VOCABULARY: [&str; 4] = ["GDPR", "FDA", "HIPAA", "PCI"];

static INVOICE_TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)total(?: amount)?[:\s]*([\d,.]+)").expect("invoice total pattern is valid")
});

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Not a PDF document")]
    NotPdf,
    #[error("PDF parsing failed: {0}")]
    Parse(String),
}

/// Page-level text extraction from raw PDF bytes. Runs on a blocking thread.
pub trait PdfTextExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, PdfError>;
}

/// Extraction through the `pdf-extract` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractBackend;

impl PdfTextExtractor for PdfExtractBackend {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, PdfError> {
        pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| PdfError::Parse(e.to_string()))
    }
}

/// Check the header and append an end-of-file marker when it is missing
pub fn prepare_pdf_bytes(bytes: &[u8]) -> Result<Vec<u8>, PdfError> {
    if !bytes.starts_with(PDF_HEADER) {
        return Err(PdfError::NotPdf);
    }

    let mut prepared = bytes.to_vec();
    if !bytes.windows(EOF_MARKER.len()).any(|w| w == EOF_MARKER) {
        prepared.extend_from_slice(b"\n%%EOF\n");
    }
    Ok(prepared)
}

/// First `total` figure in the text, separators stripped
pub fn extract_invoice_total(text: &str) -> Option<f64> {
    let captures = INVOICE_TOTAL.captures(text)?;
    captures.get(1)?.as_str().replace(',', "").parse().ok()
}

/// Compliance terms present in the text, in vocabulary order
pub fn extract_policy_mentions(text: &str) -> Vec<String> {
    let text = text.to_lowercase();
    COMPLIANCE_VOCABULARY
        .iter()
        .filter(|term| text.contains(&term.to_lowercase()))
        .map(|term| term.to_string())
        .collect()
}

/// Render a figure with thousands separators, dropping a zero fraction
fn format_amount(value: f64) -> String {
    let rendered = if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    };
    let (sign, rest) = match rendered.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", rendered.as_str()),
    };
    let (whole, fraction) = match rest.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (rest, None),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}

/// A condition that sends a PDF to compliance review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PdfFlag {
    InvoiceTotalExceeded { total: f64, threshold: f64 },
    PolicyMentions { mentions: Vec<String> },
}

impl PdfFlag {
    pub fn message(&self) -> String {
        match self {
            PdfFlag::InvoiceTotalExceeded { threshold, .. } => {
                format!("Invoice total exceeds {}", format_amount(*threshold))
            }
            PdfFlag::PolicyMentions { mentions } => {
                format!("Policy mentions: {}", mentions.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfFields {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_mentions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<PdfFlag>,
    /// Every raised flag's message, joined with "; "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
}

impl PdfFields {
    pub fn analyze(text: &str, invoice_total_threshold: f64) -> Self {
        let mut flags = Vec::new();

        let invoice_total = extract_invoice_total(text);
        if let Some(total) = invoice_total {
            if total > invoice_total_threshold {
                flags.push(PdfFlag::InvoiceTotalExceeded {
                    total,
                    threshold: invoice_total_threshold,
                });
            }
        }

        let mentions = extract_policy_mentions(text);
        let policy_mentions = if mentions.is_empty() {
            None
        } else {
            flags.push(PdfFlag::PolicyMentions {
                mentions: mentions.clone(),
            });
            Some(mentions)
        };

        let flag = if flags.is_empty() {
            None
        } else {
            Some(
                flags
                    .iter()
                    .map(PdfFlag::message)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        Self {
            text: text.to_string(),
            invoice_total,
            policy_mentions,
            flags,
            flag,
        }
    }

    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfSettings {
    pub invoice_total_threshold: f64,
    pub extraction_timeout: Duration,
    pub max_concurrent_extractions: usize,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self::from(&PdfSection::default())
    }
}

impl From<&PdfSection> for PdfSettings {
    fn from(section: &PdfSection) -> Self {
        Self {
            invoice_total_threshold: section.invoice_total_threshold,
            extraction_timeout: section.extraction_timeout(),
            max_concurrent_extractions: section.max_concurrent_extractions,
        }
    }
}

#[derive(Clone)]
pub struct PdfAgent {
    store: TraceStore,
    settings: PdfSettings,
    extractor: Arc<dyn PdfTextExtractor>,
    extraction_slots: Arc<Semaphore>,
}

impl std::fmt::Debug for PdfAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfAgent")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PdfAgent {
    pub fn new(store: TraceStore, settings: PdfSettings) -> Self {
        Self::with_extractor(store, settings, Arc::new(PdfExtractBackend))
    }

    pub fn with_extractor(
        store: TraceStore,
        settings: PdfSettings,
        extractor: Arc<dyn PdfTextExtractor>,
    ) -> Self {
        Self {
            extraction_slots: Arc::new(Semaphore::new(settings.max_concurrent_extractions.max(1))),
            store,
            settings,
            extractor,
        }
    }

    pub fn settings(&self) -> &PdfSettings {
        &self.settings
    }

    /// Extract the document text. Never fails: a missing header, a parser
    /// error or panic, or a timeout all yield an empty string.
    pub async fn extract_text(&self, bytes: Bytes) -> String {
        let prepared = match prepare_pdf_bytes(&bytes) {
            Ok(prepared) => prepared,
            Err(e) => {
                debug!(error = %e, "Skipping PDF extraction");
                return String::new();
            }
        };

        let extractor = Arc::clone(&self.extractor);
        let slots = Arc::clone(&self.extraction_slots);
        // A timeout cannot stop a blocking thread, so the permit travels with
        // it and is released only when the parser returns.
        let task = async move {
            let Ok(permit) = slots.acquire_owned().await else {
                return None;
            };
            Some(
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    extractor.extract_pages(&prepared)
                })
                .await,
            )
        };

        match tokio::time::timeout(self.settings.extraction_timeout, task).await {
            Ok(Some(Ok(Ok(pages)))) => pages
                .into_iter()
                .filter(|page| !page.is_empty())
                .collect::<Vec<_>>()
                .concat(),
            Ok(Some(Ok(Err(e)))) => {
                warn!(error = %e, "PDF text extraction failed");
                String::new()
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "PDF extraction task aborted");
                String::new()
            }
            Ok(None) => {
                warn!("PDF extraction slots closed");
                String::new()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.settings.extraction_timeout.as_millis() as u64,
                    "PDF text extraction timed out"
                );
                String::new()
            }
        }
    }
}

#[async_trait]
impl FormatAgent for PdfAgent {
    type Fields = PdfFields;

    fn name(&self) -> &'static str {
        "pdf_agent"
    }

    fn source(&self) -> &'static str {
        "pdf"
    }

    fn trace_step(&self) -> &'static str {
        "pdf_processed"
    }

    fn trace_store(&self) -> &TraceStore {
        &self.store
    }

    async fn read_text(&self, document: &Document) -> String {
        let text = self.extract_text(document.bytes.clone()).await;
        debug!(chars = text.len(), "PDF text extracted");
        text
    }

    fn extract(&self, text: &str) -> PdfFields {
        PdfFields::analyze(text, self.settings.invoice_total_threshold)
    }

    fn decide_action(&self, fields: &PdfFields) -> Action {
        if fields.is_flagged() {
            Action::Flagged
        } else {
            Action::Accepted
        }
    }
}
