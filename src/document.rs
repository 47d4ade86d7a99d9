//! Document and classification types shared by every pipeline stage
//!
//! A [`Document`] lives for a single processing call. Only the records derived
//! from it (the decision trace) outlive the request.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Wire format of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    #[serde(rename = "JSON")]
    Json,
    Email,
    #[serde(rename = "PDF")]
    Pdf,
    Unknown,
}

impl Format {
    /// Map a filename extension (without the dot, any case) to a format
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "eml" | "msg" | "txt" => Some(Format::Email),
            "pdf" => Some(Format::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "JSON",
            Format::Email => "Email",
            Format::Pdf => "PDF",
            Format::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business intent of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    #[serde(rename = "RFQ")]
    Rfq,
    Complaint,
    Invoice,
    Regulation,
    #[serde(rename = "Fraud Risk")]
    FraudRisk,
    Unknown,
}

impl Intent {
    /// The closed label set a classifier may answer with
    pub const LABELS: [Intent; 5] = [
        Intent::Rfq,
        Intent::Complaint,
        Intent::Invoice,
        Intent::Regulation,
        Intent::FraudRisk,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Intent::Rfq => "RFQ",
            Intent::Complaint => "Complaint",
            Intent::Invoice => "Invoice",
            Intent::Regulation => "Regulation",
            Intent::FraudRisk => "Fraud Risk",
            Intent::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of classifying one document. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub format: Format,
    pub intent: Intent,
}

/// A single uploaded document travelling through the pipeline
#[derive(Debug, Clone)]
pub struct Document {
    /// Trace key: the filename stem
    pub source_id: String,
    pub filename: String,
    pub bytes: Bytes,
    /// Lossy UTF-8 decoding of `bytes`. PDF agents read their own text from `bytes`.
    pub text: String,
    pub format: Format,
}

impl Document {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let filename = filename.into();
        let bytes = bytes.into();
        Self {
            source_id: source_id_from_filename(&filename),
            text: String::from_utf8_lossy(&bytes).into_owned(),
            filename,
            bytes,
            format: Format::Unknown,
        }
    }

    /// Build a document from already-decoded text
    pub fn from_text(filename: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut document = Self::new(filename, Bytes::from(text.clone().into_bytes()));
        document.text = text;
        document
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

/// Lower-cased extension of a filename, if any
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Derive the canonical source id: the final path component without its last extension
pub fn source_id_from_filename(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| filename.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_strips_final_extension_only() {
        assert_eq!(source_id_from_filename("invoice.json"), "invoice");
        assert_eq!(source_id_from_filename("archive.tar.gz"), "archive.tar");
        assert_eq!(source_id_from_filename("uploads/complaint.eml"), "complaint");
        assert_eq!(source_id_from_filename("README"), "README");
    }

    #[test]
    fn test_extension_mapping_is_case_insensitive() {
        assert_eq!(Format::from_extension("JSON"), Some(Format::Json));
        assert_eq!(Format::from_extension("Eml"), Some(Format::Email));
        assert_eq!(Format::from_extension("msg"), Some(Format::Email));
        assert_eq!(Format::from_extension("txt"), Some(Format::Email));
        assert_eq!(Format::from_extension("PDF"), Some(Format::Pdf));
        assert_eq!(Format::from_extension("docx"), None);
    }

    #[test]
    fn test_labels_serialize_to_wire_names() {
        assert_eq!(serde_json::to_string(&Format::Json).unwrap(), "\"JSON\"");
        assert_eq!(serde_json::to_string(&Format::Pdf).unwrap(), "\"PDF\"");
        assert_eq!(
            serde_json::to_string(&Intent::FraudRisk).unwrap(),
            "\"Fraud Risk\""
        );
        assert_eq!(serde_json::to_string(&Intent::Rfq).unwrap(), "\"RFQ\"");

        let classification = Classification {
            format: Format::Email,
            intent: Intent::Complaint,
        };
        assert_eq!(
            serde_json::to_value(classification).unwrap(),
            serde_json::json!({"format": "Email", "intent": "Complaint"})
        );
    }

    #[test]
    fn test_document_decodes_text_lossily() {
        let document = Document::new("notes.txt", vec![b'h', b'i', 0xff]);
        assert_eq!(document.source_id, "notes");
        assert!(document.text.starts_with("hi"));
        assert_eq!(document.format, Format::Unknown);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a/b/Report.PDF"), Some("pdf".to_string()));
        assert_eq!(file_extension("noext"), None);
    }
}
