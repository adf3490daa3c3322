//! Core data models used throughout formfill.
//!
//! These types represent templates, fill requests and the persisted fill
//! records that flow between the store, the filler and the HTTP layer.

use serde::Serialize;

/// Placeholder key → value mapping, in the order the client supplied it.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// File formats accepted as templates, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Xlsx,
    Docx,
}

impl TemplateFormat {
    /// Classifies a file name by extension (ASCII case-insensitive).
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".xlsx") {
            Some(TemplateFormat::Xlsx)
        } else if lower.ends_with(".docx") {
            Some(TemplateFormat::Docx)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            TemplateFormat::Xlsx => ".xlsx",
            TemplateFormat::Docx => ".docx",
        }
    }
}

/// A template loaded from the store, ready for parsing.
#[derive(Debug, Clone)]
pub struct TemplateHandle {
    pub name: String,
    pub format: Option<TemplateFormat>,
    pub bytes: Vec<u8>,
}

/// Validated input of a fill operation.
#[derive(Debug, Clone)]
pub struct FillRequest {
    pub filename: String,
    pub fields: FieldMap,
}

/// Persisted log entry for one fill operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FillRecord {
    pub id: i64,
    /// Name of the source template, not of the filled output.
    pub filename: String,
    pub version: String,
    /// The request's fields serialized as JSON text.
    pub data: String,
    pub created_at: String,
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub filename: String,
    pub url: String,
}

/// Result of a successful fill.
#[derive(Debug, Clone, Serialize)]
pub struct FillOutcome {
    pub output: String,
    pub url: String,
    pub record_id: i64,
}
