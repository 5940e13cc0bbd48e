//! Data models for the PaperRoute processing pipeline.
//!
//! Documents flow through the pipeline as:
//!
//! ```text
//! ProcessingJob ──▶ OcrResult + VisionResult ──▶ ReconciledDocument
//!               ──▶ Classification ──▶ ProcessedDocument
//! ```
//!
//! Types with constraints validate on construction, on every setter, and on
//! deserialization, so an invalid value never exists at rest.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Day-first formats tried after ISO-8601.
///
/// Month-first (`%m/%d/%Y`) is deliberately absent: "03/04/2024" would be
/// read silently with the wrong month.
const DAY_FIRST_FORMATS: [&str; 2] = ["%d/%m/%Y", "%d.%m.%Y"];

const ISO_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("{field} must not be blank")]
    Blank { field: &'static str },

    #[error("confidence must be between 0.0 and 1.0, got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("page_number must be >= 1, got {0}")]
    InvalidPageNumber(i64),

    #[error("invalid job status '{0}' (expected pending, processing, done or failed)")]
    InvalidStatus(String),

    #[error("Cannot parse date from empty string")]
    EmptyDate,

    #[error("Cannot parse date: {0:?}")]
    UnparseableDate(String),

    #[error("Cannot parse date from {0}")]
    UnsupportedDateType(&'static str),
}

fn non_blank(field: &'static str, value: &str) -> Result<String, ModelError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ModelError::Blank { field });
    }
    Ok(trimmed.to_string())
}

// ============ Confidence ============

/// A score in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Result<Self, ModelError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ModelError::ConfidenceOutOfRange(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Confidence {
    type Error = ModelError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

fn optional_confidence(value: Option<f64>) -> Result<Option<Confidence>, ModelError> {
    value.map(Confidence::new).transpose()
}

// ============ Date parsing ============

/// Parses a document date from free text.
///
/// Tries ISO-8601 date (`YYYY-MM-DD` or basic `YYYYMMDD`), ISO-8601
/// datetime (truncated to its date), then the
/// day-first formats `dd/mm/YYYY` and `dd.mm.YYYY`. Surrounding whitespace
/// is ignored.
pub fn parse_date_str(value: &str) -> Result<NaiveDate, ModelError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ModelError::EmptyDate);
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    // ISO-8601 basic form, YYYYMMDD.
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
            return Ok(date);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.date_naive());
    }
    for fmt in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(dt.date());
        }
    }
    for fmt in DAY_FIRST_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(date);
        }
    }

    Err(ModelError::UnparseableDate(value.to_string()))
}

/// Parses a document date from a dynamically typed value.
///
/// `null` means "no date"; strings go through [`parse_date_str`]; any other
/// JSON type is rejected with an error naming it.
pub fn parse_date_value(value: &Value) -> Result<Option<NaiveDate>, ModelError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => parse_date_str(s).map(Some),
        Value::Bool(_) => Err(ModelError::UnsupportedDateType("bool")),
        Value::Number(n) if n.is_f64() => Err(ModelError::UnsupportedDateType("float")),
        Value::Number(_) => Err(ModelError::UnsupportedDateType("int")),
        Value::Array(_) => Err(ModelError::UnsupportedDateType("array")),
        Value::Object(_) => Err(ModelError::UnsupportedDateType("object")),
    }
}

fn deserialize_document_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_date_value(&value).map_err(serde::de::Error::custom)
}

// ============ ProcessingJob ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// One file moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProcessingJobRecord")]
pub struct ProcessingJob {
    file_path: PathBuf,
    file_type: String,
    created_at: DateTime<Utc>,
    status: JobStatus,
}

#[derive(Deserialize)]
struct ProcessingJobRecord {
    file_path: PathBuf,
    file_type: String,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    status: JobStatus,
}

impl TryFrom<ProcessingJobRecord> for ProcessingJob {
    type Error = ModelError;

    fn try_from(r: ProcessingJobRecord) -> Result<Self, Self::Error> {
        let mut job = ProcessingJob::new(r.file_path, &r.file_type)?;
        job.created_at = r.created_at;
        job.status = r.status;
        Ok(job)
    }
}

fn normalize_file_type(value: &str) -> Result<String, ModelError> {
    non_blank("file_type", value).map(|s| s.to_lowercase())
}

impl ProcessingJob {
    /// A pending job created now. `file_type` is trimmed and lower-cased.
    pub fn new(file_path: impl Into<PathBuf>, file_type: &str) -> Result<Self, ModelError> {
        Ok(Self {
            file_path: file_path.into(),
            file_type: normalize_file_type(file_type)?,
            created_at: Utc::now(),
            status: JobStatus::Pending,
        })
    }

    /// A pending job whose file type is taken from the path's extension.
    pub fn from_path(file_path: impl Into<PathBuf>) -> Result<Self, ModelError> {
        let file_path = file_path.into();
        let ext = file_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(file_path, &ext)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }

    /// Sets the status from its string form; the job is unchanged on error.
    pub fn set_status_str(&mut self, status: &str) -> Result<(), ModelError> {
        self.status = status.parse()?;
        Ok(())
    }

    pub fn set_file_type(&mut self, file_type: &str) -> Result<(), ModelError> {
        self.file_type = normalize_file_type(file_type)?;
        Ok(())
    }
}

// ============ OCR ============

/// Text extracted from a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PageTextRecord")]
pub struct PageText {
    page_number: u32,
    text: String,
}

#[derive(Deserialize)]
struct PageTextRecord {
    page_number: i64,
    text: String,
}

impl TryFrom<PageTextRecord> for PageText {
    type Error = ModelError;

    fn try_from(r: PageTextRecord) -> Result<Self, Self::Error> {
        PageText::new(r.page_number, r.text)
    }
}

impl PageText {
    /// Pages are numbered from 1.
    pub fn new(page_number: i64, text: impl Into<String>) -> Result<Self, ModelError> {
        let page_number = u32::try_from(page_number)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or(ModelError::InvalidPageNumber(page_number))?;
        Ok(Self {
            page_number,
            text: text.into(),
        })
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Output of the OCR service for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    pub pages: Vec<PageText>,
    #[serde(default)]
    pub confidence: Option<Confidence>,
}

impl OcrResult {
    pub fn new(
        text: impl Into<String>,
        pages: Vec<PageText>,
        confidence: Option<f64>,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            text: text.into(),
            pages,
            confidence: optional_confidence(confidence)?,
        })
    }

    /// Builds a result whose full text is the page texts joined by a blank line.
    pub fn from_pages(pages: Vec<PageText>, confidence: Option<f64>) -> Result<Self, ModelError> {
        let text = pages
            .iter()
            .map(PageText::text)
            .collect::<Vec<_>>()
            .join("\n\n");
        Self::new(text, pages, confidence)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Output of the vision model for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionResult {
    pub content: String,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub structural_notes: Option<String>,
}

impl VisionResult {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tables: None,
            structural_notes: None,
        }
    }
}

// ============ Reconciliation ============

/// OCR and vision output merged into one markdown document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledDocument {
    pub markdown: String,
    #[serde(default, deserialize_with = "deserialize_document_date")]
    pub document_date: Option<NaiveDate>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl ReconciledDocument {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            document_date: None,
            title: None,
            language: None,
        }
    }

    /// Parses and sets the document date; the old date is kept on error.
    pub fn set_document_date_str(&mut self, value: &str) -> Result<(), ModelError> {
        self.document_date = Some(parse_date_str(value)?);
        Ok(())
    }
}

// ============ Classification ============

/// Routing decision for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClassificationRecord")]
pub struct Classification {
    recipient: String,
    category: String,
    subject: String,
    confidence: Option<Confidence>,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct ClassificationRecord {
    recipient: String,
    category: String,
    subject: String,
    #[serde(default)]
    confidence: Option<Confidence>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl TryFrom<ClassificationRecord> for Classification {
    type Error = ModelError;

    fn try_from(r: ClassificationRecord) -> Result<Self, Self::Error> {
        let mut c = Classification::new(&r.recipient, &r.category, &r.subject)?;
        c.confidence = r.confidence;
        c.reasoning = r.reasoning;
        Ok(c)
    }
}

impl Classification {
    /// All three fields are trimmed and must be non-blank.
    pub fn new(recipient: &str, category: &str, subject: &str) -> Result<Self, ModelError> {
        Ok(Self {
            recipient: non_blank("recipient", recipient)?,
            category: non_blank("category", category)?,
            subject: non_blank("subject", subject)?,
            confidence: None,
            reasoning: None,
        })
    }

    pub fn with_confidence(mut self, confidence: f64) -> Result<Self, ModelError> {
        self.confidence = Some(Confidence::new(confidence)?);
        Ok(self)
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn confidence(&self) -> Option<Confidence> {
        self.confidence
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn set_recipient(&mut self, value: &str) -> Result<(), ModelError> {
        self.recipient = non_blank("recipient", value)?;
        Ok(())
    }

    pub fn set_category(&mut self, value: &str) -> Result<(), ModelError> {
        self.category = non_blank("category", value)?;
        Ok(())
    }

    pub fn set_subject(&mut self, value: &str) -> Result<(), ModelError> {
        self.subject = non_blank("subject", value)?;
        Ok(())
    }

    pub fn set_confidence(&mut self, value: Option<f64>) -> Result<(), ModelError> {
        self.confidence = optional_confidence(value)?;
        Ok(())
    }

    pub fn set_reasoning(&mut self, value: Option<String>) {
        self.reasoning = value;
    }
}

// ============ ProcessedDocument ============

/// Terminal record for a document that went through the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub original_path: PathBuf,
    pub output_path: PathBuf,
    pub markdown: String,
    pub classification: Classification,
    #[serde(default, deserialize_with = "deserialize_document_date")]
    pub document_date: Option<NaiveDate>,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ProcessedDocument {
    pub fn new(
        original_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        markdown: impl Into<String>,
        classification: Classification,
    ) -> Self {
        Self {
            original_path: original_path.into(),
            output_path: output_path.into(),
            markdown: markdown.into(),
            classification,
            document_date: None,
            indexed: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn set_document_date_str(&mut self, value: &str) -> Result<(), ModelError> {
        self.document_date = Some(parse_date_str(value)?);
        Ok(())
    }
}
