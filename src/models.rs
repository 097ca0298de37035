//! Core data models used throughout shelfsync.
//!
//! These types represent the raw catalog records, canonical books, and
//! validation outcomes that flow through the pipeline. Everything here is a
//! plain value object: components communicate only by returning these types,
//! never by sharing mutable state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema version stamped on every canonical book.
pub const SCHEMA_VERSION: &str = "2.0";

/// A reading platform a catalog record was scraped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Readmoo,
    Kindle,
    Kobo,
    Bookwalker,
    BooksCom,
}

impl Platform {
    /// Stable lowercase label used in cache keys and source tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Readmoo => "readmoo",
            Platform::Kindle => "kindle",
            Platform::Kobo => "kobo",
            Platform::Bookwalker => "bookwalker",
            Platform::BooksCom => "books_com",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "readmoo" => Ok(Platform::Readmoo),
            "kindle" => Ok(Platform::Kindle),
            "kobo" => Ok(Platform::Kobo),
            "bookwalker" => Ok(Platform::Bookwalker),
            "books_com" | "books.com" | "bookscom" => Ok(Platform::BooksCom),
            other => Err(format!("unknown platform: '{}'", other)),
        }
    }
}

/// Untyped platform-specific record as scraped. Ephemeral: owned by the
/// caller and passed by value into the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a record from any JSON value; non-objects become empty records.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self { fields: map },
            _ => Self::default(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// The platform-side identifier, trying the common key spellings.
    pub fn identifier(&self) -> Option<&str> {
        ["id", "bookId", "asin", "itemId"]
            .iter()
            .find_map(|k| self.get_str(k))
            .filter(|s| !s.is_empty())
    }

    pub fn insert(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }
}

/// Reading status of a book, the three-state canonical form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    #[default]
    NotStarted,
    Reading,
    Finished,
}

impl ReadingStatus {
    /// Map a platform status value (bool or free text) onto the canonical
    /// enum. Unrecognized values default to `NotStarted` everywhere — an
    /// unknown status must never fabricate reading progress.
    pub fn from_raw(value: &Value) -> Self {
        match value {
            Value::Bool(true) => ReadingStatus::Finished,
            Value::Bool(false) => ReadingStatus::NotStarted,
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "reading" | "in_progress" | "in-progress" | "started" => ReadingStatus::Reading,
                "finished" | "completed" | "complete" | "done" | "read" => ReadingStatus::Finished,
                _ => ReadingStatus::NotStarted,
            },
            _ => ReadingStatus::NotStarted,
        }
    }
}

/// Cover image URLs at the sizes the platforms serve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverImages {
    pub thumbnail: Option<String>,
    pub small: Option<String>,
    pub medium: Option<String>,
    pub large: Option<String>,
    pub original: Option<String>,
}

impl CoverImages {
    pub fn is_empty(&self) -> bool {
        self.thumbnail.is_none()
            && self.small.is_none()
            && self.medium.is_none()
            && self.large.is_none()
            && self.original.is_none()
    }
}

/// Normalized reading progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    /// Percent read, clamped to 0..=100.
    pub percentage: f64,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub last_position: Option<String>,
}

/// Sync bookkeeping carried on each canonical book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub conflict_resolved: bool,
    pub merge_strategy: Option<String>,
    pub sync_sources: Vec<String>,
    pub pending_sync: bool,
}

/// A book record in the canonical v2.0 schema.
///
/// `data_fingerprint` is a deterministic SHA-256 over exactly three fields:
/// lowercased/trimmed title, normalized authors, and normalized ISBN. It is
/// stable across re-runs on unchanged core fields and changes whenever any
/// of those three change. `cross_platform_id` derives from the same fields
/// and is the join key for the same title across platforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalBook {
    pub id: String,
    pub cross_platform_id: String,
    pub data_fingerprint: String,
    pub platform: Option<Platform>,
    pub title: String,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub isbn: Option<String>,
    pub cover: CoverImages,
    pub progress: ReadingProgress,
    pub status: ReadingStatus,
    pub rating: Option<f64>,
    pub tags: BTreeSet<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: String,
    #[serde(default)]
    pub platform_metadata: Map<String, Value>,
    pub sync_status: SyncState,
}

/// Code attached to a record-level validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingRequiredField,
    InvalidDataType,
    BusinessRuleViolation,
}

/// One validation error on one field. Never aborts a batch; recorded in the
/// record's [`ValidationResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub code: ErrorCode,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: ErrorCode, field: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// A non-fatal quality warning (short title, blank author, suspect ISBN...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityWarning {
    pub field: String,
    pub message: String,
}

impl QualityWarning {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// An auto-correction applied during validation (whitespace trim, field
/// rename, ISBN cleanup, progress clamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFix {
    pub field: String,
    pub action: String,
}

/// Per-record validation outcome. Created per record, aggregated into a
/// [`BatchResult`], then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub book_id: String,
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<QualityWarning>,
    pub fixes: Vec<AppliedFix>,
    /// The raw record after auto-fixes.
    pub record: RawRecord,
    /// Canonical form, attached by the pipeline for valid records only.
    pub book: Option<CanonicalBook>,
}

/// Counters over one batch submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Timing and cache behavior observed while processing a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetrics {
    pub duration_ms: u64,
    pub batches: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Informational only; never affects the quality score.
    pub performance_warnings: Vec<String>,
}

/// Aggregated outcome of a whole submission. Created at batch start, filled
/// by the pipeline stages, returned immutable to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub valid_books: Vec<ValidationResult>,
    pub invalid_books: Vec<ValidationResult>,
    pub normalized_books: Vec<CanonicalBook>,
    pub warnings: Vec<QualityWarning>,
    pub quality_score: u8,
    pub statistics: BatchStatistics,
    pub metrics: BatchMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn platform_round_trips_through_str() {
        for p in [
            Platform::Readmoo,
            Platform::Kindle,
            Platform::Kobo,
            Platform::Bookwalker,
            Platform::BooksCom,
        ] {
            assert_eq!(p.as_str().parse::<Platform>().unwrap(), p);
        }
    }

    #[test]
    fn raw_record_identifier_tries_common_keys() {
        let rec = RawRecord::from_value(json!({"bookId": "b-1", "title": "X"}));
        assert_eq!(rec.identifier(), Some("b-1"));

        let rec = RawRecord::from_value(json!({"id": ""}));
        assert_eq!(rec.identifier(), None);
    }

    #[test]
    fn status_from_raw_defaults_to_not_started() {
        assert_eq!(
            ReadingStatus::from_raw(&json!("???")),
            ReadingStatus::NotStarted
        );
        assert_eq!(
            ReadingStatus::from_raw(&json!(42)),
            ReadingStatus::NotStarted
        );
        assert_eq!(
            ReadingStatus::from_raw(&json!(true)),
            ReadingStatus::Finished
        );
        assert_eq!(
            ReadingStatus::from_raw(&json!("In_Progress")),
            ReadingStatus::Reading
        );
    }

    #[test]
    fn canonical_book_serializes_camel_case() {
        let book = CanonicalBook {
            id: "x".into(),
            schema_version: SCHEMA_VERSION.into(),
            ..Default::default()
        };
        let v = serde_json::to_value(&book).unwrap();
        assert!(v.get("dataFingerprint").is_some());
        assert!(v.get("crossPlatformId").is_some());
        assert_eq!(v["schemaVersion"], "2.0");
    }
}
