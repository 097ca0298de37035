//! Per-record rule validation with auto-fix passes.
//!
//! [`Validator::validate`] runs two auto-fix passes bracketing three rule
//! passes: pre-fixes (whitespace, field renames, platform shape unification)
//! → required-field / type / business-rule checks → post-fixes (ISBN
//! cleanup, progress clamping). Quality checks never fail a record; they
//! only append warnings. A record with zero errors is valid regardless of
//! how many warnings it carries.
//!
//! Rule tables are explicit per-instance state, built by
//! [`PlatformRules::for_platform`]. There is no ambient registry, so
//! parallel pipelines can hold independent tables.

use serde_json::Value;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    AppliedFix, ErrorCode, Platform, QualityWarning, RawRecord, ValidationIssue, ValidationResult,
};
use crate::normalize::clean_isbn;

/// Runtime type a declared field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Array,
    Object,
    Bool,
    /// Progress payloads: a bare number or an object shape.
    NumberOrObject,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Bool => value.is_boolean(),
            FieldType::NumberOrObject => value.is_number() || value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Bool => "boolean",
            FieldType::NumberOrObject => "number or object",
        }
    }
}

/// Declarative rule table for one platform.
#[derive(Debug, Clone)]
pub struct PlatformRules {
    pub platform: Platform,
    /// Keys that must be present, non-null, and non-empty.
    pub required_fields: Vec<String>,
    /// Declared field types, checked when the field is present.
    pub field_types: Vec<(String, FieldType)>,
    /// Pre-fix field renames, applied when the source key is present and
    /// the target key is not.
    pub renames: Vec<(String, String)>,
}

impl PlatformRules {
    /// Build the rule table for a platform. Defaults: `id` (or its
    /// platform equivalent) and `title` are required.
    pub fn for_platform(platform: Platform) -> Self {
        let mut renames = vec![("author".to_string(), "authors".to_string())];
        match platform {
            Platform::Kindle => renames.push(("productTitle".into(), "title".into())),
            Platform::BooksCom => renames.push(("bookName".into(), "title".into())),
            _ => {}
        }

        Self {
            platform,
            required_fields: vec!["id".to_string(), "title".to_string()],
            field_types: vec![
                ("title".to_string(), FieldType::String),
                ("authors".to_string(), FieldType::Array),
                ("publisher".to_string(), FieldType::String),
                ("isbn".to_string(), FieldType::String),
                ("progress".to_string(), FieldType::NumberOrObject),
                ("rating".to_string(), FieldType::Number),
                ("tags".to_string(), FieldType::Array),
            ],
            renames,
        }
    }

    /// A corrupted rule table is a pipeline-integrity failure, not a bad
    /// record: surfaced as [`PipelineError::Fatal`] before any record runs.
    pub fn check_integrity(&self) -> PipelineResult<()> {
        if self.required_fields.is_empty() {
            return Err(PipelineError::Fatal(format!(
                "rule table for {} has no required fields",
                self.platform
            )));
        }
        if self.field_types.is_empty() {
            return Err(PipelineError::Fatal(format!(
                "rule table for {} declares no field types",
                self.platform
            )));
        }
        Ok(())
    }
}

/// Stateless per-record validator bound to one platform's rule table.
#[derive(Debug, Clone)]
pub struct Validator {
    rules: PlatformRules,
    auto_fix: bool,
    strict: bool,
}

impl Validator {
    pub fn new(rules: PlatformRules, auto_fix: bool, strict: bool) -> Self {
        Self {
            rules,
            auto_fix,
            strict,
        }
    }

    pub fn rules(&self) -> &PlatformRules {
        &self.rules
    }

    /// Validate one record. Record-level problems land in the returned
    /// result; only rule-table corruption raises an error.
    pub fn validate(&self, record: RawRecord) -> PipelineResult<ValidationResult> {
        self.rules.check_integrity()?;

        let mut record = record;
        let mut fixes = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.auto_fix {
            self.apply_pre_fixes(&mut record, &mut fixes);
        }

        self.check_required(&record, &mut errors);
        self.check_types(&record, &mut errors);
        self.check_business_rules(&record, &mut errors);

        if self.auto_fix {
            self.apply_post_fixes(&mut record, &mut fixes);
        }

        self.check_quality(&record, &mut warnings);

        let book_id = record
            .identifier()
            .unwrap_or("unknown")
            .to_string();
        let is_valid = errors.is_empty();
        if !is_valid {
            debug!(book_id = %book_id, errors = errors.len(), "record failed validation");
        }

        Ok(ValidationResult {
            book_id,
            is_valid,
            errors,
            warnings,
            fixes,
            record,
            book: None,
        })
    }

    /// Whitespace trims, field renames, platform shape unification.
    fn apply_pre_fixes(&self, record: &mut RawRecord, fixes: &mut Vec<AppliedFix>) {
        for (from, to) in &self.rules.renames {
            if record.get(to).is_none() {
                if let Some(value) = record.remove(from) {
                    record.insert(to, value);
                    fixes.push(AppliedFix {
                        field: to.clone(),
                        action: format!("renamed '{}' to '{}'", from, to),
                    });
                }
            }
        }

        for field in ["title", "publisher", "isbn"] {
            if let Some(s) = record.get_str(field) {
                let trimmed = s.trim();
                if trimmed != s {
                    let trimmed = trimmed.to_string();
                    record.insert(field, Value::String(trimmed));
                    fixes.push(AppliedFix {
                        field: field.to_string(),
                        action: "trimmed surrounding whitespace".to_string(),
                    });
                }
            }
        }

        // Platform shape unification: a scalar authors entry becomes the
        // canonical delimited-string shape handled downstream.
        if let Some(Value::Number(n)) = record.get("authors").cloned() {
            record.insert("authors", Value::String(n.to_string()));
            fixes.push(AppliedFix {
                field: "authors".to_string(),
                action: "coerced scalar author to string".to_string(),
            });
        }
    }

    fn check_required(&self, record: &RawRecord, errors: &mut Vec<ValidationIssue>) {
        for field in &self.rules.required_fields {
            let present = if field == "id" {
                record.identifier().is_some()
            } else {
                match record.get(field) {
                    None | Some(Value::Null) => false,
                    Some(Value::String(s)) => !s.is_empty(),
                    Some(_) => true,
                }
            };
            if !present {
                errors.push(ValidationIssue::new(
                    ErrorCode::MissingRequiredField,
                    field,
                    format!("required field '{}' is absent, null, or empty", field),
                ));
            }
        }
    }

    fn check_types(&self, record: &RawRecord, errors: &mut Vec<ValidationIssue>) {
        for (field, expected) in &self.rules.field_types {
            let Some(value) = record.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if !expected.matches(value) {
                // Exception: authors may be a delimited string.
                if field == "authors" && value.is_string() {
                    continue;
                }
                errors.push(ValidationIssue::new(
                    ErrorCode::InvalidDataType,
                    field,
                    format!("expected {}, got {}", expected.name(), json_type(value)),
                ));
                continue;
            }
            // Authors arrays must hold strings or name-bearing objects.
            if field == "authors" {
                if let Value::Array(items) = value {
                    let ok = items.iter().all(|v| match v {
                        Value::String(_) => true,
                        Value::Object(m) => m.get("name").map(Value::is_string).unwrap_or(false),
                        _ => false,
                    });
                    if !ok {
                        errors.push(ValidationIssue::new(
                            ErrorCode::InvalidDataType,
                            field,
                            "authors entries must be strings or objects with a 'name'",
                        ));
                    }
                }
            }
        }
    }

    fn check_business_rules(&self, record: &RawRecord, errors: &mut Vec<ValidationIssue>) {
        match record.get("progress") {
            Some(Value::Number(n)) => {
                let p = n.as_f64().unwrap_or(0.0);
                if !(0.0..=100.0).contains(&p) {
                    errors.push(ValidationIssue::new(
                        ErrorCode::BusinessRuleViolation,
                        "progress",
                        format!("progress {} outside 0..=100", p),
                    ));
                }
            }
            Some(Value::Object(m)) => {
                if let Some(p) = m
                    .get("percentage")
                    .or_else(|| m.get("percent"))
                    .and_then(Value::as_f64)
                {
                    if !(0.0..=100.0).contains(&p) {
                        errors.push(ValidationIssue::new(
                            ErrorCode::BusinessRuleViolation,
                            "progress",
                            format!("progress percentage {} outside 0..=100", p),
                        ));
                    }
                }
                let current = m
                    .get("currentPage")
                    .or_else(|| m.get("current_page"))
                    .and_then(Value::as_f64);
                let total = m
                    .get("totalPages")
                    .or_else(|| m.get("total_pages"))
                    .and_then(Value::as_f64);
                if let (Some(c), Some(t)) = (current, total) {
                    if c > t {
                        errors.push(ValidationIssue::new(
                            ErrorCode::BusinessRuleViolation,
                            "progress",
                            format!("currentPage {} exceeds totalPages {}", c, t),
                        ));
                    }
                }
            }
            _ => {}
        }

        if let Some(r) = record.get("rating").and_then(Value::as_f64) {
            if !(0.0..=5.0).contains(&r) {
                errors.push(ValidationIssue::new(
                    ErrorCode::BusinessRuleViolation,
                    "rating",
                    format!("rating {} outside 0..=5", r),
                ));
            }
        }
    }

    /// ISBN cleanup and progress clamping.
    fn apply_post_fixes(&self, record: &mut RawRecord, fixes: &mut Vec<AppliedFix>) {
        if let Some(raw) = record.get_str("isbn") {
            let cleaned = clean_isbn(raw);
            if cleaned != raw {
                record.insert("isbn", Value::String(cleaned));
                fixes.push(AppliedFix {
                    field: "isbn".to_string(),
                    action: "stripped separators and isbn prefix".to_string(),
                });
            }
        }

        let clamped = match record.get("progress") {
            Some(Value::Number(n)) => {
                let p = n.as_f64().unwrap_or(0.0);
                let c = p.clamp(0.0, 100.0);
                (c != p).then_some(Value::from(c))
            }
            Some(Value::Object(m)) => {
                let key = ["percentage", "percent"]
                    .iter()
                    .find(|k| m.contains_key(**k))
                    .copied();
                key.and_then(|k| {
                    let p = m.get(k).and_then(Value::as_f64)?;
                    let c = p.clamp(0.0, 100.0);
                    if c != p {
                        let mut m = m.clone();
                        m.insert(k.to_string(), Value::from(c));
                        Some(Value::Object(m))
                    } else {
                        None
                    }
                })
            }
            _ => None,
        };
        if let Some(value) = clamped {
            record.insert("progress", value);
            fixes.push(AppliedFix {
                field: "progress".to_string(),
                action: "clamped percentage to 0..=100".to_string(),
            });
        }
    }

    /// Quality issues never fail validation; they only add warnings.
    fn check_quality(&self, record: &RawRecord, warnings: &mut Vec<QualityWarning>) {
        let short_title_bar = if self.strict { 5 } else { 2 };
        if let Some(title) = record.get_str("title") {
            if title.chars().count() < short_title_bar {
                warnings.push(QualityWarning::new(
                    "title",
                    format!("title shorter than {} characters", short_title_bar),
                ));
            }
        }

        if let Some(Value::Array(items)) = record.get("authors") {
            if items
                .iter()
                .any(|v| v.as_str().map(|s| s.trim().is_empty()).unwrap_or(false))
            {
                warnings.push(QualityWarning::new("authors", "blank author entry"));
            }
        }

        if let Some(isbn) = record.get_str("isbn") {
            if !isbn.is_empty() && isbn.len() < 10 {
                warnings.push(QualityWarning::new("isbn", "ISBN shorter than 10 digits"));
            }
        } else if self.strict {
            warnings.push(QualityWarning::new("isbn", "no ISBN on record"));
        }

        let cover_url = match record.get("cover") {
            Some(Value::String(url)) => Some(url.as_str()),
            Some(Value::Object(m)) => m
                .values()
                .find_map(Value::as_str),
            _ => None,
        };
        if let Some(url) = cover_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(QualityWarning::new("cover", "cover URL is not http(s)"));
            }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
