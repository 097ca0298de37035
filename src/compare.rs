//! Field-level record-set comparison.
//!
//! [`calculate_differences`] diffs a source set against a target set and
//! emits an immutable [`ChangeSet`]. Records are matched on their
//! cross-platform id first, so the same title lines up across platforms
//! regardless of native ids; records left unmatched are then paired on
//! their native id, which catches copies whose identity fields (title,
//! authors, ISBN) were edited on one side.
//!
//! Four strategies trade precision for speed: `FieldLevel` (per declared
//! field), `ObjectLevel` (whole record atomic), `DeepCompare` (recursive
//! structural diff, the only strategy that reports MOVED/RENAMED), and
//! `HashCompare` (fingerprint pre-filter, falling back to field-level on
//! mismatching pairs).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::CanonicalBook;

/// Comparison strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareStrategy {
    #[default]
    FieldLevel,
    ObjectLevel,
    DeepCompare,
    HashCompare,
}

impl std::str::FromStr for CompareStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FIELD_LEVEL" => Ok(CompareStrategy::FieldLevel),
            "OBJECT_LEVEL" => Ok(CompareStrategy::ObjectLevel),
            "DEEP_COMPARE" => Ok(CompareStrategy::DeepCompare),
            "HASH_COMPARE" => Ok(CompareStrategy::HashCompare),
            other => Err(format!("unknown compare strategy: {}", other)),
        }
    }
}

/// How a change is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
    /// Position change within the set. DeepCompare only.
    Moved,
    /// Native id changed while the identity fields did not. DeepCompare only.
    Renamed,
}

/// Weight of a change, derived from which field changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeSeverity {
    Cosmetic,
    Minor,
    Major,
    Critical,
}

/// One detected difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Cross-platform id of the affected record.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Dotted field path; `None` for whole-record changes.
    pub field: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub severity: ChangeSeverity,
}

/// Immutable output of one comparison run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub change_set_id: String,
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn updated_count(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Updated)
            .count()
    }
}

/// Options for one comparison run.
#[derive(Debug, Clone, Default)]
pub struct CompareOptions {
    pub strategy: CompareStrategy,
    /// Declared fields for field-level comparison; `None` uses the
    /// canonical schema's comparable fields.
    pub fields: Option<Vec<String>>,
}

const DECLARED_FIELDS: &[&str] = &[
    "title",
    "authors",
    "publisher",
    "isbn",
    "cover",
    "progress",
    "status",
    "rating",
    "tags",
];

/// Severity table: identity and bibliographic identity fields weigh most,
/// reading state is minor, presentation is cosmetic.
pub fn field_severity(field: &str) -> ChangeSeverity {
    let root = field.split('.').next().unwrap_or(field);
    match root {
        "id" | "crossPlatformId" | "dataFingerprint" => ChangeSeverity::Critical,
        "isbn" | "title" | "authors" => ChangeSeverity::Major,
        "progress" | "rating" | "status" => ChangeSeverity::Minor,
        _ => ChangeSeverity::Cosmetic,
    }
}

/// Compute field-level differences between a source and target record set.
pub fn calculate_differences(
    source: &[CanonicalBook],
    target: &[CanonicalBook],
    options: &CompareOptions,
) -> ChangeSet {
    let mut changes = Vec::new();
    let mut claimed = vec![false; target.len()];

    for (source_pos, src) in source.iter().enumerate() {
        // Join on the cross-platform id first; fall back to the native id
        // so an identity-field edit pairs as an update, not add/remove.
        let matched = target
            .iter()
            .enumerate()
            .find(|(i, t)| !claimed[*i] && t.cross_platform_id == src.cross_platform_id)
            .or_else(|| {
                target
                    .iter()
                    .enumerate()
                    .find(|(i, t)| !claimed[*i] && t.id == src.id)
            });

        match matched {
            None => changes.push(Change {
                id: src.cross_platform_id.clone(),
                kind: ChangeKind::Added,
                field: None,
                old_value: None,
                new_value: Some(serde_json::to_value(src).unwrap_or(Value::Null)),
                severity: ChangeSeverity::Major,
            }),
            Some((target_pos, tgt)) => {
                claimed[target_pos] = true;
                diff_pair(src, tgt, options, &mut changes);
                if options.strategy == CompareStrategy::DeepCompare {
                    if source_pos != target_pos {
                        changes.push(Change {
                            id: src.cross_platform_id.clone(),
                            kind: ChangeKind::Moved,
                            field: None,
                            old_value: Some(Value::from(source_pos)),
                            new_value: Some(Value::from(target_pos)),
                            severity: ChangeSeverity::Cosmetic,
                        });
                    }
                    if src.id != tgt.id {
                        changes.push(Change {
                            id: src.cross_platform_id.clone(),
                            kind: ChangeKind::Renamed,
                            field: Some("id".to_string()),
                            old_value: Some(Value::from(src.id.clone())),
                            new_value: Some(Value::from(tgt.id.clone())),
                            severity: ChangeSeverity::Critical,
                        });
                    }
                }
            }
        }
    }

    for (i, tgt) in target.iter().enumerate() {
        if !claimed[i] {
            changes.push(Change {
                id: tgt.cross_platform_id.clone(),
                kind: ChangeKind::Removed,
                field: None,
                old_value: Some(serde_json::to_value(tgt).unwrap_or(Value::Null)),
                new_value: None,
                severity: ChangeSeverity::Major,
            });
        }
    }

    ChangeSet {
        change_set_id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        changes,
    }
}

fn diff_pair(
    src: &CanonicalBook,
    tgt: &CanonicalBook,
    options: &CompareOptions,
    changes: &mut Vec<Change>,
) {
    match options.strategy {
        CompareStrategy::ObjectLevel => {
            if src != tgt {
                changes.push(Change {
                    id: src.cross_platform_id.clone(),
                    kind: ChangeKind::Updated,
                    field: None,
                    old_value: Some(serde_json::to_value(src).unwrap_or(Value::Null)),
                    new_value: Some(serde_json::to_value(tgt).unwrap_or(Value::Null)),
                    severity: ChangeSeverity::Major,
                });
            }
        }
        CompareStrategy::HashCompare => {
            // Fingerprint covers the identity fields; equal hashes are
            // treated as unchanged without touching the rest. Native-id
            // pairs whose identity fields diverged fall through here.
            if src.data_fingerprint != tgt.data_fingerprint {
                diff_fields(src, tgt, options, changes);
            }
        }
        CompareStrategy::FieldLevel => diff_fields(src, tgt, options, changes),
        CompareStrategy::DeepCompare => {
            let src_v = serde_json::to_value(src).unwrap_or(Value::Null);
            let tgt_v = serde_json::to_value(tgt).unwrap_or(Value::Null);
            let fields = declared_fields(options);
            if let (Value::Object(s), Value::Object(t)) = (&src_v, &tgt_v) {
                for field in &fields {
                    deep_diff(
                        &src.cross_platform_id,
                        field,
                        s.get(field.as_str()),
                        t.get(field.as_str()),
                        changes,
                    );
                }
            }
        }
    }
}

fn declared_fields(options: &CompareOptions) -> Vec<String> {
    options.fields.clone().unwrap_or_else(|| {
        DECLARED_FIELDS
            .iter()
            .map(|f| f.to_string())
            .collect()
    })
}

fn diff_fields(
    src: &CanonicalBook,
    tgt: &CanonicalBook,
    options: &CompareOptions,
    changes: &mut Vec<Change>,
) {
    let src_v = serde_json::to_value(src).unwrap_or(Value::Null);
    let tgt_v = serde_json::to_value(tgt).unwrap_or(Value::Null);
    let (Value::Object(s), Value::Object(t)) = (&src_v, &tgt_v) else {
        return;
    };
    for field in declared_fields(options) {
        let sv = s.get(&field);
        let tv = t.get(&field);
        if sv != tv {
            changes.push(Change {
                id: src.cross_platform_id.clone(),
                kind: ChangeKind::Updated,
                field: Some(field.clone()),
                old_value: sv.cloned(),
                new_value: tv.cloned(),
                severity: field_severity(&field),
            });
        }
    }
}

/// Recursive structural diff emitting dotted field paths.
fn deep_diff(
    record_id: &str,
    path: &str,
    old: Option<&Value>,
    new: Option<&Value>,
    changes: &mut Vec<Change>,
) {
    match (old, new) {
        (Some(Value::Object(o)), Some(Value::Object(n))) => {
            let mut keys: Vec<&String> = o.keys().chain(n.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                deep_diff(
                    record_id,
                    &format!("{}.{}", path, key),
                    o.get(key.as_str()),
                    n.get(key.as_str()),
                    changes,
                );
            }
        }
        (o, n) if o != n => changes.push(Change {
            id: record_id.to_string(),
            kind: ChangeKind::Updated,
            field: Some(path.to_string()),
            old_value: o.cloned(),
            new_value: n.cloned(),
            severity: field_severity(path),
        }),
        _ => {}
    }
}
