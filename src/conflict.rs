//! Conflict detection and resolution.
//!
//! A change only becomes a conflict when both sides were independently
//! modified since the last common sync point — a one-sided change is a
//! plain update and flows through sync untouched. Detected conflicts carry
//! enough context (values, per-side modification times) for a strategy to
//! resolve them without re-reading the record sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::compare::{Change, ChangeKind, ChangeSeverity, ChangeSet};
use crate::models::CanonicalBook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    ValueConflict,
    DeleteUpdateConflict,
    CreateConflict,
    SchemaConflict,
    PermissionConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// How a conflict gets resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    /// Deterministic tie-break on timestamp recency.
    LastWriteWins,
    PreferLocal,
    PreferRemote,
    Merge,
    Manual,
}

/// A field-level disagreement between two independently modified copies of
/// the same logical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub conflict_id: String,
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    /// Cross-platform id of the affected record.
    pub record_id: String,
    pub field: Option<String>,
    pub local_value: Option<Value>,
    pub remote_value: Option<Value>,
    pub local_updated: Option<DateTime<Utc>>,
    pub remote_updated: Option<DateTime<Utc>>,
    pub suggested_resolution: Option<ResolutionStrategy>,
    pub auto_resolvable: bool,
}

/// Outcome of applying a strategy to one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub resolution_id: String,
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    pub resolved_value: Option<Value>,
    pub applied_at: DateTime<Utc>,
}

/// Detection parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionCriteria {
    /// The last common sync point. `None` means the sets never synced;
    /// without a baseline no concurrent edit can be proven.
    pub last_sync: Option<DateTime<Utc>>,
    /// Strict mode also flags ambiguous cases (equal or missing
    /// modification times) as manual conflicts.
    pub strict: bool,
}

fn severity_of(change: &Change) -> ConflictSeverity {
    match change.severity {
        ChangeSeverity::Critical => ConflictSeverity::Critical,
        ChangeSeverity::Major => ConflictSeverity::High,
        ChangeSeverity::Minor => ConflictSeverity::Medium,
        ChangeSeverity::Cosmetic => ConflictSeverity::Low,
    }
}

fn is_identity_field(field: &str) -> bool {
    let root = field.split('.').next().unwrap_or(field);
    matches!(root, "id" | "crossPlatformId" | "dataFingerprint" | "isbn")
}

/// Classify the changes of a [`ChangeSet`] into conflicts.
///
/// `local` and `remote` are the record sets the change set was computed
/// from; they supply the per-side modification times the concurrency check
/// needs.
pub fn detect_conflicts(
    change_set: &ChangeSet,
    local: &[CanonicalBook],
    remote: &[CanonicalBook],
    criteria: &DetectionCriteria,
) -> Vec<Conflict> {
    let Some(last_sync) = criteria.last_sync else {
        return Vec::new();
    };

    let find = |set: &'_ [CanonicalBook], key: &str| -> Option<CanonicalBook> {
        set.iter().find(|b| b.cross_platform_id == key).cloned()
    };

    let mut conflicts = Vec::new();
    for change in &change_set.changes {
        let local_book = find(local, &change.id);
        let remote_book = find(remote, &change.id);

        match change.kind {
            ChangeKind::Updated | ChangeKind::Renamed => {
                let (Some(lb), Some(rb)) = (&local_book, &remote_book) else {
                    continue;
                };
                let local_touched = lb.updated_at > last_sync;
                let remote_touched = rb.updated_at > last_sync;
                let concurrent = local_touched && remote_touched;
                let ambiguous = criteria.strict && lb.updated_at == rb.updated_at;
                if !concurrent && !ambiguous {
                    // One-sided change: a plain update, not a conflict.
                    continue;
                }

                let both_created_fresh = lb.created_at > last_sync && rb.created_at > last_sync;
                let kind = if both_created_fresh {
                    ConflictKind::CreateConflict
                } else {
                    ConflictKind::ValueConflict
                };

                let field_is_identity = change
                    .field
                    .as_deref()
                    .map(is_identity_field)
                    .unwrap_or(true);
                let has_recency_winner = lb.updated_at != rb.updated_at;
                let auto_resolvable = kind == ConflictKind::ValueConflict
                    && !field_is_identity
                    && has_recency_winner;

                conflicts.push(Conflict {
                    conflict_id: Uuid::new_v4().to_string(),
                    kind,
                    severity: severity_of(change),
                    record_id: change.id.clone(),
                    field: change.field.clone(),
                    local_value: change.old_value.clone(),
                    remote_value: change.new_value.clone(),
                    local_updated: Some(lb.updated_at),
                    remote_updated: Some(rb.updated_at),
                    suggested_resolution: if auto_resolvable {
                        Some(ResolutionStrategy::LastWriteWins)
                    } else {
                        Some(ResolutionStrategy::Manual)
                    },
                    auto_resolvable,
                });
            }
            ChangeKind::Removed => {
                // Absent locally: if the surviving remote copy was updated
                // since the sync point, a local delete races a remote edit.
                if let Some(rb) = &remote_book {
                    if rb.updated_at > last_sync {
                        conflicts.push(Conflict {
                            conflict_id: Uuid::new_v4().to_string(),
                            kind: ConflictKind::DeleteUpdateConflict,
                            severity: ConflictSeverity::High,
                            record_id: change.id.clone(),
                            field: None,
                            local_value: None,
                            // Removed changes carry the surviving remote
                            // copy in old_value.
                            remote_value: change.old_value.clone(),
                            local_updated: None,
                            remote_updated: Some(rb.updated_at),
                            suggested_resolution: Some(ResolutionStrategy::Manual),
                            auto_resolvable: false,
                        });
                    }
                }
            }
            ChangeKind::Added | ChangeKind::Moved => {}
        }
    }
    conflicts
}

/// Apply a strategy to a conflict, yielding a [`Resolution`].
pub fn resolve(conflict: &Conflict, strategy: ResolutionStrategy) -> Resolution {
    let resolved_value = match strategy {
        ResolutionStrategy::PreferLocal => conflict.local_value.clone(),
        ResolutionStrategy::PreferRemote => conflict.remote_value.clone(),
        ResolutionStrategy::LastWriteWins => {
            match (conflict.local_updated, conflict.remote_updated) {
                (Some(l), Some(r)) if l >= r => conflict.local_value.clone(),
                (Some(_), Some(_)) => conflict.remote_value.clone(),
                (Some(_), None) => conflict.local_value.clone(),
                _ => conflict.remote_value.clone(),
            }
        }
        ResolutionStrategy::Merge => merge_values(&conflict.local_value, &conflict.remote_value),
        ResolutionStrategy::Manual => None,
    };
    Resolution {
        resolution_id: Uuid::new_v4().to_string(),
        conflict_id: conflict.conflict_id.clone(),
        strategy,
        resolved_value,
        applied_at: Utc::now(),
    }
}

/// Merge: array values union (order: local then unseen remote entries);
/// anything else falls back to the local value.
fn merge_values(local: &Option<Value>, remote: &Option<Value>) -> Option<Value> {
    match (local, remote) {
        (Some(Value::Array(l)), Some(Value::Array(r))) => {
            let mut merged = l.clone();
            for item in r {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Some(Value::Array(merged))
        }
        (Some(l), _) => Some(l.clone()),
        (None, r) => r.clone(),
    }
}
