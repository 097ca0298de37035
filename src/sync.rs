//! Synchronization orchestration.
//!
//! [`SyncOrchestrator::orchestrate_sync`] runs the staged sync pipeline:
//! VALIDATION → COMPARISON → CONFLICT_DETECTION → STRATEGY_SELECTION →
//! EXECUTION. Every stage is a hard stop on failure with a stage-tagged
//! error, with one exception: conflict detection is best-effort — when it
//! cannot run (no common sync baseline) the run records a warning and
//! proceeds without conflict awareness.
//!
//! Strategy selection is a decision table evaluated in order: zero changes
//! → standard; conflicts present or more than 20 changes → batch; more
//! than 5 changes without conflicts → parallel; otherwise standard.
//! Unresolved non-auto-resolvable conflicts route through the dedicated
//! conflict-handling path rather than the normal data-sync path: their
//! changes are held back from the executor and surface in the report for
//! manual resolution.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compare::{calculate_differences, Change, ChangeKind, ChangeSet, CompareOptions};
use crate::config::{PipelineOptions, SyncOptions, SyncStrategy};
use crate::conflict::{detect_conflicts, resolve, Conflict, DetectionCriteria, Resolution};
use crate::error::{SyncError, SyncResult, SyncStage};
use crate::models::{CanonicalBook, Platform};
use crate::progress::{EventSink, PipelineEvent};
use crate::retry::{AttemptError, RetryCoordinator, RetryPolicy, SyncJob};

/// Per-stage wall-clock timing recorded in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub stage: SyncStage,
    pub duration_ms: u64,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub sync_id: String,
    pub strategy: SyncStrategy,
    pub total_changes: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub conflicts_detected: usize,
    pub conflicts_auto_resolved: usize,
    pub resolutions: Vec<Resolution>,
    pub unresolved_conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
    pub stage_timings: Vec<StageTiming>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub success: bool,
}

/// Running counters across the orchestrator's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub conflicted_syncs: u64,
    pub cumulative_ms: u64,
}

impl SyncStats {
    pub fn average_ms(&self) -> u64 {
        let total = self.successful_syncs + self.failed_syncs;
        if total == 0 {
            0
        } else {
            self.cumulative_ms / total
        }
    }

    pub fn conflict_rate(&self) -> f64 {
        let total = self.successful_syncs + self.failed_syncs;
        if total == 0 {
            0.0
        } else {
            self.conflicted_syncs as f64 / total as f64
        }
    }
}

/// Tuning knobs adjusted by [`SyncOrchestrator::optimize_performance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningProfile {
    pub batch_size: usize,
    pub parallelism: usize,
    pub strict_conflict_detection: bool,
}

impl Default for TuningProfile {
    fn default() -> Self {
        Self {
            batch_size: 100,
            parallelism: 1,
            strict_conflict_detection: false,
        }
    }
}

impl TuningProfile {
    /// Copy the tuning onto a validation pipeline's options. The
    /// orchestrator consumes `strict_conflict_detection` itself on the next
    /// run; batch size and parallelism belong to the pipeline feeding it.
    pub fn apply_to(&self, options: &mut PipelineOptions) {
        options.batch_size = self.batch_size;
        options.concurrency = self.parallelism;
    }
}

/// Applies a chosen strategy to a change set. The core ships an in-memory
/// implementation; real transports implement this seam.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    async fn apply(&self, strategy: SyncStrategy, changes: &ChangeSet)
        -> Result<(), AttemptError>;
}

/// Executor that applies changes to nothing. Used by tests and dry runs.
pub struct InMemoryExecutor;

#[async_trait]
impl SyncExecutor for InMemoryExecutor {
    async fn apply(
        &self,
        _strategy: SyncStrategy,
        _changes: &ChangeSet,
    ) -> Result<(), AttemptError> {
        Ok(())
    }
}

/// Composes the comparator, conflict detector, and retry coordinator into
/// one staged sync run, and keeps the running counters the performance
/// optimizer feeds on.
pub struct SyncOrchestrator {
    options: SyncOptions,
    compare_options: CompareOptions,
    executor: Arc<dyn SyncExecutor>,
    stats: Mutex<SyncStats>,
    tuning: Mutex<TuningProfile>,
}

impl SyncOrchestrator {
    pub fn new(options: SyncOptions) -> Self {
        let strict = options.strict_conflict_detection;
        Self {
            options,
            compare_options: CompareOptions::default(),
            executor: Arc::new(InMemoryExecutor),
            stats: Mutex::new(SyncStats::default()),
            tuning: Mutex::new(TuningProfile {
                strict_conflict_detection: strict,
                ..Default::default()
            }),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn SyncExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_compare_options(mut self, compare_options: CompareOptions) -> Self {
        self.compare_options = compare_options;
        self
    }

    pub fn stats(&self) -> SyncStats {
        *self.stats.lock().unwrap()
    }

    pub fn tuning(&self) -> TuningProfile {
        *self.tuning.lock().unwrap()
    }

    /// Run the staged sync pipeline over two record sets.
    pub async fn orchestrate_sync(
        &self,
        source: &[CanonicalBook],
        target: &[CanonicalBook],
        sink: &dyn EventSink,
    ) -> SyncResult<SyncReport> {
        let sync_id = Uuid::new_v4().to_string();
        sink.emit(PipelineEvent::SyncStarted {
            sync_id: sync_id.clone(),
        });
        let started = Instant::now();

        let result = self.run_stages(&sync_id, source, target).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(mut report) => {
                report.duration_ms = duration_ms;
                let mut stats = self.stats.lock().unwrap();
                stats.successful_syncs += 1;
                stats.cumulative_ms += duration_ms;
                if report.conflicts_detected > 0 {
                    stats.conflicted_syncs += 1;
                }
                Ok(report)
            }
            Err(err) => {
                sink.emit(PipelineEvent::SyncFailed {
                    sync_id,
                    error: err.to_string(),
                });
                let mut stats = self.stats.lock().unwrap();
                stats.failed_syncs += 1;
                stats.cumulative_ms += duration_ms;
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        sync_id: &str,
        source: &[CanonicalBook],
        target: &[CanonicalBook],
    ) -> SyncResult<SyncReport> {
        let mut timings = Vec::new();
        let mut warnings = Vec::new();

        // VALIDATION: prerequisite shape checks on both sets.
        let stage_start = Instant::now();
        self.validate_sets(source, target)?;
        timings.push(StageTiming {
            stage: SyncStage::Validation,
            duration_ms: stage_start.elapsed().as_millis() as u64,
        });

        // COMPARISON.
        let stage_start = Instant::now();
        let changes = calculate_differences(source, target, &self.compare_options);
        timings.push(StageTiming {
            stage: SyncStage::Comparison,
            duration_ms: stage_start.elapsed().as_millis() as u64,
        });

        // CONFLICT_DETECTION: only when updates exist; never fatal.
        let stage_start = Instant::now();
        let mut conflicts = Vec::new();
        if changes.updated_count() > 0 {
            match self.detect(&changes, source, target) {
                Ok(found) => conflicts = found,
                Err(reason) => {
                    warn!(sync_id = %sync_id, reason = %reason, "conflict detection skipped");
                    warnings.push(format!("conflict detection skipped: {}", reason));
                }
            }
        }
        timings.push(StageTiming {
            stage: SyncStage::ConflictDetection,
            duration_ms: stage_start.elapsed().as_millis() as u64,
        });

        // STRATEGY_SELECTION.
        let stage_start = Instant::now();
        let strategy = self.select_strategy(&changes, &conflicts);
        timings.push(StageTiming {
            stage: SyncStage::StrategySelection,
            duration_ms: stage_start.elapsed().as_millis() as u64,
        });
        debug!(sync_id = %sync_id, ?strategy, changes = changes.changes.len(), conflicts = conflicts.len(), "strategy selected");

        // Conflict-handling path: auto-resolve what has a deterministic
        // tie-break, report the rest for manual handling.
        let mut resolutions = Vec::new();
        let mut unresolved = Vec::new();
        for conflict in &conflicts {
            if conflict.auto_resolvable {
                let strategy = conflict
                    .suggested_resolution
                    .unwrap_or(crate::conflict::ResolutionStrategy::LastWriteWins);
                resolutions.push(resolve(conflict, strategy));
            } else {
                unresolved.push(conflict.clone());
            }
        }
        if !unresolved.is_empty() {
            info!(
                sync_id = %sync_id,
                unresolved = unresolved.len(),
                "conflicts routed to manual handling"
            );
        }

        // Changes under an unresolved conflict are held back; only the
        // remainder reaches the executor.
        let executed = if unresolved.is_empty() {
            changes.clone()
        } else {
            let held = |change: &Change| {
                unresolved
                    .iter()
                    .any(|c| c.record_id == change.id && c.field == change.field)
            };
            let executable: Vec<Change> = changes
                .changes
                .iter()
                .filter(|c| !held(c))
                .cloned()
                .collect();
            let held_count = changes.changes.len() - executable.len();
            if held_count > 0 {
                warnings.push(format!(
                    "{} conflicted changes held back for manual resolution",
                    held_count
                ));
            }
            ChangeSet {
                change_set_id: changes.change_set_id.clone(),
                timestamp: changes.timestamp,
                changes: executable,
            }
        };

        // EXECUTION, under retry management.
        let stage_start = Instant::now();
        let platforms = |set: &[CanonicalBook]| {
            let mut out: Vec<Platform> = set.iter().filter_map(|b| b.platform).collect();
            out.sort_by_key(|p| p.as_str());
            out.dedup();
            out
        };
        let mut job = SyncJob::new(platforms(source), platforms(target));
        job.sync_id = sync_id.to_string();
        let coordinator = RetryCoordinator::new(RetryPolicy::from(&self.options));
        let executor = self.executor.clone();
        let changes_ref = &executed;
        coordinator
            .execute(&mut job, |_attempt| {
                let executor = executor.clone();
                async move { executor.apply(strategy, changes_ref).await }
            })
            .await?;
        timings.push(StageTiming {
            stage: SyncStage::Execution,
            duration_ms: stage_start.elapsed().as_millis() as u64,
        });

        let count_kind = |kind: ChangeKind| {
            changes
                .changes
                .iter()
                .filter(|c| c.kind == kind)
                .count()
        };

        Ok(SyncReport {
            sync_id: sync_id.to_string(),
            strategy,
            total_changes: changes.changes.len(),
            added: count_kind(ChangeKind::Added),
            updated: changes.updated_count(),
            removed: count_kind(ChangeKind::Removed),
            conflicts_detected: conflicts.len(),
            conflicts_auto_resolved: resolutions.len(),
            resolutions,
            unresolved_conflicts: unresolved,
            warnings,
            stage_timings: timings,
            duration_ms: 0,
            attempts: job.attempts,
            success: true,
        })
    }

    fn validate_sets(&self, source: &[CanonicalBook], target: &[CanonicalBook]) -> SyncResult<()> {
        for (name, set) in [("source", source), ("target", target)] {
            for book in set {
                if book.cross_platform_id.is_empty() || book.data_fingerprint.is_empty() {
                    return Err(SyncError::stage(
                        SyncStage::Validation,
                        format!("{} set contains a record without identity keys", name),
                    ));
                }
            }
            let mut keys: Vec<&str> = set.iter().map(|b| b.cross_platform_id.as_str()).collect();
            keys.sort_unstable();
            let before = keys.len();
            keys.dedup();
            if keys.len() != before {
                return Err(SyncError::stage(
                    SyncStage::Validation,
                    format!("{} set contains duplicate cross-platform ids", name),
                ));
            }
        }
        Ok(())
    }

    /// Errors here are reasons detection could not run, not run failures;
    /// the caller downgrades them to warnings.
    fn detect(
        &self,
        changes: &ChangeSet,
        source: &[CanonicalBook],
        target: &[CanonicalBook],
    ) -> Result<Vec<Conflict>, String> {
        let last_sync = last_sync_point(source, target)
            .ok_or_else(|| "no common sync baseline".to_string())?;
        let criteria = DetectionCriteria {
            last_sync: Some(last_sync),
            strict: self.tuning.lock().unwrap().strict_conflict_detection,
        };
        Ok(detect_conflicts(changes, source, target, &criteria))
    }

    /// The decision table, evaluated top to bottom.
    fn select_strategy(&self, changes: &ChangeSet, conflicts: &[Conflict]) -> SyncStrategy {
        if self.options.strategy != SyncStrategy::Auto {
            return self.options.strategy;
        }
        let total = changes.changes.len();
        if total == 0 {
            SyncStrategy::StandardSync
        } else if !conflicts.is_empty() || total > 20 {
            SyncStrategy::BatchSync
        } else if total > 5 {
            SyncStrategy::ParallelSync
        } else {
            SyncStrategy::StandardSync
        }
    }

    /// Adjust tuning from the running counters: fast syncs widen batches
    /// and enable parallelism; slow or conflict-heavy syncs narrow batches
    /// and raise conflict-detection strictness.
    pub fn optimize_performance(&self) -> TuningProfile {
        let stats = self.stats();
        let mut tuning = self.tuning.lock().unwrap();
        if stats.conflict_rate() > 0.3 || stats.average_ms() > 1000 {
            tuning.batch_size = (tuning.batch_size / 2).max(10);
            tuning.parallelism = 1;
            tuning.strict_conflict_detection = true;
        } else if stats.average_ms() < 200 {
            tuning.batch_size = (tuning.batch_size * 2).min(1000);
            tuning.parallelism = 4;
        }
        *tuning
    }
}

/// Most recent sync point shared by the two sets, if any record carries one.
fn last_sync_point(source: &[CanonicalBook], target: &[CanonicalBook]) -> Option<DateTime<Utc>> {
    source
        .iter()
        .chain(target)
        .filter_map(|b| b.sync_status.last_sync_timestamp)
        .max()
}
