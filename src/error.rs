//! Error taxonomy for the pipeline and the sync orchestrator.
//!
//! Record-level validation failures are *data*, not errors: they are
//! collected into `BatchResult::invalid_books` and never surface as `Err`.
//! Only conditions that mean the pipeline itself is broken (fatal), the
//! timeout fired, or a sync stage failed are raised through these types.

use thiserror::Error;

/// Result alias for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Failures that abort a whole batch submission.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The overall validation timeout fired. Partial progress is discarded.
    #[error("validation timed out after {0} ms")]
    Timeout(u64),

    /// The pipeline's own integrity is compromised (corrupted rule table,
    /// serialization failure). Distinct from "this record is bad".
    #[error("pipeline failure: {0}")]
    Fatal(String),

    /// Caller-supplied options failed validation.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

/// The stage of the sync pipeline an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStage {
    Validation,
    Comparison,
    ConflictDetection,
    StrategySelection,
    Execution,
    Orchestration,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStage::Validation => "VALIDATION",
            SyncStage::Comparison => "COMPARISON",
            SyncStage::ConflictDetection => "CONFLICT_DETECTION",
            SyncStage::StrategySelection => "STRATEGY_SELECTION",
            SyncStage::Execution => "EXECUTION",
            SyncStage::Orchestration => "ORCHESTRATION",
        };
        f.write_str(s)
    }
}

/// Result alias for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Failures raised by the synchronization orchestrator and retry coordinator.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A sync stage failed. Conflict-detection failures are downgraded to
    /// warnings before reaching this type; every other stage is fatal to
    /// the run and carries its stage tag for diagnosis.
    #[error("sync stage {stage} failed: {message}")]
    Stage { stage: SyncStage, message: String },

    /// All retry attempts were consumed. Terminal; never retried further.
    #[error("operation failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// The operation was cancelled between retry attempts.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn stage(stage: SyncStage, message: impl Into<String>) -> Self {
        SyncError::Stage {
            stage,
            message: message.into(),
        }
    }
}
