//! Pipeline event and progress reporting.
//!
//! The pipeline and orchestrator report lifecycle events through an
//! [`EventSink`] passed in by the caller — a synchronous callback seam
//! instead of a global event bus. Every batch produces at least one
//! notification (started + completed/failed), and submissions of ten or
//! more records emit progress at roughly 10% increments.

use serde::{Deserialize, Serialize};

use crate::models::{CanonicalBook, Platform};

/// Lifecycle events emitted by the validation pipeline and sync
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineEvent {
    ValidationStarted {
        validation_id: String,
        platform: Platform,
        source: String,
        book_count: usize,
    },
    ValidationProgress {
        processed: usize,
        total: usize,
        percentage: u8,
    },
    ValidationCompleted {
        quality_score: u8,
        valid_count: usize,
        invalid_count: usize,
        duration_ms: u64,
        normalized_book_ids: Vec<String>,
    },
    ValidationFailed {
        error: String,
    },
    /// Hands the normalized books to downstream consumers; the sync
    /// orchestrator runs off this payload, not a re-read of the batch.
    ReadyForSync {
        book_count: usize,
        books: Vec<CanonicalBook>,
    },
    SyncStarted {
        sync_id: String,
    },
    SyncFailed {
        sync_id: String,
        error: String,
    },
}

/// Consumer of pipeline events. Implementations must be cheap; the
/// pipeline calls them inline.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Discards all events.
pub struct NoEvents;

impl EventSink for NoEvents {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Logs events through `tracing` at info level.
pub struct TracingEvents;

impl EventSink for TracingEvents {
    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::ValidationFailed { error } => {
                tracing::warn!(error = %error, "validation failed");
            }
            PipelineEvent::SyncFailed { sync_id, error } => {
                tracing::warn!(sync_id = %sync_id, error = %error, "sync failed");
            }
            other => {
                tracing::info!(event = ?other, "pipeline event");
            }
        }
    }
}

/// Forwards events into a tokio channel, for async consumers.
pub struct ChannelEvents {
    tx: tokio::sync::mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelEvents {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEvents {
    fn emit(&self, event: PipelineEvent) {
        // Receiver gone means nobody is listening; drop silently.
        let _ = self.tx.send(event);
    }
}

/// Buffers events in memory. Intended for tests and the CLI summary.
#[derive(Default)]
pub struct MemoryEvents {
    events: std::sync::Mutex<Vec<PipelineEvent>>,
}

impl MemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<PipelineEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for MemoryEvents {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}
