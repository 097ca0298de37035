//! Batch validation/normalization orchestration.
//!
//! [`ValidationPipeline::validate_and_normalize`] drives the full flow for
//! one submission: split into batches → per-record cache lookup → validate
//! misses → normalize valid records → populate cache → aggregate in
//! submission order → score. The run checks its deadline at every window
//! and batch boundary (the outer timeout race is only a backstop); once the
//! budget is exceeded the submission fails as a unit and partial progress
//! is discarded.
//!
//! Record-level failures never abort a batch — they are aggregated into
//! `invalid_books`. Only pipeline-integrity failures (corrupted rule table,
//! serialization failure) and the timeout surface as `Err`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::ValidationCache;
use crate::config::PipelineOptions;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{BatchResult, Platform, RawRecord, ValidationResult};
use crate::normalize::normalize;
use crate::progress::{EventSink, PipelineEvent};
use crate::quality;
use crate::store::Store;
use crate::validate::{PlatformRules, Validator};

/// Submissions at or above this size get an informational warning.
const LARGE_BATCH_THRESHOLD: usize = 5000;
/// Aggregate processing time above this adds an informational warning.
const SLOW_BATCH_THRESHOLD: Duration = Duration::from_millis(2000);

struct RecordOutcome {
    result: ValidationResult,
    cache_hit: bool,
    /// Cache key, kept for store write-through on misses.
    key: Option<String>,
}

/// The validation pipeline. Owns the result cache — the only state that
/// survives across calls. Everything else lives per invocation.
pub struct ValidationPipeline {
    options: PipelineOptions,
    cache: ValidationCache,
    store: Option<Arc<dyn Store>>,
    normalize_calls: AtomicUsize,
}

impl ValidationPipeline {
    pub fn new(options: PipelineOptions) -> Self {
        let cache = ValidationCache::new(
            options.cache_size,
            Duration::from_millis(options.cache_ttl_ms),
        );
        Self {
            options,
            cache,
            store: None,
            normalize_calls: AtomicUsize::new(0),
        }
    }

    /// Attach a store for best-effort write-through of cache entries.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Times the normalizer was actually invoked; cache hits skip it.
    pub fn normalization_count(&self) -> usize {
        self.normalize_calls.load(Ordering::Relaxed)
    }

    /// Drop all cached results. Must be called when rule tables change,
    /// since a stale hit would no longer match fresh validation output.
    pub fn invalidate_cache(&self) {
        self.cache.flush();
    }

    /// Validate and normalize a submission of raw records.
    ///
    /// Returns a structured [`BatchResult`] for all record-level
    /// conditions. Errors only for timeout, bad options, or
    /// pipeline-integrity failures; partial progress is never returned.
    pub async fn validate_and_normalize(
        &self,
        records: Vec<RawRecord>,
        platform: Platform,
        source: &str,
        sink: &dyn EventSink,
    ) -> PipelineResult<BatchResult> {
        if self.options.batch_size == 0 {
            return Err(PipelineError::InvalidOptions("batch_size must be > 0".into()));
        }

        let validation_id = Uuid::new_v4().to_string();
        let total = records.len();
        sink.emit(PipelineEvent::ValidationStarted {
            validation_id: validation_id.clone(),
            platform,
            source: source.to_string(),
            book_count: total,
        });

        let started = Instant::now();
        let budget = Duration::from_millis(self.options.validation_timeout_ms);
        let deadline = started + budget;
        let outcome =
            tokio::time::timeout(budget, self.run(records, platform, deadline, sink)).await;

        match outcome {
            Ok(Ok(mut result)) => {
                let duration = started.elapsed();
                result.metrics.duration_ms = duration.as_millis() as u64;
                if total >= LARGE_BATCH_THRESHOLD {
                    result
                        .metrics
                        .performance_warnings
                        .push(format!("large submission: {} records", total));
                }
                if duration > SLOW_BATCH_THRESHOLD {
                    result.metrics.performance_warnings.push(format!(
                        "aggregate processing time {} ms exceeds {} ms",
                        duration.as_millis(),
                        SLOW_BATCH_THRESHOLD.as_millis()
                    ));
                }

                sink.emit(PipelineEvent::ValidationCompleted {
                    quality_score: result.quality_score,
                    valid_count: result.statistics.successful,
                    invalid_count: result.statistics.failed,
                    duration_ms: result.metrics.duration_ms,
                    normalized_book_ids: result
                        .normalized_books
                        .iter()
                        .map(|b| b.id.clone())
                        .collect(),
                });
                if !result.normalized_books.is_empty() {
                    sink.emit(PipelineEvent::ReadyForSync {
                        book_count: result.normalized_books.len(),
                        books: result.normalized_books.clone(),
                    });
                }
                Ok(result)
            }
            Ok(Err(err)) => {
                sink.emit(PipelineEvent::ValidationFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
            Err(_) => {
                let err = PipelineError::Timeout(self.options.validation_timeout_ms);
                sink.emit(PipelineEvent::ValidationFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        records: Vec<RawRecord>,
        platform: Platform,
        deadline: Instant,
        sink: &dyn EventSink,
    ) -> PipelineResult<BatchResult> {
        let total = records.len();
        let batch_size = self
            .options
            .batch_size
            .min(self.options.max_batch_size)
            .max(1);
        let concurrency = self.options.concurrency.max(1);

        let validator = Validator::new(
            PlatformRules::for_platform(platform),
            self.options.auto_fix,
            self.options.strict_mode,
        );
        // Fail fast on a corrupted rule table before touching any record.
        validator.rules().check_integrity()?;

        let batches: Vec<Vec<RawRecord>> = {
            let mut records = records;
            let mut out = Vec::new();
            while records.len() > batch_size {
                let rest = records.split_off(batch_size);
                out.push(records);
                records = rest;
            }
            out.push(records);
            out
        };
        let batch_count = if total == 0 { 0 } else { batches.len() };

        let mut result = BatchResult::default();
        result.statistics.total = total;
        result.metrics.batches = batch_count;

        let mut processed = 0usize;
        let mut next_progress_pct = 10u8;

        for window in batches.chunks(concurrency) {
            // The batch workers are synchronous, so the outer race cannot
            // interrupt them; the deadline has to be checked here.
            if Instant::now() >= deadline {
                return Err(PipelineError::Timeout(self.options.validation_timeout_ms));
            }
            let window_outcomes = self.process_window(window, platform, &validator, deadline)?;

            for outcomes in window_outcomes {
                for outcome in outcomes {
                    processed += 1;
                    if outcome.cache_hit {
                        result.metrics.cache_hits += 1;
                    } else {
                        result.metrics.cache_misses += 1;
                        self.persist_entry(&outcome).await;
                    }

                    let res = outcome.result;
                    result.warnings.extend(res.warnings.iter().cloned());
                    if res.is_valid {
                        result.statistics.successful += 1;
                        if let Some(book) = &res.book {
                            result.normalized_books.push(book.clone());
                        }
                        result.valid_books.push(res);
                    } else {
                        result.statistics.failed += 1;
                        result.invalid_books.push(res);
                    }
                }
            }

            if total >= 10 {
                while next_progress_pct <= 100
                    && processed * 100 >= next_progress_pct as usize * total
                {
                    sink.emit(PipelineEvent::ValidationProgress {
                        processed,
                        total,
                        percentage: next_progress_pct,
                    });
                    next_progress_pct += 10;
                }
            }

            // Cancellation point for the timeout race.
            tokio::task::yield_now().await;
        }

        result.quality_score = quality::score(
            result.statistics.successful,
            result.statistics.failed,
            result.warnings.len(),
        );

        debug!(
            total,
            valid = result.statistics.successful,
            invalid = result.statistics.failed,
            cache_hits = result.metrics.cache_hits,
            score = result.quality_score,
            "submission processed"
        );
        Ok(result)
    }

    /// Process up to `concurrency` batches, in parallel when more than one.
    /// Output preserves window order, so aggregation stays in split order.
    fn process_window(
        &self,
        window: &[Vec<RawRecord>],
        platform: Platform,
        validator: &Validator,
        deadline: Instant,
    ) -> PipelineResult<Vec<Vec<RecordOutcome>>> {
        if window.len() == 1 {
            return Ok(vec![self.process_batch(
                &window[0],
                platform,
                validator,
                deadline,
            )?]);
        }

        let results: Vec<PipelineResult<Vec<RecordOutcome>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = window
                .iter()
                .map(|batch| {
                    scope.spawn(move || self.process_batch(batch, platform, validator, deadline))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(res) => res,
                    Err(_) => Err(PipelineError::Fatal("batch worker panicked".into())),
                })
                .collect()
        });
        results.into_iter().collect()
    }

    /// One batch, records in input order.
    fn process_batch(
        &self,
        batch: &[RawRecord],
        platform: Platform,
        validator: &Validator,
        deadline: Instant,
    ) -> PipelineResult<Vec<RecordOutcome>> {
        if !batch.is_empty() && Instant::now() >= deadline {
            return Err(PipelineError::Timeout(self.options.validation_timeout_ms));
        }
        let mut outcomes = Vec::with_capacity(batch.len());
        for record in batch {
            outcomes.push(self.process_record(record.clone(), platform, validator)?);
        }
        Ok(outcomes)
    }

    fn process_record(
        &self,
        record: RawRecord,
        platform: Platform,
        validator: &Validator,
    ) -> PipelineResult<RecordOutcome> {
        let key = if self.options.enable_cache {
            let key = ValidationCache::key_for(platform, &record)?;
            if let Some(hit) = self.cache.get(&key) {
                return Ok(RecordOutcome {
                    result: hit,
                    cache_hit: true,
                    key: None,
                });
            }
            Some(key)
        } else {
            None
        };

        let mut result = validator.validate(record)?;
        if result.is_valid {
            self.normalize_calls.fetch_add(1, Ordering::Relaxed);
            result.book = Some(normalize(&result.record, platform));
        }

        if let Some(key) = &key {
            self.cache.put(key.clone(), result.clone());
        }
        Ok(RecordOutcome {
            result,
            cache_hit: false,
            key,
        })
    }

    /// Best-effort write-through of one fresh cache entry. The cache is a
    /// memo, not a source of truth, so store failures downgrade to a log.
    async fn persist_entry(&self, outcome: &RecordOutcome) {
        let (Some(store), Some(key)) = (&self.store, &outcome.key) else {
            return;
        };
        match serde_json::to_string(&outcome.result) {
            Ok(json) => {
                if let Err(err) = store.put(key, json).await {
                    warn!(key = %key, error = %err, "cache write-through failed");
                }
            }
            Err(err) => warn!(error = %err, "cache entry serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{MemoryEvents, NoEvents};
    use serde_json::json;

    fn records(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| {
                RawRecord::from_value(json!({
                    "id": format!("r{}", i),
                    "title": format!("Book {}", i),
                    "authors": ["Author"]
                }))
            })
            .collect()
    }

    fn pipeline() -> ValidationPipeline {
        ValidationPipeline::new(PipelineOptions::default())
    }

    #[tokio::test]
    async fn counts_add_up() {
        let p = pipeline();
        let mut recs = records(3);
        recs.push(RawRecord::from_value(json!({"id": "bad"})));
        let result = p
            .validate_and_normalize(recs, Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert_eq!(result.statistics.total, 4);
        assert_eq!(
            result.valid_books.len() + result.invalid_books.len(),
            result.statistics.total
        );
        assert_eq!(result.statistics.successful, 3);
        assert_eq!(result.statistics.failed, 1);
        assert_eq!(result.normalized_books.len(), 3);
    }

    #[tokio::test]
    async fn batches_split_and_order_preserved() {
        let opts = PipelineOptions {
            batch_size: 100,
            ..Default::default()
        };
        let p = ValidationPipeline::new(opts);
        let result = p
            .validate_and_normalize(records(250), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert_eq!(result.metrics.batches, 3);
        let ids: Vec<_> = result
            .valid_books
            .iter()
            .map(|r| r.book_id.clone())
            .collect();
        let expected: Vec<_> = (0..250).map(|i| format!("r{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn batch_size_capped_at_max() {
        let opts = PipelineOptions {
            batch_size: 9999,
            max_batch_size: 1000,
            ..Default::default()
        };
        let p = ValidationPipeline::new(opts);
        let result = p
            .validate_and_normalize(records(2500), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert_eq!(result.metrics.batches, 3);
    }

    #[tokio::test]
    async fn cache_hit_skips_normalization() {
        let p = pipeline();
        let first = p
            .validate_and_normalize(records(5), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        let calls_after_first = p.normalization_count();
        assert_eq!(calls_after_first, 5);

        let second = p
            .validate_and_normalize(records(5), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert_eq!(p.normalization_count(), calls_after_first);
        assert_eq!(second.metrics.cache_hits, 5);
        assert_eq!(first.normalized_books, second.normalized_books);
        assert_eq!(first.quality_score, second.quality_score);
    }

    #[tokio::test]
    async fn invalidate_cache_forces_revalidation() {
        let p = pipeline();
        p.validate_and_normalize(records(2), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        p.invalidate_cache();
        let result = p
            .validate_and_normalize(records(2), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert_eq!(result.metrics.cache_hits, 0);
        assert_eq!(p.normalization_count(), 4);
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let opts = PipelineOptions {
            enable_cache: false,
            ..Default::default()
        };
        let p = ValidationPipeline::new(opts);
        p.validate_and_normalize(records(2), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        let result = p
            .validate_and_normalize(records(2), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert_eq!(result.metrics.cache_hits, 0);
    }

    #[tokio::test]
    async fn events_emitted_with_progress() {
        let p = pipeline();
        let sink = MemoryEvents::new();
        p.validate_and_normalize(records(20), Platform::Kobo, "scrape", &sink)
            .await
            .unwrap();
        let events = sink.drain();
        assert!(matches!(
            events.first(),
            Some(PipelineEvent::ValidationStarted { book_count: 20, .. })
        ));
        let progress: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::ValidationProgress { .. }))
            .collect();
        assert!(!progress.is_empty());
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::ValidationCompleted { .. })));
        // ReadyForSync hands the canonical books downstream.
        let ready = events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::ReadyForSync { book_count, books } => Some((book_count, books)),
                _ => None,
            })
            .unwrap();
        assert_eq!(*ready.0, 20);
        assert_eq!(ready.1.len(), 20);
    }

    #[tokio::test]
    async fn small_submission_skips_progress_events() {
        let p = pipeline();
        let sink = MemoryEvents::new();
        p.validate_and_normalize(records(5), Platform::Kobo, "scrape", &sink)
            .await
            .unwrap();
        assert!(!sink
            .drain()
            .iter()
            .any(|e| matches!(e, PipelineEvent::ValidationProgress { .. })));
    }

    #[tokio::test]
    async fn empty_submission_scores_zero() {
        let p = pipeline();
        let result = p
            .validate_and_normalize(Vec::new(), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert_eq!(result.quality_score, 0);
        assert_eq!(result.metrics.batches, 0);
    }

    #[tokio::test]
    async fn fully_valid_clean_submission_scores_hundred() {
        let p = pipeline();
        let result = p
            .validate_and_normalize(records(10), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert!(result.warnings.is_empty());
        assert_eq!(result.quality_score, 100);
    }

    #[tokio::test]
    async fn timeout_discards_partial_progress() {
        let opts = PipelineOptions {
            validation_timeout_ms: 0,
            ..Default::default()
        };
        let p = ValidationPipeline::new(opts);
        let sink = MemoryEvents::new();
        let err = p
            .validate_and_normalize(records(100), Platform::Readmoo, "test", &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(0)));
        assert!(sink
            .drain()
            .iter()
            .any(|e| matches!(e, PipelineEvent::ValidationFailed { .. })));
    }

    #[tokio::test]
    async fn concurrent_batches_keep_submission_order() {
        let opts = PipelineOptions {
            batch_size: 10,
            concurrency: 4,
            ..Default::default()
        };
        let p = ValidationPipeline::new(opts);
        let result = p
            .validate_and_normalize(records(100), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        let ids: Vec<_> = result
            .valid_books
            .iter()
            .map(|r| r.book_id.clone())
            .collect();
        let expected: Vec<_> = (0..100).map(|i| format!("r{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn store_write_through_persists_entries() {
        use crate::store::{InMemoryStore, Store as _};
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline().with_store(store.clone());
        p.validate_and_normalize(records(3), Platform::Readmoo, "test", &NoEvents)
            .await
            .unwrap();
        assert_eq!(store.len(), 3);
        // Values round-trip as ValidationResult JSON.
        let key = ValidationCache::key_for(
            Platform::Readmoo,
            &RawRecord::from_value(json!({
                "id": "r0", "title": "Book 0", "authors": ["Author"]
            })),
        )
        .unwrap();
        let json = store.get(&key).await.unwrap().unwrap();
        let parsed: ValidationResult = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_valid);
    }
}
