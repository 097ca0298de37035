//! End-to-end pipeline tests: raw platform exports in, canonical books and
//! quality reports out.

use serde_json::json;

use shelfsync::config::PipelineOptions;
use shelfsync::models::{Platform, RawRecord, ReadingStatus};
use shelfsync::pipeline::ValidationPipeline;
use shelfsync::progress::{MemoryEvents, PipelineEvent};

fn readmoo_export() -> Vec<RawRecord> {
    vec![
        RawRecord::from_value(json!({
            "id": "rm-210901",
            "title": "  The  Three-Body   Problem ",
            "authors": "Liu Cixin, Ken Liu",
            "isbn": "ISBN 978-0-7653-8203-0",
            "progress": {"percent": 64},
            "cover": "https://cdn.example.com/3bp.jpg"
        })),
        RawRecord::from_value(json!({
            "id": "rm-210902",
            "title": "Snow Crash",
            "authors": ["Neal Stephenson"],
            "progress": {"currentPage": 150, "totalPages": 300},
            "status": "reading"
        })),
        // Missing title: invalid, reported, never dropped silently.
        RawRecord::from_value(json!({
            "id": "rm-210903",
            "authors": ["Anonymous"]
        })),
    ]
}

#[tokio::test]
async fn full_run_repairs_normalizes_and_reports() {
    let pipeline = ValidationPipeline::new(PipelineOptions::default());
    let sink = MemoryEvents::new();
    let result = pipeline
        .validate_and_normalize(readmoo_export(), Platform::Readmoo, "library", &sink)
        .await
        .unwrap();

    assert_eq!(result.statistics.total, 3);
    assert_eq!(result.statistics.successful, 2);
    assert_eq!(result.statistics.failed, 1);
    assert_eq!(result.normalized_books.len(), 2);

    let three_body = &result.normalized_books[0];
    assert_eq!(three_body.title, "The Three-Body Problem");
    assert_eq!(three_body.authors, vec!["Liu Cixin", "Ken Liu"]);
    assert_eq!(three_body.isbn.as_deref(), Some("9780765382030"));
    assert_eq!(three_body.progress.percentage, 64.0);
    assert_eq!(three_body.platform, Some(Platform::Readmoo));
    assert!(three_body.id.starts_with("readmoo-"));
    assert!(three_body.cross_platform_id.starts_with("xp-"));
    assert_eq!(three_body.data_fingerprint.len(), 64);

    let snow_crash = &result.normalized_books[1];
    assert_eq!(snow_crash.progress.percentage, 50.0);
    assert_eq!(snow_crash.status, ReadingStatus::Reading);

    let failed = &result.invalid_books[0];
    assert!(!failed.is_valid);
    assert!(failed.errors.iter().any(|e| e.field == "title"));

    // Lifecycle events bracket the run.
    let events = sink.drain();
    assert!(matches!(
        events.first(),
        Some(PipelineEvent::ValidationStarted { book_count: 3, .. })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::ValidationCompleted { normalized_book_ids, .. }
            if normalized_book_ids.len() == 2
    )));
    // ReadyForSync carries the canonical books, not just a count.
    let ready_books = events
        .iter()
        .find_map(|e| match e {
            PipelineEvent::ReadyForSync { book_count: 2, books } => Some(books),
            _ => None,
        })
        .unwrap();
    assert_eq!(ready_books.len(), 2);
    assert_eq!(ready_books[0].title, "The Three-Body Problem");
    assert_eq!(ready_books, &result.normalized_books);
}

#[tokio::test]
async fn same_book_on_two_platforms_shares_identity() {
    let pipeline = ValidationPipeline::new(PipelineOptions::default());
    let sink = MemoryEvents::new();

    let readmoo = RawRecord::from_value(json!({
        "id": "rm-1",
        "title": "Dune",
        "authors": ["Frank Herbert"],
        "isbn": "9780441172719"
    }));
    let kindle = RawRecord::from_value(json!({
        "asin": "B000R34YKC",
        "productTitle": "Dune",
        "author": "Frank Herbert",
        "isbn": "978-0-441-17271-9"
    }));

    let a = pipeline
        .validate_and_normalize(vec![readmoo], Platform::Readmoo, "library", &sink)
        .await
        .unwrap();
    let b = pipeline
        .validate_and_normalize(vec![kindle], Platform::Kindle, "library", &sink)
        .await
        .unwrap();

    let left = &a.normalized_books[0];
    let right = &b.normalized_books[0];
    // Native ids differ; the derived identity does not.
    assert_ne!(left.id, right.id);
    assert_eq!(left.cross_platform_id, right.cross_platform_id);
    assert_eq!(left.data_fingerprint, right.data_fingerprint);
}

#[tokio::test]
async fn repeat_submission_is_served_from_cache() {
    let pipeline = ValidationPipeline::new(PipelineOptions::default());
    let sink = MemoryEvents::new();
    let records = readmoo_export();

    let first = pipeline
        .validate_and_normalize(records.clone(), Platform::Readmoo, "library", &sink)
        .await
        .unwrap();
    assert_eq!(first.metrics.cache_hits, 0);
    let normalizations = pipeline.normalization_count();

    let second = pipeline
        .validate_and_normalize(records, Platform::Readmoo, "library", &sink)
        .await
        .unwrap();
    assert_eq!(second.metrics.cache_hits, 3);
    // Cached results skip re-normalization entirely.
    assert_eq!(pipeline.normalization_count(), normalizations);
    // And produce the same verdicts.
    assert_eq!(second.statistics, first.statistics);
}

#[tokio::test]
async fn quality_score_reflects_failures() {
    let pipeline = ValidationPipeline::new(PipelineOptions::default());
    let sink = MemoryEvents::new();
    let result = pipeline
        .validate_and_normalize(readmoo_export(), Platform::Readmoo, "library", &sink)
        .await
        .unwrap();
    // 2 of 3 valid -> 67%, minus one point per warning, floor 0.
    assert!(result.quality_score <= 67);
    assert!(result.quality_score > 0);
}

#[tokio::test]
async fn empty_submission_is_a_clean_noop() {
    let pipeline = ValidationPipeline::new(PipelineOptions::default());
    let sink = MemoryEvents::new();
    let result = pipeline
        .validate_and_normalize(Vec::new(), Platform::Kobo, "library", &sink)
        .await
        .unwrap();
    assert_eq!(result.statistics.total, 0);
    assert_eq!(result.quality_score, 0);
    assert!(result.normalized_books.is_empty());
}
