//! End-to-end sync tests: two canonical sets in, a staged sync report out.

use chrono::{Duration, Utc};
use serde_json::json;

use shelfsync::compare::{CompareOptions, CompareStrategy};
use shelfsync::config::{PipelineOptions, SyncOptions, SyncStrategy};
use shelfsync::models::{CanonicalBook, Platform, RawRecord};
use shelfsync::pipeline::ValidationPipeline;
use shelfsync::progress::{MemoryEvents, NoEvents, PipelineEvent};
use shelfsync::sync::SyncOrchestrator;

async fn canonical_set(platform: Platform, titles: &[(&str, f64)]) -> Vec<CanonicalBook> {
    let records = titles
        .iter()
        .map(|(title, progress)| {
            RawRecord::from_value(json!({
                "id": title.to_lowercase().replace(' ', "-"),
                "title": title,
                "authors": ["Author"],
                "progress": progress
            }))
        })
        .collect();
    ValidationPipeline::new(PipelineOptions::default())
        .validate_and_normalize(records, platform, "library", &NoEvents)
        .await
        .unwrap()
        .normalized_books
}

#[tokio::test]
async fn pipeline_output_flows_into_sync() {
    let local = canonical_set(
        Platform::Readmoo,
        &[("Dune", 80.0), ("Hyperion", 10.0), ("Solaris", 0.0)],
    )
    .await;
    let remote = canonical_set(Platform::Kobo, &[("Dune", 80.0), ("Hyperion", 10.0)]).await;

    let sink = MemoryEvents::new();
    let orchestrator = SyncOrchestrator::new(SyncOptions::default());
    let report = orchestrator
        .orchestrate_sync(&local, &remote, &sink)
        .await
        .unwrap();

    // "Solaris" exists only locally; the rest line up by derived identity
    // even though the native ids differ per platform.
    assert_eq!(report.added, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.strategy, SyncStrategy::StandardSync);
    assert!(report.success);

    let events = sink.drain();
    assert!(matches!(
        events.first(),
        Some(PipelineEvent::SyncStarted { .. })
    ));
}

#[tokio::test]
async fn progress_divergence_reported_as_update() {
    let local = canonical_set(Platform::Readmoo, &[("Dune", 30.0)]).await;
    let remote = canonical_set(Platform::Kobo, &[("Dune", 85.0)]).await;

    let report = SyncOrchestrator::new(SyncOptions::default())
        .orchestrate_sync(&local, &remote, &NoEvents)
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    // Never synced before, so divergence cannot be proven concurrent.
    assert_eq!(report.conflicts_detected, 0);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("conflict detection skipped")));
}

#[tokio::test]
async fn hash_compare_skips_same_identity_updates() {
    let local = canonical_set(Platform::Readmoo, &[("Dune", 30.0)]).await;
    let remote = canonical_set(Platform::Kobo, &[("Dune", 85.0)]).await;

    let orchestrator = SyncOrchestrator::new(SyncOptions::default()).with_compare_options(
        CompareOptions {
            strategy: CompareStrategy::HashCompare,
            fields: None,
        },
    );
    let report = orchestrator
        .orchestrate_sync(&local, &remote, &NoEvents)
        .await
        .unwrap();
    // Identity fields match, so the fingerprint pre-filter reports nothing.
    assert_eq!(report.total_changes, 0);
}

#[tokio::test]
async fn concurrent_edits_surface_and_resolve() {
    let sync_point = Utc::now() - Duration::hours(3);
    let mut local = canonical_set(Platform::Readmoo, &[("Dune", 30.0)]).await;
    let mut remote = canonical_set(Platform::Readmoo, &[("Dune", 85.0)]).await;
    for (set, updated) in [
        (&mut local, Utc::now() - Duration::hours(1)),
        (&mut remote, Utc::now()),
    ] {
        for book in set.iter_mut() {
            book.created_at = sync_point - Duration::days(30);
            book.updated_at = updated;
            book.sync_status.last_sync_timestamp = Some(sync_point);
        }
    }

    let orchestrator = SyncOrchestrator::new(SyncOptions::default());
    let report = orchestrator
        .orchestrate_sync(&local, &remote, &NoEvents)
        .await
        .unwrap();

    assert_eq!(report.conflicts_detected, 1);
    assert_eq!(report.conflicts_auto_resolved, 1);
    assert_eq!(report.strategy, SyncStrategy::BatchSync);
    // The newer remote progress wins under last-write-wins.
    let resolved = report.resolutions[0].resolved_value.as_ref().unwrap();
    assert_eq!(resolved["percentage"], 85.0);

    // Stats feed the optimizer: one conflicted sync out of one.
    assert_eq!(orchestrator.stats().conflicted_syncs, 1);
    let tuned = orchestrator.optimize_performance();
    assert!(tuned.strict_conflict_detection);
}

#[tokio::test]
async fn report_carries_stage_timings_for_every_stage() {
    let local = canonical_set(Platform::Readmoo, &[("Dune", 30.0)]).await;
    let report = SyncOrchestrator::new(SyncOptions::default())
        .orchestrate_sync(&local, &[], &NoEvents)
        .await
        .unwrap();
    assert_eq!(report.stage_timings.len(), 5);
    assert!(report.attempts >= 1);
}
