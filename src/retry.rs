//! Bounded-attempt retry coordination with exponential backoff.
//!
//! The coordinator owns a [`SyncJob`] for the duration of an attempt
//! sequence. Before each attempt it checks `can_retry` (attempts below the
//! maximum AND the last error classified retryable); between attempts it
//! sleeps `base × 2^attempt`, capped at the configured ceiling.
//! Cancellation is cooperative: honored between attempts, never
//! mid-attempt. Exhaustion is terminal and reported, never silently
//! dropped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::models::Platform;

/// Lifecycle state of a sync job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// A sync operation under retry management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub sync_id: String,
    pub source_platforms: Vec<Platform>,
    pub target_platforms: Vec<Platform>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub state: JobState,
}

impl SyncJob {
    pub fn new(source_platforms: Vec<Platform>, target_platforms: Vec<Platform>) -> Self {
        Self {
            sync_id: Uuid::new_v4().to_string(),
            source_platforms,
            target_platforms,
            attempts: 0,
            last_error: None,
            state: JobState::Pending,
        }
    }
}

/// Error produced by one attempt of the managed operation.
#[derive(Debug, Clone)]
pub struct AttemptError {
    pub message: String,
    pub retryable: bool,
}

impl AttemptError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&SyncOptions> for RetryPolicy {
    fn from(options: &SyncOptions) -> Self {
        Self {
            max_attempts: options.max_sync_attempts,
            base_delay: Duration::from_millis(options.retry_base_delay_ms),
            max_delay: Duration::from_millis(options.retry_max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(20);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }
}

/// Bounded-attempt executor.
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Attempts left and the last failure is worth retrying.
    pub fn can_retry(&self, job: &SyncJob, last_error: &AttemptError) -> bool {
        job.attempts < self.policy.max_attempts && last_error.retryable
    }

    /// Run `op` until it succeeds, exhausts its attempts, fails
    /// permanently, or is cancelled. The job records every attempt.
    pub async fn execute<T, F, Fut>(&self, job: &mut SyncJob, op: F) -> SyncResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let never = AtomicBool::new(false);
        self.execute_with_cancel(job, op, &never).await
    }

    /// Like [`execute`](Self::execute), checking `cancel` between attempts.
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        job: &mut SyncJob,
        mut op: F,
        cancel: &AtomicBool,
    ) -> SyncResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        job.state = JobState::Running;
        loop {
            if cancel.load(Ordering::Relaxed) {
                job.state = JobState::Cancelled;
                return Err(SyncError::Cancelled);
            }

            let attempt = job.attempts;
            job.attempts += 1;
            match op(attempt).await {
                Ok(value) => {
                    job.state = JobState::Succeeded;
                    job.last_error = None;
                    return Ok(value);
                }
                Err(err) => {
                    debug!(
                        sync_id = %job.sync_id,
                        attempt = attempt + 1,
                        error = %err.message,
                        retryable = err.retryable,
                        "sync attempt failed"
                    );
                    job.last_error = Some(err.message.clone());
                    if !self.can_retry(job, &err) {
                        job.state = JobState::Failed;
                        warn!(
                            sync_id = %job.sync_id,
                            attempts = job.attempts,
                            "sync permanently failed"
                        );
                        return Err(SyncError::RetryExhausted {
                            attempts: job.attempts,
                            last_error: err.message,
                        });
                    }
                    tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(10_000),
        }
    }

    fn job() -> SyncJob {
        SyncJob::new(vec![Platform::Readmoo], vec![Platform::Kobo])
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(p.backoff_delay(10), Duration::from_millis(10_000));
        assert_eq!(p.backoff_delay(20), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let coordinator = RetryCoordinator::new(policy(3));
        let mut job = job();
        let calls_in = calls.clone();
        let err = coordinator
            .execute::<(), _, _>(&mut job, move |_| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AttemptError::retryable("network glitch"))
                }
            })
            .await
            .unwrap_err();
        // Exactly 3 attempts, never a 4th.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.state, JobState::Failed);
        assert!(matches!(err, SyncError::RetryExhausted { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let coordinator = RetryCoordinator::new(policy(5));
        let mut job = job();
        let result = coordinator
            .execute(&mut job, |attempt| async move {
                if attempt < 2 {
                    Err(AttemptError::retryable("transient"))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops_immediately() {
        let coordinator = RetryCoordinator::new(policy(5));
        let mut job = job();
        let err = coordinator
            .execute::<(), _, _>(&mut job, |_| async {
                Err(AttemptError::permanent("schema mismatch"))
            })
            .await
            .unwrap_err();
        assert_eq!(job.attempts, 1);
        assert!(matches!(err, SyncError::RetryExhausted { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_honored_between_attempts() {
        let coordinator = RetryCoordinator::new(policy(5));
        let mut job = job();
        let cancel = AtomicBool::new(false);
        // Cancel flag flips during the first attempt; the coordinator must
        // stop before attempt two.
        let err = coordinator
            .execute_with_cancel::<(), _, _>(
                &mut job,
                |_| {
                    cancel.store(true, Ordering::Relaxed);
                    async { Err(AttemptError::retryable("flaky")) }
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(job.attempts, 1);
    }
}
