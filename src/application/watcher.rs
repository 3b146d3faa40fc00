//! Bounded, cancelable waiting for a job to reach a status.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::repos::{JobStore, StoreError};
use crate::domain::entities::JobSnapshot;
use crate::domain::types::{JobStatus, StatusSet};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// The job entered one of the requested statuses.
    Reached(JobSnapshot),
    /// The deadline passed first. `last_status` is the last status observed, if any.
    TimedOut { last_status: Option<JobStatus> },
    Cancelled,
}

/// Polls the store until a job's status enters a target set.
///
/// No store lock is held between polls; a waiting caller never blocks other jobs.
#[derive(Clone)]
pub struct CompletionWatcher {
    store: Arc<dyn JobStore>,
    grace: Duration,
}

impl CompletionWatcher {
    /// `grace` bounds how long an inconsistent store is retried before the error surfaces.
    pub fn new(store: Arc<dyn JobStore>, grace: Duration) -> Self {
        Self { store, grace }
    }

    pub async fn await_status(
        &self,
        id: &str,
        targets: StatusSet,
        options: WatchOptions,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome, StoreError> {
        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(options.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_status = None;
        let mut trouble_since: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(id)),
                _ = &mut deadline => return Ok(self.timed_out(id, last_status)),
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(id)),
                _ = &mut deadline => return Ok(self.timed_out(id, last_status)),
                result = self.store.read(id) => result,
            };

            match result {
                Ok(snapshot) => {
                    trouble_since = None;
                    last_status = Some(snapshot.status);
                    if targets.contains(snapshot.status) {
                        return Ok(WatchOutcome::Reached(snapshot));
                    }
                }
                Err(err) if tolerable(&err, last_status.is_some()) => {
                    let since = *trouble_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.grace {
                        debug!(
                            target = "jobdock::watcher",
                            job_id = id,
                            grace_ms = self.grace.as_millis() as u64,
                            "store stayed inconsistent past the grace window"
                        );
                        return Err(err);
                    }
                    debug!(
                        target = "jobdock::watcher",
                        job_id = id,
                        error = %err,
                        "store momentarily inconsistent; retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn cancelled(&self, id: &str) -> WatchOutcome {
        debug!(target = "jobdock::watcher", job_id = id, "wait cancelled");
        WatchOutcome::Cancelled
    }

    fn timed_out(&self, id: &str, last_status: Option<JobStatus>) -> WatchOutcome {
        counter!("jobdock_watch_timeouts_total").increment(1);
        debug!(
            target = "jobdock::watcher",
            job_id = id,
            last_status = last_status.map(JobStatus::as_str).unwrap_or("unknown"),
            "wait timed out"
        );
        WatchOutcome::TimedOut { last_status }
    }
}

/// Errors worth retrying: corruption (a concurrent move may be in flight) and a job that
/// vanished after being seen.
fn tolerable(err: &StoreError, seen_before: bool) -> bool {
    err.is_transient() || (seen_before && matches!(err, StoreError::NotFound { .. }))
}
