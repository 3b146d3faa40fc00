use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jobdock::application::lifecycle::{JobRequest, JobService, JobServiceError, LifecycleOptions};
use jobdock::application::repos::StoreError;
use jobdock::application::watcher::WatchOutcome;
use jobdock::domain::entities::RecordUpdate;
use jobdock::domain::types::JobStatus;
use jobdock::infra::jobs_fs::FsJobStore;
use jobdock::infra::sources::SourceStorage;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn lifecycle_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = TempDir::new().expect("tempdir");
    let jobs_root = dir.path().join("jobs");
    let service = JobService::new(
        Arc::new(FsJobStore::open(jobs_root.clone()).expect("job store")),
        Arc::new(SourceStorage::new(dir.path().join("sources")).expect("sources")),
        LifecycleOptions {
            poll_interval: Duration::from_millis(5),
            corruption_grace: Duration::from_millis(20),
        },
    );

    // Submission and both transitions.
    let first = service
        .submit(JobRequest::from_value(json!({"taskType": "render"})).expect("request"))
        .await
        .expect("submit");
    service
        .transition(&first.id, JobStatus::Created, JobStatus::Queued, RecordUpdate::default())
        .await
        .expect("queue");

    // Watch timeout.
    let outcome = service
        .await_terminal(&first.id, Duration::from_millis(30), &CancellationToken::new())
        .await
        .expect("await");
    assert!(matches!(
        outcome,
        WatchOutcome::TimedOut {
            last_status: Some(JobStatus::Queued)
        }
    ));

    // A record left behind in two partitions.
    let second = service
        .submit(JobRequest::from_value(json!({"taskType": "build"})).expect("request"))
        .await
        .expect("submit");
    std::fs::copy(
        jobs_root.join("created").join(format!("{}.json", second.id)),
        jobs_root.join("queued").join(format!("{}.json", second.id)),
    )
    .expect("duplicate record");
    let err = service.status(&second.id).await.expect_err("corrupt");
    assert!(matches!(
        err,
        JobServiceError::Store(StoreError::CorruptState { .. })
    ));

    // A watcher retrying through the grace window escalates once, not once per poll.
    let err = service
        .await_terminal(&second.id, Duration::from_secs(2), &CancellationToken::new())
        .await
        .expect_err("corruption outlives the grace window");
    assert!(matches!(
        err,
        JobServiceError::Store(StoreError::CorruptState { .. })
    ));

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();
    let corruption_count: u64 = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| {
            composite_key.key().name() == "jobdock_store_corruption_total"
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(count) => *count,
            _ => 0,
        })
        .sum();
    assert_eq!(corruption_count, 2);

    let expected = [
        "jobdock_jobs_submitted_total",
        "jobdock_jobs_transitions_total",
        "jobdock_watch_timeouts_total",
        "jobdock_store_corruption_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
