use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::future::join_all;
use jobdock::application::repos::{JobStore, StoreError};
use jobdock::domain::entities::{JobArgs, JobRecord, TaskType};
use jobdock::domain::types::JobStatus;
use jobdock::infra::jobs_fs::FsJobStore;
use serde_json::{Value, json};
use tempfile::TempDir;
use time::OffsetDateTime;

const CONTENDERS: usize = 16;

fn open_store() -> (TempDir, Arc<FsJobStore>) {
    let dir = TempDir::new().expect("tempdir");
    let store = FsJobStore::open(dir.path().join("jobs")).expect("job store");
    (dir, Arc::new(store))
}

fn record(id: &str, marker: usize) -> JobRecord {
    let task_type = TaskType::parse("render").expect("task type");
    let mut args = JobArgs::new();
    args.insert("taskType".to_string(), json!("render"));
    args.insert("marker".to_string(), json!(marker));
    JobRecord::new(id.to_string(), &task_type, args, OffsetDateTime::now_utc())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_creates_have_exactly_one_winner() {
    let (_dir, store) = open_store();

    let tasks = (0..CONTENDERS).map(|marker| {
        let store = store.clone();
        tokio::spawn(async move { (marker, store.create(&record("render_1", marker)).await) })
    });

    let mut winners = Vec::new();
    for joined in join_all(tasks).await {
        match joined.expect("task") {
            (marker, Ok(())) => winners.push(marker),
            (_, Err(StoreError::AlreadyExists { id, status })) => {
                assert_eq!(id, "render_1");
                assert_eq!(status, JobStatus::Created);
            }
            (_, Err(other)) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let snapshot = store.read("render_1").await.expect("read");
    assert_eq!(snapshot.status, JobStatus::Created);
    assert_eq!(snapshot.record.args["marker"], Value::from(winners[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_transitions_from_the_same_status_have_exactly_one_winner() {
    let (_dir, store) = open_store();
    store.create(&record("render_2", 0)).await.expect("create");

    let mut tasks = Vec::new();
    for _ in 0..CONTENDERS {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .transition("render_2", JobStatus::Created, JobStatus::Queued)
                .await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        match task.await.expect("task") {
            Ok(snapshot) => {
                assert_eq!(snapshot.status, JobStatus::Queued);
                successes += 1;
            }
            Err(StoreError::InvalidTransition {
                expected, actual, ..
            }) => {
                assert_eq!(expected, JobStatus::Created);
                assert_eq!(actual, JobStatus::Queued);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(
        store.list(JobStatus::Queued).await.expect("list"),
        vec!["render_2".to_string()]
    );
    assert!(store.list(JobStatus::Created).await.expect("list").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_always_find_a_job_while_it_moves() {
    let (_dir, store) = open_store();
    let ids: Vec<String> = (0..20).map(|n| format!("render_{}", 100 + n)).collect();
    for (marker, id) in ids.iter().enumerate() {
        store.create(&record(id, marker)).await.expect("create");
    }

    let writer = {
        let store = store.clone();
        let ids = ids.clone();
        tokio::spawn(async move {
            for id in &ids {
                store
                    .transition(id, JobStatus::Created, JobStatus::Queued)
                    .await
                    .expect("queue");
                store
                    .transition(id, JobStatus::Queued, JobStatus::Completed)
                    .await
                    .expect("complete");
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let ids = ids.clone();
        readers.push(tokio::spawn(async move {
            let mut reads = 0usize;
            for _ in 0..25 {
                for id in &ids {
                    let snapshot = store
                        .read(id)
                        .await
                        .unwrap_or_else(|err| panic!("read of {id} failed mid-transition: {err}"));
                    assert_eq!(&snapshot.record.id, id);
                    reads += 1;
                }
            }
            reads
        }));
    }

    writer.await.expect("writer");
    for reader in readers {
        assert_eq!(reader.await.expect("reader"), 25 * ids.len());
    }

    for id in &ids {
        let snapshot = store.read(id).await.expect("read");
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(snapshot.record.updated_at.is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_in_another_process_always_find_a_moving_job() {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path().join("jobs");
    // Separate instances share no locks, like a server and an executor process.
    let server = Arc::new(FsJobStore::open(root.clone()).expect("server store"));
    let executor = Arc::new(FsJobStore::open(root).expect("executor store"));

    let ids: Arc<Vec<String>> = Arc::new((0..300).map(|n| format!("build_{}", 1000 + n)).collect());
    for (marker, id) in ids.iter().enumerate() {
        executor.create(&record(id, marker)).await.expect("create");
    }

    let cursor = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..3 {
        let server = server.clone();
        let ids = ids.clone();
        let cursor = cursor.clone();
        let done = done.clone();
        readers.push(tokio::spawn(async move {
            let mut reads = 0usize;
            while !done.load(Ordering::Acquire) {
                let id = &ids[cursor.load(Ordering::Acquire).min(ids.len() - 1)];
                match server.read(id).await {
                    Ok(snapshot) => assert_eq!(&snapshot.record.id, id),
                    Err(err) => panic!("read of {id} failed while it moved: {err}"),
                }
                reads += 1;
            }
            reads
        }));
    }

    for (index, id) in ids.iter().enumerate() {
        cursor.store(index, Ordering::Release);
        executor
            .transition(id, JobStatus::Created, JobStatus::Queued)
            .await
            .expect("queue");
        let to = if index % 2 == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        executor
            .transition(id, JobStatus::Queued, to)
            .await
            .expect("finish");
    }
    done.store(true, Ordering::Release);

    let mut total = 0;
    for reader in readers {
        total += reader.await.expect("reader");
    }
    assert!(total > 0);

    assert_eq!(server.list(JobStatus::Completed).await.expect("list").len(), 150);
    assert_eq!(server.list(JobStatus::Failed).await.expect("list").len(), 150);
}
