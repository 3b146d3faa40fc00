//! Filesystem-backed job store: one directory per status, one JSON file per job.
//!
//! ```text
//! {root}/created/{id}.json
//! {root}/queued/{id}.json
//! {root}/completed/{id}.json
//! {root}/failed/{id}.json
//! {root}/.staging/          temporary files, same filesystem as the partitions
//! ```

use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use crate::application::repos::{JobStore, StoreError};
use crate::domain::entities::{JobRecord, JobSnapshot, RecordUpdate, is_valid_job_id};
use crate::domain::types::JobStatus;

const STAGING_DIR: &str = ".staging";
const RECORD_EXTENSION: &str = "json";

type LockRegistry = Arc<DashMap<String, Arc<RwLock<()>>>>;

#[derive(Debug)]
pub struct FsJobStore {
    root: PathBuf,
    staging: PathBuf,
    locks: LockRegistry,
}

impl FsJobStore {
    /// Open (and lay out, if needed) a store rooted at `root`.
    pub fn open(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        for status in JobStatus::ALL {
            std::fs::create_dir_all(root.join(status.as_str()))?;
        }
        let staging = root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging)?;

        Ok(Self {
            root,
            staging,
            locks: Arc::new(DashMap::new()),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, status: JobStatus, id: &str) -> PathBuf {
        self.root
            .join(status.as_str())
            .join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn handle(&self, id: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    async fn lock_shared(&self, id: &str) -> IdGuard<OwnedRwLockReadGuard<()>> {
        let guard = self.handle(id).read_owned().await;
        IdGuard::new(id, &self.locks, guard)
    }

    async fn lock_exclusive(&self, id: &str) -> IdGuard<OwnedRwLockWriteGuard<()>> {
        let guard = self.handle(id).write_owned().await;
        IdGuard::new(id, &self.locks, guard)
    }

    /// Partitions holding `id` when each one was probed, in probe order.
    async fn probe(
        &self,
        id: &str,
        order: impl IntoIterator<Item = JobStatus>,
    ) -> Result<Vec<JobStatus>, StoreError> {
        let mut present = Vec::with_capacity(1);
        for status in order {
            if fs::try_exists(self.record_path(status, id)).await? {
                present.push(status);
            }
        }
        Ok(present)
    }

    /// First partition holding `id`, probing in lifecycle order.
    ///
    /// Records only move forward one rename at a time, so a record that exists when the
    /// probe starts is found by it even while another process keeps moving it.
    async fn first_present(&self, id: &str) -> Result<Option<JobStatus>, StoreError> {
        for status in JobStatus::ALL {
            if fs::try_exists(self.record_path(status, id)).await? {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    /// The partition holding `id`, or `None` if no partition does.
    ///
    /// The per-id lock only orders callers inside this process; an executor running as
    /// another process moves records underneath it. The priority probe can then miss the
    /// record (it moved behind the probe) or count it twice (`queued` then `failed`), so
    /// both outcomes are settled with probes whose order cannot produce them.
    async fn locate(&self, id: &str) -> Result<Option<JobStatus>, StoreError> {
        let present = self.probe(id, JobStatus::READ_PRIORITY).await?;
        match present.as_slice() {
            [status] => Ok(Some(*status)),
            [] => self.first_present(id).await,
            _ => {
                // Newest partition first: a record seen twice here really is in both.
                let mut confirmed = self.probe(id, JobStatus::ALL.into_iter().rev()).await?;
                match confirmed.as_slice() {
                    [] => self.first_present(id).await,
                    [status] => Ok(Some(*status)),
                    _ => {
                        confirmed.sort_by_key(|status| {
                            JobStatus::READ_PRIORITY.iter().position(|p| p == status)
                        });
                        Err(self.corrupt(id, confirmed))
                    }
                }
            }
        }
    }

    async fn load(&self, status: JobStatus, id: &str) -> Result<JobRecord, StoreError> {
        let bytes = match fs::read(self.record_path(status, id)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::not_found(id));
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        let record: JobRecord =
            serde_json::from_slice(&bytes).map_err(|err| StoreError::serialization(id, err))?;
        if record.id != id {
            return Err(StoreError::serialization(
                id,
                format!("file holds record `{}`", record.id),
            ));
        }
        Ok(record)
    }

    /// Write `record` to a staging file and move it over `target` in one rename.
    async fn persist(
        &self,
        record: &JobRecord,
        target: PathBuf,
        mode: PersistMode,
    ) -> Result<(), std::io::Error> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let staging = self.staging.clone();

        tokio::task::spawn_blocking(move || {
            let mut file = tempfile::Builder::new()
                .prefix(".job-")
                .suffix(".json")
                .tempfile_in(&staging)?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()?;
            let persisted = match mode {
                PersistMode::NoClobber => file.persist_noclobber(&target),
                PersistMode::Replace => file.persist(&target),
            };
            persisted.map(|_| ()).map_err(|err| err.error)
        })
        .await
        .map_err(std::io::Error::other)?
    }

    fn corrupt(&self, id: &str, partitions: Vec<JobStatus>) -> StoreError {
        warn!(
            target = "jobdock::store",
            job_id = id,
            partitions = ?partitions,
            root = %self.root.display(),
            "job record present in more than one partition"
        );
        StoreError::CorruptState {
            id: id.to_string(),
            partitions,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PersistMode {
    NoClobber,
    Replace,
}

/// Holds a per-id lock and drops the registry entry once nobody else wants it.
struct IdGuard<G> {
    id: String,
    registry: LockRegistry,
    _guard: G,
}

impl<G> IdGuard<G> {
    fn new(id: &str, registry: &LockRegistry, guard: G) -> Self {
        Self {
            id: id.to_string(),
            registry: Arc::clone(registry),
            _guard: guard,
        }
    }
}

impl<G> Drop for IdGuard<G> {
    fn drop(&mut self) {
        // One reference in the registry, one inside our own guard.
        self.registry
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

fn ensure_valid_id(id: &str) -> Result<(), StoreError> {
    if is_valid_job_id(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidId { id: id.to_string() })
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let id = record.id.as_str();
        ensure_valid_id(id)?;
        let _guard = self.lock_exclusive(id).await;

        if let Some(status) = self.locate(id).await? {
            return Err(StoreError::AlreadyExists {
                id: id.to_string(),
                status,
            });
        }

        let target = self.record_path(JobStatus::Created, id);
        match self.persist(record, target, PersistMode::NoClobber).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists {
                    id: id.to_string(),
                    status: JobStatus::Created,
                });
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        debug!(target = "jobdock::store", job_id = id, "job record created");
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<JobSnapshot, StoreError> {
        ensure_valid_id(id)?;
        let _guard = self.lock_shared(id).await;

        // Each failed load means another process moved the record forward in between, which
        // can happen at most once per edge.
        for _ in 0..JobStatus::ALL.len() {
            let Some(status) = self.locate(id).await? else {
                return Err(StoreError::not_found(id));
            };
            match self.load(status, id).await {
                Ok(record) => return Ok(JobSnapshot { status, record }),
                Err(StoreError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::not_found(id))
    }

    async fn transition_with(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        update: RecordUpdate,
    ) -> Result<JobSnapshot, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalStatusEdge { from, to });
        }
        ensure_valid_id(id)?;
        let _guard = self.lock_exclusive(id).await;

        let Some(actual) = self.locate(id).await? else {
            return Err(StoreError::not_found(id));
        };
        if actual != from {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                expected: from,
                actual,
            });
        }

        let source = self.record_path(from, id);
        let target = self.record_path(to, id);

        let mut record = self.load(from, id).await?;
        update.apply(&mut record, OffsetDateTime::now_utc());

        // Rewrite in place, then move: both steps are single renames, so the record is
        // always in exactly one partition.
        self.persist(&record, source.clone(), PersistMode::Replace)
            .await?;
        fs::rename(&source, &target).await?;

        counter!(
            "jobdock_jobs_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        debug!(
            target = "jobdock::store",
            job_id = id,
            from = %from,
            to = %to,
            "job record moved"
        );

        Ok(JobSnapshot { status: to, record })
    }

    async fn list(&self, status: JobStatus) -> Result<Vec<String>, StoreError> {
        let mut entries = fs::read_dir(self.root.join(status.as_str())).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if is_valid_job_id(stem) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn location(&self, status: JobStatus, id: &str) -> String {
        self.record_path(status, id).display().to_string()
    }

    fn root(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::entities::TaskType;

    fn store() -> (TempDir, FsJobStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = FsJobStore::open(dir.path().join("jobs")).expect("store opens");
        (dir, store)
    }

    fn record(id: &str) -> JobRecord {
        let task = TaskType::parse("render").unwrap();
        JobRecord::new(
            id.to_string(),
            &task,
            json!({"taskType": "render", "pages": [1, 2, 3]})
                .as_object()
                .cloned()
                .unwrap(),
            OffsetDateTime::now_utc(),
        )
    }

    #[tokio::test]
    async fn open_lays_out_one_directory_per_status() {
        let (_dir, store) = store();
        for status in JobStatus::ALL {
            assert!(store.root_path().join(status.as_str()).is_dir());
        }
    }

    #[tokio::test]
    async fn created_record_reads_back_identically() {
        let (_dir, store) = store();
        let record = record("render_1");

        store.create(&record).await.unwrap();
        let snapshot = store.read("render_1").await.unwrap();

        assert_eq!(snapshot.status, JobStatus::Created);
        assert_eq!(snapshot.record, record);
        assert!(
            store
                .root_path()
                .join("created")
                .join("render_1.json")
                .is_file()
        );
    }

    #[tokio::test]
    async fn create_refuses_ids_present_in_any_partition() {
        let (_dir, store) = store();
        store.create(&record("render_1")).await.unwrap();
        store
            .transition("render_1", JobStatus::Created, JobStatus::Queued)
            .await
            .unwrap();

        let err = store.create(&record("render_1")).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::AlreadyExists {
                status: JobStatus::Queued,
                ..
            }
        ));
        let snapshot = store.read("render_1").await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.read("render_404").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_ids_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.read("../secrets").await,
            Err(StoreError::InvalidId { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_presence_is_reported_as_corruption() {
        let (_dir, store) = store();
        store.create(&record("render_1")).await.unwrap();
        std::fs::copy(
            store.root_path().join("created/render_1.json"),
            store.root_path().join("failed/render_1.json"),
        )
        .unwrap();

        match store.read("render_1").await {
            Err(StoreError::CorruptState { partitions, .. }) => {
                assert_eq!(partitions, vec![JobStatus::Created, JobStatus::Failed]);
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transitions_follow_the_lifecycle() {
        let (_dir, store) = store();
        store.create(&record("render_1")).await.unwrap();

        store
            .transition("render_1", JobStatus::Created, JobStatus::Queued)
            .await
            .unwrap();
        let done = store
            .transition_with(
                "render_1",
                JobStatus::Queued,
                JobStatus::Completed,
                RecordUpdate {
                    artifact_path: Some(PathBuf::from("/out/render_1.pdf")),
                    failure_reason: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(done.status, JobStatus::Completed);
        let snapshot = store.read("render_1").await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(
            snapshot.record.artifact_path,
            Some(PathBuf::from("/out/render_1.pdf"))
        );
        assert!(snapshot.record.updated_at.is_some());
        assert!(!store.root_path().join("queued/render_1.json").exists());
    }

    #[tokio::test]
    async fn illegal_edges_are_rejected_before_touching_storage() {
        let (_dir, store) = store();
        store.create(&record("render_1")).await.unwrap();

        for (from, to) in [
            (JobStatus::Created, JobStatus::Completed),
            (JobStatus::Created, JobStatus::Failed),
            (JobStatus::Queued, JobStatus::Created),
            (JobStatus::Completed, JobStatus::Queued),
            (JobStatus::Created, JobStatus::Created),
        ] {
            let err = store.transition("render_1", from, to).await.unwrap_err();
            assert!(
                matches!(err, StoreError::IllegalStatusEdge { .. }),
                "{from} -> {to} should be illegal, got {err:?}"
            );
        }
        assert_eq!(
            store.read("render_1").await.unwrap().status,
            JobStatus::Created
        );
    }

    #[tokio::test]
    async fn stale_transitions_report_the_actual_status() {
        let (_dir, store) = store();
        store.create(&record("render_1")).await.unwrap();

        let err = store
            .transition("render_1", JobStatus::Queued, JobStatus::Completed)
            .await
            .unwrap_err();

        match err {
            StoreError::InvalidTransition {
                expected, actual, ..
            } => {
                assert_eq!(expected, JobStatus::Queued);
                assert_eq!(actual, JobStatus::Created);
            }
            other => panic!("expected invalid transition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_returns_sorted_ids_of_one_partition() {
        let (_dir, store) = store();
        for id in ["render_3", "render_1", "render_2"] {
            store.create(&record(id)).await.unwrap();
        }
        store
            .transition("render_2", JobStatus::Created, JobStatus::Queued)
            .await
            .unwrap();
        std::fs::write(store.root_path().join("created/notes.txt"), b"ignored").unwrap();

        assert_eq!(
            store.list(JobStatus::Created).await.unwrap(),
            vec!["render_1".to_string(), "render_3".to_string()]
        );
        assert_eq!(
            store.list(JobStatus::Queued).await.unwrap(),
            vec!["render_2".to_string()]
        );
        assert!(store.list(JobStatus::Failed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_registry_is_emptied_after_use() {
        let (_dir, store) = store();
        store.create(&record("render_1")).await.unwrap();
        store.read("render_1").await.unwrap();
        assert!(store.locks.is_empty());
    }
}
