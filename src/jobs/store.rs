//! Job store: concurrency-safe job records with single-writer handles.
//!
//! Readers (stream publishers, artifact lookups) go through [`JobStore`]
//! directly. Mutation during a job's life goes through the [`JobHandle`]
//! owned by its handler task; the handle is deliberately not `Clone`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{Job, JobProgress, JobStatus, LogEntry, Outcome};
use crate::error::JobError;
use crate::process::runner::LineSink;

/// Backend-agnostic job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Return the job, creating a fresh pending record on first access.
    async fn get_or_create(&self, id: Uuid) -> Job;

    /// Snapshot of a job, if it exists.
    async fn get(&self, id: Uuid) -> Option<Job>;

    /// Whether a job exists.
    async fn contains(&self, id: Uuid) -> bool;

    /// Move a pending job to `processing`.
    async fn set_processing(&self, id: Uuid) -> Result<(), JobError>;

    /// Append a log entry. Visible to readers as soon as this returns.
    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<(), JobError>;

    /// Set status, result, artifact and `done` in one step.
    ///
    /// First write wins: a second call fails with [`JobError::AlreadyTerminal`]
    /// and leaves the record untouched.
    async fn mark_terminal(&self, id: Uuid, outcome: Outcome) -> Result<(), JobError>;

    /// Log entries at positions `cursor..` plus the terminal summary, read atomically.
    async fn read_since(&self, id: Uuid, cursor: usize) -> Option<JobProgress>;

    /// Remove terminal jobs that finished more than `age` ago. Returns their ids.
    async fn evict_terminal_older_than(&self, age: Duration) -> Vec<Uuid>;
}

/// In-memory job store. State lives for the lifetime of the process.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of tracked jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_or_create(&self, id: Uuid) -> Job {
        let mut jobs = self.jobs.write().await;
        jobs.entry(id).or_insert_with(|| Job::new(id)).clone()
    }

    async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    async fn contains(&self, id: Uuid) -> bool {
        self.jobs.read().await.contains_key(&id)
    }

    async fn set_processing(&self, id: Uuid) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                id,
                status: job.status.to_string(),
            });
        }
        job.status = JobStatus::Processing;
        Ok(())
    }

    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<(), JobError> {
        debug!(job_id = %id, kind = ?entry.kind, message = %entry.message, "Job log");
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        job.logs.push(entry);
        Ok(())
    }

    async fn mark_terminal(&self, id: Uuid, outcome: Outcome) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if job.done {
            return Err(JobError::AlreadyTerminal {
                id,
                status: job.status.to_string(),
            });
        }

        let status = outcome.status();
        let (result, artifact) = outcome.into_parts();
        job.status = status;
        job.result = Some(result);
        job.result_artifact = artifact;
        job.finished_at = Some(Utc::now());
        job.done = true;

        info!(job_id = %id, status = %status, "Job finished");
        Ok(())
    }

    async fn read_since(&self, id: Uuid, cursor: usize) -> Option<JobProgress> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&id)?;
        let logs = job.logs.get(cursor..).map(<[_]>::to_vec).unwrap_or_default();
        Some(JobProgress {
            logs,
            done: job.done_payload(),
        })
    }

    async fn evict_terminal_older_than(&self, age: Duration) -> Vec<Uuid> {
        let cutoff = match chrono::Duration::from_std(age) {
            Ok(age) => Utc::now() - age,
            Err(_) => return Vec::new(),
        };

        let mut jobs = self.jobs.write().await;
        let expired: Vec<Uuid> = jobs
            .values()
            .filter(|job| job.finished_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id)
            .collect();
        for id in &expired {
            jobs.remove(id);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Evicted finished jobs");
        }
        expired
    }
}

/// Exclusive write access to one job, owned by the task running it.
pub struct JobHandle {
    id: Uuid,
    store: Arc<dyn JobStore>,
    finished: AtomicBool,
}

impl JobHandle {
    pub fn new(id: Uuid, store: Arc<dyn JobStore>) -> Self {
        Self {
            id,
            store,
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Append an entry to the job's feed.
    pub async fn log(&self, entry: LogEntry) {
        if let Err(e) = self.store.append_log(self.id, entry).await {
            warn!(job_id = %self.id, error = %e, "Failed to append job log");
        }
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogEntry::info(message)).await;
    }

    pub async fn success(&self, message: impl Into<String>) {
        self.log(LogEntry::success(message)).await;
    }

    /// Write the terminal outcome. Returns `false` if the job had already
    /// finished, in which case the outcome is discarded.
    pub async fn finish(&self, outcome: Outcome) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            debug!(job_id = %self.id, "Discarding outcome for finished job");
            return false;
        }
        match self.store.mark_terminal(self.id, outcome).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %self.id, error = %e, "Terminal write rejected");
                false
            }
        }
    }

    /// Whether this handle has already written a terminal outcome.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LineSink for JobHandle {
    async fn forward(&self, line: String) {
        self.info(line).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{LogKind, ResultPayload};

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();

        let first = store.get_or_create(id).await;
        assert_eq!(first.status, JobStatus::Pending);
        assert!(!first.done);

        store.append_log(id, LogEntry::info("hello")).await.unwrap();
        let again = store.get_or_create(id).await;
        assert_eq!(again.logs.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_job_rejects_writes() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.append_log(id, LogEntry::info("x")).await,
            Err(JobError::NotFound { .. })
        ));
        assert!(store.read_since(id, 0).await.is_none());
    }

    #[tokio::test]
    async fn terminal_write_happens_once() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        store.set_processing(id).await.unwrap();

        store
            .mark_terminal(id, Outcome::success(ResultPayload::Message("ok".into())))
            .await
            .unwrap();
        let second = store.mark_terminal(id, Outcome::failure("late")).await;
        assert!(matches!(second, Err(JobError::AlreadyTerminal { .. })));

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.done);
        assert!(job.result.clone().unwrap().success);
        assert!(store.set_processing(id).await.is_err());
    }

    #[tokio::test]
    async fn read_since_returns_tail_and_summary_together() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        for i in 0..5 {
            store
                .append_log(id, LogEntry::info(format!("line {i}")))
                .await
                .unwrap();
        }

        let progress = store.read_since(id, 3).await.unwrap();
        let messages: Vec<_> = progress.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["line 3", "line 4"]);
        assert!(progress.done.is_none());

        store.mark_terminal(id, Outcome::failure("nope")).await.unwrap();
        let progress = store.read_since(id, 99).await.unwrap();
        assert!(progress.logs.is_empty());
        let done = progress.done.unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        assert!(!done.has_result_artifact);
    }

    #[tokio::test]
    async fn concurrent_readers_see_prefixes_of_one_order() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;

        let writer_store: Arc<dyn JobStore> = store.clone();
        let writer = tokio::spawn(async move {
            let handle = JobHandle::new(id, writer_store);
            for i in 0..200 {
                handle.info(format!("{i}")).await;
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            handle
                .finish(Outcome::success(ResultPayload::Message("done".into())))
                .await;
        });

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            readers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    let progress = store.read_since(id, seen.len()).await.unwrap();
                    seen.extend(progress.logs.into_iter().map(|l| l.message));
                    if progress.done.is_some() {
                        return seen;
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn handle_finish_is_first_write_wins() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        let handle = JobHandle::new(id, store.clone());

        assert!(!handle.is_finished());
        assert!(
            handle
                .finish(Outcome::success(ResultPayload::Decoded { text: "a".into() }))
                .await
        );
        assert!(handle.is_finished());
        assert!(!handle.finish(Outcome::failure("second")).await);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn handle_forwards_lines_as_info() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        let handle = JobHandle::new(id, store.clone());

        handle.forward("[Frame 20]".to_string()).await;
        let job = store.get(id).await.unwrap();
        assert_eq!(job.logs[0].kind, LogKind::Info);
        assert_eq!(job.logs[0].message, "[Frame 20]");
    }

    #[tokio::test]
    async fn eviction_only_touches_finished_jobs() {
        let store = InMemoryJobStore::new();
        let running = Uuid::new_v4();
        let finished = Uuid::new_v4();
        store.get_or_create(running).await;
        store.get_or_create(finished).await;
        store
            .mark_terminal(finished, Outcome::failure("x"))
            .await
            .unwrap();

        assert!(store.evict_terminal_older_than(Duration::from_secs(3600)).await.is_empty());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let evicted = store.evict_terminal_older_than(Duration::ZERO).await;
        assert_eq!(evicted, vec![finished]);
        assert!(store.contains(running).await);
        assert!(!store.contains(finished).await);
    }
}
