//! Job submission and the per-job task boundary.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{JobKind, JobParams, JobStatus, LogEntry, Outcome};
use super::store::{JobHandle, JobStore};
use crate::error::{ArtifactError, SubmitError};
use crate::handlers::{HandlerDeps, bruteforce, decode, encode};
use crate::process::runner::file_exists;
use crate::workspace::{StagedJob, Upload, Workspace};

/// A raw submission as received from the transport.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// `encode`, `decode` or `bruteforce`.
    pub kind: String,
    /// JSON object with the job parameters. Absent or blank means defaults.
    pub params: Option<String>,
    /// The cover artifact.
    pub artifact: Option<Upload>,
    /// Candidate list for brute-force.
    pub wordlist: Option<Upload>,
}

/// Accepts submissions and runs each one as an independent task.
pub struct JobService {
    store: Arc<dyn JobStore>,
    deps: HandlerDeps,
    workspace: Workspace,
    default_wordlist: Option<PathBuf>,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, deps: HandlerDeps, workspace: Workspace) -> Self {
        Self {
            store,
            deps,
            workspace,
            default_wordlist: None,
        }
    }

    /// Wordlist used when a brute-force submission brings none.
    pub fn with_default_wordlist(mut self, path: Option<PathBuf>) -> Self {
        self.default_wordlist = path;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Validate, stage, and start a job. Returns its id immediately.
    ///
    /// Nothing is recorded in the store unless validation and staging succeed.
    pub async fn submit(&self, submission: Submission) -> Result<Uuid, SubmitError> {
        let artifact = submission
            .artifact
            .filter(|upload| !upload.file_name.is_empty() || !upload.bytes.is_empty())
            .ok_or(SubmitError::MissingArtifact)?;
        let kind: JobKind = submission.kind.parse()?;
        let params: JobParams = match submission.params.as_deref().map(str::trim) {
            None | Some("") => JobParams::default(),
            Some(raw) => serde_json::from_str(raw)?,
        };

        let id = Uuid::new_v4();
        let staged = self
            .workspace
            .stage(id, &artifact, submission.wordlist.as_ref())
            .await?;

        self.store.get_or_create(id).await;
        if let Err(e) = self.store.set_processing(id).await {
            warn!(job_id = %id, error = %e, "Could not mark job processing");
        }
        if let Err(e) = self
            .store
            .append_log(id, LogEntry::info("Worker picked up command"))
            .await
        {
            warn!(job_id = %id, error = %e, "Failed to append job log");
        }
        info!(job_id = %id, kind = %kind, artifact = %staged.artifact.display(), "Job accepted");

        let task = JobTask {
            job: JobHandle::new(id, Arc::clone(&self.store)),
            kind,
            params,
            staged,
            deps: self.deps.clone(),
            default_wordlist: self.default_wordlist.clone(),
        };
        tokio::spawn(task.run());

        Ok(id)
    }

    /// Path of a job's downloadable result, if it completed with one that
    /// is still on disk.
    pub async fn result_artifact(&self, id: Uuid) -> Result<PathBuf, ArtifactError> {
        let job = self.store.get(id).await.ok_or(ArtifactError::NotFound)?;
        if job.status != JobStatus::Completed {
            return Err(ArtifactError::NotFound);
        }
        let path = job
            .result_artifact()
            .map(PathBuf::from)
            .ok_or(ArtifactError::NotFound)?;
        if !file_exists(&path).await {
            return Err(ArtifactError::NotFound);
        }
        Ok(path)
    }

    /// Drop finished jobs older than `age` along with their working directories.
    pub async fn evict_expired(&self, age: Duration) -> usize {
        let evicted = self.store.evict_terminal_older_than(age).await;
        for id in &evicted {
            self.workspace.remove_job_dir(*id).await;
        }
        evicted.len()
    }
}

/// Spawn a background task that evicts finished jobs older than `retention`.
pub fn spawn_retention_task(
    service: Arc<JobService>,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = (retention / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            service.evict_expired(retention).await;
        }
    })
}

/// Everything one job needs, moved into its task.
struct JobTask {
    job: JobHandle,
    kind: JobKind,
    params: JobParams,
    staged: StagedJob,
    deps: HandlerDeps,
    default_wordlist: Option<PathBuf>,
}

impl JobTask {
    /// Run the handler and guarantee a terminal state, whatever happens inside.
    async fn run(self) {
        let failure = match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        if let Some(description) = failure {
            if self.job.is_finished() {
                warn!(job_id = %self.job.id(), error = %description, "Handler failed after finishing");
            } else {
                error!(job_id = %self.job.id(), kind = %self.kind, error = %description, "Handler failed");
                self.job.log(LogEntry::error(description.clone())).await;
                self.job.finish(Outcome::failure(description)).await;
            }
        }

        if !self.job.is_finished() {
            error!(job_id = %self.job.id(), kind = %self.kind, "Handler returned without a result");
            self.job
                .finish(Outcome::failure("Handler exited without a result"))
                .await;
        }
    }

    async fn execute(&self) -> crate::error::Result<()> {
        let cover = &self.staged.artifact;
        match self.kind {
            JobKind::Encode => encode::run(&self.deps, &self.job, &self.params, cover).await,
            JobKind::Decode => decode::run(&self.deps, &self.job, &self.params, cover).await,
            JobKind::Bruteforce => {
                let Some(list) = self
                    .staged
                    .wordlist
                    .clone()
                    .or_else(|| self.default_wordlist.clone())
                else {
                    self.job.finish(Outcome::failure("No wordlist provided")).await;
                    return Ok(());
                };
                let candidates = bruteforce::load_candidates(&list).await?;
                bruteforce::run(&self.deps, &self.job, &self.params, cover, candidates).await
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Handler panicked: {s}")
    } else {
        "Handler panicked".to_string()
    }
}
