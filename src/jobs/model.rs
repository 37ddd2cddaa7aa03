//! Job data model: status machine, log feed entries, and terminal results.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SubmitError;

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Encode,
    Decode,
    Bruteforce,
}

impl FromStr for JobKind {
    type Err = SubmitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "encode" => Ok(Self::Encode),
            "decode" => Ok(Self::Decode),
            "bruteforce" => Ok(Self::Bruteforce),
            other => Err(SubmitError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Encode => "encode",
            Self::Decode => "decode",
            Self::Bruteforce => "bruteforce",
        };
        write!(f, "{s}")
    }
}

/// Caller-supplied job parameters. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobParams {
    /// Message to hide (encode).
    #[serde(default)]
    pub text: String,
    /// Passphrase for encode/decode.
    #[serde(default)]
    pub secret: Option<String>,
    /// Trials per chunk (bruteforce), clamped to 1..=50.
    #[serde(default)]
    pub chunk_size: Option<i64>,
    /// Reject decodes that look like noise (bruteforce).
    #[serde(default)]
    pub check_gibberish: bool,
}

impl JobParams {
    /// The passphrase, treating an empty string as absent.
    pub fn passphrase(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, handler not yet started.
    Pending,
    /// Handler is running.
    Processing,
    /// Handler produced a successful result.
    Completed,
    /// Handler failed.
    Failed,
}

impl JobStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Severity / meaning of a log feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Success,
    Error,
    BruteSuccess,
    BruteFail,
}

/// One entry of a job's append-only log feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogKind::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogKind::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogKind::Error, message)
    }

    pub fn brute_success(message: impl Into<String>) -> Self {
        Self::new(LogKind::BruteSuccess, message)
    }

    pub fn brute_fail(message: impl Into<String>) -> Self {
        Self::new(LogKind::BruteFail, message)
    }
}

/// Kind-specific payload of a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultPayload {
    /// Plain status message (encode).
    Message(String),
    /// Recovered password and its hidden text (bruteforce).
    Cracked { password: String, text: String },
    /// Hidden text (decode).
    Decoded { text: String },
}

/// Structured terminal outcome, as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub result: Option<ResultPayload>,
    pub error: Option<String>,
}

/// Terminal write for a job: the result plus an optional produced file.
///
/// Only [`Outcome::success_with_artifact`] carries a file reference, so a
/// failed job can never expose one.
#[derive(Debug, Clone)]
pub struct Outcome {
    result: JobResult,
    artifact: Option<PathBuf>,
}

impl Outcome {
    pub fn success(payload: ResultPayload) -> Self {
        Self {
            result: JobResult {
                success: true,
                result: Some(payload),
                error: None,
            },
            artifact: None,
        }
    }

    pub fn success_with_artifact(payload: ResultPayload, artifact: PathBuf) -> Self {
        Self {
            artifact: Some(artifact),
            ..Self::success(payload)
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: JobResult {
                success: false,
                result: None,
                error: Some(error.into()),
            },
            artifact: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.success
    }

    pub fn status(&self) -> JobStatus {
        if self.result.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    pub(crate) fn into_parts(self) -> (JobResult, Option<PathBuf>) {
        (self.result, self.artifact)
    }
}

/// Full state of one job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub logs: Vec<LogEntry>,
    pub result: Option<JobResult>,
    pub result_artifact: Option<PathBuf>,
    pub done: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            logs: Vec::new(),
            result: None,
            result_artifact: None,
            done: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn result_artifact(&self) -> Option<&Path> {
        self.result_artifact.as_deref()
    }

    /// Terminal summary, present once `done` is set.
    pub fn done_payload(&self) -> Option<DonePayload> {
        if !self.done {
            return None;
        }
        Some(DonePayload {
            status: self.status,
            result: self.result.clone(),
            has_result_artifact: self.result_artifact.is_some(),
        })
    }
}

/// Payload of the stream's `done` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePayload {
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub has_result_artifact: bool,
}

/// What a reader sees when polling from a cursor: entries appended since
/// the cursor and, if the job is finished, its terminal summary. Both come
/// from the same read, so a summary is never seen ahead of the log entries
/// written before it.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub logs: Vec<LogEntry>,
    pub done: Option<DonePayload>,
}
