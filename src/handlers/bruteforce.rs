//! Brute-force: try candidate passphrases against an artifact.
//!
//! Candidates are processed in consecutive chunks. Every candidate of a
//! chunk runs as its own trial task, on its own copy of the artifact, and
//! the next chunk starts only after the current one drained. The first
//! accepted trial finishes the job; trials of the same chunk that were
//! already running keep going, and their results are discarded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{HandlerDeps, file_name, parent_dir};
use crate::error::Result;
use crate::jobs::model::{JobParams, LogEntry, Outcome, ResultPayload};
use crate::jobs::store::JobHandle;
use crate::process::runner::{Discard, file_exists};

pub const DEFAULT_CHUNK_SIZE: usize = 10;
pub const MAX_CHUNK_SIZE: usize = 50;

/// Below this share of printable characters a decode is treated as noise.
pub const MIN_PRINTABLE_RATIO: f64 = 0.7;

/// More replacement characters than this marks a decode as noise.
pub const MAX_REPLACEMENT_CHARS: usize = 3;

/// Clamp a requested chunk size into `1..=MAX_CHUNK_SIZE`.
pub fn clamp_chunk_size(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_CHUNK_SIZE,
        Some(n) => n.clamp(1, MAX_CHUNK_SIZE as i64) as usize,
    }
}

/// Split a wordlist into candidates: trimmed, non-empty lines, in order.
pub fn parse_candidates(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Read a wordlist file. Invalid UTF-8 is replaced rather than rejected.
pub async fn load_candidates(path: &Path) -> std::io::Result<Vec<String>> {
    let raw = tokio::fs::read(path).await?;
    Ok(parse_candidates(&String::from_utf8_lossy(&raw)))
}

/// Share of characters that are printable ASCII or common whitespace.
pub fn printable_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    let printable = text
        .chars()
        .filter(|c| matches!(c, ' '..='~' | '\n' | '\r' | '\t'))
        .count();
    printable as f64 / total.max(1) as f64
}

/// Why a trial did not produce an accepted decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// No output file, or only whitespace in it.
    NoOutput,
    /// Output looked like noise from a wrong passphrase.
    Gibberish { ratio: f64, replacements: usize },
    /// The decode exceeded the trial time limit.
    TimedOut,
    /// Copying, spawning, or reading failed.
    Failed(String),
}

/// Accept or reject decoded output. Returns the trimmed text on acceptance.
pub fn assess(decoded: &str, check_gibberish: bool) -> std::result::Result<String, Rejection> {
    let text = decoded.trim();
    if text.is_empty() {
        return Err(Rejection::NoOutput);
    }
    if check_gibberish {
        let ratio = printable_ratio(decoded);
        let replacements = decoded.chars().filter(|&c| c == '\u{FFFD}').count();
        if ratio < MIN_PRINTABLE_RATIO || replacements > MAX_REPLACEMENT_CHARS {
            return Err(Rejection::Gibberish {
                ratio,
                replacements,
            });
        }
    }
    Ok(text.to_string())
}

/// Removes a trial's working copy and side files however the trial ends.
///
/// Runs from `Drop`, so removal is synchronous: a few unlinks per trial,
/// including on the timeout path where the trial future is dropped mid-run.
struct TrialFiles {
    paths: Vec<PathBuf>,
}

impl Drop for TrialFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to clean trial file"),
            }
        }
    }
}

/// One isolated decode attempt.
struct Trial {
    deps: HandlerDeps,
    cover: Arc<PathBuf>,
    /// Per-scan tag keeping working copies out of the upload's namespace.
    scan_tag: Arc<str>,
    password: String,
    index: usize,
    check_gibberish: bool,
}

impl Trial {
    /// Working copy name, unique within the scan.
    fn working_copy(&self) -> PathBuf {
        let extension = self
            .cover
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        parent_dir(&self.cover).join(format!(
            ".trial_{}_{}{}",
            self.scan_tag, self.index, extension
        ))
    }

    async fn run(self) -> std::result::Result<String, Rejection> {
        let copy = self.working_copy();
        let mut paths = vec![copy.clone()];
        paths.extend(self.deps.tool.decode_byproducts(&copy));
        if overlaps(&paths, &self.cover) {
            return Err(Rejection::Failed(format!(
                "working copy {} collides with the artifact",
                copy.display()
            )));
        }
        let _cleanup = TrialFiles { paths };

        tokio::fs::copy(self.cover.as_path(), &copy)
            .await
            .map_err(|e| Rejection::Failed(e.to_string()))?;

        let invocation =
            self.deps
                .tool
                .decode(&parent_dir(&copy), Some(&self.password), &file_name(&copy));
        match tokio::time::timeout(
            self.deps.trial_timeout,
            self.deps.runner.run(&invocation, &Discard),
        )
        .await
        {
            Err(_) => return Err(Rejection::TimedOut),
            Ok(Err(e)) => return Err(Rejection::Failed(e.to_string())),
            Ok(Ok(_)) => {}
        }

        let output = self.deps.tool.decoded_text_path(&copy);
        if !file_exists(&output).await {
            return Err(Rejection::NoOutput);
        }
        let raw = tokio::fs::read(&output)
            .await
            .map_err(|e| Rejection::Failed(e.to_string()))?;
        assess(&String::from_utf8_lossy(&raw), self.check_gibberish)
    }
}

/// Whether any trial path would land on the artifact itself.
fn overlaps(paths: &[PathBuf], cover: &Path) -> bool {
    paths.iter().any(|p| p == cover)
}

/// Run a brute-force scan to its terminal state.
pub async fn run(
    deps: &HandlerDeps,
    job: &JobHandle,
    params: &JobParams,
    cover: &Path,
    candidates: Vec<String>,
) -> Result<()> {
    let chunk_size = clamp_chunk_size(params.chunk_size);
    let total = candidates.len();
    let artifact = file_name(cover);
    let cover = Arc::new(cover.to_path_buf());
    let scan_tag: Arc<str> = Uuid::new_v4().simple().to_string().into();

    job.info(format!(
        "Brute forcing {total} passwords (Chunk: {chunk_size}, Gibberish Filter: {})...",
        params.check_gibberish
    ))
    .await;
    info!(job_id = %job.id(), total, chunk_size, "Brute force started");

    let mut found = false;
    for (chunk_index, chunk) in candidates.chunks(chunk_size).enumerate() {
        if found {
            break;
        }
        debug!(job_id = %job.id(), chunk = chunk_index, size = chunk.len(), "Scheduling chunk");

        let mut trials = JoinSet::new();
        for (slot, password) in chunk.iter().enumerate() {
            let trial = Trial {
                deps: deps.clone(),
                cover: Arc::clone(&cover),
                scan_tag: Arc::clone(&scan_tag),
                password: password.clone(),
                index: chunk_index * chunk_size + slot,
                check_gibberish: params.check_gibberish,
            };
            let password = password.clone();
            trials.spawn(async move {
                let verdict = std::panic::AssertUnwindSafe(trial.run())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Rejection::Failed("trial panicked".into())));
                (password, verdict)
            });
        }

        while let Some(joined) = trials.join_next().await {
            let (password, verdict) = match joined {
                Ok(report) => report,
                Err(e) => {
                    warn!(job_id = %job.id(), error = %e, "Trial task aborted");
                    continue;
                }
            };

            match verdict {
                Ok(text) if !found => {
                    job.log(LogEntry::brute_success(format!(
                        "{password}|||{artifact}|||{text}"
                    )))
                    .await;
                    job.finish(Outcome::success(ResultPayload::Cracked {
                        password: password.clone(),
                        text,
                    }))
                    .await;
                    info!(job_id = %job.id(), password = %password, "Password found");
                    found = true;
                }
                Ok(_) => {
                    debug!(job_id = %job.id(), password = %password, "Discarding success after scan finished");
                }
                Err(rejection) => {
                    debug!(job_id = %job.id(), password = %password, ?rejection, "Trial rejected");
                    if !found {
                        job.log(LogEntry::brute_fail(password)).await;
                    }
                }
            }
        }
    }

    if !found {
        job.finish(Outcome::failure(format!("No password found ({total} tried)")))
            .await;
        info!(job_id = %job.id(), total, "Brute force exhausted");
    }
    Ok(())
}
