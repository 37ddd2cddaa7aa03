//! Decode: reveal the text hidden in an artifact.

use std::path::Path;

use tracing::{info, warn};

use super::{HandlerDeps, file_name, parent_dir};
use crate::error::Result;
use crate::jobs::model::{JobParams, Outcome, ResultPayload};
use crate::jobs::store::JobHandle;
use crate::process::runner::file_exists;

pub const HIDDEN_MESSAGE_HEADER: &str = "--- HIDDEN MESSAGE ---";
pub const HIDDEN_MESSAGE_FOOTER: &str = "----------------------";

/// Run a decode job to its terminal state.
pub async fn run(deps: &HandlerDeps, job: &JobHandle, params: &JobParams, cover: &Path) -> Result<()> {
    let dir = parent_dir(cover);
    let output = deps.tool.decoded_text_path(cover);

    let invocation = deps.tool.decode(&dir, params.passphrase(), &file_name(cover));
    job.info(format!("Running: {}", invocation.display())).await;

    let run = deps.runner.run(&invocation, job).await?;

    if !file_exists(&output).await || run.errored {
        warn!(
            job_id = %job.id(),
            exit_code = ?run.exit_code,
            errored = run.errored,
            transcript = %run.transcript,
            "Decode failed"
        );
        job.finish(Outcome::failure("Decoding failed")).await;
        return Ok(());
    }

    let raw = tokio::fs::read(&output).await?;
    let text = String::from_utf8_lossy(&raw).trim().to_string();

    job.success("Decode successful").await;
    if !text.is_empty() {
        job.success(HIDDEN_MESSAGE_HEADER).await;
        job.success(text.clone()).await;
        job.success(HIDDEN_MESSAGE_FOOTER).await;
    }

    job.finish(Outcome::success(ResultPayload::Decoded { text }))
        .await;
    info!(job_id = %job.id(), "Decode completed");
    Ok(())
}
