//! Encode: hide a text message inside the cover artifact.

use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use super::{HandlerDeps, file_name, parent_dir};
use crate::error::Result;
use crate::jobs::model::{JobParams, Outcome, ResultPayload};
use crate::jobs::store::JobHandle;
use crate::process::runner::file_exists;

const SUCCESS_MESSAGE: &str = "Encoding successful";

/// Run an encode job to its terminal state.
///
/// Succeeds only when the output artifact exists and no output line looked
/// like an error. The transcript itself is only ever visible line by line
/// in the feed, never in the result.
pub async fn run(deps: &HandlerDeps, job: &JobHandle, params: &JobParams, cover: &Path) -> Result<()> {
    let dir = parent_dir(cover);

    let mut message = tempfile::Builder::new()
        .prefix("message")
        .suffix(".txt")
        .tempfile_in(&dir)?;
    message.write_all(params.text.as_bytes())?;
    message.flush()?;

    let extension = cover
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let output = dir.join(format!("output_{}{}", job.id().simple(), extension));

    let invocation = deps.tool.encode(
        &dir,
        &file_name(message.path()),
        params.passphrase(),
        &file_name(cover),
        &file_name(&output),
    );
    job.info(format!("Running: {}", invocation.display())).await;

    let run = deps.runner.run(&invocation, job).await?;
    drop(message);

    if file_exists(&output).await && !run.errored {
        job.success(SUCCESS_MESSAGE).await;
        job.finish(Outcome::success_with_artifact(
            ResultPayload::Message(SUCCESS_MESSAGE.to_string()),
            output,
        ))
        .await;
        info!(job_id = %job.id(), "Encode completed");
    } else {
        warn!(
            job_id = %job.id(),
            exit_code = ?run.exit_code,
            errored = run.errored,
            transcript = %run.transcript,
            "Encode failed"
        );
        job.finish(Outcome::failure("Encoding failed")).await;
    }
    Ok(())
}
