//! Per-kind command handlers.
//!
//! Each handler owns its job's [`JobHandle`](crate::jobs::JobHandle), drives
//! the external tool, and writes exactly one terminal outcome. Errors they
//! return are turned into failed jobs by the service's task boundary.

use std::sync::Arc;
use std::time::Duration;

use crate::process::{ProcessRunner, StegoTool};

pub mod bruteforce;
pub mod decode;
pub mod encode;

/// Default wall-clock limit for one brute-force trial.
pub const DEFAULT_TRIAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared dependencies for handler execution.
#[derive(Clone)]
pub struct HandlerDeps {
    pub tool: Arc<dyn StegoTool>,
    pub runner: ProcessRunner,
    pub trial_timeout: Duration,
}

impl HandlerDeps {
    pub fn new(tool: Arc<dyn StegoTool>) -> Self {
        Self {
            tool,
            runner: ProcessRunner::new(),
            trial_timeout: DEFAULT_TRIAL_TIMEOUT,
        }
    }

    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = timeout;
        self
    }
}

/// File name component of `path` as a string.
pub(crate) fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Directory holding `path`.
pub(crate) fn parent_dir(path: &std::path::Path) -> std::path::PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(std::path::Path::to_path_buf)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
}
