//! Process runner: spawn the external tool and stream its output.
//!
//! stdout and stderr are read by two producer tasks that split on `\n` and
//! `\r` and push raw lines into one bounded channel. The caller's task
//! consumes that channel, classifies each line, keeps the transcript, and
//! forwards the interesting ones to a [`LineSink`].

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::classifier::classify;
use crate::error::ProcessError;

/// Capacity of the line channel between readers and the classifier.
const LINE_BUFFER: usize = 256;

/// Read chunk size for the output pipes.
const READ_CHUNK: usize = 8 * 1024;

/// A fully-built command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Program file name, without its directory.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Command line as shown in the job feed.
    pub fn display(&self) -> String {
        std::iter::once(self.program_name())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Receives lines that passed the forwarding filter.
#[async_trait]
pub trait LineSink: Send + Sync {
    async fn forward(&self, line: String);
}

/// Sink that drops everything.
pub struct Discard;

#[async_trait]
impl LineSink for Discard {
    async fn forward(&self, _line: String) {}
}

/// Result of one process run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Every non-empty output line, trimmed, newline-joined.
    pub transcript: String,
    /// Some line matched the error heuristic.
    pub errored: bool,
}

/// Spawns external processes and classifies their combined output.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `invocation` to completion.
    ///
    /// The child is killed if the returned future is dropped, so wrapping
    /// this in `tokio::time::timeout` bounds the process too.
    pub async fn run(
        &self,
        invocation: &Invocation,
        sink: &dyn LineSink,
    ) -> Result<RunOutput, ProcessError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })?;
        debug!(program = %invocation.program_name(), cwd = %invocation.cwd.display(), "Process spawned");

        let (tx, mut rx) = mpsc::channel::<String>(LINE_BUFFER);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx.clone()));
        }
        drop(tx);

        let mut transcript = Vec::new();
        let mut errored = false;
        while let Some(raw) = rx.recv().await {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let verdict = classify(line);
            errored |= verdict.errored;
            if verdict.forward {
                sink.forward(line.to_string()).await;
            }
            transcript.push(line.to_string());
        }

        for reader in readers {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Output reader failed"),
                Err(e) => warn!(error = %e, "Output reader task panicked"),
            }
        }

        let status = child.wait().await?;
        info!(
            program = %invocation.program_name(),
            exit_code = ?status.code(),
            errored,
            lines = transcript.len(),
            "Process exited"
        );

        Ok(RunOutput {
            exit_code: status.code(),
            transcript: transcript.join("\n"),
            errored,
        })
    }
}

/// Read `pipe` to EOF, pushing each `\n`- or `\r`-terminated line to `tx`.
fn spawn_line_reader<R>(mut pipe: R, tx: mpsc::Sender<String>) -> JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = pipe.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            for &byte in &chunk[..n] {
                if byte == b'\n' || byte == b'\r' {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).await.is_err() {
                        return Ok(());
                    }
                } else {
                    pending.push(byte);
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned()).await;
        }
        Ok(())
    })
}

/// Whether a path exists, treating lookup errors as absence.
pub async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Sink that records what it was given.
    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    #[async_trait]
    impl LineSink for Collect {
        async fn forward(&self, line: String) {
            self.0.lock().unwrap().push(line);
        }
    }

    fn sh(script: &str) -> Invocation {
        Invocation::new("/bin/sh", std::env::temp_dir())
            .arg("-c")
            .arg(script)
    }

    #[tokio::test]
    async fn merges_stdout_and_stderr() {
        let sink = Collect::default();
        let out = ProcessRunner::new()
            .run(&sh("echo one; echo two 1>&2; echo three"), &sink)
            .await
            .unwrap();

        assert_eq!(out.exit_code, Some(0));
        assert!(!out.errored);
        let forwarded = sink.0.into_inner().unwrap();
        assert_eq!(forwarded.len(), 3);
        for line in ["one", "two", "three"] {
            assert!(forwarded.iter().any(|l| l == line), "missing {line}");
            assert!(out.transcript.contains(line));
        }
    }

    #[tokio::test]
    async fn throttles_feed_but_keeps_full_transcript() {
        let sink = Collect::default();
        let script = r#"i=1; while [ $i -le 45 ]; do echo "[Frame $i]"; i=$((i+1)); done; echo ">"; echo "0:00:03""#;
        let out = ProcessRunner::new().run(&sh(script), &sink).await.unwrap();

        assert_eq!(sink.0.into_inner().unwrap(), vec!["[Frame 20]", "[Frame 40]"]);
        assert_eq!(out.transcript.lines().count(), 47);
    }

    #[tokio::test]
    async fn error_line_flags_run_despite_zero_exit() {
        let out = ProcessRunner::new()
            .run(&sh("echo 'Error: wrong password'; exit 0"), &Discard)
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(out.errored);
    }

    #[tokio::test]
    async fn carriage_returns_split_lines() {
        let sink = Collect::default();
        ProcessRunner::new()
            .run(&sh(r"printf 'a\rb\r\nc'"), &sink)
            .await
            .unwrap();
        assert_eq!(sink.0.into_inner().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let out = ProcessRunner::new().run(&sh("exit 3"), &Discard).await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(out.transcript.is_empty());
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let inv = Invocation::new("/nonexistent/stego-tool", std::env::temp_dir());
        let result = ProcessRunner::new().run(&inv, &Discard).await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[tokio::test]
    async fn dropped_run_kills_child() {
        let inv = sh("exec sleep 5");
        let result =
            tokio::time::timeout(Duration::from_millis(100), ProcessRunner::new().run(&inv, &Discard))
                .await;
        assert!(result.is_err());
    }

    #[test]
    fn display_strips_program_directory() {
        let inv = Invocation::new("/opt/mp3stego/Decode.exe", "/tmp")
            .arg("-X")
            .arg("cover.mp3");
        assert_eq!(inv.display(), "Decode.exe -X cover.mp3");
    }
}
