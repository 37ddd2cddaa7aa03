//! Configuration types.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use tracing::warn;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::handlers::DEFAULT_TRIAL_TIMEOUT;
use crate::jobs::StreamConfig;

const DEFAULT_PORT: u16 = 5050;
const DEFAULT_MAX_UPLOAD_MB: usize = 512;

/// Worker runtime configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Shared secret every caller must present.
    pub token: SecretString,
    /// The token was generated because none was configured.
    pub token_generated: bool,
    /// Encoder binary.
    pub encode_exe: PathBuf,
    /// Decoder binary.
    pub decode_exe: PathBuf,
    /// Directory copied next to every artifact (the tool's lookup tables).
    pub support_dir: Option<PathBuf>,
    /// Parent of all job working directories.
    pub work_root: PathBuf,
    /// Brute-force wordlist used when a submission brings none.
    pub default_wordlist: Option<PathBuf>,
    /// Wall-clock limit of one brute-force trial.
    pub trial_timeout: Duration,
    /// Finished jobs older than this are evicted. `None` keeps them forever.
    pub job_retention: Option<Duration>,
    /// Request body limit.
    pub max_upload_bytes: usize,
    pub stream: StreamConfig,
}

impl WorkerConfig {
    /// Build configuration from `STEGO_*`, `WORKER_TOKEN`, `ENCODE_EXE` and
    /// `DECODE_EXE`. Absent or unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let bin_dir = binary_dir();

        let (token, token_generated) = match var("WORKER_TOKEN") {
            Some(token) => (token, false),
            None => (Uuid::new_v4().simple().to_string(), true),
        };

        let encode_exe = var("ENCODE_EXE")
            .map(PathBuf::from)
            .unwrap_or_else(|| bin_dir.join(format!("encode{}", std::env::consts::EXE_SUFFIX)));
        let decode_exe = var("DECODE_EXE")
            .map(PathBuf::from)
            .unwrap_or_else(|| bin_dir.join(format!("decode{}", std::env::consts::EXE_SUFFIX)));

        let support_dir = match var("STEGO_SUPPORT_DIR") {
            Some(dir) => Some(PathBuf::from(dir)),
            None => Some(bin_dir.join("tables")).filter(|p| p.is_dir()),
        };

        let work_root = var("STEGO_WORK_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("stego-worker"));

        let trial_secs: u64 = parse_or(
            "STEGO_TRIAL_TIMEOUT_SECS",
            var("STEGO_TRIAL_TIMEOUT_SECS"),
            DEFAULT_TRIAL_TIMEOUT.as_secs(),
        );
        let retention_secs: u64 = parse_or(
            "STEGO_JOB_RETENTION_SECS",
            var("STEGO_JOB_RETENTION_SECS"),
            0,
        );
        let max_upload_mb: usize = parse_or(
            "STEGO_MAX_UPLOAD_MB",
            var("STEGO_MAX_UPLOAD_MB"),
            DEFAULT_MAX_UPLOAD_MB,
        );

        Self {
            port: parse_or("STEGO_PORT", var("STEGO_PORT"), DEFAULT_PORT),
            token: SecretString::from(token),
            token_generated,
            encode_exe,
            decode_exe,
            support_dir,
            work_root,
            default_wordlist: var("STEGO_DEFAULT_WORDLIST").map(PathBuf::from),
            trial_timeout: Duration::from_secs(trial_secs.max(1)),
            job_retention: (retention_secs > 0).then(|| Duration::from_secs(retention_secs)),
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
            stream: StreamConfig::default(),
        }
    }

    /// Check paths that must exist before the worker can accept jobs.
    ///
    /// Missing tool binaries are only warned about; jobs will fail
    /// individually with a spawn error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = &self.support_dir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidValue {
                    key: "STEGO_SUPPORT_DIR".into(),
                    message: format!("{} is not a directory", dir.display()),
                });
            }
        }
        if let Some(list) = &self.default_wordlist {
            if !list.is_file() {
                return Err(ConfigError::InvalidValue {
                    key: "STEGO_DEFAULT_WORDLIST".into(),
                    message: format!("{} is not a file", list.display()),
                });
            }
        }
        for exe in [&self.encode_exe, &self.decode_exe] {
            if !exe.is_file() {
                warn!(path = %exe.display(), "Tool binary not found");
            }
        }
        Ok(())
    }
}

/// Directory of the running executable, or `.` if it cannot be determined.
fn binary_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparseable configuration value");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);
        assert_eq!(config.port, 5050);
        assert!(config.token_generated);
        assert_eq!(config.token.expose_secret().len(), 32);
        assert_eq!(config.trial_timeout, Duration::from_secs(120));
        assert!(config.job_retention.is_none());
        assert!(config.default_wordlist.is_none());
        assert_eq!(config.max_upload_bytes, 512 * 1024 * 1024);
        assert!(config.work_root.ends_with("stego-worker"));
        assert_eq!(config.stream.poll_interval, Duration::from_millis(500));
        assert_eq!(config.stream.close_grace, Duration::from_secs(10));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = config(&[
            ("STEGO_PORT", "8088"),
            ("WORKER_TOKEN", " s3cret "),
            ("ENCODE_EXE", "/opt/stego/Encode"),
            ("DECODE_EXE", "/opt/stego/Decode"),
            ("STEGO_WORK_ROOT", "/srv/jobs"),
            ("STEGO_TRIAL_TIMEOUT_SECS", "30"),
            ("STEGO_JOB_RETENTION_SECS", "3600"),
            ("STEGO_MAX_UPLOAD_MB", "8"),
        ]);
        assert_eq!(config.port, 8088);
        assert_eq!(config.token.expose_secret(), "s3cret");
        assert!(!config.token_generated);
        assert_eq!(config.encode_exe, PathBuf::from("/opt/stego/Encode"));
        assert_eq!(config.decode_exe, PathBuf::from("/opt/stego/Decode"));
        assert_eq!(config.work_root, PathBuf::from("/srv/jobs"));
        assert_eq!(config.trial_timeout, Duration::from_secs(30));
        assert_eq!(config.job_retention, Some(Duration::from_secs(3600)));
        assert_eq!(config.max_upload_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = config(&[
            ("STEGO_PORT", "eighty"),
            ("STEGO_TRIAL_TIMEOUT_SECS", "-5"),
            ("STEGO_JOB_RETENTION_SECS", "0"),
            ("WORKER_TOKEN", "   "),
        ]);
        assert_eq!(config.port, 5050);
        assert_eq!(config.trial_timeout, Duration::from_secs(120));
        assert!(config.job_retention.is_none());
        assert!(config.token_generated);
    }

    #[test]
    fn validate_rejects_missing_support_dir() {
        let config = config(&[("STEGO_SUPPORT_DIR", "/nonexistent/tables")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "STEGO_SUPPORT_DIR"
        ));
    }

    #[test]
    fn validate_accepts_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("rockyou.txt");
        std::fs::write(&list, "123456\n").unwrap();
        let config = config(&[
            ("STEGO_SUPPORT_DIR", dir.path().to_str().unwrap()),
            ("STEGO_DEFAULT_WORDLIST", list.to_str().unwrap()),
        ]);
        assert!(config.validate().is_ok());
    }
}
