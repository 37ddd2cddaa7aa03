//! Per-job working directories.
//!
//! Every accepted job gets `<root>/<job_id>/` holding:
//! - the uploaded cover artifact (and wordlist, if any)
//! - a copy of the tool's support directory (e.g. `tables/`)
//! - everything the tool produces while the job runs

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// An uploaded file, held in memory until staged.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Files of one job after staging.
#[derive(Debug, Clone)]
pub struct StagedJob {
    pub dir: PathBuf,
    pub artifact: PathBuf,
    pub wordlist: Option<PathBuf>,
}

/// Root of all job working directories.
#[derive(Debug, Clone)]
pub struct Workspace {
    base_path: PathBuf,
    support_dir: Option<PathBuf>,
}

impl Workspace {
    /// Create a new workspace rooted at `base_path`.
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            support_dir: None,
        }
    }

    /// Copy `dir` into every job directory before the tool runs.
    pub fn with_support_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.support_dir = dir;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Working directory of a job.
    pub fn job_dir(&self, id: Uuid) -> PathBuf {
        self.base_path.join(id.simple().to_string())
    }

    /// Ensure the workspace root exists.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.base_path).await
    }

    /// Write a job's uploads into its directory and copy in support files.
    ///
    /// On failure the partially staged directory is removed.
    pub async fn stage(
        &self,
        id: Uuid,
        artifact: &Upload,
        wordlist: Option<&Upload>,
    ) -> std::io::Result<StagedJob> {
        let dir = self.job_dir(id);
        match self.stage_into(&dir, artifact, wordlist).await {
            Ok(staged) => Ok(staged),
            Err(e) => {
                self.remove_job_dir(id).await;
                Err(e)
            }
        }
    }

    async fn stage_into(
        &self,
        dir: &Path,
        artifact: &Upload,
        wordlist: Option<&Upload>,
    ) -> std::io::Result<StagedJob> {
        fs::create_dir_all(dir).await?;

        let artifact_name = sanitize_file_name(&artifact.file_name, "cover.mp3");
        let artifact_path = dir.join(&artifact_name);
        fs::write(&artifact_path, &artifact.bytes).await?;

        let wordlist_path = match wordlist {
            Some(upload) => {
                let mut name = sanitize_file_name(&upload.file_name, "wordlist.txt");
                if name == artifact_name {
                    name = format!("wordlist_{name}");
                }
                let path = dir.join(name);
                fs::write(&path, &upload.bytes).await?;
                Some(path)
            }
            None => None,
        };

        if let Some(support) = &self.support_dir {
            self.copy_support(support, dir).await?;
        }

        Ok(StagedJob {
            dir: dir.to_path_buf(),
            artifact: artifact_path,
            wordlist: wordlist_path,
        })
    }

    async fn copy_support(&self, support: &Path, job_dir: &Path) -> std::io::Result<()> {
        if !fs::try_exists(support).await.unwrap_or(false) {
            debug!(path = %support.display(), "Support directory missing, skipping copy");
            return Ok(());
        }
        let Some(name) = support.file_name() else {
            return Ok(());
        };
        copy_dir(support, &job_dir.join(name)).await
    }

    /// Remove a job's directory, ignoring absence.
    pub async fn remove_job_dir(&self, id: Uuid) {
        let dir = self.job_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(path = %dir.display(), "Removed job directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove job directory"),
        }
    }
}

/// Reduce an uploaded name to a bare file name. Falls back to `fallback`
/// when nothing usable remains.
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace('"', "");
    if base.is_empty() || base == "." || base == ".." {
        fallback.to_string()
    } else {
        base
    }
}

/// Recursively copy `src` into `dst`.
async fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("song.mp3", "x"), "song.mp3");
        assert_eq!(sanitize_file_name("../../etc/passwd", "x"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\song.mp3", "x"), "song.mp3");
        assert_eq!(sanitize_file_name("dir/", "cover.mp3"), "cover.mp3");
        assert_eq!(sanitize_file_name("..", "cover.mp3"), "cover.mp3");
        assert_eq!(sanitize_file_name("", "cover.mp3"), "cover.mp3");
    }

    #[tokio::test]
    async fn stage_writes_uploads_and_support_files() {
        let root = tempfile::tempdir().unwrap();
        let support = root.path().join("tables");
        std::fs::create_dir_all(support.join("nested")).unwrap();
        std::fs::write(support.join("huffdec"), b"table").unwrap();
        std::fs::write(support.join("nested").join("alloc_0"), b"alloc").unwrap();

        let workspace =
            Workspace::new(root.path().join("jobs")).with_support_dir(Some(support.clone()));
        let id = Uuid::new_v4();
        let staged = workspace
            .stage(
                id,
                &Upload::new("song.mp3", b"ID3".to_vec()),
                Some(&Upload::new("song.mp3", b"pw1\npw2\n".to_vec())),
            )
            .await
            .unwrap();

        assert_eq!(staged.dir, workspace.job_dir(id));
        assert_eq!(std::fs::read(&staged.artifact).unwrap(), b"ID3");
        let wordlist = staged.wordlist.unwrap();
        assert_eq!(wordlist.file_name().unwrap(), "wordlist_song.mp3");
        assert_eq!(std::fs::read(wordlist).unwrap(), b"pw1\npw2\n");
        assert!(staged.dir.join("tables").join("huffdec").exists());
        assert!(staged.dir.join("tables").join("nested").join("alloc_0").exists());

        workspace.remove_job_dir(id).await;
        assert!(!staged.dir.exists());
    }

    #[tokio::test]
    async fn missing_support_dir_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(root.path().to_path_buf())
            .with_support_dir(Some(root.path().join("absent")));
        let staged = workspace
            .stage(Uuid::new_v4(), &Upload::new("a.mp3", b"x".to_vec()), None)
            .await
            .unwrap();
        assert!(staged.wordlist.is_none());
    }
}
