//! Manifest retrieval from a capsule's Git repository.
//!
//! Each deploy fetches a fresh shallow checkout of the declared branch into a
//! per-capsule working directory (replacing any prior checkout) and reads the
//! first compose file found at the repository root. The working directory is
//! only touched while the capsule's dispatch lock is held.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use voidnet_state::CapsuleId;

/// Compose file names looked up at the checkout root, in order.
pub const DEFAULT_MANIFEST_CANDIDATES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Manifest retrieval failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid branch name '{0}'")]
    InvalidBranch(String),

    #[error("cannot run {binary}: {message}")]
    Spawn { binary: String, message: String },

    #[error("git clone failed: {0}")]
    Clone(String),

    #[error("git clone did not finish within {0:?}")]
    Timeout(Duration),

    #[error("no compose manifest in checkout (looked for {0})")]
    ManifestMissing(String),

    #[error("manifest {name} is {bytes} bytes, limit is {limit} bytes")]
    TooLarge {
        name: String,
        bytes: u64,
        limit: usize,
    },

    #[error("manifest {0} is a symbolic link")]
    Symlink(String),

    #[error("checkout I/O error: {0}")]
    Io(String),
}

/// Boxed future alias for manifest retrieval.
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<String, FetchError>> + Send + 'a>>;

/// Retrieves the authoritative manifest for a capsule.
pub trait ManifestSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
        capsule_id: CapsuleId,
        git_url: &'a str,
        branch: &'a str,
    ) -> FetchFuture<'a>;
}

/// Settings for [`GitManifestSource`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Parent directory of per-capsule checkouts.
    pub checkout_root: PathBuf,
    /// `git` executable.
    pub git_binary: String,
    pub clone_timeout: Duration,
    pub manifest_candidates: Vec<String>,
    pub max_manifest_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            checkout_root: std::env::temp_dir().join("voidnet-checkouts"),
            git_binary: "git".to_string(),
            clone_timeout: Duration::from_secs(300),
            manifest_candidates: DEFAULT_MANIFEST_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_manifest_bytes: voidnet_state::DEFAULT_MAX_MANIFEST_BYTES,
        }
    }
}

/// Shallow-clones with the `git` CLI.
#[derive(Debug, Clone, Default)]
pub struct GitManifestSource {
    settings: FetchSettings,
}

impl GitManifestSource {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Working directory for one capsule.
    pub fn checkout_dir(&self, capsule_id: CapsuleId) -> PathBuf {
        self.settings
            .checkout_root
            .join(format!("capsule-{capsule_id}"))
    }

    async fn clone_and_read(
        &self,
        capsule_id: CapsuleId,
        git_url: &str,
        branch: &str,
    ) -> Result<String, FetchError> {
        if branch.is_empty() || branch.starts_with('-') {
            return Err(FetchError::InvalidBranch(branch.to_string()));
        }

        let dir = self.checkout_dir(capsule_id);
        tokio::fs::create_dir_all(&self.settings.checkout_root)
            .await
            .map_err(|e| FetchError::Io(e.to_string()))?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(capsule_id, ?dir, "previous checkout removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FetchError::Io(e.to_string())),
        }

        let mut cmd = tokio::process::Command::new(&self.settings.git_binary);
        cmd.args(["clone", "--depth", "1", "--single-branch", "--branch", branch, "--"])
            .arg(git_url)
            .arg(&dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(capsule_id, %git_url, %branch, "cloning capsule repository");
        let output = match tokio::time::timeout(self.settings.clone_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(FetchError::Spawn {
                    binary: self.settings.git_binary.clone(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!(capsule_id, %git_url, "git clone timed out");
                return Err(FetchError::Timeout(self.settings.clone_timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FetchError::Clone(if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            }));
        }

        read_manifest(
            &dir,
            &self.settings.manifest_candidates,
            self.settings.max_manifest_bytes,
        )
        .await
    }
}

impl ManifestSource for GitManifestSource {
    fn fetch<'a>(
        &'a self,
        capsule_id: CapsuleId,
        git_url: &'a str,
        branch: &'a str,
    ) -> FetchFuture<'a> {
        Box::pin(self.clone_and_read(capsule_id, git_url, branch))
    }
}

/// Read the first candidate manifest present in `dir`.
///
/// A candidate that is a symbolic link is refused, since it may resolve
/// outside the checkout.
pub async fn read_manifest(
    dir: &Path,
    candidates: &[String],
    max_bytes: usize,
) -> Result<String, FetchError> {
    for name in candidates {
        let path = dir.join(name);
        let meta = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                warn!(?path, "manifest candidate is a symlink");
                return Err(FetchError::Symlink(name.clone()));
            }
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        if meta.len() > max_bytes as u64 {
            return Err(FetchError::TooLarge {
                name: name.clone(),
                bytes: meta.len(),
                limit: max_bytes,
            });
        }
        return tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FetchError::Io(e.to_string()));
    }
    Err(FetchError::ManifestMissing(candidates.join(", ")))
}
