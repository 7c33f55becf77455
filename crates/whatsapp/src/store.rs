//! Persisted session artifact ownership.
//!
//! The provider writes whatever it needs under the artifact directory; the
//! core only ever deletes it. Deletion has to tolerate the provider (or the
//! OS) still holding handles for a moment after the session is torn down.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    async_trait::async_trait,
    relay_config::SessionConfig,
    tracing::{debug, error, info, warn},
};

pub const DEFAULT_DELETE_ATTEMPTS: u32 = 5;
pub const DEFAULT_DELETE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How a path is checked and removed on the current platform.
#[async_trait]
pub trait RemovalStrategy: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// Remove `path` recursively. `forceful` is set on every attempt after
    /// the first failure.
    async fn remove(&self, path: &Path, forceful: bool) -> io::Result<()>;
}

/// Filesystem removal through tokio, with a forceful fallback that clears
/// permission bits (unix) or shells out to `rmdir /s /q` (windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformRemover;

#[async_trait]
impl RemovalStrategy for PlatformRemover {
    async fn exists(&self, path: &Path) -> bool {
        // An unreadable parent counts as present so the delete is attempted.
        tokio::fs::try_exists(path).await.unwrap_or(true)
    }

    async fn remove(&self, path: &Path, forceful: bool) -> io::Result<()> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if forceful {
            return force_remove(path.to_path_buf(), meta.is_dir()).await;
        }
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    }
}

#[cfg(not(windows))]
async fn force_remove(path: PathBuf, is_dir: bool) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        make_writable(&path)?;
        if is_dir {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        }
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(unix)]
fn make_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    let mode = meta.permissions().mode() | 0o700;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    if meta.is_dir() {
        for entry in std::fs::read_dir(path)? {
            make_writable(&entry?.path())?;
        }
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn make_writable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(windows)]
async fn force_remove(path: PathBuf, is_dir: bool) -> io::Result<()> {
    let mut cmd = tokio::process::Command::new("cmd");
    if is_dir {
        cmd.args(["/C", "rmdir", "/S", "/Q"]);
    } else {
        cmd.args(["/C", "del", "/F", "/Q"]);
    }
    let status = cmd.arg(&path).status().await?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(true) {
        return Ok(());
    }
    Err(io::Error::other(format!(
        "forced removal of {} exited with {status}",
        path.display()
    )))
}

/// Owner of the on-disk session artifact.
#[derive(Clone)]
pub struct SessionStateStore {
    data_dir: PathBuf,
    cache_dir: Option<PathBuf>,
    attempts: u32,
    retry_delay: Duration,
    strategy: Arc<dyn RemovalStrategy>,
}

impl std::fmt::Debug for SessionStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateStore")
            .field("data_dir", &self.data_dir)
            .field("cache_dir", &self.cache_dir)
            .field("attempts", &self.attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl SessionStateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_dir: None,
            attempts: DEFAULT_DELETE_ATTEMPTS,
            retry_delay: DEFAULT_DELETE_RETRY_DELAY,
            strategy: Arc::new(PlatformRemover),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.data_dir())
            .with_cache_dir(config.cache_dir())
            .with_retry(config.delete_attempts, config.delete_retry_delay())
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// At least one attempt is always made.
    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn RemovalStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Whether a previous pairing is present on disk.
    pub async fn has_artifact(&self) -> bool {
        self.strategy.exists(&self.data_dir).await
    }

    pub async fn delete_artifact(&self) -> bool {
        self.safe_delete(&self.data_dir).await
    }

    /// Remove the artifact and the provider cache. Both are attempted even
    /// if the first one fails.
    pub async fn cleanup(&self) -> bool {
        let artifact = self.safe_delete(&self.data_dir).await;
        let cache = match &self.cache_dir {
            Some(dir) => self.safe_delete(dir).await,
            None => true,
        };
        artifact && cache
    }

    /// Recursively delete `path`, retrying while the filesystem refuses.
    ///
    /// A missing path is a success. Returns false once every attempt has
    /// failed; the error is logged, never propagated.
    pub async fn safe_delete(&self, path: &Path) -> bool {
        for attempt in 1..=self.attempts {
            if !self.strategy.exists(path).await {
                debug!(path = %path.display(), "nothing to delete");
                return true;
            }

            let forceful = attempt > 1;
            match self.strategy.remove(path, forceful).await {
                Ok(()) => {
                    info!(path = %path.display(), attempt, "deleted session data");
                    return true;
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        max_attempts = self.attempts,
                        forceful,
                        error = %e,
                        "failed to delete session data"
                    );
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                },
            }
        }

        error!(
            path = %path.display(),
            attempts = self.attempts,
            "giving up deleting session data"
        );
        false
    }
}
