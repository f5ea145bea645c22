use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Progress callback invoked as `(completed, total)` at the reader's cadence.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Supplies `{relative path → content}` for a selection under a project root.
///
/// Contract: paths resolve relative to `root`; escapes outside the sandbox
/// are rejected; missing or inaccessible files are omitted from the result
/// rather than failing the batch.
#[async_trait]
pub trait FileContentReader: Send + Sync {
    async fn read_contents(
        &self,
        root: &Path,
        paths: &[String],
        progress: Option<ProgressFn>,
    ) -> Result<HashMap<String, String>>;
}

/// Default filesystem reader with bounded concurrency.
pub struct FsContentReader {
    max_concurrency: usize,
}

impl Default for FsContentReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FsContentReader {
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            max_concurrency: cpus.clamp(2, 16),
        }
    }

    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }
}

/// A relative path is inside the sandbox when it is not absolute and never
/// steps through `..`.
fn is_sandboxed(rel: &str) -> bool {
    let path = Path::new(rel);
    if path.is_absolute() {
        return false;
    }
    path.components()
        .all(|c| !matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

async fn read_lossy(abs: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(abs).await?;
    Ok(String::from_utf8(bytes)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).to_string()))
}

#[async_trait]
impl FileContentReader for FsContentReader {
    async fn read_contents(
        &self,
        root: &Path,
        paths: &[String],
        progress: Option<ProgressFn>,
    ) -> Result<HashMap<String, String>> {
        let total = paths.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<Option<(String, String)>> = JoinSet::new();

        for rel in paths {
            if !is_sandboxed(rel) {
                warn!(path = %rel, "rejecting path outside the project sandbox");
                continue;
            }
            let rel = rel.clone();
            let abs: PathBuf = root.join(&rel);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match read_lossy(&abs).await {
                    Ok(content) => Some((rel, content)),
                    Err(err) => {
                        warn!(path = %rel, %err, "skipping unreadable file");
                        None
                    }
                }
            });
        }

        let mut contents = HashMap::with_capacity(total);
        let mut completed = 0usize;
        while let Some(joined) = join_set.join_next().await {
            completed += 1;
            if let Ok(Some((rel, content))) = joined {
                contents.insert(rel, content);
            }
            if let Some(cb) = progress.as_ref() {
                cb(completed, total);
            }
        }
        Ok(contents)
    }
}

/// Fixed-map reader for tests and replays: serves exactly the entries it was
/// constructed with, regardless of the filesystem.
#[derive(Debug, Default)]
pub struct StaticContentReader {
    entries: HashMap<String, String>,
}

impl StaticContentReader {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl FileContentReader for StaticContentReader {
    async fn read_contents(
        &self,
        _root: &Path,
        paths: &[String],
        progress: Option<ProgressFn>,
    ) -> Result<HashMap<String, String>> {
        let total = paths.len();
        let mut contents = HashMap::new();
        for (i, rel) in paths.iter().enumerate() {
            if let Some(content) = self.entries.get(rel) {
                contents.insert(rel.clone(), content.clone());
            }
            if let Some(cb) = progress.as_ref() {
                cb(i + 1, total);
            }
        }
        Ok(contents)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
