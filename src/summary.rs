use crate::error::{ContextError, Result};
use crate::stream::Stream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const STATUS_READY: &str = "ready";

/// Disk-persisted metadata sibling of a stream. Outlives the process; the
/// pagination reader can still serve its artifact after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub project_path: PathBuf,
    pub file_count: usize,
    pub total_lines: u64,
    pub total_chars: u64,
    pub token_count: u64,
    /// The paths the caller *requested*, preserved verbatim even when some
    /// were dropped during assembly.
    pub selected_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextSummary {
    /// Derive the persisted summary from a built stream plus the original
    /// request.
    pub fn for_stream(stream: &Stream, selected_files: Vec<String>) -> Self {
        Self {
            id: stream.id.clone(),
            name: stream.name.clone(),
            description: stream.description.clone(),
            status: STATUS_READY.to_string(),
            project_path: stream.project_path.clone(),
            file_count: stream.files.len(),
            total_lines: stream.total_lines,
            total_chars: stream.total_chars,
            token_count: stream.token_count,
            selected_files,
            created_at: stream.created_at,
            updated_at: stream.updated_at,
        }
    }
}

/// Reads and writes `<id>.summary.json` files beside the artifacts.
pub struct SummaryStore {
    dir: PathBuf,
}

impl SummaryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn summary_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.summary.json"))
    }

    pub async fn write(&self, summary: &ContextSummary) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ContextError::io(&self.dir, e))?;
        let path = self.summary_path(&summary.id);
        let body = serde_json::to_vec_pretty(summary)
            .map_err(|e| ContextError::Internal(format!("summary serialization: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ContextError::io(&path, e))
    }

    pub async fn read(&self, id: &str) -> Result<ContextSummary> {
        let path = self.summary_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContextError::not_found(id));
            }
            Err(e) => return Err(ContextError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| ContextError::Internal(format!("corrupt summary {}: {e}", path.display())))
    }

    /// Scan the context directory for summaries belonging to one project.
    /// Unreadable entries are logged and skipped, never fatal for the
    /// listing.
    pub async fn list_for_project(&self, project_root: &Path) -> Result<Vec<ContextSummary>> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ContextError::io(&self.dir, e)),
        };

        let mut summaries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await.map_err(|e| {
            warn!(%e, "error while scanning context directory");
            e
        }) {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".summary.json") {
                continue;
            }
            let path = entry.path();
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), %e, "skipping unreadable summary");
                    continue;
                }
            };
            match serde_json::from_slice::<ContextSummary>(&bytes) {
                Ok(summary) if summary.project_path == project_root => summaries.push(summary),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), %e, "skipping unparseable summary"),
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}
