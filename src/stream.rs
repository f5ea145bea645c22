use crate::error::{ContextError, Result};
use crate::estimate::TokenCounter;
use crate::format;
use crate::options::BuildOptions;
use crate::transform;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};
use uuid::Uuid;

/// In-memory handle for an assembled artifact. Immutable once built; the
/// artifact path stays private so callers cannot race the filesystem against
/// cleanup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Files actually written, in emission order. A requested path the
    /// reader could not supply is absent here but preserved in the summary.
    pub files: Vec<String>,
    pub project_path: PathBuf,
    pub total_lines: u64,
    pub total_chars: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub token_count: u64,
    #[serde(skip)]
    artifact_path: PathBuf,
}

impl Stream {
    pub(crate) fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }
}

/// Removes the artifact file unless disarmed. Covers error returns and
/// cancellation drops with one mechanism.
struct ArtifactGuard {
    path: PathBuf,
    armed: bool,
}

impl ArtifactGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn project_basename(root: &Path) -> &str {
    root.file_name().and_then(|n| n.to_str()).unwrap_or("project")
}

async fn write_piece(
    writer: &mut BufWriter<tokio::fs::File>,
    artifact: &Path,
    text: &str,
    total_lines: &mut u64,
    total_chars: &mut u64,
) -> Result<()> {
    writer
        .write_all(text.as_bytes())
        .await
        .map_err(|e| ContextError::io(artifact, e))?;
    *total_lines += text.matches('\n').count() as u64;
    *total_chars += text.len() as u64;
    Ok(())
}

/// Assemble the artifact for one build: iterate the requested paths in their
/// original order, transform, frame, and stream each through the buffered
/// writer while the token accumulator is checked per file. Any non-success
/// exit removes the partial artifact.
pub(crate) async fn assemble_stream(
    project_root: &Path,
    ordered_paths: &[String],
    contents: &HashMap<String, String>,
    options: &BuildOptions,
    context_dir: &Path,
    counter: &dyn TokenCounter,
) -> Result<Stream> {
    tokio::fs::create_dir_all(context_dir)
        .await
        .map_err(|e| ContextError::io(context_dir, e))?;

    let id = format!("stream_{}", Uuid::new_v4());
    let artifact_path = context_dir.join(format!("{id}.ctx"));

    let mut guard = ArtifactGuard::new(artifact_path.clone());
    let file = tokio::fs::File::create(&artifact_path)
        .await
        .map_err(|e| ContextError::io(&artifact_path, e))?;
    let mut writer = BufWriter::new(file);

    let mut total_lines: u64 = 0;
    let mut total_chars: u64 = 0;
    let mut total_tokens: u64 = 0;
    let mut included: Vec<String> = Vec::new();

    if options.include_manifest {
        let manifest = format!(
            "# Streaming Context\nProject Path: {}\nGenerated: {}\n\n",
            project_root.display(),
            Utc::now().to_rfc3339()
        );
        write_piece(&mut writer, &artifact_path, &manifest, &mut total_lines, &mut total_chars)
            .await?;
    }

    let flush_threshold = options.flush_threshold_bytes();

    for rel in ordered_paths {
        let Some(raw) = contents.get(rel) else {
            warn!(path = %rel, "selected file was not supplied by the reader, skipping");
            continue;
        };

        let mut body = transform::transform_content(rel, raw, options);
        if options.include_line_numbers {
            body = transform::number_lines(&body);
        }

        total_tokens += counter.count_tokens(&body) as u64;
        if options.max_tokens > 0 && total_tokens > options.max_tokens {
            return Err(ContextError::LimitExceeded(format!(
                "context would exceed token limit: {total_tokens} > {}",
                options.max_tokens
            )));
        }

        let header = format::file_header(options.output_format, rel);
        let escaped = format::escape_body(options.output_format, &body);
        let footer = format::file_footer(options.output_format);

        write_piece(&mut writer, &artifact_path, &header, &mut total_lines, &mut total_chars)
            .await?;
        write_piece(&mut writer, &artifact_path, &escaped, &mut total_lines, &mut total_chars)
            .await?;
        write_piece(&mut writer, &artifact_path, footer, &mut total_lines, &mut total_chars)
            .await?;

        included.push(rel.clone());

        // Only the live buffer is bounded; the artifact itself may keep
        // growing past this point.
        if total_chars > flush_threshold {
            writer
                .flush()
                .await
                .map_err(|e| ContextError::io(&artifact_path, e))?;
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| ContextError::io(&artifact_path, e))?;
    drop(writer);
    guard.disarm();

    let now = Utc::now();
    let stream = Stream {
        name: format!("{} ({} files)", project_basename(project_root), included.len()),
        description: format!(
            "Streamed context of {} files under {}",
            included.len(),
            project_root.display()
        ),
        files: included,
        project_path: project_root.to_path_buf(),
        total_lines,
        total_chars,
        created_at: now,
        updated_at: now,
        token_count: total_tokens,
        artifact_path,
        id,
    };
    debug!(
        id = %stream.id,
        lines = stream.total_lines,
        chars = stream.total_chars,
        tokens = stream.token_count,
        "artifact assembled"
    );
    Ok(stream)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::CharRatioCounter;
    use crate::options::OutputFormat;
    use tempfile::TempDir;

    fn contents_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn counters_match_artifact_exactly() {
        let tmp = TempDir::new().unwrap();
        let counter = CharRatioCounter::default();
        let opts = BuildOptions {
            output_format: OutputFormat::Markdown,
            ..Default::default()
        };

        let stream = assemble_stream(
            Path::new("/p"),
            &["a.go".to_string()],
            &contents_of(&[("a.go", "package a\n")]),
            &opts,
            tmp.path(),
            &counter,
        )
        .await
        .unwrap();

        let artifact = std::fs::read_to_string(stream.artifact_path()).unwrap();
        assert_eq!(artifact.len() as u64, stream.total_chars);
        assert_eq!(
            artifact.matches('\n').count() as u64,
            stream.total_lines
        );
        assert!(stream.id.starts_with("stream_"));
    }

    #[tokio::test]
    async fn token_limit_abort_removes_artifact() {
        let tmp = TempDir::new().unwrap();
        let counter = CharRatioCounter::default();
        let opts = BuildOptions {
            max_tokens: 3,
            ..Default::default()
        };

        let err = assemble_stream(
            Path::new("/p"),
            &["big.txt".to_string()],
            &contents_of(&[("big.txt", "0123456789abcdef0123456789abcdef\n")]),
            &opts,
            tmp.path(),
            &counter,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("would exceed token limit"));
        let leftover: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "ctx"))
            .collect();
        assert!(leftover.is_empty(), "partial artifact must be removed");
    }

    #[tokio::test]
    async fn missing_files_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let counter = CharRatioCounter::default();
        let opts = BuildOptions::default();

        let stream = assemble_stream(
            Path::new("/p"),
            &["a.go".to_string(), "gone.go".to_string()],
            &contents_of(&[("a.go", "package a\n")]),
            &opts,
            tmp.path(),
            &counter,
        )
        .await
        .unwrap();
        assert_eq!(stream.files, vec!["a.go".to_string()]);
    }

    #[tokio::test]
    async fn manifest_header_counts_into_totals() {
        let tmp = TempDir::new().unwrap();
        let counter = CharRatioCounter::default();
        let opts = BuildOptions {
            include_manifest: true,
            ..Default::default()
        };

        let stream = assemble_stream(
            Path::new("/some/project"),
            &[],
            &HashMap::new(),
            &opts,
            tmp.path(),
            &counter,
        )
        .await
        .unwrap();

        let artifact = std::fs::read_to_string(stream.artifact_path()).unwrap();
        assert!(artifact.starts_with("# Streaming Context\nProject Path: /some/project\nGenerated: "));
        assert_eq!(artifact.len() as u64, stream.total_chars);
        assert_eq!(stream.total_lines, 4);
    }
}
