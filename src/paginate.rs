use crate::error::{ContextError, Result};
use crate::options::{DEFAULT_READ_LINE_COUNT, READ_LINE_CAP};
use serde::Serialize;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One paginated slice of an artifact. Line numbers are 1-based inclusive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub chunk_id: String,
    pub lines: Vec<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRange {
    pub lines: Vec<String>,
    pub start_line: usize,
    pub end_line: usize,
}

fn open_error(context_id: &str, artifact: &Path, err: std::io::Error) -> ContextError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ContextError::not_found(context_id)
    } else {
        ContextError::io(artifact, err)
    }
}

/// Scan the artifact to `start_line` and collect up to `line_count` lines.
/// A zero count defaults to 1,000; counts above the cap are clamped, and a
/// start before the first line is normalized to 1. Ranges past end-of-file
/// return empty lines with `has_more = false`.
pub(crate) async fn read_chunk(
    artifact: &Path,
    context_id: &str,
    start_line: usize,
    line_count: usize,
) -> Result<Chunk> {
    let start = start_line.max(1);
    let count = if line_count == 0 {
        DEFAULT_READ_LINE_COUNT
    } else {
        line_count.min(READ_LINE_CAP)
    };

    let file = tokio::fs::File::open(artifact)
        .await
        .map_err(|e| open_error(context_id, artifact, e))?;
    let reader = BufReader::with_capacity(64 * 1024, file);
    let mut line_iter = reader.lines();

    let mut lines: Vec<String> = Vec::new();
    let mut has_more = false;
    let mut line_no = 0usize;
    while let Some(line) = line_iter
        .next_line()
        .await
        .map_err(|e| ContextError::io(artifact, e))?
    {
        line_no += 1;
        if line_no < start {
            continue;
        }
        lines.push(line);
        if lines.len() == count {
            has_more = line_iter
                .next_line()
                .await
                .map_err(|e| ContextError::io(artifact, e))?
                .is_some();
            break;
        }
    }

    let end_line = if lines.is_empty() {
        start - 1
    } else {
        start + lines.len() - 1
    };
    Ok(Chunk {
        chunk_id: format!("{context_id}:{start}"),
        lines,
        start_line: start,
        end_line,
        has_more,
    })
}

/// Whole-artifact read for callers that already validated the artifact is
/// small. The engine never uses this internally.
pub(crate) async fn read_whole(artifact: &Path, context_id: &str) -> Result<String> {
    tokio::fs::read_to_string(artifact)
        .await
        .map_err(|e| open_error(context_id, artifact, e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn artifact_with_lines(n: usize) -> (TempDir, std::path::PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stream_x.ctx");
        let body: String = (1..=n).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[tokio::test]
    async fn window_in_the_middle() {
        let (_tmp, path) = artifact_with_lines(30).await;
        let chunk = read_chunk(&path, "stream_x", 11, 5).await.unwrap();
        assert_eq!(chunk.lines.len(), 5);
        assert_eq!(chunk.lines[0], "line 11");
        assert_eq!(chunk.start_line, 11);
        assert_eq!(chunk.end_line, 15);
        assert!(chunk.has_more);
        assert_eq!(chunk.chunk_id, "stream_x:11");
    }

    #[tokio::test]
    async fn window_reaching_eof_has_no_more() {
        let (_tmp, path) = artifact_with_lines(10).await;
        let chunk = read_chunk(&path, "stream_x", 6, 5).await.unwrap();
        assert_eq!(chunk.lines.len(), 5);
        assert_eq!(chunk.end_line, 10);
        assert!(!chunk.has_more);
    }

    #[tokio::test]
    async fn past_eof_is_empty_success() {
        let (_tmp, path) = artifact_with_lines(17).await;
        let chunk = read_chunk(&path, "stream_x", 20, 10).await.unwrap();
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.start_line, 20);
        assert_eq!(chunk.end_line, 19);
        assert!(!chunk.has_more);
    }

    #[tokio::test]
    async fn zero_count_defaults_and_zero_start_normalizes() {
        let (_tmp, path) = artifact_with_lines(1_500).await;
        let chunk = read_chunk(&path, "stream_x", 0, 0).await.unwrap();
        assert_eq!(chunk.start_line, 1);
        assert_eq!(chunk.lines.len(), 1_000);
        assert!(chunk.has_more);
    }

    #[tokio::test]
    async fn oversized_count_is_clamped_not_rejected() {
        let (_tmp, path) = artifact_with_lines(20).await;
        let chunk = read_chunk(&path, "stream_x", 1, 50_000).await.unwrap();
        assert_eq!(chunk.lines.len(), 20);
        assert!(!chunk.has_more);
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = read_chunk(&tmp.path().join("stream_gone.ctx"), "stream_gone", 1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::NotFound(_)));
    }
}
