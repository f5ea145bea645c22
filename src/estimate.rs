use crate::error::{ContextError, Result};
use crate::options::OVERSIZE_FILE_BYTES;
use std::path::Path;

/// Advisory token estimator consulted as a budget gauge, never a tokenizer.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Default approximation: one token per four characters, rounded up.
#[derive(Debug, Clone)]
pub struct CharRatioCounter {
    pub chars_per_token: usize,
}

impl Default for CharRatioCounter {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl TokenCounter for CharRatioCounter {
    fn count_tokens(&self, text: &str) -> usize {
        if self.chars_per_token == 0 {
            return text.len();
        }
        text.len().div_ceil(self.chars_per_token)
    }
}

/// Result of the pre-assembly size scan over the selected paths.
#[derive(Debug, Default)]
pub struct SizeReport {
    pub total_bytes: u64,
    pub file_count: usize,
    /// Relative path and byte size of every file over the 1 MB flag.
    pub oversized: Vec<(String, u64)>,
}

/// Stat every selected path under the project root. Missing files are
/// skipped silently; the reader reports them redundantly later.
pub fn preflight_sizes(root: &Path, paths: &[String]) -> SizeReport {
    let mut report = SizeReport::default();
    for rel in paths {
        let abs = root.join(rel);
        let Ok(meta) = std::fs::metadata(&abs) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let bytes = meta.len();
        report.total_bytes += bytes;
        report.file_count += 1;
        if bytes > OVERSIZE_FILE_BYTES {
            report.oversized.push((rel.clone(), bytes));
        }
    }
    report
}

/// Fail fast when the on-disk total cannot fit the live-memory budget.
pub fn enforce_memory_budget(report: &SizeReport, max_memory_mb: u64) -> Result<()> {
    let budget = max_memory_mb * 1_048_576;
    if report.total_bytes <= budget {
        return Ok(());
    }

    let oversized = if report.oversized.is_empty() {
        "none over the single-file flag".to_string()
    } else {
        report
            .oversized
            .iter()
            .map(|(p, b)| format!("{p} ({b} bytes)"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    Err(ContextError::LimitExceeded(format!(
        "selected files total {} bytes, exceeding the {}MB memory limit; oversized files: {}",
        report.total_bytes, max_memory_mb, oversized
    )))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
