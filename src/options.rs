use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};

/// Hard ceiling on the per-build memory budget a caller may request.
pub const MAX_MEMORY_MB_CEILING: u64 = 500;
/// Hard ceiling on the per-build token budget a caller may request.
pub const MAX_TOKENS_CEILING: u64 = 10_000_000;

pub const DEFAULT_MAX_MEMORY_MB: u64 = 30;
pub const DEFAULT_MAX_TOKENS: u64 = 5_000;

/// Per-request ceiling on paginated reads. Larger requests are clamped.
pub const READ_LINE_CAP: usize = 10_000;
/// Line count applied when a read request passes zero.
pub const DEFAULT_READ_LINE_COUNT: usize = 1_000;

/// Any single selected file above this size is flagged as oversized.
pub const OVERSIZE_FILE_BYTES: u64 = 1_048_576;

/// Output framing wrapped around each file body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    #[default]
    Xml,
    Json,
    Plain,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Xml => "xml",
            OutputFormat::Json => "json",
            OutputFormat::Plain => "plain",
        })
    }
}

/// Build options with explicit defaults. Deserializing a document with an
/// unrecognized field is a construction-time error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildOptions {
    /// Token budget for the whole artifact. Zero disables the token check.
    pub max_tokens: u64,
    /// Live-memory budget in megabytes, enforced by the pre-scan and the
    /// mid-stream flush threshold.
    pub max_memory_mb: u64,
    pub strip_comments: bool,
    pub include_manifest: bool,
    pub include_line_numbers: bool,
    /// Streaming assembly is the only supported mode; this is forced on
    /// during normalization regardless of what the caller passed.
    pub force_stream: bool,
    pub enable_progress_events: bool,
    pub output_format: OutputFormat,
    pub exclude_tests: bool,
    pub collapse_empty_lines: bool,
    pub strip_license: bool,
    pub compact_data_files: bool,
    pub skeleton_mode: bool,
    pub trim_whitespace: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            strip_comments: false,
            include_manifest: false,
            include_line_numbers: false,
            force_stream: true,
            enable_progress_events: false,
            output_format: OutputFormat::default(),
            exclude_tests: false,
            collapse_empty_lines: false,
            strip_license: false,
            compact_data_files: false,
            skeleton_mode: false,
            trim_whitespace: false,
        }
    }
}

impl BuildOptions {
    /// Validate budgets and normalize fields. Runs once per build entry
    /// point, before any I/O.
    pub fn normalized(&self) -> Result<BuildOptions> {
        if self.max_memory_mb > MAX_MEMORY_MB_CEILING {
            return Err(ContextError::LimitExceeded(
                "memory limit cannot exceed 500MB".to_string(),
            ));
        }
        if self.max_tokens > MAX_TOKENS_CEILING {
            return Err(ContextError::LimitExceeded(format!(
                "token limit cannot exceed {MAX_TOKENS_CEILING} tokens"
            )));
        }

        let mut out = self.clone();
        if out.max_memory_mb == 0 {
            out.max_memory_mb = DEFAULT_MAX_MEMORY_MB;
        }
        out.force_stream = true;
        Ok(out)
    }

    /// Live-memory budget in bytes.
    pub fn memory_budget_bytes(&self) -> u64 {
        self.max_memory_mb * 1_048_576
    }

    /// Mid-stream flush threshold: half the byte budget.
    pub fn flush_threshold_bytes(&self) -> u64 {
        self.max_memory_mb * 524_288
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
