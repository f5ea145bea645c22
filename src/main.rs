use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use shotgun_context::config::load_config;
use shotgun_context::events::{event, EventBus};
use shotgun_context::options::{BuildOptions, OutputFormat};
use shotgun_context::service::ContextService;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "shotgun-context")]
#[command(version)]
#[command(about = "Bounded, streamed assembly of project file contexts for LLM consumers")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Assemble a context artifact from selected files under a project root
    Build {
        /// Project root directory
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Relative paths to include, in emission order
        #[arg(required = true, value_name = "PATHS")]
        paths: Vec<String>,

        /// Output framing wrapped around each file body
        #[arg(long, value_enum, default_value_t = OutputFormat::Xml)]
        format: OutputFormat,

        /// Token budget for the whole artifact (0 disables the check)
        #[arg(long, default_value_t = 5_000)]
        max_tokens: u64,

        /// Live-memory budget in megabytes
        #[arg(long, default_value_t = 30)]
        max_memory_mb: u64,

        /// Strip comments from source files
        #[arg(long)]
        strip_comments: bool,

        /// Excise leading license headers
        #[arg(long)]
        strip_license: bool,

        /// Compact JSON/YAML data files and Cargo manifests
        #[arg(long)]
        compact_data: bool,

        /// Prefix each line with its 1-based number
        #[arg(long)]
        line_numbers: bool,

        /// Write the generation manifest header at the top of the artifact
        #[arg(long)]
        manifest: bool,

        /// Drop files matching test-path conventions
        #[arg(long)]
        exclude_tests: bool,

        /// Collapse runs of blank lines to at most two
        #[arg(long)]
        collapse_empty: bool,

        /// Right-trim whitespace on every line
        #[arg(long)]
        trim: bool,

        /// Reduce file bodies to definition skeletons
        #[arg(long)]
        skeleton: bool,

        /// Print the persisted summary instead of the stream handle
        #[arg(long)]
        summary: bool,
    },

    /// Read a chunk of lines from a stored context
    Read {
        id: String,
        #[arg(long, default_value_t = 1)]
        start: usize,
        /// Lines to fetch; 0 means the 1,000-line default
        #[arg(long, default_value_t = 0)]
        count: usize,
    },

    /// Read an inclusive 1-based line range
    Lines {
        id: String,
        #[arg(long)]
        start: usize,
        #[arg(long)]
        end: usize,
    },

    /// Print the entire artifact body
    Cat { id: String },

    /// List stored context summaries for a project root
    List {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Delete a context and its metadata siblings
    Delete { id: String },

    /// Print engine counters and registry state
    Stats,
}

/// Drives an indicatif bar from the reader's progress events.
struct ProgressBus {
    bar: ProgressBar,
}

impl EventBus for ProgressBus {
    fn emit(&self, event_name: &str, payload: Value) {
        if event_name != event::GENERATION_PROGRESS {
            return;
        }
        let current = payload.get("current").and_then(Value::as_u64);
        let total = payload.get("total").and_then(Value::as_u64);
        let (Some(current), Some(total)) = (current, total) else {
            return;
        };
        if self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(current);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let cfg = load_config(&cwd);

    match cli.cmd {
        Command::Build {
            root,
            paths,
            format,
            max_tokens,
            max_memory_mb,
            strip_comments,
            strip_license,
            compact_data,
            line_numbers,
            manifest,
            exclude_tests,
            collapse_empty,
            trim,
            skeleton,
            summary,
        } => {
            let bar = ProgressBar::new(paths.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner} {pos}/{len} files read")
                    .unwrap()
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );

            let service = ContextService::builder()
                .with_config(cfg)
                .with_event_bus(Arc::new(ProgressBus { bar: bar.clone() }))
                .build();

            let options = BuildOptions {
                max_tokens,
                max_memory_mb,
                strip_comments,
                strip_license,
                compact_data_files: compact_data,
                include_line_numbers: line_numbers,
                include_manifest: manifest,
                exclude_tests,
                collapse_empty_lines: collapse_empty,
                trim_whitespace: trim,
                skeleton_mode: skeleton,
                output_format: format,
                enable_progress_events: true,
                ..Default::default()
            };

            if summary {
                let built = service
                    .build_context_summary(&root, &paths, &options)
                    .await?;
                bar.finish_and_clear();
                println!("{}", serde_json::to_string_pretty(&built)?);
            } else {
                let built = service.build_context(&root, &paths, &options).await?;
                bar.finish_and_clear();
                println!("{}", serde_json::to_string_pretty(&built)?);
            }
            service.shutdown(Duration::from_secs(5)).await?;
        }

        Command::Read { id, start, count } => {
            let service = ContextService::builder().with_config(cfg).build();
            let chunk = service.read_context_chunk(&id, start, count).await?;
            println!("{}", serde_json::to_string_pretty(&chunk)?);
            service.shutdown(Duration::from_secs(5)).await?;
        }

        Command::Lines { id, start, end } => {
            let service = ContextService::builder().with_config(cfg).build();
            let range = service.get_context_lines(&id, start, end).await?;
            for line in &range.lines {
                println!("{line}");
            }
            service.shutdown(Duration::from_secs(5)).await?;
        }

        Command::Cat { id } => {
            let service = ContextService::builder().with_config(cfg).build();
            let content = service.read_context_content(&id).await?;
            print!("{content}");
            service.shutdown(Duration::from_secs(5)).await?;
        }

        Command::List { root } => {
            let service = ContextService::builder().with_config(cfg).build();
            let summaries = service.get_project_context_summaries(&root).await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            service.shutdown(Duration::from_secs(5)).await?;
        }

        Command::Delete { id } => {
            let service = ContextService::builder().with_config(cfg).build();
            service.delete_context(&id).await?;
            eprintln!("deleted {id}");
            service.shutdown(Duration::from_secs(5)).await?;
        }

        Command::Stats => {
            let service = ContextService::builder().with_config(cfg).build();
            let stats = service.get_memory_stats();
            println!("{}", serde_json::to_string_pretty(&Value::Object(stats))?);
            service.shutdown(Duration::from_secs(5)).await?;
        }
    }

    Ok(())
}
