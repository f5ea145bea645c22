use crate::config::EngineConfig;
use crate::error::{ContextError, Result};
use crate::estimate::{self, CharRatioCounter, TokenCounter};
use crate::events::{event, EventBus, NullEventBus};
use crate::options::{BuildOptions, READ_LINE_CAP};
use crate::paginate::{self, Chunk, LineRange};
use crate::reader::{FileContentReader, FsContentReader, ProgressFn};
use crate::registry::StreamRegistry;
use crate::stream::{self, Stream};
use crate::summary::{ContextSummary, SummaryStore};
use crate::transform;
use crate::tree;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Default)]
struct Metrics {
    active_ops: AtomicU64,
    total_ops: AtomicU64,
    total_bytes_read: AtomicU64,
}

/// Counts an in-flight operation; the decrement lives in Drop so it also
/// runs when the operation panics or is cancelled mid-await.
struct OpGuard<'a>(&'a Metrics);

impl Metrics {
    fn begin(&self) -> OpGuard<'_> {
        self.active_ops.fetch_add(1, Ordering::AcqRel);
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        OpGuard(self)
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.0.active_ops.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The assembly engine: owns the registry, the summary store, and one
/// background cleanup task. Collaborators (reader, event bus, token
/// counter) are injected; defaults cover the common case.
pub struct ContextService {
    config: EngineConfig,
    context_dir: PathBuf,
    reader: Arc<dyn FileContentReader>,
    events: Arc<dyn EventBus>,
    counter: Arc<dyn TokenCounter>,
    registry: StreamRegistry,
    summaries: SummaryStore,
    metrics: Metrics,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
    shutdown_tx: watch::Sender<bool>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
pub struct ContextServiceBuilder {
    config: Option<EngineConfig>,
    reader: Option<Arc<dyn FileContentReader>>,
    events: Option<Arc<dyn EventBus>>,
    counter: Option<Arc<dyn TokenCounter>>,
}

impl ContextServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_reader(mut self, reader: Arc<dyn FileContentReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Construct the service and spawn its cleanup task. Must run inside a
    /// tokio runtime.
    pub fn build(self) -> Arc<ContextService> {
        let config = self.config.unwrap_or_default();
        let context_dir = config.resolved_context_dir();
        let counter = self.counter.unwrap_or_else(|| {
            Arc::new(CharRatioCounter {
                chars_per_token: config.chars_per_token,
            })
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cleanup_interval = Duration::from_secs(config.cleanup_interval_secs.max(1));
        let max_age = Duration::from_secs(config.max_stream_age_secs);

        let service = Arc::new(ContextService {
            registry: StreamRegistry::new(config.max_active_streams),
            summaries: SummaryStore::new(context_dir.clone()),
            context_dir,
            reader: self.reader.unwrap_or_else(|| Arc::new(FsContentReader::new())),
            events: self.events.unwrap_or_else(|| Arc::new(NullEventBus)),
            counter,
            config,
            metrics: Metrics::default(),
            last_cleanup: Mutex::new(None),
            shutdown_tx,
            cleanup_task: Mutex::new(None),
        });

        let task = tokio::spawn(cleanup_loop(
            Arc::downgrade(&service),
            shutdown_rx,
            cleanup_interval,
            max_age,
        ));
        if let Ok(mut slot) = service.cleanup_task.lock() {
            *slot = Some(task);
        }
        service
    }
}

async fn cleanup_loop(
    service: Weak<ContextService>,
    mut shutdown_rx: watch::Receiver<bool>,
    interval: Duration,
    max_age: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the immediate first tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(service) = service.upgrade() else { break };
                let evicted = service.cleanup_old_streams(max_age).await;
                if evicted > 0 {
                    info!(evicted, "periodic cleanup pass evicted stale streams");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

impl ContextService {
    pub fn builder() -> ContextServiceBuilder {
        ContextServiceBuilder::new()
    }

    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }

    // ── Assembly ─────────────────────────────────────────────────────────────

    /// Assemble a context and return its stream handle.
    pub async fn build_context(
        &self,
        project_root: &Path,
        paths: &[String],
        options: &BuildOptions,
    ) -> Result<Stream> {
        self.create_stream(project_root, paths, options).await
    }

    /// As `build_context`, but hand back the persisted metadata. The
    /// returned `selected_files` is the caller's request verbatim, even
    /// when the reader supplied a strict subset.
    pub async fn build_context_summary(
        &self,
        project_root: &Path,
        paths: &[String],
        options: &BuildOptions,
    ) -> Result<ContextSummary> {
        let stream = self.create_stream(project_root, paths, options).await?;
        self.summaries.read(&stream.id).await
    }

    pub async fn create_stream(
        &self,
        project_root: &Path,
        paths: &[String],
        options: &BuildOptions,
    ) -> Result<Stream> {
        let deadline = Duration::from_secs(self.config.build_timeout_secs.max(1));
        match tokio::time::timeout(
            deadline,
            self.create_stream_inner(project_root, paths, options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ContextError::DeadlineExceeded),
        }
    }

    async fn create_stream_inner(
        &self,
        project_root: &Path,
        paths: &[String],
        options: &BuildOptions,
    ) -> Result<Stream> {
        let _op = self.metrics.begin();
        let options = options.normalized()?;

        let selected: Vec<String> = if options.exclude_tests {
            transform::filter_test_paths(paths)
        } else {
            paths.to_vec()
        };

        let report = estimate::preflight_sizes(project_root, &selected);
        estimate::enforce_memory_budget(&report, options.max_memory_mb)?;

        let progress = self.progress_callback(&options);
        let contents = self
            .reader
            .read_contents(project_root, &selected, progress)
            .await?;
        let bytes_read: u64 = contents.values().map(|c| c.len() as u64).sum();
        self.metrics
            .total_bytes_read
            .fetch_add(bytes_read, Ordering::Relaxed);

        let built = stream::assemble_stream(
            project_root,
            &selected,
            &contents,
            &options,
            &self.context_dir,
            self.counter.as_ref(),
        )
        .await?;

        let built = Arc::new(built);
        for old in self.registry.insert(Arc::clone(&built)) {
            info!(id = %old.id, "evicting oldest stream over the registry cap");
            self.remove_artifact_set(&old.id).await;
        }

        let summary = ContextSummary::for_stream(&built, paths.to_vec());
        if let Err(err) = self.summaries.write(&summary).await {
            self.registry.remove(&built.id);
            self.remove_artifact_set(&built.id).await;
            return Err(err);
        }

        info!(
            id = %built.id,
            files = built.files.len(),
            tokens = built.token_count,
            "context stream created"
        );
        Ok(Stream::clone(&built))
    }

    fn progress_callback(&self, options: &BuildOptions) -> Option<ProgressFn> {
        if !options.enable_progress_events {
            return None;
        }
        let events = Arc::clone(&self.events);
        Some(Arc::new(move |current, total| {
            events.emit(
                event::GENERATION_PROGRESS,
                json!({ "current": current, "total": total }),
            );
        }))
    }

    /// Fire-and-forget legacy entry point. Emits `…Started`, progress, and
    /// exactly one terminal event. Panics inside the build are recovered at
    /// the task join and reported as failure; they never reach the host.
    pub fn generate_context_async(self: Arc<Self>, project_root: PathBuf, paths: Vec<String>) {
        let service = self;
        tokio::spawn(async move {
            service.events.emit(
                event::GENERATION_STARTED,
                json!({
                    "fileCount": paths.len(),
                    "rootDir": project_root.display().to_string(),
                }),
            );

            let deadline = Duration::from_secs(service.config.async_build_timeout_secs.max(1));
            let worker = {
                let service = Arc::clone(&service);
                let project_root = project_root.clone();
                let paths = paths.clone();
                tokio::spawn(async move { service.generate_legacy(&project_root, &paths).await })
            };
            let abort = worker.abort_handle();

            match tokio::time::timeout(deadline, worker).await {
                Err(_) => {
                    abort.abort();
                    warn!(root = %project_root.display(), "context generation timed out");
                    service.events.emit(event::GENERATION_TIMEOUT, Value::Null);
                }
                Ok(Err(join_err)) => {
                    let reported = if join_err.is_panic() {
                        ContextError::Internal(join_err.to_string())
                    } else {
                        ContextError::Cancelled
                    };
                    error!(%join_err, "context generation task died");
                    service
                        .events
                        .emit(event::APP_ERROR, json!({ "error": join_err.to_string() }));
                    service
                        .events
                        .emit(event::GENERATION_FAILED, Value::String(reported.to_string()));
                }
                Ok(Ok(Err(err))) => {
                    service
                        .events
                        .emit(event::GENERATION_FAILED, Value::String(err.to_string()));
                }
                Ok(Ok(Ok(text))) => {
                    service.events.emit(event::GENERATED, Value::String(text));
                }
            }
        });
    }

    /// Legacy whole-string generation: rendered file tree on top, then the
    /// artifact body.
    async fn generate_legacy(&self, project_root: &Path, paths: &[String]) -> Result<String> {
        let options = BuildOptions {
            include_manifest: true,
            enable_progress_events: true,
            ..Default::default()
        };
        let built = self
            .create_stream_inner(project_root, paths, &options)
            .await?;

        let mut sorted = paths.to_vec();
        sorted.sort();
        let tree_text = tree::render_tree(&sorted);

        let content = self.read_context_content(&built.id).await?;
        Ok(format!("{tree_text}\n{content}"))
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    fn resolve_artifact(&self, id: &str) -> PathBuf {
        match self.registry.get(id) {
            Some(stream) => stream.artifact_path().to_path_buf(),
            None => self.context_dir.join(format!("{id}.ctx")),
        }
    }

    pub async fn read_context_chunk(
        &self,
        id: &str,
        start_line: usize,
        line_count: usize,
    ) -> Result<Chunk> {
        let _op = self.metrics.begin();
        let artifact = self.resolve_artifact(id);
        let chunk = paginate::read_chunk(&artifact, id, start_line, line_count).await?;
        let bytes: u64 = chunk.lines.iter().map(|l| l.len() as u64 + 1).sum();
        self.metrics
            .total_bytes_read
            .fetch_add(bytes, Ordering::Relaxed);
        Ok(chunk)
    }

    /// Inclusive line-range read. Unlike chunk reads, ranges beyond the
    /// per-request cap are rejected rather than clamped.
    pub async fn get_context_lines(
        &self,
        id: &str,
        start_line: usize,
        end_line: usize,
    ) -> Result<LineRange> {
        let start = start_line.max(1);
        if end_line > start && end_line - start > READ_LINE_CAP {
            return Err(ContextError::RangeTooLarge {
                requested: end_line - start + 1,
                cap: READ_LINE_CAP,
            });
        }
        if end_line < start {
            return Ok(LineRange {
                lines: Vec::new(),
                start_line: start,
                end_line: start - 1,
            });
        }
        let chunk = self
            .read_context_chunk(id, start, end_line - start + 1)
            .await?;
        Ok(LineRange {
            lines: chunk.lines,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
        })
    }

    pub async fn read_context_content(&self, id: &str) -> Result<String> {
        let _op = self.metrics.begin();
        let artifact = self.resolve_artifact(id);
        let content = paginate::read_whole(&artifact, id).await?;
        self.metrics
            .total_bytes_read
            .fetch_add(content.len() as u64, Ordering::Relaxed);
        Ok(content)
    }

    pub async fn get_context_summary(&self, id: &str) -> Result<ContextSummary> {
        self.summaries.read(id).await
    }

    pub async fn get_project_context_summaries(
        &self,
        project_root: &Path,
    ) -> Result<Vec<ContextSummary>> {
        self.summaries.list_for_project(project_root).await
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Remove a context's artifact and metadata siblings. Idempotent:
    /// already-gone files are not an error.
    pub async fn delete_context(&self, id: &str) -> Result<()> {
        let _op = self.metrics.begin();
        self.registry.remove(id);
        for name in [
            format!("{id}.ctx"),
            format!("{id}.summary.json"),
            format!("{id}.json"),
        ] {
            let path = self.context_dir.join(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ContextError::io(&path, e)),
            }
        }
        Ok(())
    }

    /// Evict registered streams older than `max_age` and delete their disk
    /// files. Returns the eviction count.
    pub async fn cleanup_old_streams(&self, max_age: Duration) -> usize {
        let age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = Utc::now() - age;

        let evicted = self.registry.evict_created_before(cutoff);
        for stream in &evicted {
            self.remove_artifact_set(&stream.id).await;
        }
        if let Ok(mut slot) = self.last_cleanup.lock() {
            *slot = Some(Utc::now());
        }
        evicted.len()
    }

    async fn remove_artifact_set(&self, id: &str) {
        for name in [
            format!("{id}.ctx"),
            format!("{id}.summary.json"),
            format!("{id}.json"),
        ] {
            let path = self.context_dir.join(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), %e, "failed to remove context file"),
            }
        }
    }

    pub fn get_memory_stats(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("activeStreams".into(), json!(self.registry.len()));
        map.insert(
            "maxActiveStreams".into(),
            json!(self.config.max_active_streams),
        );
        map.insert(
            "activeOperations".into(),
            json!(self.metrics.active_ops.load(Ordering::Acquire)),
        );
        map.insert(
            "totalOperations".into(),
            json!(self.metrics.total_ops.load(Ordering::Relaxed)),
        );
        map.insert(
            "totalBytesRead".into(),
            json!(self.metrics.total_bytes_read.load(Ordering::Relaxed)),
        );
        let last = self
            .last_cleanup
            .lock()
            .ok()
            .and_then(|slot| slot.map(|t| t.to_rfc3339()));
        map.insert("lastCleanup".into(), json!(last));
        map.insert(
            "contextDir".into(),
            json!(self.context_dir.display().to_string()),
        );
        map
    }

    /// Stop the cleanup task, drain in-flight operations, and clear the
    /// registry. Blocks at most `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let task = self.cleanup_task.lock().ok().and_then(|mut slot| slot.take());

        let drain = async {
            if let Some(task) = task {
                let _ = task.await;
            }
            while self.metrics.active_ops.load(Ordering::Acquire) > 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };

        match tokio::time::timeout(deadline, drain).await {
            Ok(()) => {
                self.registry.clear();
                info!("context service shut down");
                Ok(())
            }
            Err(_) => Err(ContextError::DeadlineExceeded),
        }
    }
}
