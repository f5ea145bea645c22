use serde_json::Value;

/// Event names emitted over the bus. The spelling is part of the UI contract.
pub mod event {
    pub const GENERATION_STARTED: &str = "shotgunContextGenerationStarted";
    pub const GENERATION_PROGRESS: &str = "shotgunContextGenerationProgress";
    pub const GENERATED: &str = "shotgunContextGenerated";
    pub const GENERATION_FAILED: &str = "shotgunContextGenerationFailed";
    pub const GENERATION_TIMEOUT: &str = "shotgunContextGenerationTimeout";
    pub const APP_ERROR: &str = "app:error";
}

/// Fire-and-forget event emission. Implementations must never block the
/// assembly path; drop events rather than stall.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// Discards every event. The default bus for headless/library use.
#[derive(Debug, Default)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _event: &str, _payload: Value) {}
}

/// Records events in memory; test collaborator.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: std::sync::Mutex<Vec<(String, Value)>>,
}

impl RecordingEventBus {
    pub fn take(&self) -> Vec<(String, Value)> {
        self.events
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl EventBus for RecordingEventBus {
    fn emit(&self, event: &str, payload: Value) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push((event.to_string(), payload));
        }
    }
}
