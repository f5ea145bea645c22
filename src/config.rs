use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine-level knobs. Everything has a default; a config file only needs
/// the fields it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Where artifacts and summaries live. Defaults to
    /// `$HOME/.shotgun-code/contexts`.
    pub context_dir: Option<PathBuf>,
    /// Background cleanup wake-up cadence.
    pub cleanup_interval_secs: u64,
    /// Streams older than this are evicted by the cleanup pass.
    pub max_stream_age_secs: u64,
    /// Hard cap on concurrently registered streams.
    pub max_active_streams: usize,
    /// Character-to-token ratio for the default estimator.
    pub chars_per_token: usize,
    /// Overall ceiling on a single build.
    pub build_timeout_secs: u64,
    /// Tighter ceiling on the event-emitting async variant.
    pub async_build_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_dir: None,
            cleanup_interval_secs: 30 * 60,
            max_stream_age_secs: 24 * 60 * 60,
            max_active_streams: 10,
            chars_per_token: 4,
            build_timeout_secs: 120,
            async_build_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn resolved_context_dir(&self) -> PathBuf {
        if let Some(dir) = &self.context_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shotgun-code")
            .join("contexts")
    }
}

/// Load `.shotgun-context.json` from the given directory, falling back to
/// defaults on any read or parse failure.
pub fn load_config(dir: &Path) -> EngineConfig {
    let primary = dir.join(".shotgun-context.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else {
        return EngineConfig::default();
    };

    serde_json::from_str::<EngineConfig>(&text).unwrap_or_else(|_| EngineConfig::default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_lifecycle_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.cleanup_interval_secs, 1_800);
        assert_eq!(cfg.max_stream_age_secs, 86_400);
        assert_eq!(cfg.max_active_streams, 10);
        assert_eq!(cfg.chars_per_token, 4);
    }

    #[test]
    fn partial_config_file_overrides_only_named_fields() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(".shotgun-context.json"),
            r#"{"maxActiveStreams": 3}"#,
        )
        .unwrap();
        let cfg = load_config(tmp.path());
        assert_eq!(cfg.max_active_streams, 3);
        assert_eq!(cfg.cleanup_interval_secs, 1_800);
    }

    #[test]
    fn unreadable_or_invalid_config_falls_back() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(load_config(tmp.path()).max_active_streams, 10);
        std::fs::write(tmp.path().join(".shotgun-context.json"), "{nope").unwrap();
        assert_eq!(load_config(tmp.path()).max_active_streams, 10);
    }
}
