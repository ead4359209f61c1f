use crate::error::{GameError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Construction-time parameters. Immutable once an engine is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on the deadline offset passed to `open`
    #[serde(with = "secs")]
    pub max_play_window: Duration,
    /// Time the initiator has to reveal after the responder joins
    #[serde(with = "secs")]
    pub result_window: Duration,
    #[serde(default)]
    pub start_paused: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_play_window: Duration::from_secs(3600), // 1 hour
            result_window: Duration::from_secs(1200),   // 20 minutes
            start_paused: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn new(max_play_window: Duration, result_window: Duration) -> Self {
        Self {
            max_play_window,
            result_window,
            ..Self::default()
        }
    }

    pub fn with_start_paused(mut self, start_paused: bool) -> Self {
        self.start_paused = start_paused;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_play_window.is_zero() {
            return Err(GameError::config("Max play window must be greater than 0"));
        }

        if self.event_capacity == 0 {
            return Err(GameError::config("Event capacity must be greater than 0"));
        }

        self.max_play_window_delta()?;
        self.result_window_delta()?;
        Ok(())
    }

    pub(crate) fn max_play_window_delta(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.max_play_window)
            .map_err(|e| GameError::config(format!("Max play window out of range: {}", e)))
    }

    pub(crate) fn result_window_delta(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.result_window)
            .map_err(|e| GameError::config(format!("Result window out of range: {}", e)))
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let config = EngineConfig::default();
        assert_eq!(config.max_play_window, Duration::from_secs(3600));
        assert_eq!(config.result_window, Duration::from_secs(1200));
        assert!(!config.start_paused);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let config =
            EngineConfig::from_json_str(r#"{"max_play_window": 600, "result_window": 0}"#).unwrap();
        assert_eq!(config.max_play_window, Duration::from_secs(600));
        assert_eq!(config.result_window, Duration::ZERO);
        assert_eq!(config.event_capacity, 256);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"max_play_window\":600"));
    }

    #[test]
    fn test_validate_rejects_bad_windows() {
        let zero = EngineConfig::new(Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(zero.validate(), Err(GameError::Config(_))));

        let huge = EngineConfig::new(Duration::from_secs(60), Duration::MAX);
        assert!(matches!(huge.validate(), Err(GameError::Config(_))));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"max_play_window": 3600, "result_window": 1200, "start_paused": true}"#)
            .unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert!(config.start_paused);

        let missing = EngineConfig::from_json_file(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(GameError::Io(_))));
    }
}
