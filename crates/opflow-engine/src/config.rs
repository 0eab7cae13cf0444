//! Engine configuration.
//!
//! Values come from a JSON file or from `OPFLOW_*` environment variables;
//! anything not given keeps its default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use opflow_types::{EngineError, MessageTable, Result};

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%p_%I_%M_%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// chrono format string used by the `%{t}` macro.
    pub timestamp_format: String,
    /// Capacity of the process event channel.
    pub event_capacity: usize,
    /// JSON error message table overlaid on the built-in one.
    pub messages: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            event_capacity: 256,
            messages: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        tracing::debug!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(format) = lookup("OPFLOW_TIMESTAMP_FORMAT") {
            config.timestamp_format = format;
        }
        if let Some(capacity) = lookup("OPFLOW_EVENT_CAPACITY") {
            config.event_capacity = capacity.trim().parse().map_err(|_| {
                EngineError::Other(format!(
                    "OPFLOW_EVENT_CAPACITY must be a positive integer, got '{capacity}'"
                ))
            })?;
        }
        if let Some(path) = lookup("OPFLOW_MESSAGES") {
            config.messages = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    /// The built-in message table with the configured overlay applied.
    pub fn message_table(&self) -> Result<MessageTable> {
        let mut table = MessageTable::builtin().clone();
        if let Some(path) = &self.messages {
            table.extend(MessageTable::load(path)?);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opflow.json");
        std::fs::write(&path, r#"{"event_capacity": 8}"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.timestamp_format, DEFAULT_TIMESTAMP_FORMAT);
        assert!(config.messages.is_none());
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OPFLOW_TIMESTAMP_FORMAT", "%H%M"),
            ("OPFLOW_EVENT_CAPACITY", "32"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.timestamp_format, "%H%M");
        assert_eq!(config.event_capacity, 32);
    }

    #[test]
    fn bad_capacity_is_rejected() {
        let result = EngineConfig::from_lookup(|k| {
            (k == "OPFLOW_EVENT_CAPACITY").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn message_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        std::fs::write(
            &path,
            r#"{"900": {"name": "custom", "short": "Custom failure: {0}"}}"#,
        )
        .unwrap();
        let config = EngineConfig {
            messages: Some(path),
            ..EngineConfig::default()
        };
        let table = config.message_table().unwrap();
        assert_eq!(table.lookup(900).unwrap().name, "custom");
        assert!(table.lookup(111).is_some());
    }
}
