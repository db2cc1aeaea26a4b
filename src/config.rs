//! TOML-backed configuration for the workflow core. Every section has
//! defaults, so an absent or partial file still yields a runnable config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::coordinator::{CoordinatorConfig, ResourceBudget};
use crate::recovery::BackoffPolicy;
use crate::scheduler::SchedulerConfig;

/// Main configuration structure for pitcrew.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PitcrewConfig {
    /// Task ordering and conflict detection tunables.
    pub scheduler: SchedulerConfig,
    /// Group execution timeouts and poll intervals.
    pub coordinator: CoordinatorConfig,
    /// Session-wide resource ceilings.
    pub budget: ResourceBudget,
    /// Failure recovery tunables.
    pub recovery: RecoveryConfig,
    /// Checkpoint storage settings.
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Full passes over a strategy chain before escalating.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Prefix for the git tags backing checkpoints.
    pub tag_prefix: String,
    /// Directory holding per-session persisted state.
    pub state_dir: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            tag_prefix: "pitcrew-checkpoint".to_string(),
            state_dir: ".pitcrew".to_string(),
        }
    }
}

impl PitcrewConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Write the configuration back out as pretty TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = PitcrewConfig::load("/nonexistent/pitcrew.toml").unwrap();
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.checkpoint.tag_prefix, "pitcrew-checkpoint");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pitcrew.toml");
        std::fs::write(&path, "[recovery]\nmax_attempts = 5\n").unwrap();

        let config = PitcrewConfig::load(&path).unwrap();
        assert_eq!(config.recovery.max_attempts, 5);
        assert_eq!(config.coordinator.refresh_timeout_secs, 60);
        assert!(!config.scheduler.foundation_keywords.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pitcrew.toml");

        let mut config = PitcrewConfig::default();
        config.budget.max_external_calls = 42;
        config.save(&path).unwrap();

        let loaded = PitcrewConfig::load(&path).unwrap();
        assert_eq!(loaded.budget.max_external_calls, 42);
    }
}
