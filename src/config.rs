//! Engine configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::persist::JOBS_FILE;

pub const CONFIG_FILE: &str = "economy.ron";

/// Timing and storage knobs. Every field has a default, so a partial
/// (or missing) config file is fine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the shared completion ticker
    pub tick_interval_ms: u64,
    /// Clock-skew allowance past a job's end before completion is attempted
    pub completion_grace_ms: u64,
    /// Retry delay after the server reports "not ready yet"
    pub soft_backoff_ms: u64,
    /// Retry delay after a network failure
    pub error_backoff_ms: u64,
    /// Periodic safety persist of the job table
    pub autosave_interval_ms: u64,
    /// Lowest share of the base duration speed buffs can reach
    pub speed_floor: f64,
    /// Where the active-job table is persisted
    pub jobs_file: PathBuf,
    /// Settlement scope sent with start/cancel requests
    pub scope: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            completion_grace_ms: 2_000,
            soft_backoff_ms: 1_500,
            error_backoff_ms: 3_000,
            autosave_interval_ms: 5_000,
            speed_floor: 0.2,
            jobs_file: PathBuf::from(JOBS_FILE),
            scope: "main".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads a RON config; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => ron::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("reading config {}", path.display())),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms.max(1))
    }
}
