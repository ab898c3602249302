mod load;
mod save;

pub use load::load_jobs;
pub use save::save_jobs;

use crate::sim::jobs::PersistedTable;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Mutex;

pub const JOBS_FILE: &str = "active_jobs.ron";

/// Durable home of the active-job table.
pub trait JobStorage: Send + Sync {
    /// `Ok(None)` when nothing was persisted yet.
    fn load(&self) -> Result<Option<PersistedTable>>;
    fn save(&self, table: &PersistedTable) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RonFileStorage {
    path: PathBuf,
}

impl RonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for RonFileStorage {
    fn default() -> Self {
        Self::new(JOBS_FILE)
    }
}

impl JobStorage for RonFileStorage {
    fn load(&self) -> Result<Option<PersistedTable>> {
        load_jobs(&self.path)
    }

    fn save(&self, table: &PersistedTable) -> Result<()> {
        save_jobs(&self.path, table)
    }
}

/// Keeps the last saved table in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<PersistedTable>>,
}

impl MemoryStorage {
    pub fn with_table(table: PersistedTable) -> Self {
        Self {
            slot: Mutex::new(Some(table)),
        }
    }

    pub fn snapshot(&self) -> Option<PersistedTable> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl JobStorage for MemoryStorage {
    fn load(&self) -> Result<Option<PersistedTable>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("memory storage lock poisoned"))?;
        Ok(slot.clone())
    }

    fn save(&self, table: &PersistedTable) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("memory storage lock poisoned"))?;
        *slot = Some(table.clone());
        Ok(())
    }
}
