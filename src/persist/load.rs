use crate::sim::jobs::PersistedTable;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub fn load_jobs(path: &Path) -> Result<Option<PersistedTable>> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(None),
        Ok(content) => {
            let table = ron::from_str(&content)
                .with_context(|| format!("parsing job table {}", path.display()))?;
            Ok(Some(table))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading job table {}", path.display())),
    }
}
