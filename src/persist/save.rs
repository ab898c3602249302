use crate::sim::jobs::PersistedTable;
use anyhow::{Context, Result};
use ron::ser::PrettyConfig;
use std::fs;
use std::path::Path;

/// Writes through a sibling temp file so a crash never leaves a torn table.
pub fn save_jobs(path: &Path, table: &PersistedTable) -> Result<()> {
    let pretty = PrettyConfig::new();
    let serialized =
        ron::ser::to_string_pretty(table, pretty).context("serializing job table")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let staging = path.with_extension("ron.tmp");
    fs::write(&staging, serialized)
        .with_context(|| format!("writing {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| {
        format!("replacing {} with {}", path.display(), staging.display())
    })?;
    Ok(())
}
