//! Derives owned levels from the raw player state.
//!
//! The backend has emitted several state shapes over time. Every shape has
//! its own adapter below and all of them are scanned on every call; the
//! result is a max-reduce, so adapter order never matters.

use crate::sim::tokens::{
    split_level, LevelSuffix, TokenKind, ADDON_PREFIX, BUILDING_PREFIX, RESEARCH_PREFIX,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipIndex {
    /// `bld.<family>` / `add.<family>` -> highest owned level.
    pub max_level_by_series: BTreeMap<String, u32>,
    /// `rsd.<family>` -> highest completed level.
    pub completed_research_by_series: BTreeMap<String, u32>,
}

impl OwnershipIndex {
    pub fn level_of(&self, kind: TokenKind, series: &str) -> u32 {
        let table = match kind {
            TokenKind::Research => &self.completed_research_by_series,
            _ => &self.max_level_by_series,
        };
        table.get(series).copied().unwrap_or(0)
    }

    pub fn owns(&self, series: &str) -> bool {
        self.max_level_by_series.get(series).copied().unwrap_or(0) > 0
    }
}

type Adapter = fn(&Map<String, Value>, &mut OwnershipIndex);

const ADAPTERS: [Adapter; 5] = [
    scan_buildings,
    scan_addons,
    scan_flat_research,
    scan_completed_research,
    scan_research_levels,
];

pub fn compute_ownership(raw: &Value) -> OwnershipIndex {
    let mut index = OwnershipIndex::default();
    let Some(root) = raw.as_object() else {
        return index;
    };
    for adapter in ADAPTERS {
        adapter(root, &mut index);
    }
    index
}

fn scan_buildings(root: &Map<String, Value>, index: &mut OwnershipIndex) {
    if let Some(section) = root.get("bld") {
        scan_section(section, BUILDING_PREFIX, &mut index.max_level_by_series);
    }
}

fn scan_addons(root: &Map<String, Value>, index: &mut OwnershipIndex) {
    if let Some(section) = root.get("add") {
        scan_section(section, ADDON_PREFIX, &mut index.max_level_by_series);
    }
}

/// Shape 1: `rsd.<family>.l<N>` booleans, either top-level, under `rsd`, or
/// mixed into the `research` object.
fn scan_flat_research(root: &Map<String, Value>, index: &mut OwnershipIndex) {
    let sink = &mut index.completed_research_by_series;
    for (key, value) in root {
        if key.starts_with(RESEARCH_PREFIX) {
            record_entry(key, value, RESEARCH_PREFIX, sink);
        }
    }
    if let Some(section) = root.get("rsd") {
        scan_section(section, RESEARCH_PREFIX, sink);
    }
    if let Some(Value::Object(research)) = root.get("research") {
        for (key, value) in research {
            if key.starts_with(RESEARCH_PREFIX) {
                record_entry(key, value, RESEARCH_PREFIX, sink);
            }
        }
    }
}

/// Shape 2: `research.completed` as an array or a set-like map of tokens.
fn scan_completed_research(root: &Map<String, Value>, index: &mut OwnershipIndex) {
    if let Some(completed) = root.get("research").and_then(|r| r.get("completed")) {
        scan_token_list(completed, RESEARCH_PREFIX, &mut index.completed_research_by_series);
    }
}

/// Shape 3: `research` as `<family> -> level` (a number or `{level}` object).
fn scan_research_levels(root: &Map<String, Value>, index: &mut OwnershipIndex) {
    let Some(Value::Object(research)) = root.get("research") else {
        return;
    };
    for (key, value) in research {
        if key == "completed" || key.starts_with(RESEARCH_PREFIX) {
            continue;
        }
        record_entry(key, value, RESEARCH_PREFIX, &mut index.completed_research_by_series);
    }
}

fn scan_section(section: &Value, prefix: &str, sink: &mut BTreeMap<String, u32>) {
    match section {
        Value::Object(entries) => {
            for (key, value) in entries {
                if key == "completed" {
                    scan_token_list(value, prefix, sink);
                } else {
                    record_entry(key, value, prefix, sink);
                }
            }
        }
        Value::Array(_) => scan_token_list(section, prefix, sink),
        _ => {}
    }
}

fn scan_token_list(list: &Value, prefix: &str, sink: &mut BTreeMap<String, u32>) {
    match list {
        Value::Array(items) => {
            for item in items {
                if let Value::String(token) = item {
                    record_entry(token, &Value::Bool(true), prefix, sink);
                }
            }
        }
        Value::Object(entries) => {
            for (token, flag) in entries {
                record_entry(token, flag, prefix, sink);
            }
        }
        _ => {}
    }
}

fn record_entry(key: &str, value: &Value, prefix: &str, sink: &mut BTreeMap<String, u32>) {
    let key = key.trim().to_ascii_lowercase();
    let (family, suffix) = split_level(&key);
    let level = match suffix {
        LevelSuffix::Level(level) if is_truthy(value) => level,
        LevelSuffix::Level(_) => return,
        LevelSuffix::Missing => match level_value(value) {
            Some(level) => level,
            None => return,
        },
        LevelSuffix::Malformed => {
            debug!(key = %key, "skipping state key with malformed level suffix");
            return;
        }
    };
    bump(sink, series_key(prefix, family), level);
}

fn series_key(prefix: &str, family: &str) -> String {
    let family = family.trim().to_ascii_lowercase();
    if family.starts_with(prefix) {
        family
    } else {
        format!("{prefix}{family}")
    }
}

fn bump(sink: &mut BTreeMap<String, u32>, series: String, level: u32) {
    if level == 0 {
        return;
    }
    let entry = sink.entry(series).or_insert(0);
    *entry = (*entry).max(level);
}

/// Level carried by a value when the key has no `.lN` suffix.
fn level_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite() && *v >= 1.0).map(|v| v as u32),
        Value::Bool(true) => Some(1),
        Value::Object(fields) => match fields.get("level") {
            Some(level) => level_value(level),
            None => Some(1),
        },
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        _ => true,
    }
}
