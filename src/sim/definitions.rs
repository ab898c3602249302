use crate::sim::buffs::RawBuff;
use crate::sim::requirements::RequirementSpec;
use crate::sim::resources::{ResourceCatalog, ResourceId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCategory {
    #[default]
    Building,
    Addon,
    Research,
    Product,
}

impl ActionCategory {
    /// Context tag buffs use in `appliesTo`.
    pub fn tag(self) -> &'static str {
        match self {
            ActionCategory::Building => "buildings",
            ActionCategory::Addon => "addons",
            ActionCategory::Research => "research",
            ActionCategory::Product => "products",
        }
    }
}

/// One buildable, researchable or produceable thing from the static game data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definition {
    pub id: String,
    #[serde(default)]
    pub category: ActionCategory,
    #[serde(default)]
    pub price: BTreeMap<ResourceId, f64>,
    #[serde(default, alias = "requires")]
    pub requirements: Vec<String>,
    #[serde(default, alias = "durationSeconds")]
    pub duration_seconds: f64,
    #[serde(default, alias = "footprintDelta")]
    pub footprint: f64,
    /// Resources granted when the job completes.
    #[serde(default)]
    pub yields: BTreeMap<ResourceId, f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub buffs: Vec<RawBuff>,
}

impl Definition {
    pub fn requirement_spec(&self) -> RequirementSpec {
        RequirementSpec {
            id: self.id.clone(),
            category: self.category,
            price: self.price.clone(),
            prerequisite_tokens: self.requirements.clone(),
            base_duration_seconds: self.duration_seconds,
            footprint_delta: self.footprint,
            tags: self.tags.clone(),
        }
    }
}

/// The static game data: every action plus the category of every resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Definitions {
    #[serde(rename = "actions")]
    entries: Vec<Definition>,
    resources: ResourceCatalog,
}

impl Definitions {
    pub fn new(entries: Vec<Definition>) -> Self {
        Self {
            entries,
            resources: ResourceCatalog::default(),
        }
    }

    pub fn with_resources(mut self, resources: ResourceCatalog) -> Self {
        self.resources = resources;
        self
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading definitions {}", path.display()))?;
        ron::from_str(&content).with_context(|| format!("parsing definitions {}", path.display()))
    }

    pub fn get(&self, id: &str) -> Option<&Definition> {
        self.entries.iter().find(|def| def.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.entries.iter()
    }

    pub fn resources(&self) -> &ResourceCatalog {
        &self.resources
    }

    pub fn push(&mut self, definition: Definition) {
        self.entries.push(definition);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
