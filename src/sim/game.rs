use super::buffs::{self, BuffModifier};
use super::definitions::Definitions;
use super::jobs::RunningJob;
use super::modifiers::{ModifierApplier, DEFAULT_SPEED_FLOOR};
use super::ownership::{self, OwnershipIndex};
use super::requirements::{self, RequirementSpec, RequirementVerdict};
use super::resources::{canonical_resource_id, Inventory, ResourceDelta, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// One snapshot of the player state feed. Everything the engine does not
/// model explicitly (ownership sections in their many shapes) stays in
/// `raw` and is read through the ownership adapters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameState {
    pub inventory: Inventory,
    pub running_jobs: Vec<RunningJob>,
    pub active_buffs: Vec<Value>,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl GameState {
    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }
}

/// The player's economy as seen by this client: the latest state feed plus
/// the ownership index and buff list derived from it.
pub struct Game {
    definitions: Arc<Definitions>,
    state: GameState,
    ownership: OwnershipIndex,
    buffs: Vec<BuffModifier>,
    speed_floor: f64,
}

impl Game {
    pub fn new(definitions: Arc<Definitions>, state: GameState) -> Self {
        let ownership = ownership_of(&state);
        let buffs = buffs::collect(&definitions, &state.active_buffs);
        Self {
            definitions,
            state,
            ownership,
            buffs,
            speed_floor: DEFAULT_SPEED_FLOOR,
        }
    }

    pub fn with_speed_floor(mut self, speed_floor: f64) -> Self {
        self.speed_floor = speed_floor;
        self
    }

    /// Takes a fresh state feed. The buff list is only rebuilt when the
    /// server's active buffs actually changed.
    pub fn set_state(&mut self, state: GameState) {
        if state.active_buffs != self.state.active_buffs {
            self.buffs = buffs::collect(&self.definitions, &state.active_buffs);
            debug!(buffs = self.buffs.len(), "rebuilt modifier list");
        }
        self.ownership = ownership_of(&state);
        self.state = state;
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn inventory(&self) -> &Inventory {
        &self.state.inventory
    }

    pub fn ownership(&self) -> &OwnershipIndex {
        &self.ownership
    }

    pub fn buffs(&self) -> &[BuffModifier] {
        &self.buffs
    }

    pub fn definitions(&self) -> &Arc<Definitions> {
        &self.definitions
    }

    pub fn applier(&self) -> ModifierApplier<'_> {
        ModifierApplier::new(&self.buffs).with_speed_floor(self.speed_floor)
    }

    /// Verdict for a known action, `None` when the id is not defined.
    pub fn evaluate(&self, action_id: &str) -> Option<RequirementVerdict> {
        let definition = self.definitions.get(action_id)?;
        Some(self.evaluate_spec(&definition.requirement_spec()))
    }

    pub fn evaluate_spec(&self, spec: &RequirementSpec) -> RequirementVerdict {
        requirements::evaluate(
            spec,
            &self.ownership,
            &self.state.inventory,
            self.definitions.resources(),
            &self.applier(),
        )
    }

    /// Buffed yields of an action, as shown before the player commits.
    pub fn predicted_yield(&self, action_id: &str) -> BTreeMap<ResourceId, f64> {
        let Some(definition) = self.definitions.get(action_id) else {
            return BTreeMap::new();
        };
        let ctx = definition.requirement_spec().match_context();
        let applier = self.applier();
        let catalog = self.definitions.resources();
        definition
            .yields
            .iter()
            .map(|(raw_id, &amount)| {
                let id = canonical_resource_id(raw_id);
                let category = catalog.category_of(&id, &self.state.inventory);
                let buffed = applier.apply_yield(amount, &id, category, &ctx);
                (id, buffed)
            })
            .collect()
    }

    /// Unlabelled entries land in the store their resource is declared in.
    pub fn apply_delta(&mut self, delta: &ResourceDelta) {
        let routed = self.definitions.resources().route(delta);
        self.state.inventory.apply_delta(&routed);
    }
}

fn ownership_of(state: &GameState) -> OwnershipIndex {
    ownership::compute_ownership(&Value::Object(state.raw.clone()))
}
