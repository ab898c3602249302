use crate::sim::definitions::ActionCategory;
use crate::sim::modifiers::{ActionKind, MatchContext, ModifierApplier};
use crate::sim::ownership::OwnershipIndex;
use crate::sim::resources::{canonical_resource_id, Inventory, ResourceCatalog, ResourceId};
use crate::sim::tokens::{parse_requirements, split_level, LevelSuffix, Requirement, TokenKind};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Tolerance for float comparisons against held amounts.
const EPSILON: f64 = 1e-9;

/// One purchasable, researchable or produceable action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequirementSpec {
    pub id: String,
    pub category: ActionCategory,
    pub price: BTreeMap<ResourceId, f64>,
    pub prerequisite_tokens: Vec<String>,
    pub base_duration_seconds: f64,
    /// Negative consumes shared capacity, positive grants it.
    pub footprint_delta: f64,
    pub tags: Vec<String>,
}

impl RequirementSpec {
    pub fn match_context(&self) -> MatchContext {
        let mut keys = vec![self.id.clone(), self.category.tag().to_string()];
        keys.extend(self.tags.iter().cloned());
        MatchContext::new(keys)
    }

    /// `bld.sawmill.l3` -> `bld.sawmill`.
    pub fn series(&self) -> &str {
        match split_level(&self.id) {
            (series, LevelSuffix::Level(_)) => series,
            _ => &self.id,
        }
    }

    pub fn action_kind(&self, ownership: &OwnershipIndex) -> ActionKind {
        match self.category {
            ActionCategory::Research | ActionCategory::Product => ActionKind::Produce,
            ActionCategory::Building | ActionCategory::Addon => {
                if ownership.owns(self.series()) {
                    ActionKind::Upgrade
                } else {
                    ActionKind::Build
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Shortfall {
    pub have: f64,
    pub need: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementVerdict {
    pub affordable: bool,
    pub prerequisites_ok: bool,
    pub capacity_ok: bool,
    pub all_ok: bool,
    pub buffed_price: BTreeMap<ResourceId, f64>,
    pub buffed_duration_seconds: f64,
    pub shortfalls: BTreeMap<ResourceId, Shortfall>,
    pub missing_prerequisites: Vec<String>,
    pub action_kind: &'static str,
}

/// Decides whether `spec` can start right now. Never fails: malformed
/// terms only mark their own check unsatisfied.
pub fn evaluate(
    spec: &RequirementSpec,
    ownership: &OwnershipIndex,
    inventory: &Inventory,
    catalog: &ResourceCatalog,
    applier: &ModifierApplier<'_>,
) -> RequirementVerdict {
    let ctx = spec.match_context();

    let mut affordable = true;
    let mut buffed_price = BTreeMap::new();
    let mut shortfalls = BTreeMap::new();
    for (raw_id, &amount) in &spec.price {
        let id = canonical_resource_id(raw_id);
        let have = inventory.have(&id);
        if !amount.is_finite() {
            debug!(action = %spec.id, resource = %id, "price entry is not a finite number");
            affordable = false;
            shortfalls.insert(id, Shortfall { have, need: f64::INFINITY });
            continue;
        }
        let need = applier.apply_cost(amount, &id, catalog.category_of(&id, inventory), &ctx);
        if have + EPSILON < need {
            affordable = false;
            shortfalls.insert(id.clone(), Shortfall { have, need });
        }
        buffed_price.insert(id, need);
    }

    let mut missing_prerequisites = Vec::new();
    for requirement in parse_requirements(&spec.prerequisite_tokens) {
        if !is_satisfied(&requirement, ownership, inventory) {
            missing_prerequisites.push(describe(&requirement));
        }
    }
    let prerequisites_ok = missing_prerequisites.is_empty();

    let capacity_ok = if spec.footprint_delta < 0.0 {
        let needed = spec.footprint_delta.abs();
        inventory.capacity.free_capacity() + EPSILON >= needed
    } else {
        // grants capacity, or a malformed (NaN) delta that cannot consume any
        !spec.footprint_delta.is_nan()
    };

    let action_kind = spec.action_kind(ownership);
    let buffed_duration_seconds = applier.apply_speed(spec.base_duration_seconds, action_kind, &ctx);

    RequirementVerdict {
        affordable,
        prerequisites_ok,
        capacity_ok,
        all_ok: affordable && prerequisites_ok && capacity_ok,
        buffed_price,
        buffed_duration_seconds,
        shortfalls,
        missing_prerequisites,
        action_kind: action_kind.name(),
    }
}

fn is_satisfied(requirement: &Requirement, ownership: &OwnershipIndex, inventory: &Inventory) -> bool {
    match requirement {
        Requirement::Known {
            kind: TokenKind::Resource,
            series,
            level,
        } => inventory.have(series) + EPSILON >= f64::from(*level),
        Requirement::Known {
            kind,
            series,
            level,
        } => ownership.level_of(*kind, series) >= *level,
        Requirement::Unknown(token) => {
            debug!(token = %token, "unrecognized requirement token treated as unmet");
            false
        }
    }
}

fn describe(requirement: &Requirement) -> String {
    match requirement {
        Requirement::Known { series, level, .. } => format!("{series}.l{level}"),
        Requirement::Unknown(token) => token.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::buffs::{BuffKind, BuffMode, BuffModifier, BuffOp, BuffScope, Targets};
    use crate::sim::ownership::compute_ownership;
    use crate::sim::resources::{Capacity, ResourceCategory};
    use serde_json::json;

    fn spec() -> RequirementSpec {
        RequirementSpec {
            id: "bld.sawmill.l2".to_string(),
            category: ActionCategory::Building,
            price: BTreeMap::from([("res.wood".to_string(), 10.0)]),
            prerequisite_tokens: vec!["bld.sawmill.l1, rsd.tools".to_string()],
            base_duration_seconds: 100.0,
            footprint_delta: -2.0,
            tags: Vec::new(),
        }
    }

    fn ownership() -> OwnershipIndex {
        compute_ownership(&json!({
            "bld": {"sawmill.l1": true},
            "research": {"tools": 1}
        }))
    }

    fn inventory(wood: f64, free: f64) -> Inventory {
        let mut inventory = Inventory::default().with_solid("wood", wood);
        inventory.capacity = Capacity {
            total: 10.0,
            consumed: 10.0 - free,
        };
        inventory
    }

    fn catalog() -> ResourceCatalog {
        ResourceCatalog::default()
            .with("wood", ResourceCategory::Solid)
            .with("stone", ResourceCategory::Solid)
    }

    fn cost_buff(amount: f64) -> BuffModifier {
        BuffModifier {
            source_id: "cost".to_string(),
            kind: BuffKind::Resource,
            mode: BuffMode::Cost,
            op: BuffOp::Multiply,
            scope: BuffScope::All,
            applies_to: Targets::All,
            actions: Targets::All,
            amount,
        }
    }

    #[test]
    fn buffed_price_makes_action_affordable() {
        let buffs = [cost_buff(20.0)];
        let applier = ModifierApplier::new(&buffs);
        let verdict = evaluate(&spec(), &ownership(), &inventory(8.0, 5.0), &catalog(), &applier);
        assert!((verdict.buffed_price["res.wood"] - 8.0).abs() < 1e-9);
        assert!(verdict.affordable);
        assert!(verdict.prerequisites_ok);
        assert!(verdict.capacity_ok);
        assert!(verdict.all_ok);
        assert_eq!(verdict.action_kind, "upgrade");
    }

    #[test]
    fn shortfall_recorded_with_have_and_need() {
        let applier = ModifierApplier::new(&[]);
        let verdict = evaluate(&spec(), &ownership(), &inventory(3.0, 5.0), &catalog(), &applier);
        assert!(!verdict.affordable);
        assert!(!verdict.all_ok);
        assert_eq!(verdict.shortfalls["res.wood"], Shortfall { have: 3.0, need: 10.0 });
    }

    #[test]
    fn unknown_and_unmet_tokens_block() {
        let mut spec = spec();
        spec.prerequisite_tokens = vec!["bld.sawmill.l2 pol.tax".to_string()];
        let applier = ModifierApplier::new(&[]);
        let verdict = evaluate(&spec, &ownership(), &inventory(50.0, 5.0), &catalog(), &applier);
        assert!(!verdict.prerequisites_ok);
        assert_eq!(verdict.missing_prerequisites, vec!["bld.sawmill.l2", "pol.tax"]);
    }

    #[test]
    fn capacity_only_checked_for_consuming_actions() {
        let applier = ModifierApplier::new(&[]);
        let verdict = evaluate(&spec(), &ownership(), &inventory(50.0, 1.0), &catalog(), &applier);
        assert!(!verdict.capacity_ok);

        let mut granting = spec();
        granting.footprint_delta = 4.0;
        let inventory = inventory(50.0, 0.0);
        let verdict = evaluate(&granting, &ownership(), &inventory, &catalog(), &applier);
        assert!(verdict.capacity_ok);
    }

    #[test]
    fn malformed_price_degrades_only_affordability() {
        let mut spec = spec();
        spec.price.insert("res.stone".to_string(), f64::NAN);
        let applier = ModifierApplier::new(&[]);
        let verdict = evaluate(&spec, &ownership(), &inventory(50.0, 5.0), &catalog(), &applier);
        assert!(!verdict.affordable);
        assert!(verdict.prerequisites_ok);
        assert!(verdict.capacity_ok);
        assert!(verdict.shortfalls.contains_key("res.stone"));
    }

    #[test]
    fn research_is_produce_and_fresh_building_is_build() {
        let mut research = spec();
        research.id = "rsd.optics.l1".to_string();
        research.category = ActionCategory::Research;
        assert_eq!(research.action_kind(&ownership()), ActionKind::Produce);

        let mut fresh = spec();
        fresh.id = "bld.kiln.l1".to_string();
        assert_eq!(fresh.action_kind(&ownership()), ActionKind::Build);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let buffs = [cost_buff(20.0)];
        let applier = ModifierApplier::new(&buffs);
        let first = evaluate(&spec(), &ownership(), &inventory(9.0, 5.0), &catalog(), &applier);
        let second = evaluate(&spec(), &ownership(), &inventory(9.0, 5.0), &catalog(), &applier);
        assert_eq!(first, second);
    }

    #[test]
    fn resource_tokens_check_inventory() {
        let mut spec = spec();
        spec.prerequisite_tokens = vec!["res.wood.l20".to_string()];
        let applier = ModifierApplier::new(&[]);
        let short = evaluate(&spec, &ownership(), &inventory(10.0, 5.0), &catalog(), &applier);
        let enough = evaluate(&spec, &ownership(), &inventory(25.0, 5.0), &catalog(), &applier);
        assert!(!short.prerequisites_ok);
        assert!(enough.prerequisites_ok);
    }

    #[test]
    fn category_scope_follows_catalog_not_holdings() {
        let mut solid_only = cost_buff(50.0);
        solid_only.scope = BuffScope::Category(ResourceCategory::Solid);
        let buffs = [solid_only];
        let applier = ModifierApplier::new(&buffs);
        let mut spec = spec();
        spec.price = BTreeMap::from([("res.stone".to_string(), 10.0)]);

        let unheld = evaluate(&spec, &ownership(), &inventory(0.0, 5.0), &catalog(), &applier);
        let held = Inventory::default().with_solid("stone", 2.0);
        let held = evaluate(&spec, &ownership(), &held, &catalog(), &applier);
        assert_eq!(unheld.buffed_price["res.stone"], 5.0);
        assert_eq!(held.buffed_price["res.stone"], 5.0);
        assert_eq!(unheld.shortfalls["res.stone"], Shortfall { have: 0.0, need: 5.0 });

        let liquid_too = Inventory::default()
            .with_solid("stone", 1.0)
            .with_liquid("stone", 1.0);
        let verdict = evaluate(&spec, &ownership(), &liquid_too, &catalog(), &applier);
        assert_eq!(verdict.buffed_price["res.stone"], 5.0);
    }
}
