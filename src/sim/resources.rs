use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Resource identifiers are kept in their wire form, e.g. `res.wood`.
pub type ResourceId = String;

pub const RESOURCE_PREFIX: &str = "res.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    Solid,
    Liquid,
}

/// Normalizes `wood` and `res.wood` to the same id.
pub fn canonical_resource_id(raw: &str) -> ResourceId {
    let trimmed = raw.trim();
    if trimmed.starts_with(RESOURCE_PREFIX) {
        trimmed.to_string()
    } else {
        format!("{RESOURCE_PREFIX}{trimmed}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub total: f64,
    pub consumed: f64,
}

impl Capacity {
    pub fn new(total: f64) -> Self {
        Self {
            total,
            consumed: 0.0,
        }
    }

    pub fn free_capacity(&self) -> f64 {
        (self.total - self.consumed).max(0.0)
    }
}

/// The player's resource stores plus the shared footprint capacity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default, deserialize_with = "canonical_amounts")]
    pub solid: BTreeMap<ResourceId, f64>,
    #[serde(default, deserialize_with = "canonical_amounts")]
    pub liquid: BTreeMap<ResourceId, f64>,
    #[serde(default)]
    pub capacity: Capacity,
}

impl Inventory {
    /// Total held across both stores.
    pub fn have(&self, id: &str) -> f64 {
        let solid = self.solid.get(id).copied().unwrap_or(0.0);
        let liquid = self.liquid.get(id).copied().unwrap_or(0.0);
        sanitize(solid) + sanitize(liquid)
    }

    /// Category of a resource tracked by exactly one store. `None` when
    /// neither or both stores track it.
    pub fn category_of(&self, id: &str) -> Option<ResourceCategory> {
        match (self.solid.contains_key(id), self.liquid.contains_key(id)) {
            (true, false) => Some(ResourceCategory::Solid),
            (false, true) => Some(ResourceCategory::Liquid),
            _ => None,
        }
    }

    /// Store unlabelled gains go to: the one already holding the resource,
    /// liquid if both do, solid otherwise.
    fn tracking_store(&self, id: &str) -> ResourceCategory {
        if self.liquid.contains_key(id) {
            ResourceCategory::Liquid
        } else {
            ResourceCategory::Solid
        }
    }

    pub fn with_solid(mut self, id: &str, amount: f64) -> Self {
        self.solid.insert(canonical_resource_id(id), amount);
        self
    }

    pub fn with_liquid(mut self, id: &str, amount: f64) -> Self {
        self.liquid.insert(canonical_resource_id(id), amount);
        self
    }

    /// Applies every entry of the delta. Removals drain the named store
    /// first and then the other one; no store ever goes negative.
    pub fn apply_delta(&mut self, delta: &ResourceDelta) {
        for entry in &delta.entries {
            let id = canonical_resource_id(&entry.resource);
            let amount = sanitize(entry.amount);
            if amount == 0.0 {
                continue;
            }
            let category = entry.store.unwrap_or_else(|| self.tracking_store(&id));
            if amount > 0.0 {
                *self.store_mut(category).entry(id).or_insert(0.0) += amount;
            } else {
                let mut remaining = -amount;
                for store in [category, other_category(category)] {
                    if remaining <= 0.0 {
                        break;
                    }
                    if let Some(held) = self.store_mut(store).get_mut(&id) {
                        let taken = held.max(0.0).min(remaining);
                        *held -= taken;
                        remaining -= taken;
                    }
                }
            }
        }
    }

    fn store_mut(&mut self, category: ResourceCategory) -> &mut BTreeMap<ResourceId, f64> {
        match category {
            ResourceCategory::Solid => &mut self.solid,
            ResourceCategory::Liquid => &mut self.liquid,
        }
    }
}

fn other_category(category: ResourceCategory) -> ResourceCategory {
    match category {
        ResourceCategory::Solid => ResourceCategory::Liquid,
        ResourceCategory::Liquid => ResourceCategory::Solid,
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Feeds may key stores by bare names; `wood` and `res.wood` are merged.
fn canonical_amounts<'de, D>(deserializer: D) -> Result<BTreeMap<ResourceId, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, f64>::deserialize(deserializer)?;
    let mut amounts = BTreeMap::new();
    for (id, amount) in raw {
        *amounts.entry(canonical_resource_id(&id)).or_insert(0.0) += amount;
    }
    Ok(amounts)
}

/// The static solid/liquid classification of resources. Category-scoped
/// buffs match against this, not against whatever the player holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, ResourceCategory>",
    into = "BTreeMap<String, ResourceCategory>"
)]
pub struct ResourceCatalog {
    categories: BTreeMap<ResourceId, ResourceCategory>,
}

impl From<BTreeMap<String, ResourceCategory>> for ResourceCatalog {
    fn from(raw: BTreeMap<String, ResourceCategory>) -> Self {
        Self {
            categories: raw
                .into_iter()
                .map(|(id, category)| (canonical_resource_id(&id), category))
                .collect(),
        }
    }
}

impl From<ResourceCatalog> for BTreeMap<String, ResourceCategory> {
    fn from(catalog: ResourceCatalog) -> Self {
        catalog.categories
    }
}

impl ResourceCatalog {
    pub fn with(mut self, id: &str, category: ResourceCategory) -> Self {
        self.insert(id, category);
        self
    }

    pub fn insert(&mut self, id: &str, category: ResourceCategory) {
        self.categories.insert(canonical_resource_id(id), category);
    }

    pub fn get(&self, id: &str) -> Option<ResourceCategory> {
        self.categories.get(&canonical_resource_id(id)).copied()
    }

    /// Declared category first; unknown ids fall back to the store that
    /// tracks them.
    pub fn category_of(&self, id: &str, inventory: &Inventory) -> Option<ResourceCategory> {
        self.get(id)
            .or_else(|| inventory.category_of(&canonical_resource_id(id)))
    }

    /// Labels unlabelled delta entries with their declared store.
    pub fn route(&self, delta: &ResourceDelta) -> ResourceDelta {
        ResourceDelta {
            entries: delta
                .entries
                .iter()
                .map(|entry| DeltaEntry {
                    store: entry.store.or_else(|| self.get(&entry.resource)),
                    ..entry.clone()
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEntry {
    #[serde(alias = "resourceId", alias = "res")]
    pub resource: ResourceId,
    pub amount: f64,
    #[serde(default)]
    pub store: Option<ResourceCategory>,
}

/// Signed resource changes: completion payouts, locked costs, refunds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "DeltaWire", into = "DeltaWire")]
pub struct ResourceDelta {
    pub entries: Vec<DeltaEntry>,
}

/// The backend sends deltas either as entry lists or as `{res.x: amount}` maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DeltaWire {
    List(Vec<DeltaEntry>),
    Map(BTreeMap<ResourceId, f64>),
}

impl From<DeltaWire> for ResourceDelta {
    fn from(wire: DeltaWire) -> Self {
        match wire {
            DeltaWire::List(entries) => Self { entries },
            DeltaWire::Map(map) => Self {
                entries: map
                    .into_iter()
                    .map(|(resource, amount)| DeltaEntry {
                        resource: canonical_resource_id(&resource),
                        amount,
                        store: None,
                    })
                    .collect(),
            },
        }
    }
}

impl From<ResourceDelta> for DeltaWire {
    fn from(delta: ResourceDelta) -> Self {
        DeltaWire::List(delta.entries)
    }
}

impl ResourceDelta {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn gain(mut self, resource: &str, amount: f64) -> Self {
        self.entries.push(DeltaEntry {
            resource: canonical_resource_id(resource),
            amount,
            store: None,
        });
        self
    }

    /// Turns a list of costs into removals.
    pub fn spend(costs: &[DeltaEntry]) -> Self {
        Self {
            entries: costs
                .iter()
                .map(|cost| DeltaEntry {
                    resource: cost.resource.clone(),
                    amount: -cost.amount.abs(),
                    store: cost.store,
                })
                .collect(),
        }
    }

    /// Turns a list of refunds into additions.
    pub fn refund(refunds: &[DeltaEntry]) -> Self {
        Self {
            entries: refunds
                .iter()
                .map(|refund| DeltaEntry {
                    resource: refund.resource.clone(),
                    amount: refund.amount.abs(),
                    store: refund.store,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn have_sums_both_stores() {
        let inventory = Inventory::default()
            .with_solid("wood", 12.0)
            .with_liquid("res.wood", 3.0);
        assert_eq!(inventory.have("res.wood"), 15.0);
        assert_eq!(inventory.have("res.stone"), 0.0);
    }

    #[test]
    fn removals_spill_into_other_store_and_stop_at_zero() {
        let mut inventory = Inventory::default()
            .with_solid("water", 4.0)
            .with_liquid("water", 10.0);
        let delta = ResourceDelta::default().gain("water", -12.0);
        inventory.apply_delta(&delta);
        assert_eq!(inventory.liquid["res.water"], 0.0);
        assert_eq!(inventory.solid["res.water"], 2.0);

        inventory.apply_delta(&ResourceDelta::default().gain("water", -50.0));
        assert_eq!(inventory.have("res.water"), 0.0);
    }

    #[test]
    fn gains_land_in_tracking_store() {
        let mut inventory = Inventory::default().with_liquid("oil", 1.0);
        inventory.apply_delta(&ResourceDelta::default().gain("oil", 4.0).gain("iron", 2.0));
        assert_eq!(inventory.liquid["res.oil"], 5.0);
        assert_eq!(inventory.solid["res.iron"], 2.0);
    }

    #[test]
    fn delta_accepts_map_shape() {
        let delta: ResourceDelta = serde_json::from_str(r#"{"wood": 3, "res.stone": -1}"#)
            .expect("map delta should parse");
        assert_eq!(delta.entries.len(), 2);
        assert!(delta.entries.iter().any(|e| e.resource == "res.wood" && e.amount == 3.0));
    }

    #[test]
    fn feed_inventory_keys_are_canonical() {
        let inventory: Inventory = serde_json::from_str(
            r#"{"solid": {"wood": 50, "res.wood": 5}, "liquid": {"water": 2}}"#,
        )
        .expect("inventory should parse");
        assert_eq!(inventory.have("res.wood"), 55.0);
        assert_eq!(inventory.have("res.water"), 2.0);
        assert!(!inventory.solid.contains_key("wood"));
    }

    #[test]
    fn catalog_category_wins_over_holdings() {
        let catalog: ResourceCatalog =
            serde_json::from_str(r#"{"stone": "solid", "res.oil": "liquid"}"#).expect("catalog");
        let empty = Inventory::default();
        assert_eq!(catalog.category_of("res.stone", &empty), Some(ResourceCategory::Solid));

        let both = Inventory::default().with_solid("iron", 1.0).with_liquid("iron", 1.0);
        assert_eq!(catalog.category_of("res.iron", &both), None);
        let liquid_stone = Inventory::default().with_liquid("stone", 3.0);
        assert_eq!(
            catalog.category_of("res.stone", &liquid_stone),
            Some(ResourceCategory::Solid)
        );
        assert_eq!(
            catalog.category_of("res.clay", &Inventory::default().with_liquid("clay", 1.0)),
            Some(ResourceCategory::Liquid)
        );
    }

    #[test]
    fn routed_deltas_land_in_declared_store() {
        let catalog = ResourceCatalog::default().with("oil", ResourceCategory::Liquid);
        let mut inventory = Inventory::default();
        let delta = catalog.route(&ResourceDelta::default().gain("oil", 3.0).gain("iron", 1.0));
        inventory.apply_delta(&delta);
        assert_eq!(inventory.liquid["res.oil"], 3.0);
        assert_eq!(inventory.solid["res.iron"], 1.0);
    }

    #[test]
    fn free_capacity_never_negative() {
        let capacity = Capacity {
            total: 10.0,
            consumed: 14.0,
        };
        assert_eq!(capacity.free_capacity(), 0.0);
    }
}
