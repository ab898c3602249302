use anyhow::{Context, Result};
use serde_json::json;
use settlement_economy::sim::buffs::RawBuff;
use settlement_economy::sim::definitions::{ActionCategory, Definition, Definitions};
use settlement_economy::sim::game::GameState;
use settlement_economy::sim::resources::{ResourceCatalog, ResourceCategory};
use std::collections::BTreeMap;

/// Actions the headless run tries to start, in order.
pub const OPENING_MOVES: [&str; 3] = ["bld.sawmill.l2", "rsd.masonry.l1", "bld.kiln.l1"];

fn prices(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(id, amount)| (id.to_string(), *amount))
        .collect()
}

fn raw_buff(value: serde_json::Value) -> Result<RawBuff> {
    serde_json::from_value(value).context("demo buff")
}

fn resources() -> ResourceCatalog {
    ResourceCatalog::default()
        .with("wood", ResourceCategory::Solid)
        .with("stone", ResourceCategory::Solid)
        .with("plank", ResourceCategory::Solid)
        .with("brick", ResourceCategory::Solid)
        .with("clay", ResourceCategory::Solid)
        .with("water", ResourceCategory::Liquid)
}

pub fn definitions() -> Result<Definitions> {
    let definitions = Definitions::new(vec![
        Definition {
            id: "bld.sawmill.l1".to_string(),
            category: ActionCategory::Building,
            price: prices(&[("res.wood", 20.0)]),
            duration_seconds: 3.0,
            footprint: -2.0,
            yields: prices(&[("res.plank", 4.0)]),
            tags: vec!["industry".to_string()],
            ..Definition::default()
        },
        Definition {
            id: "bld.sawmill.l2".to_string(),
            category: ActionCategory::Building,
            price: prices(&[("res.wood", 30.0), ("res.stone", 5.0)]),
            requirements: vec!["bld.sawmill.l1".to_string()],
            duration_seconds: 4.0,
            footprint: -2.0,
            yields: prices(&[("res.plank", 6.0)]),
            tags: vec!["industry".to_string()],
            buffs: vec![raw_buff(json!({
                "sourceId": "sawmill-output",
                "mode": "yield",
                "op": "multiply",
                "scope": "res.plank",
                "amount": 20,
                "appliesTo": ["industry"]
            }))?],
        },
        Definition {
            id: "rsd.tools.l1".to_string(),
            category: ActionCategory::Research,
            price: prices(&[("res.plank", 5.0)]),
            duration_seconds: 2.0,
            buffs: vec![raw_buff(json!({
                "sourceId": "tools-speed",
                "kind": "speed",
                "actions": ["upgrade"],
                "amount": 25
            }))?],
            ..Definition::default()
        },
        Definition {
            id: "rsd.masonry.l1".to_string(),
            category: ActionCategory::Research,
            price: prices(&[("res.stone", 10.0)]),
            requirements: vec!["rsd.tools".to_string()],
            duration_seconds: 3.0,
            ..Definition::default()
        },
        Definition {
            id: "bld.kiln.l1".to_string(),
            category: ActionCategory::Building,
            price: prices(&[("res.stone", 15.0), ("res.water", 2.0)]),
            requirements: vec!["rsd.masonry.l1".to_string(), "res.clay.l5".to_string()],
            duration_seconds: 5.0,
            footprint: -3.0,
            yields: prices(&[("res.brick", 8.0)]),
            ..Definition::default()
        },
    ]);
    Ok(definitions.with_resources(resources()))
}

/// A small settlement that owns a first sawmill and basic tools.
pub fn starting_state() -> Result<GameState> {
    serde_json::from_value(json!({
        "bld": {"sawmill.l1": {"level": 1}},
        "research": {"tools": 1},
        "inventory": {
            "solid": {"res.wood": 60, "res.stone": 20},
            "liquid": {"res.water": 10},
            "capacity": {"total": 12, "consumed": 3}
        },
        "activeBuffs": [
            {"sourceId": "harvest-festival", "mode": "cost", "op": "multiply", "amount": 10, "appliesTo": "buildings"}
        ]
    }))
    .context("demo starting state")
}
