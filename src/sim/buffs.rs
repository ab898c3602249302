use crate::sim::definitions::Definitions;
use crate::sim::resources::{canonical_resource_id, ResourceCategory, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuffKind {
    Resource,
    Speed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuffMode {
    Cost,
    Yield,
    Both,
}

impl BuffMode {
    pub fn affects_cost(self) -> bool {
        matches!(self, BuffMode::Cost | BuffMode::Both)
    }

    pub fn affects_yield(self) -> bool {
        matches!(self, BuffMode::Yield | BuffMode::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuffOp {
    Add,
    Subtract,
    Multiply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuffScope {
    All,
    Category(ResourceCategory),
    Resource(ResourceId),
}

impl BuffScope {
    pub fn matches(&self, resource: &ResourceId, category: Option<ResourceCategory>) -> bool {
        match self {
            BuffScope::All => true,
            BuffScope::Category(wanted) => category == Some(*wanted),
            BuffScope::Resource(id) => id == resource,
        }
    }
}

/// `"all"` or an explicit list of ids/tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    All,
    Only(Vec<String>),
}

impl Targets {
    pub fn matches_any<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> bool {
        match self {
            Targets::All => true,
            Targets::Only(list) => keys
                .into_iter()
                .any(|key| list.iter().any(|target| target.eq_ignore_ascii_case(key))),
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        let items: Vec<String> = match value {
            None | Some(Value::Null) => return Targets::All,
            Some(Value::String(text)) => text
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str())
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
            Some(_) => return Targets::All,
        };
        if items.is_empty() || items.iter().any(|item| item.eq_ignore_ascii_case("all")) {
            Targets::All
        } else {
            Targets::Only(items)
        }
    }
}

/// A normalized modifier. Built fresh on every collection pass and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BuffModifier {
    pub source_id: String,
    pub kind: BuffKind,
    pub mode: BuffMode,
    pub op: BuffOp,
    pub scope: BuffScope,
    pub applies_to: Targets,
    /// Action names a speed buff accelerates (`build`, `upgrade`, `produce`).
    pub actions: Targets,
    pub amount: f64,
}

/// A modifier as it appears in definitions or the server feed, before
/// casing, defaults and amount shape are normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBuff {
    #[serde(alias = "sourceId", alias = "source")]
    pub source_id: Option<String>,
    #[serde(alias = "type")]
    pub kind: Option<String>,
    pub mode: Option<String>,
    #[serde(alias = "operation")]
    pub op: Option<String>,
    #[serde(alias = "resource")]
    pub scope: Option<String>,
    #[serde(alias = "appliesTo")]
    pub applies_to: Option<Value>,
    pub actions: Option<Value>,
    #[serde(alias = "value")]
    pub amount: Option<Value>,
}

impl RawBuff {
    /// Normalizes casing, defaults and the amount shape. Returns `None` for
    /// kinds, modes or ops this engine does not know.
    pub fn normalize(&self, fallback_source: &str) -> Option<BuffModifier> {
        let source_id = self
            .source_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(fallback_source)
            .to_string();

        let kind = match lowered(&self.kind).as_deref() {
            None | Some("resource") | Some("res") => BuffKind::Resource,
            Some("speed") => BuffKind::Speed,
            Some(other) => {
                debug!(source = %source_id, kind = other, "dropping buff with unknown kind");
                return None;
            }
        };
        let mode = match lowered(&self.mode).as_deref() {
            None | Some("both") => BuffMode::Both,
            Some("cost") => BuffMode::Cost,
            Some("yield") => BuffMode::Yield,
            Some(other) => {
                debug!(source = %source_id, mode = other, "dropping buff with unknown mode");
                return None;
            }
        };
        let (amount, from_multiplier) = parse_amount(self.amount.as_ref());
        let op = match lowered(&self.op).as_deref() {
            None if from_multiplier => BuffOp::Multiply,
            None | Some("add") | Some("+") => BuffOp::Add,
            Some("subtract") | Some("sub") | Some("-") => BuffOp::Subtract,
            Some("multiply") | Some("mult") | Some("mul") | Some("*") => BuffOp::Multiply,
            Some(other) => {
                debug!(source = %source_id, op = other, "dropping buff with unknown op");
                return None;
            }
        };
        let scope = match lowered(&self.scope).as_deref() {
            None | Some("all") | Some("") => BuffScope::All,
            Some("solid") => BuffScope::Category(ResourceCategory::Solid),
            Some("liquid") => BuffScope::Category(ResourceCategory::Liquid),
            Some(id) => BuffScope::Resource(canonical_resource_id(id)),
        };

        Some(BuffModifier {
            source_id,
            kind,
            mode,
            op,
            scope,
            applies_to: Targets::from_value(self.applies_to.as_ref()),
            actions: Targets::from_value(self.actions.as_ref()),
            amount,
        })
    }
}

fn lowered(value: &Option<String>) -> Option<String> {
    value.as_ref().map(|v| v.trim().to_ascii_lowercase())
}

/// Returns the numeric amount and whether it came from a multiplier
/// descriptor. Anything non-finite or unreadable becomes `0`.
fn parse_amount(value: Option<&Value>) -> (f64, bool) {
    let (amount, from_multiplier) = match value {
        Some(Value::Number(n)) => (n.as_f64().unwrap_or(0.0), false),
        Some(Value::String(text)) => (text.trim().parse::<f64>().unwrap_or(0.0), false),
        Some(Value::Object(fields)) => {
            let is_fixed = fields
                .get("type")
                .and_then(Value::as_str)
                .map(|t| t.eq_ignore_ascii_case("fixed_multiplier"))
                .unwrap_or(false);
            match fields.get("multiplier").and_then(Value::as_f64) {
                Some(multiplier) if is_fixed => ((multiplier - 1.0) * 100.0, true),
                _ => (0.0, false),
            }
        }
        _ => (0.0, false),
    };
    if amount.is_finite() {
        (amount, from_multiplier)
    } else {
        (0.0, from_multiplier)
    }
}

/// Gathers every modifier attached to a definition, then the server's
/// active buffs. A later modifier replaces an earlier one with the same
/// `source_id`, so server buffs win over static ones.
pub fn collect(definitions: &Definitions, server_buffs: &[Value]) -> Vec<BuffModifier> {
    let mut collected = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut push = |buff: BuffModifier| match positions.get(&buff.source_id) {
        Some(&index) => collected[index] = buff,
        None => {
            positions.insert(buff.source_id.clone(), collected.len());
            collected.push(buff);
        }
    };

    for definition in definitions.iter() {
        for (index, raw) in definition.buffs.iter().enumerate() {
            if let Some(buff) = raw.normalize(&format!("{}#{index}", definition.id)) {
                push(buff);
            }
        }
    }

    for (index, value) in server_buffs.iter().enumerate() {
        match serde_json::from_value::<RawBuff>(value.clone()) {
            Ok(raw) => {
                if let Some(buff) = raw.normalize(&format!("server#{index}")) {
                    push(buff);
                }
            }
            Err(err) => debug!(index, error = %err, "skipping unreadable server buff"),
        }
    }

    collected
}
