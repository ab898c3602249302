use crate::sim::buffs::{BuffKind, BuffModifier, BuffOp};
use crate::sim::resources::{ResourceCategory, ResourceId};

/// Durations never drop below this share of their base.
pub const DEFAULT_SPEED_FLOOR: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Build,
    Upgrade,
    Produce,
}

impl ActionKind {
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Build => "build",
            ActionKind::Upgrade => "upgrade",
            ActionKind::Produce => "produce",
        }
    }
}

/// Keys a buff's `appliesTo` list is matched against: the action id plus
/// its context tags (`buildings`, `research`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchContext {
    keys: Vec<String>,
}

impl MatchContext {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// Applies a collected buff list to base costs, yields and durations.
#[derive(Debug, Clone, Copy)]
pub struct ModifierApplier<'a> {
    buffs: &'a [BuffModifier],
    speed_floor: f64,
}

impl<'a> ModifierApplier<'a> {
    pub fn new(buffs: &'a [BuffModifier]) -> Self {
        Self {
            buffs,
            speed_floor: DEFAULT_SPEED_FLOOR,
        }
    }

    pub fn with_speed_floor(mut self, floor: f64) -> Self {
        if floor.is_finite() {
            self.speed_floor = floor.clamp(0.0, 1.0);
        }
        self
    }

    /// A cost buff amount of `10` means 10% cheaper. Additive amounts are
    /// summed before the multiplier product is taken.
    pub fn apply_cost(
        &self,
        base: f64,
        resource: &ResourceId,
        category: Option<ResourceCategory>,
        ctx: &MatchContext,
    ) -> f64 {
        if !base.is_finite() || base <= 0.0 {
            return 0.0;
        }
        let mut value = base;
        let mut factor = 1.0;
        for buff in self.resource_buffs(resource, category, ctx, true) {
            match buff.op {
                BuffOp::Add => value += buff.amount,
                BuffOp::Subtract => value -= buff.amount,
                BuffOp::Multiply => factor *= 1.0 - buff.amount / 100.0,
            }
        }
        (value * factor).max(0.0)
    }

    /// A yield buff amount of `10` means 10% more. Every subtraction is
    /// floored at zero before the next term is applied.
    pub fn apply_yield(
        &self,
        base: f64,
        resource: &ResourceId,
        category: Option<ResourceCategory>,
        ctx: &MatchContext,
    ) -> f64 {
        if !base.is_finite() {
            return 0.0;
        }
        let mut value = base.max(0.0);
        let mut factor = 1.0;
        for buff in self.resource_buffs(resource, category, ctx, false) {
            match buff.op {
                BuffOp::Add => value += buff.amount,
                BuffOp::Subtract => value = (value - buff.amount).max(0.0),
                BuffOp::Multiply => factor *= (1.0 + buff.amount / 100.0).max(0.0),
            }
        }
        (value * factor).max(0.0)
    }

    /// A speed buff amount of `10` means 10% faster. The combined
    /// multiplier is clamped to the speed floor.
    pub fn apply_speed(&self, base: f64, action: ActionKind, ctx: &MatchContext) -> f64 {
        if !base.is_finite() || base <= 0.0 {
            return 0.0;
        }
        let factor = self
            .buffs
            .iter()
            .filter(|buff| buff.kind == BuffKind::Speed && is_effective(buff))
            .filter(|buff| buff.actions.matches_any([action.name()]))
            .filter(|buff| buff.applies_to.matches_any(ctx.keys()))
            .map(|buff| (1.0 - buff.amount / 100.0).max(0.0))
            .product::<f64>();
        base * factor.max(self.speed_floor)
    }

    fn resource_buffs<'b>(
        &'b self,
        resource: &'b ResourceId,
        category: Option<ResourceCategory>,
        ctx: &'b MatchContext,
        cost: bool,
    ) -> impl Iterator<Item = &'a BuffModifier> + 'b {
        self.buffs.iter().filter(move |buff| {
            buff.kind == BuffKind::Resource
                && is_effective(buff)
                && if cost {
                    buff.mode.affects_cost()
                } else {
                    buff.mode.affects_yield()
                }
                && buff.scope.matches(resource, category)
                && buff.applies_to.matches_any(ctx.keys())
        })
    }
}

/// Zero and non-finite amounts are no-ops.
fn is_effective(buff: &BuffModifier) -> bool {
    buff.amount.is_finite() && buff.amount != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::buffs::{BuffMode, BuffScope, Targets};

    fn buff(kind: BuffKind, mode: BuffMode, op: BuffOp, amount: f64) -> BuffModifier {
        BuffModifier {
            source_id: format!("{kind:?}-{mode:?}-{op:?}-{amount}"),
            kind,
            mode,
            op,
            scope: BuffScope::All,
            applies_to: Targets::All,
            actions: Targets::All,
            amount,
        }
    }

    fn wood() -> ResourceId {
        "res.wood".to_string()
    }

    fn ctx() -> MatchContext {
        MatchContext::new(["bld.sawmill.l1", "buildings"])
    }

    #[test]
    fn twenty_percent_cost_buff() {
        let buffs = [buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Multiply, 20.0)];
        let applier = ModifierApplier::new(&buffs);
        let cost = applier.apply_cost(10.0, &wood(), None, &ctx());
        assert!((cost - 8.0).abs() < 1e-9);
    }

    #[test]
    fn additive_terms_are_summed_before_multiplying() {
        let buffs = [
            buff(BuffKind::Resource, BuffMode::Both, BuffOp::Multiply, 50.0),
            buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Add, 10.0),
            buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Subtract, 4.0),
        ];
        let applier = ModifierApplier::new(&buffs);
        assert_eq!(applier.apply_cost(100.0, &wood(), None, &ctx()), 53.0);
    }

    #[test]
    fn cost_never_negative_and_zero_stays_zero() {
        let buffs = [
            buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Subtract, 500.0),
            buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Add, 7.0),
        ];
        let applier = ModifierApplier::new(&buffs);
        assert_eq!(applier.apply_cost(10.0, &wood(), None, &ctx()), 0.0);
        assert_eq!(applier.apply_cost(0.0, &wood(), None, &ctx()), 0.0);
        let huge = [buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Multiply, 250.0)];
        assert_eq!(ModifierApplier::new(&huge).apply_cost(10.0, &wood(), None, &ctx()), 0.0);
    }

    #[test]
    fn scope_and_applies_to_filter_buffs() {
        let mut liquid_only = buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Multiply, 50.0);
        liquid_only.scope = BuffScope::Category(ResourceCategory::Liquid);
        let mut research_only = buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Multiply, 50.0);
        research_only.source_id = "research-only".to_string();
        research_only.applies_to = Targets::Only(vec!["research".to_string()]);
        let mut stone_only = buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Add, 3.0);
        stone_only.scope = BuffScope::Resource("res.stone".to_string());
        let buffs = [liquid_only, research_only, stone_only];
        let applier = ModifierApplier::new(&buffs);

        assert_eq!(
            applier.apply_cost(10.0, &wood(), Some(ResourceCategory::Solid), &ctx()),
            10.0
        );
        assert_eq!(
            applier.apply_cost(10.0, &wood(), Some(ResourceCategory::Liquid), &ctx()),
            5.0
        );
        assert_eq!(
            applier.apply_cost(10.0, &"res.stone".to_string(), None, &ctx()),
            13.0
        );
    }

    #[test]
    fn zero_and_non_finite_amounts_are_no_ops() {
        let buffs = [
            buff(BuffKind::Resource, BuffMode::Both, BuffOp::Multiply, 0.0),
            buff(BuffKind::Resource, BuffMode::Both, BuffOp::Multiply, f64::NAN),
            buff(BuffKind::Speed, BuffMode::Both, BuffOp::Multiply, f64::INFINITY),
        ];
        let applier = ModifierApplier::new(&buffs);
        assert_eq!(applier.apply_cost(10.0, &wood(), None, &ctx()), 10.0);
        assert_eq!(applier.apply_yield(10.0, &wood(), None, &ctx()), 10.0);
        assert_eq!(applier.apply_speed(60.0, ActionKind::Build, &ctx()), 60.0);
    }

    #[test]
    fn yield_subtractions_floor_at_zero_before_later_terms() {
        let buffs = [
            buff(BuffKind::Resource, BuffMode::Yield, BuffOp::Subtract, 50.0),
            buff(BuffKind::Resource, BuffMode::Yield, BuffOp::Add, 5.0),
            buff(BuffKind::Resource, BuffMode::Yield, BuffOp::Multiply, 100.0),
            buff(BuffKind::Resource, BuffMode::Cost, BuffOp::Add, 1000.0),
        ];
        let applier = ModifierApplier::new(&buffs);
        assert_eq!(applier.apply_yield(10.0, &wood(), None, &ctx()), 10.0);
        assert!(applier.apply_yield(-3.0, &wood(), None, &ctx()) >= 0.0);
    }

    #[test]
    fn duration_without_matching_buff_is_unchanged() {
        let mut upgrade_only = buff(BuffKind::Speed, BuffMode::Both, BuffOp::Multiply, 50.0);
        upgrade_only.actions = Targets::Only(vec!["upgrade".to_string()]);
        let buffs = [upgrade_only];
        let applier = ModifierApplier::new(&buffs);
        assert_eq!(applier.apply_speed(100.0, ActionKind::Build, &ctx()), 100.0);
        assert_eq!(applier.apply_speed(100.0, ActionKind::Upgrade, &ctx()), 50.0);
    }

    #[test]
    fn stacked_speed_buffs_clamp_at_floor() {
        let two: Vec<_> = (0..2)
            .map(|i| {
                let mut b = buff(BuffKind::Speed, BuffMode::Both, BuffOp::Multiply, 50.0);
                b.source_id = format!("speed-{i}");
                b
            })
            .collect();
        let applier = ModifierApplier::new(&two);
        assert!((applier.apply_speed(100.0, ActionKind::Build, &ctx()) - 25.0).abs() < 1e-9);

        let three: Vec<_> = (0..3)
            .map(|i| {
                let mut b = buff(BuffKind::Speed, BuffMode::Both, BuffOp::Multiply, 50.0);
                b.source_id = format!("speed-{i}");
                b
            })
            .collect();
        let applier = ModifierApplier::new(&three);
        assert!((applier.apply_speed(100.0, ActionKind::Build, &ctx()) - 20.0).abs() < 1e-9);

        let excessive = [buff(BuffKind::Speed, BuffMode::Both, BuffOp::Multiply, 400.0)];
        let applier = ModifierApplier::new(&excessive);
        assert!(applier.apply_speed(100.0, ActionKind::Produce, &ctx()) >= 20.0 - 1e-9);
    }
}
