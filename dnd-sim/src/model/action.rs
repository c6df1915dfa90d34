//! Action definitions: what a combattant can do on its turn.

use super::creature::Ability;
use super::effect::{BuffSpec, Condition, DamageType};
use crate::dice::DiceExpression;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A spendable resource. Turn-economy kinds refill every turn or round;
/// the rest are pooled across the adventuring day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Action,
    BonusAction,
    Reaction,
    Movement,
    SpellSlot(u8),
    ClassResource(String),
    HitDice,
    ItemCharge(String),
}

impl ResourceKind {
    /// Refilled by the turn economy rather than by rests.
    pub fn is_turn_economy(&self) -> bool {
        matches!(
            self,
            ResourceKind::Action
                | ResourceKind::BonusAction
                | ResourceKind::Reaction
                | ResourceKind::Movement
        )
    }

    /// Relative value used when measuring how drained a party is.
    pub fn weight(&self) -> f64 {
        match self {
            ResourceKind::SpellSlot(level) => f64::from(*level),
            _ => 1.0,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Action => write!(f, "action"),
            ResourceKind::BonusAction => write!(f, "bonus action"),
            ResourceKind::Reaction => write!(f, "reaction"),
            ResourceKind::Movement => write!(f, "movement"),
            ResourceKind::SpellSlot(level) => write!(f, "level {} slot", level),
            ResourceKind::ClassResource(name) => write!(f, "{}", name),
            ResourceKind::HitDice => write!(f, "hit dice"),
            ResourceKind::ItemCharge(name) => write!(f, "{} charge", name),
        }
    }
}

/// What an action costs to take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionCost {
    Discrete {
        resource: ResourceKind,
        #[serde(default = "one")]
        amount: u32,
    },
    /// Spends as much as is available between `min` and `max`.
    Variable {
        resource: ResourceKind,
        min: u32,
        max: u32,
    },
}

impl ActionCost {
    pub fn discrete(resource: ResourceKind, amount: u32) -> Self {
        ActionCost::Discrete { resource, amount }
    }

    pub fn action() -> Self {
        Self::discrete(ResourceKind::Action, 1)
    }

    pub fn bonus_action() -> Self {
        Self::discrete(ResourceKind::BonusAction, 1)
    }

    pub fn spell_slot(level: u8) -> Self {
        Self::discrete(ResourceKind::SpellSlot(level), 1)
    }

    pub fn resource(&self) -> &ResourceKind {
        match self {
            ActionCost::Discrete { resource, .. } | ActionCost::Variable { resource, .. } => {
                resource
            }
        }
    }

    /// The least that must be available to pay this cost.
    pub fn minimum(&self) -> u32 {
        match self {
            ActionCost::Discrete { amount, .. } => *amount,
            ActionCost::Variable { min, .. } => *min,
        }
    }
}

fn one() -> u32 {
    1
}

/// Whose state a requirement inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subject {
    Actor,
    Target,
}

/// Predicates over the live combat state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CombatPredicate {
    /// Actor is at or below half HP.
    SelfBloodied,
    /// Candidate target is at or below half HP.
    TargetBloodied,
    /// At least one living ally is missing HP.
    AllyInjured,
    /// At least one ally is dead.
    AllyDown,
    /// At least this many enemies are still standing.
    EnemiesAtLeast(u32),
    RoundAtMost(u32),
    RoundAtLeast(u32),
    NotConcentrating,
}

/// A gate on whether an action may be taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Requirement {
    Resource {
        resource: ResourceKind,
        amount: u32,
    },
    CombatState(CombatPredicate),
    HasCondition {
        subject: Subject,
        condition: Condition,
        #[serde(default = "yes")]
        present: bool,
    },
    HasBuff {
        subject: Subject,
        buff: String,
        #[serde(default = "yes")]
        present: bool,
    },
    /// Named predicate from the built-in vocabulary.
    Custom(String),
}

fn yes() -> bool {
    true
}

impl Requirement {
    /// Target-subject requirements filter candidates instead of gating the action.
    pub fn applies_to_target(&self) -> bool {
        matches!(
            self,
            Requirement::CombatState(CombatPredicate::TargetBloodied)
                | Requirement::HasCondition {
                    subject: Subject::Target,
                    ..
                }
                | Requirement::HasBuff {
                    subject: Subject::Target,
                    ..
                }
        )
    }
}

/// How an action orders and picks its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStrategy {
    LeastHp,
    MostHp,
    HighestDpr,
    LowestAc,
    HighestSurvivability,
    Random,
    #[serde(rename = "Self")]
    SelfOnly,
    All,
}

/// How an attack determines success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HitRoll {
    /// Attack roll against armor class.
    ToHit(i32),
    /// Target saving throw; success negates or halves the damage.
    Save {
        ability: Ability,
        dc: i32,
        #[serde(default)]
        half_on_success: bool,
    },
    /// Always hits.
    Auto,
}

fn twenty() -> u32 {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackAction {
    pub hit: HitRoll,
    pub damage: DiceExpression,
    #[serde(default)]
    pub damage_type: DamageType,
    /// Swings per use, for multiattacks.
    #[serde(default = "one")]
    pub attacks: u32,
    /// Lowest natural roll that crits.
    #[serde(default = "twenty")]
    pub crit_threshold: u32,
    /// Rider applied to a target that is hit.
    #[serde(default)]
    pub on_hit: Option<BuffSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HealMode {
    #[default]
    HitPoints,
    TemporaryHitPoints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealAction {
    pub amount: DiceExpression,
    #[serde(default)]
    pub mode: HealMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffAction {
    pub buff: BuffSpec,
}

/// A saving throw a debuff target makes to resist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveCheck {
    pub ability: Ability,
    pub dc: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebuffAction {
    #[serde(default)]
    pub save: Option<SaveCheck>,
    pub debuff: BuffSpec,
    /// Repeat the save at the end of each of the target's turns.
    #[serde(default)]
    pub save_ends: bool,
}

/// Parameters a template reference may override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOverrides {
    pub to_hit: Option<i32>,
    pub save_dc: Option<i32>,
    pub amount: Option<DiceExpression>,
    pub target: Option<TargetStrategy>,
    pub targets: Option<u32>,
}

impl TemplateOverrides {
    /// Canonical, sorted key/value pairs identifying this override set.
    pub fn key_parts(&self) -> Vec<(&'static str, String)> {
        let mut parts = Vec::new();
        if let Some(amount) = &self.amount {
            parts.push(("amount", amount.to_string()));
        }
        if let Some(dc) = self.save_dc {
            parts.push(("save_dc", dc.to_string()));
        }
        if let Some(target) = self.target {
            parts.push(("target", format!("{:?}", target)));
        }
        if let Some(targets) = self.targets {
            parts.push(("targets", targets.to_string()));
        }
        if let Some(to_hit) = self.to_hit {
            parts.push(("to_hit", to_hit.to_string()));
        }
        parts.sort();
        parts
    }
}

/// Reference to a named spell or ability template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateAction {
    pub template: String,
    #[serde(default)]
    pub overrides: TemplateOverrides,
}

/// What an action does once it resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionKind {
    Attack(AttackAction),
    Heal(HealAction),
    Buff(BuffAction),
    Debuff(DebuffAction),
    Template(TemplateAction),
}

impl ActionKind {
    /// Targeting used when an action does not name one.
    pub fn default_target(&self) -> TargetStrategy {
        match self {
            ActionKind::Attack(_) => TargetStrategy::LeastHp,
            ActionKind::Heal(_) => TargetStrategy::LeastHp,
            ActionKind::Buff(_) => TargetStrategy::HighestDpr,
            ActionKind::Debuff(_) => TargetStrategy::HighestDpr,
            ActionKind::Template(_) => TargetStrategy::LeastHp,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Attack(_) => "attack",
            ActionKind::Heal(_) => "heal",
            ActionKind::Buff(_) => "buff",
            ActionKind::Debuff(_) => "debuff",
            ActionKind::Template(_) => "template",
        }
    }
}

/// A declared action with its costs, gates and targeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub cost: Vec<ActionCost>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub target: Option<TargetStrategy>,
    #[serde(default = "one")]
    pub targets: u32,
    /// Counts as casting a spell.
    #[serde(default)]
    pub spell: bool,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            cost: vec![ActionCost::action()],
            requirements: Vec::new(),
            target: None,
            targets: 1,
            spell: false,
            kind,
        }
    }

    /// A standard weapon attack costing one action.
    pub fn weapon(name: impl Into<String>, to_hit: i32, damage: DiceExpression) -> Self {
        Self::new(
            name,
            ActionKind::Attack(AttackAction {
                hit: HitRoll::ToHit(to_hit),
                damage,
                damage_type: DamageType::default(),
                attacks: 1,
                crit_threshold: 20,
                on_hit: None,
            }),
        )
    }

    /// A reference to a built-in template.
    pub fn template(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(
            name,
            ActionKind::Template(TemplateAction {
                template: template.into(),
                overrides: TemplateOverrides::default(),
            }),
        )
    }

    pub fn with_cost(mut self, cost: Vec<ActionCost>) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn with_target(mut self, strategy: TargetStrategy) -> Self {
        self.target = Some(strategy);
        self
    }

    pub fn with_targets(mut self, targets: u32) -> Self {
        self.targets = targets;
        self
    }

    pub fn as_spell(mut self) -> Self {
        self.spell = true;
        self
    }

    /// Set the swing count on an attack action.
    pub fn with_attacks(mut self, attacks: u32) -> Self {
        if let ActionKind::Attack(attack) = &mut self.kind {
            attack.attacks = attacks;
        }
        self
    }

    pub fn with_damage_type(mut self, damage_type: DamageType) -> Self {
        if let ActionKind::Attack(attack) = &mut self.kind {
            attack.damage_type = damage_type;
        }
        self
    }

    pub fn target_strategy(&self) -> TargetStrategy {
        self.target.unwrap_or_else(|| self.kind.default_target())
    }

    /// Spell slot level paid by this action, if any.
    pub fn slot_level(&self) -> Option<u8> {
        self.cost.iter().find_map(|cost| match cost.resource() {
            ResourceKind::SpellSlot(level) => Some(*level),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_json_shape() {
        let json = r#"{
            "name": "Scimitar",
            "cost": [{"Discrete": {"resource": "Action", "amount": 1}}],
            "type": "Attack",
            "hit": {"ToHit": 4},
            "damage": "1d6+2"
        }"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(action.targets, 1);
        match &action.kind {
            ActionKind::Attack(attack) => {
                assert_eq!(attack.attacks, 1);
                assert_eq!(attack.crit_threshold, 20);
                assert_eq!(attack.damage.average(), 5.5);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_template_json_shape() {
        let json = r#"{
            "name": "Bless",
            "cost": [{"Discrete": {"resource": "Action"}}, {"Discrete": {"resource": {"SpellSlot": 1}}}],
            "type": "Template",
            "template": "bless"
        }"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(action.slot_level(), Some(1));
        assert!(matches!(action.kind, ActionKind::Template(_)));
    }

    #[test]
    fn test_override_key_is_sorted() {
        let overrides = TemplateOverrides {
            to_hit: Some(7),
            save_dc: Some(15),
            ..Default::default()
        };
        let parts = overrides.key_parts();
        assert_eq!(parts[0].0, "save_dc");
        assert_eq!(parts[1].0, "to_hit");
    }

    #[test]
    fn test_turn_economy_kinds() {
        assert!(ResourceKind::Reaction.is_turn_economy());
        assert!(!ResourceKind::SpellSlot(1).is_turn_economy());
        assert_eq!(ResourceKind::SpellSlot(3).weight(), 3.0);
    }

    #[test]
    fn test_default_targets() {
        let heal = Action::new(
            "Cure",
            ActionKind::Heal(HealAction {
                amount: DiceExpression::flat(5),
                mode: HealMode::HitPoints,
            }),
        );
        assert_eq!(heal.target_strategy(), TargetStrategy::LeastHp);
        assert_eq!(
            heal.with_target(TargetStrategy::SelfOnly).target_strategy(),
            TargetStrategy::SelfOnly
        );
    }
}
