//! Reaction templates: event-triggered responses outside a creature's turn.

use super::action::{ActionCost, ResourceKind};
use super::effect::{BuffSpec, DamageType};
use crate::dice::DiceExpression;
use serde::{Deserialize, Serialize};

/// The event shape a reaction listens for, relative to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    /// Owner hit something with an attack.
    OnHit,
    /// Owner missed an attack.
    OnMiss,
    /// Owner was declared as an attack target, before the roll.
    OnBeingAttacked,
    OnBeingHit,
    OnBeingDamaged,
    OnEnemyDeath,
    OnAllyDeath,
    OnEnemySpellCast,
}

/// Extra state a reaction needs before it can fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerRequirement {
    HasTempHp,
    BelowHalfHp,
    HasResource { resource: ResourceKind, amount: u32 },
    /// Triggering damage event dealt at least this much.
    DamageAtLeast(i32),
    /// Triggering hit was a critical.
    CriticalHit,
}

/// Which of two d20 results a forced reroll keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RerollKeep {
    Lower,
    Higher,
}

/// What happens when a reaction fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReactionEffect {
    /// Damage the other party of the triggering event.
    DealDamage {
        damage: DiceExpression,
        #[serde(default)]
        damage_type: DamageType,
    },
    /// Resolve one of the owner's actions right away, free of turn economy.
    GrantImmediateAction { action: String },
    /// Stop the in-flight action at the current checkpoint.
    InterruptAction,
    /// Add to the next d20 roll evaluated.
    AddToRoll { amount: i32 },
    /// Reroll the next d20 and keep one of the two results.
    ForceReroll { keep: RerollKeep },
    GainTempHp { amount: DiceExpression },
    /// Apply a buff to the owner.
    ApplyBuff { buff: BuffSpec },
}

/// How often a reaction may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReactionBudget {
    /// Spends the owner's one reaction for the round.
    #[default]
    PerRound,
    /// Spends the round's reaction and never fires again this encounter.
    OncePerEncounter,
    /// Passive trait that spends no reaction.
    Free,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionTemplate {
    pub name: String,
    pub trigger: TriggerCondition,
    #[serde(default)]
    pub requirement: Option<TriggerRequirement>,
    pub effect: ReactionEffect,
    /// Higher fires first when several reactions match one event.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub budget: ReactionBudget,
    /// Pooled costs on top of the reaction itself, such as a spell slot.
    #[serde(default)]
    pub cost: Vec<ActionCost>,
}

impl ReactionTemplate {
    pub fn new(name: impl Into<String>, trigger: TriggerCondition, effect: ReactionEffect) -> Self {
        Self {
            name: name.into(),
            trigger,
            requirement: None,
            effect,
            priority: 0,
            budget: ReactionBudget::PerRound,
            cost: Vec::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: TriggerRequirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_budget(mut self, budget: ReactionBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cost(mut self, cost: ActionCost) -> Self {
        self.cost.push(cost);
        self
    }

    /// Full cost paid when firing, including the reaction for budgeted kinds.
    pub fn total_cost(&self) -> Vec<ActionCost> {
        let mut costs = Vec::with_capacity(self.cost.len() + 1);
        if self.budget != ReactionBudget::Free {
            costs.push(ActionCost::discrete(ResourceKind::Reaction, 1));
        }
        costs.extend(self.cost.iter().cloned());
        costs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_reactions_cost_no_reaction() {
        let passive = ReactionTemplate::new(
            "Relentless",
            TriggerCondition::OnBeingDamaged,
            ReactionEffect::GainTempHp {
                amount: DiceExpression::flat(1),
            },
        )
        .with_budget(ReactionBudget::Free);
        assert!(passive.total_cost().is_empty());

        let shield = ReactionTemplate::new(
            "Shield",
            TriggerCondition::OnBeingAttacked,
            ReactionEffect::AddToRoll { amount: -5 },
        )
        .with_cost(ActionCost::spell_slot(1));
        let costs = shield.total_cost();
        assert_eq!(costs.len(), 2);
        assert_eq!(costs[0].resource(), &ResourceKind::Reaction);
    }

    #[test]
    fn test_reaction_json_defaults() {
        let json = r#"{
            "name": "Hellish Rebuke",
            "trigger": "OnBeingDamaged",
            "effect": {"DealDamage": {"damage": "2d10", "damage_type": "Fire"}}
        }"#;
        let reaction: ReactionTemplate = serde_json::from_str(json).unwrap();
        assert_eq!(reaction.budget, ReactionBudget::PerRound);
        assert_eq!(reaction.priority, 0);
        assert!(reaction.requirement.is_none());
    }
}
