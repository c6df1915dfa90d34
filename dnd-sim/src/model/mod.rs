//! The simulation data model: creature definitions, actions, reactions,
//! timelines and the runtime combattant state built from them.

pub mod action;
pub mod combattant;
pub mod creature;
pub mod effect;
pub mod reaction;
pub mod timeline;
pub mod validate;

pub use action::{
    Action, ActionCost, ActionKind, AttackAction, BuffAction, CombatPredicate, DebuffAction,
    HealAction, HealMode, HitRoll, Requirement, ResourceKind, SaveCheck, Subject,
    TargetStrategy, TemplateAction, TemplateOverrides,
};
pub use combattant::{
    ActiveEffect, Combattant, CombattantId, CombattantState, ConcentrationLink,
    ConcentrationSlot, EffectId, ResourceBalance, Side,
};
pub use creature::{
    Ability, Creature, CreatureId, HitDicePool, MagicItem, RechargeType, ResourcePool,
    ResourcePools, SaveBonuses,
};
pub use effect::{BuffDuration, BuffModifiers, BuffSpec, Condition, DamageType};
pub use reaction::{
    ReactionBudget, ReactionEffect, ReactionTemplate, RerollKeep, TriggerCondition,
    TriggerRequirement,
};
pub use timeline::{Encounter, RestKind, SimulationRequest, TimelineSegment};
pub use validate::{validate_request, ValidationError};
