//! Damage types, conditions and buff payloads.

use crate::dice::DiceExpression;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Common D&D damage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum DamageType {
    #[default]
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    Cold,
    Lightning,
    Thunder,
    Acid,
    Poison,
    Necrotic,
    Radiant,
    Force,
    Psychic,
}

impl DamageType {
    pub fn name(&self) -> &'static str {
        match self {
            DamageType::Slashing => "slashing",
            DamageType::Piercing => "piercing",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Fire => "fire",
            DamageType::Cold => "cold",
            DamageType::Lightning => "lightning",
            DamageType::Thunder => "thunder",
            DamageType::Acid => "acid",
            DamageType::Poison => "poison",
            DamageType::Necrotic => "necrotic",
            DamageType::Radiant => "radiant",
            DamageType::Force => "force",
            DamageType::Psychic => "psychic",
        }
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// D&D 5e conditions the simulator models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Condition {
    Blinded,
    Charmed,
    Frightened,
    Incapacitated,
    Paralyzed,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
}

impl Condition {
    pub fn name(&self) -> &'static str {
        match self {
            Condition::Blinded => "Blinded",
            Condition::Charmed => "Charmed",
            Condition::Frightened => "Frightened",
            Condition::Incapacitated => "Incapacitated",
            Condition::Paralyzed => "Paralyzed",
            Condition::Poisoned => "Poisoned",
            Condition::Prone => "Prone",
            Condition::Restrained => "Restrained",
            Condition::Stunned => "Stunned",
            Condition::Unconscious => "Unconscious",
        }
    }

    /// Whether this condition prevents actions and reactions.
    pub fn is_incapacitating(&self) -> bool {
        matches!(
            self,
            Condition::Incapacitated
                | Condition::Paralyzed
                | Condition::Stunned
                | Condition::Unconscious
        )
    }

    /// Attacks against a creature with this condition roll with advantage.
    pub fn grants_advantage_to_attackers(&self) -> bool {
        matches!(
            self,
            Condition::Blinded
                | Condition::Paralyzed
                | Condition::Prone
                | Condition::Restrained
                | Condition::Stunned
                | Condition::Unconscious
        )
    }

    /// A creature with this condition attacks with disadvantage.
    pub fn imposes_attack_disadvantage(&self) -> bool {
        matches!(
            self,
            Condition::Blinded
                | Condition::Frightened
                | Condition::Poisoned
                | Condition::Prone
                | Condition::Restrained
        )
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How long a buff lasts once applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuffDuration {
    /// Expires at the end of the given number of rounds.
    Rounds(u32),
    UntilRemoved,
}

impl Default for BuffDuration {
    fn default() -> Self {
        // One minute of spell duration
        BuffDuration::Rounds(10)
    }
}

/// Numeric payload of a buff or debuff.
///
/// Negative flat values express penalties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuffModifiers {
    pub armor_class: i32,
    pub to_hit: i32,
    pub to_hit_dice: Option<DiceExpression>,
    pub damage: i32,
    pub damage_dice: Option<DiceExpression>,
    pub save: i32,
    pub save_dice: Option<DiceExpression>,
    pub condition: Option<Condition>,
}

/// A buff or debuff definition, applied to a combattant as an active effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffSpec {
    pub name: String,
    #[serde(default)]
    pub duration: BuffDuration,
    #[serde(default)]
    pub modifiers: BuffModifiers,
    /// Ties the effect to its caster's concentration.
    #[serde(default)]
    pub concentration: bool,
}

impl BuffSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: BuffDuration::default(),
            modifiers: BuffModifiers::default(),
            concentration: false,
        }
    }

    pub fn with_duration(mut self, duration: BuffDuration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_modifiers(mut self, modifiers: BuffModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.modifiers.condition = Some(condition);
        self
    }

    pub fn concentration(mut self) -> Self {
        self.concentration = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incapacitating_conditions() {
        assert!(Condition::Stunned.is_incapacitating());
        assert!(Condition::Paralyzed.is_incapacitating());
        assert!(!Condition::Poisoned.is_incapacitating());
        assert!(!Condition::Prone.is_incapacitating());
    }

    #[test]
    fn test_buff_spec_defaults_from_json() {
        let spec: BuffSpec = serde_json::from_str(r#"{"name": "Bless"}"#).unwrap();
        assert_eq!(spec.duration, BuffDuration::Rounds(10));
        assert!(!spec.concentration);
        assert_eq!(spec.modifiers, BuffModifiers::default());
    }

    #[test]
    fn test_buff_builder() {
        let spec = BuffSpec::new("Hold Person")
            .with_condition(Condition::Paralyzed)
            .concentration();
        assert!(spec.concentration);
        assert_eq!(spec.modifiers.condition, Some(Condition::Paralyzed));
    }
}
