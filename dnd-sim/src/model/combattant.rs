//! Runtime combattants: a creature instantiated into one encounter.

use super::action::{Action, ResourceKind, SaveCheck};
use super::creature::{Ability, Creature, SaveBonuses};
use super::effect::{BuffSpec, Condition, DamageType};
use super::reaction::ReactionTemplate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Encounter-local combattant index; also the deterministic tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CombattantId(pub u32);

impl fmt::Display for CombattantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Party,
    Monsters,
}

impl Side {
    pub fn opposing(&self) -> Side {
        match self {
            Side::Party => Side::Monsters,
            Side::Monsters => Side::Party,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectId(pub u32);

/// Ties an effect to the concentration of whoever created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationLink {
    pub caster: CombattantId,
    pub token: u32,
}

/// The spell a combattant is concentrating on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationSlot {
    pub spell: String,
    pub token: u32,
}

/// A buff or debuff currently applied to a combattant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveEffect {
    pub id: EffectId,
    pub buff: BuffSpec,
    pub source: CombattantId,
    /// Rounds left; `None` lasts until removed.
    pub remaining_rounds: Option<u32>,
    pub concentration: Option<ConcentrationLink>,
    /// Save repeated at the end of the holder's turns.
    pub save_ends: Option<SaveCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBalance {
    pub current: u32,
    pub max: u32,
}

impl ResourceBalance {
    pub fn full(max: u32) -> Self {
        Self { current: max, max }
    }
}

/// Mutable per-encounter state.
#[derive(Debug, Clone, PartialEq)]
pub struct CombattantState {
    pub hp: i32,
    pub temp_hp: i32,
    pub ward: i32,
    pub effects: Vec<ActiveEffect>,
    /// Conditions with the number of effects imposing each.
    pub conditions: BTreeMap<Condition, u32>,
    pub resources: BTreeMap<ResourceKind, ResourceBalance>,
    pub concentration: Option<ConcentrationSlot>,
    pub dead: bool,
    /// Action indices already taken this turn.
    pub used_actions: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Combattant {
    pub id: CombattantId,
    pub name: String,
    pub side: Side,
    pub max_hp: i32,
    pub armor_class: i32,
    pub save_bonus: i32,
    pub saves: SaveBonuses,
    pub initiative_bonus: i32,
    pub resistances: Vec<DamageType>,
    pub vulnerabilities: Vec<DamageType>,
    pub immunities: Vec<DamageType>,
    pub actions: Vec<Action>,
    pub reactions: Vec<ReactionTemplate>,
    pub starting_buffs: Vec<BuffSpec>,
    /// Estimated damage per round, used for threat-based targeting.
    pub dpr: f64,
    pub state: CombattantState,
}

impl Combattant {
    /// Instantiate a creature at full health with full resources.
    pub fn from_creature(id: CombattantId, side: Side, creature: &Creature, dpr: f64) -> Self {
        let mut resources: BTreeMap<ResourceKind, ResourceBalance> = creature
            .pooled_maximums()
            .into_iter()
            .map(|(kind, max)| (kind, ResourceBalance::full(max)))
            .collect();
        resources.insert(ResourceKind::Action, ResourceBalance::full(1));
        resources.insert(ResourceKind::BonusAction, ResourceBalance::full(1));
        resources.insert(ResourceKind::Reaction, ResourceBalance::full(1));
        resources.insert(ResourceKind::Movement, ResourceBalance::full(creature.speed));

        Self {
            id,
            name: creature.name.clone(),
            side,
            max_hp: creature.hit_points,
            armor_class: creature.armor_class,
            save_bonus: creature.save_bonus,
            saves: creature.saves.clone(),
            initiative_bonus: creature.initiative_bonus,
            resistances: creature.resistances.clone(),
            vulnerabilities: creature.vulnerabilities.clone(),
            immunities: creature.immunities.clone(),
            actions: creature.all_actions(),
            reactions: creature.reactions.clone(),
            starting_buffs: creature.starting_buffs.clone(),
            dpr,
            state: CombattantState {
                hp: creature.hit_points,
                temp_hp: 0,
                ward: creature.arcane_ward,
                effects: Vec::new(),
                conditions: BTreeMap::new(),
                resources,
                concentration: None,
                dead: false,
                used_actions: BTreeSet::new(),
            },
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.state.dead
    }

    /// At or below half of maximum HP.
    pub fn is_bloodied(&self) -> bool {
        self.state.hp * 2 <= self.max_hp
    }

    pub fn is_injured(&self) -> bool {
        self.is_alive() && self.state.hp < self.max_hp
    }

    pub fn has_condition(&self, condition: Condition) -> bool {
        self.state.conditions.contains_key(&condition)
    }

    pub fn is_incapacitated(&self) -> bool {
        self.state
            .conditions
            .keys()
            .any(|condition| condition.is_incapacitating())
    }

    pub fn has_buff(&self, name: &str) -> bool {
        self.state.effects.iter().any(|effect| effect.buff.name == name)
    }

    pub fn save_for(&self, ability: Ability) -> i32 {
        self.saves.get(ability).unwrap_or(self.save_bonus)
    }

    pub fn resource(&self, kind: &ResourceKind) -> u32 {
        self.state
            .resources
            .get(kind)
            .map(|balance| balance.current)
            .unwrap_or(0)
    }

    /// HP fraction, zero when dead.
    pub fn hp_fraction(&self) -> f64 {
        if self.state.dead || self.max_hp <= 0 {
            0.0
        } else {
            f64::from(self.state.hp.max(0)) / f64::from(self.max_hp)
        }
    }
}
