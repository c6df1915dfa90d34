//! Static creature definitions: the stat blocks a request is built from.

use super::action::{Action, ResourceKind};
use super::effect::{BuffSpec, DamageType};
use super::reaction::ReactionTemplate;
use crate::dice::DieType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a creature definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreatureId(pub Uuid);

impl CreatureId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CreatureId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CreatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// Per-ability save bonuses. Missing entries fall back to the creature's
/// aggregate save bonus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveBonuses {
    pub strength: Option<i32>,
    pub dexterity: Option<i32>,
    pub constitution: Option<i32>,
    pub intelligence: Option<i32>,
    pub wisdom: Option<i32>,
    pub charisma: Option<i32>,
}

impl SaveBonuses {
    pub fn get(&self, ability: Ability) -> Option<i32> {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn set(&mut self, ability: Ability, bonus: i32) {
        let slot = match ability {
            Ability::Strength => &mut self.strength,
            Ability::Dexterity => &mut self.dexterity,
            Ability::Constitution => &mut self.constitution,
            Ability::Intelligence => &mut self.intelligence,
            Ability::Wisdom => &mut self.wisdom,
            Ability::Charisma => &mut self.charisma,
        };
        *slot = Some(bonus);
    }

    /// Shift every explicit bonus by `delta`.
    pub fn shifted(&self, delta: i32) -> Self {
        let shift = |v: Option<i32>| v.map(|b| b + delta);
        Self {
            strength: shift(self.strength),
            dexterity: shift(self.dexterity),
            constitution: shift(self.constitution),
            intelligence: shift(self.intelligence),
            wisdom: shift(self.wisdom),
            charisma: shift(self.charisma),
        }
    }
}

/// When a limited resource comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RechargeType {
    ShortRest,
    #[default]
    LongRest,
    /// Never recovers during the adventuring day.
    Never,
}

/// A named pool such as ki points or channel divinity uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub max: u32,
    #[serde(default)]
    pub recharge: RechargeType,
}

/// Hit dice available for short-rest healing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitDicePool {
    pub die: DieType,
    pub count: u32,
    /// Added to each die spent, usually the Constitution modifier.
    #[serde(default)]
    pub bonus: i32,
}

/// Limited resources a creature starts the adventuring day with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePools {
    /// Spell slots by level (1-9). Slots recover on a long rest.
    pub spell_slots: BTreeMap<u8, u32>,
    pub class_resources: BTreeMap<String, ResourcePool>,
    pub hit_dice: Option<HitDicePool>,
}

/// A magic item that grants actions and may hold charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagicItem {
    pub name: String,
    #[serde(default)]
    pub charges: u32,
    #[serde(default)]
    pub recharge: RechargeType,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn one() -> f64 {
    1.0
}

fn default_speed() -> u32 {
    30
}

/// A creature definition shared by party members and monsters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creature {
    #[serde(default)]
    pub id: CreatureId,
    pub name: String,
    /// Number of copies; a fractional part is an instantiation probability.
    #[serde(default = "one")]
    pub count: f64,
    pub hit_points: i32,
    pub armor_class: i32,
    #[serde(default)]
    pub save_bonus: i32,
    #[serde(default)]
    pub saves: SaveBonuses,
    #[serde(default)]
    pub initiative_bonus: i32,
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub reactions: Vec<ReactionTemplate>,
    #[serde(default)]
    pub resources: ResourcePools,
    #[serde(default)]
    pub magic_items: Vec<MagicItem>,
    /// Buffs active from the start of every encounter.
    #[serde(default)]
    pub starting_buffs: Vec<BuffSpec>,
    /// Arcane ward hit points, absorbed before temporary HP.
    #[serde(default)]
    pub arcane_ward: i32,
    #[serde(default)]
    pub resistances: Vec<DamageType>,
    #[serde(default)]
    pub vulnerabilities: Vec<DamageType>,
    #[serde(default)]
    pub immunities: Vec<DamageType>,
}

impl Creature {
    pub fn new(name: impl Into<String>, hit_points: i32, armor_class: i32) -> Self {
        Self {
            id: CreatureId::new(),
            name: name.into(),
            count: 1.0,
            hit_points,
            armor_class,
            save_bonus: 0,
            saves: SaveBonuses::default(),
            initiative_bonus: 0,
            speed: default_speed(),
            actions: Vec::new(),
            reactions: Vec::new(),
            resources: ResourcePools::default(),
            magic_items: Vec::new(),
            starting_buffs: Vec::new(),
            arcane_ward: 0,
            resistances: Vec::new(),
            vulnerabilities: Vec::new(),
            immunities: Vec::new(),
        }
    }

    pub fn with_count(mut self, count: f64) -> Self {
        self.count = count;
        self
    }

    pub fn with_save_bonus(mut self, bonus: i32) -> Self {
        self.save_bonus = bonus;
        self
    }

    pub fn with_save(mut self, ability: Ability, bonus: i32) -> Self {
        self.saves.set(ability, bonus);
        self
    }

    pub fn with_initiative(mut self, bonus: i32) -> Self {
        self.initiative_bonus = bonus;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_reaction(mut self, reaction: ReactionTemplate) -> Self {
        self.reactions.push(reaction);
        self
    }

    pub fn with_spell_slots(mut self, level: u8, count: u32) -> Self {
        self.resources.spell_slots.insert(level, count);
        self
    }

    pub fn with_class_resource(
        mut self,
        name: impl Into<String>,
        max: u32,
        recharge: RechargeType,
    ) -> Self {
        self.resources
            .class_resources
            .insert(name.into(), ResourcePool { max, recharge });
        self
    }

    pub fn with_hit_dice(mut self, die: DieType, count: u32, bonus: i32) -> Self {
        self.resources.hit_dice = Some(HitDicePool { die, count, bonus });
        self
    }

    pub fn with_item(mut self, item: MagicItem) -> Self {
        self.magic_items.push(item);
        self
    }

    pub fn with_starting_buff(mut self, buff: BuffSpec) -> Self {
        self.starting_buffs.push(buff);
        self
    }

    pub fn with_arcane_ward(mut self, ward: i32) -> Self {
        self.arcane_ward = ward;
        self
    }

    pub fn with_resistance(mut self, damage_type: DamageType) -> Self {
        self.resistances.push(damage_type);
        self
    }

    pub fn with_vulnerability(mut self, damage_type: DamageType) -> Self {
        self.vulnerabilities.push(damage_type);
        self
    }

    pub fn with_immunity(mut self, damage_type: DamageType) -> Self {
        self.immunities.push(damage_type);
        self
    }

    /// Save bonus for an ability, falling back to the aggregate bonus.
    pub fn save_for(&self, ability: Ability) -> i32 {
        self.saves.get(ability).unwrap_or(self.save_bonus)
    }

    /// Every action available in an encounter: innate actions followed by
    /// actions granted by magic items.
    pub fn all_actions(&self) -> Vec<Action> {
        self.actions
            .iter()
            .chain(self.magic_items.iter().flat_map(|item| item.actions.iter()))
            .cloned()
            .collect()
    }

    /// Maximum of every pooled resource this creature starts a day with.
    pub fn pooled_maximums(&self) -> BTreeMap<ResourceKind, u32> {
        let mut pools = BTreeMap::new();
        for (level, count) in &self.resources.spell_slots {
            pools.insert(ResourceKind::SpellSlot(*level), *count);
        }
        for (name, pool) in &self.resources.class_resources {
            pools.insert(ResourceKind::ClassResource(name.clone()), pool.max);
        }
        if let Some(hit_dice) = &self.resources.hit_dice {
            pools.insert(ResourceKind::HitDice, hit_dice.count);
        }
        for item in &self.magic_items {
            if item.charges > 0 {
                pools.insert(ResourceKind::ItemCharge(item.name.clone()), item.charges);
            }
        }
        pools
    }

    /// Recharge rule for a pooled resource.
    pub fn recharge_for(&self, resource: &ResourceKind) -> RechargeType {
        match resource {
            ResourceKind::ClassResource(name) => self
                .resources
                .class_resources
                .get(name)
                .map(|pool| pool.recharge)
                .unwrap_or_default(),
            ResourceKind::ItemCharge(name) => self
                .magic_items
                .iter()
                .find(|item| &item.name == name)
                .map(|item| item.recharge)
                .unwrap_or_default(),
            _ => RechargeType::LongRest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_fallback() {
        let creature = Creature::new("Ogre", 59, 11)
            .with_save_bonus(1)
            .with_save(Ability::Constitution, 4);
        assert_eq!(creature.save_for(Ability::Constitution), 4);
        assert_eq!(creature.save_for(Ability::Wisdom), 1);
    }

    #[test]
    fn test_pooled_maximums_include_items() {
        let creature = Creature::new("Wizard", 22, 12)
            .with_spell_slots(1, 4)
            .with_spell_slots(2, 2)
            .with_hit_dice(DieType::D6, 3, 1)
            .with_item(MagicItem {
                name: "Wand".to_string(),
                charges: 7,
                recharge: RechargeType::LongRest,
                actions: Vec::new(),
            });
        let pools = creature.pooled_maximums();
        assert_eq!(pools.get(&ResourceKind::SpellSlot(1)), Some(&4));
        assert_eq!(pools.get(&ResourceKind::HitDice), Some(&3));
        assert_eq!(
            pools.get(&ResourceKind::ItemCharge("Wand".to_string())),
            Some(&7)
        );
    }

    #[test]
    fn test_minimal_json_defaults() {
        let json = r#"{"name": "Goblin", "hit_points": 7, "armor_class": 15}"#;
        let creature: Creature = serde_json::from_str(json).unwrap();
        assert_eq!(creature.count, 1.0);
        assert_eq!(creature.speed, 30);
        assert!(creature.actions.is_empty());
    }

    #[test]
    fn test_shifted_saves_keep_missing_entries() {
        let saves = SaveBonuses {
            wisdom: Some(2),
            ..Default::default()
        };
        let shifted = saves.shifted(1);
        assert_eq!(shifted.wisdom, Some(3));
        assert_eq!(shifted.strength, None);
    }
}
