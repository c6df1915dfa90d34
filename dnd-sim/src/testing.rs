//! Testing utilities for the simulator.
//!
//! This module provides tools for unit and integration tests:
//! - sample creatures and a sample adventuring day
//! - `EncounterHarness` for running one scripted encounter
//! - assertion helpers over event logs

use crate::config::SimConfig;
use crate::dice::{DiceExpression, DieType};
use crate::engine::{ai, EncounterEngine, EncounterResult, Fidelity};
use crate::error::SimError;
use crate::events::{Event, EventLog};
use crate::model::{
    Ability, Action, ActionCost, Combattant, CombattantId, Creature, DamageType, Encounter,
    RechargeType, ResourceKind, RestKind, Side, TimelineSegment,
};
use crate::resolver::template::TemplateCache;
use crate::resolver::ActionResolver;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

fn dice(notation: &str) -> DiceExpression {
    DiceExpression::parse(notation).unwrap_or_else(|_| DiceExpression::flat(0))
}

/// A level-5 fighter: two longsword swings, second wind.
pub fn fighter(name: &str) -> Creature {
    Creature::new(name, 44, 18)
        .with_initiative(1)
        .with_save(Ability::Strength, 7)
        .with_save(Ability::Constitution, 6)
        .with_save_bonus(2)
        .with_hit_dice(DieType::D10, 5, 3)
        .with_class_resource("second_wind", 1, RechargeType::ShortRest)
        .with_action(Action::weapon("Longsword", 7, dice("1d8+4")).with_attacks(2))
}

/// A level-5 cleric with healing and bless.
pub fn cleric(name: &str) -> Creature {
    Creature::new(name, 38, 18)
        .with_save(Ability::Wisdom, 7)
        .with_save_bonus(2)
        .with_hit_dice(DieType::D8, 5, 2)
        .with_spell_slots(1, 4)
        .with_spell_slots(2, 3)
        .with_spell_slots(3, 2)
        .with_action(
            Action::weapon("Mace", 5, dice("1d6+2")).with_damage_type(DamageType::Bludgeoning),
        )
        .with_action(
            Action::template("Bless", "bless")
                .with_cost(vec![ActionCost::action(), ActionCost::spell_slot(1)]),
        )
        .with_action(
            Action::template("Healing Word", "healing_word")
                .with_cost(vec![ActionCost::bonus_action(), ActionCost::spell_slot(1)]),
        )
        .with_action(Action::template("Sacred Flame", "sacred_flame"))
}

/// A level-5 wizard with fireball.
pub fn wizard(name: &str) -> Creature {
    Creature::new(name, 27, 12)
        .with_initiative(2)
        .with_save(Ability::Intelligence, 7)
        .with_save(Ability::Wisdom, 4)
        .with_hit_dice(DieType::D6, 5, 1)
        .with_spell_slots(1, 4)
        .with_spell_slots(3, 2)
        .with_arcane_ward(12)
        .with_action(Action::template("Fire Bolt", "fire_bolt"))
        .with_action(
            Action::template("Fireball", "fireball")
                .with_cost(vec![ActionCost::action(), ActionCost::spell_slot(3)]),
        )
}

pub fn goblin(name: &str) -> Creature {
    Creature::new(name, 7, 15)
        .with_initiative(2)
        .with_action(Action::weapon("Scimitar", 4, dice("1d6+2")))
}

pub fn ogre(name: &str) -> Creature {
    Creature::new(name, 59, 11).with_save_bonus(1).with_action(
        Action::weapon("Greatclub", 6, dice("2d8+4")).with_damage_type(DamageType::Bludgeoning),
    )
}

/// Something to hit that never hits back.
pub fn dummy(name: &str, hit_points: i32, armor_class: i32) -> Creature {
    Creature::new(name, hit_points, armor_class)
}

/// The duel attacker: AC 15, 50 HP, three swings of 1d6+3 at +3.
pub fn duel_attacker() -> Creature {
    Creature::new("Duelist", 50, 15)
        .with_action(Action::weapon("Shortsword", 3, dice("1d6+3")).with_attacks(3))
}

pub fn sample_party() -> Vec<Creature> {
    vec![fighter("Brenna"), cleric("Osric"), wizard("Ilse")]
}

/// Three fights with a short rest after the first.
pub fn sample_day() -> Vec<TimelineSegment> {
    vec![
        TimelineSegment::Combat(Encounter::new(
            "Goblin Ambush",
            vec![goblin("Goblin").with_count(3.5)],
        )),
        TimelineSegment::Rest {
            kind: RestKind::Short,
        },
        TimelineSegment::Combat(Encounter::new("Ogre Bridge", vec![ogre("Ogre")])),
        TimelineSegment::Combat(Encounter::new(
            "War Band",
            vec![ogre("Ogre"), goblin("Goblin").with_count(2.0)],
        )),
    ]
}

/// Runs one encounter from creature lists.
pub struct EncounterHarness {
    party: Vec<Creature>,
    monsters: Vec<Creature>,
    config: SimConfig,
    seed: u64,
    fidelity: Fidelity,
}

impl Default for EncounterHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl EncounterHarness {
    pub fn new() -> Self {
        Self {
            party: Vec::new(),
            monsters: Vec::new(),
            config: SimConfig::default(),
            seed: 0,
            fidelity: Fidelity::Full,
        }
    }

    pub fn party(mut self, creature: Creature) -> Self {
        self.party.push(creature);
        self
    }

    pub fn monster(mut self, creature: Creature) -> Self {
        self.monsters.push(creature);
        self
    }

    pub fn config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fidelity(mut self, fidelity: Fidelity) -> Self {
        self.fidelity = fidelity;
        self
    }

    /// Party first, then monsters, ids in that order.
    pub fn units(&self) -> Vec<Combattant> {
        let sides = self
            .party
            .iter()
            .map(|c| (Side::Party, c))
            .chain(self.monsters.iter().map(|c| (Side::Monsters, c)));
        sides
            .enumerate()
            .map(|(i, (side, creature))| {
                let dpr = ai::estimate_dpr(&creature.all_actions());
                Combattant::from_creature(CombattantId(i as u32), side, creature, dpr)
            })
            .collect()
    }

    pub fn run(&self) -> Result<EncounterResult, SimError> {
        let mut resolver = ActionResolver::new(TemplateCache::new(self.config.template_cache_capacity));
        EncounterEngine::new(&self.config, &mut resolver)
            .run(
                0,
                self.units(),
                ChaCha8Rng::seed_from_u64(self.seed),
                self.fidelity,
            )
            .map_err(|source| SimError::Invariant {
                run_index: 0,
                seed: self.seed,
                source,
            })
    }
}

/// Number of `UnitDied` events per unit.
pub fn deaths_by_unit(log: &EventLog) -> BTreeMap<CombattantId, u32> {
    let mut deaths = BTreeMap::new();
    for record in log.records() {
        if let Event::UnitDied { unit, .. } = &record.event {
            *deaths.entry(*unit).or_insert(0) += 1;
        }
    }
    deaths
}

/// Reactions spent per unit per round.
pub fn reactions_by_round(log: &EventLog) -> BTreeMap<(CombattantId, u32), u32> {
    let mut spent = BTreeMap::new();
    for record in log.records() {
        if let Event::ResourceConsumed {
            unit,
            resource: ResourceKind::Reaction,
            amount,
            ..
        } = &record.event
        {
            *spent.entry((*unit, record.round)).or_insert(0) += amount;
        }
    }
    spent
}

/// Round in which `unit` died, if it did.
pub fn death_round(log: &EventLog, unit: CombattantId) -> Option<u32> {
    log.records().find_map(|record| match &record.event {
        Event::UnitDied { unit: died, .. } if *died == unit => Some(record.round),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EncounterOutcome;

    #[test]
    fn test_fixtures_are_valid() {
        use crate::model::{validate_request, SimulationRequest};
        let request = SimulationRequest::new(sample_party(), sample_day());
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn test_harness_runs_an_encounter() {
        let result = EncounterHarness::new()
            .party(fighter("Brenna"))
            .monster(goblin("Goblin"))
            .seed(3)
            .run()
            .unwrap();
        assert_eq!(result.outcome, EncounterOutcome::Victory);
        assert_eq!(deaths_by_unit(&result.events).get(&CombattantId(1)), Some(&1));
        assert!(death_round(&result.events, CombattantId(1)).is_some());
    }
}
