//! Invariants that must hold for every run: determinism, HP bounds, single
//! deaths and the reaction budget.

use dnd_sim::dice::DiceExpression;
use dnd_sim::engine::{EncounterResult, Fidelity};
use dnd_sim::events::{Event, Replay};
use dnd_sim::model::{
    BuffDuration, BuffModifiers, BuffSpec, CombattantId, Creature, ReactionBudget, ReactionEffect,
    ReactionTemplate, TriggerCondition,
};
use dnd_sim::testing::{
    cleric, deaths_by_unit, fighter, goblin, ogre, reactions_by_round, wizard, EncounterHarness,
};
use std::collections::BTreeMap;

fn parrying_fighter() -> Creature {
    fighter("Brenna").with_reaction(ReactionTemplate::new(
        "Parry",
        TriggerCondition::OnBeingAttacked,
        ReactionEffect::ApplyBuff {
            buff: BuffSpec::new("Parry")
                .with_duration(BuffDuration::Rounds(1))
                .with_modifiers(BuffModifiers {
                    armor_class: 2,
                    ..Default::default()
                }),
        },
    ))
}

fn spiteful_goblin(name: &str) -> Creature {
    goblin(name).with_reaction(ReactionTemplate::new(
        "Spite",
        TriggerCondition::OnBeingDamaged,
        ReactionEffect::DealDamage {
            damage: DiceExpression::flat(2),
            damage_type: Default::default(),
        },
    ))
}

fn brawl(seed: u64) -> EncounterResult {
    EncounterHarness::new()
        .party(parrying_fighter())
        .party(cleric("Osric"))
        .party(wizard("Ilse"))
        .monster(ogre("Ogre"))
        .monster(spiteful_goblin("Goblin 1"))
        .monster(spiteful_goblin("Goblin 2"))
        .monster(
            goblin("Goblin Boss").with_reaction(
                ReactionTemplate::new(
                    "Last Stand",
                    TriggerCondition::OnAllyDeath,
                    ReactionEffect::GainTempHp {
                        amount: DiceExpression::flat(5),
                    },
                )
                .with_budget(ReactionBudget::OncePerEncounter),
            ),
        )
        .seed(seed)
        .fidelity(Fidelity::Full)
        .run()
        .unwrap()
}

#[test]
fn test_replay_determinism() {
    for seed in [1, 7, 99] {
        let first = brawl(seed);
        let second = brawl(seed);
        let a: Vec<_> = first.events.records().collect();
        let b: Vec<_> = second.events.records().collect();
        assert_eq!(a, b);
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}

#[test]
fn test_hp_conservation() {
    for seed in 0..30 {
        let result = brawl(seed);
        let max_hp: BTreeMap<CombattantId, i32> =
            result.start.iter().map(|u| (u.id, u.max_hp)).collect();
        let mut replay = Replay::from_snapshots(&result.start);
        for record in result.events.records() {
            replay.apply(&record.event);
            for (id, hp) in &replay.hp {
                assert!(
                    *hp >= 0 && *hp <= max_hp[id],
                    "seed {} seq {}: unit {} at {} HP",
                    seed,
                    record.seq,
                    id,
                    hp
                );
            }
        }
        for unit in &result.units {
            assert_eq!(replay.hp[&unit.id], unit.state.hp, "seed {}", seed);
            assert_eq!(replay.dead.contains(&unit.id), !unit.is_alive());
        }
    }
}

#[test]
fn test_single_death_and_no_posthumous_actions() {
    for seed in 0..30 {
        let result = brawl(seed);
        for (unit, deaths) in deaths_by_unit(&result.events) {
            assert_eq!(deaths, 1, "seed {}: {} died {} times", seed, unit, deaths);
        }
        let mut dead = Vec::new();
        for record in result.events.records() {
            match &record.event {
                Event::UnitDied { unit, .. } => dead.push(*unit),
                Event::TurnStarted { unit: actor }
                | Event::ActionStarted { actor, .. }
                | Event::AttackDeclared {
                    attacker: actor, ..
                }
                | Event::ReactionTriggered { unit: actor, .. } => {
                    assert!(!dead.contains(actor), "seed {}: {} acted after dying", seed, actor);
                }
                _ => {}
            }
        }
    }
}

#[test]
fn test_reaction_budget() {
    let mut fired = 0;
    for seed in 0..30 {
        let result = brawl(seed);
        for ((unit, round), spent) in reactions_by_round(&result.events) {
            assert!(spent <= 1, "seed {}: {} spent {} reactions in round {}", seed, unit, spent, round);
            fired += spent;
        }
        let last_stands = result
            .events
            .records()
            .filter(|r| matches!(&r.event, Event::ReactionTriggered { reaction, .. } if reaction == "Last Stand"))
            .count();
        assert!(last_stands <= 1);
    }
    assert!(fired > 0);
}
