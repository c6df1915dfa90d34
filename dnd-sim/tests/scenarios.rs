//! End-to-end scenarios with known expected outcomes.

use dnd_sim::balance::{classify, contextual_tier, DeathProfile, Tier};
use dnd_sim::engine::Fidelity;
use dnd_sim::events::EncounterOutcome;
use dnd_sim::model::{CombattantId, Encounter, RestKind, SimulationRequest, TimelineSegment};
use dnd_sim::testing::{death_round, duel_attacker, dummy, fighter, goblin, ogre, EncounterHarness};
use dnd_sim::{simulate, SimConfig, TierThresholds};

#[test]
fn test_simple_duel() {
    let target = CombattantId(1);
    let mut quick = 0;
    for seed in 0..1000 {
        let result = EncounterHarness::new()
            .party(duel_attacker())
            .monster(dummy("Target", 15, 12))
            .seed(seed)
            .fidelity(Fidelity::Full)
            .run()
            .unwrap();
        assert_eq!(result.outcome, EncounterOutcome::Victory);
        if death_round(&result.events, target).map(|r| r <= 3).unwrap_or(false) {
            quick += 1;
        }
    }
    assert!(quick > 950, "target died within 3 rounds in {} of 1000 runs", quick);
}

#[test]
fn test_exhausted_party_fails_a_safe_encounter() {
    let t = TierThresholds::default();
    let calm = DeathProfile {
        best: 0,
        median: 0,
        worst: 0,
    };
    let isolated = classify(&calm, 0.20, 4, &t);
    assert_eq!(isolated, Tier::Safe);
    assert_eq!(contextual_tier(isolated, 1.0), Tier::Safe);
    assert_eq!(contextual_tier(isolated, 0.10), Tier::Failed);
}

#[test]
fn test_late_encounter_is_judged_in_context() {
    // A lone fighter walks through three fights with no rest; the last one is
    // rated at least as hard in context as in isolation.
    let request = SimulationRequest::new(
        vec![fighter("Brenna")],
        vec![
            TimelineSegment::Combat(Encounter::new("Ogre", vec![ogre("Ogre")])),
            TimelineSegment::Combat(Encounter::new("Goblins", vec![goblin("Goblin").with_count(2.0)])),
            TimelineSegment::Combat(Encounter::new("Lone Goblin", vec![goblin("Goblin")])),
        ],
    )
    .with_iterations(200)
    .with_seed(11);
    let result = simulate(request, SimConfig::default()).unwrap();
    let encounters = &result.analysis.encounters;
    assert_eq!(encounters.len(), 3);
    assert_eq!(encounters[0].resources_entering, 1.0);
    for encounter in encounters {
        assert!(encounter.contextual >= encounter.isolated);
    }
    assert!(encounters[2].resources_entering < encounters[0].resources_entering);
}

#[test]
fn test_long_rest_restores_the_party() {
    let rested = SimulationRequest::new(
        vec![fighter("Brenna")],
        vec![
            TimelineSegment::Combat(Encounter::new("Ogre", vec![ogre("Ogre")])),
            TimelineSegment::Rest {
                kind: RestKind::Long,
            },
            TimelineSegment::Combat(Encounter::new("Goblin", vec![goblin("Goblin")])),
        ],
    )
    .with_iterations(100)
    .with_seed(5);
    let result = simulate(rested, SimConfig::default()).unwrap();
    for run in &result.runs {
        let second = &run.encounters[1];
        if run.encounters[0].deaths == 0 {
            assert_eq!(second.resources_entering, 1.0);
        } else {
            assert_eq!(second.outcome, EncounterOutcome::NotReached);
        }
    }
}
