//! The adventuring day: a timeline of encounters and rests run against one
//! party, with hit points, resources and deaths carried between segments.

use crate::config::SimConfig;
use crate::context::InvariantError;
use crate::diagnostics::Diagnostic;
use crate::engine::{ai, EncounterEngine, EncounterResult, Fidelity, RoundSummary};
use crate::events::{EncounterOutcome, EventRecord, UnitSnapshot};
use crate::model::{
    Combattant, CombattantId, Creature, RechargeType, ResourceBalance, ResourceKind, RestKind,
    Side, SimulationRequest, TimelineSegment,
};
use crate::resolver::ActionResolver;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Seed of run `run_index` in a batch seeded with `base`: a SplitMix64 mix, so
/// every run's generator depends on nothing but these two numbers.
pub fn run_seed(base: u64, run_index: u32) -> u64 {
    let mut z = base ^ u64::from(run_index).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// One encounter of one run, as the survey sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterRecord {
    /// Position among the timeline's encounters.
    pub index: usize,
    pub name: String,
    pub outcome: EncounterOutcome,
    pub rounds: u32,
    /// Party members who died during this encounter.
    pub deaths: u32,
    /// Party standing afterwards, `100 × mean HP fraction`.
    pub score: f64,
    pub resources_entering: f64,
    pub resources_leaving: f64,
}

/// The fixed-size summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_index: u32,
    pub seed: u64,
    pub score: f64,
    pub deaths: u32,
    pub rounds: u32,
    pub outcome: EncounterOutcome,
    /// The run hit an internal invariant violation; its numbers are void.
    pub failed: bool,
    pub encounters: Vec<EncounterRecord>,
}

impl RunRecord {
    pub fn failed(run_index: u32, seed: u64) -> Self {
        Self {
            run_index,
            seed,
            score: 0.0,
            deaths: 0,
            rounds: 0,
            outcome: EncounterOutcome::NotReached,
            failed: true,
            encounters: Vec::new(),
        }
    }
}

/// What a detailed run keeps per encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterDetail {
    pub index: usize,
    pub name: String,
    pub start: Vec<UnitSnapshot>,
    pub events: Vec<EventRecord>,
    /// Events the retention policy let go.
    pub dropped: u64,
    pub summaries: Vec<RoundSummary>,
    /// Unit state at the end, for checking a replay against.
    pub finish: Vec<UnitSnapshot>,
}

#[derive(Debug, Clone)]
pub struct DayOutcome {
    pub record: RunRecord,
    /// Empty for survey fidelity.
    pub details: Vec<EncounterDetail>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A party member's state between segments.
#[derive(Debug, Clone)]
struct Member {
    creature: Creature,
    dpr: f64,
    hp: i32,
    dead: bool,
    pools: BTreeMap<ResourceKind, ResourceBalance>,
}

impl Member {
    fn fresh(creature: &Creature) -> Self {
        Self {
            creature: creature.clone(),
            dpr: ai::estimate_dpr(&creature.all_actions()),
            hp: creature.hit_points,
            dead: false,
            pools: creature
                .pooled_maximums()
                .into_iter()
                .map(|(kind, max)| (kind, ResourceBalance::full(max)))
                .collect(),
        }
    }

    fn hp_fraction(&self) -> f64 {
        if self.dead || self.creature.hit_points <= 0 {
            return 0.0;
        }
        f64::from(self.hp.max(0)) / f64::from(self.creature.hit_points)
    }

    /// HP and pooled resources, each weighted by slot level, averaged.
    fn resource_fraction(&self) -> f64 {
        if self.dead {
            return 0.0;
        }
        let (current, max) = self
            .pools
            .iter()
            .fold((0.0, 0.0), |(current, max), (kind, balance)| {
                let weight = kind.weight();
                (
                    current + weight * f64::from(balance.current),
                    max + weight * f64::from(balance.max),
                )
            });
        if max > 0.0 {
            (self.hp_fraction() + current / max) / 2.0
        } else {
            self.hp_fraction()
        }
    }

    fn combattant(&self, id: CombattantId) -> Combattant {
        let mut unit = Combattant::from_creature(id, Side::Party, &self.creature, self.dpr);
        unit.state.hp = if self.dead { 0 } else { self.hp };
        unit.state.dead = self.dead;
        for (kind, balance) in &self.pools {
            unit.state.resources.insert(kind.clone(), *balance);
        }
        unit
    }

    fn absorb(&mut self, unit: &Combattant) {
        self.hp = unit.state.hp;
        self.dead = unit.state.dead;
        for (kind, balance) in self.pools.iter_mut() {
            if let Some(after) = unit.state.resources.get(kind) {
                *balance = *after;
            }
        }
    }

    fn rest(&mut self, kind: RestKind) {
        if self.dead {
            return;
        }
        match kind {
            RestKind::Short => {
                for (resource, balance) in self.pools.iter_mut() {
                    if self.creature.recharge_for(resource) == RechargeType::ShortRest {
                        balance.current = balance.max;
                    }
                }
                self.spend_hit_dice();
            }
            RestKind::Long => {
                self.hp = self.creature.hit_points;
                for (resource, balance) in self.pools.iter_mut() {
                    if *resource == ResourceKind::HitDice {
                        let recovered = (balance.max / 2).max(1);
                        balance.current = (balance.current + recovered).min(balance.max);
                    } else if self.creature.recharge_for(resource) != RechargeType::Never {
                        balance.current = balance.max;
                    }
                }
            }
        }
    }

    /// Spend hit dice at their average while a whole die would be used.
    fn spend_hit_dice(&mut self) {
        let Some(pool) = self.creature.resources.hit_dice.as_ref() else {
            return;
        };
        let per_die = (pool.die.average().ceil() as i32 + pool.bonus).max(1);
        let Some(dice) = self.pools.get_mut(&ResourceKind::HitDice) else {
            return;
        };
        while dice.current > 0 && self.creature.hit_points - self.hp >= per_die {
            dice.current -= 1;
            self.hp += per_die;
        }
    }
}

fn party_score(members: &[Member]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    100.0 * members.iter().map(Member::hp_fraction).sum::<f64>() / members.len() as f64
}

fn party_resources(members: &[Member]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    members.iter().map(Member::resource_fraction).sum::<f64>() / members.len() as f64
}

/// Expand fractional monster counts: `floor(count)` copies plus one more with
/// probability `frac(count)`.
fn muster(monsters: &[Creature], rng: &mut ChaCha8Rng) -> Vec<Creature> {
    let mut mustered = Vec::new();
    for creature in monsters {
        let count = creature.count.max(0.0);
        let mut copies = count.floor() as usize;
        let fraction = count - count.floor();
        if fraction > 0.0 && rng.gen_bool(fraction.min(1.0)) {
            copies += 1;
        }
        for i in 0..copies {
            let mut copy = creature.clone();
            if copies > 1 {
                copy.name = format!("{} {}", creature.name, i + 1);
            }
            mustered.push(copy);
        }
    }
    mustered
}

/// Runs whole adventuring days for one request.
pub struct DayRunner<'a> {
    request: &'a SimulationRequest,
    config: &'a SimConfig,
}

impl<'a> DayRunner<'a> {
    pub fn new(request: &'a SimulationRequest, config: &'a SimConfig) -> Self {
        Self { request, config }
    }

    /// Run the day once with the generator seeded from `seed`.
    pub fn run(
        &self,
        resolver: &mut ActionResolver,
        run_index: u32,
        seed: u64,
        fidelity: Fidelity,
    ) -> Result<DayOutcome, InvariantError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut members: Vec<Member> = self.request.party.iter().map(Member::fresh).collect();
        let mut encounters = Vec::new();
        let mut details = Vec::new();
        let mut diagnostics = Vec::new();
        let mut rounds = 0;

        for segment in &self.request.timeline {
            let encounter = match segment {
                TimelineSegment::Rest { kind } => {
                    members.iter_mut().for_each(|member| member.rest(*kind));
                    continue;
                }
                TimelineSegment::Combat(encounter) => encounter,
            };
            let index = encounters.len();
            let entering = party_resources(&members);
            if members.iter().all(|member| member.dead) {
                encounters.push(EncounterRecord {
                    index,
                    name: encounter.name.clone(),
                    outcome: EncounterOutcome::NotReached,
                    rounds: 0,
                    deaths: 0,
                    score: 0.0,
                    resources_entering: entering,
                    resources_leaving: entering,
                });
                continue;
            }

            let mut units: Vec<Combattant> = members
                .iter()
                .enumerate()
                .map(|(i, member)| member.combattant(CombattantId(i as u32)))
                .collect();
            for creature in muster(&encounter.monsters, &mut rng) {
                let id = CombattantId(units.len() as u32);
                let dpr = ai::estimate_dpr(&creature.all_actions());
                units.push(Combattant::from_creature(id, Side::Monsters, &creature, dpr));
            }
            let dead_before = members.iter().filter(|member| member.dead).count() as u32;

            let result: EncounterResult = EncounterEngine::new(self.config, resolver).run(
                index as u32,
                units,
                rng,
                fidelity,
            )?;
            rng = result.rng;
            for (member, unit) in members.iter_mut().zip(&result.units) {
                member.absorb(unit);
            }
            let dead_after = members.iter().filter(|member| member.dead).count() as u32;
            rounds += result.rounds;

            if fidelity.keeps_summaries() {
                details.push(EncounterDetail {
                    index,
                    name: encounter.name.clone(),
                    start: result.start,
                    dropped: result.events.dropped(),
                    events: result.events.into_records(),
                    summaries: result.summaries,
                    finish: result.units.iter().map(UnitSnapshot::of).collect(),
                });
            }
            diagnostics.extend(result.diagnostics);
            encounters.push(EncounterRecord {
                index,
                name: encounter.name.clone(),
                outcome: result.outcome,
                rounds: result.rounds,
                deaths: dead_after - dead_before,
                score: party_score(&members),
                resources_entering: entering,
                resources_leaving: party_resources(&members),
            });
        }

        let outcome = day_outcome(&encounters);
        let record = RunRecord {
            run_index,
            seed,
            score: party_score(&members),
            deaths: members.iter().filter(|member| member.dead).count() as u32,
            rounds,
            outcome,
            failed: false,
            encounters,
        };
        Ok(DayOutcome {
            record,
            details,
            diagnostics,
        })
    }
}

/// Defeat if any encounter was lost, else timeout if any stalled.
fn day_outcome(encounters: &[EncounterRecord]) -> EncounterOutcome {
    let any = |outcome: EncounterOutcome| encounters.iter().any(|e| e.outcome == outcome);
    if any(EncounterOutcome::Defeat) {
        EncounterOutcome::Defeat
    } else if any(EncounterOutcome::Timeout) {
        EncounterOutcome::Timeout
    } else if encounters.is_empty() {
        EncounterOutcome::NotReached
    } else {
        EncounterOutcome::Victory
    }
}
