//! The execution engine: runs one encounter from initiative to the last
//! living side, or to the round and turn caps.

pub mod ai;

use crate::config::SimConfig;
use crate::context::{CostMode, InvariantError, TurnContext};
use crate::diagnostics::Diagnostic;
use crate::dice::Advantage;
use crate::events::{EncounterOutcome, Event, EventLog, Retention, UnitSnapshot};
use crate::model::{Ability, Combattant, CombattantId, Side};
use crate::reactions::ReactionManager;
use crate::resolver::ActionResolver;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// How much of an encounter is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fidelity {
    /// Outcome only.
    Survey,
    /// Outcome plus per-round summaries.
    Timeline,
    /// Summaries plus the most recent events, up to the configured cap.
    Capped,
    /// Summaries plus every event.
    Full,
}

impl Fidelity {
    pub fn retention(self, cap: usize) -> Retention {
        match self {
            Fidelity::Survey | Fidelity::Timeline => Retention::Disabled,
            Fidelity::Capped => Retention::Capped(cap),
            Fidelity::Full => Retention::Full,
        }
    }

    pub fn keeps_summaries(self) -> bool {
        self != Fidelity::Survey
    }
}

/// Both sides' standing at the end of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub party_hp: i32,
    pub monster_hp: i32,
    pub party_alive: u32,
    pub monsters_alive: u32,
}

impl RoundSummary {
    fn capture(ctx: &TurnContext) -> Self {
        let mut summary = RoundSummary {
            round: ctx.round(),
            party_hp: 0,
            monster_hp: 0,
            party_alive: 0,
            monsters_alive: 0,
        };
        for unit in ctx.units().iter().filter(|unit| unit.is_alive()) {
            match unit.side {
                Side::Party => {
                    summary.party_hp += unit.state.hp;
                    summary.party_alive += 1;
                }
                Side::Monsters => {
                    summary.monster_hp += unit.state.hp;
                    summary.monsters_alive += 1;
                }
            }
        }
        summary
    }
}

pub struct EncounterResult {
    pub outcome: EncounterOutcome,
    pub rounds: u32,
    pub turns: u32,
    /// Units in their final state, indexed by id.
    pub units: Vec<Combattant>,
    pub start: Vec<UnitSnapshot>,
    pub events: EventLog,
    pub summaries: Vec<RoundSummary>,
    pub diagnostics: Vec<Diagnostic>,
    /// The generator, handed on to whatever runs next.
    pub rng: ChaCha8Rng,
}

fn decided(ctx: &TurnContext) -> Option<EncounterOutcome> {
    if ctx.side_defeated(Side::Party) {
        Some(EncounterOutcome::Defeat)
    } else if ctx.side_defeated(Side::Monsters) {
        Some(EncounterOutcome::Victory)
    } else {
        None
    }
}

pub struct EncounterEngine<'a> {
    config: &'a SimConfig,
    resolver: &'a mut ActionResolver,
}

impl<'a> EncounterEngine<'a> {
    pub fn new(config: &'a SimConfig, resolver: &'a mut ActionResolver) -> Self {
        Self { config, resolver }
    }

    /// Run one encounter. Units must be indexed by id.
    pub fn run(
        &mut self,
        encounter: u32,
        units: Vec<Combattant>,
        rng: ChaCha8Rng,
        fidelity: Fidelity,
    ) -> Result<EncounterResult, InvariantError> {
        let combattants = units.len() as u32;
        let mut ctx = TurnContext::new(
            units,
            fidelity.retention(self.config.event_retention_cap),
            rng,
        );
        let start = ctx.snapshot();
        let mut reactions = ReactionManager::new(self.config.max_reaction_cascade);
        let mut summaries = Vec::new();

        ctx.emit(Event::EncounterStarted {
            encounter,
            combattants,
        });
        ctx.apply_starting_buffs()?;
        let order = Self::roll_initiative(&mut ctx)?;
        self.settle(&mut ctx, &mut reactions)?;

        let mut turns = 0u32;
        let mut outcome = decided(&ctx);
        while outcome.is_none()
            && ctx.round() < self.config.max_rounds
            && turns < self.config.max_turns
        {
            ctx.begin_round()?;
            self.settle(&mut ctx, &mut reactions)?;
            for &id in &order {
                if decided(&ctx).is_some() || turns >= self.config.max_turns {
                    break;
                }
                if !ctx.unit(id)?.is_alive() {
                    continue;
                }
                turns += 1;
                self.take_turn(&mut ctx, &mut reactions, id)?;
            }
            ctx.end_round()?;
            self.settle(&mut ctx, &mut reactions)?;
            if fidelity.keeps_summaries() {
                summaries.push(RoundSummary::capture(&ctx));
            }
            outcome = decided(&ctx);
        }

        let outcome = outcome.unwrap_or(EncounterOutcome::Timeout);
        let rounds = ctx.round();
        tracing::trace!(encounter, ?outcome, rounds, turns, "encounter finished");
        ctx.emit(Event::EncounterEnded {
            encounter,
            outcome,
            rounds,
        });
        ctx.clear_pending();

        let (units, events, rng) = ctx.finish();
        Ok(EncounterResult {
            outcome,
            rounds,
            turns,
            units,
            start,
            events,
            summaries,
            diagnostics: reactions.into_diagnostics(),
            rng,
        })
    }

    /// Roll initiative for every living unit. Ties go to the higher bonus,
    /// then the lower id.
    fn roll_initiative(ctx: &mut TurnContext) -> Result<Vec<CombattantId>, InvariantError> {
        let contenders: Vec<(CombattantId, i32)> = ctx
            .units()
            .iter()
            .filter(|unit| unit.is_alive())
            .map(|unit| (unit.id, unit.initiative_bonus))
            .collect();
        let mut rolls = Vec::with_capacity(contenders.len());
        for (id, bonus) in contenders {
            let roll = ctx.roll_d20(Advantage::Normal).natural as i32 + bonus;
            ctx.emit(Event::AbilityCheckMade {
                unit: id,
                ability: Ability::Dexterity,
                roll,
                dc: None,
            });
            rolls.push((roll, bonus, id));
        }
        rolls.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        Ok(rolls.into_iter().map(|(_, _, id)| id).collect())
    }

    /// Drain reactions, then any actions they granted.
    fn settle(
        &mut self,
        ctx: &mut TurnContext,
        reactions: &mut ReactionManager,
    ) -> Result<(), InvariantError> {
        reactions.process(ctx)?;
        let mut remaining = self.config.max_reaction_cascade;
        while let Some(granted) = reactions.take_immediate() {
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            self.resolver
                .resolve(ctx, reactions, granted.unit, granted.action, CostMode::Immediate)?;
            reactions.process(ctx)?;
        }
        Ok(())
    }

    fn take_turn(
        &mut self,
        ctx: &mut TurnContext,
        reactions: &mut ReactionManager,
        id: CombattantId,
    ) -> Result<(), InvariantError> {
        ctx.begin_turn(id)?;
        self.settle(ctx, reactions)?;

        for _ in 0..self.config.max_actions_per_turn {
            let unit = ctx.unit(id)?;
            if !unit.is_alive() || unit.is_incapacitated() || decided(ctx).is_some() {
                break;
            }
            let Some(choice) = ai::choose_action(ctx, self.resolver, id, &self.config.ai)? else {
                break;
            };
            tracing::trace!(unit = %id, action = choice.index, score = choice.score, "chose action");
            self.resolver
                .resolve(ctx, reactions, id, choice.index, CostMode::Normal)?;
            self.settle(ctx, reactions)?;
        }

        if ctx.unit(id)?.is_alive() {
            ctx.resolve_save_ends(id)?;
        }
        ctx.end_turn(id)?;
        self.settle(ctx, reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::DiceExpression;
    use crate::model::{Action, Creature};
    use crate::resolver::template::TemplateCache;
    use rand::SeedableRng;

    fn units(party: &[Creature], monsters: &[Creature]) -> Vec<Combattant> {
        let mut all = Vec::new();
        for creature in party {
            let id = CombattantId(all.len() as u32);
            let dpr = ai::estimate_dpr(&creature.all_actions());
            all.push(Combattant::from_creature(id, Side::Party, creature, dpr));
        }
        for creature in monsters {
            let id = CombattantId(all.len() as u32);
            let dpr = ai::estimate_dpr(&creature.all_actions());
            all.push(Combattant::from_creature(id, Side::Monsters, creature, dpr));
        }
        all
    }

    fn run(
        party: &[Creature],
        monsters: &[Creature],
        seed: u64,
        fidelity: Fidelity,
        config: &SimConfig,
    ) -> EncounterResult {
        let mut resolver = ActionResolver::new(TemplateCache::new(16));
        EncounterEngine::new(config, &mut resolver)
            .run(
                0,
                units(party, monsters),
                ChaCha8Rng::seed_from_u64(seed),
                fidelity,
            )
            .unwrap()
    }

    fn knight() -> Creature {
        Creature::new("Knight", 40, 18)
            .with_action(Action::weapon("Longsword", 6, DiceExpression::parse("1d8+4").unwrap()))
    }

    fn goblin() -> Creature {
        Creature::new("Goblin", 7, 13)
            .with_action(Action::weapon("Scimitar", 4, DiceExpression::parse("1d6+2").unwrap()))
    }

    #[test]
    fn test_knight_beats_goblin() {
        let config = SimConfig::default();
        let result = run(&[knight()], &[goblin()], 1, Fidelity::Full, &config);
        assert_eq!(result.outcome, EncounterOutcome::Victory);
        assert!(result.rounds >= 1);
        assert!(!result.units[1].is_alive());
        let names: Vec<&str> = result.events.records().map(|r| r.event.name()).collect();
        assert_eq!(names.first(), Some(&"EncounterStarted"));
        assert_eq!(names.last(), Some(&"EncounterEnded"));
    }

    #[test]
    fn test_round_cap_times_out() {
        let wall = Creature::new("Wall", 1000, 30);
        let config = SimConfig::default().with_max_rounds(3);
        let result = run(&[wall.clone()], &[wall], 2, Fidelity::Timeline, &config);
        assert_eq!(result.outcome, EncounterOutcome::Timeout);
        assert_eq!(result.rounds, 3);
        assert_eq!(result.summaries.len(), 3);
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_turn_cap_times_out() {
        let wall = Creature::new("Wall", 1000, 30);
        let config = SimConfig::default().with_max_turns(5);
        let result = run(&[wall.clone(), wall.clone()], &[wall], 3, Fidelity::Survey, &config);
        assert_eq!(result.outcome, EncounterOutcome::Timeout);
        assert_eq!(result.turns, 5);
        assert!(result.summaries.is_empty());
    }

    #[test]
    fn test_same_seed_same_events() {
        let config = SimConfig::default();
        let party = [knight(), knight()];
        let monsters = [goblin(), goblin(), goblin()];
        let a = run(&party, &monsters, 42, Fidelity::Full, &config);
        let b = run(&party, &monsters, 42, Fidelity::Full, &config);
        assert_eq!(a.events.into_records(), b.events.into_records());
    }

    #[test]
    fn test_dead_units_act_no_more() {
        let config = SimConfig::default();
        let party = [knight(), knight()];
        let monsters = [goblin(), goblin(), goblin(), goblin()];
        for seed in 0..20 {
            let result = run(&party, &monsters, seed, Fidelity::Full, &config);
            let mut dead = std::collections::BTreeSet::new();
            for record in result.events.records() {
                match &record.event {
                    Event::UnitDied { unit, .. } => {
                        assert!(dead.insert(*unit), "{} died twice", unit);
                    }
                    Event::ActionStarted { actor, .. } | Event::TurnStarted { unit: actor } => {
                        assert!(!dead.contains(actor), "{} acted after death", actor);
                    }
                    _ => {}
                }
            }
        }
    }
}
