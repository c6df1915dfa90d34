//! Difficulty tiers and the auto-adjust search.
//!
//! An encounter's tier comes from its death profile (deaths at the best,
//! median and worst outcome) and how much of the party's resources it drains.
//! The contextual tier then shifts that verdict by how depleted the party is
//! when the encounter starts.

use crate::config::{SimConfig, TierThresholds};
use crate::error::SimError;
use crate::model::{Creature, Encounter, SimulationRequest, TimelineSegment, ValidationError};
use crate::orchestrator::analysis::Analysis;
use crate::orchestrator::BatchRunner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Trivial,
    Safe,
    Challenging,
    Boss,
    Failed,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Trivial,
        Tier::Safe,
        Tier::Challenging,
        Tier::Boss,
        Tier::Failed,
    ];

    fn rank(self) -> usize {
        self as usize
    }

    /// Move `steps` tiers harder, stopping at Failed.
    pub fn shifted(self, steps: u32) -> Tier {
        let rank = (self.rank() + steps as usize).min(Tier::ALL.len() - 1);
        Tier::ALL[rank]
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Trivial => "Trivial",
            Tier::Safe => "Safe",
            Tier::Challenging => "Challenging",
            Tier::Boss => "Boss",
            Tier::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tier '{0}'")]
pub struct ParseTierError(pub String);

impl FromStr for Tier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|tier| tier.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseTierError(s.to_string()))
    }
}

/// Party deaths at the best (P99), median (P50) and worst (P1) outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathProfile {
    pub best: u32,
    pub median: u32,
    pub worst: u32,
}

/// The isolated tier: first matching rule wins.
pub fn classify(
    deaths: &DeathProfile,
    drain: f64,
    party_size: usize,
    thresholds: &TierThresholds,
) -> Tier {
    let t = thresholds;
    if deaths.worst == 0 && drain < t.trivial_max_drain {
        Tier::Trivial
    } else if deaths.best == 0
        && deaths.median == 0
        && deaths.worst <= t.safe_worst_deaths
        && drain >= t.safe_min_drain
        && drain <= t.safe_max_drain
    {
        Tier::Safe
    } else if deaths.best == 0
        && deaths.median <= t.challenging_median_deaths
        && deaths.worst <= t.challenging_worst_deaths
        && drain <= t.challenging_max_drain
    {
        Tier::Challenging
    } else if deaths.best <= t.boss_best_deaths
        && (deaths.median as usize) < party_size
        && drain <= t.boss_max_drain
    {
        Tier::Boss
    } else {
        Tier::Failed
    }
}

/// Tiers added for a party entering with `entering` of its resources left.
pub fn context_shift(entering: f64) -> u32 {
    if entering >= 0.85 {
        0
    } else if entering >= 0.70 {
        1
    } else if entering >= 0.40 {
        2
    } else {
        3
    }
}

pub fn contextual_tier(isolated: Tier, entering: f64) -> Tier {
    isolated.shifted(context_shift(entering))
}

/// Advisory change to one monster's stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatDelta {
    pub monster: String,
    pub hit_points: i32,
    pub armor_class: i32,
    pub save_bonus: i32,
}

fn max_steps_default() -> u32 {
    8
}

/// Tune one encounter toward a target tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoAdjustRequest {
    pub party: Vec<Creature>,
    pub encounter: Encounter,
    pub target: Tier,
    #[serde(default = "default_adjust_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "max_steps_default")]
    pub max_steps: u32,
}

fn default_adjust_iterations() -> u32 {
    500
}

impl AutoAdjustRequest {
    pub fn new(party: Vec<Creature>, encounter: Encounter, target: Tier) -> Self {
        Self {
            party,
            encounter,
            target,
            iterations: default_adjust_iterations(),
            seed: None,
            max_steps: max_steps_default(),
        }
    }

    /// Take the `index`-th encounter of a day, with the day's party.
    pub fn from_request(
        request: &SimulationRequest,
        index: usize,
        target: Tier,
    ) -> Result<Self, ValidationError> {
        let encounter = request
            .encounters()
            .nth(index)
            .cloned()
            .ok_or_else(|| ValidationError::Invalid {
                path: format!("timeline.encounters[{}]", index),
                message: "no such encounter".to_string(),
            })?;
        Ok(Self {
            iterations: request.iterations,
            seed: request.seed,
            ..Self::new(request.party.clone(), encounter, target)
        })
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoAdjustResult {
    pub initial: Tier,
    pub tier: Tier,
    pub target: Tier,
    pub reached: bool,
    /// Signed scaling step of the proposal; positive is harder.
    pub step: i32,
    pub deltas: Vec<StatDelta>,
    /// Analysis of the proposed encounter.
    pub analysis: Analysis,
}

/// `creature` scaled `step` steps harder (negative is easier).
fn scaled(creature: &Creature, step: i32) -> (Creature, StatDelta) {
    let mut scaled = creature.clone();
    let hp = (f64::from(creature.hit_points) * (1.0 + 0.1 * f64::from(step))).round() as i32;
    scaled.hit_points = hp.max(1);
    scaled.armor_class = creature.armor_class + step / 2;
    scaled.save_bonus = creature.save_bonus + step / 2;
    scaled.saves = creature.saves.shifted(step / 2);
    let delta = StatDelta {
        monster: creature.name.clone(),
        hit_points: scaled.hit_points - creature.hit_points,
        armor_class: step / 2,
        save_bonus: step / 2,
    };
    (scaled, delta)
}

/// Searches monster stat scalings with survey-only batches. Every step uses
/// the same base seed so steps differ only by the stats.
pub struct AutoBalancer {
    config: SimConfig,
}

impl AutoBalancer {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    fn evaluate(
        &self,
        request: &AutoAdjustRequest,
        seed: u64,
        step: i32,
    ) -> Result<(Tier, Vec<StatDelta>, Analysis), SimError> {
        let (monsters, deltas): (Vec<Creature>, Vec<StatDelta>) = request
            .encounter
            .monsters
            .iter()
            .map(|monster| scaled(monster, step))
            .unzip();
        let day = SimulationRequest::new(
            request.party.clone(),
            vec![TimelineSegment::Combat(Encounter::new(
                request.encounter.name.clone(),
                monsters,
            ))],
        )
        .with_iterations(request.iterations)
        .with_seed(seed);
        let result = BatchRunner::new(day, self.config.clone())?
            .survey_only()
            .run_to_completion()?;
        let tier = result
            .analysis
            .encounters
            .first()
            .map(|encounter| encounter.isolated)
            .unwrap_or(Tier::Failed);
        debug!(step, %tier, "auto-adjust step evaluated");
        Ok((tier, deltas, result.analysis))
    }

    pub fn adjust(&self, request: &AutoAdjustRequest) -> Result<AutoAdjustResult, SimError> {
        let seed = request.seed.unwrap_or_else(rand::random);
        let (initial, mut deltas, mut analysis) = self.evaluate(request, seed, 0)?;
        let mut tier = initial;
        let mut step: i32 = 0;
        // Harder when the encounter is easier than asked for.
        let direction: i32 = if initial < request.target { 1 } else { -1 };

        while tier != request.target && step.unsigned_abs() < request.max_steps {
            let next = step + direction;
            let (next_tier, next_deltas, next_analysis) = self.evaluate(request, seed, next)?;
            step = next;
            tier = next_tier;
            deltas = next_deltas;
            analysis = next_analysis;
            let overshot = if direction > 0 {
                tier > request.target
            } else {
                tier < request.target
            };
            if overshot {
                break;
            }
        }

        Ok(AutoAdjustResult {
            initial,
            tier,
            target: request.target,
            reached: tier == request.target,
            step,
            deltas,
            analysis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(best: u32, median: u32, worst: u32) -> DeathProfile {
        DeathProfile {
            best,
            median,
            worst,
        }
    }

    #[test]
    fn test_classify_rules_in_order() {
        let t = TierThresholds::default();
        assert_eq!(classify(&profile(0, 0, 0), 0.05, 4, &t), Tier::Trivial);
        assert_eq!(classify(&profile(0, 0, 0), 0.20, 4, &t), Tier::Safe);
        assert_eq!(classify(&profile(0, 0, 1), 0.20, 4, &t), Tier::Safe);
        assert_eq!(classify(&profile(0, 1, 2), 0.50, 4, &t), Tier::Challenging);
        assert_eq!(classify(&profile(1, 2, 4), 0.80, 4, &t), Tier::Boss);
        assert_eq!(classify(&profile(1, 4, 4), 0.80, 4, &t), Tier::Failed);
        assert_eq!(classify(&profile(0, 0, 0), 0.95, 4, &t), Tier::Failed);
    }

    #[test]
    fn test_low_drain_with_a_death_is_not_safe() {
        let t = TierThresholds::default();
        assert_eq!(classify(&profile(0, 0, 1), 0.05, 4, &t), Tier::Challenging);
        assert_eq!(classify(&profile(0, 0, 1), 0.10, 4, &t), Tier::Safe);
        assert_eq!(classify(&profile(0, 0, 0), 0.10, 4, &t), Tier::Safe);
    }

    #[test]
    fn test_context_shift_bands() {
        assert_eq!(context_shift(1.0), 0);
        assert_eq!(context_shift(0.85), 0);
        assert_eq!(context_shift(0.84), 1);
        assert_eq!(context_shift(0.70), 1);
        assert_eq!(context_shift(0.69), 2);
        assert_eq!(context_shift(0.40), 2);
        assert_eq!(context_shift(0.39), 3);
    }

    #[test]
    fn test_depleted_party_fails_a_safe_encounter() {
        assert_eq!(contextual_tier(Tier::Safe, 1.0), Tier::Safe);
        assert_eq!(contextual_tier(Tier::Safe, 0.75), Tier::Challenging);
        assert_eq!(contextual_tier(Tier::Safe, 0.10), Tier::Failed);
        assert_eq!(contextual_tier(Tier::Boss, 0.5), Tier::Failed);
    }

    #[test]
    fn test_tier_parse_and_display() {
        for tier in Tier::ALL {
            assert_eq!(tier.to_string().parse::<Tier>().unwrap(), tier);
        }
        assert_eq!("boss".parse::<Tier>().unwrap(), Tier::Boss);
        assert!("deadly".parse::<Tier>().is_err());
    }

    #[test]
    fn test_scaling_steps() {
        let ogre = Creature::new("Ogre", 60, 11).with_save_bonus(2);
        let (harder, delta) = scaled(&ogre, 3);
        assert_eq!(harder.hit_points, 78);
        assert_eq!(harder.armor_class, 12);
        assert_eq!(delta.hit_points, 18);
        let (easier, delta) = scaled(&ogre, -2);
        assert_eq!(easier.hit_points, 48);
        assert_eq!(easier.armor_class, 10);
        assert_eq!(easier.save_bonus, 1);
        assert_eq!(delta.armor_class, -1);
    }
}
