//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Weights the action-scoring heuristic multiplies into each candidate's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiWeights {
    /// Per point of expected damage per target.
    pub attack: f64,
    /// Per point of expected healing per injured ally.
    pub heal: f64,
    pub buff_early: f64,
    pub buff_late: f64,
    /// Per dangerous enemy still standing.
    pub debuff: f64,
    pub template_early: f64,
    pub template_late: f64,
    /// Last round that counts as early.
    pub early_round_cutoff: u32,
}

impl Default for AiWeights {
    fn default() -> Self {
        Self {
            attack: 10.0,
            heal: 15.0,
            buff_early: 50.0,
            buff_late: 20.0,
            debuff: 30.0,
            template_early: 100.0,
            template_late: 40.0,
            early_round_cutoff: 2,
        }
    }
}

impl AiWeights {
    pub fn is_early(&self, round: u32) -> bool {
        round <= self.early_round_cutoff
    }
}

/// Death and drain limits for each difficulty tier. Deaths are compared at the
/// best, median and worst outcome; drain is a fraction in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub trivial_max_drain: f64,
    pub safe_worst_deaths: u32,
    pub safe_min_drain: f64,
    pub safe_max_drain: f64,
    pub challenging_median_deaths: u32,
    pub challenging_worst_deaths: u32,
    pub challenging_max_drain: f64,
    pub boss_best_deaths: u32,
    pub boss_max_drain: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            trivial_max_drain: 0.10,
            safe_worst_deaths: 1,
            safe_min_drain: 0.10,
            safe_max_drain: 0.30,
            challenging_median_deaths: 1,
            challenging_worst_deaths: 2,
            challenging_max_drain: 0.60,
            boss_best_deaths: 1,
            boss_max_drain: 0.90,
        }
    }
}

/// Simulation limits, batch shape and heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub max_rounds: u32,
    pub max_turns: u32,
    pub max_actions_per_turn: u32,
    /// Reactions fired per drain before the cascade is cut off.
    pub max_reaction_cascade: u32,
    /// Events kept per encounter when full fidelity is not requested.
    pub event_retention_cap: usize,
    pub template_cache_capacity: usize,
    /// Iterations per orchestrator chunk.
    pub chunk_size: u32,
    /// Above this many iterations only the survey pass runs.
    pub lightweight_threshold: u32,
    pub tier_b_buckets: u32,
    pub ai: AiWeights,
    pub tiers: TierThresholds,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            max_turns: 200,
            max_actions_per_turn: 8,
            max_reaction_cascade: 64,
            event_retention_cap: 1000,
            template_cache_capacity: 1000,
            chunk_size: 150,
            lightweight_threshold: 50_000,
            tier_b_buckets: 100,
            ai: AiWeights::default(),
            tiers: TierThresholds::default(),
        }
    }
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = turns;
        self
    }

    pub fn with_chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn with_lightweight_threshold(mut self, threshold: u32) -> Self {
        self.lightweight_threshold = threshold;
        self
    }

    pub fn with_event_retention_cap(mut self, cap: usize) -> Self {
        self.event_retention_cap = cap;
        self
    }

    pub fn with_template_cache_capacity(mut self, capacity: usize) -> Self {
        self.template_cache_capacity = capacity;
        self
    }

    pub fn with_ai_weights(mut self, weights: AiWeights) -> Self {
        self.ai = weights;
        self
    }

    pub fn with_tier_thresholds(mut self, tiers: TierThresholds) -> Self {
        self.tiers = tiers;
        self
    }
}
