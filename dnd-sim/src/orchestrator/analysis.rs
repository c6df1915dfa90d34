//! Aggregate statistics over a surveyed batch.

use super::selection::{nearest_rank, ranked, PercentilePick, SeedSelection};
use crate::balance::{classify, contextual_tier, DeathProfile, Tier};
use crate::config::TierThresholds;
use crate::day::{EncounterRecord, RunRecord};
use crate::engine::RoundSummary;
use crate::events::EncounterOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean outcome of one tenth of the score-sorted runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decile {
    /// 1 is the worst-scoring tenth.
    pub decile: u32,
    pub runs: u32,
    pub mean_score: f64,
    pub mean_deaths: f64,
    pub mean_rounds: f64,
}

/// Per-round HP curves of a Tier-B run, one list per encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileTimeline {
    pub percentile: f64,
    pub run_index: u32,
    pub score: f64,
    pub encounters: Vec<Vec<RoundSummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterAnalysis {
    pub index: usize,
    pub name: String,
    /// Fraction of completed runs that reached and won this encounter.
    pub win_rate: f64,
    pub deaths: DeathProfile,
    /// Mean share of the entering resources this encounter consumed.
    pub drain: f64,
    /// Mean party resources on entry.
    pub resources_entering: f64,
    pub isolated: Tier,
    pub contextual: Tier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub runs_completed: u32,
    pub runs_failed: u32,
    pub win_rate: f64,
    pub mean_score: f64,
    pub deciles: Vec<Decile>,
    /// Total rounds in the day mapped to the number of runs that took that long.
    pub durations: BTreeMap<u32, u32>,
    pub percentiles: Vec<PercentilePick>,
    pub timelines: Vec<PercentileTimeline>,
    pub encounters: Vec<EncounterAnalysis>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Win rate and mean score of whatever has been surveyed so far.
pub fn running_totals(runs: &[RunRecord]) -> (f64, f64) {
    let done: Vec<&RunRecord> = runs.iter().filter(|run| !run.failed).collect();
    let wins = done
        .iter()
        .filter(|run| run.outcome == EncounterOutcome::Victory)
        .count();
    let win_rate = if done.is_empty() {
        0.0
    } else {
        wins as f64 / done.len() as f64
    };
    (win_rate, mean(done.iter().map(|run| run.score)))
}

fn deciles(ranked: &[&RunRecord]) -> Vec<Decile> {
    let n = ranked.len();
    if n == 0 {
        return Vec::new();
    }
    (0..10)
        .map(|d| {
            let slice = &ranked[d * n / 10..(d + 1) * n / 10];
            Decile {
                decile: d as u32 + 1,
                runs: slice.len() as u32,
                mean_score: mean(slice.iter().map(|run| run.score)),
                mean_deaths: mean(slice.iter().map(|run| f64::from(run.deaths))),
                mean_rounds: mean(slice.iter().map(|run| f64::from(run.rounds))),
            }
        })
        .collect()
}

fn encounter_analysis(
    ranked: &[&RunRecord],
    index: usize,
    party_size: usize,
    thresholds: &TierThresholds,
) -> Option<EncounterAnalysis> {
    let mut records: Vec<&EncounterRecord> = ranked
        .iter()
        .filter_map(|run| run.encounters.get(index))
        .collect();
    let name = records.first()?.name.clone();
    let total = records.len();
    let wins = records
        .iter()
        .filter(|r| r.outcome == EncounterOutcome::Victory)
        .count();

    // Deaths and drain only mean something where the encounter was fought.
    records.retain(|r| r.outcome != EncounterOutcome::NotReached);
    records.sort_by(|a, b| a.score.total_cmp(&b.score));
    let deaths_at = |p: f64| {
        records
            .get(nearest_rank(records.len(), p))
            .map(|r| r.deaths)
            .unwrap_or(party_size as u32)
    };
    let deaths = DeathProfile {
        best: deaths_at(99.0),
        median: deaths_at(50.0),
        worst: deaths_at(1.0),
    };
    let drain = if records.is_empty() {
        1.0
    } else {
        mean(records.iter().map(|r| {
            if r.resources_entering > 0.0 {
                ((r.resources_entering - r.resources_leaving) / r.resources_entering).clamp(0.0, 1.0)
            } else {
                1.0
            }
        }))
    };
    let resources_entering = mean(records.iter().map(|r| r.resources_entering));
    let isolated = classify(&deaths, drain, party_size, thresholds);

    Some(EncounterAnalysis {
        index,
        name,
        win_rate: wins as f64 / total as f64,
        deaths,
        drain,
        resources_entering,
        isolated,
        contextual: contextual_tier(isolated, resources_entering),
    })
}

impl Analysis {
    pub fn build(
        runs: &[RunRecord],
        selection: &SeedSelection,
        timelines: Vec<PercentileTimeline>,
        party_size: usize,
        thresholds: &TierThresholds,
    ) -> Self {
        let ranked = ranked(runs);
        let (win_rate, mean_score) = running_totals(runs);
        let mut durations = BTreeMap::new();
        for run in &ranked {
            *durations.entry(run.rounds).or_insert(0) += 1;
        }
        let encounter_count = ranked
            .iter()
            .map(|run| run.encounters.len())
            .max()
            .unwrap_or(0);
        let encounters = (0..encounter_count)
            .filter_map(|index| encounter_analysis(&ranked, index, party_size, thresholds))
            .collect();

        Self {
            runs_completed: ranked.len() as u32,
            runs_failed: (runs.len() - ranked.len()) as u32,
            win_rate,
            mean_score,
            deciles: deciles(&ranked),
            durations,
            percentiles: selection.tier_a.clone(),
            timelines,
            encounters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, deaths: u32, score: f64, entering: f64, leaving: f64) -> EncounterRecord {
        EncounterRecord {
            index,
            name: format!("Fight {}", index),
            outcome: if score > 0.0 {
                EncounterOutcome::Victory
            } else {
                EncounterOutcome::Defeat
            },
            rounds: 4,
            deaths,
            score,
            resources_entering: entering,
            resources_leaving: leaving,
        }
    }

    fn run(run_index: u32, encounters: Vec<EncounterRecord>) -> RunRecord {
        let last = encounters.last().cloned();
        RunRecord {
            run_index,
            seed: u64::from(run_index),
            score: last.as_ref().map(|e| e.score).unwrap_or(0.0),
            deaths: encounters.iter().map(|e| e.deaths).sum(),
            rounds: 4 * encounters.len() as u32,
            outcome: last.map(|e| e.outcome).unwrap_or(EncounterOutcome::NotReached),
            failed: false,
            encounters,
        }
    }

    #[test]
    fn test_deciles_cover_every_run() {
        let runs: Vec<RunRecord> = (0..25)
            .map(|i| run(i, vec![record(0, 0, f64::from(i) * 4.0, 1.0, 0.8)]))
            .collect();
        let analysis = Analysis::build(
            &runs,
            &SeedSelection::select(&runs, 10),
            Vec::new(),
            4,
            &TierThresholds::default(),
        );
        assert_eq!(analysis.deciles.len(), 10);
        assert_eq!(analysis.deciles.iter().map(|d| d.runs).sum::<u32>(), 25);
        assert!(analysis.deciles[0].mean_score < analysis.deciles[9].mean_score);
        assert_eq!(analysis.durations[&4], 25);
        // Run 0 scored zero and lost
        assert!((analysis.win_rate - 24.0 / 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_encounter_tiers_and_context() {
        // First fight is a walkover; the second starts with a third of the
        // party's resources left.
        let runs: Vec<RunRecord> = (0..50)
            .map(|i| {
                run(
                    i,
                    vec![
                        record(0, 0, 95.0, 1.0, 0.97),
                        record(1, 0, 60.0, 0.30, 0.25),
                    ],
                )
            })
            .collect();
        let analysis = Analysis::build(
            &runs,
            &SeedSelection::select(&runs, 10),
            Vec::new(),
            4,
            &TierThresholds::default(),
        );
        let first = &analysis.encounters[0];
        assert_eq!(first.isolated, Tier::Trivial);
        assert_eq!(first.contextual, Tier::Trivial);
        let second = &analysis.encounters[1];
        assert_eq!(second.isolated, Tier::Safe);
        assert!((second.drain - 1.0 / 6.0).abs() < 1e-9);
        assert_eq!(second.contextual, Tier::Failed);
    }

    #[test]
    fn test_death_profile_follows_encounter_score() {
        let runs: Vec<RunRecord> = (0..100)
            .map(|i| {
                let deaths = if i < 10 { 2 } else { 0 };
                let score = if i < 10 { 20.0 } else { 80.0 };
                run(i, vec![record(0, deaths, score, 1.0, 0.5)])
            })
            .collect();
        let analysis = Analysis::build(
            &runs,
            &SeedSelection::select(&runs, 10),
            Vec::new(),
            4,
            &TierThresholds::default(),
        );
        let deaths = analysis.encounters[0].deaths;
        assert_eq!(deaths.best, 0);
        assert_eq!(deaths.median, 0);
        assert_eq!(deaths.worst, 2);
        assert_eq!(analysis.encounters[0].isolated, Tier::Challenging);
    }
}
