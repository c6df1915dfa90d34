//! Seed selection: pick the surveyed runs worth re-simulating.
//!
//! Runs are ranked by `(score, run_index)` so the ranking, and therefore the
//! selection, is a pure function of the survey. Failed runs never take part.

use crate::day::RunRecord;
use serde::{Deserialize, Serialize};

/// Global percentile targets for Tier A.
pub const TIER_A_PERCENTILES: [f64; 11] = [
    5.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 95.0,
];

/// Index into a sorted array of `n` values nearest to percentile `p`.
pub fn nearest_rank(n: usize, percentile: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let rank = (percentile.clamp(0.0, 100.0) / 100.0 * (n - 1) as f64).round() as usize;
    rank.min(n - 1)
}

/// Completed runs in ascending score order.
pub fn ranked(runs: &[RunRecord]) -> Vec<&RunRecord> {
    let mut ranked: Vec<&RunRecord> = runs.iter().filter(|run| !run.failed).collect();
    ranked.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then(a.run_index.cmp(&b.run_index))
    });
    ranked
}

/// A surveyed run chosen to stand for a percentile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentilePick {
    pub percentile: f64,
    pub run_index: u32,
    pub seed: u64,
    pub score: f64,
    pub deaths: u32,
}

impl PercentilePick {
    fn of(run: &RunRecord, percentile: f64) -> Self {
        Self {
            percentile,
            run_index: run.run_index,
            seed: run.seed,
            score: run.score,
            deaths: run.deaths,
        }
    }
}

/// One encounter's run, identified by the whole-day run it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterPick {
    pub run_index: u32,
    pub seed: u64,
    pub score: f64,
    pub deaths: u32,
}

/// Worst, median and best outcome of one encounter across the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterExtremes {
    pub index: usize,
    pub name: String,
    pub min: EncounterPick,
    pub median: EncounterPick,
    pub max: EncounterPick,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedSelection {
    pub tier_a: Vec<PercentilePick>,
    pub tier_b: Vec<PercentilePick>,
    pub tier_c: Vec<EncounterExtremes>,
}

impl SeedSelection {
    pub fn select(runs: &[RunRecord], buckets: u32) -> Self {
        let ranked = ranked(runs);
        Self {
            tier_a: tier_a(&ranked),
            tier_b: tier_b(&ranked, buckets),
            tier_c: tier_c(&ranked),
        }
    }

    /// The Tier-A pick nearest the median.
    pub fn median(&self) -> Option<&PercentilePick> {
        self.tier_a
            .iter()
            .min_by(|a, b| (a.percentile - 50.0).abs().total_cmp(&(b.percentile - 50.0).abs()))
    }
}

pub fn tier_a(ranked: &[&RunRecord]) -> Vec<PercentilePick> {
    if ranked.is_empty() {
        return Vec::new();
    }
    TIER_A_PERCENTILES
        .iter()
        .map(|p| PercentilePick::of(ranked[nearest_rank(ranked.len(), *p)], *p))
        .collect()
}

/// The median run of each of `buckets` equal-width percentile buckets.
pub fn tier_b(ranked: &[&RunRecord], buckets: u32) -> Vec<PercentilePick> {
    let buckets = (buckets as usize).min(ranked.len());
    (0..buckets)
        .map(|bucket| {
            let p = (bucket as f64 + 0.5) * 100.0 / buckets as f64;
            PercentilePick::of(ranked[nearest_rank(ranked.len(), p)], p)
        })
        .collect()
}

/// Per-encounter extremes, straight from the survey numbers.
pub fn tier_c(ranked: &[&RunRecord]) -> Vec<EncounterExtremes> {
    let Some(first) = ranked.first() else {
        return Vec::new();
    };
    first
        .encounters
        .iter()
        .map(|encounter| {
            let mut picks: Vec<EncounterPick> = ranked
                .iter()
                .filter_map(|run| {
                    run.encounters.get(encounter.index).map(|e| EncounterPick {
                        run_index: run.run_index,
                        seed: run.seed,
                        score: e.score,
                        deaths: e.deaths,
                    })
                })
                .collect();
            picks.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.run_index.cmp(&b.run_index)));
            let median = picks[nearest_rank(picks.len(), 50.0)].clone();
            EncounterExtremes {
                index: encounter.index,
                name: encounter.name.clone(),
                min: picks[0].clone(),
                median,
                max: picks[picks.len() - 1].clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day::EncounterRecord;
    use crate::events::EncounterOutcome;

    fn run(run_index: u32, score: f64) -> RunRecord {
        RunRecord {
            run_index,
            seed: u64::from(run_index) * 31,
            score,
            deaths: 0,
            rounds: 3,
            outcome: EncounterOutcome::Victory,
            failed: false,
            encounters: vec![EncounterRecord {
                index: 0,
                name: "Only".to_string(),
                outcome: EncounterOutcome::Victory,
                rounds: 3,
                deaths: 0,
                score,
                resources_entering: 1.0,
                resources_leaving: score / 100.0,
            }],
        }
    }

    #[test]
    fn test_nearest_rank() {
        assert_eq!(nearest_rank(101, 5.0), 5);
        assert_eq!(nearest_rank(101, 95.0), 95);
        assert_eq!(nearest_rank(10, 50.0), 5);
        assert_eq!(nearest_rank(1, 95.0), 0);
        assert_eq!(nearest_rank(0, 50.0), 0);
    }

    #[test]
    fn test_tier_a_picks_by_rank() {
        // Scores in reverse index order so rank and index differ
        let runs: Vec<RunRecord> = (0..101).map(|i| run(i, f64::from(100 - i))).collect();
        let selection = SeedSelection::select(&runs, 100);
        assert_eq!(selection.tier_a.len(), 11);
        let p5 = &selection.tier_a[0];
        assert_eq!(p5.score, 5.0);
        assert_eq!(p5.run_index, 95);
        assert_eq!(selection.median().unwrap().score, 50.0);
    }

    #[test]
    fn test_failed_runs_excluded() {
        let mut runs: Vec<RunRecord> = (0..11).map(|i| run(i, f64::from(i) * 10.0)).collect();
        runs.push(RunRecord::failed(11, 0));
        let ranked = ranked(&runs);
        assert_eq!(ranked.len(), 11);
        assert!(ranked.iter().all(|r| !r.failed));
    }

    #[test]
    fn test_tier_b_bucket_count() {
        let runs: Vec<RunRecord> = (0..40).map(|i| run(i, f64::from(i))).collect();
        assert_eq!(SeedSelection::select(&runs, 100).tier_b.len(), 40);
        let five = SeedSelection::select(&runs, 5).tier_b;
        assert_eq!(five.len(), 5);
        assert_eq!(five[0].percentile, 10.0);
        assert_eq!(five[0].score, 4.0);
    }

    #[test]
    fn test_ties_ranked_by_run_index() {
        let runs: Vec<RunRecord> = (0..5).rev().map(|i| run(i, 50.0)).collect();
        let indices: Vec<u32> = ranked(&runs).iter().map(|r| r.run_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_tier_c_extremes() {
        let runs: Vec<RunRecord> = [30.0, 90.0, 10.0, 60.0, 70.0]
            .iter()
            .enumerate()
            .map(|(i, s)| run(i as u32, *s))
            .collect();
        let extremes = &SeedSelection::select(&runs, 100).tier_c[0];
        assert_eq!(extremes.min.run_index, 2);
        assert_eq!(extremes.median.score, 60.0);
        assert_eq!(extremes.max.run_index, 1);
    }
}
