//! Two-pass batch orchestration.
//!
//! A batch runs in three phases:
//!
//! 1. **Survey** - every iteration, with event retention off, keeping only a
//!    fixed-size [`RunRecord`].
//! 2. **Selection** - pick Tier-A (global percentiles), Tier-B (percentile
//!    buckets) and Tier-C (per-encounter extremes) runs from the survey.
//! 3. **Re-simulation** - re-run only the Tier-A seeds with full events and the
//!    Tier-B seeds with per-round summaries. Seeds are pure functions of
//!    `(base seed, run index)`, so each re-run reproduces its survey run.
//!
//! Work happens in chunks through [`BatchRunner::step`], and cancellation is
//! only observed between chunks.

pub mod analysis;
pub mod selection;

use crate::config::SimConfig;
use crate::day::{run_seed, DayOutcome, DayRunner, EncounterDetail, RunRecord};
use crate::diagnostics::Diagnostic;
use crate::engine::Fidelity;
use crate::error::SimError;
use crate::events::Replay;
use crate::model::{validate_request, SimulationRequest};
use crate::resolver::template::TemplateCache;
use crate::resolver::ActionResolver;
use analysis::{running_totals, Analysis, PercentileTimeline};
use selection::{PercentilePick, SeedSelection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Share of the progress bar given to the survey.
const SURVEY_SHARE: f64 = 0.9;

/// Cooperative cancellation flag, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Survey,
    Selection,
    Resimulation,
    Done,
}

/// Progress after a chunk, with statistics over the runs surveyed so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: Phase,
    pub fraction: f64,
    pub surveyed: u32,
    pub iterations: u32,
    pub win_rate: f64,
    pub mean_score: f64,
}

/// A re-simulated run with everything it kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedRun {
    pub percentile: f64,
    pub record: RunRecord,
    pub encounters: Vec<EncounterDetail>,
}

/// The result bundle of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub base_seed: u64,
    pub iterations: u32,
    /// Only the survey ran, apart from the representative run.
    pub lightweight: bool,
    pub runs: Vec<RunRecord>,
    pub analysis: Analysis,
    pub selection: SeedSelection,
    /// Tier-A runs with full event logs.
    pub detailed: Vec<DetailedRun>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SimulationResult {
    /// The detailed run closest to the median.
    pub fn representative(&self) -> Option<&DetailedRun> {
        self.detailed
            .iter()
            .min_by(|a, b| (a.percentile - 50.0).abs().total_cmp(&(b.percentile - 50.0).abs()))
    }
}

#[derive(Debug, Clone, Copy)]
struct Job {
    pick_index: usize,
    tier_a: bool,
}

/// Chunked driver of one batch.
pub struct BatchRunner {
    request: SimulationRequest,
    config: SimConfig,
    resolver: ActionResolver,
    base_seed: u64,
    lightweight: bool,
    survey_only: bool,
    cancel: Option<CancellationToken>,
    phase: Phase,
    runs: Vec<RunRecord>,
    selection: SeedSelection,
    jobs: VecDeque<Job>,
    job_count: usize,
    detailed: Vec<DetailedRun>,
    timelines: Vec<PercentileTimeline>,
    diagnostics: Vec<Diagnostic>,
    result: Option<SimulationResult>,
    /// Runs forced to fail with an invariant violation.
    #[cfg(test)]
    fail_runs: std::collections::BTreeSet<u32>,
}

impl BatchRunner {
    /// Validate the request and prepare the survey. Nothing is simulated yet.
    pub fn new(request: SimulationRequest, config: SimConfig) -> Result<Self, SimError> {
        validate_request(&request)?;
        let base_seed = request.seed.unwrap_or_else(rand::random);
        let lightweight = request.iterations > config.lightweight_threshold;
        if lightweight {
            info!(
                iterations = request.iterations,
                threshold = config.lightweight_threshold,
                "iteration count over threshold, running survey only"
            );
        }
        Ok(Self {
            resolver: resolver(&config),
            runs: Vec::with_capacity(request.iterations as usize),
            request,
            config,
            base_seed,
            lightweight,
            survey_only: false,
            cancel: None,
            phase: Phase::Survey,
            selection: SeedSelection::default(),
            jobs: VecDeque::new(),
            job_count: 0,
            detailed: Vec::new(),
            timelines: Vec::new(),
            diagnostics: Vec::new(),
            result: None,
            #[cfg(test)]
            fail_runs: Default::default(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Skip re-simulation entirely, including the representative run.
    pub fn survey_only(mut self) -> Self {
        self.survey_only = true;
        self
    }

    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn progress(&self) -> Progress {
        let iterations = self.request.iterations;
        let surveyed = self.runs.len() as u32;
        let fraction = match self.phase {
            Phase::Survey => SURVEY_SHARE * f64::from(surveyed) / f64::from(iterations.max(1)),
            Phase::Selection => SURVEY_SHARE,
            Phase::Resimulation => {
                let done = self.job_count - self.jobs.len();
                SURVEY_SHARE + (1.0 - SURVEY_SHARE) * done as f64 / self.job_count.max(1) as f64
            }
            Phase::Done => 1.0,
        };
        let (win_rate, mean_score) = running_totals(&self.runs);
        Progress {
            phase: self.phase,
            fraction,
            surveyed,
            iterations,
            win_rate,
            mean_score,
        }
    }

    /// Run one day, turning an invariant violation into a failed record.
    fn run_day(&mut self, run_index: u32, fidelity: Fidelity) -> Option<DayOutcome> {
        let seed = run_seed(self.base_seed, run_index);
        match self.attempt(run_index, seed, fidelity) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(run_index, seed, error = %err, "run failed");
                self.diagnostics.push(Diagnostic::RunFailed {
                    run_index,
                    seed,
                    message: err.to_string(),
                });
                None
            }
        }
    }

    fn attempt(&mut self, run_index: u32, seed: u64, fidelity: Fidelity) -> Result<DayOutcome, SimError> {
        #[cfg(test)]
        if self.fail_runs.contains(&run_index) {
            return Err(SimError::Invariant {
                run_index,
                seed,
                source: crate::context::InvariantError::UnknownCombattant(
                    crate::model::CombattantId(u32::MAX),
                ),
            });
        }
        run_seeded(&self.request, &self.config, &mut self.resolver, run_index, seed, fidelity)
    }

    /// Advance by one chunk of work.
    pub fn step(&mut self) -> Result<Progress, SimError> {
        if self.cancel.as_ref().map(|t| t.is_cancelled()).unwrap_or(false) {
            debug!(phase = ?self.phase, "batch cancelled");
            return Err(SimError::Cancelled);
        }
        match self.phase {
            Phase::Survey => self.survey_chunk(),
            Phase::Selection => self.select(),
            Phase::Resimulation => self.resimulate_chunk(),
            Phase::Done => {}
        }
        Ok(self.progress())
    }

    fn survey_chunk(&mut self) {
        let start = self.runs.len() as u32;
        let end = (start + self.config.chunk_size.max(1)).min(self.request.iterations);
        for run_index in start..end {
            let record = match self.run_day(run_index, Fidelity::Survey) {
                Some(outcome) => {
                    self.diagnostics.extend(outcome.diagnostics);
                    outcome.record
                }
                None => RunRecord::failed(run_index, run_seed(self.base_seed, run_index)),
            };
            self.runs.push(record);
        }
        debug!(start, end, "survey chunk complete");
        if end >= self.request.iterations {
            self.phase = Phase::Selection;
        }
    }

    fn select(&mut self) {
        let buckets = self
            .config
            .tier_b_buckets
            .min(self.request.max_k.unwrap_or(u32::MAX));
        self.selection = SeedSelection::select(&self.runs, buckets);

        if !self.survey_only {
            if self.lightweight {
                if let Some(pick_index) = self.median_pick() {
                    self.jobs.push_back(Job {
                        pick_index,
                        tier_a: true,
                    });
                }
            } else {
                self.jobs.extend((0..self.selection.tier_a.len()).map(|pick_index| Job {
                    pick_index,
                    tier_a: true,
                }));
                self.jobs.extend((0..self.selection.tier_b.len()).map(|pick_index| Job {
                    pick_index,
                    tier_a: false,
                }));
            }
        }
        self.job_count = self.jobs.len();
        debug!(
            tier_a = self.selection.tier_a.len(),
            tier_b = self.selection.tier_b.len(),
            jobs = self.job_count,
            "seeds selected"
        );
        self.phase = Phase::Resimulation;
    }

    fn median_pick(&self) -> Option<usize> {
        let median = self.selection.median()?;
        self.selection
            .tier_a
            .iter()
            .position(|pick| pick.percentile == median.percentile)
    }

    fn resimulate_chunk(&mut self) {
        for _ in 0..self.config.chunk_size.max(1) {
            let Some(job) = self.jobs.pop_front() else {
                break;
            };
            let pick = if job.tier_a {
                self.selection.tier_a[job.pick_index].clone()
            } else {
                self.selection.tier_b[job.pick_index].clone()
            };
            let fidelity = if job.tier_a {
                Fidelity::Full
            } else {
                Fidelity::Timeline
            };
            let Some(outcome) = self.run_day(pick.run_index, fidelity) else {
                continue;
            };
            self.check_consistency(&pick, &outcome.record);
            if job.tier_a {
                self.check_replay(&outcome);
                self.detailed.push(DetailedRun {
                    percentile: pick.percentile,
                    record: outcome.record,
                    encounters: outcome.details,
                });
            } else {
                self.timelines.push(PercentileTimeline {
                    percentile: pick.percentile,
                    run_index: pick.run_index,
                    score: outcome.record.score,
                    encounters: outcome.details.into_iter().map(|d| d.summaries).collect(),
                });
            }
        }
        if self.jobs.is_empty() {
            self.finish();
        }
    }

    fn check_consistency(&mut self, pick: &PercentilePick, record: &RunRecord) {
        if record.score != pick.score {
            warn!(
                run_index = pick.run_index,
                surveyed = pick.score,
                resimulated = record.score,
                "re-simulated score differs from survey"
            );
            self.diagnostics.push(Diagnostic::ConsistencyMismatch {
                run_index: pick.run_index,
                seed: pick.seed,
                surveyed: pick.score,
                resimulated: record.score,
            });
        }
    }

    /// Replay each fully logged encounter and compare against its end state.
    fn check_replay(&mut self, outcome: &DayOutcome) {
        for detail in &outcome.details {
            if detail.dropped > 0 {
                continue;
            }
            let mut replay = Replay::from_snapshots(&detail.start);
            replay.apply_all(&detail.events);
            for unit in &detail.finish {
                let hp_matches = replay.hp.get(&unit.id) == Some(&unit.hp);
                if !hp_matches {
                    warn!(
                        run_index = outcome.record.run_index,
                        encounter = detail.index,
                        unit = %unit.name,
                        "replay does not reproduce final hit points"
                    );
                    self.diagnostics.push(Diagnostic::ReplayMismatch {
                        run_index: outcome.record.run_index,
                        encounter: detail.index,
                        unit: unit.name.clone(),
                    });
                }
            }
        }
    }

    fn finish(&mut self) {
        let analysis = Analysis::build(
            &self.runs,
            &self.selection,
            std::mem::take(&mut self.timelines),
            self.request.party.len(),
            &self.config.tiers,
        );
        info!(
            iterations = self.request.iterations,
            win_rate = analysis.win_rate,
            mean_score = analysis.mean_score,
            failed = analysis.runs_failed,
            "batch complete"
        );
        self.result = Some(SimulationResult {
            base_seed: self.base_seed,
            iterations: self.request.iterations,
            lightweight: self.lightweight,
            runs: std::mem::take(&mut self.runs),
            analysis,
            selection: std::mem::take(&mut self.selection),
            detailed: std::mem::take(&mut self.detailed),
            diagnostics: std::mem::take(&mut self.diagnostics),
        });
        self.phase = Phase::Done;
    }

    /// Step until done.
    pub fn run_to_completion(mut self) -> Result<SimulationResult, SimError> {
        loop {
            self.step()?;
            if let Some(result) = self.result.take() {
                return Ok(result);
            }
        }
    }
}

fn resolver(config: &SimConfig) -> ActionResolver {
    let mut cache = TemplateCache::new(config.template_cache_capacity);
    cache.ensure_version(crate::ENGINE_VERSION);
    ActionResolver::new(cache)
}

fn run_seeded(
    request: &SimulationRequest,
    config: &SimConfig,
    resolver: &mut ActionResolver,
    run_index: u32,
    seed: u64,
    fidelity: Fidelity,
) -> Result<DayOutcome, SimError> {
    DayRunner::new(request, config)
        .run(resolver, run_index, seed, fidelity)
        .map_err(|source| SimError::Invariant {
            run_index,
            seed,
            source,
        })
}

/// Simulate run `run_index` of a batch on its own. The run seed comes from
/// the request seed the same way a batch derives it, so with a fixed request
/// seed this reproduces that run of the batch exactly.
pub fn simulate_run(
    request: &SimulationRequest,
    config: &SimConfig,
    run_index: u32,
    fidelity: Fidelity,
) -> Result<DayOutcome, SimError> {
    validate_request(request)?;
    let base_seed = request.seed.unwrap_or_else(rand::random);
    let seed = run_seed(base_seed, run_index);
    run_seeded(request, config, &mut resolver(config), run_index, seed, fidelity)
}

/// Run a whole batch synchronously.
pub fn simulate(request: SimulationRequest, config: SimConfig) -> Result<SimulationResult, SimError> {
    BatchRunner::new(request, config)?.run_to_completion()
}

/// Run a batch on the current tokio runtime, yielding between chunks and
/// publishing progress after each one.
pub async fn run_batch_async(
    request: SimulationRequest,
    config: SimConfig,
    cancel: CancellationToken,
    progress: Option<mpsc::UnboundedSender<Progress>>,
) -> Result<SimulationResult, SimError> {
    let mut runner = BatchRunner::new(request, config)?.with_cancellation(cancel);
    loop {
        let update = runner.step()?;
        if let Some(tx) = &progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(update);
        }
        if let Some(result) = runner.result.take() {
            return Ok(result);
        }
        tokio::task::yield_now().await;
    }
}
