//! D&D 5e encounter balancer: a deterministic Monte Carlo combat simulator.
//!
//! This crate provides:
//! - A seeded combat engine with reactions, concentration and conditions
//! - Adventuring days with rests and resources carried between encounters
//! - Two-pass batch orchestration that keeps full event logs for a few
//!   representative runs only
//! - Difficulty tiers and advisory stat adjustments
//!
//! # Quick Start
//!
//! ```ignore
//! use dnd_sim::{simulate, SimConfig, SimulationRequest};
//! use dnd_sim::testing::{sample_day, sample_party};
//!
//! let request = SimulationRequest::new(sample_party(), sample_day())
//!     .with_iterations(2000)
//!     .with_seed(7);
//! let result = simulate(request, SimConfig::default())?;
//! println!("win rate {:.1}%", result.analysis.win_rate * 100.0);
//! for encounter in &result.analysis.encounters {
//!     println!("{}: {} ({} in context)", encounter.name, encounter.isolated, encounter.contextual);
//! }
//! ```

pub mod balance;
pub mod config;
pub mod context;
pub mod day;
pub mod diagnostics;
pub mod dice;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod persist;
pub mod reactions;
pub mod resolver;
pub mod testing;

/// Bumped whenever simulation behavior changes; tags cached template
/// resolutions so none survive across versions.
pub const ENGINE_VERSION: u32 = 1;

// Primary public API
pub use balance::{AutoAdjustRequest, AutoAdjustResult, AutoBalancer, StatDelta, Tier};
pub use config::{AiWeights, SimConfig, TierThresholds};
pub use diagnostics::Diagnostic;
pub use error::SimError;
pub use events::{EncounterOutcome, Event, EventFilter, EventLog, Retention};
pub use model::{Creature, Encounter, RestKind, SimulationRequest, TimelineSegment, ValidationError};
pub use orchestrator::{
    run_batch_async, simulate, simulate_run, BatchRunner, CancellationToken, Phase, Progress,
    SimulationResult,
};
pub use persist::{PersistError, ScenarioDocument};
