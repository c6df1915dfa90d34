//! Non-fatal findings collected while simulating.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Diagnostic {
    /// A reaction granted an action its owner does not have.
    UnknownReactionAction {
        unit: String,
        reaction: String,
        action: String,
    },
    /// Reactions kept triggering each other and the drain was cut short.
    ReactionCascadeLimit { round: u32, limit: u32 },
    /// A run hit an internal invariant violation and was marked failed.
    RunFailed {
        run_index: u32,
        seed: u64,
        message: String,
    },
    /// A re-simulated run disagreed with its survey score.
    ConsistencyMismatch {
        run_index: u32,
        seed: u64,
        surveyed: f64,
        resimulated: f64,
    },
    /// Replaying a detailed run's events did not reproduce its final state.
    ReplayMismatch {
        run_index: u32,
        encounter: usize,
        unit: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnknownReactionAction {
                unit,
                reaction,
                action,
            } => write!(
                f,
                "{}: reaction '{}' grants unknown action '{}'",
                unit, reaction, action
            ),
            Diagnostic::ReactionCascadeLimit { round, limit } => write!(
                f,
                "round {}: reaction cascade stopped after {} reactions",
                round, limit
            ),
            Diagnostic::RunFailed {
                run_index,
                seed,
                message,
            } => write!(f, "run {} (seed {}) failed: {}", run_index, seed, message),
            Diagnostic::ConsistencyMismatch {
                run_index,
                seed,
                surveyed,
                resimulated,
            } => write!(
                f,
                "run {} (seed {}) scored {:.3} in survey but {:.3} when re-simulated",
                run_index, seed, surveyed, resimulated
            ),
            Diagnostic::ReplayMismatch {
                run_index,
                encounter,
                unit,
            } => write!(
                f,
                "run {} encounter {}: replay disagrees with final state of {}",
                run_index, encounter, unit
            ),
        }
    }
}
