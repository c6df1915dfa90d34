//! Request-level errors.

use crate::context::InvariantError;
use crate::model::ValidationError;
use thiserror::Error;

/// Why a batch or a single run produced no result.
///
/// Inside a batch an invariant violation fails only its own run, which is
/// recorded and skipped. [`SimError::Invariant`] is returned as such by
/// [`simulate_run`](crate::orchestrator::simulate_run) and the encounter
/// harness, where there is nothing to carry on with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("batch cancelled")]
    Cancelled,

    #[error("run {run_index} (seed {seed}): {source}")]
    Invariant {
        run_index: u32,
        seed: u64,
        source: InvariantError,
    },
}
