//! Consumer-side ingestion and the deterministic scheduler that picks
//! which buffered input to merge into the next execution, in both
//! normal and crash-replay mode.

mod consumer;
mod scheduler;

pub use consumer::{AdmitOutcome, ConsumerState};
pub use scheduler::{ScheduleDecision, Scheduler};

pub type StateTagSnapshot = std::collections::BTreeMap<dataflow_log::ActorId, u64>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Replay mode found more than one edge whose expected state_tag
    /// exceeds the current one. By
    /// construction of normal-mode choices this can't happen unless the
    /// StateTagLog is corrupt or a prior execution was non-deterministic.
    #[error(
        "replay mode found {0} edges with a positive state_tag diff, expected exactly 1 \
         (corrupt or non-deterministic StateTagLog)"
    )]
    TopologyInvariantViolation(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
