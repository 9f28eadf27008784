//! The actor lifecycle, its input/non-blocking/blocking
//! specialisations, and the recovery protocol, built on
//! `dataflow-log`, `dataflow-scheduler` and `dataflow-checkpoint`.

mod blocking_actor;
mod input_actor;
mod operator;
mod producer;
mod recovery;
mod registry;
mod state;
mod task_actor;

pub use blocking_actor::{BlockingActor, OutputDataset};
pub use dataflow_log::ActorId;
pub use input_actor::{dataset_stream, DatasetReader, InputActor};
pub use operator::{Address, Operator, PartitionSpec};
pub use producer::ProducerHandle;
pub use registry::ActorRegistry;
pub use state::ActorPhase;
pub use task_actor::NonBlockingActor;

use dataflow_log::ActorId;

/// Error taxonomy for the actor runtime. Transient publish failures,
/// and duplicate/stale/future arrivals, are deliberately not
/// represented here: each is handled locally and logged (a
/// `tracing::debug!`/`warn!` event), never surfaced as `Result::Err`.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("sink actor {0} rejected an attempt to register downstream targets")]
    SinkCannotHaveTargets(ActorId),

    #[error("checkpoint or state-tag-log operation failed")]
    CheckpointWrite(#[source] dataflow_checkpoint::Error),

    /// Fatal locally: without the parent's help the replay cannot
    /// complete. The controller may escalate to a correlated-failure
    /// restart of the parent.
    #[error("recovery peer {0} is unavailable")]
    RecoveryPeer(ActorId),

    /// Fatal: indicates a corrupt or non-deterministic prior execution.
    #[error("scheduler found {0} positive state_tag diffs in replay mode, expected exactly 1")]
    TopologyInvariantViolation(usize),

    #[error("output log error")]
    Log(#[source] dataflow_log::Error),

    #[error("transport error")]
    Transport(#[source] dataflow_transport::Error),
}

impl From<dataflow_scheduler::Error> for ActorError {
    fn from(e: dataflow_scheduler::Error) -> Self {
        match e {
            dataflow_scheduler::Error::TopologyInvariantViolation(n) => ActorError::TopologyInvariantViolation(n),
        }
    }
}

pub type Result<T> = std::result::Result<T, ActorError>;
