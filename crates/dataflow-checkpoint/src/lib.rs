//! Checkpoint and StateTagLog storage adaptors.
//!
//! Two placement policies are implemented behind the same
//! [`CheckpointStore`] trait: [`LocalFileStore`] (temp-file + rename,
//! for input actors) and [`ObjectStore`] (single atomic put, no rename
//! primitive assumed, for task actors).

mod file_store;
mod object_store;
mod state_tag_log;

pub use file_store::LocalFileStore;
pub use object_store::ObjectStore;
pub use state_tag_log::{InMemoryStateTagLog, StateTagLog};

use dataflow_log::{ActorId, OutputLogSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A snapshot of {InputState, OutputLog, TargetOutputState, out_seq,
/// serialised function state} at a quiescent boundary.
/// `output_log` carries `out_seq` and `TargetOutputState` already,
/// since `dataflow_log::OutputLog` owns both.
#[derive(Serialize, Deserialize)]
pub struct Checkpoint {
    pub state_tag: HashMap<ActorId, u64>,
    pub latest_input_received: HashMap<ActorId, u64>,
    pub output_log: OutputLogSnapshot,
    pub function_state: Vec<u8>,
}

#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, actor: ActorId) -> Result<Option<Checkpoint>>;

    /// On failure the caller MUST treat the checkpoint as not taken
    /// (retry on the next K-th execution) and must not truncate
    /// upstream logs or its own StateTagLog.
    async fn save(&self, actor: ActorId, checkpoint: &Checkpoint) -> Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("checkpoint write failed for actor {actor}")]
    Write {
        actor: ActorId,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize checkpoint for actor {actor}")]
    Codec {
        actor: ActorId,
        #[source]
        source: Box<bincode::ErrorKind>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
