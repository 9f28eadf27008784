//! Envelopes, batches and the per-actor output log.
//!
//! This is the leaf crate of the runtime's dependency order: everything
//! else (checkpoint store, scheduler, actor state machine) builds on the
//! types defined here.

mod aliveness;
mod batch;
mod output_log;

pub use aliveness::AlivenessSet;
pub use batch::{Batch, Row, Value};
pub use output_log::{OutputLog, OutputLogSnapshot};

use serde::{Deserialize, Serialize};

/// Identity of one channel of one logical node, for the life of the topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId {
    pub node: u32,
    pub channel: u32,
}

impl ActorId {
    pub fn new(node: u32, channel: u32) -> Self {
        Self { node, channel }
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.node, self.channel)
    }
}

/// The dynamically-typed payload carried on an edge: a batch, or the
/// "done" sentinel that closes out a producer channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Payload {
    Data(Batch),
    Done,
}

impl Payload {
    pub fn is_done(&self) -> bool {
        matches!(self, Payload::Done)
    }
}

/// The metadata half of an envelope: which producer, and at what seq.
/// Published on the parallel `mailbox-id` topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub src: ActorId,
    pub seq: u64,
}

/// A fully reassembled envelope, as admitted by a consumer.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub src: ActorId,
    pub seq: u64,
    pub payload: Payload,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("seq {0} was already appended to this output log")]
    DuplicateSeq(u64),
}

pub type Result<T> = std::result::Result<T, Error>;
