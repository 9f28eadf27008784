//! The keyed pub/sub transport contract and an in-process [`LocalBus`]
//! implementation that stands in for a distributed object/mailbox
//! transport.
//!
//! A publish of a (payload, metadata) pair should be atomic from the
//! consumer's perspective. [`LocalBus`] publishes both halves as a
//! single [`WireEnvelope`] over one channel, so the interleaving case a
//! split-topic transport would have to tolerate never arises here --
//! but every consumer above this crate still runs arrivals through the
//! ordinary admission filter, so a future transport that *does* split
//! the topics needs no changes above this layer.

mod local;

pub use local::LocalBus;

use dataflow_log::{ActorId, Payload};
use futures_core::stream::BoxStream;

/// The metadata + payload halves of an envelope, published and
/// received together -- this fuses the `mailbox` / `mailbox-id` topic
/// pair into one atomic unit.
#[derive(Clone, Debug)]
pub struct WireEnvelope {
    pub src: ActorId,
    pub seq: u64,
    pub payload: Payload,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("target {0} has no registered mailbox (never subscribed, or already torn down)")]
    NoSuchMailbox(ActorId),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The bus contract: two mailbox topics per consumer channel, one
/// `node-done` topic per node, one `input-done` topic per input node.
#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    /// Publish one envelope to `target`'s mailbox. A bus implementation
    /// talking to a real network should return `Err` rather than panic
    /// when `target` is unreachable, so producers can log-and-abandon
    /// that one publish.
    async fn publish_mailbox(&self, target: ActorId, envelope: WireEnvelope) -> Result<()>;

    /// Subscribe as `who`, replacing any previous subscription for the
    /// same id (a restarted/recovered actor resubscribing at a new
    /// logical incarnation).
    async fn subscribe_mailbox(&self, who: ActorId) -> BoxStream<'static, WireEnvelope>;

    /// Announce that `channel` of `node` has reached `DONE`.
    async fn publish_node_done(&self, node: u32, channel: u32);

    /// Subscribe to every `channel` completion of `node`, to prune it
    /// from a producer's `AlivenessSet`.
    async fn subscribe_node_done(&self, node: u32) -> BoxStream<'static, u32>;

    /// An input node announces completion of one of its channels: the
    /// `input-done-<id>` topic is published by the node that finished
    /// and subscribed to by whichever downstream input node depends on
    /// it, one message per completed channel.
    async fn publish_input_done(&self, node: u32, channel: u32);

    async fn subscribe_input_done(&self, node: u32) -> BoxStream<'static, u32>;
}
