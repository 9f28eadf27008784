use dataflow_log::{ActorId, Batch};
use std::sync::Arc;

/// The per-operator user-supplied function object (map/filter/join) --
/// the operator body is an external collaborator the runtime invokes
/// but never inspects.
pub trait Operator: Send {
    /// Called once, after any checkpoint restore, before the actor
    /// enters `RUNNING` for the first time.
    fn initialise(&mut self) {}

    /// Apply the operator to one merged, scheduled batch from `parent`,
    /// producing zero or more result batches to push downstream or, on
    /// a sink, to the output dataset.
    fn execute(&mut self, parent: ActorId, batch: Batch) -> Vec<Batch>;

    /// The actor has no parents left and its buffered inputs are empty:
    /// flush any final state before the `DRAINING` transition. This
    /// actor's own channel id is already known to the operator's owner,
    /// so it isn't passed in here.
    fn done(&mut self) -> Vec<Batch> {
        Vec::new()
    }

    /// Serialise operator state into the opaque checkpoint blob
    /// (`Checkpoint::function_state`).
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restore operator state from a checkpoint blob, before `initialise`.
    fn restore_state(&mut self, _bytes: &[u8]) {}
}

/// A network location a peer actor can be reached at. Opaque to the
/// core -- for the in-process [`dataflow_transport::LocalBus`] the bus
/// dispatches on [`ActorId`] regardless of this value, but the routing
/// table still tracks it so `update_target_ip` has somewhere to write.
pub type Address = String;

/// Routes a batch to a downstream channel either by a named column mod
/// the channel count, or by a user function `(batch, channel) ->
/// sub-batch`.
#[derive(Clone)]
pub enum PartitionSpec {
    ColumnMod(String),
    Function(Arc<dyn Fn(&Batch, u32) -> Batch + Send + Sync>),
}

impl PartitionSpec {
    /// Compute the sub-batch routed to `channel`, out of `num_channels`
    /// total. A column spec that finds no matching rows for `channel`
    /// yields an empty batch -- every live channel still receives an
    /// envelope for every seq, so its `latest_input_received` stays in
    /// lockstep (admission rule 2 would otherwise strand a channel that
    /// silently never heard about a skipped seq).
    pub fn route(&self, batch: &Batch, channel: u32, num_channels: u32) -> Batch {
        match self {
            PartitionSpec::ColumnMod(key) => batch
                .partition_by_key_mod(key, num_channels)
                .remove(&channel)
                .unwrap_or_default(),
            PartitionSpec::Function(f) => f(batch, channel),
        }
    }
}

impl std::fmt::Debug for PartitionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionSpec::ColumnMod(key) => f.debug_tuple("ColumnMod").field(key).finish(),
            PartitionSpec::Function(_) => f.write_str("Function(..)"),
        }
    }
}
