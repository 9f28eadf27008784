use crate::operator::{Address, PartitionSpec};
use crate::ActorError;
use dataflow_log::{ActorId, AlivenessSet, OutputLog, OutputLogSnapshot, Payload};
use dataflow_transport::{Bus, WireEnvelope};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A downstream logical node this producer fans out to: the channel ->
/// address map learned from `append_to_targets`, and the partition
/// spec used to route each pushed batch across those channels.
struct TargetNode {
    channels: HashMap<u32, Address>,
    partition: PartitionSpec,
}

/// The producer half of an actor: its [`OutputLog`], the
/// [`AlivenessSet`] of downstream channels it believes are alive, and
/// its routing table of registered target nodes. Cloning shares all of
/// this state -- a `ProducerHandle` is the in-process equivalent of
/// the RPC surface exposed to peer actors (`append_to_targets`,
/// `update_target_ip`, `help_downstream_recover`,
/// `truncate_logged_outputs`), plus the `push` a producer's own event
/// loop uses to emit a batch.
#[derive(Clone)]
pub struct ProducerHandle {
    id: ActorId,
    is_sink: bool,
    output: Arc<OutputLog>,
    aliveness: Arc<Mutex<AlivenessSet>>,
    targets: Arc<Mutex<HashMap<u32, TargetNode>>>,
    bus: Arc<dyn Bus>,
}

impl ProducerHandle {
    pub fn new(id: ActorId, bus: Arc<dyn Bus>, is_sink: bool) -> Self {
        Self {
            id,
            is_sink,
            output: Arc::new(OutputLog::new()),
            aliveness: Arc::new(Mutex::new(AlivenessSet::new())),
            targets: Arc::new(Mutex::new(HashMap::new())),
            bus,
        }
    }

    pub fn from_snapshot(id: ActorId, bus: Arc<dyn Bus>, is_sink: bool, snapshot: OutputLogSnapshot) -> Self {
        Self {
            id,
            is_sink,
            output: Arc::new(OutputLog::from_snapshot(snapshot)),
            aliveness: Arc::new(Mutex::new(AlivenessSet::new())),
            targets: Arc::new(Mutex::new(HashMap::new())),
            bus,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn output(&self) -> &Arc<OutputLog> {
        &self.output
    }

    /// `append_to_targets((target_node, channel_to_address_map,
    /// partition_spec))`. Rejected on a sink, which has no downstream.
    pub async fn append_to_targets(
        &self,
        target_node: u32,
        channel_to_address: HashMap<u32, Address>,
        partition: PartitionSpec,
    ) -> Result<(), ActorError> {
        if self.is_sink {
            return Err(ActorError::SinkCannotHaveTargets(self.id));
        }

        {
            let mut aliveness = self.aliveness.lock().await;
            aliveness.register_target(target_node, channel_to_address.keys().copied());
        }
        for &channel in channel_to_address.keys() {
            self.output.register_target(ActorId::new(target_node, channel)).await;
        }
        self.targets.lock().await.insert(
            target_node,
            TargetNode {
                channels: channel_to_address,
                partition,
            },
        );
        self.watch_target_completion(target_node);
        Ok(())
    }

    /// `update_target_ip(target_node, channel, new_address)`: the
    /// target may have come up at a new network location. Producers
    /// MUST NOT route to the old address thereafter.
    pub async fn update_target_ip(&self, target_node: u32, channel: u32, new_address: Address) {
        if let Some(target) = self.targets.lock().await.get_mut(&target_node) {
            target.channels.insert(channel, new_address);
        }
    }

    /// `update_target_ip_and_help_recover`: the combined call a
    /// recovering consumer makes on each parent.
    pub async fn update_target_ip_and_help_recover(
        &self,
        target_node: u32,
        target_channel: u32,
        consumer_state_tag: u64,
        new_address: Address,
    ) -> Result<(), ActorError> {
        self.update_target_ip(target_node, target_channel, new_address).await;
        self.help_downstream_recover(target_node, target_channel, consumer_state_tag).await
    }

    /// `help_downstream_recover(target_node, target_channel,
    /// consumer_state_tag_for_this_edge)`: under the output lock,
    /// resend every logged entry above the consumer's cursor, in seq
    /// order, re-partitioned for `target_channel`.
    pub async fn help_downstream_recover(
        &self,
        target_node: u32,
        target_channel: u32,
        consumer_state_tag: u64,
    ) -> Result<(), ActorError> {
        let Some((num_channels, partition)) = self.target_shape(target_node).await else {
            tracing::debug!(actor = %self.id, target_node, "help requested for an unknown target, nothing to resend");
            return Ok(());
        };
        let target = ActorId::new(target_node, target_channel);
        let bus = self.bus.clone();
        let src = self.id;

        self.output
            .resend_above(consumer_state_tag, move |seq, payload| {
                let bus = bus.clone();
                let partition = partition.clone();
                async move {
                    let routed = route_payload(&partition, &payload, target_channel, num_channels);
                    bus.publish_mailbox(target, WireEnvelope { src, seq, payload: routed }).await
                }
            })
            .await
            .map_err(ActorError::Transport)
    }

    /// `truncate_logged_outputs(target_node, target_channel,
    /// new_cursor)`, called by a consumer after a successful checkpoint.
    pub async fn truncate_logged_outputs(&self, target_node: u32, target_channel: u32, new_cursor: u64) {
        self.output.truncate(ActorId::new(target_node, target_channel), new_cursor).await;
    }

    /// Increment `out_seq`, log the payload, and publish it to every
    /// live channel of every registered target, partitioned per
    /// channel. Returns the seq just logged.
    pub async fn push(&self, payload: Payload) -> Result<u64, ActorError> {
        let seq = self.output.push(payload.clone()).await.map_err(ActorError::Log)?;

        let targets: Vec<(u32, HashMap<u32, Address>, PartitionSpec)> = {
            let targets = self.targets.lock().await;
            targets
                .iter()
                .map(|(node, t)| (*node, t.channels.clone(), t.partition.clone()))
                .collect()
        };
        let aliveness = self.aliveness.lock().await;

        for (node, channels, partition) in targets {
            let Some(alive) = aliveness.alive_channels(node) else {
                continue;
            };
            let num_channels = channels.len() as u32;
            for &channel in channels.keys() {
                if !alive.contains(&channel) {
                    continue;
                }
                let routed = route_payload(&partition, &payload, channel, num_channels);
                let target = ActorId::new(node, channel);
                if let Err(e) = self.bus.publish_mailbox(target, WireEnvelope { src: self.id, seq, payload: routed }).await {
                    tracing::warn!(actor = %self.id, %target, seq, error = %e, "transient publish failure, output log retains the entry for replay");
                }
            }
        }
        Ok(seq)
    }

    /// A push that discovers that all downstream channels of every
    /// target are dead (AlivenessSet empty) should cause the actor to
    /// exit early to DRAINING. `false` until at least one target has
    /// ever been registered.
    pub async fn all_targets_dead(&self) -> bool {
        if self.targets.lock().await.is_empty() {
            return false;
        }
        self.aliveness.lock().await.is_empty()
    }

    /// A single downstream channel announced `DONE`. Drop its cursor so
    /// it stops pinning `TargetOutputState`; if that was the target
    /// node's last live channel, stop routing to it entirely.
    pub async fn mark_channel_done(&self, node: u32, channel: u32) {
        let node_fully_done = self.aliveness.lock().await.mark_channel_done(node, channel);
        self.output.remove_target(ActorId::new(node, channel)).await;
        if node_fully_done {
            self.targets.lock().await.remove(&node);
            tracing::debug!(actor = %self.id, target_node = node, "downstream target fully gone, dropped from routing table");
        }
    }

    async fn target_shape(&self, target_node: u32) -> Option<(u32, PartitionSpec)> {
        let targets = self.targets.lock().await;
        let target = targets.get(&target_node)?;
        Some((target.channels.len() as u32, target.partition.clone()))
    }

    /// Background watch on `node-done-<node>`, pruning this producer's
    /// own aliveness bookkeeping as each channel completes, without
    /// requiring the main event loop to poll for it. The `AlivenessSet`
    /// is still mutated only by the owning actor in response to
    /// node-done events it itself polls -- here that polling is a
    /// dedicated task rather than inline in the main loop, since
    /// `node-done` can legitimately arrive at any time relative to this
    /// actor's own scheduling decisions.
    fn watch_target_completion(&self, node: u32) {
        let me = self.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut stream = bus.subscribe_node_done(node).await;
            while let Some(channel) = stream.next().await {
                me.mark_channel_done(node, channel).await;
            }
        });
    }
}

fn route_payload(partition: &PartitionSpec, payload: &Payload, channel: u32, num_channels: u32) -> Payload {
    match payload {
        Payload::Done => Payload::Done,
        Payload::Data(batch) => Payload::Data(partition.route(batch, channel, num_channels)),
    }
}
