use crate::operator::{Address, Operator};
use crate::recovery::ask_upstream_for_help;
use crate::registry::ActorRegistry;
use crate::state::ActorPhase;
use crate::ActorError;
use dataflow_checkpoint::{Checkpoint, CheckpointStore, StateTagLog};
use dataflow_log::{ActorId, Batch, Envelope};
use dataflow_scheduler::{ConsumerState, Scheduler};
use dataflow_transport::Bus;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The external *output dataset* collaborator a blocking (sink) actor
/// notifies after storing a result object, addressed only at this
/// interface.
#[async_trait::async_trait]
pub trait OutputDataset: Send + Sync {
    /// Store `batch` under content key `(actor, object_count)` and
    /// notify the dataset of the resulting `(host, key, size)` triple.
    async fn store(&self, actor: ActorId, object_count: u64, batch: Batch) -> std::io::Result<()>;
}

/// Blocking (sink) task actor specialisation: identical
/// consumption/scheduling behavior to the non-blocking actor, but
/// terminal -- it rejects downstream target registration and has no
/// `ProducerHandle` of its own.
pub struct BlockingActor<O: Operator> {
    id: ActorId,
    bus: Arc<dyn Bus>,
    registry: ActorRegistry,
    checkpoint_store: Arc<dyn CheckpointStore>,
    state_tag_log: Arc<dyn StateTagLog>,
    checkpoint_every: u64,
    address: Address,
    parents: Vec<ActorId>,
    output_dataset: Arc<dyn OutputDataset>,

    consumer: ConsumerState,
    scheduler: Scheduler,
    operator: O,
    phase: ActorPhase,
    object_count: u64,
}

impl<O: Operator> BlockingActor<O> {
    #[allow(clippy::too_many_arguments)]
    pub async fn construct(
        id: ActorId,
        bus: Arc<dyn Bus>,
        registry: ActorRegistry,
        checkpoint_store: Arc<dyn CheckpointStore>,
        state_tag_log: Arc<dyn StateTagLog>,
        checkpoint_every: u64,
        address: Address,
        parents: Vec<ActorId>,
        output_dataset: Arc<dyn OutputDataset>,
        mut operator: O,
    ) -> Result<Self, ActorError> {
        let checkpoint = checkpoint_store.load(id).await.map_err(ActorError::CheckpointWrite)?;

        let (consumer, object_count, phase) = match checkpoint {
            Some(ckpt) => {
                let object_count = decode_object_count(&ckpt.function_state);
                operator.restore_state(&ckpt.function_state[8.min(ckpt.function_state.len())..]);
                let consumer = ConsumerState::restore(parents.iter().copied(), ckpt.state_tag, ckpt.latest_input_received);
                (consumer, object_count, ActorPhase::Recovering)
            }
            None => (ConsumerState::new(parents.iter().copied()), 0, ActorPhase::Booting),
        };

        let expected_path = state_tag_log.range(id).await.map_err(ActorError::CheckpointWrite)?;
        let scheduler = if expected_path.is_empty() {
            Scheduler::new()
        } else {
            Scheduler::from_expected_path(expected_path)
        };

        Ok(Self {
            id,
            bus,
            registry,
            checkpoint_store,
            state_tag_log,
            checkpoint_every,
            address,
            parents,
            output_dataset,
            consumer,
            scheduler,
            operator,
            phase,
            object_count,
        })
    }

    pub fn phase(&self) -> ActorPhase {
        self.phase
    }

    /// `append_to_targets` MUST fail on a sink -- it has no downstream.
    pub fn append_to_targets(&self) -> Result<(), ActorError> {
        Err(ActorError::SinkCannotHaveTargets(self.id))
    }

    pub async fn run(mut self) -> Result<(), ActorError> {
        // Subscribe before asking parents to resend: a recovering actor's
        // mailbox must already exist or the resent entries have nowhere
        // to land and are lost rather than merely delayed.
        let mut mailbox = self.bus.subscribe_mailbox(self.id).await;

        if self.phase == ActorPhase::Recovering {
            tracing::info!(actor = %self.id, "recovering sink: asking upstream parents for help");
            let state_tag: HashMap<ActorId, u64> = self
                .parents
                .iter()
                .map(|&p| (p, self.consumer.state_tag(p)))
                .collect();
            ask_upstream_for_help(self.id, &self.registry, &self.parents, &state_tag, &self.address).await?;
        } else {
            self.operator.initialise();
        }
        self.phase = ActorPhase::Running;

        let mut executions_since_checkpoint = 0u64;

        loop {
            match tokio::time::timeout(POLL_INTERVAL, mailbox.next()).await {
                Ok(Some(wire)) => {
                    self.consumer.admit(Envelope {
                        src: wire.src,
                        seq: wire.seq,
                        payload: wire.payload,
                    });
                }
                Ok(None) | Err(_) => {}
            }

            loop {
                let decision = self.scheduler.schedule(&mut self.consumer)?;
                let Some(decision) = decision else { break };

                for batch in self.operator.execute(decision.edge, decision.batch) {
                    self.output_dataset.store(self.id, self.object_count, batch).await.map_err(|e| {
                        ActorError::CheckpointWrite(dataflow_checkpoint::Error::Write {
                            actor: self.id,
                            source: e,
                        })
                    })?;
                    self.object_count += 1;
                }
                self.state_tag_log
                    .append(self.id, decision.state_tag_snapshot.clone())
                    .await
                    .map_err(ActorError::CheckpointWrite)?;
                executions_since_checkpoint += 1;

                if executions_since_checkpoint >= self.checkpoint_every {
                    executions_since_checkpoint = 0;
                    if let Err(e) = self.checkpoint_and_truncate().await {
                        tracing::warn!(actor = %self.id, error = %e, "checkpoint failed, retrying next interval, upstream logs not truncated");
                    }
                }
            }

            if !self.consumer.parents_remaining() && self.consumer.buffers_drained() {
                break;
            }
        }

        self.drain().await
    }

    async fn checkpoint_and_truncate(&mut self) -> Result<(), ActorError> {
        let snapshot = self.consumer.state_tag_snapshot();
        let checkpoint = Checkpoint {
            state_tag: snapshot.iter().map(|(k, v)| (*k, *v)).collect(),
            latest_input_received: self.consumer.latest_input_received_map(),
            output_log: dataflow_log::OutputLog::new().snapshot().await,
            function_state: encode_function_state(self.object_count, &self.operator.save_state()),
        };
        self.checkpoint_store
            .save(self.id, &checkpoint)
            .await
            .map_err(ActorError::CheckpointWrite)?;

        for &parent in &self.parents {
            let cursor = self.consumer.state_tag(parent);
            if let Some(handle) = self.registry.get(parent) {
                handle.truncate_logged_outputs(self.id.node, self.id.channel, cursor).await;
            } else {
                tracing::debug!(actor = %self.id, %parent, "truncate call skipped, parent unreachable");
            }
        }

        self.state_tag_log
            .truncate_through(self.id, &snapshot)
            .await
            .map_err(ActorError::CheckpointWrite)
    }

    async fn drain(&mut self) -> Result<(), ActorError> {
        self.phase = ActorPhase::Draining;
        self.bus.publish_node_done(self.id.node, self.id.channel).await;
        self.phase = ActorPhase::Done;
        Ok(())
    }
}

/// A sink's checkpoint blob has no downstream consumers to serialise
/// operator state for replay against, so it packs `object_count`
/// alongside the raw operator bytes: 8-byte little-endian count,
/// followed by whatever the operator itself produced.
fn encode_function_state(object_count: u64, operator_state: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + operator_state.len());
    out.extend_from_slice(&object_count.to_le_bytes());
    out.extend_from_slice(operator_state);
    out
}

fn decode_object_count(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}
