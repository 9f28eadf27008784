use crate::operator::{Address, Operator};
use crate::producer::ProducerHandle;
use crate::recovery::ask_upstream_for_help;
use crate::registry::ActorRegistry;
use crate::state::ActorPhase;
use crate::ActorError;
use dataflow_checkpoint::{Checkpoint, CheckpointStore, StateTagLog};
use dataflow_log::{ActorId, Envelope, Payload};
use dataflow_scheduler::{ConsumerState, Scheduler};
use dataflow_transport::Bus;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long the main loop waits on the mailbox before re-checking the
/// scheduler and exit conditions: short enough to stay responsive,
/// long enough not to spin.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Non-blocking task actor specialisation: consumes from one or more
/// parents, schedules merged batches per `dataflow-scheduler`, runs the
/// operator, and pushes results downstream through its own
/// `ProducerHandle`.
pub struct NonBlockingActor<O: Operator> {
    id: ActorId,
    bus: Arc<dyn Bus>,
    registry: ActorRegistry,
    checkpoint_store: Arc<dyn CheckpointStore>,
    state_tag_log: Arc<dyn StateTagLog>,
    checkpoint_every: u64,
    address: Address,
    parents: Vec<ActorId>,

    producer: ProducerHandle,
    consumer: ConsumerState,
    scheduler: Scheduler,
    operator: O,
    phase: ActorPhase,
}

impl<O: Operator> NonBlockingActor<O> {
    /// Construct fresh, or restore from whatever checkpoint/StateTagLog
    /// is on record for `id`: if a checkpoint exists, the actor enters
    /// `RECOVERING` and `run` will call `ask_upstream_for_help` on every
    /// parent before doing anything else.
    pub async fn construct(
        id: ActorId,
        bus: Arc<dyn Bus>,
        registry: ActorRegistry,
        checkpoint_store: Arc<dyn CheckpointStore>,
        state_tag_log: Arc<dyn StateTagLog>,
        checkpoint_every: u64,
        address: Address,
        parents: Vec<ActorId>,
        mut operator: O,
    ) -> Result<Self, ActorError> {
        let checkpoint = checkpoint_store.load(id).await.map_err(ActorError::CheckpointWrite)?;

        let (producer, consumer, phase) = match checkpoint {
            Some(ckpt) => {
                operator.restore_state(&ckpt.function_state);
                let consumer = ConsumerState::restore(parents.iter().copied(), ckpt.state_tag, ckpt.latest_input_received);
                let producer = ProducerHandle::from_snapshot(id, bus.clone(), false, ckpt.output_log);
                (producer, consumer, ActorPhase::Recovering)
            }
            None => (
                ProducerHandle::new(id, bus.clone(), false),
                ConsumerState::new(parents.iter().copied()),
                ActorPhase::Booting,
            ),
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
            producer,
            consumer,
            scheduler,
            operator,
            phase,
        })
    }

    pub fn producer(&self) -> &ProducerHandle {
        &self.producer
    }

    pub fn phase(&self) -> ActorPhase {
        self.phase
    }

    /// The `RUNNING` main loop, preceded by recovery
    /// (`ask_upstream_for_help`) when constructed from a checkpoint.
    pub async fn run(mut self) -> Result<(), ActorError> {
        self.registry.register(self.id, self.producer.clone());

        // Subscribe before asking parents to resend: a recovering actor's
        // mailbox must already exist or the resent entries have nowhere
        // to land and are lost rather than merely delayed.
        let mut mailbox = self.bus.subscribe_mailbox(self.id).await;

        if self.phase == ActorPhase::Recovering {
            tracing::info!(actor = %self.id, "recovering: asking upstream parents for help");
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

        'outer: loop {
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

                let results = self.operator.execute(decision.edge, decision.batch);
                for batch in results {
                    self.producer.push(Payload::Data(batch)).await?;
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

                if self.producer.all_targets_dead().await {
                    break 'outer;
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
            output_log: self.producer.output().snapshot().await,
            function_state: self.operator.save_state(),
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
        for batch in self.operator.done() {
            self.producer.push(Payload::Data(batch)).await?;
        }
        self.producer.push(Payload::Done).await?;
        self.bus.publish_node_done(self.id.node, self.id.channel).await;
        self.phase = ActorPhase::Done;
        Ok(())
    }
}
