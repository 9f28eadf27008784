use crate::producer::ProducerHandle;
use crate::ActorError;
use coroutines::coroutine;
use dataflow_checkpoint::{Checkpoint, CheckpointStore};
use dataflow_log::{ActorId, Batch, Payload};
use dataflow_transport::Bus;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The physical dataset reader an input actor drives -- concrete
/// readers (CSV, columnar files, object-store blobs) stay out of
/// scope; this is the narrow interface the core addresses instead.
/// `position` is whatever the reader needs to resume deterministically
/// after a crash -- a byte offset, a row index, a partition cursor.
pub trait DatasetReader: Send {
    /// Produce the next `(position, batch)` pair, resuming at
    /// `resume_from`, or `None` once exhausted. Calling this again with
    /// the same `resume_from` on a fresh reader instance MUST reproduce
    /// the same remaining sequence -- that replayability requirement is
    /// what lets the input actor skip the StateTagLog/expected_path
    /// machinery entirely.
    fn next_batch(&mut self, resume_from: u64) -> Option<(u64, Batch)>;
}

/// Wrap a `DatasetReader` as a coroutine-driven stream of `(position,
/// batch)` pairs.
pub fn dataset_stream(
    mut reader: Box<dyn DatasetReader>,
    resume_from: u64,
) -> impl futures_core::Stream<Item = (u64, Batch)> {
    coroutine(move |mut suspend| async move {
        let mut cursor = resume_from;
        while let Some((position, batch)) = reader.next_batch(cursor) {
            cursor = position;
            suspend.yield_((position, batch)).await;
        }
    })
}

/// Input actor specialisation: no parents, but may gate its start on
/// named dependent input nodes announcing completion.
pub struct InputActor {
    id: ActorId,
    bus: Arc<dyn Bus>,
    producer: ProducerHandle,
    checkpoint_store: Arc<dyn CheckpointStore>,
    checkpoint_every: u64,
}

impl InputActor {
    /// Construct from whatever checkpoint is on record (or fresh, if
    /// none). Returns the actor plus the `position` to resume reading
    /// from.
    pub async fn construct(
        id: ActorId,
        bus: Arc<dyn Bus>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        checkpoint_every: u64,
    ) -> Result<(Self, u64), ActorError> {
        let checkpoint = checkpoint_store.load(id).await.map_err(ActorError::CheckpointWrite)?;
        let (producer, resume_from) = match checkpoint {
            Some(ckpt) => {
                let position = decode_position(&ckpt.function_state);
                (ProducerHandle::from_snapshot(id, bus.clone(), false, ckpt.output_log), position)
            }
            None => (ProducerHandle::new(id, bus.clone(), false), 0),
        };
        Ok((
            Self {
                id,
                bus,
                producer,
                checkpoint_store,
                checkpoint_every,
            },
            resume_from,
        ))
    }

    pub fn producer(&self) -> &ProducerHandle {
        &self.producer
    }

    /// Gate execution on named dependent input nodes: per dependent
    /// `(node, parallelism)`, wait until every one of its `parallelism`
    /// channels has announced `input-done`.
    pub async fn await_dependencies(&self, dependents: &[(u32, u32)]) {
        for &(node, parallelism) in dependents {
            if parallelism == 0 {
                continue;
            }
            let mut remaining: HashSet<u32> = (0..parallelism).collect();
            let mut stream = self.bus.subscribe_input_done(node).await;
            tracing::debug!(actor = %self.id, node, parallelism, "awaiting dependent input completion");
            while !remaining.is_empty() {
                match stream.next().await {
                    Some(channel) => {
                        remaining.remove(&channel);
                    }
                    None => break,
                }
            }
        }
    }

    /// Drive `reader` from `resume_from`, pushing each batch (optionally
    /// transformed by a user batch function), checkpointing every `K`
    /// batches, until the dataset is exhausted or every downstream
    /// target has died.
    pub async fn run(
        self,
        reader: Box<dyn DatasetReader>,
        resume_from: u64,
        mut batch_fn: Option<Box<dyn FnMut(Batch) -> Batch + Send>>,
    ) -> Result<(), ActorError> {
        let mut stream = Box::pin(dataset_stream(reader, resume_from));
        let mut position = resume_from;
        let mut since_checkpoint = 0u64;

        while let Some((new_position, mut batch)) = stream.next().await {
            position = new_position;
            if let Some(f) = batch_fn.as_mut() {
                batch = f(batch);
            }
            self.producer.push(Payload::Data(batch)).await?;
            since_checkpoint += 1;

            if since_checkpoint >= self.checkpoint_every {
                since_checkpoint = 0;
                if let Err(e) = self.checkpoint(position).await {
                    tracing::warn!(actor = %self.id, error = %e, "input checkpoint failed, retrying next interval");
                }
            }

            if self.producer.all_targets_dead().await {
                tracing::info!(actor = %self.id, "all downstream targets dead, draining early");
                break;
            }
        }

        self.drain().await
    }

    async fn checkpoint(&self, position: u64) -> Result<(), ActorError> {
        let checkpoint = Checkpoint {
            state_tag: HashMap::new(),
            latest_input_received: HashMap::new(),
            output_log: self.producer.output().snapshot().await,
            function_state: position.to_le_bytes().to_vec(),
        };
        self.checkpoint_store.save(self.id, &checkpoint).await.map_err(ActorError::CheckpointWrite)
    }

    async fn drain(&self) -> Result<(), ActorError> {
        self.producer.push(Payload::Done).await?;
        self.bus.publish_node_done(self.id.node, self.id.channel).await;
        self.bus.publish_input_done(self.id.node, self.id.channel).await;
        Ok(())
    }
}

fn decode_position(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_checkpoint::ObjectStore;
    use dataflow_log::{Row, Value};
    use dataflow_transport::LocalBus;

    struct VecReader {
        rows: Vec<Row>,
    }

    impl DatasetReader for VecReader {
        fn next_batch(&mut self, resume_from: u64) -> Option<(u64, Batch)> {
            let idx = resume_from as usize;
            if idx >= self.rows.len() {
                return None;
            }
            Some((resume_from + 1, Batch::new(vec![self.rows[idx].clone()])))
        }
    }

    fn row(v: i64) -> Row {
        let mut r = Row::new();
        r.insert("v".to_string(), Value::Int(v));
        r
    }

    #[tokio::test]
    async fn fresh_actor_resumes_from_zero_and_checkpoints_every_k() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let store: Arc<dyn CheckpointStore> = Arc::new(ObjectStore::new("ckpts"));
        let id = ActorId::new(0, 0);
        let (actor, resume_from) = InputActor::construct(id, bus.clone(), store.clone(), 2).await.unwrap();
        assert_eq!(resume_from, 0);

        let mut consumer = bus.subscribe_mailbox(ActorId::new(1, 0)).await;
        actor.producer().append_to_targets(1, HashMap::from([(0, "a".into())]), crate::PartitionSpec::ColumnMod("v".into())).await.unwrap();

        let reader = Box::new(VecReader { rows: vec![row(0), row(0), row(0)] });
        actor.run(reader, resume_from, None).await.unwrap();

        // 3 data batches + 1 done sentinel.
        for _ in 0..4 {
            consumer.next().await.unwrap();
        }
        let checkpoint = store.load(id).await.unwrap().unwrap();
        assert_eq!(decode_position(&checkpoint.function_state), 2);
    }

    #[tokio::test]
    async fn recovery_resumes_from_the_checkpointed_position() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let store: Arc<dyn CheckpointStore> = Arc::new(ObjectStore::new("ckpts"));
        let id = ActorId::new(2, 0);

        store
            .save(
                id,
                &Checkpoint {
                    state_tag: HashMap::new(),
                    latest_input_received: HashMap::new(),
                    output_log: dataflow_log::OutputLog::new().snapshot().await,
                    function_state: 5u64.to_le_bytes().to_vec(),
                },
            )
            .await
            .unwrap();

        let (_actor, resume_from) = InputActor::construct(id, bus, store, 10).await.unwrap();
        assert_eq!(resume_from, 5);
    }
}
