//! In-memory topology assembly for the join fault-tolerance scenarios.
//! This stands in for an external driver script that assembles the
//! topology and kills actors to inject faults -- that driver generally
//! stays an external collaborator, but this harness provides enough of
//! one to drive the six concrete scenarios at the level the core can
//! still exercise deterministically in tests.

mod join_operator;
mod reader;

pub use join_operator::JoinOperator;
pub use reader::RowsReader;

use dataflow_checkpoint::{CheckpointStore, InMemoryStateTagLog, ObjectStore, StateTagLog};
use dataflow_log::{ActorId, Batch};
use dataflow_runtime::{ActorRegistry, Address, BlockingActor, InputActor, OutputDataset, PartitionSpec};
use dataflow_transport::{Bus, LocalBus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Captures every batch a [`BlockingActor`] stores, keyed by the
/// storing actor, for test assertions. Stands in for the external
/// output-dataset collaborator.
#[derive(Default, Clone)]
pub struct CapturingOutputDataset {
    stored: Arc<Mutex<Vec<(ActorId, u64, Batch)>>>,
}

impl CapturingOutputDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches_for(&self, actor: ActorId) -> Vec<Batch> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _, _)| *a == actor)
            .map(|(_, _, b)| b.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<(ActorId, u64, Batch)> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl OutputDataset for CapturingOutputDataset {
    async fn store(&self, actor: ActorId, object_count: u64, batch: Batch) -> std::io::Result<()> {
        self.stored.lock().unwrap().push((actor, object_count, batch));
        Ok(())
    }
}

/// One node's worth of reliable per-actor checkpoint/state-tag-log
/// storage, addressable by channel, surviving across an actor's
/// simulated crash and restart. The checkpoint store is a durable
/// external collaborator -- killing and reconstructing the in-process
/// task that drives one actor must not also discard this.
#[derive(Clone)]
pub struct DurableStores {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub state_tags: Arc<dyn StateTagLog>,
}

impl DurableStores {
    pub fn new() -> Self {
        Self {
            checkpoints: Arc::new(ObjectStore::new("actor-checkpoints")),
            state_tags: Arc::new(InMemoryStateTagLog::new()),
        }
    }
}

impl Default for DurableStores {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard two-mapper-group, four-join-channel topology shape used by
/// every join scenario: input groups `a_node`/`b_node`, each with
/// `mappers` channels, hash-partitioned by `key` into `join_channels`
/// join channels on `join_node`.
pub struct JoinTopology {
    pub bus: Arc<dyn Bus>,
    pub registry: ActorRegistry,
    pub a_node: u32,
    pub b_node: u32,
    pub join_node: u32,
    pub mappers: u32,
    pub join_channels: u32,
    pub key_column: String,
    pub output: CapturingOutputDataset,
    pub stores: HashMap<ActorId, DurableStores>,
}

impl JoinTopology {
    pub fn new(mappers: u32, join_channels: u32, key_column: impl Into<String>) -> Self {
        let mut stores = HashMap::new();
        let a_node = 0;
        let b_node = 1;
        let join_node = 2;
        for channel in 0..mappers {
            stores.insert(ActorId::new(a_node, channel), DurableStores::new());
            stores.insert(ActorId::new(b_node, channel), DurableStores::new());
        }
        for channel in 0..join_channels {
            stores.insert(ActorId::new(join_node, channel), DurableStores::new());
        }

        Self {
            bus: Arc::new(LocalBus::new()),
            registry: ActorRegistry::new(),
            a_node,
            b_node,
            join_node,
            mappers,
            join_channels,
            key_column: key_column.into(),
            output: CapturingOutputDataset::new(),
            stores,
        }
    }

    fn mapper_parents(&self) -> Vec<ActorId> {
        (0..self.mappers)
            .flat_map(|c| [ActorId::new(self.a_node, c), ActorId::new(self.b_node, c)])
            .collect()
    }

    fn address(&self, actor: ActorId) -> Address {
        format!("local://{actor}")
    }

    /// Construct (fresh, or resuming from checkpoint) the mapper input
    /// actor at `(node, channel)`, fed by `reader`, fanning out to every
    /// join channel.
    pub async fn construct_mapper(&self, node: u32, channel: u32, checkpoint_every: u64) -> anyhow::Result<(InputActor, u64)> {
        let id = ActorId::new(node, channel);
        let stores = self.stores.get(&id).expect("mapper stores registered at topology construction");
        let (actor, resume_from) = InputActor::construct(id, self.bus.clone(), stores.checkpoints.clone(), checkpoint_every).await?;

        let join_targets: HashMap<u32, Address> = (0..self.join_channels)
            .map(|c| (c, self.address(ActorId::new(self.join_node, c))))
            .collect();
        actor
            .producer()
            .append_to_targets(self.join_node, join_targets, PartitionSpec::ColumnMod(self.key_column.clone()))
            .await?;
        self.registry.register(id, actor.producer().clone());

        Ok((actor, resume_from))
    }

    /// Construct (fresh, or resuming from checkpoint) the join channel
    /// sink at `channel`, consuming from every mapper channel of both
    /// groups.
    pub async fn construct_join_channel(&self, channel: u32, checkpoint_every: u64) -> anyhow::Result<BlockingActor<JoinOperator>> {
        let id = ActorId::new(self.join_node, channel);
        let stores = self.stores.get(&id).expect("join channel stores registered at topology construction");
        let parents = self.mapper_parents();
        let a_parents = (0..self.mappers).map(|c| ActorId::new(self.a_node, c)).collect();
        let b_parents = (0..self.mappers).map(|c| ActorId::new(self.b_node, c)).collect();

        let actor = BlockingActor::construct(
            id,
            self.bus.clone(),
            self.registry.clone(),
            stores.checkpoints.clone(),
            stores.state_tags.clone(),
            checkpoint_every,
            self.address(id),
            parents,
            Arc::new(self.output.clone()),
            JoinOperator::new(self.key_column.clone(), a_parents, b_parents),
        )
        .await?;
        Ok(actor)
    }
}
