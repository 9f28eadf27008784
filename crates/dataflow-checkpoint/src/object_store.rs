use crate::{Checkpoint, CheckpointStore, Error, Result};
use dataflow_log::ActorId;
use std::collections::HashMap;

/// Checkpoint placement for task actors. Object stores offer no
/// rename primitive, so this store relies on a single atomic
/// `put` under the final key instead of the input actor's temp+rename
/// dance -- a half-written object is never visible under the key a
/// reader looks up, so the single put is already all-or-nothing.
///
/// Backed here by an in-memory map keyed by `(bucket, key)`, standing
/// in for a genuine object-store client in the harness and tests; the
/// `CheckpointStore` contract is identical either way.
#[derive(Default)]
pub struct ObjectStore {
    bucket: String,
    objects: tokio::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl ObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, actor: ActorId) -> String {
        format!("{}/ckpt-{}-{}", self.bucket, actor.node, actor.channel)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for ObjectStore {
    async fn load(&self, actor: ActorId) -> Result<Option<Checkpoint>> {
        let objects = self.objects.lock().await;
        let Some(bytes) = objects.get(&self.key(actor)) else {
            return Ok(None);
        };
        let checkpoint: Checkpoint =
            bincode::deserialize(bytes).map_err(|source| Error::Codec { actor, source })?;
        Ok(Some(checkpoint))
    }

    async fn save(&self, actor: ActorId, checkpoint: &Checkpoint) -> Result<()> {
        let encoded =
            bincode::serialize(checkpoint).map_err(|source| Error::Codec { actor, source })?;
        self.objects.lock().await.insert(self.key(actor), encoded);
        tracing::debug!(%actor, bucket = %self.bucket, "checkpoint put to object store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_log::OutputLog;
    use std::collections::HashMap as StdHashMap;

    async fn sample_checkpoint(tag: i64) -> Checkpoint {
        Checkpoint {
            state_tag: StdHashMap::new(),
            latest_input_received: StdHashMap::new(),
            output_log: OutputLog::new().snapshot().await,
            function_state: vec![tag as u8],
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = ObjectStore::new("checkpoints");
        let actor = ActorId::new(3, 0);
        store.save(actor, &sample_checkpoint(7).await).await.unwrap();
        let loaded = store.load(actor).await.unwrap().unwrap();
        assert_eq!(loaded.function_state, vec![7]);
    }

    #[tokio::test]
    async fn distinct_actors_do_not_collide() {
        let store = ObjectStore::new("checkpoints");
        let a = ActorId::new(1, 0);
        let b = ActorId::new(1, 1);
        store.save(a, &sample_checkpoint(1).await).await.unwrap();
        store.save(b, &sample_checkpoint(2).await).await.unwrap();
        assert_eq!(store.load(a).await.unwrap().unwrap().function_state, vec![1]);
        assert_eq!(store.load(b).await.unwrap().unwrap().function_state, vec![2]);
    }

    #[tokio::test]
    async fn load_missing_key_returns_none() {
        let store = ObjectStore::new("checkpoints");
        assert!(store.load(ActorId::new(9, 9)).await.unwrap().is_none());
    }
}
