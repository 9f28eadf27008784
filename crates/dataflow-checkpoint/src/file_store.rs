use crate::{Checkpoint, CheckpointStore, Error, Result};
use dataflow_log::{ActorId, OutputLog};
use std::path::{Path, PathBuf};

/// Checkpoint placement for input actors: write to
/// `ckpt-<node>-<channel>-temp` and atomically rename over
/// `ckpt-<node>-<channel>`, so a crash mid-write never leaves a
/// partial checkpoint visible to `load`.
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn final_path(&self, actor: ActorId) -> PathBuf {
        self.dir.join(format!("ckpt-{}-{}", actor.node, actor.channel))
    }

    fn temp_path(&self, actor: ActorId) -> PathBuf {
        self.dir.join(format!("ckpt-{}-{}-temp", actor.node, actor.channel))
    }
}

#[async_trait::async_trait]
impl CheckpointStore for LocalFileStore {
    async fn load(&self, actor: ActorId) -> Result<Option<Checkpoint>> {
        let path = self.final_path(actor);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::Write { actor, source }),
        };
        let checkpoint: Checkpoint =
            bincode::deserialize(&bytes).map_err(|source| Error::Codec { actor, source })?;
        Ok(Some(checkpoint))
    }

    async fn save(&self, actor: ActorId, checkpoint: &Checkpoint) -> Result<()> {
        let encoded =
            bincode::serialize(checkpoint).map_err(|source| Error::Codec { actor, source })?;

        let temp = self.temp_path(actor);
        tokio::fs::write(&temp, &encoded)
            .await
            .map_err(|source| Error::Write { actor, source })?;
        tokio::fs::rename(&temp, self.final_path(actor))
            .await
            .map_err(|source| Error::Write { actor, source })?;
        tracing::debug!(%actor, bytes = encoded.len(), "checkpoint written");
        Ok(())
    }
}

/// Exposed for the harness, which may want to assert on directory
/// contents between scenario steps.
pub fn checkpoint_path(dir: &Path, actor: ActorId) -> PathBuf {
    dir.join(format!("ckpt-{}-{}", actor.node, actor.channel))
}
