use crate::Result;
use dataflow_log::ActorId;
use dataflow_scheduler::StateTagSnapshot;
use std::collections::{HashMap, VecDeque};

/// The reliable append-only list of `state_tag` snapshots a consumer
/// chose, per (node, channel). The canonical key is the typed
/// `ActorId`, which folds node and channel into one value and
/// sidesteps any node-vs-node-and-channel key ambiguity entirely.
#[async_trait::async_trait]
pub trait StateTagLog: Send + Sync {
    async fn append(&self, actor: ActorId, snapshot: StateTagSnapshot) -> Result<()>;

    /// Read the full log, used to populate `expected_path` at recovery.
    async fn range(&self, actor: ActorId) -> Result<VecDeque<StateTagSnapshot>>;

    /// Discard entries up to and including `through`: called after a
    /// checkpoint so the log never grows past what recovery still needs.
    async fn truncate_through(&self, actor: ActorId, through: &StateTagSnapshot) -> Result<()>;

    async fn len(&self, actor: ActorId) -> Result<usize>;
}

/// An in-process StateTagLog, sufficient for the `dataflow-harness`
/// scenarios and for tests. A production deployment would back this
/// with the same reliable store used by the bus; the
/// `lpop`/`range`/`append` semantics are identical either way.
#[derive(Default)]
pub struct InMemoryStateTagLog {
    logs: tokio::sync::Mutex<HashMap<ActorId, VecDeque<StateTagSnapshot>>>,
}

impl InMemoryStateTagLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StateTagLog for InMemoryStateTagLog {
    async fn append(&self, actor: ActorId, snapshot: StateTagSnapshot) -> Result<()> {
        self.logs.lock().await.entry(actor).or_default().push_back(snapshot);
        Ok(())
    }

    async fn range(&self, actor: ActorId) -> Result<VecDeque<StateTagSnapshot>> {
        Ok(self.logs.lock().await.get(&actor).cloned().unwrap_or_default())
    }

    async fn truncate_through(&self, actor: ActorId, through: &StateTagSnapshot) -> Result<()> {
        let mut logs = self.logs.lock().await;
        let Some(log) = logs.get_mut(&actor) else {
            return Ok(());
        };
        while let Some(front) = log.front() {
            let matched = front == through;
            log.pop_front();
            if matched {
                break;
            }
        }
        Ok(())
    }

    async fn len(&self, actor: ActorId) -> Result<usize> {
        Ok(self.logs.lock().await.get(&actor).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(tag: u64) -> StateTagSnapshot {
        let mut s = StateTagSnapshot::new();
        s.insert(ActorId::new(0, 0), tag);
        s
    }

    #[tokio::test]
    async fn truncate_through_discards_prefix_inclusive() {
        let log = InMemoryStateTagLog::new();
        let actor = ActorId::new(9, 0);
        for tag in 1..=5 {
            log.append(actor, snap(tag)).await.unwrap();
        }
        log.truncate_through(actor, &snap(3)).await.unwrap();
        let remaining = log.range(actor).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0], snap(4));
    }

    #[tokio::test]
    async fn expected_path_is_a_prefix_of_post_recovery_log() {
        // Snapshots logged before a crash are, in order, the first k
        // snapshots logged after recovery.
        let log = InMemoryStateTagLog::new();
        let actor = ActorId::new(1, 0);
        for tag in 1..=3 {
            log.append(actor, snap(tag)).await.unwrap();
        }
        let pre_crash: Vec<_> = log.range(actor).await.unwrap().into_iter().collect();

        // Recovery reads expected_path, then continues appending.
        let expected_path = log.range(actor).await.unwrap();
        assert_eq!(expected_path.len(), 3);
        for tag in 4..=5 {
            log.append(actor, snap(tag)).await.unwrap();
        }
        let post_recovery: Vec<_> = log.range(actor).await.unwrap().into_iter().collect();
        assert_eq!(&post_recovery[..pre_crash.len()], &pre_crash[..]);
    }
}
