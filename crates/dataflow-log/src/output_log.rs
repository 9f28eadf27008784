use crate::{ActorId, Error, Payload, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

/// A producer's retained history of emitted batches, plus the highest
/// seq each downstream target has durably checkpointed.
///
/// Two logically concurrent activities touch this state: the producer's
/// own main loop (`push`, and `truncate` on checkpoint) and recovery
/// RPCs invoked by remote peers (`resend_above`, via
/// `help_downstream_recover`). Both are serialized through a single
/// output lock held for the full duration of the call; the lock is
/// never held across checkpoint-store I/O.
pub struct OutputLog {
    inner: tokio::sync::Mutex<Inner>,
}

struct Inner {
    entries: BTreeMap<u64, Payload>,
    target_state: BTreeMap<ActorId, u64>,
    out_seq: u64,
}

/// Serializable snapshot of an `OutputLog`, embedded in a per-actor
/// Checkpoint.
#[derive(Serialize, Deserialize)]
pub struct OutputLogSnapshot {
    entries: Vec<(u64, Payload)>,
    target_state: Vec<(ActorId, u64)>,
    out_seq: u64,
}

impl OutputLog {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(Inner {
                entries: BTreeMap::new(),
                target_state: BTreeMap::new(),
                out_seq: 0,
            }),
        }
    }

    pub fn from_snapshot(snapshot: OutputLogSnapshot) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(Inner {
                entries: snapshot.entries.into_iter().collect(),
                target_state: snapshot.target_state.into_iter().collect(),
                out_seq: snapshot.out_seq,
            }),
        }
    }

    pub async fn snapshot(&self) -> OutputLogSnapshot {
        let inner = self.inner.lock().await;
        OutputLogSnapshot {
            entries: inner.entries.iter().map(|(k, v)| (*k, v.clone())).collect(),
            target_state: inner.target_state.iter().map(|(k, v)| (*k, *v)).collect(),
            out_seq: inner.out_seq,
        }
    }

    /// Seed a freshly-learned downstream target at cursor zero, called
    /// from `append_to_targets`.
    pub async fn register_target(&self, target: ActorId) {
        let mut inner = self.inner.lock().await;
        inner.target_state.entry(target).or_insert(0);
    }

    /// Increment `out_seq`, append the payload under it, and return the
    /// new seq for the caller to publish alongside the payload.
    pub async fn push(&self, payload: Payload) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.out_seq += 1;
        let seq = inner.out_seq;
        if inner.entries.insert(seq, payload).is_some() {
            return Err(Error::DuplicateSeq(seq));
        }
        Ok(seq)
    }

    pub async fn out_seq(&self) -> u64 {
        self.inner.lock().await.out_seq
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn min_seq(&self) -> Option<u64> {
        self.inner.lock().await.entries.keys().next().copied()
    }

    /// Re-publish every logged entry with `seq > cursor`, in seq order,
    /// to `target`, while holding the output lock for the full resend.
    /// Called from `help_downstream_recover`.
    pub async fn resend_above<F, Fut, E>(&self, cursor: u64, mut publish: F) -> std::result::Result<(), E>
    where
        F: FnMut(u64, Payload) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
    {
        let inner = self.inner.lock().await;
        for (&seq, payload) in inner.entries.range(cursor + 1..) {
            publish(seq, payload.clone()).await?;
        }
        Ok(())
    }

    /// Record that `target` has durably checkpointed past `new_cursor`,
    /// then truncate every entry below the new minimum across all
    /// targets. `new_cursor` itself is retained, not flushed -- see
    /// DESIGN.md for why.
    pub async fn truncate(&self, target: ActorId, new_cursor: u64) {
        let mut inner = self.inner.lock().await;
        let old_min = Self::current_min(&inner.target_state);

        let cursor = inner.target_state.entry(target).or_insert(0);
        *cursor = (*cursor).max(new_cursor); // monotone, never regress.

        let new_min = Self::current_min(&inner.target_state);
        Self::truncate_range(&mut inner.entries, old_min, new_min);
    }

    /// A target has been declared dead (every channel saw `node-done`).
    /// Drop its cursor so it no longer pins truncation, then recompute
    /// what can now be discarded.
    pub async fn remove_target(&self, target: ActorId) {
        let mut inner = self.inner.lock().await;
        let old_min = Self::current_min(&inner.target_state);
        inner.target_state.remove(&target);
        let new_min = Self::current_min(&inner.target_state);
        Self::truncate_range(&mut inner.entries, old_min, new_min);
    }

    fn current_min(target_state: &BTreeMap<ActorId, u64>) -> Option<u64> {
        target_state.values().copied().min()
    }

    fn truncate_range(entries: &mut BTreeMap<u64, Payload>, old_min: Option<u64>, new_min: Option<u64>) {
        let (Some(old_min), Some(new_min)) = (old_min, new_min) else {
            return;
        };
        if new_min > old_min {
            for key in old_min..new_min {
                entries.remove(&key);
            }
        }
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;

    fn actor(node: u32, channel: u32) -> ActorId {
        ActorId::new(node, channel)
    }

    #[tokio::test]
    async fn truncation_respects_min_across_targets() {
        let log = OutputLog::new();
        for _ in 0..5 {
            log.push(Payload::Data(Default::default())).await.unwrap();
        }
        log.register_target(actor(1, 0)).await;
        log.register_target(actor(1, 1)).await;

        // Target 0 has checkpointed past seq 4, target 1 is still at 0:
        // the lagging sibling holds back truncation entirely.
        log.truncate(actor(1, 0), 4).await;
        assert_eq!(log.len().await, 5);

        // Target 1 catches up to 4 as well: min across targets becomes 4,
        // and [old_min=0, new_min=4) is removed, retaining seq 4 itself.
        log.truncate(actor(1, 1), 4).await;
        assert_eq!(log.min_seq().await, Some(4));
        assert_eq!(log.len().await, 2); // seq 4 and seq 5 remain.
    }

    #[tokio::test]
    async fn dead_target_no_longer_pins_the_log() {
        let log = OutputLog::new();
        for _ in 0..3 {
            log.push(Payload::Data(Default::default())).await.unwrap();
        }
        log.register_target(actor(1, 0)).await;
        log.register_target(actor(2, 0)).await;
        log.truncate(actor(1, 0), 3).await;
        assert_eq!(log.len().await, 3); // target 2 still at cursor 0.

        log.remove_target(actor(2, 0)).await;
        assert_eq!(log.len().await, 1); // only seq 3 (== new min) remains.
    }

    #[tokio::test]
    async fn resend_above_replays_in_seq_order() {
        let log = OutputLog::new();
        for _ in 0..4 {
            log.push(Payload::Data(Default::default())).await.unwrap();
        }
        let mut seen = Vec::new();
        log.resend_above::<_, _, std::convert::Infallible>(1, |seq, _| {
            seen.push(seq);
            async { Ok(()) }
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn truncate_never_regresses_a_targets_cursor() {
        // A target's recorded cursor is monotone even if truncate is
        // (erroneously, or via a stale re-delivered RPC) called with an
        // older cursor than one already recorded.
        let log = OutputLog::new();
        for _ in 0..10 {
            log.push(Payload::Data(Default::default())).await.unwrap();
        }
        let target = actor(9, 0);
        log.register_target(target).await;
        log.truncate(target, 7).await;
        log.truncate(target, 3).await; // stale/out-of-order call.
        assert_eq!(log.min_seq().await, Some(7));
    }
}
