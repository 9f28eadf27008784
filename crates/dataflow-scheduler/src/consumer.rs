use crate::StateTagSnapshot;
use dataflow_log::{ActorId, Batch, Envelope, Payload};
use std::collections::{HashMap, HashSet, VecDeque};

/// Result of running an arrival through the admission filter.
#[derive(Debug, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Buffered for the scheduler to pick up.
    Buffered,
    /// Admission rule 1: `seq <= state_tag[src]`. Already merged into a
    /// past execution.
    DroppedStale,
    /// Admission rule 2: `seq > latest_input_received[src] + 1`. A
    /// future/out-of-order arrival; the producer's `resend_above` will
    /// replay the missing prefix.
    DroppedFuture,
    /// The "done" sentinel for one parent channel. `true` if that was
    /// the parent node's last live channel, so the whole parent was
    /// removed.
    ParentDone { parent_fully_done: bool },
}

/// Per-consumer-edge bookkeeping: `InputState`, `BufferedInputs`, and
/// the remaining parent set.
pub struct ConsumerState {
    parents: HashMap<u32, HashSet<u32>>,
    state_tag: HashMap<ActorId, u64>,
    latest_input_received: HashMap<ActorId, u64>,
    buffered: HashMap<ActorId, VecDeque<Batch>>,
}

impl ConsumerState {
    pub fn new(edges: impl IntoIterator<Item = ActorId>) -> Self {
        let mut parents: HashMap<u32, HashSet<u32>> = HashMap::new();
        let mut state_tag = HashMap::new();
        let mut latest_input_received = HashMap::new();
        let mut buffered = HashMap::new();
        for edge in edges {
            parents.entry(edge.node).or_default().insert(edge.channel);
            state_tag.insert(edge, 0);
            latest_input_received.insert(edge, 0);
            buffered.insert(edge, VecDeque::new());
        }
        Self {
            parents,
            state_tag,
            latest_input_received,
            buffered,
        }
    }

    /// Restore from a checkpointed `InputState` at recovery.
    pub fn restore(
        edges: impl IntoIterator<Item = ActorId>,
        state_tag: HashMap<ActorId, u64>,
        latest_input_received: HashMap<ActorId, u64>,
    ) -> Self {
        let mut me = Self::new(edges);
        me.state_tag = state_tag;
        me.latest_input_received = latest_input_received;
        me
    }

    pub fn state_tag_snapshot(&self) -> StateTagSnapshot {
        self.state_tag.iter().map(|(k, v)| (*k, *v)).collect()
    }

    pub fn state_tag(&self, edge: ActorId) -> u64 {
        self.state_tag.get(&edge).copied().unwrap_or(0)
    }

    pub fn latest_input_received(&self, edge: ActorId) -> u64 {
        self.latest_input_received.get(&edge).copied().unwrap_or(0)
    }

    /// Full `InputState` export for embedding in a Checkpoint.
    pub fn latest_input_received_map(&self) -> HashMap<ActorId, u64> {
        self.latest_input_received.clone()
    }

    pub fn parents_remaining(&self) -> bool {
        !self.parents.is_empty()
    }

    pub fn buffers_drained(&self) -> bool {
        self.buffered.values().all(VecDeque::is_empty)
    }

    pub fn buffer_len(&self, edge: ActorId) -> usize {
        self.buffered.get(&edge).map_or(0, VecDeque::len)
    }

    pub fn edges(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.buffered.keys().copied()
    }

    /// Run one arrival through the ordered admission filter.
    pub fn admit(&mut self, env: Envelope) -> AdmitOutcome {
        let edge = env.src;

        if env.seq <= self.state_tag(edge) {
            tracing::debug!(src = %edge, seq = env.seq, "admission: dropping stale/duplicate arrival");
            return AdmitOutcome::DroppedStale;
        }
        if env.seq > self.latest_input_received(edge) + 1 {
            tracing::debug!(src = %edge, seq = env.seq, "admission: dropping future arrival, awaiting resend");
            return AdmitOutcome::DroppedFuture;
        }

        self.latest_input_received.insert(edge, env.seq);

        match env.payload {
            Payload::Done => {
                let parent_fully_done = match self.parents.get_mut(&edge.node) {
                    Some(channels) => {
                        channels.remove(&edge.channel);
                        if channels.is_empty() {
                            self.parents.remove(&edge.node);
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                };
                AdmitOutcome::ParentDone { parent_fully_done }
            }
            Payload::Data(batch) => {
                self.buffered.entry(edge).or_default().push_back(batch);
                AdmitOutcome::Buffered
            }
        }
    }

    pub(crate) fn advance_state_tag(&mut self, edge: ActorId, by: u64) {
        *self.state_tag.entry(edge).or_insert(0) += by;
    }

    pub(crate) fn set_state_tag(&mut self, edge: ActorId, to: u64) {
        self.state_tag.insert(edge, to);
    }

    pub(crate) fn drain(&mut self, edge: ActorId) -> VecDeque<Batch> {
        self.buffered.entry(edge).or_default().drain(..).collect()
    }

    pub(crate) fn pop_front_n(&mut self, edge: ActorId, n: u64) -> Option<Vec<Batch>> {
        let queue = self.buffered.get_mut(&edge)?;
        if (queue.len() as u64) < n {
            return None;
        }
        Some((0..n).filter_map(|_| queue.pop_front()).collect())
    }
}
