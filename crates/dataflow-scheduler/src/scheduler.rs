use crate::{ConsumerState, Error, Result, StateTagSnapshot};
use dataflow_log::{ActorId, Batch};
use std::collections::VecDeque;

/// One scheduling decision: merge `merged_count` batches from `edge`
/// into a single execution, and the full `state_tag` snapshot that
/// decision produced (to be appended to the StateTagLog by the caller).
pub struct ScheduleDecision {
    pub edge: ActorId,
    pub batch: Batch,
    pub merged_count: u64,
    pub state_tag_snapshot: StateTagSnapshot,
}

/// Picks which buffered edge to consume next. Starts in normal
/// (greedy) mode; constructing with `from_expected_path` enters replay
/// mode, which is exited only once the whole expected path has been
/// consumed.
pub struct Scheduler {
    expected_path: VecDeque<StateTagSnapshot>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            expected_path: VecDeque::new(),
        }
    }

    /// Enter replay mode with the StateTagLog loaded at recovery: the
    /// recovered actor replays this path exactly before accepting new
    /// greedy choices.
    pub fn from_expected_path(expected_path: VecDeque<StateTagSnapshot>) -> Self {
        Self { expected_path }
    }

    pub fn is_replaying(&self) -> bool {
        !self.expected_path.is_empty()
    }

    pub fn schedule(&mut self, state: &mut ConsumerState) -> Result<Option<ScheduleDecision>> {
        if self.expected_path.is_empty() {
            Ok(self.schedule_normal(state))
        } else {
            self.schedule_replay(state)
        }
    }

    /// Normal mode: choose the edge with the greatest backlog, breaking
    /// ties by lowest (node, channel) for determinism.
    fn schedule_normal(&mut self, state: &mut ConsumerState) -> Option<ScheduleDecision> {
        let mut edges: Vec<ActorId> = state.edges().collect();
        edges.sort(); // ascending (node, channel): lowest edge wins length ties.

        let mut best: Option<(ActorId, usize)> = None;
        for edge in edges {
            let len = state.buffer_len(edge);
            if len == 0 {
                continue;
            }
            match best {
                Some((_, best_len)) if len <= best_len => {}
                _ => best = Some((edge, len)),
            }
        }
        let (edge, len) = best?;

        let merged = Batch::concat(state.drain(edge));
        state.advance_state_tag(edge, len as u64);
        let snapshot = state.state_tag_snapshot();

        Some(ScheduleDecision {
            edge,
            batch: merged,
            merged_count: len as u64,
            state_tag_snapshot: snapshot,
        })
    }

    /// Replay mode: the head of `expected_path` is the next state_tag
    /// snapshot chosen pre-crash. Exactly one edge's component must be
    /// strictly greater than the current one, or replay is no longer
    /// deterministic.
    fn schedule_replay(&mut self, state: &mut ConsumerState) -> Result<Option<ScheduleDecision>> {
        let expected = self.expected_path.front().expect("checked non-empty above");

        let mut positive: Option<(ActorId, u64)> = None;
        let mut positive_count = 0usize;
        for (&edge, &expected_tag) in expected {
            let diff = expected_tag as i128 - state.state_tag(edge) as i128;
            if diff > 0 {
                positive_count += 1;
                positive = Some((edge, diff as u64));
            }
        }
        if positive_count > 1 {
            return Err(Error::TopologyInvariantViolation(positive_count));
        }
        let Some((edge, diff)) = positive else {
            // expected == current already; nothing left to replay for this snapshot.
            self.expected_path.pop_front();
            return Ok(None);
        };

        let Some(batches) = state.pop_front_n(edge, diff) else {
            tracing::debug!(%edge, diff, "replay: cannot fulfill expectation yet, waiting for more arrivals");
            return Ok(None);
        };

        let merged = Batch::concat(batches);
        state.set_state_tag(edge, expected[&edge]);
        let snapshot = expected.clone();
        self.expected_path.pop_front();

        Ok(Some(ScheduleDecision {
            edge,
            batch: merged,
            merged_count: diff,
            state_tag_snapshot: snapshot,
        }))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_log::{Envelope, Payload};

    fn edge(node: u32, channel: u32) -> ActorId {
        ActorId::new(node, channel)
    }

    fn push_batch(state: &mut ConsumerState, src: ActorId, seq: u64) {
        let outcome = state.admit(Envelope {
            src,
            seq,
            payload: Payload::Data(Batch::default()),
        });
        assert_eq!(outcome, crate::AdmitOutcome::Buffered);
    }

    #[test]
    fn normal_mode_prefers_longest_queue_then_lowest_edge() {
        let a = edge(0, 0);
        let b = edge(1, 0);
        let mut state = ConsumerState::new([a, b]);

        push_batch(&mut state, a, 1);
        push_batch(&mut state, b, 1);
        push_batch(&mut state, b, 2);

        let mut sched = Scheduler::new();
        let decision = sched.schedule(&mut state).unwrap().unwrap();
        assert_eq!(decision.edge, b);
        assert_eq!(decision.merged_count, 2);
        assert_eq!(state.state_tag(b), 2);
        assert_eq!(state.state_tag(a), 0);
    }

    #[test]
    fn normal_mode_tie_break_is_deterministic() {
        let a = edge(0, 0);
        let b = edge(1, 0);
        let mut state = ConsumerState::new([a, b]);
        push_batch(&mut state, a, 1);
        push_batch(&mut state, b, 1);

        let mut sched = Scheduler::new();
        let decision = sched.schedule(&mut state).unwrap().unwrap();
        assert_eq!(decision.edge, a); // a < b lexicographically
    }

    #[test]
    fn replay_mode_reproduces_recorded_path_and_ignores_greedy_choice() {
        let a = edge(0, 0);
        let b = edge(1, 0);

        // Pre-crash: state_tag ended at {a: 0, b: 2}, logged as one snapshot.
        let mut expected = StateTagSnapshot::new();
        expected.insert(a, 0);
        expected.insert(b, 2);
        let mut path = VecDeque::new();
        path.push_back(expected);

        let mut state = ConsumerState::new([a, b]);
        // Post-recovery arrivals: a's queue is now longer, but replay
        // must still pick b to reproduce the pre-crash path exactly.
        push_batch(&mut state, a, 1);
        push_batch(&mut state, a, 2);
        push_batch(&mut state, b, 1);
        push_batch(&mut state, b, 2);

        let mut sched = Scheduler::from_expected_path(path);
        assert!(sched.is_replaying());
        let decision = sched.schedule(&mut state).unwrap().unwrap();
        assert_eq!(decision.edge, b);
        assert_eq!(decision.merged_count, 2);
        assert!(!sched.is_replaying());
    }

    #[test]
    fn replay_mode_waits_rather_than_falling_back_to_greedy() {
        let a = edge(0, 0);
        let mut expected = StateTagSnapshot::new();
        expected.insert(a, 3);
        let mut path = VecDeque::new();
        path.push_back(expected);

        let mut state = ConsumerState::new([a]);
        push_batch(&mut state, a, 1); // only 1 buffered, need 3

        let mut sched = Scheduler::from_expected_path(path);
        let decision = sched.schedule(&mut state).unwrap();
        assert!(decision.is_none());
        assert!(sched.is_replaying()); // still replaying, didn't give up
        assert_eq!(state.state_tag(a), 0); // unchanged
    }

    #[test]
    fn replay_mode_rejects_multiple_positive_diffs() {
        let a = edge(0, 0);
        let b = edge(1, 0);
        let mut expected = StateTagSnapshot::new();
        expected.insert(a, 1);
        expected.insert(b, 1);
        let mut path = VecDeque::new();
        path.push_back(expected);

        let mut state = ConsumerState::new([a, b]);
        push_batch(&mut state, a, 1);
        push_batch(&mut state, b, 1);

        let mut sched = Scheduler::from_expected_path(path);
        let err = sched.schedule(&mut state).unwrap_err();
        assert!(matches!(err, Error::TopologyInvariantViolation(2)));
    }

    #[quickcheck_macros::quickcheck]
    fn state_tag_is_monotone_under_arbitrary_arrival_order(arrivals: Vec<(bool, u8)>) -> bool {
        // state_tag[edge] never decreases as arrivals are admitted
        // and scheduled, for either of two sibling edges, regardless of
        // interleaving.
        let a = edge(0, 0);
        let b = edge(1, 0);
        let mut state = ConsumerState::new([a, b]);
        let mut sched = Scheduler::new();
        let mut next_seq = [1u64, 1u64];
        let mut last_tag = [0u64, 0u64];

        for (pick_a, _) in arrivals.into_iter().take(64) {
            let idx = if pick_a { 0 } else { 1 };
            let src = if pick_a { a } else { b };
            state.admit(Envelope {
                src,
                seq: next_seq[idx],
                payload: Payload::Data(Batch::default()),
            });
            next_seq[idx] += 1;

            if let Some(decision) = sched.schedule(&mut state).unwrap() {
                let idx = if decision.edge == a { 0 } else { 1 };
                let tag = decision.state_tag_snapshot[&decision.edge];
                if tag < last_tag[idx] {
                    return false;
                }
                last_tag[idx] = tag;
            }
        }
        true
    }
}
