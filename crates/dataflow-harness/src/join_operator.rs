use dataflow_log::{ActorId, Batch, Row, Value};
use dataflow_runtime::Operator;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A streaming inner-join operator over an integer key column, a
/// concrete stand-in for the per-operator user-supplied function
/// object in the harness's join topology scenarios. This implementation
/// exists only so the harness has something real to execute.
///
/// Rows arriving from a parent in `a_parents` are matched against every
/// row already seen from `b_parents` under the same key (and vice
/// versa), then both sides are retained so later arrivals on either
/// side still find their match -- an ordinary symmetric hash join.
pub struct JoinOperator {
    key_column: String,
    a_parents: HashSet<ActorId>,
    b_parents: HashSet<ActorId>,
    a_table: HashMap<i64, Vec<Row>>,
    b_table: HashMap<i64, Vec<Row>>,
}

#[derive(Serialize, Deserialize)]
struct JoinState {
    a_table: Vec<(i64, Vec<Row>)>,
    b_table: Vec<(i64, Vec<Row>)>,
}

impl JoinOperator {
    pub fn new(key_column: String, a_parents: HashSet<ActorId>, b_parents: HashSet<ActorId>) -> Self {
        Self {
            key_column,
            a_parents,
            b_parents,
            a_table: HashMap::new(),
            b_table: HashMap::new(),
        }
    }

    fn key_of(&self, row: &Row) -> Option<i64> {
        match row.get(&self.key_column) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn merge(a: &Row, b: &Row) -> Row {
        let mut out = a.clone();
        for (k, v) in b {
            out.entry(format!("b_{k}")).or_insert_with(|| v.clone());
        }
        out
    }
}

impl Operator for JoinOperator {
    fn execute(&mut self, parent: ActorId, batch: Batch) -> Vec<Batch> {
        let from_a = self.a_parents.contains(&parent);
        let from_b = self.b_parents.contains(&parent);
        if !from_a && !from_b {
            tracing::warn!(%parent, "join received a batch from an unrecognised parent, dropping");
            return Vec::new();
        }

        let mut out_rows = Vec::new();
        for row in batch.rows {
            let Some(key) = self.key_of(&row) else { continue };
            if from_a {
                if let Some(matches) = self.b_table.get(&key) {
                    out_rows.extend(matches.iter().map(|b| Self::merge(&row, b)));
                }
                self.a_table.entry(key).or_default().push(row);
            } else {
                if let Some(matches) = self.a_table.get(&key) {
                    out_rows.extend(matches.iter().map(|a| Self::merge(a, &row)));
                }
                self.b_table.entry(key).or_default().push(row);
            }
        }

        if out_rows.is_empty() {
            Vec::new()
        } else {
            vec![Batch::new(out_rows)]
        }
    }

    fn save_state(&self) -> Vec<u8> {
        let state = JoinState {
            a_table: self.a_table.iter().map(|(k, v)| (*k, v.clone())).collect(),
            b_table: self.b_table.iter().map(|(k, v)| (*k, v.clone())).collect(),
        };
        bincode::serialize(&state).expect("JoinState is plain data and always serialisable")
    }

    fn restore_state(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let Ok(state) = bincode::deserialize::<JoinState>(bytes) else {
            tracing::warn!("failed to decode join operator checkpoint state, starting with empty tables");
            return;
        };
        self.a_table = state.a_table.into_iter().collect();
        self.b_table = state.b_table.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: i64, field: &str, v: i64) -> Row {
        let mut r = Row::new();
        r.insert("key".to_string(), Value::Int(key));
        r.insert(field.to_string(), Value::Int(v));
        r
    }

    #[test]
    fn matches_rows_regardless_of_arrival_order() {
        let a = ActorId::new(0, 0);
        let b = ActorId::new(1, 0);
        let mut op = JoinOperator::new("key".to_string(), [a].into(), [b].into());

        assert!(op.execute(a, Batch::new(vec![row(1, "a_val", 10)])).is_empty());
        let out = op.execute(b, Batch::new(vec![row(1, "b_val", 20)]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 1);

        // Later rows on either side still find the earlier match.
        let out2 = op.execute(b, Batch::new(vec![row(1, "b_val", 30)]));
        assert_eq!(out2[0].len(), 1);
    }

    #[test]
    fn state_round_trips_through_save_and_restore() {
        let a = ActorId::new(0, 0);
        let b = ActorId::new(1, 0);
        let mut op = JoinOperator::new("key".to_string(), [a].into(), [b].into());
        op.execute(a, Batch::new(vec![row(5, "a_val", 1)]));
        let saved = op.save_state();

        let mut restored = JoinOperator::new("key".to_string(), [a].into(), [b].into());
        restored.restore_state(&saved);
        let out = restored.execute(b, Batch::new(vec![row(5, "b_val", 2)]));
        assert_eq!(out.len(), 1);
    }
}
