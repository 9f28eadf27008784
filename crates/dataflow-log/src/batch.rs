use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A minimal column value. The runtime never inspects these except
/// through `Batch::partition_by_key`, so we keep the variant set small.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

/// One row of a tabular batch, keyed by column name.
pub type Row = HashMap<String, Value>;

/// A tabular payload moved as one unit across an edge. Opaque to the
/// runtime except when a `PartitionSpec::ColumnMod` needs to read a
/// named column to route a row to a downstream channel.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Batch {
    pub rows: Vec<Row>,
}

impl Batch {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Concatenate batches in order, as the scheduler does when merging
    /// several buffered inputs into one execution.
    pub fn concat(batches: impl IntoIterator<Item = Batch>) -> Batch {
        let mut rows = Vec::new();
        for batch in batches {
            rows.extend(batch.rows);
        }
        Batch { rows }
    }

    /// Partition rows by `row[key] mod num_channels`, as
    /// `PartitionSpec::ColumnMod` does. Rows missing the key column, or
    /// holding a non-integer value there, are dropped -- this mirrors
    /// the "treated as opaque" contract: a column partition spec is a
    /// promise from the topology author that the column exists.
    pub fn partition_by_key_mod(&self, key: &str, num_channels: u32) -> HashMap<u32, Batch> {
        let mut out: HashMap<u32, Batch> = HashMap::new();
        for row in &self.rows {
            let Some(Value::Int(v)) = row.get(key) else {
                continue;
            };
            let channel = (v.rem_euclid(num_channels as i64)) as u32;
            out.entry(channel).or_default().rows.push(row.clone());
        }
        out
    }
}
