use dataflow_log::{Batch, Row};
use dataflow_runtime::DatasetReader;

/// A `DatasetReader` over an in-memory `Vec<Row>`, one row per batch,
/// standing in for a physical dataset reader (CSV, columnar files,
/// object-store blobs). `position` is simply the next row index, which
/// is exactly what a real CSV reader's byte offset would also reduce
/// to for resumability.
#[derive(Clone)]
pub struct RowsReader {
    rows: Vec<Row>,
}

impl RowsReader {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

impl DatasetReader for RowsReader {
    fn next_batch(&mut self, resume_from: u64) -> Option<(u64, Batch)> {
        let idx = resume_from as usize;
        if idx >= self.rows.len() {
            return None;
        }
        Some((resume_from + 1, Batch::new(vec![self.rows[idx].clone()])))
    }
}
