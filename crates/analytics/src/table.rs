use std::collections::BTreeSet;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use foundation::ids::PartitionId;
use spatial::cell::CellId;

/// Queryable union of the partitions needed for one viewport, restricted to
/// rows whose coarse cell is in the viewport's covering set.
///
/// Built once per distinct (partitions, cells) pair and never modified.
#[derive(Debug, Clone)]
pub struct LogicalTable {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub partitions: BTreeSet<PartitionId>,
    pub cells: BTreeSet<CellId>,
    pub num_rows: usize,
}

impl LogicalTable {
    pub fn new(
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        partitions: BTreeSet<PartitionId>,
        cells: BTreeSet<CellId>,
    ) -> Self {
        let num_rows = batches.iter().map(|b| b.num_rows()).sum();
        Self {
            schema,
            batches,
            partitions,
            cells,
            num_rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Whether this table was built from exactly these inputs.
    pub fn built_from(&self, partitions: &BTreeSet<PartitionId>, cells: &BTreeSet<CellId>) -> bool {
        &self.partitions == partitions && &self.cells == cells
    }
}
