use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use foundation::ids::PartitionId;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;
use tracing::{debug, info, warn};

use crate::cell::CellId;
use crate::column::{ColumnError, cell_ids, unsigned_ids};

pub const COARSE_CELL_COLUMN: &str = "coarse_cell";
pub const PARTITION_ID_COLUMN: &str = "partition_id";

/// One row of the index file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpatialIndexEntry {
    pub coarse_cell: CellId,
    pub partition_id: PartitionId,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("cannot open spatial index {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spatial index is not readable parquet: {0}")]
    Parquet(#[from] ParquetError),
    #[error("spatial index batch could not be decoded: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("spatial index column error: {0}")]
    Column(#[from] ColumnError),
}

/// Coarse cell -> partitions multimap, read-only after loading.
#[derive(Debug, Default, Clone)]
pub struct SpatialIndex {
    by_cell: HashMap<CellId, BTreeSet<PartitionId>>,
    entry_count: usize,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = SpatialIndexEntry>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    /// Reads the index from a local Parquet file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::from_reader(ParquetRecordBatchReaderBuilder::try_new(file)?)?;
        info!(
            path = %path.display(),
            cells = index.cell_count(),
            entries = index.len(),
            "spatial index loaded"
        );
        Ok(index)
    }

    /// Reads the index from an in-memory Parquet payload.
    pub fn from_parquet_bytes(bytes: Bytes) -> Result<Self, IndexError> {
        Self::from_reader(ParquetRecordBatchReaderBuilder::try_new(bytes)?)
    }

    fn from_reader<T>(builder: ParquetRecordBatchReaderBuilder<T>) -> Result<Self, IndexError>
    where
        T: parquet::file::reader::ChunkReader + 'static,
    {
        let mut index = Self::new();
        for batch in builder.build()? {
            index.insert_batch(&batch?)?;
        }
        if index.is_empty() {
            warn!("spatial index is empty; every viewport will resolve to no data");
        }
        Ok(index)
    }

    fn insert_batch(&mut self, batch: &RecordBatch) -> Result<(), IndexError> {
        let cells = batch
            .column_by_name(COARSE_CELL_COLUMN)
            .ok_or_else(|| ColumnError::Missing(COARSE_CELL_COLUMN.to_string()))?;
        let ids = batch
            .column_by_name(PARTITION_ID_COLUMN)
            .ok_or_else(|| ColumnError::Missing(PARTITION_ID_COLUMN.to_string()))?;

        let cells = cell_ids(COARSE_CELL_COLUMN, cells.as_ref())?;
        let ids = unsigned_ids(PARTITION_ID_COLUMN, ids.as_ref())?;

        let mut skipped = 0usize;
        for (cell, id) in cells.into_iter().zip(ids) {
            match (cell, id) {
                (Some(coarse_cell), Some(id)) => self.insert(SpatialIndexEntry {
                    coarse_cell,
                    partition_id: PartitionId(id),
                }),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, "spatial index rows with null or invalid values skipped");
        }
        Ok(())
    }

    fn insert(&mut self, entry: SpatialIndexEntry) {
        if self
            .by_cell
            .entry(entry.coarse_cell)
            .or_default()
            .insert(entry.partition_id)
        {
            self.entry_count += 1;
        }
    }

    /// Union of the partitions recorded for `cells`; unknown cells contribute nothing.
    pub fn partitions_for<'a>(
        &self,
        cells: impl IntoIterator<Item = &'a CellId>,
    ) -> BTreeSet<PartitionId> {
        let mut out = BTreeSet::new();
        for cell in cells {
            if let Some(ids) = self.by_cell.get(cell) {
                out.extend(ids.iter().copied());
            }
        }
        out
    }

    /// Number of distinct (cell, partition) pairs.
    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn cell_count(&self) -> usize {
        self.by_cell.len()
    }
}
