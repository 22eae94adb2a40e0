use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use foundation::ids::PartitionId;
use foundation::time::Timestamp;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;

#[derive(Debug, thiserror::Error)]
pub enum PartitionDecodeError {
    #[error(transparent)]
    Parquet(#[from] ParquetError),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// A fetched row group, decoded into Arrow batches.
///
/// Immutable once built; the cache hands out shared references.
#[derive(Debug, Clone)]
pub struct Partition {
    pub id: PartitionId,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub loaded_at: Timestamp,
    pub size_bytes: usize,
}

impl Partition {
    /// Decodes a self-contained Parquet payload holding one row group.
    pub fn decode(id: PartitionId, bytes: Bytes) -> Result<Self, PartitionDecodeError> {
        let size_bytes = bytes.len();
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let schema = builder.schema().clone();
        let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id,
            schema,
            batches,
            loaded_at: Timestamp::now(),
            size_bytes,
        })
    }

    pub fn from_batches(id: PartitionId, schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        let size_bytes = batches.iter().map(|b| b.get_array_memory_size()).sum();
        Self {
            id,
            schema,
            batches,
            loaded_at: Timestamp::now(),
            size_bytes,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Encodes batches as a single Parquet payload.
pub fn encode_parquet(schema: SchemaRef, batches: &[RecordBatch]) -> Result<Bytes, ParquetError> {
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(Bytes::from(buf))
}
