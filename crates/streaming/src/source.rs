//! Row-group sources: the transports a [`crate::client::PartialReadClient`]
//! reads partitions through.
//!
//! - HTTP metadata service (the production path)
//! - Local Parquet files, addressed by row-group index
//! - In-memory payloads for tests and demos
//!
//! Every source classifies its failures as either "metadata still being
//! processed" (worth retrying) or fatal.

use std::collections::HashMap;
use std::fs::File;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use bytes::Bytes;
use foundation::ids::PartitionId;
use parking_lot::Mutex;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::partition::encode_parquet;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body marker the metadata service uses while a file is still being indexed.
pub const METADATA_PENDING_MARKER: &str = "metadata is still being processed";

/// Addresses one row group of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroupRequest {
    pub store_path: String,
    pub metadata_url: String,
    pub partition: PartitionId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// The store has the object but its metadata is not ready yet.
    MetadataPending,
    Fatal,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SourceError {
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::MetadataPending,
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Fatal,
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: SourceErrorKind::Fatal,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.kind == SourceErrorKind::MetadataPending
    }
}

/// Trait for row-group transports.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait RowGroupSource: Send + Sync {
    fn name(&self) -> &str;

    /// Reads one row group as a self-contained Parquet payload.
    fn read_row_group(&self, request: RowGroupRequest) -> BoxFuture<'_, Result<Bytes, SourceError>>;
}

fn is_pending_message(body: &str) -> bool {
    body.to_ascii_lowercase().contains(METADATA_PENDING_MARKER)
}

/// First `max_chars` characters of an error body, for log and status text.
fn body_excerpt(body: &str, max_chars: usize) -> String {
    body.trim().chars().take(max_chars).collect()
}

/// Reads row groups through the metadata service over HTTP.
///
/// `GET {metadata_url}?path={store_path}&row_group={id}`; `202 Accepted` or an
/// error body carrying [`METADATA_PENDING_MARKER`] means "try again".
pub struct HttpRowGroupSource {
    client: reqwest::Client,
}

impl HttpRowGroupSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRowGroupSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RowGroupSource for HttpRowGroupSource {
    fn name(&self) -> &str {
        "http"
    }

    fn read_row_group(&self, request: RowGroupRequest) -> BoxFuture<'_, Result<Bytes, SourceError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&request.metadata_url)
                .query(&[
                    ("path", request.store_path.clone()),
                    ("row_group", request.partition.to_string()),
                ])
                .send()
                .await
                .map_err(|e| SourceError::fatal_with("row group request failed", e))?;

            let status = resp.status();
            if status == reqwest::StatusCode::ACCEPTED {
                return Err(SourceError::pending(format!(
                    "partition {}: {METADATA_PENDING_MARKER}",
                    request.partition
                )));
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                if is_pending_message(&body) {
                    return Err(SourceError::pending(body));
                }
                return Err(SourceError::fatal(format!(
                    "HTTP {status} for partition {}: {}",
                    request.partition,
                    body_excerpt(&body, 200)
                )));
            }

            resp.bytes()
                .await
                .map_err(|e| SourceError::fatal_with("failed to read row group body", e))
        })
    }
}

/// Reads row groups straight out of local Parquet files.
///
/// `store_path` is resolved against `root` when one is configured; the
/// metadata URL is ignored. The selected row group is re-encoded so callers
/// always receive a self-contained payload.
pub struct FileRowGroupSource {
    root: Option<PathBuf>,
}

impl FileRowGroupSource {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, store_path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(store_path),
            None => PathBuf::from(store_path),
        }
    }
}

impl Default for FileRowGroupSource {
    fn default() -> Self {
        Self::new()
    }
}

fn read_local_row_group(path: PathBuf, partition: PartitionId) -> Result<Bytes, SourceError> {
    let file = File::open(&path)
        .map_err(|e| SourceError::fatal_with(format!("cannot open {}", path.display()), e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| SourceError::fatal_with("not a parquet file", e))?;

    let row_groups = builder.metadata().num_row_groups();
    let index = usize::try_from(partition.get()).unwrap_or(usize::MAX);
    if index >= row_groups {
        return Err(SourceError::fatal(format!(
            "row group {partition} out of range ({row_groups} row groups in {})",
            path.display()
        )));
    }

    let schema = builder.schema().clone();
    let reader = builder
        .with_row_groups(vec![index])
        .build()
        .map_err(|e| SourceError::fatal_with("cannot build row group reader", e))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SourceError::fatal_with("cannot decode row group", e))?;

    encode_parquet(schema, &batches).map_err(|e| SourceError::fatal_with("cannot re-encode row group", e))
}

impl RowGroupSource for FileRowGroupSource {
    fn name(&self) -> &str {
        "file"
    }

    fn read_row_group(&self, request: RowGroupRequest) -> BoxFuture<'_, Result<Bytes, SourceError>> {
        let path = self.resolve(&request.store_path);
        let partition = request.partition;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || read_local_row_group(path, partition))
                .await
                .map_err(|e| SourceError::fatal_with("row group reader task failed", e))?
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    payloads: HashMap<PartitionId, Bytes>,
    pending: HashMap<PartitionId, u32>,
    failures: HashMap<PartitionId, String>,
    reads: HashMap<PartitionId, u32>,
}

/// In-memory row-group source for tests or generated data.
///
/// Can be told to report "metadata pending" for the next N reads of a
/// partition, or to fail it outright; every read is counted.
#[derive(Debug, Default)]
pub struct MemoryRowGroupSource {
    state: Mutex<MemoryState>,
}

impl MemoryRowGroupSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, partition: PartitionId, payload: Bytes) {
        self.state.lock().payloads.insert(partition, payload);
    }

    /// The next `reads` reads of `partition` report pending metadata.
    pub fn set_pending(&self, partition: PartitionId, reads: u32) {
        self.state.lock().pending.insert(partition, reads);
    }

    pub fn fail(&self, partition: PartitionId, message: impl Into<String>) {
        self.state.lock().failures.insert(partition, message.into());
    }

    pub fn clear_failure(&self, partition: PartitionId) {
        self.state.lock().failures.remove(&partition);
    }

    pub fn reads(&self, partition: PartitionId) -> u32 {
        self.state.lock().reads.get(&partition).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> u32 {
        self.state.lock().reads.values().sum()
    }

    fn read_now(&self, partition: PartitionId) -> Result<Bytes, SourceError> {
        let mut state = self.state.lock();
        *state.reads.entry(partition).or_insert(0) += 1;

        if let Some(left) = state.pending.get_mut(&partition) {
            if *left > 0 {
                *left -= 1;
                return Err(SourceError::pending(format!(
                    "partition {partition}: {METADATA_PENDING_MARKER}"
                )));
            }
        }
        if let Some(message) = state.failures.get(&partition) {
            return Err(SourceError::fatal(message.clone()));
        }
        state
            .payloads
            .get(&partition)
            .cloned()
            .ok_or_else(|| SourceError::fatal(format!("unknown row group {partition}")))
    }
}

impl RowGroupSource for MemoryRowGroupSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn read_row_group(&self, request: RowGroupRequest) -> BoxFuture<'_, Result<Bytes, SourceError>> {
        Box::pin(async move {
            // Suspend once so concurrent callers interleave like a real transport.
            tokio::task::yield_now().await;
            self.read_now(request.partition)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FileRowGroupSource, MemoryRowGroupSource, RowGroupRequest, RowGroupSource,
        SourceErrorKind, body_excerpt, is_pending_message,
    };
    use crate::partition::Partition;
    use arrow::array::UInt64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use bytes::Bytes;
    use foundation::ids::PartitionId;
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;
    use std::sync::Arc;

    fn request(store_path: &str, id: u64) -> RowGroupRequest {
        RowGroupRequest {
            store_path: store_path.to_string(),
            metadata_url: "http://unused".to_string(),
            partition: PartitionId(id),
        }
    }

    #[test]
    fn error_excerpt_cuts_on_char_boundaries() {
        let body = "€".repeat(300);
        let excerpt = body_excerpt(&body, 200);
        assert_eq!(excerpt.chars().count(), 200);
        assert_eq!(body_excerpt("  short body \n", 200), "short body");
    }

    #[test]
    fn recognizes_pending_marker_case_insensitively() {
        assert!(is_pending_message(
            "{\"error\":\"Metadata is still being processed, retry\"}"
        ));
        assert!(!is_pending_message("permission denied"));
    }

    #[tokio::test]
    async fn memory_source_reports_pending_then_payload() {
        let source = MemoryRowGroupSource::new();
        source.insert(PartitionId(1), Bytes::from_static(b"payload"));
        source.set_pending(PartitionId(1), 2);

        for _ in 0..2 {
            let err = source.read_row_group(request("s", 1)).await.unwrap_err();
            assert_eq!(err.kind, SourceErrorKind::MetadataPending);
        }
        let bytes = source.read_row_group(request("s", 1)).await.unwrap();
        assert_eq!(&bytes[..], b"payload");
        assert_eq!(source.reads(PartitionId(1)), 3);
    }

    #[tokio::test]
    async fn memory_source_unknown_partition_is_fatal() {
        let source = MemoryRowGroupSource::new();
        let err = source.read_row_group(request("s", 8)).await.unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::Fatal);
    }

    #[tokio::test]
    async fn file_source_reads_single_row_group() {
        let schema = Arc::new(Schema::new(vec![Field::new("hex", DataType::UInt64, false)]));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.parquet");

        let props = WriterProperties::builder()
            .set_max_row_group_size(2)
            .build();
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props)).unwrap();
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(UInt64Array::from(vec![10, 11, 12, 13, 14]))],
        )
        .unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let source = FileRowGroupSource::with_root(dir.path());
        let bytes = source
            .read_row_group(request("data.parquet", 1))
            .await
            .unwrap();
        let partition = Partition::decode(PartitionId(1), bytes).unwrap();
        assert_eq!(partition.num_rows(), 2);

        let err = source
            .read_row_group(request("data.parquet", 3))
            .await
            .unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::Fatal);
    }
}
