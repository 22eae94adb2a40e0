use std::sync::Arc;

use bytes::Bytes;
use foundation::ids::PartitionId;
use runtime::metrics::{Counter, Series, SharedMetrics};
use tracing::{debug, warn};

use crate::partition::{Partition, PartitionDecodeError};
use crate::source::{RowGroupRequest, RowGroupSource, SourceError};

pub const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("partition {partition}: {source}")]
    Fatal {
        partition: PartitionId,
        #[source]
        source: SourceError,
    },
    /// Metadata was still pending after every allowed attempt.
    #[error("partition {partition}: store still busy after {attempts} attempts")]
    StoreBusy {
        partition: PartitionId,
        attempts: u32,
    },
    #[error("partition {partition}: payload is not valid parquet: {source}")]
    Decode {
        partition: PartitionId,
        #[source]
        source: PartitionDecodeError,
    },
}

impl FetchError {
    pub fn partition(&self) -> PartitionId {
        match self {
            FetchError::Fatal { partition, .. }
            | FetchError::StoreBusy { partition, .. }
            | FetchError::Decode { partition, .. } => *partition,
        }
    }
}

/// Reads single row groups, retrying while the store reports pending metadata.
///
/// Retries happen back to back with a cooperative yield in between; other
/// failures surface on the first attempt.
#[derive(Clone)]
pub struct PartialReadClient {
    source: Arc<dyn RowGroupSource>,
    max_attempts: u32,
    metrics: SharedMetrics,
}

impl std::fmt::Debug for PartialReadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialReadClient")
            .field("source", &self.source.name())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl PartialReadClient {
    pub fn new(source: Arc<dyn RowGroupSource>, metrics: SharedMetrics) -> Self {
        Self {
            source,
            max_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            metrics,
        }
    }

    /// Caps the number of reads per partition; values below one are raised to one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn read_partition(
        &self,
        store_path: &str,
        metadata_url: &str,
        partition: PartitionId,
    ) -> Result<Bytes, FetchError> {
        for attempt in 1..=self.max_attempts {
            self.metrics.inc(Counter::PartitionReads);
            let request = RowGroupRequest {
                store_path: store_path.to_string(),
                metadata_url: metadata_url.to_string(),
                partition,
            };

            match self.source.read_row_group(request).await {
                Ok(bytes) => {
                    self.metrics.record(Series::ReadAttempts, attempt as i64);
                    self.metrics.record(Series::PartitionBytes, bytes.len() as i64);
                    debug!(%partition, attempt, bytes = bytes.len(), "row group read");
                    return Ok(bytes);
                }
                Err(err) if err.is_pending() => {
                    debug!(%partition, attempt, "metadata pending, retrying");
                    if attempt < self.max_attempts {
                        self.metrics.inc(Counter::ReadRetries);
                        tokio::task::yield_now().await;
                    }
                }
                Err(source) => {
                    self.metrics.inc(Counter::FetchFailures);
                    warn!(%partition, attempt, error = %source, "row group read failed");
                    return Err(FetchError::Fatal { partition, source });
                }
            }
        }

        self.metrics.inc(Counter::FetchFailures);
        warn!(%partition, attempts = self.max_attempts, "store busy, giving up");
        Err(FetchError::StoreBusy {
            partition,
            attempts: self.max_attempts,
        })
    }

    /// Reads and decodes one partition.
    pub async fn fetch_partition(
        &self,
        store_path: &str,
        metadata_url: &str,
        partition: PartitionId,
    ) -> Result<Partition, FetchError> {
        let bytes = self
            .read_partition(store_path, metadata_url, partition)
            .await?;
        Partition::decode(partition, bytes).map_err(|source| {
            self.metrics.inc(Counter::FetchFailures);
            FetchError::Decode { partition, source }
        })
    }
}
