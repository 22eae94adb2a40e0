use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use foundation::ids::{Generation, PartitionId};
use foundation::viewport::{Viewport, ViewportError};
use futures_util::future::try_join_all;
use runtime::metrics::Series;
use spatial::cell::CellId;
use spatial::codec::CodecError;
use spatial::column::{ColumnError, cell_ids};
use spatial::cover::covering_cells;
use streaming::client::FetchError;
use streaming::partition::Partition;
use tracing::{debug, info};

use crate::context::EngineContext;
use crate::table::LogicalTable;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("invalid viewport: {0}")]
    Viewport(#[from] ViewportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("partition {partition}: {source}")]
    Column {
        partition: PartitionId,
        #[source]
        source: ColumnError,
    },
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error("partition {partition} does not share the schema of partition {first}")]
    SchemaMismatch {
        partition: PartitionId,
        first: PartitionId,
    },
}

/// Result of resolving one viewport.
#[derive(Debug, Clone)]
pub enum ViewportTable {
    /// Zoom below the configured minimum; nothing was looked up.
    ZoomIn,
    /// The viewport holds no indexed rows.
    NoData,
    Ready(Arc<LogicalTable>),
    /// A newer cycle started while this one was fetching.
    Superseded,
}

/// Turns viewports into [`LogicalTable`]s through the index and the cache.
#[derive(Debug, Clone)]
pub struct QueryTableBuilder {
    ctx: Arc<EngineContext>,
}

impl QueryTableBuilder {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Resolves `viewport` without generation checks.
    pub async fn ensure_viewport(
        &self,
        viewport: &Viewport,
        previous: Option<&Arc<LogicalTable>>,
    ) -> Result<ViewportTable, TableError> {
        self.resolve(viewport, previous, None).await
    }

    /// Like [`Self::ensure_viewport`], but stops with
    /// [`ViewportTable::Superseded`] once `generation` is no longer current.
    /// Partitions already fetched stay cached.
    pub async fn ensure_viewport_for(
        &self,
        generation: Generation,
        viewport: &Viewport,
        previous: Option<&Arc<LogicalTable>>,
    ) -> Result<ViewportTable, TableError> {
        self.resolve(viewport, previous, Some(generation)).await
    }

    fn is_stale(&self, generation: Option<Generation>) -> bool {
        generation.is_some_and(|g| self.ctx.clock.is_stale(g))
    }

    async fn resolve(
        &self,
        viewport: &Viewport,
        previous: Option<&Arc<LogicalTable>>,
        generation: Option<Generation>,
    ) -> Result<ViewportTable, TableError> {
        viewport.validate()?;
        let config = &self.ctx.config;

        if viewport.zoom < config.min_zoom {
            debug!(zoom = viewport.zoom, min_zoom = config.min_zoom, "below minimum zoom");
            return Ok(ViewportTable::ZoomIn);
        }

        let cells = covering_cells(
            self.ctx.codec.as_ref(),
            viewport,
            config.coarse_resolution,
            config.k_ring,
        )?;
        let needed = self.ctx.index.partitions_for(&cells);
        if needed.is_empty() {
            debug!(cells = cells.len(), "no indexed partitions in viewport");
            return Ok(ViewportTable::NoData);
        }

        if let Some(prev) = previous.filter(|t| t.built_from(&needed, &cells)) {
            debug!(partitions = needed.len(), "viewport inputs unchanged, reusing table");
            return Ok(ViewportTable::Ready(prev.clone()));
        }

        let missing = needed
            .iter()
            .filter(|id| !self.ctx.cache.contains(**id))
            .count();
        debug!(
            cells = cells.len(),
            needed = needed.len(),
            missing,
            "resolved viewport partitions"
        );

        let partitions = if missing == 0 {
            needed
                .iter()
                .filter_map(|id| self.ctx.cache.get(*id))
                .collect::<Vec<_>>()
        } else {
            self.fetch_all(&needed).await?
        };

        if self.is_stale(generation) {
            return Ok(ViewportTable::Superseded);
        }

        let table = self.build(&partitions, needed, cells)?;
        self.ctx
            .metrics
            .record(Series::TableRows, table.num_rows as i64);
        if table.is_empty() {
            return Ok(ViewportTable::NoData);
        }
        info!(
            partitions = table.partitions.len(),
            rows = table.num_rows,
            "logical table rebuilt"
        );
        Ok(ViewportTable::Ready(Arc::new(table)))
    }

    async fn fetch_all(&self, needed: &BTreeSet<PartitionId>) -> Result<Vec<Arc<Partition>>, TableError> {
        let config = &self.ctx.config;
        let fetches = needed.iter().map(|&id| {
            self.ctx.cache.get_or_fetch(id, move || {
                self.ctx
                    .client
                    .fetch_partition(&config.store_path, &config.metadata_url, id)
            })
        });
        Ok(try_join_all(fetches).await?)
    }

    fn build(
        &self,
        partitions: &[Arc<Partition>],
        needed: BTreeSet<PartitionId>,
        cells: BTreeSet<CellId>,
    ) -> Result<LogicalTable, TableError> {
        let Some(first) = partitions.first() else {
            return Ok(LogicalTable::new(
                Arc::new(arrow::datatypes::Schema::empty()),
                Vec::new(),
                needed,
                cells,
            ));
        };
        let schema = first.schema.clone();
        let coarse = self.ctx.config.coarse_resolution;
        let column = self.ctx.config.cell_column.as_str();

        // Parent lookups repeat heavily across rows of the same area.
        let mut keep_cell: HashMap<CellId, bool> = HashMap::new();
        let mut batches = Vec::new();

        for partition in partitions {
            if partition.schema.fields() != schema.fields() {
                return Err(TableError::SchemaMismatch {
                    partition: partition.id,
                    first: first.id,
                });
            }
            for batch in &partition.batches {
                let array = batch.column_by_name(column).ok_or_else(|| TableError::Column {
                    partition: partition.id,
                    source: ColumnError::Missing(column.to_string()),
                })?;
                let ids = cell_ids(column, array.as_ref()).map_err(|source| TableError::Column {
                    partition: partition.id,
                    source,
                })?;

                let mask: BooleanArray = ids
                    .into_iter()
                    .map(|cell| {
                        let keep = cell.is_some_and(|cell| {
                            *keep_cell.entry(cell).or_insert_with(|| {
                                self.ctx
                                    .codec
                                    .parent(cell, coarse)
                                    .is_ok_and(|parent| cells.contains(&parent))
                            })
                        });
                        Some(keep)
                    })
                    .collect();

                let filtered = filter_record_batch(batch, &mask)?;
                if filtered.num_rows() > 0 {
                    batches.push(RecordBatch::try_new(
                        schema.clone(),
                        filtered.columns().to_vec(),
                    )?);
                }
            }
        }

        Ok(LogicalTable::new(schema, batches, needed, cells))
    }
}

#[cfg(test)]
mod tests {
    use super::{QueryTableBuilder, ViewportTable};
    use crate::config::EngineConfig;
    use crate::context::EngineContext;
    use crate::testing::{fixture_context, london_viewport};
    use foundation::ids::PartitionId;
    use foundation::viewport::Viewport;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn below_min_zoom_touches_nothing() {
        let (ctx, source) = fixture_context(EngineConfig::default());
        let builder = QueryTableBuilder::new(ctx.clone());
        let viewport = Viewport {
            zoom: 3.0,
            ..london_viewport()
        };

        let table = builder.ensure_viewport(&viewport, None).await.unwrap();
        assert!(matches!(table, ViewportTable::ZoomIn));
        assert_eq!(source.total_reads(), 0);
        assert!(ctx.cache.is_empty());
    }

    #[tokio::test]
    async fn builds_table_restricted_to_covering_cells() {
        let (ctx, source) = fixture_context(EngineConfig::default());
        let builder = QueryTableBuilder::new(ctx.clone());

        let ViewportTable::Ready(table) =
            builder.ensure_viewport(&london_viewport(), None).await.unwrap()
        else {
            panic!("expected a table");
        };
        // The Sydney row shares partition 1 but lies outside the viewport.
        assert_eq!(table.num_rows, 3);
        assert_eq!(
            table.partitions.iter().copied().collect::<Vec<_>>(),
            vec![PartitionId(1)]
        );
        assert_eq!(source.reads(PartitionId(1)), 1);
        assert_eq!(source.reads(PartitionId(2)), 0);
    }

    #[tokio::test]
    async fn unchanged_inputs_reuse_previous_table() {
        let (ctx, source) = fixture_context(EngineConfig::default());
        let builder = QueryTableBuilder::new(ctx);

        let ViewportTable::Ready(first) =
            builder.ensure_viewport(&london_viewport(), None).await.unwrap()
        else {
            panic!("expected a table");
        };
        let ViewportTable::Ready(second) = builder
            .ensure_viewport(&london_viewport(), Some(&first))
            .await
            .unwrap()
        else {
            panic!("expected a table");
        };
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.total_reads(), 1);
    }

    #[tokio::test]
    async fn viewport_outside_index_is_no_data() {
        let (ctx, source) = fixture_context(EngineConfig::default());
        let builder = QueryTableBuilder::new(ctx);
        let atlantic = Viewport::new(-40.0, 30.0, -39.0, 31.0, 8.0);

        let table = builder.ensure_viewport(&atlantic, None).await.unwrap();
        assert!(matches!(table, ViewportTable::NoData));
        assert_eq!(source.total_reads(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported() {
        let (ctx, source) = fixture_context(EngineConfig::default());
        source.fail(PartitionId(1), "denied");
        let builder = QueryTableBuilder::new(ctx.clone());

        let err = builder
            .ensure_viewport(&london_viewport(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, super::TableError::Fetch(_)));
        assert!(ctx.cache.is_empty());
    }

    #[tokio::test]
    async fn stale_generation_stops_before_building() {
        let (ctx, source) = fixture_context(EngineConfig::default());
        let builder = QueryTableBuilder::new(ctx.clone());
        let generation = ctx.clock.advance();
        ctx.clock.advance();

        let table = builder
            .ensure_viewport_for(generation, &london_viewport(), None)
            .await
            .unwrap();
        assert!(matches!(table, ViewportTable::Superseded));
        // The fetch still lands in the cache.
        assert_eq!(source.reads(PartitionId(1)), 1);
        assert!(ctx.cache.contains(PartitionId(1)));
    }

    #[test]
    fn context_rejects_invalid_config() {
        let config = EngineConfig {
            max_fetch_attempts: 0,
            ..EngineConfig::default()
        };
        let source = Arc::new(streaming::source::MemoryRowGroupSource::new());
        assert!(EngineContext::new(config, spatial::index::SpatialIndex::new(), source).is_err());
    }
}
