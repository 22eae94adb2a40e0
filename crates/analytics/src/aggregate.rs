use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use spatial::cell::CellId;
use spatial::codec::{CellCodec, CodecError};
use spatial::column::{ColumnError, cell_ids, float_values};
use tracing::debug;

use crate::config::{ConfigError, EngineConfig, MAX_RESOLUTION, ZoomStep};
use crate::table::LogicalTable;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Zoom -> aggregation resolution step function.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionLadder {
    steps: Vec<ZoomStep>,
}

impl ResolutionLadder {
    pub fn new(steps: Vec<ZoomStep>) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::EmptyLadder);
        }
        for (index, pair) in steps.windows(2).enumerate() {
            if !(pair[1].min_zoom > pair[0].min_zoom) || pair[1].resolution < pair[0].resolution {
                return Err(ConfigError::LadderOrder { index: index + 1 });
            }
        }
        if let Some(step) = steps.iter().find(|s| s.resolution > MAX_RESOLUTION) {
            return Err(ConfigError::Resolution(step.resolution));
        }
        Ok(Self { steps })
    }

    /// Resolution of the last step whose `min_zoom` is at or below `zoom`.
    ///
    /// Zooms below the first step, and NaN, map to the coarsest step.
    pub fn resolution_for_zoom(&self, zoom: f64) -> u8 {
        self.steps
            .iter()
            .take_while(|s| zoom >= s.min_zoom)
            .last()
            .unwrap_or(&self.steps[0])
            .resolution
    }

    /// Distinct resolutions, coarse to fine.
    pub fn resolutions(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self.steps.iter().map(|s| s.resolution).collect();
        out.dedup();
        out
    }
}

/// One aggregated cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub cell: CellId,
    /// Mean of the non-null values; `None` when the cell has none.
    pub value: Option<f64>,
    pub sum: f64,
    /// Rows in the cell, null values included.
    pub count: u64,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateTable {
    pub resolution: u8,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Aggregate tables for every ladder resolution, built from one logical table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSet {
    tables: BTreeMap<u8, Arc<AggregateTable>>,
}

impl AggregateSet {
    pub fn get(&self, resolution: u8) -> Option<&Arc<AggregateTable>> {
        self.tables.get(&resolution)
    }

    pub fn resolutions(&self) -> impl Iterator<Item = u8> + '_ {
        self.tables.keys().copied()
    }
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    valued: u64,
    count: u64,
}

/// Builds per-resolution aggregates with the cell codec.
#[derive(Debug, Clone)]
pub struct Aggregator {
    codec: Arc<dyn CellCodec>,
    ladder: ResolutionLadder,
    cell_column: String,
    value_column: String,
}

impl Aggregator {
    pub fn new(
        codec: Arc<dyn CellCodec>,
        ladder: ResolutionLadder,
        cell_column: impl Into<String>,
        value_column: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            ladder,
            cell_column: cell_column.into(),
            value_column: value_column.into(),
        }
    }

    pub fn from_config(codec: Arc<dyn CellCodec>, ladder: ResolutionLadder, config: &EngineConfig) -> Self {
        Self::new(codec, ladder, &config.cell_column, &config.value_column)
    }

    /// Table for the resolution `zoom` maps to.
    pub fn table_for_zoom<'a>(&self, set: &'a AggregateSet, zoom: f64) -> Option<&'a Arc<AggregateTable>> {
        set.get(self.ladder.resolution_for_zoom(zoom))
    }

    /// Rebuilds every resolution in one pass over the table.
    ///
    /// Rows with a null or invalid cell are skipped; a missing or non-numeric
    /// value column leaves `value` empty and `sum` at zero.
    pub fn build(&self, table: &LogicalTable) -> Result<AggregateSet, AggregateError> {
        let resolutions = self.ladder.resolutions();
        let mut groups: Vec<BTreeMap<CellId, Accumulator>> =
            resolutions.iter().map(|_| BTreeMap::new()).collect();

        for batch in &table.batches {
            let cells = batch
                .column_by_name(&self.cell_column)
                .ok_or_else(|| ColumnError::Missing(self.cell_column.clone()))?;
            let cells = cell_ids(&self.cell_column, cells.as_ref())?;
            let values = match batch.column_by_name(&self.value_column) {
                Some(array) if array.data_type().is_numeric() => {
                    float_values(&self.value_column, array.as_ref())?
                }
                _ => vec![None; batch.num_rows()],
            };

            for (cell, value) in cells.into_iter().zip(values) {
                let Some(cell) = cell else { continue };
                for (resolution, group) in resolutions.iter().zip(groups.iter_mut()) {
                    let Ok(parent) = self.codec.parent(cell, *resolution) else {
                        continue;
                    };
                    let acc = group.entry(parent).or_default();
                    acc.count += 1;
                    if let Some(v) = value.filter(|v| v.is_finite()) {
                        acc.sum += v;
                        acc.valued += 1;
                    }
                }
            }
        }

        let mut tables = BTreeMap::new();
        for (resolution, group) in resolutions.into_iter().zip(groups) {
            let mut rows = Vec::with_capacity(group.len());
            for (cell, acc) in group {
                let center = self.codec.center(cell)?;
                rows.push(AggregateRow {
                    cell,
                    value: (acc.valued > 0).then(|| acc.sum / acc.valued as f64),
                    sum: acc.sum,
                    count: acc.count,
                    lat: center.lat,
                    lng: center.lng,
                });
            }
            debug!(resolution, cells = rows.len(), "aggregate table built");
            tables.insert(resolution, Arc::new(AggregateTable { resolution, rows }));
        }
        Ok(AggregateSet { tables })
    }
}

/// Outline of one cell as `[lng, lat]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellBoundary {
    pub cell: CellId,
    pub ring: Vec<[f64; 2]>,
}

/// Outlines for `cells`; invalid cells are skipped.
pub fn cell_boundaries(codec: &dyn CellCodec, cells: &[CellId]) -> Vec<CellBoundary> {
    cells
        .iter()
        .filter_map(|&cell| {
            let ring = codec.boundary(cell).ok()?;
            Some(CellBoundary {
                cell,
                ring: ring.into_iter().map(|p| [p.lng, p.lat]).collect(),
            })
        })
        .collect()
}
