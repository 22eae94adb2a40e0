//! Shared fixtures: a few rows around London and Sydney split over two
//! partitions, an index over them, and an engine context reading from memory.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use foundation::ids::PartitionId;
use foundation::viewport::{LngLat, Viewport};
use spatial::codec::{CellCodec, H3Codec};
use spatial::index::{SpatialIndex, SpatialIndexEntry};
use streaming::partition::encode_parquet;
use streaming::source::MemoryRowGroupSource;

use crate::config::EngineConfig;
use crate::context::EngineContext;

pub const ROW_RESOLUTION: u8 = 9;

pub fn data_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("hex", DataType::UInt64, false),
        Field::new("value", DataType::Float64, true),
        Field::new("kind", DataType::Utf8, true),
    ]))
}

fn anchor(lng: f64, lat: f64) -> LngLat {
    let codec = H3Codec::new();
    let cell = codec.cell_at(LngLat::new(lng, lat), 4).unwrap();
    codec.center(cell).unwrap()
}

/// Points close to the centre of one resolution-4 cell over London.
pub fn london_points() -> Vec<LngLat> {
    let c = anchor(-0.12, 51.5);
    vec![
        LngLat::new(c.lng, c.lat),
        LngLat::new(c.lng + 0.01, c.lat + 0.005),
        LngLat::new(c.lng - 0.01, c.lat - 0.005),
    ]
}

pub fn sydney_point() -> LngLat {
    anchor(151.2, -33.86)
}

pub fn london_viewport() -> Viewport {
    let c = london_points()[0];
    Viewport::new(c.lng - 0.1, c.lat - 0.1, c.lng + 0.1, c.lat + 0.1, 8.0)
}

fn batch(points: &[LngLat], values: Vec<Option<f64>>, kinds: Vec<Option<&str>>) -> RecordBatch {
    let codec = H3Codec::new();
    let cells: Vec<u64> = points
        .iter()
        .map(|p| codec.cell_at(*p, ROW_RESOLUTION).unwrap().raw())
        .collect();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(cells)),
        Arc::new(Float64Array::from(values)),
        Arc::new(StringArray::from(kinds)),
    ];
    RecordBatch::try_new(data_schema(), columns).unwrap()
}

/// London rows: values 1, 3 and null.
pub fn london_batch() -> RecordBatch {
    batch(
        &london_points(),
        vec![Some(1.0), Some(3.0), None],
        vec![Some("a"), Some("b"), Some("a")],
    )
}

fn sydney_batch(value: f64) -> RecordBatch {
    batch(&[sydney_point()], vec![Some(value)], vec![Some("c")])
}

/// Partition 1 holds London plus one Sydney row; partition 2 holds Sydney only.
pub fn fixture_source() -> Arc<MemoryRowGroupSource> {
    let source = MemoryRowGroupSource::new();
    source.insert(
        PartitionId(1),
        encode_parquet(data_schema(), &[london_batch(), sydney_batch(100.0)]).unwrap(),
    );
    source.insert(
        PartitionId(2),
        encode_parquet(data_schema(), &[sydney_batch(50.0)]).unwrap(),
    );
    Arc::new(source)
}

pub fn fixture_index(coarse_resolution: u8) -> SpatialIndex {
    let codec = H3Codec::new();
    let coarse = |p: LngLat| {
        let cell = codec.cell_at(p, ROW_RESOLUTION).unwrap();
        codec.parent(cell, coarse_resolution).unwrap()
    };
    let london = coarse(london_points()[0]);
    let sydney = coarse(sydney_point());
    SpatialIndex::from_entries([
        SpatialIndexEntry {
            coarse_cell: london,
            partition_id: PartitionId(1),
        },
        SpatialIndexEntry {
            coarse_cell: sydney,
            partition_id: PartitionId(1),
        },
        SpatialIndexEntry {
            coarse_cell: sydney,
            partition_id: PartitionId(2),
        },
    ])
}

pub fn fixture_context(config: EngineConfig) -> (Arc<EngineContext>, Arc<MemoryRowGroupSource>) {
    let source = fixture_source();
    let index = fixture_index(config.coarse_resolution);
    let ctx = EngineContext::new(config, index, source.clone()).unwrap();
    (Arc::new(ctx), source)
}
