use std::sync::Arc;

use runtime::generation::GenerationClock;
use runtime::metrics::SharedMetrics;
use spatial::codec::{CellCodec, H3Codec};
use spatial::index::SpatialIndex;
use streaming::broadcast::Broadcaster;
use streaming::cache::PartitionCache;
use streaming::client::PartialReadClient;
use streaming::source::RowGroupSource;

use crate::aggregate::ResolutionLadder;
use crate::config::{ConfigError, EngineConfig};

/// Long-lived engine state, built once at startup and shared by reference.
#[derive(Debug)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub codec: Arc<dyn CellCodec>,
    pub index: Arc<SpatialIndex>,
    pub cache: Arc<PartitionCache>,
    pub client: PartialReadClient,
    pub ladder: ResolutionLadder,
    pub broadcaster: Broadcaster,
    pub clock: Arc<GenerationClock>,
    pub metrics: SharedMetrics,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        index: SpatialIndex,
        source: Arc<dyn RowGroupSource>,
    ) -> Result<Self, ConfigError> {
        Self::with_codec(config, index, source, Arc::new(H3Codec::new()))
    }

    pub fn with_codec(
        config: EngineConfig,
        index: SpatialIndex,
        source: Arc<dyn RowGroupSource>,
        codec: Arc<dyn CellCodec>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let max = codec.max_resolution();
        let finest = config
            .zoom_ladder
            .iter()
            .map(|step| step.resolution)
            .chain([config.coarse_resolution])
            .max()
            .unwrap_or(config.coarse_resolution);
        if finest > max {
            return Err(ConfigError::CodecResolution {
                resolution: finest,
                max,
            });
        }
        let metrics = SharedMetrics::new();
        let client = PartialReadClient::new(source, metrics.clone())
            .with_max_attempts(config.max_fetch_attempts);
        let broadcaster = Broadcaster::new(
            config.channel.clone(),
            config.component_id.clone(),
            config.sink_capacity,
            metrics.clone(),
        );
        Ok(Self {
            ladder: ResolutionLadder::new(config.zoom_ladder.clone())?,
            codec,
            index: Arc::new(index),
            cache: Arc::new(PartitionCache::new(metrics.clone())),
            client,
            broadcaster,
            clock: Arc::new(GenerationClock::new()),
            metrics,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::EngineContext;
    use crate::config::{ConfigError, EngineConfig};
    use foundation::viewport::LngLat;
    use spatial::cell::CellId;
    use spatial::codec::{CellCodec, CodecError, H3Codec};
    use spatial::index::SpatialIndex;
    use std::sync::Arc;
    use streaming::source::MemoryRowGroupSource;

    /// H3 with a coarser ceiling.
    #[derive(Debug)]
    struct ShallowCodec(H3Codec);

    impl CellCodec for ShallowCodec {
        fn cell_at(&self, point: LngLat, resolution: u8) -> Result<CellId, CodecError> {
            self.0.cell_at(point, resolution)
        }
        fn resolution(&self, cell: CellId) -> Result<u8, CodecError> {
            self.0.resolution(cell)
        }
        fn parent(&self, cell: CellId, resolution: u8) -> Result<CellId, CodecError> {
            self.0.parent(cell, resolution)
        }
        fn k_ring(&self, cell: CellId, k: u32) -> Result<Vec<CellId>, CodecError> {
            self.0.k_ring(cell, k)
        }
        fn center(&self, cell: CellId) -> Result<LngLat, CodecError> {
            self.0.center(cell)
        }
        fn boundary(&self, cell: CellId) -> Result<Vec<LngLat>, CodecError> {
            self.0.boundary(cell)
        }
        fn edge_length_km(&self, resolution: u8) -> Result<f64, CodecError> {
            self.0.edge_length_km(resolution)
        }
        fn max_resolution(&self) -> u8 {
            6
        }
    }

    #[test]
    fn ladder_finer_than_codec_is_rejected() {
        let source = Arc::new(MemoryRowGroupSource::new());
        let err = EngineContext::with_codec(
            EngineConfig::default(),
            SpatialIndex::new(),
            source.clone(),
            Arc::new(ShallowCodec(H3Codec::new())),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CodecResolution {
                resolution: 9,
                max: 6
            }
        ));

        assert!(EngineContext::new(EngineConfig::default(), SpatialIndex::new(), source).is_ok());
    }
}
