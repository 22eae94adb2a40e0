use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sql::is_plain_identifier;

/// Finest resolution of the cell system.
pub const MAX_RESOLUTION: u8 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config {path:?} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("resolution {0} is outside 0..={MAX_RESOLUTION}")]
    Resolution(u8),
    #[error("zoom ladder must have at least one step")]
    EmptyLadder,
    #[error("zoom ladder is not increasing at step {index}")]
    LadderOrder { index: usize },
    #[error("max_fetch_attempts must be at least 1")]
    ZeroAttempts,
    #[error("k_ring must be at least 1 for the viewport cover to be complete")]
    ZeroRing,
    #[error("resolution {resolution} is finer than the cell codec supports ({max})")]
    CodecResolution { resolution: u8, max: u8 },
    #[error("min_zoom must be finite")]
    MinZoom,
    #[error("`{value}` is not a valid {what}")]
    Identifier { what: &'static str, value: String },
}

/// Zoom at which a finer aggregation resolution takes over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomStep {
    pub min_zoom: f64,
    pub resolution: u8,
}

impl ZoomStep {
    pub const fn new(min_zoom: f64, resolution: u8) -> Self {
        Self {
            min_zoom,
            resolution,
        }
    }
}

/// Everything a session needs to know about the dataset and its tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Object path handed to the metadata service (or a local file path).
    pub store_path: String,
    pub metadata_url: String,
    pub index_path: String,
    /// Resolution of the cells stored in the index.
    pub coarse_resolution: u8,
    pub k_ring: u32,
    /// Below this zoom no data is loaded.
    pub min_zoom: f64,
    pub max_fetch_attempts: u32,
    pub cell_column: String,
    pub value_column: String,
    pub table_name: String,
    pub zoom_ladder: Vec<ZoomStep>,
    pub channel: String,
    pub component_id: String,
    pub sink_capacity: usize,
    /// Cap on query rows carried in one `data` envelope.
    pub max_result_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: "data.parquet".to_string(),
            metadata_url: String::new(),
            index_path: "index.parquet".to_string(),
            coarse_resolution: 3,
            k_ring: 1,
            min_zoom: 4.2,
            max_fetch_attempts: 5,
            cell_column: "hex".to_string(),
            value_column: "value".to_string(),
            table_name: "spatial_data".to_string(),
            zoom_ladder: vec![
                ZoomStep::new(0.0, 4),
                ZoomStep::new(6.0, 5),
                ZoomStep::new(7.5, 6),
                ZoomStep::new(9.0, 7),
                ZoomStep::new(10.5, 8),
                ZoomStep::new(12.0, 9),
            ],
            channel: "hexview".to_string(),
            component_id: "hexview-engine".to_string(),
            sink_capacity: 256,
            max_result_rows: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coarse_resolution > MAX_RESOLUTION {
            return Err(ConfigError::Resolution(self.coarse_resolution));
        }
        if self.max_fetch_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.k_ring == 0 {
            return Err(ConfigError::ZeroRing);
        }
        if !self.min_zoom.is_finite() {
            return Err(ConfigError::MinZoom);
        }
        if self.zoom_ladder.is_empty() {
            return Err(ConfigError::EmptyLadder);
        }
        for (index, step) in self.zoom_ladder.iter().enumerate() {
            if step.resolution > MAX_RESOLUTION {
                return Err(ConfigError::Resolution(step.resolution));
            }
            if !step.min_zoom.is_finite() {
                return Err(ConfigError::LadderOrder { index });
            }
            if let Some(prev) = index.checked_sub(1).map(|i| self.zoom_ladder[i]) {
                if step.min_zoom <= prev.min_zoom || step.resolution < prev.resolution {
                    return Err(ConfigError::LadderOrder { index });
                }
            }
        }
        for (what, value) in [
            ("table name", &self.table_name),
            ("cell column", &self.cell_column),
        ] {
            if !is_plain_identifier(value) {
                return Err(ConfigError::Identifier {
                    what,
                    value: value.clone(),
                });
            }
        }
        if self.value_column.trim().is_empty() {
            return Err(ConfigError::Identifier {
                what: "value column",
                value: self.value_column.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, ZoomStep};
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_fetch_attempts, 5);
        assert_eq!(config.k_ring, 1);
        assert_eq!(config.table_name, "spatial_data");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"min_zoom": 5.0, "k_ring": 2}"#).unwrap();
        assert_eq!(config.min_zoom, 5.0);
        assert_eq!(config.k_ring, 2);
        assert_eq!(config.coarse_resolution, 3);
    }

    #[test]
    fn rejects_unordered_ladder() {
        let config = EngineConfig {
            zoom_ladder: vec![ZoomStep::new(5.0, 5), ZoomStep::new(4.0, 6)],
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LadderOrder { index: 1 })
        ));
    }

    #[test]
    fn rejects_zero_attempts_and_bad_table() {
        let config = EngineConfig {
            max_fetch_attempts: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroAttempts)));

        let config = EngineConfig {
            table_name: "data; drop".into(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Identifier { .. })
        ));
    }

    #[test]
    fn rejects_zero_ring_radius() {
        let config = EngineConfig {
            k_ring: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroRing)));
    }

    #[test]
    fn loads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hexview.json");
        std::fs::write(&path, r#"{"store_path": "s3://bucket/data.parquet"}"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.store_path, "s3://bucket/data.parquet");

        let err = EngineConfig::from_json_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
