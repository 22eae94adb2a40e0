//! Startup settings: an optional JSON file plus `HEXVIEW_*` overrides.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use analytics::config::{ConfigError, EngineConfig};

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    /// Root for local row-group reads when no metadata service is configured.
    pub data_root: Option<PathBuf>,
    pub engine: EngineConfig,
}

#[derive(Debug)]
pub enum SettingsError {
    Config(ConfigError),
    Addr(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Config(e) => write!(f, "{e}"),
            SettingsError::Addr(a) => write!(f, "invalid HEXVIEW_ADDR: {a}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<ConfigError> for SettingsError {
    fn from(e: ConfigError) -> Self {
        SettingsError::Config(e)
    }
}

pub fn load() -> Result<ServerSettings, SettingsError> {
    let mut engine = match env::var("HEXVIEW_CONFIG") {
        Ok(path) => EngineConfig::from_json_file(path)?,
        Err(_) => EngineConfig::default(),
    };
    apply_env_overrides(&mut engine);
    engine.validate()?;

    let addr = env::var("HEXVIEW_ADDR").unwrap_or_else(|_| "127.0.0.1:9200".to_string());
    let addr: SocketAddr = addr.parse().map_err(|_| SettingsError::Addr(addr))?;

    Ok(ServerSettings {
        addr,
        data_root: env::var("HEXVIEW_DATA_ROOT").ok().map(PathBuf::from),
        engine,
    })
}

pub fn apply_env_overrides(config: &mut EngineConfig) {
    env_var_string("HEXVIEW_STORE_PATH", &mut config.store_path);
    env_var_string("HEXVIEW_METADATA_URL", &mut config.metadata_url);
    env_var_string("HEXVIEW_INDEX_PATH", &mut config.index_path);
    env_var_string("HEXVIEW_CELL_COLUMN", &mut config.cell_column);
    env_var_string("HEXVIEW_VALUE_COLUMN", &mut config.value_column);
    env_var_string("HEXVIEW_TABLE_NAME", &mut config.table_name);
    env_var_string("HEXVIEW_CHANNEL", &mut config.channel);
    env_var_string("HEXVIEW_COMPONENT_ID", &mut config.component_id);
    config.coarse_resolution = env_var_u8("HEXVIEW_COARSE_RESOLUTION", config.coarse_resolution);
    config.k_ring = env_var_u32("HEXVIEW_K_RING", config.k_ring);
    config.min_zoom = env_var_f64("HEXVIEW_MIN_ZOOM", config.min_zoom);
    config.max_fetch_attempts = env_var_u32("HEXVIEW_MAX_FETCH_ATTEMPTS", config.max_fetch_attempts);
    config.max_result_rows = env_var_usize("HEXVIEW_MAX_RESULT_ROWS", config.max_result_rows);
}

fn env_var_string(key: &str, slot: &mut String) {
    if let Ok(v) = env::var(key) {
        if !v.trim().is_empty() {
            *slot = v;
        }
    }
}

fn env_var_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
