use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

pub use config::ConfigError as LoadConfigError;

/// Config structure with the knobs the batch job needs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub load: LoadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_lock_path")]
    pub lock_path: String,
}

/// Path handling for schedule entries written on a Windows host and consumed
/// on Linux.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default)]
    pub windows_prefix: String,
    #[serde(default)]
    pub linux_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Series type routed through the stage-and-merge path.
    #[serde(default = "default_bulk_series")]
    pub bulk_series: String,
    /// Row ceiling per staging write chunk.
    #[serde(default = "default_stage_chunk_rows")]
    pub stage_chunk_rows: usize,
    /// Schedule rows are restricted to patterns starting with this prefix.
    #[serde(default = "default_pattern_filter")]
    pub pattern_filter: String,
}

fn default_db_path() -> String {
    "gridflow.db".to_string()
}

fn default_lock_path() -> String {
    "/run/gridflow/lock".to_string()
}

fn default_bulk_series() -> String {
    "LP_METER".to_string()
}

fn default_stage_chunk_rows() -> usize {
    50_000
}

fn default_pattern_filter() -> String {
    "YYYYMMDD-900".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            lock_path: default_lock_path(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            windows_prefix: String::new(),
            linux_prefix: String::new(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            bulk_series: default_bulk_series(),
            stage_chunk_rows: default_stage_chunk_rows(),
            pattern_filter: default_pattern_filter(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = AppConfig::default();
        assert_eq!(config.store.db_path, "gridflow.db");
        assert_eq!(config.load.stage_chunk_rows, 50_000);
        assert!(config.load.pattern_filter.starts_with("YYYYMMDD"));
    }
}
