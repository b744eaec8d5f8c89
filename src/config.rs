use crate::error::{GatewayError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub data_source: DataSourceConfig,
    pub object_store: ObjectStoreConfig,
    pub warehouse: WarehouseConfig,
    pub pipeline: PipelineConfig,
    pub pollutants: Vec<Pollutant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Root for the payload CAS and the ingest log.
    pub data_root: PathBuf,
    pub fast_workers: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            fast_workers: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    pub base_url: String,
    pub last_n_days: u32,
    pub initial_delay_secs: u64,
    pub max_attempts: u32,
    pub poll_interval_secs: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.geodair.fr/api-ext".to_string(),
            last_n_days: 3,
            initial_delay_secs: 5,
            max_attempts: 5,
            poll_interval_secs: 2,
        }
    }
}

impl DataSourceConfig {
    pub fn polling(&self) -> Polling {
        Polling {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            max_attempts: self.max_attempts,
            interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

/// How long to wait for an export file to become downloadable.
#[derive(Debug, Clone, Copy)]
pub struct Polling {
    pub initial_delay: Duration,
    pub max_attempts: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub root: PathBuf,
    pub bucket: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/object_store"),
            bucket: "raw".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub root: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/warehouse"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pollutants processed at once by the fast variant.
    pub max_workers: usize,
    /// Raw files read at once per pollutant by the fast variant.
    pub file_workers: usize,
    pub batch_size: usize,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            file_workers: 2,
            batch_size: 100,
            retries: 1,
            retry_delay_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Pollutant {
    pub code: String,
    pub short_name: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = std::env::var("DATALAKE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.gateway.fast_workers == 0 {
            return Err(GatewayError::Config("gateway.fast_workers must be > 0".into()));
        }
        if self.pipeline.max_workers == 0 || self.pipeline.file_workers == 0 {
            return Err(GatewayError::Config(
                "pipeline.max_workers and pipeline.file_workers must be > 0".into(),
            ));
        }
        if self.pipeline.batch_size == 0 {
            return Err(GatewayError::Config("pipeline.batch_size must be > 0".into()));
        }
        Ok(())
    }

    /// API key for the export API, read from the environment only.
    pub fn api_key() -> Result<String> {
        std::env::var("GEODAIR_API_KEY")
            .map_err(|_| GatewayError::Config("GEODAIR_API_KEY is not set in the environment.".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.object_store.bucket, "raw");
        assert_eq!(config.pipeline.batch_size, 100);
        assert!(config.pollutants.is_empty());
    }

    #[test]
    fn parses_pollutants_and_overrides() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [pipeline]
            max_workers = 8

            [[pollutants]]
            code = "03"
            short_name = "NO2"

            [[pollutants]]
            code = "24"
            short_name = "PM10"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.pipeline.max_workers, 8);
        assert_eq!(config.pipeline.file_workers, 2);
        assert_eq!(config.pollutants.len(), 2);
        assert_eq!(config.pollutants[1].short_name, "PM10");
    }

    #[test]
    fn rejects_zero_workers() {
        let err = Config::from_toml("[pipeline]\nmax_workers = 0\n").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load_from("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
