// Data-lake pipeline: raw exports -> staging tables -> curated tables

pub mod columns;
pub mod curated;
pub mod object_store;
pub mod raw;
pub mod runner;
pub mod staging;
pub mod table;
pub mod table_store;

use crate::config::{Config, PipelineConfig, Polling, Pollutant};
use crate::error::Result;
use object_store::{FsObjectStore, ObjectStore};
use raw::{ExportApi, GeodairClient};
use std::sync::Arc;
use std::time::Duration;
use table_store::{FsTableStore, TableStore};
use tracing::warn;

pub use runner::{run_pipeline, PipelineReport, RetryPolicy, Stage, TaskOutcome, TaskReport, Variant};

/// Where the pipeline reads and writes: the raw bucket and the warehouse.
#[derive(Clone)]
pub struct Stores {
    pub objects: Arc<dyn ObjectStore>,
    pub tables: Arc<dyn TableStore>,
    pub bucket: String,
}

pub struct Pipeline {
    pub stores: Stores,
    /// `None` when no API key is configured; only the raw stage needs it.
    pub api: Option<Arc<dyn ExportApi>>,
    pub pollutants: Vec<Pollutant>,
    pub settings: PipelineConfig,
    pub polling: Polling,
    pub last_n_days: u32,
}

impl Pipeline {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api: Option<Arc<dyn ExportApi>> = match Config::api_key() {
            Ok(key) => Some(Arc::new(GeodairClient::new(&config.data_source.base_url, key))),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };
        if config.pollutants.is_empty() {
            warn!("no pollutants configured");
        }

        Ok(Self {
            stores: Stores {
                objects: Arc::new(FsObjectStore::new(&config.object_store.root)),
                tables: Arc::new(FsTableStore::new(&config.warehouse.root)),
                bucket: config.object_store.bucket.clone(),
            },
            api,
            pollutants: config.pollutants.clone(),
            settings: config.pipeline.clone(),
            polling: config.data_source.polling(),
            last_n_days: config.data_source.last_n_days,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.settings.retries,
            delay: Duration::from_secs(self.settings.retry_delay_secs),
        }
    }

    pub async fn run(&self, variant: Variant, stages: &[Stage]) -> PipelineReport {
        run_pipeline(self, variant, stages, self.retry_policy()).await
    }
}
