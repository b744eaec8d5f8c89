//! Raw zone: pull hourly-average exports from the GEODAIR API and land them
//! in the object store as `<code>/polluant-<code>_<date>.csv`.

use super::object_store::ObjectStore;
use crate::config::{Polling, Pollutant};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, NaiveDate};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

const EXPORT_NOT_READY: i64 = 412;
const EXPORT_RATE_LIMITED: i64 = 429;

/// The `n` days before `today`, newest first.
pub fn generate_date_range(today: NaiveDate, n: u32) -> Vec<String> {
    (1..=i64::from(n))
        .map(|i| (today - Duration::days(i)).format("%Y-%m-%d").to_string())
        .collect()
}

pub fn raw_key(pollutant_code: &str, date: &str) -> String {
    format!("{code}/polluant-{code}_{date}.csv", code = pollutant_code, date = date)
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStatus {
    Ready(Bytes),
    NotReady,
    RateLimited,
}

impl DownloadStatus {
    /// The download endpoint answers 200 in every case; a JSON body carrying
    /// a `status` field signals that the file is not there yet.
    pub fn classify(body: Bytes) -> Self {
        let status = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|v| v.get("status").and_then(Value::as_i64));
        match status {
            Some(EXPORT_NOT_READY) => DownloadStatus::NotReady,
            Some(EXPORT_RATE_LIMITED) => DownloadStatus::RateLimited,
            _ => DownloadStatus::Ready(body),
        }
    }
}

#[async_trait]
pub trait ExportApi: Send + Sync {
    /// Ask the API to generate the export for one day and pollutant.
    /// Returns the file id to download.
    async fn request_export(&self, date: &str, pollutant_code: &str) -> Result<String>;
    async fn download(&self, file_id: &str) -> Result<DownloadStatus>;
}

pub struct GeodairClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeodairClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ExportApi for GeodairClient {
    #[instrument(skip(self))]
    async fn request_export(&self, date: &str, pollutant_code: &str) -> Result<String> {
        let url = format!("{}/MoyH/export", self.base_url);
        debug!("Requesting file generation via {}", url);
        let response = self
            .client
            .get(&url)
            .query(&[("date", date), ("polluant", pollutant_code)])
            .header("apikey", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(GatewayError::Upstream {
                message: format!("export request failed: HTTP {}", status.as_u16()),
            });
        }
        let file_id = response.text().await?.trim().to_string();
        if file_id.is_empty() {
            return Err(GatewayError::Upstream {
                message: "export request returned an empty file id".into(),
            });
        }
        info!(file_id = %file_id, "received file id");
        Ok(file_id)
    }

    async fn download(&self, file_id: &str) -> Result<DownloadStatus> {
        let url = format!("{}/download", self.base_url);
        let body = self
            .client
            .get(&url)
            .query(&[("id", file_id)])
            .header("apikey", &self.api_key)
            .send()
            .await?
            .bytes()
            .await?;
        Ok(DownloadStatus::classify(body))
    }
}

/// Wait out the generation delay, then poll until the file is ready.
pub async fn fetch_with_polling(api: &dyn ExportApi, file_id: &str, polling: Polling) -> Result<Bytes> {
    debug!("waiting {:?} before the first check", polling.initial_delay);
    tokio::time::sleep(polling.initial_delay).await;

    for attempt in 1..=polling.max_attempts {
        match api.download(file_id).await? {
            DownloadStatus::Ready(bytes) => {
                info!(file_id, attempt, bytes = bytes.len(), "file ready for download");
                return Ok(bytes);
            }
            DownloadStatus::NotReady => {
                debug!(file_id, attempt, "file not ready yet");
                tokio::time::sleep(polling.interval).await;
            }
            DownloadStatus::RateLimited => {
                return Err(GatewayError::RateLimited(
                    "15 exports per hour, try again after one hour".into(),
                ));
            }
        }
    }
    Err(GatewayError::Upstream {
        message: format!(
            "file {} not ready after {} attempts",
            file_id, polling.max_attempts
        ),
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawReport {
    pub uploaded: Vec<String>,
    pub failed: usize,
}

async fn fetch_one(
    api: &dyn ExportApi,
    store: &dyn ObjectStore,
    bucket: &str,
    date: &str,
    pollutant: &Pollutant,
    polling: Polling,
) -> Result<String> {
    let file_id = api.request_export(date, &pollutant.code).await?;
    let content = fetch_with_polling(api, &file_id, polling).await?;
    let key = raw_key(&pollutant.code, date);
    store.put(bucket, &key, content).await?;
    info!(bucket, key = %key, "raw file stored");
    Ok(key)
}

/// Fetch every (date, pollutant) export into `bucket`. A failed item is
/// logged and counted; hitting the API rate limit aborts the stage.
pub async fn run_raw_stage(
    api: &dyn ExportApi,
    store: &dyn ObjectStore,
    bucket: &str,
    pollutants: &[Pollutant],
    dates: &[String],
    polling: Polling,
) -> Result<RawReport> {
    store.ensure_bucket(bucket).await?;

    let mut report = RawReport::default();
    for date in dates {
        info!(date = %date, "processing raw exports");
        for pollutant in pollutants {
            info!(
                pollutant = %pollutant.short_name,
                code = %pollutant.code,
                "processing pollutant"
            );
            match fetch_one(api, store, bucket, date, pollutant, polling).await {
                Ok(key) => {
                    crate::metrics::pipeline::raw_file_uploaded();
                    report.uploaded.push(key);
                }
                Err(e @ GatewayError::RateLimited(_)) => {
                    error!("{}", e);
                    return Err(e);
                }
                Err(e) => {
                    crate::metrics::pipeline::raw_fetch_error();
                    warn!(date = %date, code = %pollutant.code, "raw fetch failed: {}", e);
                    report.failed += 1;
                }
            }
        }
    }
    info!(
        uploaded = report.uploaded.len(),
        failed = report.failed,
        "raw stage finished"
    );
    Ok(report)
}
