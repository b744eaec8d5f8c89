//! Ingestion handlers behind the HTTP routes.
//!
//! Two paths exist: uploaded CSV files (multipart) and inline blobs (JSON).
//! Both render a result for the client and stage accepted payloads through
//! the [`Gateway`].

pub mod csv_table;
pub mod dispatch;

use crate::constants::{
    BLOBS_RECEIVED, BLOB_SOURCE, CSV_PROCESSED, CSV_UPLOAD_SOURCE, INVALID_FILE_FORMAT,
    NO_BLOB_DATA, NO_FILES,
};
use crate::error::{GatewayError, Result};
use crate::gateway::envelope::Staged;
use crate::gateway::{build_submission, Gateway};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub use dispatch::IngestPath;

const CSV_MIME: &str = "text/csv";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Bytes,
}

/// How much work an ingest request may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sequential,
    Concurrent { workers: usize },
}

impl Mode {
    /// Blocking tasks allowed in flight. Sequential work still leaves the
    /// async workers and runs on the blocking pool, in input order.
    fn workers(self) -> usize {
        match self {
            Mode::Sequential => 1,
            Mode::Concurrent { workers } => workers,
        }
    }
}

/// Result for one uploaded file: the parsed table or an error message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FileOutcome {
    Parsed(Value),
    Failed { error: String },
}

impl FileOutcome {
    pub fn is_parsed(&self) -> bool {
        matches!(self, FileOutcome::Parsed(_))
    }
}

#[derive(Debug, Serialize)]
pub struct CsvResponse {
    pub message: String,
    pub data: Map<String, Value>,
    pub staged: Vec<Staged>,
}

#[derive(Debug, Serialize)]
pub struct BlobResponse {
    pub message: String,
    pub data: Map<String, Value>,
    pub staged: Vec<Staged>,
}

pub fn process_upload(file: &UploadedFile) -> FileOutcome {
    if !file.file_name.ends_with(".csv") {
        crate::metrics::gateway::file_rejected();
        return FileOutcome::Failed {
            error: INVALID_FILE_FORMAT.to_string(),
        };
    }
    match csv_table::parse_csv_table(&file.bytes) {
        Ok(table) => {
            crate::metrics::gateway::file_parsed();
            FileOutcome::Parsed(table)
        }
        Err(error) => {
            crate::metrics::gateway::file_rejected();
            debug!(file = %file.file_name, "csv parse failed: {}", error);
            FileOutcome::Failed { error }
        }
    }
}

/// Parse and stage one file. Only files that parsed are staged.
fn handle_file(gateway: &Gateway, file: &UploadedFile) -> Result<(FileOutcome, Option<Staged>)> {
    let outcome = process_upload(file);
    if !outcome.is_parsed() {
        return Ok((outcome, None));
    }
    let env = build_submission(CSV_UPLOAD_SOURCE, &file.file_name, CSV_MIME, &file.bytes);
    let stamped = gateway.accept(env, &file.bytes)?;
    Ok((outcome, Some(Staged::from(&stamped))))
}

/// Run `work` over `items` on the blocking pool, at most `workers` at a
/// time, and return the results in input order.
async fn run_bounded<T, R, F>(items: Vec<T>, workers: usize, work: F) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Result<R> + Send + Sync + 'static,
{
    if workers <= 1 {
        // one blocking task walking the items in order
        return tokio::task::spawn_blocking(move || items.into_iter().map(work).collect()).await?;
    }
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let work = Arc::new(work);
    let mut set = JoinSet::new();
    let total = items.len();

    for (idx, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let work = Arc::clone(&work);
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| GatewayError::Storage(e.to_string()))?;
            let out = tokio::task::spawn_blocking(move || (*work)(item)).await??;
            Ok::<_, GatewayError>((idx, out))
        });
    }

    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (idx, out) = joined??;
        slots[idx] = Some(out);
    }
    Ok(slots.into_iter().flatten().collect())
}

/// CSV path: parse every uploaded file, stage the ones that parsed.
pub async fn ingest_files(
    gateway: &Arc<Gateway>,
    files: Vec<UploadedFile>,
    mode: Mode,
) -> Result<CsvResponse> {
    if files.is_empty() {
        return Err(GatewayError::BadRequest(NO_FILES.to_string()));
    }
    let names: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();

    let gw = Arc::clone(gateway);
    let results = run_bounded(files, mode.workers(), move |file| handle_file(&gw, &file)).await?;

    let mut data = Map::new();
    let mut staged = Vec::new();
    for (name, (outcome, stamped)) in names.into_iter().zip(results) {
        // Same file name twice: the later upload wins
        data.insert(name, serde_json::to_value(&outcome)?);
        staged.extend(stamped);
    }

    Ok(CsvResponse {
        message: CSV_PROCESSED.to_string(),
        data,
        staged,
    })
}

/// Blob path: echo every blob back, stage the string ones as CSV payloads.
pub async fn ingest_blobs(gateway: &Arc<Gateway>, body: Bytes, mode: Mode) -> Result<BlobResponse> {
    if body.is_empty() {
        return Err(GatewayError::BadRequest(NO_BLOB_DATA.to_string()));
    }
    let mut request = match serde_json::from_slice::<Value>(&body)? {
        Value::Object(map) => map,
        other => {
            return Err(GatewayError::BadRequest(format!(
                "Request body must be a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };
    let blobs = match request.remove("blobs") {
        None => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(GatewayError::BadRequest(format!(
                "'blobs' must be a JSON array, got {}",
                json_kind(&other)
            )))
        }
    };
    crate::metrics::gateway::blobs_received(blobs.len());

    let named: Vec<(String, Value)> = blobs
        .into_iter()
        .enumerate()
        .map(|(i, blob)| (format!("blob_{}", i), blob))
        .collect();

    let to_stage: Vec<(String, Bytes)> = named
        .iter()
        .filter_map(|(name, blob)| match blob {
            Value::String(s) => Some((name.clone(), Bytes::from(s.clone()))),
            _ => None,
        })
        .collect();
    if to_stage.len() < named.len() {
        warn!(
            skipped = named.len() - to_stage.len(),
            "non-string blobs are echoed but not staged"
        );
    }

    let gw = Arc::clone(gateway);
    let stage_one = move |(name, bytes): (String, Bytes)| {
        let env = build_submission(BLOB_SOURCE, &name, CSV_MIME, &bytes);
        gw.accept(env, &bytes).map(|s| Staged::from(&s))
    };
    let staged = run_bounded(to_stage, mode.workers(), stage_one).await?;

    Ok(BlobResponse {
        message: BLOBS_RECEIVED.to_string(),
        data: named.into_iter().collect(),
        staged,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn file(name: &str, body: &'static [u8]) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            bytes: Bytes::from_static(body),
        }
    }

    fn gateway() -> (tempfile::TempDir, Arc<Gateway>) {
        let dir = tempdir().unwrap();
        let gw = Arc::new(Gateway::open(dir.path()).unwrap());
        (dir, gw)
    }

    #[test]
    fn wrong_extension_is_invalid_format() {
        let outcome = process_upload(&file("notes.txt", b"a,b\n1,2\n"));
        assert_eq!(
            serde_json::to_value(outcome).unwrap(),
            json!({"error": "Invalid file format"})
        );
    }

    #[tokio::test]
    async fn no_files_is_a_bad_request() {
        let (_dir, gw) = gateway();
        let err = ingest_files(&gw, Vec::new(), Mode::Sequential).await.unwrap_err();
        assert_eq!(err.to_string(), NO_FILES);
    }

    #[tokio::test]
    async fn mixed_batch_reports_per_file() {
        let (_dir, gw) = gateway();
        let files = vec![
            file("ok.csv", b"a,b\n1,2\n"),
            file("bad.txt", b"a,b\n1,2\n"),
            file("empty.csv", b""),
        ];
        let resp = ingest_files(&gw, files, Mode::Sequential).await.unwrap();
        assert_eq!(resp.message, CSV_PROCESSED);
        assert_eq!(resp.data["ok.csv"], json!({"a": {"0": 1}, "b": {"0": 2}}));
        assert_eq!(resp.data["bad.txt"], json!({"error": "Invalid file format"}));
        assert_eq!(resp.data["empty.csv"], json!({"error": "No columns to parse from file"}));
        assert_eq!(resp.staged.len(), 1);
        assert_eq!(resp.staged[0].name, "ok.csv");
    }

    #[tokio::test]
    async fn concurrent_mode_matches_sequential() {
        let batch = || {
            (0..10)
                .map(|i| UploadedFile {
                    file_name: format!("f{}.csv", i),
                    bytes: Bytes::from(format!("id,v\n{},{}.5\n", i, i)),
                })
                .collect::<Vec<_>>()
        };
        let (_d1, seq_gw) = gateway();
        let (_d2, par_gw) = gateway();
        let seq = ingest_files(&seq_gw, batch(), Mode::Sequential).await.unwrap();
        let par = ingest_files(&par_gw, batch(), Mode::Concurrent { workers: 3 })
            .await
            .unwrap();
        assert_eq!(seq.data, par.data);
        let names = |r: &CsvResponse| r.staged.iter().map(|s| s.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&seq), names(&par));
    }

    #[tokio::test]
    async fn duplicate_names_keep_last_upload() {
        let (_dir, gw) = gateway();
        let files = vec![file("same.csv", b"a\n1\n"), file("same.csv", b"a\n2\n")];
        let resp = ingest_files(&gw, files, Mode::Sequential).await.unwrap();
        assert_eq!(resp.data.len(), 1);
        assert_eq!(resp.data["same.csv"], json!({"a": {"0": 2}}));
        assert_eq!(resp.staged.len(), 2);
    }

    #[tokio::test]
    async fn blobs_are_indexed_and_strings_staged() {
        let (_dir, gw) = gateway();
        let body = Bytes::from(json!({"blobs": ["a,b\n1,2\n", {"k": 1}]}).to_string());
        let resp = ingest_blobs(&gw, body, Mode::Sequential).await.unwrap();
        assert_eq!(resp.message, BLOBS_RECEIVED);
        assert_eq!(resp.data["blob_0"], json!("a,b\n1,2\n"));
        assert_eq!(resp.data["blob_1"], json!({"k": 1}));
        assert_eq!(resp.staged.len(), 1);
        assert_eq!(resp.staged[0].name, "blob_0");
    }

    #[tokio::test]
    async fn missing_blobs_key_yields_empty_data() {
        let (_dir, gw) = gateway();
        let resp = ingest_blobs(&gw, Bytes::from_static(b"{}"), Mode::Sequential)
            .await
            .unwrap();
        assert!(resp.data.is_empty());
        assert!(resp.staged.is_empty());
    }

    #[tokio::test]
    async fn blob_errors() {
        let (_dir, gw) = gateway();
        let empty = ingest_blobs(&gw, Bytes::new(), Mode::Sequential).await.unwrap_err();
        assert_eq!(empty.to_string(), NO_BLOB_DATA);

        let not_json = ingest_blobs(&gw, Bytes::from_static(b"a,b"), Mode::Sequential)
            .await
            .unwrap_err();
        assert_eq!(not_json.status(), axum::http::StatusCode::BAD_REQUEST);

        let not_array = ingest_blobs(&gw, Bytes::from_static(b"{\"blobs\": \"x\"}"), Mode::Sequential)
            .await
            .unwrap_err();
        assert!(not_array.to_string().contains("must be a JSON array"));

        let null_blobs = ingest_blobs(&gw, Bytes::from_static(b"{\"blobs\": null}"), Mode::Sequential)
            .await
            .unwrap_err();
        assert!(null_blobs.to_string().contains("got null"));
    }

    #[tokio::test]
    async fn top_level_array_is_rejected_and_nothing_staged() {
        let (_dir, gw) = gateway();
        for body in [&b"[]"[..], &b"[[\"a,b\\n1,2\\n\"]]"[..], &b"\"a,b\""[..]] {
            let err = ingest_blobs(&gw, Bytes::from_static(body), Mode::Sequential)
                .await
                .unwrap_err();
            assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
            assert!(err.to_string().contains("must be a JSON object"));
        }
        assert!(gw.envelopes().unwrap().is_empty());
    }
}
