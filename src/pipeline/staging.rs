//! Staging zone: concatenate each pollutant's raw CSV files into one typed
//! table keyed on `(code_site, date_de_debut)`.

use super::columns::normalize_column_name;
use super::table::{convert_value, Table};
use super::Stores;
use crate::config::Pollutant;
use crate::constants::{CODE_SITE, DATE_DE_DEBUT, STAGING_ZONE};
use crate::error::{GatewayError, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

const RAW_DELIMITER: u8 = b';';

#[derive(Debug, Clone, Copy)]
pub struct StagingOptions {
    pub batch_size: usize,
    /// Pollutants processed at once; `None` runs sequentially.
    pub max_workers: Option<usize>,
    /// Raw files fetched at once per pollutant; `None` runs sequentially.
    pub file_workers: Option<usize>,
}

impl StagingOptions {
    pub fn regular(batch_size: usize) -> Self {
        Self {
            batch_size,
            max_workers: None,
            file_workers: None,
        }
    }

    pub fn fast(batch_size: usize, max_workers: usize, file_workers: usize) -> Self {
        Self {
            batch_size,
            max_workers: Some(max_workers),
            file_workers: Some(file_workers),
        }
    }
}

/// One raw file split into its normalized header and data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFile {
    pub key: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Parse a `;`-delimited raw export. Returns `None` for an empty file.
pub fn parse_raw_file(key: &str, bytes: &[u8]) -> Result<Option<RawFile>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(RAW_DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record?
            .iter()
            .map(normalize_column_name)
            .collect::<Vec<_>>(),
        None => return Ok(None),
    };
    let rows = records
        .map(|r| r.map(|record| record.iter().map(str::to_string).collect()))
        .collect::<std::result::Result<Vec<Vec<String>>, _>>()?;
    Ok(Some(RawFile {
        key: key.to_string(),
        header,
        rows,
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub skipped_files: Vec<String>,
}

/// Concatenate files in order. The first file fixes the header and files
/// with another header are skipped. Blank rows and repeated rows are
/// dropped, keeping the first occurrence.
pub fn merge_files(files: impl IntoIterator<Item = RawFile>) -> Option<Merged> {
    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped_files = Vec::new();

    for file in files {
        if header.is_none() {
            header = Some(file.header);
        } else if header.as_ref() != Some(&file.header) {
            warn!(key = %file.key, "Header mismatch, skipping file");
            skipped_files.push(file.key);
            continue;
        }
        for row in file.rows {
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            if seen.insert(row.clone()) {
                rows.push(row);
            }
        }
    }

    header.map(|header| Merged {
        header,
        rows,
        skipped_files,
    })
}

/// Type every cell of `merged` into a table named `table_name`.
pub fn build_table(table_name: &str, merged: &Merged, batch_size: usize) -> Table {
    let mut table = Table::new(table_name, merged.header.clone());
    let total = merged.rows.len();
    for (i, row) in merged.rows.iter().enumerate() {
        let values = merged
            .header
            .iter()
            .zip(row.iter())
            .map(|(column, raw)| convert_value(column, raw))
            .collect();
        table.push_row(values);
        if batch_size > 0 && (i + 1) % batch_size == 0 {
            info!(table = table_name, "Processed {}/{} rows", i + 1, total);
        }
    }
    table
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub files: usize,
    pub skipped_files: usize,
    pub unique_rows: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
    pub tables: Vec<TableReport>,
    pub failed: Vec<String>,
}

/// Run `work` over `items` with at most `workers` in flight, keeping input
/// order in the output.
async fn run_ordered<I, T, F, Fut>(items: Vec<I>, workers: usize, work: F) -> Result<Vec<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    let total = items.len();

    for (idx, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let fut = work(item);
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| GatewayError::Storage(e.to_string()))?;
            Ok::<_, GatewayError>((idx, fut.await))
        });
    }

    let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (idx, out) = joined??;
        slots[idx] = Some(out);
    }
    Ok(slots.into_iter().flatten().collect())
}

async fn load_file(stores: Stores, key: String) -> Result<Option<RawFile>> {
    let bytes = stores.objects.get(&stores.bucket, &key).await?;
    debug!(key = %key, bytes = bytes.len(), "processing raw file");
    parse_raw_file(&key, &bytes)
}

#[instrument(skip(stores, options), fields(code = %pollutant.code))]
pub async fn stage_pollutant(
    stores: &Stores,
    pollutant: &Pollutant,
    options: StagingOptions,
) -> Result<TableReport> {
    let table_name = normalize_column_name(&pollutant.short_name);
    info!(
        "Processing pollutant: {} (Code: {})",
        pollutant.short_name, pollutant.code
    );

    let keys = stores
        .objects
        .list(&stores.bucket, &format!("{}/", pollutant.code))
        .await?;
    let mut report = TableReport {
        table: table_name.clone(),
        files: keys.len(),
        skipped_files: 0,
        unique_rows: 0,
        inserted: 0,
    };
    if keys.is_empty() {
        info!("No files found for pollutant {}", pollutant.short_name);
        return Ok(report);
    }

    let loaded = match options.file_workers {
        Some(workers) => {
            run_ordered(keys.clone(), workers, |key| load_file(stores.clone(), key)).await?
        }
        None => {
            let mut out = Vec::with_capacity(keys.len());
            for key in &keys {
                out.push(load_file(stores.clone(), key.clone()).await);
            }
            out
        }
    };

    let mut files = Vec::new();
    for (key, result) in keys.iter().zip(loaded) {
        match result {
            Ok(Some(file)) => files.push(file),
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, "failed to read raw file: {}", e);
                crate::metrics::pipeline::staging_file_skipped();
                report.skipped_files += 1;
            }
        }
    }

    let Some(merged) = merge_files(files).filter(|m| !m.rows.is_empty()) else {
        info!("No data rows found for pollutant {}", pollutant.short_name);
        return Ok(report);
    };
    for _ in &merged.skipped_files {
        crate::metrics::pipeline::staging_file_skipped();
    }
    report.skipped_files += merged.skipped_files.len();
    report.unique_rows = merged.rows.len();
    info!(
        "Total unique rows for {}: {}",
        pollutant.short_name, report.unique_rows
    );

    let batch_size = options.batch_size;
    let name = table_name.clone();
    let table = tokio::task::spawn_blocking(move || build_table(&name, &merged, batch_size)).await?;
    report.inserted = stores
        .tables
        .insert_if_absent(STAGING_ZONE, &table, &[CODE_SITE, DATE_DE_DEBUT])
        .await?;
    crate::metrics::pipeline::staging_rows_inserted(report.inserted);
    info!(
        "Inserted {} rows into table '{}'",
        report.inserted, table_name
    );
    Ok(report)
}

/// Stage every pollutant. A pollutant that fails is logged and reported;
/// the others still run. Reports come back in `pollutants` order whatever
/// the concurrency.
pub async fn run_staging_stage(
    stores: &Stores,
    pollutants: &[Pollutant],
    options: StagingOptions,
) -> Result<StagingReport> {
    let results: Vec<(Pollutant, Result<TableReport>)> = match options.max_workers {
        Some(workers) => {
            run_ordered(pollutants.to_vec(), workers, |pollutant| {
                let stores = stores.clone();
                async move {
                    let result = stage_pollutant(&stores, &pollutant, options).await;
                    (pollutant, result)
                }
            })
            .await?
        }
        None => {
            let mut out = Vec::with_capacity(pollutants.len());
            for pollutant in pollutants {
                out.push((pollutant.clone(), stage_pollutant(stores, pollutant, options).await));
            }
            out
        }
    };

    let mut report = StagingReport::default();
    for (pollutant, result) in results {
        match result {
            Ok(table) => report.tables.push(table),
            Err(e) => {
                warn!(code = %pollutant.code, "staging failed for {}: {}", pollutant.short_name, e);
                report.failed.push(pollutant.code);
            }
        }
    }
    Ok(report)
}
