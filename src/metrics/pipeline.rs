//! Pipeline phase metrics: raw fetches, staged rows, curated output, tasks.

use crate::metrics::phase_metric;

pub(super) fn describe() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        phase_metric!(counter, "pipeline", "raw_files_uploaded"),
        "Export files uploaded to the raw bucket"
    );
    describe_counter!(
        phase_metric!(counter, "pipeline", "raw_fetch_errors"),
        "Export requests or downloads that failed"
    );
    describe_counter!(
        phase_metric!(counter, "pipeline", "staging_rows_inserted"),
        "Rows inserted into staging tables"
    );
    describe_counter!(
        phase_metric!(counter, "pipeline", "staging_files_skipped"),
        "Raw files skipped because of a header mismatch or read error"
    );
    describe_gauge!(
        phase_metric!(gauge, "pipeline", "curated_rows"),
        "Rows in the last curated table written"
    );
    describe_histogram!(
        phase_metric!(histogram, "pipeline", "task_duration_seconds"),
        "Duration of pipeline tasks, labelled by task"
    );
}

pub fn raw_file_uploaded() {
    metrics::counter!(phase_metric!(counter, "pipeline", "raw_files_uploaded")).increment(1);
}

pub fn raw_fetch_error() {
    metrics::counter!(phase_metric!(counter, "pipeline", "raw_fetch_errors")).increment(1);
}

pub fn staging_rows_inserted(rows: usize) {
    metrics::counter!(phase_metric!(counter, "pipeline", "staging_rows_inserted"))
        .increment(rows as u64);
}

pub fn staging_file_skipped() {
    metrics::counter!(phase_metric!(counter, "pipeline", "staging_files_skipped")).increment(1);
}

pub fn curated_rows(rows: usize) {
    metrics::gauge!(phase_metric!(gauge, "pipeline", "curated_rows")).set(rows as f64);
}

pub fn task_duration(task: &'static str, secs: f64) {
    metrics::histogram!(
        phase_metric!(histogram, "pipeline", "task_duration_seconds"),
        "task" => task
    )
    .record(secs);
}
