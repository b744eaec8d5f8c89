//! Gateway phase metrics: requests per route, file parsing, staging.

use crate::metrics::phase_metric;

pub(super) fn describe() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        phase_metric!(counter, "gateway", "requests"),
        "Ingest requests received, labelled by route"
    );
    describe_counter!(
        phase_metric!(counter, "gateway", "files_parsed"),
        "CSV files parsed successfully"
    );
    describe_counter!(
        phase_metric!(counter, "gateway", "files_rejected"),
        "Uploaded files that failed to parse or had the wrong extension"
    );
    describe_counter!(
        phase_metric!(counter, "gateway", "blobs_received"),
        "Blobs received on the blob path"
    );
    describe_counter!(
        phase_metric!(counter, "gateway", "envelopes_accepted"),
        "Payloads staged into the CAS"
    );
    describe_counter!(
        phase_metric!(counter, "gateway", "envelopes_deduplicated"),
        "Payloads already staged under the same idempotency key"
    );
    describe_histogram!(
        phase_metric!(histogram, "gateway", "payload_bytes"),
        "Size of staged payloads"
    );
    describe_histogram!(
        phase_metric!(histogram, "gateway", "request_duration_seconds"),
        "Wall-clock time per ingest request, labelled by route"
    );
}

pub fn request(route: &'static str) {
    metrics::counter!(phase_metric!(counter, "gateway", "requests"), "route" => route).increment(1);
}

pub fn request_duration(route: &'static str, secs: f64) {
    metrics::histogram!(
        phase_metric!(histogram, "gateway", "request_duration_seconds"),
        "route" => route
    )
    .record(secs);
}

pub fn file_parsed() {
    metrics::counter!(phase_metric!(counter, "gateway", "files_parsed")).increment(1);
}

pub fn file_rejected() {
    metrics::counter!(phase_metric!(counter, "gateway", "files_rejected")).increment(1);
}

pub fn blobs_received(count: usize) {
    metrics::counter!(phase_metric!(counter, "gateway", "blobs_received")).increment(count as u64);
}

pub fn envelope_accepted(payload_bytes: usize) {
    metrics::counter!(phase_metric!(counter, "gateway", "envelopes_accepted")).increment(1);
    metrics::histogram!(phase_metric!(histogram, "gateway", "payload_bytes"))
        .record(payload_bytes as f64);
}

pub fn envelope_deduplicated() {
    metrics::counter!(phase_metric!(counter, "gateway", "envelopes_deduplicated")).increment(1);
}
