pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;

// Ingestion gateway: request parsing and payload staging
pub mod gateway;
pub mod ingest;

// Raw -> staging -> curated data-lake pipeline
pub mod pipeline;
