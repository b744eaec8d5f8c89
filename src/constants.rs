/// Multipart field carrying uploaded CSV files.
pub const FILES_FIELD: &str = "files";

/// Source label recorded on envelopes staged by the HTTP endpoints.
pub const CSV_UPLOAD_SOURCE: &str = "ingest_csv";
pub const BLOB_SOURCE: &str = "ingest_blob";

pub const ENVELOPE_VERSION: &str = "1.0.0";

/// Response header with the wall-clock time spent on an ingest request.
pub const DURATION_HEADER: &str = "x-ingest-duration-ms";

// Error messages returned by the ingest endpoints
pub const NO_FILES: &str = "No files provided";
pub const NO_BLOB_DATA: &str = "No blob data provided";
pub const NOTHING_TO_INGEST: &str = "No valid CSV files or blobs provided";
pub const INVALID_FILE_FORMAT: &str = "Invalid file format";
pub const EMPTY_CSV: &str = "No columns to parse from file";

pub const CSV_PROCESSED: &str = "CSV files processed successfully";
pub const BLOBS_RECEIVED: &str = "Blobs received";

// Staging / curated zones of the table store
pub const STAGING_ZONE: &str = "staging";
pub const CURATED_ZONE: &str = "curated";
pub const CURATED_TABLE: &str = "curated";
pub const CURATED_ALL_VALEUR_TABLE: &str = "curated_all_valeur";

/// Key columns shared by every staging table.
pub const CODE_SITE: &str = "code_site";
pub const DATE_DE_DEBUT: &str = "date_de_debut";
