use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChecksumMeta {
    pub sha256: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PayloadMeta {
    pub mime_type: String,
    pub size_bytes: u64,
    pub checksum: ChecksumMeta,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnvelopeSubmission {
    pub envelope_version: String, // "1.0.0"
    /// Which ingestion path produced the payload.
    pub source: String,
    /// Uploaded file name, or `blob_<i>` for inline blobs.
    pub name: String,
    pub idempotency_key: String,
    pub payload_meta: PayloadMeta,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StampedEnvelope {
    pub envelope_version: String,
    pub envelope_id: String,
    pub accepted_at: DateTime<Utc>,
    pub payload_ref: String,
    pub dedupe_of: Option<String>,
    pub envelope: EnvelopeSubmission,
}

/// What an ingest response reports for each staged payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Staged {
    pub name: String,
    pub envelope_id: String,
    pub payload_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_of: Option<String>,
}

impl From<&StampedEnvelope> for Staged {
    fn from(stamped: &StampedEnvelope) -> Self {
        Self {
            name: stamped.envelope.name.clone(),
            envelope_id: stamped.envelope_id.clone(),
            payload_ref: stamped.payload_ref.clone(),
            dedupe_of: stamped.dedupe_of.clone(),
        }
    }
}
