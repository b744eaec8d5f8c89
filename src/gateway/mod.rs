//! Staging of accepted payloads: content-addressed storage plus an
//! append-only ingest log of stamped envelopes.

pub mod cas_fs;
pub mod envelope;
pub mod ingest_log;

use crate::constants::ENVELOPE_VERSION;
use crate::error::Result;
use chrono::Utc;
use envelope::{ChecksumMeta, EnvelopeSubmission, PayloadMeta, StampedEnvelope};
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub fn compute_idempotency_key(source: &str, payload_sha256_hex: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(payload_sha256_hex.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn build_submission(source: &str, name: &str, mime_type: &str, bytes: &[u8]) -> EnvelopeSubmission {
    let sha = cas_fs::sha256_hex(bytes);
    EnvelopeSubmission {
        envelope_version: ENVELOPE_VERSION.to_string(),
        source: source.to_string(),
        name: name.to_string(),
        idempotency_key: compute_idempotency_key(source, &sha),
        payload_meta: PayloadMeta {
            mime_type: mime_type.to_string(),
            size_bytes: bytes.len() as u64,
            checksum: ChecksumMeta { sha256: sha },
        },
        received_at: Utc::now(),
    }
}

pub struct Gateway {
    root: PathBuf,
    // idempotency key -> envelope id of the first acceptance
    seen: Mutex<HashMap<String, String>>,
    // serializes ingest log appends and the current-log symlink swap
    log_lock: Mutex<()>,
}

impl Gateway {
    /// Open the gateway at `root`, rebuilding the dedupe index from the ingest log.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("cas"))?;
        fs::create_dir_all(root.join("ingest_log"))?;

        let mut seen = HashMap::new();
        for stamped in ingest_log::read_all(&root.join("ingest_log"))? {
            if stamped.dedupe_of.is_none() {
                seen.entry(stamped.envelope.idempotency_key)
                    .or_insert(stamped.envelope_id);
            }
        }
        info!(root = %root.display(), known = seen.len(), "gateway opened");
        Ok(Self {
            root,
            seen: Mutex::new(seen),
            log_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cas_root(&self) -> PathBuf {
        self.root.join("cas")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("ingest_log")
    }

    /// Stage a payload. A repeated idempotency key is logged as a dedupe
    /// envelope pointing at the first acceptance and nothing is written to
    /// the CAS.
    ///
    /// The key index is locked only while the key is claimed; CAS and log
    /// writes happen outside it.
    pub fn accept(&self, env: EnvelopeSubmission, payload_bytes: &[u8]) -> Result<StampedEnvelope> {
        let accepted_at = Utc::now();
        let envelope_id = Uuid::new_v4().to_string();

        if let Some(existing_id) = self.claim(&env.idempotency_key, &envelope_id) {
            let dup = StampedEnvelope {
                envelope_version: env.envelope_version.clone(),
                envelope_id,
                accepted_at,
                payload_ref: String::new(),
                dedupe_of: Some(existing_id),
                envelope: env,
            };
            self.append_log(&dup)?;
            crate::metrics::gateway::envelope_deduplicated();
            debug!(name = %dup.envelope.name, dedupe_of = ?dup.dedupe_of, "payload already staged");
            return Ok(dup);
        }

        let staged = cas_fs::write_cas(&self.cas_root(), payload_bytes).and_then(|payload_ref| {
            let stamped = StampedEnvelope {
                envelope_version: env.envelope_version.clone(),
                envelope_id: envelope_id.clone(),
                accepted_at,
                payload_ref,
                dedupe_of: None,
                envelope: env.clone(),
            };
            self.append_log(&stamped)?;
            Ok(stamped)
        });
        let stamped = match staged {
            Ok(stamped) => stamped,
            Err(e) => {
                self.release(&env.idempotency_key, &envelope_id);
                return Err(e.into());
            }
        };
        crate::metrics::gateway::envelope_accepted(payload_bytes.len());
        debug!(name = %stamped.envelope.name, payload_ref = %stamped.payload_ref, "payload staged");
        Ok(stamped)
    }

    /// Record `envelope_id` as the first acceptance of `key`, or return the
    /// envelope id that already holds it.
    fn claim(&self, key: &str, envelope_id: &str) -> Option<String> {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match seen.entry(key.to_string()) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(envelope_id.to_string());
                None
            }
        }
    }

    fn append_log(&self, stamped: &StampedEnvelope) -> anyhow::Result<()> {
        let _guard = self.log_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ingest_log::append_rotating(&self.log_dir(), stamped)
    }

    /// Undo a claim whose payload could not be staged.
    fn release(&self, key: &str, envelope_id: &str) {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if seen.get(key).map(String::as_str) == Some(envelope_id) {
            seen.remove(key);
        }
    }

    pub fn read_payload(&self, payload_ref: &str) -> Result<Option<Vec<u8>>> {
        match cas_fs::resolve_payload_path(&self.cas_root(), payload_ref) {
            Some(path) if path.exists() => Ok(Some(fs::read(path)?)),
            _ => Ok(None),
        }
    }

    pub fn find_envelope(&self, envelope_id: &str) -> Result<Option<StampedEnvelope>> {
        Ok(ingest_log::find_envelope_by_id(&self.log_dir(), envelope_id)?)
    }

    pub fn envelopes(&self) -> Result<Vec<StampedEnvelope>> {
        Ok(ingest_log::read_all(&self.log_dir())?)
    }
}
