use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const PAYLOAD_REF_PREFIX: &str = "cas:sha256:";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn object_path(root: &Path, hex: &str) -> PathBuf {
    root.join("sha256").join(&hex[0..2]).join(&hex[2..4]).join(hex)
}

/// Store `bytes` under their SHA-256 and return `cas:sha256:<hex>`.
pub fn write_cas(root: &Path, bytes: &[u8]) -> anyhow::Result<String> {
    let hex = sha256_hex(bytes);
    let path = object_path(root, &hex);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    if !path.exists() {
        // readers never see a partial object
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
    }
    Ok(format!("{}{}", PAYLOAD_REF_PREFIX, hex))
}

pub fn resolve_payload_path(root: &Path, payload_ref: &str) -> Option<PathBuf> {
    let hex = payload_ref.strip_prefix(PAYLOAD_REF_PREFIX)?;
    if hex.len() < 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(object_path(root, hex))
}
