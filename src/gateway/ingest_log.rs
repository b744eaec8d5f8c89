use super::envelope::StampedEnvelope;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CURRENT_LOG: &str = "ingest.ndjson";

/// Append to a daily-rotated ingest log file under `log_dir`.
/// Pattern: ingest_YYYY-MM-DD.ndjson and a symlink `ingest.ndjson` pointing to current.
pub fn append_rotating(log_dir: &Path, stamped: &StampedEnvelope) -> anyhow::Result<()> {
    fs::create_dir_all(log_dir)?;

    let date_str = Utc::now().format("%Y-%m-%d");
    let target_path = log_dir.join(format!("ingest_{}.ndjson", date_str));

    ensure_symlink_to_current(&log_dir.join(CURRENT_LOG), &target_path)?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&target_path)?;
    let mut line = serde_json::to_string(stamped)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Dated log files in `log_dir`, oldest first.
pub fn log_files(log_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("ingest_") && n.ends_with(".ndjson"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Every envelope in the log, oldest first. Unparseable lines are skipped.
pub fn read_all(log_dir: &Path) -> std::io::Result<Vec<StampedEnvelope>> {
    let mut out = Vec::new();
    for path in log_files(log_dir)? {
        let reader = BufReader::new(File::open(&path)?);
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StampedEnvelope>(&line) {
                Ok(stamped) => out.push(stamped),
                Err(e) => warn!(file = %path.display(), line = idx + 1, "skipping bad ingest log line: {}", e),
            }
        }
    }
    Ok(out)
}

pub fn find_envelope_by_id(
    log_dir: &Path,
    envelope_id: &str,
) -> std::io::Result<Option<StampedEnvelope>> {
    Ok(read_all(log_dir)?
        .into_iter()
        .find(|s| s.envelope_id == envelope_id))
}

fn ensure_symlink_to_current(link_path: &Path, target_path: &Path) -> anyhow::Result<()> {
    if fs::symlink_metadata(link_path).is_ok() {
        if let Ok(curr_target) = fs::read_link(link_path) {
            if paths_equivalent(&curr_target, target_path) {
                return Ok(());
            }
        }
        fs::remove_file(link_path)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target_path, link_path)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(target_path, link_path)?;
    Ok(())
}

fn paths_equivalent(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ac), Ok(bc)) => ac == bc,
        _ => a == b,
    }
}
