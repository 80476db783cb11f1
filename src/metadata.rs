#![forbid(unsafe_code)]

//! Sidecar metadata persistence.
//!
//! Each downloaded video gets one `<title>.meta.json` companion file holding
//! the full catalog record it came from. The file is written at most once:
//! its presence on disk doubles as the "already synchronized" marker, so
//! re-runs must never overwrite or truncate it.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// On-disk sidecar record. `playlist_item` is the untouched catalog record.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataRecord {
    pub video_file: String,
    pub create_date: DateTime<Utc>,
    pub playlist_item: Value,
}

impl MetadataRecord {
    pub fn new(video_file: &str, playlist_item: Value) -> Self {
        Self {
            video_file: video_file.to_string(),
            create_date: Utc::now(),
            playlist_item,
        }
    }
}

/// Writes `record` to `path` unless a file is already there, in which case
/// the call is a silent no-op. Returns whether a write happened.
///
/// The record goes to a temp file first and is renamed into place, so a
/// crash mid-write never leaves a malformed file pretending to be a
/// completed sidecar.
pub fn write_metadata_once(path: &Path, record: &MetadataRecord) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    let payload = serde_json::to_vec_pretty(record).context("serializing metadata record")?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("finalizing {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(marker: &str) -> MetadataRecord {
        MetadataRecord::new("Ep 1.mkv", json!({ "marker": marker }))
    }

    #[test]
    fn writes_record_as_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Ep 1.meta.json");

        assert!(write_metadata_once(&path, &record("first")).unwrap());

        let written: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["video_file"], "Ep 1.mkv");
        assert_eq!(written["playlist_item"]["marker"], "first");
        assert!(written["create_date"].is_string());
    }

    #[test]
    fn second_write_is_a_no_op() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Ep 1.meta.json");

        assert!(write_metadata_once(&path, &record("first")).unwrap());
        assert!(!write_metadata_once(&path, &record("second")).unwrap());

        let written: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["playlist_item"]["marker"], "first");
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Ep 1.meta.json");
        write_metadata_once(&path, &record("first")).unwrap();
        assert!(!path.with_extension("tmp").exists());
    }
}
