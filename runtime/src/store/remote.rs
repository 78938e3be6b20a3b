//! Per-URL fetch records: where a blob came from and how to revalidate it.

use std::path::{Path, PathBuf};

use acb_core::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::aci::ContentKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    #[serde(rename = "aciURL")]
    pub aci_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub download_time: DateTime<Utc>,
    pub blob_key: ContentKey,
}

/// Directory of `<sha256(url)>.json` records.
#[derive(Debug, Clone)]
pub struct RemoteIndex {
    dir: PathBuf,
}

impl RemoteIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, url: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", hex::encode(Sha256::digest(url.as_bytes()))))
    }

    pub fn load(&self, url: &str) -> Result<Option<RemoteRecord>> {
        read_record(&self.record_path(url))
    }

    /// Persist a record, replacing any earlier one for the same URL.
    pub fn save(&self, record: &RemoteRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.record_path(&record.aci_url);
        let tmp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Every readable record. Corrupt files are skipped.
    pub fn all(&self) -> Result<Vec<RemoteRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable remote record"),
            }
        }
        Ok(records)
    }

    /// Record pointing at `key`, if any.
    pub fn for_key(&self, key: &ContentKey) -> Result<Option<RemoteRecord>> {
        Ok(self.all()?.into_iter().find(|r| &r.blob_key == key))
    }

    /// Drop every record that points at `key`.
    pub fn remove_for_key(&self, key: &ContentKey) -> Result<()> {
        for record in self.all()? {
            if &record.blob_key == key {
                match std::fs::remove_file(self.record_path(&record.aci_url)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

fn read_record(path: &Path) -> Result<Option<RemoteRecord>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
