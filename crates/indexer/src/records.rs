use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const RECORDS_FILE_NAME: &str = "records.json";

/// What the indexer last stored for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub content_hash: String,
    pub chunk_ids: Vec<String>,
    pub last_indexed_epoch: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecords {
    #[serde(default)]
    files: BTreeMap<String, FileRecord>,
}

impl FileRecords {
    #[must_use]
    pub fn get(&self, file_path: &str) -> Option<&FileRecord> {
        self.files.get(file_path)
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.files.insert(record.file_path.clone(), record);
    }

    pub fn remove(&mut self, file_path: &str) -> Option<FileRecord> {
        self.files.remove(file_path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drop records that `keep` rejects. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&FileRecord) -> bool) -> usize {
        let before = self.files.len();
        self.files.retain(|_, record| keep(record));
        before - self.files.len()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write as pretty JSON via a temp file and rename.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
