use crate::error::Result;
use gcq_protocol::DaemonStatus;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write `status` as pretty JSON via a temp file and rename.
pub async fn write_status(path: &Path, status: &DaemonStatus) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut json = serde_json::to_vec_pretty(status)?;
    json.push(b'\n');
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn read_status(path: &Path) -> Result<Option<DaemonStatus>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
