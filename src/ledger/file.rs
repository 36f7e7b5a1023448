//! File and in-memory ledger backends

use crate::ledger::traits::{LedgerBackend, LedgerResult};
use crate::ledger::ProgressState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

/// Stores each job's progress as `<dir>/<job_id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the progress document for a job id
    ///
    /// Bytes outside `[A-Za-z0-9-]` are written as `_` plus two hex digits, so a
    /// job id can never escape the progress directory and two ids never share
    /// a file.
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        let mut name = String::with_capacity(job_id.len());
        for byte in job_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push('_');
                name.push_str(&hex::encode([byte]));
            }
        }
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl LedgerBackend for JsonFileBackend {
    async fn load(&self, job_id: &str) -> LedgerResult<ProgressState> {
        let path = self.path_for(job_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProgressState::default())
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save(&self, job_id: &str, state: &ProgressState) -> LedgerResult<()> {
        let path = self.path_for(job_id);
        write_json_atomic(&path, state).await
    }
}

async fn write_json_atomic(path: &Path, state: &ProgressState) -> LedgerResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(state)?;
    fs::write(&tmp_path, &data).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Keeps progress documents in memory (tests and throwaway runs)
#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: Mutex<HashMap<String, ProgressState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    async fn load(&self, job_id: &str) -> LedgerResult<ProgressState> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(job_id).cloned().unwrap_or_default())
    }

    async fn save(&self, job_id: &str, state: &ProgressState) -> LedgerResult<()> {
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.insert(job_id.to_string(), state.clone());
        Ok(())
    }
}
