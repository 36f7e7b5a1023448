//! Ledger persistence trait and error types

use crate::ledger::ProgressState;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while persisting progress documents
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ledger persistence operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Durable storage for one progress document per job id
///
/// Implementations only move documents in and out. Callers serialize access per
/// job id, and decide what a failed load means.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Loads the document for `job_id`; a missing document is an empty state
    async fn load(&self, job_id: &str) -> LedgerResult<ProgressState>;

    /// Replaces the document for `job_id`
    async fn save(&self, job_id: &str, state: &ProgressState) -> LedgerResult<()>;
}
