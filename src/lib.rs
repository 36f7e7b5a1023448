//! Saga-Crawler: a resumable web-novel crawler
//!
//! This crate walks the category listings of a web-novel site, collects the chapter
//! links of every story it finds, fetches chapters politely under a bounded worker
//! pool, and persists the results incrementally. A per-job progress ledger lets an
//! interrupted crawl be restarted without re-fetching finished work.

pub mod config;
pub mod crawler;
pub mod index;
pub mod ledger;
pub mod output;
pub mod runner;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Saga-Crawler operations
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crawl could not start at {url}: {reason}")]
    StartFailed { url: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Index error: {0}")]
    Index(#[from] index::IndexError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Saga-Crawler operations
pub type Result<T> = std::result::Result<T, SagaError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, Job, JobScope};
pub use crawler::{Coordinator, CrawlDeps, FetchResult, StopSignal};
pub use ledger::{ProgressLedger, ProgressState};
pub use output::{JobReport, JobSummary, StoryReport, StoryStatus};
pub use storage::{ChapterRecord, StoryRecord};
