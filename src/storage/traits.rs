//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{ChapterRecord, CrawlState, StoryRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Calls are synchronous and short; implementations provide their own
/// interior locking so one store can be shared across tasks.
pub trait Store: Send + Sync {
    /// Writes a finalized story and its chapters
    ///
    /// Writing the same story again replaces the previous record.
    fn put_story(&self, story: &StoryRecord) -> StorageResult<()>;

    /// Writes one chapter as soon as it is fetched
    ///
    /// # Arguments
    ///
    /// * `chapter` - The chapter record
    /// * `story_id` - Store key of the owning story
    /// * `chapter_number` - Number used to advance the story's crawl state
    fn put_chapter(
        &self,
        chapter: &ChapterRecord,
        story_id: &str,
        chapter_number: u32,
    ) -> StorageResult<()>;

    /// Gets the chapters stored for a story, ascending by number
    ///
    /// Stores that cannot read chapters back return an empty list.
    fn get_chapters(&self, _story_id: &str) -> StorageResult<Vec<ChapterRecord>> {
        Ok(Vec::new())
    }

    /// Gets the recorded crawl state of a story, if any
    fn get_crawl_state(&self, story_id: &str) -> StorageResult<Option<CrawlState>>;
}
