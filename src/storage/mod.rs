//! Storage module for persisting crawl output
//!
//! This module handles everything written for downstream consumers:
//! - SQLite database with stories, chapters and per-story crawl state
//! - One JSON document per finalized story
//! - Fan-out over several stores

mod json;
mod schema;
mod sqlite;
mod traits;

pub use json::JsonStoryWriter;
pub use sqlite::{SqliteStore, StoreStats};
pub use traits::{Store, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Opens (or creates) the SQLite store at `path`
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStore::new(path)
}

/// One fetched chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub story_url: String,
    pub chapter_number: u32,
    #[serde(rename = "chapter_title")]
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
}

/// A finalized story with its chapters in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub source_url: String,
    pub title: String,
    pub author: String,
    pub image_url: String,
    pub description: String,
    pub genres: Vec<String>,
    pub category: Option<String>,
    pub chapters: Vec<ChapterRecord>,
    pub last_updated: DateTime<Utc>,
}

impl StoryRecord {
    /// Store key of the story (its URL slug)
    pub fn story_id(&self) -> String {
        crate::url::story_id(&self.source_url)
    }
}

/// Progress of a story as recorded by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlState {
    pub last_crawled_chapter: u32,
    pub last_crawled_at: DateTime<Utc>,
}

/// Writes to several stores; reads from the first that answers
///
/// Every store receives every write even if an earlier one failed; the first
/// error is returned.
#[derive(Clone, Default)]
pub struct StoreSet {
    stores: Vec<Arc<dyn Store>>,
}

impl StoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, store: Arc<dyn Store>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    fn fan_out(&self, f: impl Fn(&dyn Store) -> StorageResult<()>) -> StorageResult<()> {
        let mut first_error = None;
        for store in &self.stores {
            if let Err(e) = f(store.as_ref()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Store for StoreSet {
    fn put_story(&self, story: &StoryRecord) -> StorageResult<()> {
        self.fan_out(|store| store.put_story(story))
    }

    fn put_chapter(&self, chapter: &ChapterRecord, story_id: &str, chapter_number: u32) -> StorageResult<()> {
        self.fan_out(|store| store.put_chapter(chapter, story_id, chapter_number))
    }

    fn get_chapters(&self, story_id: &str) -> StorageResult<Vec<ChapterRecord>> {
        for store in &self.stores {
            let chapters = store.get_chapters(story_id)?;
            if !chapters.is_empty() {
                return Ok(chapters);
            }
        }
        Ok(Vec::new())
    }

    fn get_crawl_state(&self, story_id: &str) -> StorageResult<Option<CrawlState>> {
        for store in &self.stores {
            if let Some(state) = store.get_crawl_state(story_id)? {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn chapter(story_url: &str, n: u32) -> ChapterRecord {
        ChapterRecord {
            story_url: story_url.to_string(),
            chapter_number: n,
            title: format!("Chapter {}", n),
            content: format!("Text of chapter {}", n),
            source_url: format!("{}chuong-{}/", story_url, n),
            fetched_at: Utc::now(),
        }
    }

    pub(crate) fn story(source_url: &str, chapters: &[u32]) -> StoryRecord {
        StoryRecord {
            source_url: source_url.to_string(),
            title: "Tiên Nghịch".to_string(),
            author: "Nhĩ Căn".to_string(),
            image_url: "https://x.vn/cover.jpg".to_string(),
            description: "Thuận vi phàm".to_string(),
            genres: vec!["Tiên Hiệp".to_string()],
            category: Some("tien-hiep".to_string()),
            chapters: chapters.iter().map(|n| chapter(source_url, *n)).collect(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_story_id() {
        assert_eq!(story("https://x.vn/tien-nghich/", &[]).story_id(), "tien-nghich");
    }

    #[test]
    fn test_chapter_json_field_names() {
        let json = serde_json::to_value(chapter("https://x.vn/t/", 1)).unwrap();
        assert_eq!(json["chapter_title"], "Chapter 1");
        assert_eq!(json["chapter_number"], 1);
    }

    #[test]
    fn test_store_set_fans_out() {
        let dir = TempDir::new().unwrap();
        let sqlite = Arc::new(SqliteStore::new_in_memory().unwrap());
        let writer = Arc::new(JsonStoryWriter::new(dir.path()));
        let set = StoreSet::new().with(sqlite.clone()).with(writer);
        assert_eq!(set.len(), 2);

        let record = story("https://x.vn/tien-nghich/", &[1, 2]);
        set.put_chapter(&record.chapters[0], "tien-nghich", 1).unwrap();
        set.put_story(&record).unwrap();

        assert_eq!(sqlite.stats().unwrap().chapters, 2);
        assert!(dir.path().join("tien-hiep/tien-nghich.json").exists());
        assert_eq!(set.get_chapters("tien-nghich").unwrap().len(), 2);
        assert_eq!(
            set.get_crawl_state("tien-nghich")
                .unwrap()
                .unwrap()
                .last_crawled_chapter,
            2
        );
    }
}
