//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Store, StorageResult};
use crate::storage::{ChapterRecord, CrawlState, StoryRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Row counts for the end-of-run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub stories: u64,
    pub chapters: u64,
}

/// SQLite storage backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates a new SqliteStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for concurrent readers and cheap commits
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (tests and dry runs)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Counts stored stories and chapters
    pub fn stats(&self) -> StorageResult<StoreStats> {
        let conn = self.conn();
        let stories: i64 = conn.query_row("SELECT COUNT(*) FROM stories", [], |row| row.get(0))?;
        let chapters: i64 = conn.query_row("SELECT COUNT(*) FROM chapters", [], |row| row.get(0))?;
        Ok(StoreStats {
            stories: stories as u64,
            chapters: chapters as u64,
        })
    }

    /// Chapters stored for a story, ascending by number
    pub fn get_chapters(&self, story_id: &str) -> StorageResult<Vec<ChapterRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT story_url, chapter_number, title, content, source_url, fetched_at
             FROM chapters WHERE story_id = ?1 ORDER BY chapter_number, source_url",
        )?;

        let rows = stmt.query_map(params![story_id], |row| {
            Ok(ChapterRecord {
                story_url: row.get(0)?,
                chapter_number: row.get(1)?,
                title: row.get(2)?,
                content: row.get(3)?,
                source_url: row.get(4)?,
                fetched_at: parse_timestamp(&row.get::<_, String>(5)?),
            })
        })?;

        let mut chapters = Vec::new();
        for row in rows {
            chapters.push(row?);
        }
        Ok(chapters)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn upsert_chapter(conn: &Connection, chapter: &ChapterRecord, story_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chapters (source_url, story_id, story_url, chapter_number, title, content, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(source_url) DO UPDATE SET
            story_id = excluded.story_id,
            story_url = excluded.story_url,
            chapter_number = excluded.chapter_number,
            title = excluded.title,
            content = excluded.content,
            fetched_at = excluded.fetched_at",
        params![
            chapter.source_url,
            story_id,
            chapter.story_url,
            chapter.chapter_number,
            chapter.title,
            chapter.content,
            chapter.fetched_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Advances the crawl state; the recorded chapter never moves backwards
fn advance_crawl_state(conn: &Connection, story_id: &str, chapter_number: u32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO crawl_state (story_id, last_crawled_chapter, last_crawled_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(story_id) DO UPDATE SET
            last_crawled_chapter = MAX(last_crawled_chapter, excluded.last_crawled_chapter),
            last_crawled_at = excluded.last_crawled_at",
        params![story_id, chapter_number, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    fn put_story(&self, story: &StoryRecord) -> StorageResult<()> {
        let story_id = story.story_id();
        let genres = serde_json::to_string(&story.genres)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO stories (source_url, story_id, title, author, image_url, description,
                                  genres, category, total_chapters, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(source_url) DO UPDATE SET
                story_id = excluded.story_id,
                title = excluded.title,
                author = excluded.author,
                image_url = excluded.image_url,
                description = excluded.description,
                genres = excluded.genres,
                category = excluded.category,
                total_chapters = excluded.total_chapters,
                last_updated = excluded.last_updated",
            params![
                story.source_url,
                story_id,
                story.title,
                story.author,
                story.image_url,
                story.description,
                genres,
                story.category,
                story.chapters.len() as i64,
                story.last_updated.to_rfc3339(),
            ],
        )?;

        for chapter in &story.chapters {
            upsert_chapter(&tx, chapter, &story_id)?;
        }
        // Chapters from earlier runs count too
        tx.execute(
            "UPDATE stories SET total_chapters =
                (SELECT COUNT(*) FROM chapters WHERE story_id = ?1)
             WHERE source_url = ?2",
            params![story_id, story.source_url],
        )?;
        if let Some(last) = story.chapters.iter().map(|c| c.chapter_number).max() {
            advance_crawl_state(&tx, &story_id, last)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn put_chapter(
        &self,
        chapter: &ChapterRecord,
        story_id: &str,
        chapter_number: u32,
    ) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        upsert_chapter(&tx, chapter, story_id)?;
        advance_crawl_state(&tx, story_id, chapter_number)?;
        tx.commit()?;
        Ok(())
    }

    fn get_chapters(&self, story_id: &str) -> StorageResult<Vec<ChapterRecord>> {
        SqliteStore::get_chapters(self, story_id)
    }

    fn get_crawl_state(&self, story_id: &str) -> StorageResult<Option<CrawlState>> {
        let conn = self.conn();
        let state = conn
            .query_row(
                "SELECT last_crawled_chapter, last_crawled_at FROM crawl_state WHERE story_id = ?1",
                params![story_id],
                |row| {
                    Ok(CrawlState {
                        last_crawled_chapter: row.get(0)?,
                        last_crawled_at: parse_timestamp(&row.get::<_, String>(1)?),
                    })
                },
            )
            .optional()?;
        Ok(state)
    }
}
