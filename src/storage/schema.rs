//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Saga-Crawler database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Finalized stories, keyed by source URL
CREATE TABLE IF NOT EXISTS stories (
    source_url TEXT PRIMARY KEY,
    story_id TEXT NOT NULL,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    image_url TEXT NOT NULL,
    description TEXT NOT NULL,
    genres TEXT NOT NULL,
    category TEXT,
    total_chapters INTEGER NOT NULL,
    last_updated TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stories_story_id ON stories(story_id);

-- Chapters, written as they are fetched
CREATE TABLE IF NOT EXISTS chapters (
    source_url TEXT PRIMARY KEY,
    story_id TEXT NOT NULL,
    story_url TEXT NOT NULL,
    chapter_number INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chapters_story ON chapters(story_id, chapter_number);

-- Highest chapter recorded per story
CREATE TABLE IF NOT EXISTS crawl_state (
    story_id TEXT PRIMARY KEY,
    last_crawled_chapter INTEGER NOT NULL,
    last_crawled_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
