//! Story JSON files
//!
//! Each finalized story is written as one pretty-printed JSON document under
//! `<dir>/<category>/<story slug>.json`. A file already holding the same story
//! (by source URL) is replaced; a file holding a different story is never
//! overwritten and the new document gets the first free `-N` suffix instead.

use crate::storage::traits::{Store, StorageResult};
use crate::storage::{ChapterRecord, CrawlState, StoryRecord};
use crate::url::slugify;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Writes finalized stories as JSON files
#[derive(Debug, Clone)]
pub struct JsonStoryWriter {
    dir: PathBuf,
}

impl JsonStoryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory a story's file goes to: the crawl category, else its first genre
    pub fn category_dir(&self, story: &StoryRecord) -> PathBuf {
        let category = story
            .category
            .as_deref()
            .filter(|c| !c.is_empty() && *c != "unknown")
            .map(str::to_string)
            .or_else(|| story.genres.first().map(|g| slugify(g)))
            .unwrap_or_else(|| "unknown".to_string());
        self.dir.join(category)
    }

    /// Writes the story and returns the path it landed at
    pub fn write(&self, story: &StoryRecord) -> StorageResult<PathBuf> {
        let dir = self.category_dir(story);
        std::fs::create_dir_all(&dir)?;

        let stem = story_stem(story);
        let data = serde_json::to_vec_pretty(story)?;

        // create_new makes the free-name check and the create a single step
        for counter in 0u32.. {
            let path = candidate_path(&dir, &stem, counter);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&data)?;
                    tracing::info!("Saved story to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if holds_story(&path, &story.source_url) {
                        replace_file(&path, &data)?;
                        tracing::info!("Updated story at {}", path.display());
                        return Ok(path);
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(std::io::Error::new(ErrorKind::AlreadyExists, "no free story file name").into())
    }
}

#[derive(Deserialize)]
struct StoryKey {
    source_url: String,
}

/// Whether the JSON document at `path` is the story at `source_url`
fn holds_story(path: &Path, source_url: &str) -> bool {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<StoryKey>(&bytes).ok())
        .is_some_and(|key| key.source_url == source_url)
}

/// Replaces `path` through a temp file and a rename
fn replace_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

fn story_stem(story: &StoryRecord) -> String {
    let id = story.story_id();
    if id != "story" {
        return slugify(&id);
    }
    slugify(&story.title)
}

fn candidate_path(dir: &Path, stem: &str, counter: u32) -> PathBuf {
    if counter == 0 {
        dir.join(format!("{}.json", stem))
    } else {
        dir.join(format!("{}-{}.json", stem, counter))
    }
}

impl Store for JsonStoryWriter {
    fn put_story(&self, story: &StoryRecord) -> StorageResult<()> {
        self.write(story).map(|_| ())
    }

    /// Chapters reach the file with the finalized story
    fn put_chapter(&self, _chapter: &ChapterRecord, _story_id: &str, _chapter_number: u32) -> StorageResult<()> {
        Ok(())
    }

    fn get_crawl_state(&self, _story_id: &str) -> StorageResult<Option<CrawlState>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::story;
    use tempfile::TempDir;

    #[test]
    fn test_writes_under_category() {
        let dir = TempDir::new().unwrap();
        let writer = JsonStoryWriter::new(dir.path());

        let path = writer.write(&story("https://x.vn/tien-nghich/", &[1, 2])).unwrap();
        assert_eq!(path, dir.path().join("tien-hiep/tien-nghich.json"));

        let written: StoryRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.chapters.len(), 2);
        assert_eq!(written.title, "Tiên Nghịch");
    }

    #[test]
    fn test_collisions_get_suffixes() {
        let dir = TempDir::new().unwrap();
        let writer = JsonStoryWriter::new(dir.path());

        // Same slug, different sites
        let first = writer.write(&story("https://a.vn/tien-nghich/", &[1])).unwrap();
        let second = writer.write(&story("https://b.vn/tien-nghich/", &[1])).unwrap();
        let third = writer.write(&story("https://c.vn/tien-nghich/", &[1])).unwrap();

        assert!(first.ends_with("tien-nghich.json"));
        assert!(second.ends_with("tien-nghich-1.json"));
        assert!(third.ends_with("tien-nghich-2.json"));
    }

    #[test]
    fn test_same_story_is_replaced_in_place() {
        let dir = TempDir::new().unwrap();
        let writer = JsonStoryWriter::new(dir.path());

        let first = writer.write(&story("https://x.vn/tien-nghich/", &[1, 2])).unwrap();
        let second = writer.write(&story("https://x.vn/tien-nghich/", &[1, 2, 3])).unwrap();
        assert_eq!(first, second);
        assert!(!dir.path().join("tien-hiep/tien-nghich-1.json").exists());

        let written: StoryRecord =
            serde_json::from_slice(&std::fs::read(&second).unwrap()).unwrap();
        assert_eq!(written.chapters.len(), 3);
    }

    #[test]
    fn test_category_falls_back_to_genre() {
        let writer = JsonStoryWriter::new("/out");
        let mut record = story("https://x.vn/a/", &[]);

        record.category = Some("unknown".to_string());
        record.genres = vec!["Kiem Hiep".to_string()];
        assert_eq!(writer.category_dir(&record), PathBuf::from("/out/kiem-hiep"));

        record.category = None;
        record.genres.clear();
        assert_eq!(writer.category_dir(&record), PathBuf::from("/out/unknown"));
    }
}
