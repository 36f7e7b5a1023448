//! Search index publishing
//!
//! Finalized chapters are pushed to an Elasticsearch-compatible server, one
//! document per chapter with id `<story id>-ch<number>`. Publishing is best
//! effort: failures are logged and never fail a crawl.

use crate::config::IndexConfig;
use crate::storage::{ChapterRecord, StoryRecord};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors that can occur while talking to the index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Body sent when the index has to be created
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings(pub Value);

impl IndexSettings {
    /// Reads settings and mappings from a JSON file
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let content = std::fs::read(path)?;
        Ok(Self(serde_json::from_slice(&content)?))
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self(json!({
            "mappings": {
                "properties": {
                    "story_id": { "type": "keyword" },
                    "story_title": { "type": "text" },
                    "author": { "type": "text" },
                    "genres": { "type": "keyword" },
                    "chapter_number": { "type": "integer" },
                    "title": { "type": "text" },
                    "content": { "type": "text" },
                    "source_url": { "type": "keyword" }
                }
            }
        }))
    }
}

/// Destination for finalized chapter documents
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Creates the index if it does not exist yet
    async fn ensure_index(&self, settings: &IndexSettings) -> Result<(), IndexError>;

    /// Creates or replaces the document with the given id
    async fn index_document(&self, id: &str, document: &Value) -> Result<(), IndexError>;
}

/// Elasticsearch-compatible HTTP index
pub struct ElasticIndex {
    client: Client,
    base_url: Url,
    name: String,
}

impl ElasticIndex {
    pub fn new(client: Client, base_url: &str, name: impl Into<String>) -> Result<Self, IndexError> {
        let base_url =
            Url::parse(base_url).map_err(|e| IndexError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self {
            client,
            base_url,
            name: name.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), IndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(IndexError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn ensure_index(&self, settings: &IndexSettings) -> Result<(), IndexError> {
        let url = self.url(&[self.name.as_str()])?;
        let response = self.client.head(url.clone()).send().await?;
        match response.status() {
            status if status.is_success() => {
                tracing::debug!("Index '{}' already exists", self.name);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                let response = self.client.put(url).json(&settings.0).send().await?;
                check_status(response).await?;
                tracing::info!("Created index '{}'", self.name);
                Ok(())
            }
            status => Err(IndexError::Status {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn index_document(&self, id: &str, document: &Value) -> Result<(), IndexError> {
        let url = self.url(&[self.name.as_str(), "_doc", id])?;
        let response = self.client.put(url).json(document).send().await?;
        check_status(response).await
    }
}

/// Connects to the index configured in `[index]`
///
/// Returns None when publishing is disabled or the index cannot be prepared;
/// the crawl then runs without publishing.
pub async fn connect_index(config: &IndexConfig, client: Client) -> Option<Arc<dyn SearchIndex>> {
    if !config.enabled {
        return None;
    }
    match prepare_index(config, client).await {
        Ok(index) => {
            tracing::info!("Publishing to index '{}' at {}", config.name, config.url);
            Some(Arc::new(index))
        }
        Err(e) => {
            tracing::warn!("Search index unavailable, crawling without publishing: {}", e);
            None
        }
    }
}

async fn prepare_index(config: &IndexConfig, client: Client) -> Result<ElasticIndex, IndexError> {
    let settings = match &config.settings_path {
        Some(path) => IndexSettings::load(Path::new(path))?,
        None => IndexSettings::default(),
    };
    let index = ElasticIndex::new(client, &config.url, config.name.clone())?;
    index.ensure_index(&settings).await?;
    Ok(index)
}

/// Index document for one chapter, with its id
pub fn chapter_document(story: &StoryRecord, chapter: &ChapterRecord) -> (String, Value) {
    let story_id = story.story_id();
    let id = format!("{}-ch{}", story_id, chapter.chapter_number);
    let document = json!({
        "id": id,
        "story_id": story_id,
        "story_title": story.title,
        "author": story.author,
        "genres": story.genres,
        "chapter_number": chapter.chapter_number,
        "title": chapter.title,
        "content": chapter.content,
        "source_url": chapter.source_url,
    });
    (id, document)
}

/// Publishes every chapter of a finalized story
///
/// # Returns
///
/// The number of chapters indexed; failures are logged and skipped
pub async fn publish_story(index: &dyn SearchIndex, story: &StoryRecord) -> usize {
    let mut published = 0;
    for chapter in &story.chapters {
        let (id, document) = chapter_document(story, chapter);
        match index.index_document(&id, &document).await {
            Ok(()) => published += 1,
            Err(e) => tracing::warn!("Failed to index {}: {}", id, e),
        }
    }
    published
}
