//! Crawl job definition
//!
//! A [`Job`] is built once per invocation from the loaded [`Config`] and the
//! command-line choices. It is never persisted; only its id survives, as the
//! partition key of the progress ledger.

use crate::config::types::{Config, SiteConfig};
use std::time::Duration;
use url::Url;

/// What a job crawls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobScope {
    /// A single story page
    Story(Url),

    /// A category listing
    Category { slug: String },
}

/// One crawl invocation
#[derive(Debug, Clone)]
pub struct Job {
    /// Ledger partition key
    pub id: String,

    pub scope: JobScope,

    /// Worker pool size shared by every fetch of this job
    pub concurrency: usize,

    /// Chapters per story (0 means the default cap)
    pub chapter_limit: usize,

    /// Stories taken from a category (0 means unbounded)
    pub max_stories: usize,

    /// Listing pages walked for a category, or for a story URL that turns out
    /// to be a listing
    pub listing_pages: u32,

    /// Minimum delay between requests to the same host
    pub delay: Duration,

    /// Skip work recorded in the ledger and record new work there
    pub resume: bool,
}

impl Job {
    /// Creates a single-story job; the id defaults to the story slug
    pub fn story(url: Url, config: &Config) -> Self {
        let id = last_segment(&url).unwrap_or_else(|| "default".to_string());
        Self::with_scope(id, JobScope::Story(url), config)
    }

    /// Creates a category job; the id defaults to the category slug
    pub fn category(slug: &str, config: &Config) -> Self {
        let slug = slug.trim().trim_matches('/').to_string();
        let scope = JobScope::Category { slug: slug.clone() };
        Self::with_scope(slug, scope, config)
    }

    fn with_scope(id: String, scope: JobScope, config: &Config) -> Self {
        Self {
            id,
            scope,
            concurrency: config.crawler.concurrency.max(1) as usize,
            chapter_limit: config.crawler.chapter_limit as usize,
            max_stories: config.crawler.max_stories as usize,
            listing_pages: config.crawler.listing_pages,
            delay: Duration::from_millis(config.politeness.delay_ms),
            resume: config.crawler.resume,
        }
    }

    /// Overrides the ledger partition key
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Category slug for category jobs, or the slug found in a story URL
    pub fn category_slug(&self, site: &SiteConfig) -> Option<String> {
        match &self.scope {
            JobScope::Category { slug } => Some(slug.clone()),
            JobScope::Story(url) => crate::url::category_from_url(url, &site.category_prefix),
        }
    }

    /// The first URL fetched by this job
    pub fn start_url(&self, site: &SiteConfig) -> Result<Url, url::ParseError> {
        match &self.scope {
            JobScope::Story(url) => Ok(url.clone()),
            JobScope::Category { slug } => {
                let base = Url::parse(&site.base_url)?;
                base.join(&format!("/{}/{}/", site.category_prefix, slug))
            }
        }
    }
}

fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}
