//! Crawler module for story discovery and chapter fetching
//!
//! This module contains the core crawling logic, including:
//! - Polite HTTP fetching with retry logic
//! - HTML parsing with fallback extractors
//! - Listing pagination and chapter-list collection
//! - Overall crawl coordination

mod collector;
mod coordinator;
mod fetcher;
mod listing;
mod parser;
mod scheduler;

pub use collector::{effective_chapter_limit, ChapterCollector, CollectedChapters, MAX_CHAPTERS_PER_STORY};
pub use coordinator::{finalize_chapters, Coordinator};
pub use fetcher::{build_http_client, parse_retry_after, FetchResult, Fetcher, RetryPolicy};
pub use listing::{ListingSummary, ListingWalker};
pub use parser::{
    clean_chapter_title, is_story_page, parse_chapter, parse_chapter_list, parse_listing,
    parse_story, ChapterPage, ListingPage, StoryMeta, StoryPage, NOT_FOUND,
};
pub use scheduler::{RequestTotals, Scheduler};

use crate::config::SiteConfig;
use crate::index::SearchIndex;
use crate::ledger::ProgressLedger;
use crate::storage::Store;
use crate::url::SitePatterns;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// A chapter anchor found on a story or chapter-list page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub url: Url,

    /// Link title (`title` attribute or anchor text)
    pub title: Option<String>,

    /// Chapter number read from the URL, 0 when absent
    pub number: u32,
}

impl ChapterLink {
    pub fn new(url: Url, title: Option<String>, patterns: &SitePatterns) -> Self {
        let number = patterns.chapter_number(url.as_str());
        Self { url, title, number }
    }
}

/// Cooperative cancellation flag shared by every task of a run
///
/// Dispatch loops check it before starting new work; requests already in
/// flight are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a [`Coordinator`] needs, passed explicitly
#[derive(Clone)]
pub struct CrawlDeps {
    /// Fetcher bound to the job's scheduler
    pub fetcher: Arc<Fetcher>,

    pub ledger: Arc<ProgressLedger>,

    pub store: Arc<dyn Store>,

    /// Search index for finalized chapters, if publishing is enabled
    pub index: Option<Arc<dyn SearchIndex>>,

    pub stop: StopSignal,

    /// URL layout of the target site
    pub site: SiteConfig,
}
