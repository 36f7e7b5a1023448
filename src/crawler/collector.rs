//! Chapter-list collection
//!
//! Builds the ordered list of chapter links a story crawl will fetch: every
//! chapter-list page is read, links are unioned by URL, sorted by chapter
//! number, cut to the chapter limit and filtered against the ledger.

use crate::crawler::{parse_chapter_list, ChapterLink, FetchResult, Fetcher, StoryPage};
use crate::ledger::ProgressLedger;
use crate::url::SitePatterns;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use url::Url;

/// Hard ceiling on chapters fetched per story
pub const MAX_CHAPTERS_PER_STORY: usize = 200;

/// Chapter limit actually applied: 0 means the ceiling, anything larger is clamped
pub fn effective_chapter_limit(limit: usize) -> usize {
    if limit == 0 {
        MAX_CHAPTERS_PER_STORY
    } else {
        limit.min(MAX_CHAPTERS_PER_STORY)
    }
}

/// Chapters chosen for one story crawl
#[derive(Debug, Clone, Default)]
pub struct CollectedChapters {
    /// Links to fetch, ascending by chapter number
    pub selected: Vec<ChapterLink>,

    /// Distinct chapter links found across all chapter-list pages
    pub discovered: usize,

    /// Links within the limit skipped because the ledger has them
    pub already_done: usize,
}

/// Collects and selects the chapter links of a story
pub struct ChapterCollector {
    fetcher: Arc<Fetcher>,
    ledger: Arc<ProgressLedger>,
    patterns: SitePatterns,
    job_id: String,
    chapter_limit: usize,
    resume: bool,
}

impl ChapterCollector {
    pub fn new(
        fetcher: Arc<Fetcher>,
        ledger: Arc<ProgressLedger>,
        patterns: SitePatterns,
        job_id: impl Into<String>,
        chapter_limit: usize,
        resume: bool,
    ) -> Self {
        Self {
            fetcher,
            ledger,
            patterns,
            job_id: job_id.into(),
            chapter_limit,
            resume,
        }
    }

    /// Collects the chapters of the story at `story_url`
    ///
    /// # Arguments
    ///
    /// * `story_url` - Ledger key of the story
    /// * `page` - The parsed first page of the story
    ///
    /// # Returns
    ///
    /// The selected links plus counts for reporting. Chapter-list pages that
    /// fail to load are logged and skipped.
    pub async fn collect(&self, story_url: &Url, page: &StoryPage) -> CollectedChapters {
        let mut links = page.chapter_links.clone();
        links.extend(self.fetch_other_list_pages(page).await);

        let mut seen = HashSet::new();
        links.retain(|link| self.patterns.is_chapter_url(link.url.as_str()) && seen.insert(link.url.clone()));
        links.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.url.cmp(&b.url)));

        let discovered = links.len();
        links.truncate(effective_chapter_limit(self.chapter_limit));

        let mut already_done = 0;
        if self.resume {
            let completed = self
                .ledger
                .completed_chapters(&self.job_id, story_url.as_str())
                .await;
            let before = links.len();
            links.retain(|link| !completed.contains(link.url.as_str()));
            already_done = before - links.len();
        }

        tracing::debug!(
            "{}: {} chapters discovered, {} selected, {} already done",
            story_url,
            discovered,
            links.len(),
            already_done
        );

        CollectedChapters {
            selected: links,
            discovered,
            already_done,
        }
    }

    /// Fetches chapter-list pages 2..=max concurrently
    async fn fetch_other_list_pages(&self, page: &StoryPage) -> Vec<ChapterLink> {
        let Some((last, last_url)) = page.last_chapter_page() else {
            return Vec::new();
        };

        let mut tasks = JoinSet::new();
        for n in 2..=last {
            let Some(url) = page
                .chapter_pages
                .get(&n)
                .cloned()
                .or_else(|| self.patterns.with_page(last_url, n))
            else {
                continue;
            };

            let Some(worker) = self.fetcher.scheduler().acquire_worker().await else {
                break;
            };
            let fetcher = Arc::clone(&self.fetcher);
            let patterns = self.patterns.clone();
            tasks.spawn(async move {
                let _worker = worker;
                match fetcher.fetch(&url).await {
                    FetchResult::Success {
                        final_url, body, ..
                    } => parse_chapter_list(&body, &final_url, &patterns),
                    other => {
                        tracing::warn!("Chapter list page {} skipped: {}", url, other.describe());
                        Vec::new()
                    }
                }
            });
        }

        let mut links = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(found) => links.extend(found),
                Err(e) => tracing::warn!("Chapter list task failed: {}", e),
            }
        }
        links
    }
}
