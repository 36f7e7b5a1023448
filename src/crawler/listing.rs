//! Category listing walker

use crate::crawler::{parse_listing, FetchResult, Fetcher, StopSignal};
use crate::url::SitePatterns;
use crate::{Result, SagaError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// What a listing walk covered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingSummary {
    pub pages_fetched: usize,
    pub stories_found: usize,
}

/// Follows a category listing page by page, streaming story URLs
///
/// The walk ends when there is no next page, when `max_pages` pages were
/// fetched, when `max_stories` stories were found (0 means unbounded), when a
/// page would be revisited, or when a stop is requested.
pub struct ListingWalker {
    fetcher: Arc<Fetcher>,
    patterns: SitePatterns,
    category_slug: String,
    max_pages: u32,
    max_stories: usize,
    stop: StopSignal,
}

impl ListingWalker {
    pub fn new(
        fetcher: Arc<Fetcher>,
        patterns: SitePatterns,
        category_slug: impl Into<String>,
        max_pages: u32,
        max_stories: usize,
        stop: StopSignal,
    ) -> Self {
        Self {
            fetcher,
            patterns,
            category_slug: category_slug.into(),
            max_pages,
            max_stories,
            stop,
        }
    }

    /// Walks the listing starting at `start_url`
    ///
    /// Story URLs are sent to `sink` as soon as they are found, so story work can
    /// start while pagination continues. Dropping the receiver ends the walk.
    ///
    /// # Returns
    ///
    /// * `Ok(ListingSummary)` - Pages fetched and stories found
    /// * `Err(SagaError::StartFailed)` - The first page could not be fetched
    pub async fn walk(&self, start_url: Url, sink: mpsc::Sender<Url>) -> Result<ListingSummary> {
        let mut summary = ListingSummary::default();
        let mut visited_pages = HashSet::new();
        let mut seen_stories = HashSet::new();
        let mut next = Some(start_url);

        while let Some(page_url) = next.take() {
            if self.stop.is_stopped() {
                tracing::info!("Stop requested, ending listing walk");
                break;
            }
            if summary.pages_fetched >= self.max_pages as usize {
                tracing::info!("Reached listing page limit ({})", self.max_pages);
                break;
            }
            if !visited_pages.insert(page_url.clone()) {
                tracing::warn!("Listing page {} already visited, stopping", page_url);
                break;
            }

            let result = {
                let _worker = self.fetcher.scheduler().acquire_worker().await;
                self.fetcher.fetch(&page_url).await
            };

            let (final_url, body) = match result {
                FetchResult::Success {
                    final_url, body, ..
                } => (final_url, body),
                other if summary.pages_fetched == 0 => {
                    return Err(SagaError::StartFailed {
                        url: page_url.to_string(),
                        reason: other.describe(),
                    });
                }
                other => {
                    tracing::warn!(
                        "Listing page {} failed ({}), ending walk",
                        page_url,
                        other.describe()
                    );
                    break;
                }
            };

            summary.pages_fetched += 1;
            let listing = parse_listing(&body, &final_url, &self.patterns, &self.category_slug);
            tracing::info!(
                "Listing page {}: {} story links",
                summary.pages_fetched,
                listing.story_urls.len()
            );

            for story_url in listing.story_urls {
                if self.story_limit_reached(&summary) {
                    break;
                }
                if !seen_stories.insert(story_url.clone()) {
                    continue;
                }
                summary.stories_found += 1;
                if sink.send(story_url).await.is_err() {
                    tracing::debug!("Story receiver closed, ending listing walk");
                    return Ok(summary);
                }
            }

            if self.story_limit_reached(&summary) {
                tracing::info!("Reached story limit ({})", self.max_stories);
                break;
            }

            next = listing.next_page;
            if let Some(url) = &next {
                tracing::debug!("Next listing page: {}", url);
            }
        }

        Ok(summary)
    }

    fn story_limit_reached(&self, summary: &ListingSummary) -> bool {
        self.max_stories > 0 && summary.stories_found >= self.max_stories
    }
}
