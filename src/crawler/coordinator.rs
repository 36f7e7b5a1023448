//! Crawler coordinator - main crawl orchestration logic
//!
//! This module drives one job from start to finish:
//! - Walking a category listing and running one story task per story
//! - Collecting chapter links and dispatching chapter fetches in order
//! - Detecting the end of a story from missing chapters
//! - Persisting chapters as they arrive and finalizing each story
//! - Keeping the progress ledger current in resume mode

use crate::config::{Job, JobScope};
use crate::crawler::{
    is_story_page, parse_chapter, parse_story, ChapterCollector, ChapterLink, CrawlDeps,
    FetchResult, Fetcher, ListingWalker, StopSignal,
};
use crate::index::{publish_story, SearchIndex};
use crate::ledger::ProgressLedger;
use crate::output::{JobReport, StoryReport, StoryStatus};
use crate::storage::{ChapterRecord, Store, StoryRecord};
use crate::url::{category_from_url, story_id, SitePatterns};
use crate::{Result, SagaError};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use url::Url;

/// Story URLs buffered between the listing walker and the story tasks
const STORY_QUEUE_SIZE: usize = 64;

/// Runs one crawl job
pub struct Coordinator {
    job: Job,
    deps: CrawlDeps,
    patterns: SitePatterns,
}

impl Coordinator {
    /// Creates a coordinator for `job`
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(SagaError::Config)` - The site markers do not compile
    pub fn new(job: Job, deps: CrawlDeps) -> Result<Self> {
        let patterns = SitePatterns::new(&deps.site)?;
        Ok(Self {
            job,
            deps,
            patterns,
        })
    }

    /// Runs the job to completion (or until a stop is requested)
    ///
    /// # Returns
    ///
    /// * `Ok(JobReport)` - One report per story that was reached
    /// * `Err(SagaError::StartFailed)` - The first page of the job could not be fetched
    pub async fn run(&self) -> Result<JobReport> {
        let started = Instant::now();
        let mut report = JobReport::new(&self.job.id);
        let crawler = Arc::new(StoryCrawler::new(&self.job, &self.deps, self.patterns.clone()));

        tracing::info!(
            "Job '{}' starting ({} workers, resume: {})",
            self.job.id,
            self.job.concurrency,
            self.job.resume
        );

        match &self.job.scope {
            JobScope::Story(url) => self.run_story(url, crawler, &mut report).await?,
            JobScope::Category { slug } => {
                let start = self.job.start_url(&self.deps.site)?;
                self.run_listing(start, slug.clone(), crawler, &mut report)
                    .await?
            }
        }

        let totals = self.deps.fetcher.scheduler().totals();
        report.stopped = self.deps.stop.is_stopped();
        report.requests = totals.requests;
        report.deferrals = totals.deferrals;
        report.elapsed = started.elapsed();

        tracing::info!(
            "Job '{}' finished: {} stories, {} chapters added in {:.1}s",
            self.job.id,
            report.stories.len(),
            report.chapters_added(),
            report.elapsed.as_secs_f64()
        );

        Ok(report)
    }

    async fn run_story(
        &self,
        url: &Url,
        crawler: Arc<StoryCrawler>,
        report: &mut JobReport,
    ) -> Result<()> {
        if crawler.already_done(url).await {
            tracing::info!("{} already completed, skipping", url);
            report.stories.push(StoryReport::skipped(url.as_str()));
            return Ok(());
        }

        let (final_url, body) = match crawler.fetch_page(url).await {
            Some(FetchResult::Success {
                final_url, body, ..
            }) => (final_url, body),
            Some(other) => {
                return Err(SagaError::StartFailed {
                    url: url.to_string(),
                    reason: other.describe(),
                })
            }
            None => return Ok(()),
        };

        if !is_story_page(&body) {
            let slug = category_from_url(&final_url, self.patterns.category_prefix())
                .unwrap_or_default();
            tracing::info!("{} is not a story page, walking it as a listing", url);
            return self.run_listing(final_url, slug, crawler, report).await;
        }

        let story = crawler.crawl_page(url, &final_url, &body).await;
        report.stories.push(story);
        Ok(())
    }

    async fn run_listing(
        &self,
        start: Url,
        slug: String,
        crawler: Arc<StoryCrawler>,
        report: &mut JobReport,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(STORY_QUEUE_SIZE);
        let walker = ListingWalker::new(
            Arc::clone(&self.deps.fetcher),
            self.patterns.clone(),
            slug,
            self.job.listing_pages,
            self.job.max_stories,
            self.deps.stop.clone(),
        );
        let walk = tokio::spawn(async move { walker.walk(start, tx).await });

        // Story slots only bound how many stories are open at once; every
        // fetch still goes through the job's shared worker pool.
        let slots = Arc::new(Semaphore::new(self.job.concurrency.max(1)));
        let mut stories = JoinSet::new();
        let mut position = 0usize;

        while let Some(url) = rx.recv().await {
            if self.deps.stop.is_stopped() {
                break;
            }
            let Ok(slot) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };
            let crawler = Arc::clone(&crawler);
            let index = position;
            position += 1;
            stories.spawn(async move {
                let _slot = slot;
                (index, crawler.crawl(&url).await)
            });
        }
        drop(rx);

        let walked = walk.await;

        let mut finished = Vec::new();
        while let Some(joined) = stories.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(e) => tracing::error!("Story task failed: {}", e),
            }
        }
        finished.sort_by_key(|(index, _)| *index);
        report
            .stories
            .extend(finished.into_iter().map(|(_, story)| story));

        report.listing = Some(walked??);
        Ok(())
    }
}

/// Result of one chapter task
#[derive(Debug)]
enum ChapterOutcome {
    Fetched(ChapterRecord),

    /// The chapter URL answered 404/410/403 or the page carried no chapter body
    Missing { number: u32, url: Url },

    /// Retries exhausted or a fatal error
    Failed { number: u32, url: Url, reason: String },
}

impl ChapterOutcome {
    fn number(&self) -> u32 {
        match self {
            ChapterOutcome::Fetched(chapter) => chapter.chapter_number,
            ChapterOutcome::Missing { number, .. } | ChapterOutcome::Failed { number, .. } => *number,
        }
    }
}

/// Accumulated state of one story's chapter dispatch
///
/// The end of the story is the lowest-numbered missing chapter, whatever order
/// the fetches finish in. A fetched chapter is held back until every
/// lower-numbered fetch has settled, so nothing past the end is ever persisted.
#[derive(Debug, Default)]
struct ChapterRun {
    /// Persisted chapters
    chapters: Vec<ChapterRecord>,

    /// Fetched chapters waiting for lower-numbered fetches to settle
    held: Vec<ChapterRecord>,

    /// Dispatched chapter numbers without an outcome yet
    in_flight: BTreeMap<u32, usize>,

    /// Chapters above this number are past the end of the story
    cutoff: Option<u32>,

    /// Numbers of chapters that may succeed on a later run
    failed: Vec<u32>,

    /// Chapter tasks that died without an outcome
    lost: usize,

    /// Selected chapters past the cutoff (undispatched or discarded)
    beyond_end: usize,

    /// Unnumbered chapters that are missing
    skipped: usize,

    stopped: bool,
}

impl ChapterRun {
    fn is_past_end(&self, number: u32) -> bool {
        self.cutoff.is_some_and(|cutoff| number > cutoff)
    }

    fn dispatched(&mut self, number: u32) {
        *self.in_flight.entry(number).or_default() += 1;
    }

    fn settled(&mut self, number: u32) {
        if let Some(count) = self.in_flight.get_mut(&number) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(&number);
            }
        }
    }

    /// Takes the held chapters no pending fetch can push past the end
    ///
    /// With `all`, pending fetches are ignored (the dispatch is drained).
    fn take_ready(&mut self, all: bool) -> Vec<ChapterRecord> {
        let floor = if all {
            None
        } else {
            self.in_flight.keys().next().copied()
        };
        let (ready, held): (Vec<_>, Vec<_>) = std::mem::take(&mut self.held)
            .into_iter()
            .partition(|chapter| floor.map_or(true, |floor| chapter.chapter_number <= floor));
        self.held = held;

        let (past_end, ready): (Vec<_>, Vec<_>) = ready
            .into_iter()
            .partition(|chapter| self.is_past_end(chapter.chapter_number));
        for chapter in past_end {
            tracing::debug!("Discarding chapter {} past the end", chapter.source_url);
        }
        ready
    }

    /// Failed chapters that are not past the end
    fn failures(&self) -> usize {
        self.failed.iter().filter(|n| !self.is_past_end(**n)).count() + self.lost
    }

    /// Every selected chapter was attempted and ended in success or a permanent skip
    ///
    /// In resume mode, chapters selected past the end leave the story open: the
    /// missing chapter may be a temporary hole rather than the real end.
    fn is_complete(&self, resume: bool) -> bool {
        !self.stopped && self.failures() == 0 && (!resume || self.beyond_end == 0)
    }
}

/// Per-job story worker shared by every story task
struct StoryCrawler {
    job_id: String,
    resume: bool,
    chapter_limit: usize,
    category: Option<String>,
    fetcher: Arc<Fetcher>,
    ledger: Arc<ProgressLedger>,
    store: Arc<dyn Store>,
    index: Option<Arc<dyn SearchIndex>>,
    stop: StopSignal,
    patterns: SitePatterns,
}

impl StoryCrawler {
    fn new(job: &Job, deps: &CrawlDeps, patterns: SitePatterns) -> Self {
        Self {
            job_id: job.id.clone(),
            resume: job.resume,
            chapter_limit: job.chapter_limit,
            category: job.category_slug(&deps.site),
            fetcher: Arc::clone(&deps.fetcher),
            ledger: Arc::clone(&deps.ledger),
            store: Arc::clone(&deps.store),
            index: deps.index.clone(),
            stop: deps.stop.clone(),
            patterns,
        }
    }

    async fn already_done(&self, url: &Url) -> bool {
        self.resume && self.ledger.is_story_done(&self.job_id, url.as_str()).await
    }

    /// Fetches one page under a worker permit; None if the pool is closed
    async fn fetch_page(&self, url: &Url) -> Option<FetchResult> {
        let _worker = self.fetcher.scheduler().acquire_worker().await?;
        Some(self.fetcher.fetch(url).await)
    }

    /// Crawls a story discovered by a listing walk
    async fn crawl(&self, url: &Url) -> StoryReport {
        if self.already_done(url).await {
            tracing::info!("{} already completed, skipping", url);
            return StoryReport::skipped(url.as_str());
        }

        match self.fetch_page(url).await {
            Some(FetchResult::Success {
                final_url, body, ..
            }) => self.crawl_page(url, &final_url, &body).await,
            Some(other) => {
                tracing::warn!("Story {} failed: {}", url, other.describe());
                StoryReport::failed(url.as_str(), other.describe())
            }
            None => StoryReport::failed(url.as_str(), "worker pool closed"),
        }
    }

    /// Crawls a story whose first page has already been fetched
    async fn crawl_page(&self, story_url: &Url, page_url: &Url, body: &str) -> StoryReport {
        let page = parse_story(body, page_url, &self.patterns);
        let story_id = story_id(story_url.as_str());

        let mut report = StoryReport::new(story_url.as_str(), StoryStatus::Partial);
        report.title = page.meta.title.clone();
        report.previously_crawled = match self.store.get_crawl_state(&story_id) {
            Ok(state) => state.map(|s| s.last_crawled_chapter),
            Err(e) => {
                tracing::warn!("Could not read crawl state of {}: {}", story_id, e);
                None
            }
        };

        let collector = ChapterCollector::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.ledger),
            self.patterns.clone(),
            self.job_id.clone(),
            self.chapter_limit,
            self.resume,
        );
        let collected = collector.collect(story_url, &page).await;

        if collected.selected.is_empty() {
            if collected.discovered == 0 {
                if !page.meta.is_valid() {
                    report.status = StoryStatus::Failed;
                    report.error = Some("no story metadata or chapter links".to_string());
                } else {
                    report.error = Some("no chapter links found".to_string());
                }
                tracing::warn!("{}: no chapter links found", story_url);
                return report;
            }

            tracing::info!("{}: every selected chapter already done", story_url);
            if self.resume {
                self.ledger
                    .mark_story_done(&self.job_id, story_url.as_str())
                    .await;
            }
            report.status = StoryStatus::Completed;
            return report;
        }

        tracing::info!(
            "{}: fetching {} chapters ({} discovered)",
            page.meta.title,
            collected.selected.len(),
            collected.discovered
        );

        let run = self
            .fetch_chapters(story_url, &story_id, &page.meta.title, collected.selected)
            .await;
        let complete = run.is_complete(self.resume);
        let stopped = run.stopped;
        let failures = run.failures();
        let meta_valid = page.meta.is_valid();
        let fresh = finalize_chapters(run.chapters, &self.patterns);

        report.chapters_added = fresh.len();
        report.starting_chapter = fresh.iter().map(|c| c.chapter_number).min();
        report.last_chapter = fresh.iter().map(|c| c.chapter_number).max();

        if !stopped && !fresh.is_empty() {
            let chapters = finalize_chapters(self.with_stored(&story_id, fresh), &self.patterns);
            let meta = page.meta;
            let record = StoryRecord {
                source_url: story_url.to_string(),
                title: meta.title,
                author: meta.author,
                image_url: meta.image_url,
                description: meta.description,
                genres: meta.genres,
                category: self
                    .category
                    .clone()
                    .or_else(|| category_from_url(story_url, self.patterns.category_prefix())),
                chapters,
                last_updated: Utc::now(),
            };
            self.finalize(&record).await;
        }

        if complete && self.resume {
            self.ledger
                .mark_story_done(&self.job_id, story_url.as_str())
                .await;
        }

        report.status = if report.chapters_added == 0 && !meta_valid {
            StoryStatus::Failed
        } else if complete {
            StoryStatus::Completed
        } else {
            StoryStatus::Partial
        };
        if stopped {
            report.error = Some("stopped before all chapters were fetched".to_string());
        } else if failures > 0 {
            report.error = Some(format!("{} chapters failed", failures));
        } else if !complete {
            report.error = Some(format!(
                "{} chapters past missing chapter {} left for the next run",
                run.beyond_end,
                run.cutoff.unwrap_or_default()
            ));
        }

        tracing::info!(
            "{}: {} ({} chapters, {} skipped, {} failed)",
            report.title,
            report.status,
            report.chapters_added,
            run.skipped,
            failures
        );
        report
    }

    /// Dispatches chapter fetches in ascending order and collects their outcomes
    ///
    /// Outcomes are sent back before the worker permit is released, so after
    /// acquiring a permit every outcome that freed it is already queued and the
    /// cutoff check sees the latest end-of-story information.
    async fn fetch_chapters(
        &self,
        story_url: &Url,
        story_id: &str,
        story_title: &str,
        links: Vec<ChapterLink>,
    ) -> ChapterRun {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let mut run = ChapterRun::default();
        let numbers: Vec<u32> = links.iter().map(|link| link.number).collect();

        for link in links {
            if self.stop.is_stopped() {
                run.stopped = true;
                break;
            }
            let Some(worker) = self.fetcher.scheduler().acquire_worker().await else {
                run.stopped = true;
                break;
            };
            while let Ok(outcome) = rx.try_recv() {
                self.record(story_url, story_id, &mut run, outcome).await;
            }
            if run.is_past_end(link.number) {
                tracing::debug!("{}: end of story at chapter {:?}", story_url, run.cutoff);
                break;
            }

            run.dispatched(link.number);
            let tx = tx.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let story_url = story_url.to_string();
            let story_title = story_title.to_string();
            tasks.spawn(async move {
                let outcome = fetch_chapter(&fetcher, link, story_url, &story_title).await;
                let _ = tx.send(outcome);
                drop(worker);
            });
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            self.record(story_url, story_id, &mut run, outcome).await;
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Chapter task failed: {}", e);
                run.lost += 1;
            }
        }
        for chapter in run.take_ready(true) {
            self.persist(story_url, story_id, &mut run, chapter).await;
        }

        run.beyond_end = numbers.iter().filter(|n| run.is_past_end(**n)).count();
        run
    }

    async fn record(
        &self,
        story_url: &Url,
        story_id: &str,
        run: &mut ChapterRun,
        outcome: ChapterOutcome,
    ) {
        run.settled(outcome.number());
        match outcome {
            ChapterOutcome::Fetched(chapter) => run.held.push(chapter),
            ChapterOutcome::Missing { number: 0, url } => {
                tracing::warn!("Unnumbered chapter {} missing, skipping", url);
                run.skipped += 1;
            }
            ChapterOutcome::Missing { number, url } => {
                if !run.is_past_end(number) {
                    tracing::info!("{}: chapter {} missing ({}), treating as end of story", story_url, number, url);
                    run.cutoff = Some(number);
                }
            }
            ChapterOutcome::Failed { number, url, reason } => {
                tracing::warn!("Chapter {} failed: {}", url, reason);
                run.failed.push(number);
            }
        }

        for chapter in run.take_ready(false) {
            self.persist(story_url, story_id, run, chapter).await;
        }
    }

    async fn persist(&self, story_url: &Url, story_id: &str, run: &mut ChapterRun, chapter: ChapterRecord) {
        if let Err(e) = self
            .store
            .put_chapter(&chapter, story_id, chapter.chapter_number)
        {
            tracing::warn!("Failed to store {}: {}", chapter.source_url, e);
        }
        if self.resume {
            self.ledger
                .mark_chapter_done(&self.job_id, story_url.as_str(), &chapter.source_url)
                .await;
        }
        run.chapters.push(chapter);
    }

    /// Adds the chapters stored by earlier runs, so a resumed story is written whole
    fn with_stored(&self, story_id: &str, fresh: Vec<ChapterRecord>) -> Vec<ChapterRecord> {
        let stored = match self.store.get_chapters(story_id) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Could not read stored chapters of {}: {}", story_id, e);
                Vec::new()
            }
        };
        let mut chapters: Vec<ChapterRecord> = {
            let fresh_urls: HashSet<&str> = fresh.iter().map(|c| c.source_url.as_str()).collect();
            stored
                .into_iter()
                .filter(|c| !fresh_urls.contains(c.source_url.as_str()))
                .collect()
        };
        chapters.extend(fresh);
        chapters
    }

    /// Persists a finalized story and publishes it to the index
    async fn finalize(&self, story: &StoryRecord) {
        if let Err(e) = self.store.put_story(story) {
            tracing::error!("Failed to store story {}: {}", story.source_url, e);
        }
        if let Some(index) = &self.index {
            let published = publish_story(index.as_ref(), story).await;
            tracing::debug!("Indexed {}/{} chapters of {}", published, story.chapters.len(), story.title);
        }
    }
}

async fn fetch_chapter(
    fetcher: &Fetcher,
    link: ChapterLink,
    story_url: String,
    story_title: &str,
) -> ChapterOutcome {
    match fetcher.fetch(&link.url).await {
        FetchResult::Success { body, .. } => {
            match parse_chapter(&body, link.title.as_deref(), story_title) {
                Some(page) => ChapterOutcome::Fetched(ChapterRecord {
                    story_url,
                    chapter_number: link.number,
                    title: page.title,
                    content: page.content,
                    source_url: link.url.to_string(),
                    fetched_at: Utc::now(),
                }),
                None => ChapterOutcome::Missing {
                    number: link.number,
                    url: link.url,
                },
            }
        }
        FetchResult::NotFound { .. } => ChapterOutcome::Missing {
            number: link.number,
            url: link.url,
        },
        other => ChapterOutcome::Failed {
            number: link.number,
            url: link.url,
            reason: other.describe(),
        },
    }
}

/// Orders a story's chapters for finalization
///
/// Drops chapter-list pages that slipped in as chapters, and unnumbered
/// chapters whose title is only a number (pagination anchors), then sorts by
/// chapter number.
pub fn finalize_chapters(mut chapters: Vec<ChapterRecord>, patterns: &SitePatterns) -> Vec<ChapterRecord> {
    chapters.retain(|chapter| {
        let is_page = patterns.is_page_url(&chapter.source_url);
        let is_numeric_title = chapter.chapter_number == 0
            && !chapter.title.is_empty()
            && chapter.title.chars().all(|c| c.is_ascii_digit());
        !is_page && !is_numeric_title
    });
    chapters.sort_by(|a, b| {
        a.chapter_number
            .cmp(&b.chapter_number)
            .then_with(|| a.source_url.cmp(&b.source_url))
    });
    chapters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PolitenessConfig, SiteConfig, UserAgentConfig};
    use crate::crawler::{build_http_client, RetryPolicy, Scheduler};
    use crate::storage::SqliteStore;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn patterns() -> SitePatterns {
        SitePatterns::new(&SiteConfig::default()).unwrap()
    }

    fn record(number: u32, url: &str, title: &str) -> ChapterRecord {
        ChapterRecord {
            story_url: "https://x.vn/t/".to_string(),
            chapter_number: number,
            title: title.to_string(),
            content: "text".to_string(),
            source_url: url.to_string(),
            fetched_at: Utc::now(),
        }
    }

    fn deps(store: Arc<SqliteStore>, ledger: Arc<ProgressLedger>, concurrency: usize) -> CrawlDeps {
        let politeness = PolitenessConfig {
            jitter: false,
            ..PolitenessConfig::default()
        };
        let scheduler = Arc::new(Scheduler::new(concurrency, Duration::ZERO, &politeness));
        let client = build_http_client(&UserAgentConfig::default(), Duration::from_secs(5)).unwrap();
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        CrawlDeps {
            fetcher: Arc::new(Fetcher::new(client, scheduler, policy)),
            ledger,
            store,
            index: None,
            stop: StopSignal::new(),
            site: SiteConfig::default(),
        }
    }

    fn story_job(server: &MockServer, resume: bool) -> Job {
        let mut config = Config::default();
        config.crawler.resume = resume;
        let url = Url::parse(&format!("{}/truyen-a/", server.uri())).unwrap();
        Job::story(url, &config)
    }

    fn story_html(chapters: std::ops::RangeInclusive<u32>) -> String {
        let mut html = String::from(
            r#"<h3 class="title" itemprop="name">Truyện A</h3>
               <a itemprop="author" href="/tac-gia/x/">Tác Giả</a>
               <ul class="list-chapter">"#,
        );
        for n in chapters {
            html.push_str(&format!(
                r#"<li><a href="/truyen-a/chuong-{n}/" title="Chương {n}: Hồi {n}">Chương {n}</a></li>"#
            ));
        }
        html.push_str("</ul>");
        html
    }

    async fn mount_story(server: &MockServer, chapters: std::ops::RangeInclusive<u32>) {
        Mock::given(method("GET"))
            .and(path("/truyen-a/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(story_html(chapters)))
            .mount(server)
            .await;
    }

    async fn mount_chapter(server: &MockServer, n: u32, status: u16) {
        let body = format!(r#"<div class="chapter-c">Nội dung {n}</div>"#);
        Mock::given(method("GET"))
            .and(path(format!("/truyen-a/chuong-{n}/")))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_finalize_chapters_filters_and_sorts() {
        let chapters = vec![
            record(3, "https://x.vn/t/chuong-3/", "Ba"),
            record(0, "https://x.vn/t/trang-2/", "Trang"),
            record(1, "https://x.vn/t/chuong-1/", "Một"),
            record(0, "https://x.vn/t/chuong-abc/", "42"),
            record(0, "https://x.vn/t/chuong-loi-noi-dau/", "Lời nói đầu"),
        ];

        let finalized = finalize_chapters(chapters, &patterns());
        let urls: Vec<&str> = finalized.iter().map(|c| c.source_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://x.vn/t/chuong-loi-noi-dau/",
                "https://x.vn/t/chuong-1/",
                "https://x.vn/t/chuong-3/",
            ]
        );
    }

    #[test]
    fn test_chapter_run_cutoff() {
        let mut run = ChapterRun::default();
        assert!(!run.is_past_end(1000));
        run.cutoff = Some(5);
        assert!(!run.is_past_end(5));
        assert!(run.is_past_end(6));
        assert!(run.is_complete(false));

        // Failures past the end do not count
        run.failed.push(7);
        assert!(run.is_complete(false));
        run.failed.push(4);
        assert!(!run.is_complete(false));
    }

    #[test]
    fn test_chapters_past_end_keep_resumed_story_open() {
        let run = ChapterRun {
            cutoff: Some(3),
            beyond_end: 2,
            ..ChapterRun::default()
        };
        assert!(run.is_complete(false));
        assert!(!run.is_complete(true));
    }

    #[test]
    fn test_held_chapters_wait_for_lower_fetches() {
        let mut run = ChapterRun::default();
        run.dispatched(2);
        run.dispatched(3);
        run.settled(3);
        run.held.push(record(3, "https://x.vn/t/chuong-3/", "Ba"));
        assert!(run.take_ready(false).is_empty());

        // Chapter 2 turns out missing: chapter 3 is past the end
        run.settled(2);
        run.cutoff = Some(2);
        assert!(run.take_ready(false).is_empty());
        assert!(run.held.is_empty());
    }

    #[tokio::test]
    async fn test_missing_chapter_ends_story() {
        let server = MockServer::start().await;
        mount_story(&server, 1..=6).await;
        for n in 1..=3 {
            mount_chapter(&server, n, 200).await;
        }
        mount_chapter(&server, 4, 404).await;
        for n in 5..=6 {
            mount_chapter(&server, n, 404).await;
        }

        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let coordinator = Coordinator::new(
            story_job(&server, false),
            deps(Arc::clone(&store), Arc::new(ProgressLedger::in_memory()), 1),
        )
        .unwrap();
        let report = coordinator.run().await.unwrap();

        let story = &report.stories[0];
        assert_eq!(story.status, StoryStatus::Completed);
        assert_eq!(story.title, "Truyện A");
        assert_eq!(story.chapters_added, 3);
        assert_eq!(story.starting_chapter, Some(1));
        assert_eq!(story.last_chapter, Some(3));

        let chapters = store.get_chapters("truyen-a").unwrap();
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title, "Hồi 1");
    }

    async fn run_delayed_miss(concurrency: usize) -> (StoryReport, Vec<u32>) {
        let server = MockServer::start().await;
        mount_story(&server, 1..=6).await;
        for n in [1, 2, 4, 5, 6] {
            mount_chapter(&server, n, 200).await;
        }
        // Chapter 3 answers last, after the higher chapters have been fetched
        Mock::given(method("GET"))
            .and(path("/truyen-a/chuong-3/"))
            .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let coordinator = Coordinator::new(
            story_job(&server, false),
            deps(Arc::clone(&store), Arc::new(ProgressLedger::in_memory()), concurrency),
        )
        .unwrap();
        let report = coordinator.run().await.unwrap();
        let stored = store
            .get_chapters("truyen-a")
            .unwrap()
            .iter()
            .map(|c| c.chapter_number)
            .collect();
        (report.stories[0].clone(), stored)
    }

    #[tokio::test]
    async fn test_missing_chapter_cutoff_ignores_fetch_timing() {
        for concurrency in [1, 4] {
            let (story, stored) = run_delayed_miss(concurrency).await;
            assert_eq!(story.chapters_added, 2, "concurrency {}", concurrency);
            assert_eq!(story.last_chapter, Some(2), "concurrency {}", concurrency);
            assert_eq!(story.status, StoryStatus::Completed);
            assert_eq!(stored, vec![1, 2], "concurrency {}", concurrency);
        }
    }

    #[tokio::test]
    async fn test_chapter_without_body_ends_story() {
        let server = MockServer::start().await;
        mount_story(&server, 1..=5).await;
        for n in [1, 2, 3, 5] {
            mount_chapter(&server, n, 200).await;
        }
        Mock::given(method("GET"))
            .and(path("/truyen-a/chuong-4/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>no body</p>"))
            .mount(&server)
            .await;

        let coordinator = Coordinator::new(
            story_job(&server, false),
            deps(
                Arc::new(SqliteStore::new_in_memory().unwrap()),
                Arc::new(ProgressLedger::in_memory()),
                1,
            ),
        )
        .unwrap();
        let report = coordinator.run().await.unwrap();

        let story = &report.stories[0];
        assert_eq!(story.chapters_added, 3);
        assert_eq!(story.last_chapter, Some(3));
        assert_eq!(story.status, StoryStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_cutoff_leaves_story_open() {
        let server = MockServer::start().await;
        mount_story(&server, 1..=5).await;
        for n in [1, 2, 4, 5] {
            mount_chapter(&server, n, 200).await;
        }
        mount_chapter(&server, 3, 404).await;

        let ledger = Arc::new(ProgressLedger::in_memory());
        let coordinator = Coordinator::new(
            story_job(&server, true),
            deps(Arc::new(SqliteStore::new_in_memory().unwrap()), Arc::clone(&ledger), 1),
        )
        .unwrap();
        let report = coordinator.run().await.unwrap();

        let story = &report.stories[0];
        assert_eq!(story.status, StoryStatus::Partial);
        assert_eq!(story.chapters_added, 2);

        let url = format!("{}/truyen-a/", server.uri());
        assert!(!ledger.is_story_done("truyen-a", &url).await);
        for n in [1, 2] {
            let chapter = format!("{}/truyen-a/chuong-{}/", server.uri(), n);
            assert!(ledger.is_chapter_done("truyen-a", &url, &chapter).await);
        }
        for n in [3, 4, 5] {
            let chapter = format!("{}/truyen-a/chuong-{}/", server.uri(), n);
            assert!(!ledger.is_chapter_done("truyen-a", &url, &chapter).await);
        }
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_story_partial() {
        let server = MockServer::start().await;
        mount_story(&server, 1..=2).await;
        mount_chapter(&server, 1, 200).await;
        mount_chapter(&server, 2, 503).await;

        let ledger = Arc::new(ProgressLedger::in_memory());
        let coordinator = Coordinator::new(
            story_job(&server, true),
            deps(Arc::new(SqliteStore::new_in_memory().unwrap()), Arc::clone(&ledger), 2),
        )
        .unwrap();
        let report = coordinator.run().await.unwrap();

        let story = &report.stories[0];
        assert_eq!(story.status, StoryStatus::Partial);
        assert_eq!(story.chapters_added, 1);

        let url = format!("{}/truyen-a/", server.uri());
        assert!(!ledger.is_story_done("truyen-a", &url).await);
        assert!(
            ledger
                .is_chapter_done("truyen-a", &url, &format!("{}/truyen-a/chuong-1/", server.uri()))
                .await
        );
    }

    #[tokio::test]
    async fn test_resume_skips_finished_story() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let ledger = Arc::new(ProgressLedger::in_memory());
        let url = format!("{}/truyen-a/", server.uri());
        ledger.mark_story_done("truyen-a", &url).await;

        let coordinator = Coordinator::new(
            story_job(&server, true),
            deps(Arc::new(SqliteStore::new_in_memory().unwrap()), ledger, 2),
        )
        .unwrap();
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.stories.len(), 1);
        assert_eq!(report.stories[0].status, StoryStatus::Skipped);
    }

    #[tokio::test]
    async fn test_unreachable_story_is_start_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let coordinator = Coordinator::new(
            story_job(&server, false),
            deps(
                Arc::new(SqliteStore::new_in_memory().unwrap()),
                Arc::new(ProgressLedger::in_memory()),
                2,
            ),
        )
        .unwrap();

        assert!(matches!(
            coordinator.run().await,
            Err(SagaError::StartFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_page_without_metadata_or_chapters_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/truyen-a/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<div id="list-chapter"></div>"#),
            )
            .mount(&server)
            .await;

        let coordinator = Coordinator::new(
            story_job(&server, false),
            deps(
                Arc::new(SqliteStore::new_in_memory().unwrap()),
                Arc::new(ProgressLedger::in_memory()),
                2,
            ),
        )
        .unwrap();
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.stories[0].status, StoryStatus::Failed);
        assert_eq!(report.stories[0].chapters_added, 0);
    }

    #[tokio::test]
    async fn test_stop_before_dispatch_keeps_story_open() {
        let server = MockServer::start().await;
        mount_story(&server, 1..=3).await;
        Mock::given(method("GET"))
            .and(path("/truyen-a/chuong-1/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let ledger = Arc::new(ProgressLedger::in_memory());
        let deps = deps(
            Arc::new(SqliteStore::new_in_memory().unwrap()),
            Arc::clone(&ledger),
            2,
        );
        let stop = deps.stop.clone();
        let coordinator = Coordinator::new(story_job(&server, true), deps).unwrap();

        let crawler = StoryCrawler::new(&coordinator.job, &coordinator.deps, patterns());
        stop.request_stop();
        let url = Url::parse(&format!("{}/truyen-a/", server.uri())).unwrap();
        let report = crawler.crawl_page(&url, &url, &story_html(1..=3)).await;

        assert_eq!(report.status, StoryStatus::Partial);
        assert_eq!(report.chapters_added, 0);
        assert!(!ledger.is_story_done("truyen-a", url.as_str()).await);
    }
}
