//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock novel sites and run whole jobs
//! end-to-end against SQLite, JSON files and the progress ledger in temporary
//! directories.

use saga_crawler::config::{Config, Job};
use saga_crawler::crawler::{build_http_client, Coordinator, StopSignal};
use saga_crawler::ledger::ProgressLedger;
use saga_crawler::runner::SharedDeps;
use saga_crawler::storage::{JsonStoryWriter, SqliteStore, StoreSet};
use saga_crawler::{JobReport, StoryStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stores and ledger of one test run, rooted in a temporary directory
struct Harness {
    dir: TempDir,
    sqlite: Arc<SqliteStore>,
    ledger: Arc<ProgressLedger>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let sqlite = Arc::new(SqliteStore::new(&dir.path().join("saga.db")).unwrap());
        let ledger = Arc::new(ProgressLedger::with_dir(dir.path().join("progress")));
        Self { dir, sqlite, ledger }
    }

    fn story_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("stories")
    }

    fn shared(&self, config: &Config) -> SharedDeps {
        let store = StoreSet::new()
            .with(self.sqlite.clone())
            .with(Arc::new(JsonStoryWriter::new(self.story_dir())));
        SharedDeps {
            client: build_http_client(&config.user_agent, Duration::from_secs(5)).unwrap(),
            politeness: config.politeness.clone(),
            ledger: Arc::clone(&self.ledger),
            store: Arc::new(store),
            index: None,
            stop: StopSignal::new(),
            site: config.site.clone(),
        }
    }

    async fn run(&self, job: Job, config: &Config) -> JobReport {
        let deps = self.shared(config).for_job(&job);
        Coordinator::new(job, deps).unwrap().run().await.unwrap()
    }
}

/// Creates a test configuration pointed at the mock server
fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.site.base_url = server.uri();
    config.crawler.concurrency = 4;
    config.politeness.delay_ms = 0;
    config.politeness.jitter = false;
    config.politeness.max_retries = 0;
    config.politeness.backoff_base_ms = 10;
    config.politeness.backoff_max_ms = 50;
    config
}

fn story_job(server: &MockServer, slug: &str, config: &Config) -> Job {
    let url = Url::parse(&format!("{}/{}/", server.uri(), slug)).unwrap();
    Job::story(url, config)
}

/// A story page listing the given chapters, with optional chapter-list pages
fn story_page(slug: &str, title: &str, chapters: &[u32], list_pages: &[u32]) -> String {
    let mut html = format!(
        r#"<html><body>
        <h3 class="title" itemprop="name">{title}</h3>
        <div class="info"><a itemprop="author" href="/tac-gia/nhi-can/">Nhĩ Căn</a>
        <a itemprop="genre" href="/the-loai/tien-hiep/">Tiên Hiệp</a></div>
        <div class="desc-text">Giới thiệu.</div>
        <div id="list-chapter"><ul class="list-chapter">"#
    );
    for n in chapters {
        html.push_str(&format!(
            r#"<li><a href="/{slug}/chuong-{n}/" title="{title} - Chương {n}">Chương {n}</a></li>"#
        ));
    }
    html.push_str("</ul>");
    if !list_pages.is_empty() {
        html.push_str(r#"<ul class="pagination">"#);
        for p in list_pages {
            html.push_str(&format!(
                r#"<li><a href="/{slug}/trang-{p}/#list-chapter">{p}</a></li>"#
            ));
        }
        html.push_str("</ul>");
    }
    html.push_str("</div></body></html>");
    html
}

fn chapter_page(n: u32) -> String {
    format!(
        r#"<html><body><h2 class="chapter-title">Chương {n}</h2>
        <div class="chapter-c">Nội dung chương {n}.<script>ads()</script></div></body></html>"#
    )
}

async fn mount_page(server: &MockServer, at: &str, body: String, expected: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body));
    let mock = match expected {
        Some(n) => mock.expect(n),
        None => mock,
    };
    mock.mount(server).await;
}

async fn mount_chapters(server: &MockServer, slug: &str, numbers: impl IntoIterator<Item = u32>) {
    for n in numbers {
        mount_page(server, &format!("/{}/chuong-{}/", slug, n), chapter_page(n), None).await;
    }
}

/// Everything not mounted explicitly is missing
async fn mount_not_found(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn read_story_file(path: &Path) -> serde_json::Value {
    let data = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&data).unwrap()
}

#[tokio::test]
async fn test_story_ends_at_first_missing_chapter() {
    let server = MockServer::start().await;
    let all: Vec<u32> = (1..=20).collect();
    mount_page(&server, "/tien-nghich/", story_page("tien-nghich", "Tiên Nghịch", &all, &[]), None).await;
    mount_chapters(&server, "tien-nghich", 1..=12).await;
    mount_not_found(&server).await;

    let harness = Harness::new();
    let config = test_config(&server);
    let report = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;

    let story = &report.stories[0];
    assert_eq!(story.status, StoryStatus::Completed);
    assert_eq!(story.chapters_added, 12);
    assert_eq!(story.starting_chapter, Some(1));
    assert_eq!(story.last_chapter, Some(12));
    assert_eq!(story.previously_crawled, None);

    let chapters = harness.sqlite.get_chapters("tien-nghich").unwrap();
    assert_eq!(chapters.len(), 12);
    assert_eq!(chapters[0].title, "Chương 1");
    assert_eq!(chapters[0].content, "Nội dung chương 1.");

    let file = read_story_file(&harness.story_dir().join("tien-hiep/tien-nghich.json"));
    assert_eq!(file["title"], "Tiên Nghịch");
    assert_eq!(file["author"], "Nhĩ Căn");
    assert_eq!(file["chapters"].as_array().unwrap().len(), 12);
    assert_eq!(file["chapters"][11]["chapter_number"], 12);
}

#[tokio::test]
async fn test_resume_skips_finished_story_without_requests() {
    let server = MockServer::start().await;
    mount_page(&server, "/tien-nghich/", story_page("tien-nghich", "Tiên Nghịch", &[1, 2, 3], &[]), Some(1)).await;
    mount_page(&server, "/tien-nghich/chuong-1/", chapter_page(1), Some(1)).await;
    mount_page(&server, "/tien-nghich/chuong-2/", chapter_page(2), Some(1)).await;
    Mock::given(method("GET"))
        .and(path("/tien-nghich/chuong-3/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let mut config = test_config(&server);
    config.crawler.resume = true;
    config.crawler.concurrency = 1;

    let first = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;
    assert_eq!(first.stories[0].status, StoryStatus::Completed);
    assert_eq!(first.stories[0].chapters_added, 2);

    let second = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;
    assert_eq!(second.stories[0].status, StoryStatus::Skipped);
    assert_eq!(second.chapters_added(), 0);
}

#[tokio::test]
async fn test_resume_fetches_only_failed_chapters() {
    let server = MockServer::start().await;
    mount_page(&server, "/tien-nghich/", story_page("tien-nghich", "Tiên Nghịch", &[1, 2, 3], &[]), Some(2)).await;
    mount_page(&server, "/tien-nghich/chuong-1/", chapter_page(1), Some(1)).await;
    mount_page(&server, "/tien-nghich/chuong-3/", chapter_page(3), Some(1)).await;
    Mock::given(method("GET"))
        .and(path("/tien-nghich/chuong-2/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/tien-nghich/chuong-2/", chapter_page(2), Some(1)).await;

    let harness = Harness::new();
    let mut config = test_config(&server);
    config.crawler.resume = true;

    let first = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;
    assert_eq!(first.stories[0].status, StoryStatus::Partial);
    assert_eq!(first.stories[0].chapters_added, 2);

    let second = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;
    let story = &second.stories[0];
    assert_eq!(story.status, StoryStatus::Completed);
    assert_eq!(story.chapters_added, 1);
    assert_eq!(story.starting_chapter, Some(2));
    assert_eq!(story.previously_crawled, Some(3));

    assert_eq!(harness.sqlite.get_chapters("tien-nghich").unwrap().len(), 3);

    let url = format!("{}/tien-nghich/", server.uri());
    assert!(harness.ledger.is_story_done("tien-nghich", &url).await);

    let file = read_story_file(&harness.story_dir().join("tien-hiep/tien-nghich.json"));
    assert_eq!(file["chapters"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_category_listing_respects_page_limit() {
    let server = MockServer::start().await;
    let listing = |stories: &[&str], next: &str| {
        let mut html = String::new();
        for s in stories {
            html.push_str(&format!(r#"<h3 class="truyen-title"><a href="/{s}/">{s}</a></h3>"#));
        }
        html.push_str(&format!(
            r#"<ul class="pagination"><li><a href="/the-loai/tien-hiep/{next}/">{next}</a></li></ul>"#
        ));
        html
    };
    mount_page(&server, "/the-loai/tien-hiep/", listing(&["a", "b"], "trang-2"), Some(1)).await;
    mount_page(&server, "/the-loai/tien-hiep/trang-2/", listing(&["b", "c"], "trang-3"), Some(1)).await;
    mount_page(&server, "/the-loai/tien-hiep/trang-3/", listing(&["d"], "trang-4"), Some(0)).await;
    for slug in ["a", "b", "c"] {
        mount_page(&server, &format!("/{}/", slug), story_page(slug, slug, &[1], &[]), Some(1)).await;
        mount_chapters(&server, slug, [1]).await;
    }
    mount_not_found(&server).await;

    let harness = Harness::new();
    let config = test_config(&server);
    let job = Job::category("tien-hiep", &config);
    assert_eq!(job.listing_pages, 2);

    let report = harness.run(job, &config).await;

    let listing = report.listing.unwrap();
    assert_eq!(listing.pages_fetched, 2);
    assert_eq!(listing.stories_found, 3);
    let urls: Vec<String> = report.stories.iter().map(|s| s.url.clone()).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/a/", server.uri()),
            format!("{}/b/", server.uri()),
            format!("{}/c/", server.uri()),
        ]
    );
    assert!(report.stories.iter().all(|s| s.status == StoryStatus::Completed));
    assert!(harness.story_dir().join("tien-hiep/b.json").exists());
    assert_eq!(harness.sqlite.stats().unwrap().stories, 3);
}

#[tokio::test]
async fn test_paginated_chapter_list_is_ordered() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/tien-nghich/",
        story_page("tien-nghich", "Tiên Nghịch", &[2, 1], &[2, 3]),
        None,
    )
    .await;
    mount_page(
        &server,
        "/tien-nghich/trang-2/",
        story_page("tien-nghich", "Tiên Nghịch", &[4, 3], &[]),
        None,
    )
    .await;
    mount_page(
        &server,
        "/tien-nghich/trang-3/",
        story_page("tien-nghich", "Tiên Nghịch", &[5], &[]),
        None,
    )
    .await;
    mount_chapters(&server, "tien-nghich", 1..=5).await;
    mount_not_found(&server).await;

    let harness = Harness::new();
    let config = test_config(&server);
    let report = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;
    assert_eq!(report.stories[0].chapters_added, 5);

    let file = read_story_file(&harness.story_dir().join("tien-hiep/tien-nghich.json"));
    let numbers: Vec<u64> = file["chapters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["chapter_number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_chapter_limit_caps_selection() {
    let server = MockServer::start().await;
    let all: Vec<u32> = (1..=10).collect();
    mount_page(&server, "/tien-nghich/", story_page("tien-nghich", "Tiên Nghịch", &all, &[]), None).await;
    mount_chapters(&server, "tien-nghich", 1..=3).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/tien-nghich/chuong-([4-9]|10)/$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(chapter_page(0)))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let mut config = test_config(&server);
    config.crawler.chapter_limit = 3;
    let report = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;

    assert_eq!(report.stories[0].chapters_added, 3);
    assert_eq!(report.stories[0].last_chapter, Some(3));
}

#[tokio::test]
async fn test_retry_after_delays_next_attempt() {
    let server = MockServer::start().await;
    mount_page(&server, "/tien-nghich/", story_page("tien-nghich", "Tiên Nghịch", &[1], &[]), None).await;
    Mock::given(method("GET"))
        .and(path("/tien-nghich/chuong-1/"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "2"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_chapters(&server, "tien-nghich", [1]).await;

    let harness = Harness::new();
    let mut config = test_config(&server);
    config.politeness.max_retries = 1;

    let started = Instant::now();
    let report = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(report.stories[0].status, StoryStatus::Completed);
    assert_eq!(report.stories[0].chapters_added, 1);
}

#[tokio::test]
async fn test_missing_metadata_uses_sentinel() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/vo-danh/",
        r#"<h1>Vô Danh</h1><ul class="list-chapter"><li><a href="/vo-danh/chuong-1/">Chương 1</a></li></ul>"#
            .to_string(),
        None,
    )
    .await;
    mount_page(&server, "/vo-danh/chuong-1/", chapter_page(1), None).await;

    let harness = Harness::new();
    let config = test_config(&server);
    let report = harness
        .run(story_job(&server, "vo-danh", &config), &config)
        .await;
    assert_eq!(report.stories[0].status, StoryStatus::Completed);

    let file = read_story_file(&harness.story_dir().join("unknown/vo-danh.json"));
    assert_eq!(file["title"], "Vô Danh");
    assert_eq!(file["author"], "Not found");
    assert_eq!(file["description"], "Not found");
    assert_eq!(file["image_url"], "Not found");
}

#[tokio::test]
async fn test_missing_chapter_ends_story_under_concurrency() {
    let server = MockServer::start().await;
    let all: Vec<u32> = (1..=20).collect();
    mount_page(&server, "/tien-nghich/", story_page("tien-nghich", "Tiên Nghịch", &all, &[]), None).await;
    mount_chapters(&server, "tien-nghich", (1..=12).chain(14..=20)).await;
    // Chapter 13 answers after the workers have moved past it
    Mock::given(method("GET"))
        .and(path("/tien-nghich/chuong-13/"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let config = test_config(&server);
    assert!(config.crawler.concurrency > 1);
    let report = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;

    let story = &report.stories[0];
    assert_eq!(story.status, StoryStatus::Completed);
    assert_eq!(story.chapters_added, 12);
    assert_eq!(story.last_chapter, Some(12));
    assert_eq!(harness.sqlite.get_chapters("tien-nghich").unwrap().len(), 12);

    let file = read_story_file(&harness.story_dir().join("tien-hiep/tien-nghich.json"));
    assert_eq!(file["chapters"].as_array().unwrap().len(), 12);
}

#[tokio::test]
async fn test_chapter_page_without_body_ends_story() {
    let server = MockServer::start().await;
    mount_page(&server, "/tien-nghich/", story_page("tien-nghich", "Tiên Nghịch", &[1, 2, 3, 4, 5], &[]), None).await;
    mount_chapters(&server, "tien-nghich", 1..=3).await;
    mount_page(
        &server,
        "/tien-nghich/chuong-4/",
        "<html><body><p>Chương này chưa có nội dung.</p></body></html>".to_string(),
        Some(1),
    )
    .await;
    mount_page(&server, "/tien-nghich/chuong-5/", chapter_page(5), Some(0)).await;

    let harness = Harness::new();
    let mut config = test_config(&server);
    config.crawler.concurrency = 1;
    let report = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;

    let story = &report.stories[0];
    assert_eq!(story.status, StoryStatus::Completed);
    assert_eq!(story.chapters_added, 3);
    assert_eq!(story.last_chapter, Some(3));
}

#[tokio::test]
async fn test_resume_retries_chapters_past_a_missing_one() {
    let server = MockServer::start().await;
    mount_page(&server, "/tien-nghich/", story_page("tien-nghich", "Tiên Nghịch", &[1, 2, 3, 4, 5], &[]), Some(2)).await;
    mount_page(&server, "/tien-nghich/chuong-1/", chapter_page(1), Some(1)).await;
    mount_page(&server, "/tien-nghich/chuong-2/", chapter_page(2), Some(1)).await;
    Mock::given(method("GET"))
        .and(path("/tien-nghich/chuong-3/"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/tien-nghich/chuong-3/", chapter_page(3), Some(1)).await;
    mount_page(&server, "/tien-nghich/chuong-4/", chapter_page(4), Some(1)).await;
    mount_page(&server, "/tien-nghich/chuong-5/", chapter_page(5), Some(1)).await;

    let harness = Harness::new();
    let mut config = test_config(&server);
    config.crawler.resume = true;
    config.crawler.concurrency = 1;
    let url = format!("{}/tien-nghich/", server.uri());

    let first = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;
    assert_eq!(first.stories[0].status, StoryStatus::Partial);
    assert_eq!(first.stories[0].chapters_added, 2);
    assert!(!harness.ledger.is_story_done("tien-nghich", &url).await);

    let second = harness
        .run(story_job(&server, "tien-nghich", &config), &config)
        .await;
    let story = &second.stories[0];
    assert_eq!(story.status, StoryStatus::Completed);
    assert_eq!(story.chapters_added, 3);
    assert_eq!(story.starting_chapter, Some(3));
    assert!(harness.ledger.is_story_done("tien-nghich", &url).await);

    // The story file is rewritten whole, not duplicated
    let dir = harness.story_dir().join("tien-hiep");
    assert!(!dir.join("tien-nghich-1.json").exists());
    let file = read_story_file(&dir.join("tien-nghich.json"));
    let numbers: Vec<u64> = file["chapters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["chapter_number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    assert_eq!(harness.sqlite.get_chapters("tien-nghich").unwrap().len(), 5);
}
