use serde::Deserialize;

/// Main configuration structure for Saga-Crawler
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub politeness: PolitenessConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub site: SiteConfig,
    pub output: OutputConfig,
    pub index: IndexConfig,
}

/// Crawl scope and worker pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Size of the per-job worker pool (concurrent page fetches)
    pub concurrency: u32,

    /// Chapters to fetch per story (0 means the default cap)
    pub chapter_limit: u32,

    /// Maximum number of stories taken from a category (0 means unbounded)
    pub max_stories: u32,

    /// Number of listing pages to walk in category mode
    pub listing_pages: u32,

    /// Consult and update the progress ledger
    pub resume: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            chapter_limit: 0,
            max_stories: 0,
            listing_pages: 2,
            resume: false,
        }
    }
}

/// Request pacing and retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolitenessConfig {
    /// Minimum time between requests to the same host (milliseconds)
    pub delay_ms: u64,

    /// Randomize the delay between 0.5x and 1.5x
    pub jitter: bool,

    /// Maximum in-flight requests per host
    pub per_host_concurrency: u32,

    /// Extra attempts after a retryable failure
    pub max_retries: u32,

    /// First backoff step (milliseconds), doubled on every retry
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff sleep (milliseconds)
    pub backoff_max_ms: u64,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,

    /// HTTP statuses that are retried
    pub retry_statuses: Vec<u16>,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            delay_ms: 100,
            jitter: true,
            per_host_concurrency: 4,
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            timeout_secs: 10,
            retry_statuses: vec![500, 502, 503, 504, 522, 524, 408, 429],
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,

    /// Email address for crawler-related contact
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "SagaCrawler".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/saga-crawler".to_string(),
            contact_email: "crawler@example.com".to_string(),
        }
    }
}

/// URL layout of the target site
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Site root, used to build category URLs
    pub base_url: String,

    /// Path segment that precedes a category slug (`/the-loai/<slug>/`)
    pub category_prefix: String,

    /// Marker that precedes a chapter number in chapter URLs (`chuong-12`)
    pub chapter_marker: String,

    /// Marker that precedes a page number in paginated URLs (`trang-3`)
    pub page_marker: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://truyenfull.vision".to_string(),
            category_prefix: "the-loai".to_string(),
            chapter_marker: "chuong".to_string(),
            page_marker: "trang".to_string(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Directory holding one progress document per job id
    pub progress_dir: String,

    /// Directory for finalized story JSON files (disabled when absent)
    pub story_dir: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "data/saga.db".to_string(),
            progress_dir: "data/progress".to_string(),
            story_dir: Some("data".to_string()),
        }
    }
}

/// Search index configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IndexConfig {
    /// Publish finalized chapters to the index
    pub enabled: bool,

    /// Base URL of the Elasticsearch-compatible server
    pub url: String,

    /// Index name
    pub name: String,

    /// Optional JSON file with index settings and mappings
    pub settings_path: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:9200".to_string(),
            name: "demonstration-2".to_string(),
            settings_path: None,
        }
    }
}
