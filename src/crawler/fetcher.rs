//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Per-host politeness around every attempt
//! - Retry with exponential backoff and Retry-After
//! - Outcome classification

use crate::config::{PolitenessConfig, UserAgentConfig};
use crate::crawler::Scheduler;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Result of a fetch operation
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success {
        /// Final URL after redirects
        final_url: Url,
        /// HTTP status code
        status: u16,
        /// Page body content
        body: String,
    },

    /// The server answered with a status that is not worth retrying
    NotFound {
        /// The HTTP status code
        status: u16,
    },

    /// Retries exhausted on a retryable status or network error
    TransientError {
        /// Description of the last failure
        error: String,
        /// Number of requests sent
        attempts: u32,
    },

    /// Failure that retrying cannot fix (unreadable body, bad request)
    FatalError {
        /// Error description
        error: String,
    },
}

impl FetchResult {
    #[cfg(test)]
    fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    /// Short description for logs and start-failure messages
    pub fn describe(&self) -> String {
        match self {
            FetchResult::Success { status, .. } => format!("HTTP {}", status),
            FetchResult::NotFound { status } => format!("not found (HTTP {})", status),
            FetchResult::TransientError { error, attempts } => {
                format!("{} after {} attempts", error, attempts)
            }
            FetchResult::FatalError { error } => error.clone(),
        }
    }
}

/// When and how often failed requests are retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,

    /// First backoff step, doubled on every retry
    pub backoff_base: Duration,

    /// Upper bound for one backoff sleep
    pub backoff_max: Duration,

    /// HTTP statuses that are retried
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_config(config: &PolitenessConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            retry_statuses: config.retry_statuses.clone(),
        }
    }

    /// Sleep before retry number `retry` (0-based): `min(base * 2^retry, max)`
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PolitenessConfig::default())
    }
}

/// Parses a Retry-After header given in seconds (integer or fractional)
///
/// HTTP-date values and negative or non-finite numbers are ignored.
///
/// # Examples
///
/// ```
/// use saga_crawler::crawler::parse_retry_after;
/// use std::time::Duration;
///
/// assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
/// assert_eq!(parse_retry_after("1.5"), Some(Duration::from_millis(1500)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Per-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use saga_crawler::config::UserAgentConfig;
/// use saga_crawler::crawler::build_http_client;
/// use std::time::Duration;
///
/// let client = build_http_client(&UserAgentConfig::default(), Duration::from_secs(10)).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));

    Client::builder()
        .user_agent(config.header_value())
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Outcome of a single request
enum Attempt {
    Done(FetchResult),
    Retry {
        error: String,
        retry_after: Option<Duration>,
    },
}

/// Fetches pages politely, retrying transient failures
///
/// Every attempt holds a host permit and waits for its request slot; the permit
/// is released while backing off so other requests to the host can proceed.
pub struct Fetcher {
    client: Client,
    scheduler: Arc<Scheduler>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: Client, scheduler: Arc<Scheduler>, policy: RetryPolicy) -> Self {
        Self {
            client,
            scheduler,
            policy,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Fetches a URL with politeness and retry handling
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Success (unreadable body → FatalError) |
    /// | Retryable status | Retry; Retry-After pauses the host |
    /// | Timeout / connection error | Retry with backoff |
    /// | Any other status | Immediate → NotFound |
    /// | Retries exhausted | TransientError |
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    ///
    /// # Returns
    ///
    /// A FetchResult describing the outcome; this never fails.
    pub async fn fetch(&self, url: &Url) -> FetchResult {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let (error, retry_after) = match self.attempt(url).await {
                Attempt::Done(result) => return result,
                Attempt::Retry { error, retry_after } => (error, retry_after),
            };

            if attempts > self.policy.max_retries {
                tracing::warn!("Giving up on {} after {} attempts: {}", url, attempts, error);
                return FetchResult::TransientError { error, attempts };
            }

            let wait = match retry_after {
                Some(wait) => {
                    self.scheduler.defer_host(url, wait);
                    wait
                }
                None => self.policy.backoff(attempts - 1),
            };

            tracing::debug!(
                "Retrying {} in {:?} (attempt {}): {}",
                url,
                wait,
                attempts,
                error
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn attempt(&self, url: &Url) -> Attempt {
        let _host_permit = self.scheduler.acquire_host(url).await;
        self.scheduler.wait_turn(url).await;

        tracing::debug!("GET {}", url);
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) if is_retryable_error(&e) => {
                return Attempt::Retry {
                    error: e.to_string(),
                    retry_after: None,
                }
            }
            Err(e) => {
                return Attempt::Done(FetchResult::FatalError {
                    error: e.to_string(),
                })
            }
        };

        let status = response.status();
        if status.is_success() {
            let final_url = response.url().clone();
            return match response.text().await {
                Ok(body) => Attempt::Done(FetchResult::Success {
                    final_url,
                    status: status.as_u16(),
                    body,
                }),
                // A stalled or cut-off body is a network failure like any other
                Err(e) if is_retryable_error(&e) || e.is_body() => Attempt::Retry {
                    error: format!("body read failed: {}", e),
                    retry_after: None,
                },
                Err(e) => Attempt::Done(FetchResult::FatalError {
                    error: format!("unreadable body: {}", e),
                }),
            };
        }

        if !self.policy.is_retryable_status(status.as_u16()) {
            tracing::debug!("{} answered HTTP {}", url, status.as_u16());
            return Attempt::Done(FetchResult::NotFound {
                status: status.as_u16(),
            });
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        Attempt::Retry {
            error: format!("HTTP {}", status.as_u16()),
            retry_after,
        }
    }
}

fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}
