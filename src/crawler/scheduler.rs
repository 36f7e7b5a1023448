//! Worker pool and per-host pacing
//!
//! This module handles:
//! - The job-wide worker pool (one permit per unit of work)
//! - Per-host in-flight caps
//! - Per-host request spacing with optional jitter
//! - Host-wide pauses requested through Retry-After

use crate::config::{Job, PolitenessConfig};
use crate::state::HostState;
use crate::url::host_key;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

/// Request counts of a job, summed over hosts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestTotals {
    pub requests: u64,
    pub deferrals: u64,
}

/// Scheduler shared by every task of one job
///
/// Dispatchers take a worker permit before spawning a unit of work and move it
/// into the task, so at most `concurrency` listing, story-list and chapter
/// fetches of the job are in flight at once. Host permits and request slots are
/// taken by the fetcher around each individual request.
pub struct Scheduler {
    /// Job-wide worker pool
    pool: Arc<Semaphore>,

    /// Size of the worker pool
    concurrency: usize,

    /// Per-host politeness state
    hosts: Mutex<HashMap<String, HostState>>,

    /// Base spacing between requests to one host
    delay: Duration,

    /// Randomize the spacing between 0.5x and 1.5x
    jitter: bool,

    /// In-flight cap per host
    per_host_concurrency: usize,
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `concurrency` - Size of the worker pool (at least 1)
    /// * `delay` - Base spacing between requests to the same host
    /// * `politeness` - Jitter and per-host settings
    pub fn new(concurrency: usize, delay: Duration, politeness: &PolitenessConfig) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            pool: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            hosts: Mutex::new(HashMap::new()),
            delay,
            jitter: politeness.jitter,
            per_host_concurrency: politeness.per_host_concurrency.max(1) as usize,
        }
    }

    /// Creates the scheduler for a job, using its pool size and delay
    pub fn for_job(job: &Job, politeness: &PolitenessConfig) -> Self {
        Self::new(job.concurrency, job.delay, politeness)
    }

    /// Size of the worker pool
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[cfg(test)]
    fn available_workers(&self) -> usize {
        self.pool.available_permits()
    }

    /// Waits for a worker permit
    ///
    /// The pool is never closed, so this only returns None if the scheduler is
    /// being torn down.
    pub async fn acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.pool).acquire_owned().await.ok()
    }

    /// Waits for an in-flight slot on the URL's host
    pub async fn acquire_host(&self, url: &Url) -> Option<OwnedSemaphorePermit> {
        let permits = self.with_host(url, |state| state.permits());
        permits.acquire_owned().await.ok()
    }

    /// Reserves the next request slot on the URL's host and sleeps until it opens
    pub async fn wait_turn(&self, url: &Url) {
        let spacing = self.spacing();
        let at = self.with_host(url, |state| state.reserve(Instant::now(), spacing));

        let now = Instant::now();
        if at > now {
            tracing::trace!("Waiting {:?} before requesting {}", at - now, url);
            tokio::time::sleep(at - now).await;
        }
    }

    /// Pauses every request to the URL's host for `wait`
    pub fn defer_host(&self, url: &Url, wait: Duration) {
        let until = Instant::now() + wait;
        self.with_host(url, |state| state.defer_until(until));
    }

    /// Requests reserved and Retry-After pauses so far, over every host
    pub fn totals(&self) -> RequestTotals {
        let hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts.values().fold(RequestTotals::default(), |totals, state| RequestTotals {
            requests: totals.requests + state.request_count,
            deferrals: totals.deferrals + state.deferrals,
        })
    }

    /// Spacing for the next reservation
    fn spacing(&self) -> Duration {
        if !self.jitter || self.delay.is_zero() {
            return self.delay;
        }
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        self.delay.mul_f64(factor)
    }

    fn with_host<R>(&self, url: &Url, f: impl FnOnce(&mut HostState) -> R) -> R {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        let state = hosts
            .entry(host_key(url))
            .or_insert_with(|| HostState::new(self.per_host_concurrency));
        f(state)
    }
}
