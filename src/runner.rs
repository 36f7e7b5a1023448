//! Multi-job runner
//!
//! Runs several jobs with at most `parallel` in flight. Each job gets its own
//! scheduler, so jobs never share a worker pool or host budget; the ledger,
//! store and index are shared, and the ledger keeps jobs apart by id.

use crate::config::{Job, PolitenessConfig, SiteConfig};
use crate::crawler::{Coordinator, CrawlDeps, Fetcher, RetryPolicy, Scheduler, StopSignal};
use crate::index::SearchIndex;
use crate::ledger::ProgressLedger;
use crate::output::JobSummary;
use crate::storage::Store;
use crate::Result;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Dependencies shared by every job of a run
#[derive(Clone)]
pub struct SharedDeps {
    pub client: Client,
    pub politeness: PolitenessConfig,
    pub ledger: Arc<ProgressLedger>,
    pub store: Arc<dyn Store>,
    pub index: Option<Arc<dyn SearchIndex>>,
    pub stop: StopSignal,
    pub site: SiteConfig,
}

impl SharedDeps {
    /// Builds the dependencies of one job, with a fresh scheduler
    pub fn for_job(&self, job: &Job) -> CrawlDeps {
        let scheduler = Arc::new(Scheduler::for_job(job, &self.politeness));
        let policy = RetryPolicy::from_config(&self.politeness);
        CrawlDeps {
            fetcher: Arc::new(Fetcher::new(self.client.clone(), scheduler, policy)),
            ledger: Arc::clone(&self.ledger),
            store: Arc::clone(&self.store),
            index: self.index.clone(),
            stop: self.stop.clone(),
            site: self.site.clone(),
        }
    }
}

/// Runs `jobs`, at most `parallel` at a time
///
/// # Arguments
///
/// * `jobs` - Jobs to run
/// * `parallel` - Jobs in flight at once (at least 1)
/// * `deps_for` - Builds the dependencies of a job
///
/// # Returns
///
/// The reports of the jobs that ran, in input order, and the jobs that could
/// not start with their error
pub async fn run_jobs<F>(jobs: Vec<Job>, parallel: usize, deps_for: F) -> JobSummary
where
    F: Fn(&Job) -> CrawlDeps,
{
    let permits = Arc::new(Semaphore::new(parallel.max(1)));
    let mut tasks = JoinSet::new();

    for (position, job) in jobs.into_iter().enumerate() {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let deps = deps_for(&job);
        tasks.spawn(async move {
            let _permit = permit;
            let job_id = job.id.clone();
            (position, job_id, run_job(job, deps).await)
        });
    }

    let mut finished = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(done) => finished.push(done),
            Err(e) => tracing::error!("Job task failed: {}", e),
        }
    }
    finished.sort_by_key(|(position, _, _)| *position);

    let mut summary = JobSummary::default();
    for (_, job_id, result) in finished {
        match result {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                tracing::error!("Job '{}' failed: {}", job_id, e);
                summary.failed_jobs.push((job_id, e.to_string()));
            }
        }
    }
    summary
}

async fn run_job(job: Job, deps: CrawlDeps) -> Result<crate::output::JobReport> {
    Coordinator::new(job, deps)?.run().await
}
