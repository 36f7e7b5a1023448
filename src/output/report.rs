//! Story, job and run reports

use crate::crawler::ListingSummary;
use std::fmt;
use std::time::Duration;

/// How a story crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoryStatus {
    /// Every selected chapter was fetched or is permanently absent
    Completed,
    /// Some chapters are still missing (transient failures or a stop)
    Partial,
    /// Already complete according to the ledger
    Skipped,
    /// Nothing usable was recovered
    Failed,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one story crawl
#[derive(Debug, Clone, PartialEq)]
pub struct StoryReport {
    pub url: String,
    pub title: String,
    pub status: StoryStatus,

    /// Chapters persisted during this crawl
    pub chapters_added: usize,

    /// Lowest and highest chapter number persisted during this crawl
    pub starting_chapter: Option<u32>,
    pub last_chapter: Option<u32>,

    /// Highest chapter the store knew about before this crawl
    pub previously_crawled: Option<u32>,

    /// Why the story failed or stayed partial
    pub error: Option<String>,
}

impl StoryReport {
    pub fn new(url: impl Into<String>, status: StoryStatus) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            status,
            chapters_added: 0,
            starting_chapter: None,
            last_chapter: None,
            previously_crawled: None,
            error: None,
        }
    }

    pub fn skipped(url: impl Into<String>) -> Self {
        Self::new(url, StoryStatus::Skipped)
    }

    pub fn failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new(url, StoryStatus::Failed)
        }
    }
}

/// Outcome of one job
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    pub job_id: String,
    pub stories: Vec<StoryReport>,

    /// Listing walk summary (category jobs)
    pub listing: Option<ListingSummary>,

    /// A stop was requested before the job finished
    pub stopped: bool,

    /// HTTP requests sent
    pub requests: u64,

    /// Times a host asked for a pause (Retry-After)
    pub deferrals: u64,

    pub elapsed: Duration,
}

impl JobReport {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    pub fn count(&self, status: StoryStatus) -> usize {
        self.stories.iter().filter(|s| s.status == status).count()
    }

    pub fn chapters_added(&self) -> usize {
        self.stories.iter().map(|s| s.chapters_added).sum()
    }
}

/// Aggregate over every job of a run
#[derive(Debug, Clone, Default)]
pub struct JobSummary {
    /// Reports of jobs that ran
    pub reports: Vec<JobReport>,

    /// Jobs that could not start, with the reason
    pub failed_jobs: Vec<(String, String)>,
}

impl JobSummary {
    pub fn succeeded_jobs(&self) -> usize {
        self.reports.len()
    }

    pub fn failed_job_count(&self) -> usize {
        self.failed_jobs.len()
    }

    pub fn stories(&self, status: StoryStatus) -> usize {
        self.reports.iter().map(|r| r.count(status)).sum()
    }

    pub fn chapters_added(&self) -> usize {
        self.reports.iter().map(JobReport::chapters_added).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed_jobs.is_empty()
    }
}
