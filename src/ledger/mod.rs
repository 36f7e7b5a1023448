//! Resumable progress ledger
//!
//! One progress document per job id records which stories and chapters are
//! already done. Every mutation runs load-modify-save under a lock owned by the
//! job id, so concurrent workers of the same job never lose each other's
//! updates while different jobs proceed in parallel.

mod file;
mod traits;

pub use file::{JsonFileBackend, MemoryBackend};
pub use traits::{LedgerBackend, LedgerError, LedgerResult};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// Completed chapters of a single story
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryProgress {
    #[serde(default)]
    pub completed_chapters: BTreeSet<String>,
}

/// Progress document of one job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default)]
    pub completed_stories: BTreeSet<String>,

    #[serde(default)]
    pub stories: BTreeMap<String, StoryProgress>,
}

impl ProgressState {
    pub fn is_story_done(&self, story_url: &str) -> bool {
        self.completed_stories.contains(story_url)
    }

    /// Returns true if the story was not already marked
    pub fn mark_story_done(&mut self, story_url: &str) -> bool {
        self.completed_stories.insert(story_url.to_string())
    }

    pub fn completed_chapters(&self, story_url: &str) -> HashSet<String> {
        self.stories
            .get(story_url)
            .map(|s| s.completed_chapters.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_chapter_done(&self, story_url: &str, chapter_url: &str) -> bool {
        self.stories
            .get(story_url)
            .is_some_and(|s| s.completed_chapters.contains(chapter_url))
    }

    /// Returns true if the chapter was not already marked
    pub fn mark_chapter_done(&mut self, story_url: &str, chapter_url: &str) -> bool {
        self.stories
            .entry(story_url.to_string())
            .or_default()
            .completed_chapters
            .insert(chapter_url.to_string())
    }
}

type JobSlot = Arc<Mutex<Option<ProgressState>>>;

/// Per-job progress ledger over a pluggable backend
///
/// Loads fail open: a missing or unreadable document behaves as an empty one,
/// so a damaged ledger costs re-crawling rather than an aborted run. Save
/// failures are logged and the in-memory state stays authoritative for the
/// rest of the process.
pub struct ProgressLedger {
    backend: Arc<dyn LedgerBackend>,
    jobs: StdMutex<HashMap<String, JobSlot>>,
}

impl ProgressLedger {
    pub fn new(backend: Arc<dyn LedgerBackend>) -> Self {
        Self {
            backend,
            jobs: StdMutex::new(HashMap::new()),
        }
    }

    /// Ledger backed by one JSON document per job under `dir`
    pub fn with_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileBackend::new(dir)))
    }

    /// Ledger that forgets everything when the process exits
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn is_story_done(&self, job_id: &str, story_url: &str) -> bool {
        self.read(job_id, |state| state.is_story_done(story_url))
            .await
    }

    pub async fn mark_story_done(&self, job_id: &str, story_url: &str) {
        self.update(job_id, |state| state.mark_story_done(story_url))
            .await
    }

    pub async fn completed_chapters(&self, job_id: &str, story_url: &str) -> HashSet<String> {
        self.read(job_id, |state| state.completed_chapters(story_url))
            .await
    }

    pub async fn is_chapter_done(&self, job_id: &str, story_url: &str, chapter_url: &str) -> bool {
        self.read(job_id, |state| state.is_chapter_done(story_url, chapter_url))
            .await
    }

    pub async fn mark_chapter_done(&self, job_id: &str, story_url: &str, chapter_url: &str) {
        self.update(job_id, |state| {
            state.mark_chapter_done(story_url, chapter_url)
        })
        .await
    }

    fn slot(&self, job_id: &str) -> JobSlot {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.entry(job_id.to_string()).or_default().clone()
    }

    async fn load(&self, job_id: &str) -> ProgressState {
        match self.backend.load(job_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Progress for job '{}' unreadable, starting empty: {}", job_id, e);
                ProgressState::default()
            }
        }
    }

    async fn read<R>(&self, job_id: &str, f: impl FnOnce(&ProgressState) -> R) -> R {
        let slot = self.slot(job_id);
        let mut guard = slot.lock().await;
        if guard.is_none() {
            *guard = Some(self.load(job_id).await);
        }
        f(guard.get_or_insert_with(ProgressState::default))
    }

    async fn update(&self, job_id: &str, f: impl FnOnce(&mut ProgressState) -> bool) {
        let slot = self.slot(job_id);
        let mut guard = slot.lock().await;
        if guard.is_none() {
            *guard = Some(self.load(job_id).await);
        }
        let state = guard.get_or_insert_with(ProgressState::default);

        if !f(state) {
            return;
        }

        if let Err(e) = self.backend.save(job_id, state).await {
            tracing::warn!("Failed to save progress for job '{}': {}", job_id, e);
        }
    }
}
