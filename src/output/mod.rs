//! Output module for crawl reports
//!
//! This module handles:
//! - Per-story and per-job report types
//! - Aggregating several jobs into a run summary
//! - Printing reports and store totals

mod report;
pub mod stats;

pub use report::{JobReport, JobSummary, StoryReport, StoryStatus};
pub use stats::{format_story_line, print_job_report, print_store_stats, print_summary};
