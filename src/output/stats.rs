//! Printed run summaries
//!
//! This module renders story, job and run reports, plus the store totals, for
//! the terminal.

use crate::output::{JobReport, JobSummary, StoryReport, StoryStatus};
use crate::storage::StoreStats;

fn chapter_range(story: &StoryReport) -> String {
    match (story.starting_chapter, story.last_chapter) {
        (Some(first), Some(last)) if first == last => format!("chapter {}", first),
        (Some(first), Some(last)) => format!("chapters {}-{}", first, last),
        _ => "no new chapters".to_string(),
    }
}

/// One-line description of a story outcome
pub fn format_story_line(story: &StoryReport) -> String {
    let name = if story.title.is_empty() {
        story.url.as_str()
    } else {
        story.title.as_str()
    };

    let mut line = format!(
        "[{}] {}: {} added ({})",
        story.status,
        name,
        story.chapters_added,
        chapter_range(story)
    );
    if let Some(previous) = story.previously_crawled {
        line.push_str(&format!(", previously up to chapter {}", previous));
    }
    if let Some(error) = &story.error {
        line.push_str(&format!(" - {}", error));
    }
    line
}

/// Prints one job's report to stdout
pub fn print_job_report(report: &JobReport) {
    println!("=== Job '{}' ===\n", report.job_id);

    if let Some(listing) = &report.listing {
        println!("Listing:");
        println!("  Pages fetched: {}", listing.pages_fetched);
        println!("  Stories found: {}", listing.stories_found);
        println!();
    }

    if !report.stories.is_empty() {
        println!("Stories:");
        for story in &report.stories {
            println!("  {}", format_story_line(story));
        }
        println!();
    }

    println!("Overview:");
    for status in [
        StoryStatus::Completed,
        StoryStatus::Partial,
        StoryStatus::Skipped,
        StoryStatus::Failed,
    ] {
        println!("  {}: {}", status, report.count(status));
    }
    println!("  Chapters added: {}", report.chapters_added());
    println!("  Requests: {} ({} Retry-After pauses)", report.requests, report.deferrals);
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    if report.stopped {
        println!("  Stopped before completion");
    }
    println!();
}

/// Prints the aggregate of a multi-job run
pub fn print_summary(summary: &JobSummary) {
    println!("=== Run Summary ===\n");
    println!("Jobs:");
    println!("  Succeeded: {}", summary.succeeded_jobs());
    println!("  Failed: {}", summary.failed_job_count());
    for (job_id, reason) in &summary.failed_jobs {
        println!("    - {}: {}", job_id, reason);
    }
    println!();

    println!("Stories:");
    println!("  Completed: {}", summary.stories(StoryStatus::Completed));
    println!("  Partial: {}", summary.stories(StoryStatus::Partial));
    println!("  Skipped: {}", summary.stories(StoryStatus::Skipped));
    println!("  Failed: {}", summary.stories(StoryStatus::Failed));
    println!("  Chapters added: {}", summary.chapters_added());
    println!();
}

/// Prints the store totals
pub fn print_store_stats(stats: &StoreStats) {
    println!("Database:");
    println!("  Stories: {}", stats.stories);
    println!("  Chapters: {}", stats.chapters);
}
