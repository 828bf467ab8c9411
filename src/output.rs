//! CLI output formatting: human-readable text or pretty JSON.

use std::fmt::Write as _;

use anyhow::Result;
use harvester_core::store::{ProcessedContent, QueryTask, StoreStatistics};
use harvester_core::{Link, ProcessingStats, TaskRunReport};
use serde::Serialize;

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

pub fn render_task_list(tasks: &[QueryTask]) -> String {
    if tasks.is_empty() {
        return "No tasks.\n".to_string();
    }
    let mut out = format!(
        "{:<24} {:<8} {:>5} {:>6}  {}\n",
        "NAME", "ACTIVE", "RUNS", "LINKS", "LAST RUN"
    );
    for task in tasks {
        let _ = writeln!(
            out,
            "{:<24} {:<8} {:>5} {:>6}  {}",
            truncate_to_width(&task.task_name, 24),
            if task.is_active { "yes" } else { "no" },
            task.total_runs,
            task.total_links_found,
            task.last_run.as_deref().unwrap_or("never"),
        );
    }
    out
}

pub fn render_task(task: &QueryTask) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Task:        {}", task.task_name);
    let _ = writeln!(out, "Active:      {}", if task.is_active { "yes" } else { "no" });
    let _ = writeln!(out, "Prompt:      {}", task.prompt_template);
    let _ = writeln!(
        out,
        "Schedule:    {}",
        task.schedule.as_deref().unwrap_or("-")
    );
    let _ = writeln!(out, "Runs:        {}", task.total_runs);
    let _ = writeln!(out, "Links found: {}", task.total_links_found);
    let _ = writeln!(
        out,
        "Last run:    {}",
        task.last_run.as_deref().unwrap_or("never")
    );
    out
}

pub fn render_report(report: &TaskRunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Task: {}", report.task_name);
    let _ = writeln!(
        out,
        "  found: {}  new: {}  duplicates: {}  invalid: {}",
        report.total_found, report.new_links, report.duplicates, report.invalid
    );
    for link in &report.links {
        let _ = writeln!(out, "  + [{}] {}", link.id, link.url);
    }
    if let Some(stats) = &report.processing {
        out.push_str(&render_processing_stats(stats));
    }
    out
}

pub fn render_processing_stats(stats: &ProcessingStats) -> String {
    let mut out = format!(
        "Processing: {} succeeded, {} failed, {} skipped\n",
        stats.succeeded, stats.failed, stats.skipped
    );
    for (domain, domain_stats) in &stats.by_domain {
        let _ = write!(
            out,
            "  {domain}: {}/{} succeeded",
            domain_stats.succeeded, domain_stats.total
        );
        if domain_stats.skipped > 0 {
            let _ = write!(out, ", {} skipped", domain_stats.skipped);
        }
        if let Some(error) = &domain_stats.error {
            let _ = write!(out, " (error: {error})");
        }
        out.push('\n');
    }
    out
}

pub fn render_statistics(stats: &StoreStatistics) -> String {
    let links = &stats.links;
    format!(
        "Links: {} total\n  pending:    {}\n  processing: {}\n  completed:  {}\n  failed:     {}\nTasks: {} total, {} active\n",
        links.total,
        links.pending,
        links.processing,
        links.completed,
        links.failed,
        stats.tasks.total,
        stats.tasks.active,
    )
}

pub fn render_link_list(links: &[Link]) -> String {
    if links.is_empty() {
        return "No links.\n".to_string();
    }
    let mut out = String::new();
    for link in links {
        let _ = writeln!(
            out,
            "[{}] {:<10} {}  (last checked: {})",
            link.id,
            link.status_str,
            link.url,
            link.last_checked.as_deref().unwrap_or("never"),
        );
    }
    out
}

pub fn render_link_detail(link: &Link, content: Option<&ProcessedContent>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Link {}", link.id);
    let _ = writeln!(out, "  url:        {}", link.url);
    if link.original_url != link.url {
        let _ = writeln!(out, "  original:   {}", link.original_url);
    }
    let _ = writeln!(out, "  status:     {}", link.status_str);
    let _ = writeln!(
        out,
        "  task:       {}",
        link.source_task.as_deref().unwrap_or("-")
    );
    let _ = writeln!(out, "  discovered: {}", link.discovered_at);
    if let Some(processed_at) = &link.processed_at {
        let _ = writeln!(out, "  processed:  {processed_at}");
    }
    if let Some(error) = &link.error_message {
        let _ = writeln!(out, "  error:      {error}");
    }

    match content {
        Some(content) => {
            let _ = writeln!(out, "Content");
            if let Some(title) = &content.title {
                let _ = writeln!(out, "  title:   {title}");
            }
            if !content.tags.is_empty() {
                let _ = writeln!(out, "  tags:    {}", content.tags.join(", "));
            }
            if let Some(country) = &content.country {
                let _ = writeln!(out, "  country: {country}");
            }
            if let Some(date) = &content.news_date {
                let _ = writeln!(out, "  date:    {date}");
            }
            if let Some(text) = &content.content {
                let _ = writeln!(out, "  text:    {}", truncate_to_width(text, 200));
            }
        }
        None => {
            let _ = writeln!(out, "No processed content.");
        }
    }
    out
}
