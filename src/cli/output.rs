//! CLI output formatting utilities.

use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};

use crate::store::ProcessingStatus;

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print one video row for `list`.
    pub fn video_line(
        title: &str,
        id: &str,
        status: ProcessingStatus,
        chunks: usize,
        duration_seconds: Option<u32>,
    ) {
        let duration = duration_seconds
            .map(format_duration)
            .unwrap_or_else(|| "unknown length".to_string());
        println!(
            "  {} {} ({}, {}, {} chunks, {})",
            style("*").cyan(),
            style(title).bold(),
            style(id).dim(),
            Self::status_label(status),
            chunks,
            duration
        );
    }

    /// Status word colored by outcome.
    pub fn status_label(status: ProcessingStatus) -> StyledObject<&'static str> {
        match status {
            ProcessingStatus::Completed => style(status.as_str()).green(),
            ProcessingStatus::Failed => style(status.as_str()).red(),
            _ => style(status.as_str()).yellow(),
        }
    }

    /// Print one ranked retrieval hit for `search` or a citation for `ask`.
    pub fn search_hit(title: &str, timestamp: &str, score: f64, text: &str, url: Option<&str>) {
        println!(
            "\n{} {} @ {} (score: {:.3})",
            style(">>").green(),
            style(title).bold(),
            style(timestamp).cyan(),
            score
        );
        println!("   {}", text_preview(text, 200));
        if let Some(u) = url {
            println!("   {}", style(u).dim());
        }
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format a duration in seconds to a human-readable string.
fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate text to a character budget, collapsing newlines.
fn text_preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
