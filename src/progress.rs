//! Progress reporting for tree construction
//!
//! Draws an indicatif spinner on stderr so that stdout only ever carries
//! command output.

use crate::tree::CrawlProgress;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner showing crawl status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a spinner labelled with the path being crawled
    pub fn new(path: &str) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.set_prefix(path.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the display from a crawl snapshot
    pub fn update(&self, progress: &CrawlProgress) {
        self.bar.set_message(format_progress(progress));
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

fn format_progress(progress: &CrawlProgress) -> String {
    format!(
        "Nodes: {} | Expanded: {} | Requests: {} | Rate: {:.0}/s | Queue: {} | Workers: {}/{}",
        format_number(progress.discovered),
        format_number(progress.expanded),
        format_number(progress.requests),
        progress.nodes_per_second(),
        progress.queued,
        progress.active_workers,
        progress.total_workers,
    )
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_progress() {
        let progress = CrawlProgress {
            expanded: 1200,
            discovered: 4000,
            requests: 5100,
            queued: 7,
            active_workers: 2,
            total_workers: 3,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(
            format_progress(&progress),
            "Nodes: 4,000 | Expanded: 1,200 | Requests: 5,100 | Rate: 2000/s | Queue: 7 | Workers: 2/3"
        );
    }
}
