//! Progress bar and summary reporting for CLI installs.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::{CacheKey, FetchOutcome, InstallProgress, InstallStats, ResponseSource};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Formats a byte count as a human-readable string (B, KB, MB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Install progress shown as a bar counting pre-cached resources.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// Creates a bar for `total` resources.
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("progress template is valid")
                .progress_chars("━━╌"),
        );
        Self { bar }
    }

    /// Removes the bar from the terminal.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl InstallProgress for BarProgress {
    fn on_fetch_start(&self, url: &str) {
        self.bar.set_message(url.to_string());
    }

    fn on_fetch_complete(&self, url: &str, bytes: u64) {
        self.bar.inc(1);
        self.bar
            .println(format!("  {} {url} ({})", style("✓").green(), format_bytes(bytes)));
    }

    fn on_error(&self, url: &str, error: &str) {
        self.bar
            .println(format!("  {} {url}: {error}", style("✗").red()));
    }
}

/// Prints the outcome of an install and activation.
pub fn print_install_summary(stats: &InstallStats, swept: &[String]) {
    println!("\n{SEPARATOR}");
    println!("Install Summary");
    println!("{SEPARATOR}");
    println!("  Cache:             {}", style(&stats.cache_name).bold());
    println!("  Resources cached:  {}", stats.entries);
    println!("  Total size:        {}", format_bytes(stats.total_bytes));
    println!("  Time:              {:.1}s", stats.elapsed.as_secs_f64());
    println!(
        "  Average speed:     {}/s",
        format_bytes(stats.average_speed())
    );
    if !swept.is_empty() {
        println!("  Stale caches removed:");
        for name in swept {
            println!("    {name}");
        }
    }
    println!("{SEPARATOR}");
}

/// Prints the outcome of activating an existing install.
pub fn print_activation(cache_name: &str, swept: &[String]) {
    println!("Activated {}", style(cache_name).bold());
    for name in swept {
        println!("  removed stale cache {name}");
    }
}

/// Prints a one-line description of a fetch outcome.
pub fn print_fetch(url: &str, outcome: &FetchOutcome) {
    let source = match outcome.source {
        ResponseSource::Cache => style("cache").green(),
        ResponseSource::Network => style("network").yellow(),
    };
    println!(
        "{} {} {url} ({}) from {source}",
        outcome.response.status,
        outcome.response.status_text,
        format_bytes(outcome.response.body.len() as u64),
    );
}

/// Prints the partitions and their entries.
pub fn print_caches(caches: &[(String, Vec<CacheKey>)], current: &str) {
    if caches.is_empty() {
        println!("No caches.");
        return;
    }
    for (name, keys) in caches {
        let marker = if name == current { " (current)" } else { "" };
        println!("{}{marker}: {} entries", style(name).bold(), keys.len());
        for key in keys {
            println!("  {key}");
        }
    }
}
