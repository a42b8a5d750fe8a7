//! Text-mode display logic for the ratebatch CLI.
//!
//! Coloured result lines, the run header and summary, and a console
//! progress reporter that keeps a single status line on stderr so stdout
//! stays clean. Uses only the `console` crate.

use console::{pad_str, style, Alignment, Term};
use ratebatch_lib::{BatchConfig, BatchSummary, ItemResult, OperationErrorKind, Progress, ProgressReporter};
use std::time::Duration;

// ── Progress line ────────────────────────────────────────────────────────────

/// Progress reporter that rewrites one status line on stderr.
pub struct ConsoleReporter {
    term: Term,
}

impl ConsoleReporter {
    /// Returns `None` if stderr isn't a TTY; callers fall back to logging.
    pub fn new() -> Option<Self> {
        let term = Term::stderr();
        if term.is_term() {
            Some(Self { term })
        } else {
            None
        }
    }

    /// Erase the status line once the batch is done.
    pub fn clear() {
        let term = Term::stderr();
        if term.is_term() {
            let _ = term.clear_line();
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, progress: &Progress) {
        let _ = self.term.clear_line();
        let _ = self.term.write_str(&format_progress(progress));
    }
}

fn format_progress(progress: &Progress) -> String {
    let mut line = format!(
        "{} {}/{} done  {}  {} in flight  {}  {} failed",
        style("⠿").cyan(),
        progress.completed(),
        progress.total,
        style("|").dim(),
        progress.in_flight,
        style("|").dim(),
        progress.failed,
    );
    if progress.cancelled > 0 {
        line.push_str(&format!("  {}  {} cancelled", style("|").dim(), progress.cancelled));
    }
    line.push_str(&format!("  {}", style(format!("{}s", progress.elapsed.as_secs())).dim()));
    line
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Print a styled header at the start of a verbose text run.
pub fn print_header(item_count: usize, config: &BatchConfig, operation: &str) {
    println!(
        "{} {} {}",
        style("ratebatch").bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim(),
        style(format!(
            "- Processing {} item{}",
            item_count,
            if item_count == 1 { "" } else { "s" }
        ))
        .dim(),
    );

    let meta_parts = [
        operation.to_string(),
        format!("Concurrency: {}", config.concurrency),
        format!(
            "Rate: {} per {}",
            config.rate_limit,
            format_duration(config.window)
        ),
    ];

    println!("{}", style(meta_parts.join(" | ")).dim());
    println!();
}

// ── Single result line ───────────────────────────────────────────────────────

/// Format and print a single item result with colors and alignment.
pub fn print_result(result: &ItemResult<String, String>) {
    let id_width = 16;
    let padded_id = pad_str(&result.id, id_width, Alignment::Left, Some(".."));

    match &result.outcome {
        Ok(value) => {
            println!(
                "  {}  {}  {}",
                style(&padded_id).white(),
                style("OK    ").green().bold(),
                first_line(value),
            );
        }
        Err(e) if e.kind == OperationErrorKind::Cancelled => {
            println!(
                "  {}  {}  {}",
                style(&padded_id).white(),
                style("SKIP  ").yellow(),
                style(&e.message).dim(),
            );
        }
        Err(e) => {
            println!(
                "  {}  {}  {}",
                style(&padded_id).white(),
                style("FAILED").red().bold(),
                style(format!("{}: {}", e.kind, first_line(&e.message))).dim(),
            );
        }
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Print the final summary bar with colored counts.
pub fn print_summary(summary: &BatchSummary, duration: Duration) {
    println!(
        "  {}",
        style("────────────────────────────────────────────────────").dim()
    );
    println!(
        "  {} item{} in {:.1}s  {}  {}  {}  {}  {}  {}",
        style(summary.total).bold(),
        if summary.total == 1 { "" } else { "s" },
        duration.as_secs_f64(),
        style("|").dim(),
        style(format!("{} succeeded", summary.succeeded)).green(),
        style("|").dim(),
        style(format!("{} failed", summary.failed)).red(),
        style("|").dim(),
        style(format!("{} cancelled", summary.cancelled)).yellow(),
    );
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Render a duration the way it is written in config: "500ms", "45s", "2m".
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if duration.subsec_millis() != 0 || secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
