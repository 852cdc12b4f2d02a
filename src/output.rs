//! Indented, colored console output, spinners and summaries.
//!
//! Everything the operator reads goes through [`out`], which indents nested
//! messages by four spaces per level so remote output, repository headers and
//! git chatter stay visually grouped.

use crate::config::Verbosity;
use crate::constants::{INDENT_WIDTH, PROGRESS_TICK_MS};
use crate::repo::Discovery;
use crate::repo::RepositoryTarget;
use crate::update::{LocalRun, UpdateCallbacks, UpdateOutcome, UpdateResult, UpdateStep};
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Message severity; decides the color a message is printed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Note,
    Success,
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub fn paint(self, text: &str) -> ColoredString {
        match self {
            Severity::Info => text.normal(),
            Severity::Note => text.blue().bold(),
            Severity::Success => text.green().bold(),
            Severity::Warning => text.yellow().bold(),
            Severity::Error => text.red().bold(),
        }
    }
}

/// Formats `msg` at nesting level `indent`. Level 0 starts with a blank line;
/// deeper levels indent every line of a multi-line message.
#[must_use]
pub fn indented(indent: usize, msg: &str) -> String {
    if indent == 0 {
        return format!("\n{}", msg);
    }
    let spacing = " ".repeat(INDENT_WIDTH * indent);
    let body = msg.replace('\n', &format!("\n{}", spacing));
    format!("{}{}", spacing, body)
}

/// Prints `msg` at nesting level `indent`.
pub fn out(indent: usize, msg: impl AsRef<str>) {
    println!("{}", indented(indent, msg.as_ref()));
}

pub fn print_banner(tool: &str, tagline: &str, verbosity: Verbosity) {
    if verbosity == Verbosity::Quiet {
        return;
    }
    out(
        0,
        format!("{}: {}", tool.bold(), tagline)
            .yellow()
            .to_string(),
    );
}

/// Console presentation of a local pull run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleCallbacks {
    verbosity: Verbosity,
}

impl ConsoleCallbacks {
    #[must_use]
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    fn is_quiet(&self) -> bool {
        self.verbosity == Verbosity::Quiet
    }
}

impl UpdateCallbacks for ConsoleCallbacks {
    fn on_directory(&self, dir: &Path, discovery: &Discovery) {
        if self.is_quiet() {
            return;
        }
        let name = format!("Directory '{}'", dir.display().to_string().bold());
        let headline = match discovery {
            Discovery::SingleRepo(_) => format!("{} is a git repository:", name),
            Discovery::Contains(targets) if targets.len() == 1 => {
                format!("{} contains 1 git repository:", name)
            }
            Discovery::Contains(targets) => {
                format!("{} contains {} git repositories:", name, targets.len())
            }
        };
        out(0, headline.yellow().to_string());
    }

    fn on_invalid_directory(&self, _dir: &Path, error: &anyhow::Error) {
        out(0, Severity::Error.paint(&error.to_string()).to_string());
    }

    fn on_update_start(&self, target: &RepositoryTarget) {
        if self.is_quiet() {
            return;
        }
        out(1, format!("{}:", target.logical_name.bold()));
    }

    fn on_step(&self, step: &UpdateStep) {
        if self.verbosity != Verbosity::Verbose {
            return;
        }
        out(2, format!("{}...", step).dimmed().to_string());
    }

    fn on_message(&self, severity: Severity, message: &str) {
        if self.is_quiet() && severity != Severity::Error {
            return;
        }
        out(2, severity.paint(message).to_string());
    }

    fn on_complete(&self, _result: &UpdateResult) {}
}

/// Spinner shown while a slow step runs. Hidden in quiet and verbose modes,
/// where it would interleave badly with other output.
pub struct Spinner {
    bar: Option<ProgressBar>,
}

impl Spinner {
    #[must_use]
    pub fn start(message: impl Into<String>, verbosity: Verbosity) -> Self {
        if verbosity != Verbosity::Normal {
            return Self { bar: None };
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_MS));
        Self { bar: Some(bar) }
    }

    pub fn finish_success(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("{} {}", "✓".green(), message));
        }
    }

    pub fn finish_failed(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("{} {}", "✗".red(), message));
        }
    }

    pub fn clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

pub fn print_summary(run: &LocalRun, duration: Duration, verbosity: Verbosity) {
    if verbosity == Verbosity::Quiet {
        print_quiet_summary(run);
    } else {
        print_normal_summary(run, duration);
    }
}

fn print_quiet_summary(run: &LocalRun) {
    let pulled = count_pulled(&run.results);
    println!("{}/{} repositories pulled", pulled, run.results.len());

    for result in &run.results {
        if let UpdateOutcome::Failed(failure) = &result.outcome {
            eprintln!("error: {}: {}", result.target.path.display(), failure.error);
        }
    }
}

fn count_pulled(results: &[UpdateResult]) -> usize {
    results
        .iter()
        .filter(|r| matches!(r.outcome, UpdateOutcome::Pulled(_)))
        .count()
}

fn print_normal_summary(run: &LocalRun, duration: Duration) {
    if run.results.is_empty() && run.invalid_dirs.is_empty() {
        println!("\n{}", "No git repositories found".yellow().bold());
        return;
    }

    print_section("Summary");

    let failures: Vec<_> = run
        .results
        .iter()
        .filter(|r| r.outcome.is_failure())
        .collect();
    let unchanged = run
        .results
        .iter()
        .filter(|r| matches!(r.outcome, UpdateOutcome::NoChanges { .. }))
        .count();

    for change in &run.branch_changes {
        println!(
            "  {} {} {} → {}",
            "SWITCHED".yellow().bold(),
            change.repository.white(),
            change.from.dimmed(),
            change.to.cyan()
        );
    }
    for result in &failures {
        if let UpdateOutcome::Failed(failure) = &result.outcome {
            println!(
                "  {} {} {}",
                "FAIL".red().bold(),
                result.target.logical_name.white(),
                format!("while {}", failure.step).red(),
            );
        }
    }

    println!(
        "{}: {} pulled, {} unchanged, {} failed in {}",
        "Total".white().bold(),
        count_pulled(&run.results),
        unchanged,
        failures.len(),
        format_duration(duration)
    );
}

fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f32())
}

fn print_section(title: &str) {
    let line = "=".repeat(50).cyan().dimmed();
    let padding = (50 - title.len()) / 2;
    let centered = format!("{:>width$}", title, width = padding + title.len());
    println!("\n{}\n{}\n{}\n", line, centered.cyan().bold(), line);
}
