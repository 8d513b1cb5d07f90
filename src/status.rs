//! Build status reporting.
//!
//! The scheduler reports progress through the [`StatusReporter`] trait.
//! [`TextReporter`] writes plain lines to stderr, [`ProgressReporter`] drives
//! an `indicatif` progress bar, and [`SilentReporter`] discards everything.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::scheduler::BuildSummary;

/// What went wrong in a failed step, as shown to the user.
#[derive(Debug, Clone, Copy)]
pub struct FailureReport<'a> {
    /// Step description.
    pub desc: &'a str,
    /// Redacted command line, for process actions.
    pub command: Option<&'a str>,
    /// Captured stderr after the step's filter, or the error chain.
    pub details: &'a str,
}

/// Receives progress events from the scheduler.
pub trait StatusReporter {
    /// Execution is about to start with `total` steps.
    fn build_started(&self, _total: usize) {}

    /// A step's action is about to run.
    fn step_started(&self, desc: &str);

    /// A step finished, whether it ran or was up to date.
    fn step_finished(&self, _desc: &str) {}

    /// The scheduler is blocked on running steps.
    fn waiting(&self, _running: &[&str]) {}

    /// A step failed; the build is being aborted.
    fn step_failed(&self, report: &FailureReport<'_>);

    /// Every step finished.
    fn build_finished(&self, summary: &BuildSummary);

    /// A watcher interrupted the build.
    fn interrupted(&self) {}
}

fn failure_message(report: &FailureReport<'_>) -> String {
    let mut message = format!("{} finished with an error:\n", report.desc);
    if let Some(command) = report.command {
        message.push_str(&format!("\n   {command}\n"));
    }
    let details = report.details.trim_end();
    if !details.is_empty() {
        message.push('\n');
        message.push_str(details);
        message.push('\n');
    }
    message
}

fn summary_message(summary: &BuildSummary) -> String {
    format!(
        "Build finished in {:.3}s ({} of {} steps run, {} up to date)",
        summary.elapsed.as_secs_f64(),
        summary.executed.len(),
        summary.total,
        summary.skipped,
    )
}

/// Plain reporter: one stderr line per event.
#[derive(Debug, Default)]
pub struct TextReporter {
    verbose: bool,
}

impl TextReporter {
    /// Reporter that also prints wait notices when `verbose`.
    #[must_use]
    pub const fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl StatusReporter for TextReporter {
    fn step_started(&self, desc: &str) {
        drop(writeln!(io::stderr(), "{desc}..."));
    }

    fn waiting(&self, running: &[&str]) {
        if self.verbose {
            drop(writeln!(
                io::stderr(),
                "Waiting for one of {} running steps ({})...",
                running.len(),
                running.join(", ")
            ));
        }
    }

    fn step_failed(&self, report: &FailureReport<'_>) {
        drop(write!(io::stderr(), "{}", failure_message(report)));
    }

    fn build_finished(&self, summary: &BuildSummary) {
        drop(writeln!(io::stderr(), "{}", summary_message(summary)));
    }

    fn interrupted(&self) {
        drop(writeln!(
            io::stderr(),
            "Sources have been modified. Interrupting the build process..."
        ));
    }
}

/// Reporter that emits nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl StatusReporter for SilentReporter {
    fn step_started(&self, _desc: &str) {}
    fn step_failed(&self, _report: &FailureReport<'_>) {}
    fn build_finished(&self, _summary: &BuildSummary) {}
}

/// Progress bar reporter backed by `indicatif`.
#[derive(Debug)]
pub struct ProgressReporter {
    bar: Mutex<ProgressBar>,
}

impl ProgressReporter {
    /// Reporter drawing to stderr.
    #[must_use]
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(12));
        let style = ProgressStyle::with_template("[{pos}/{len}] {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self {
            bar: Mutex::new(bar),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        f(&bar);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter for ProgressReporter {
    fn build_started(&self, total: usize) {
        let length = u64::try_from(total).unwrap_or(u64::MAX);
        self.with_bar(|bar| {
            bar.set_length(length);
            bar.set_position(0);
        });
    }

    fn step_started(&self, desc: &str) {
        self.with_bar(|bar| bar.set_message(format!("{desc}...")));
    }

    fn step_finished(&self, _desc: &str) {
        self.with_bar(|bar| bar.inc(1));
    }

    fn step_failed(&self, report: &FailureReport<'_>) {
        self.with_bar(|bar| {
            bar.abandon_with_message(format!("{} failed", report.desc));
            bar.suspend(|| drop(write!(io::stderr(), "{}", failure_message(report))));
        });
    }

    fn build_finished(&self, summary: &BuildSummary) {
        self.with_bar(|bar| bar.finish_with_message(summary_message(summary)));
    }

    fn interrupted(&self) {
        self.with_bar(|bar| bar.abandon_with_message("interrupted by source change"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn failure_message_includes_command_and_details() {
        let report = FailureReport {
            desc: "Compiling a.o",
            command: Some("cc -c a.c"),
            details: "a.c:1: error\n\n",
        };
        assert_eq!(
            failure_message(&report),
            "Compiling a.o finished with an error:\n\n   cc -c a.c\n\na.c:1: error\n"
        );
    }

    #[test]
    fn summary_message_counts_steps() {
        let summary = BuildSummary {
            total: 3,
            executed: vec!["a.o".into(), "link app".into()],
            skipped: 1,
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(
            summary_message(&summary),
            "Build finished in 1.500s (2 of 3 steps run, 1 up to date)"
        );
    }
}
