//! Progress reporting for batch runs.

use super::RunSummary;
use crate::exec::{OutputSink, OutputStream};
use indicatif::{ProgressBar, ProgressStyle};

/// Receives batch progress from the orchestrator.
pub trait ProgressReporter: Send + Sync {
    /// Called before item `index` (0-based) of `total` starts.
    fn report(&self, index: usize, total: usize, message: &str);

    /// Called once when the run ends normally.
    fn finish(&self, _summary: &RunSummary) {}

    /// Called once when the run stops on an error.
    fn abandon(&self, _summary: &RunSummary) {}
}

/// Whole-percent completion before item `index` starts.
pub fn percent_complete(index: usize, total: usize) -> usize {
    if total == 0 {
        return 100;
    }
    index.min(total) * 100 / total
}

/// Reporter that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn report(&self, _index: usize, _total: usize, _message: &str) {}
}

/// Terminal progress bar with child output printed above it.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new(total: usize, already_done: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        bar.set_style(style);
        bar.set_position(already_done as u64);
        Self { bar }
    }

    fn print(&self, stream: OutputStream, line: &str) {
        // Hidden bars (no tty) swallow println, so write directly.
        if self.bar.is_hidden() {
            match stream {
                OutputStream::Stdout => println!("{line}"),
                OutputStream::Stderr => eprintln!("{line}"),
            }
        } else {
            self.bar.println(line);
        }
    }
}

impl ProgressReporter for ConsoleProgress {
    fn report(&self, index: usize, total: usize, message: &str) {
        self.bar.set_position(index as u64);
        self.bar.set_message(message.to_string());
        self.print(
            OutputStream::Stdout,
            &format!("{}% {message}", percent_complete(index, total)),
        );
    }

    fn finish(&self, summary: &RunSummary) {
        self.bar.set_position(summary.next_index.min(summary.total) as u64);
        self.bar.finish_with_message(format!(
            "Done! {} succeeded, {} failed",
            summary.succeeded,
            summary.failed.len()
        ));
    }

    fn abandon(&self, summary: &RunSummary) {
        self.bar.abandon_with_message(format!(
            "Stopped: {} succeeded, {} failed",
            summary.succeeded,
            summary.failed.len()
        ));
    }
}

impl OutputSink for ConsoleProgress {
    fn line(&self, stream: OutputStream, line: &str) {
        self.print(stream, line);
    }
}
