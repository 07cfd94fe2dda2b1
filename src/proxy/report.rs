//! Logging and progress capabilities injected into the core
//!
//! The checker and runner never talk to a concrete log transport or terminal
//! directly; they only hold `Arc<dyn Logger>` / `Arc<dyn ProgressSink>`
//! collaborators, so tests can substitute in-memory recorders.

use std::io::Write;

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

/// Sink for leveled text lines
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Sink for batch progress updates
pub trait ProgressSink: Send + Sync {
    fn progress(&self, processed: usize, total: usize);
}

/// Default logger forwarding to the `log` crate facade
#[derive(Debug, Default)]
pub struct LogSink;

impl Logger for LogSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Error => log::error!("{}", message),
        }
    }
}

/// Width of the progress bar in characters
const BAR_LENGTH: usize = 50;

/// Terminal progress bar redrawn in place with a carriage return
#[derive(Debug, Default)]
pub struct ProgressBar;

impl ProgressBar {
    fn render(processed: usize, total: usize) -> String {
        let progress = if total == 0 {
            1.0
        } else {
            processed as f64 / total as f64
        };
        let filled = (progress * BAR_LENGTH as f64) as usize;
        let filled = filled.min(BAR_LENGTH);
        format!(
            "[{}{}] {:.0}%",
            "=".repeat(filled),
            " ".repeat(BAR_LENGTH - filled),
            progress * 100.0
        )
    }
}

impl ProgressSink for ProgressBar {
    fn progress(&self, processed: usize, total: usize) {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "\r{}", Self::render(processed, total));
        if processed >= total {
            let _ = writeln!(stdout);
        }
        let _ = stdout.flush();
    }
}
