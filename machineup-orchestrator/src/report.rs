//! Human-readable progress reporting.
//!
//! The reporter is an explicit collaborator passed into every component
//! instead of a process-global logger; diagnostics for operators go through
//! `tracing`, these lines are the user-facing provisioning narrative and are
//! not machine-parseable.

use std::sync::Mutex;

pub trait Report: Send + Sync {
    /// Write a full status line.
    fn line(&self, message: &str);

    /// Write a fragment without a trailing newline (poll progress dots).
    fn fragment(&self, message: &str);
}

/// Production default: progress on stderr.
pub struct StderrReport;

impl Report for StderrReport {
    fn line(&self, message: &str) {
        eprintln!("{message}");
    }

    fn fragment(&self, message: &str) {
        eprint!("{message}");
    }
}

/// Discards everything. Used for per-machine noise under cluster runs.
pub struct SilentReport;

impl Report for SilentReport {
    fn line(&self, _message: &str) {}

    fn fragment(&self, _message: &str) {}
}

/// Captures output in memory; handy for tests and embedders.
#[derive(Default)]
pub struct MemoryReport {
    lines: Mutex<Vec<String>>,
    current: Mutex<String>,
}

impl MemoryReport {
    pub fn contents(&self) -> Vec<String> {
        let mut lines = self.lines.lock().unwrap().clone();
        let current = self.current.lock().unwrap();
        if !current.is_empty() {
            lines.push(current.clone());
        }
        lines
    }
}

impl Report for MemoryReport {
    fn line(&self, message: &str) {
        let mut current = self.current.lock().unwrap();
        let mut lines = self.lines.lock().unwrap();
        if !current.is_empty() {
            lines.push(std::mem::take(&mut *current));
        }
        lines.push(message.to_string());
    }

    fn fragment(&self, message: &str) {
        let mut current = self.current.lock().unwrap();
        current.push_str(message);
        if let Some(stripped) = current.strip_suffix('\n') {
            let finished = stripped.to_string();
            *current = String::new();
            self.lines.lock().unwrap().push(finished);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_report_assembles_fragments_into_lines() {
        let report = MemoryReport::default();
        report.fragment("waiting");
        report.fragment(".");
        report.fragment(".");
        report.fragment(" [OK]\n");
        report.line("done");
        assert_eq!(report.contents(), vec!["waiting.. [OK]", "done"]);
    }
}
