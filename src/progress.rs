//! Sync progress reporting.
//!
//! The indexer calls [`SyncProgressReporter::report`] once per memory file,
//! after it is indexed or skipped. Progress goes to **stderr** so stdout
//! stays parseable for scripts (`mem search --json`).
//!
//! Any `Fn(&SyncProgress) + Send + Sync` closure is also a reporter, which
//! is how library callers hook their own UI in.

use std::io::Write;

use memory_harness_core::models::SyncProgress;

/// Receives one event per processed file.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, progress: &SyncProgress);
}

impl<F> SyncProgressReporter for F
where
    F: Fn(&SyncProgress) + Send + Sync,
{
    fn report(&self, progress: &SyncProgress) {
        self(progress)
    }
}

/// Human-friendly progress on stderr: `[3/12] indexed memory/notes.md (4 chunks)`.
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, progress: &SyncProgress) {
        let line = format!(
            "[{}/{}] {}\n",
            format_number(progress.completed as u64),
            format_number(progress.total as u64),
            progress.label
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, progress: &SyncProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "completed": progress.completed,
            "total": progress.total,
            "label": progress.label,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _progress: &SyncProgress) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn closure_is_a_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |p: &SyncProgress| seen.lock().unwrap().push(p.label.clone());
        let dyn_reporter: &dyn SyncProgressReporter = &reporter;
        dyn_reporter.report(&SyncProgress {
            completed: 1,
            total: 2,
            label: "skip MEMORY.md".to_string(),
        });
        assert_eq!(*seen.lock().unwrap(), vec!["skip MEMORY.md".to_string()]);
    }
}
