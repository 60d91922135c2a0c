use crate::reload::tracker::ReloadSnapshot;
use chrono::Utc;
use log::warn;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// External sink for failure identities and the emergency snapshot written
/// on fatal escalation (crash-report enrichment).
pub trait DiagnosticSink: Send + Sync {
    fn record_failure(&self, consumer: &str);

    fn write_emergency_report(&self, report: &CrashReport) -> Result<PathBuf, anyhow::Error>;
}

#[derive(Debug, Serialize)]
pub struct CrashReport {
    pub written_at: String,
    pub failing_consumer: Option<String>,
    pub error: String,
    pub bundles: Vec<String>,
    pub load_state: Option<ReloadSnapshot>,
}

impl CrashReport {
    pub fn new(
        failing_consumer: Option<&str>,
        error: &str,
        bundles: Vec<String>,
        load_state: Option<&ReloadSnapshot>,
    ) -> Self {
        Self {
            written_at: Utc::now().to_rfc3339(),
            failing_consumer: failing_consumer.map(str::to_string),
            error: error.to_string(),
            bundles,
            load_state: load_state.cloned(),
        }
    }
}

/// Writes crash reports as timestamped JSON files into a well-known
/// directory next to the game data.
pub struct CrashReportWriter {
    directory: PathBuf,
}

impl CrashReportWriter {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }
}

impl DiagnosticSink for CrashReportWriter {
    fn record_failure(&self, consumer: &str) {
        // Only remembered for the log; the full report is written on fatal.
        warn!("Recording reload failure of consumer {} for diagnostics", consumer);
    }

    fn write_emergency_report(&self, report: &CrashReport) -> Result<PathBuf, anyhow::Error> {
        fs::create_dir_all(&self.directory)?;
        let file_name = format!("crash-{}.json", Utc::now().format("%Y%m%d-%H%M%S"));
        let path = self.directory.join(file_name);
        fs::write(&path, serde_json::to_string_pretty(report)?)?;
        Ok(path)
    }
}
