//! Per-run progress reporting.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::artifact::StageKind;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub status: StageStatus,
    pub artifact: Option<PathBuf>,
    pub elapsed_ms: u128,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run: String,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<String>,
    pub removed: Vec<PathBuf>,
}

/// Collects the events of one run and forwards them to the log, prefixed with the run name.
#[derive(Debug)]
pub struct Reporter {
    summary: RunSummary,
}

impl Reporter {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            summary: RunSummary {
                run: run.into(),
                ..RunSummary::default()
            },
        }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        info!("[{}] {}", self.summary.run, message.as_ref());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[{}] {}", self.summary.run, message);
        self.summary.warnings.push(message);
    }

    pub fn stage_started(&mut self, stage: StageKind) {
        info!("[{}] {stage}...", self.summary.run);
    }

    pub fn stage_succeeded(&mut self, stage: StageKind, artifact: &Path, elapsed: Duration) {
        info!(
            "[{}] {stage} wrote {} in {:.2?}",
            self.summary.run,
            artifact.display(),
            elapsed
        );
        self.summary.stages.push(StageRecord {
            stage,
            status: StageStatus::Succeeded,
            artifact: Some(artifact.to_path_buf()),
            elapsed_ms: elapsed.as_millis(),
            message: None,
        });
    }

    pub fn stage_failed(&mut self, stage: StageKind, message: String, elapsed: Duration) {
        warn!("[{}] {stage} failed: {message}", self.summary.run);
        self.summary.stages.push(StageRecord {
            stage,
            status: StageStatus::Failed,
            artifact: None,
            elapsed_ms: elapsed.as_millis(),
            message: Some(message),
        });
    }

    pub fn removed(&mut self, paths: Vec<PathBuf>) {
        self.summary.removed.extend(paths);
    }

    pub fn warnings(&self) -> &[String] {
        &self.summary.warnings
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn write_summary(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.summary)?;
        Ok(())
    }
}
