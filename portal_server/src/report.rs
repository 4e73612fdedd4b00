//! Trigger for downstream report generation over synchronized files.
//!
//! The bioinformatics tooling is an opaque external command from the
//! portal's point of view: it gets the canonical forward/reverse read paths,
//! the sample id and the region, and is never waited on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sample_match::PairedReads;
use tracing::{info, warn};

#[async_trait]
pub trait ReportTrigger: std::fmt::Debug + Send + Sync {
    /// Fire-and-forget: failures are logged, never propagated. `reads` holds
    /// the canonical names under `renamed_dir`, forward read first.
    async fn trigger(&self, renamed_dir: &Path, reads: &PairedReads, sample_id: i64, region: &str);
}

/// Spawns an external program with (forward path, [reverse path], sample id,
/// region) arguments.
#[derive(Debug)]
pub struct CommandReportTrigger {
    program: PathBuf,
}

impl CommandReportTrigger {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait]
impl ReportTrigger for CommandReportTrigger {
    async fn trigger(&self, renamed_dir: &Path, reads: &PairedReads, sample_id: i64, region: &str) {
        let mut command = tokio::process::Command::new(&self.program);
        command.arg(renamed_dir.join(&reads.forward));
        if let Some(reverse) = &reads.reverse {
            command.arg(renamed_dir.join(reverse));
        }
        command.arg(sample_id.to_string()).arg(region);

        match command.spawn() {
            Ok(child) => {
                info!(
                    program = %self.program.display(),
                    forward = %reads.forward,
                    reverse = ?reads.reverse,
                    sample_id,
                    region,
                    pid = child.id(),
                    "report generation triggered"
                );
            },
            Err(e) => {
                warn!(program = %self.program.display(), sample_id, error = %e, "failed to trigger report generation");
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct NoOpReportTrigger;

impl NoOpReportTrigger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl ReportTrigger for NoOpReportTrigger {
    async fn trigger(&self, _renamed_dir: &Path, _reads: &PairedReads, _sample_id: i64, _region: &str) {}
}
