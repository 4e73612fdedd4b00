//! Read-only lookup of sequencer records, backed by a JSON file the metadata
//! subsystem drops into each process's working directory.

use std::path::PathBuf;

use async_trait::async_trait;
use sample_match::{MatchError, SequencerRecord, SequencerRegistry};

#[derive(Debug)]
pub struct JsonSequencerRegistry {
    root: PathBuf,
}

impl JsonSequencerRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn records_path(&self, process_id: &str) -> PathBuf {
        self.root.join(process_id).join("sequencers.json")
    }
}

#[async_trait]
impl SequencerRegistry for JsonSequencerRegistry {
    async fn records_for_process(&self, process_id: &str) -> sample_match::Result<Vec<SequencerRecord>> {
        // The process id is a path component under the data root.
        if !chunk_store::clean_path_component(process_id) {
            return Err(MatchError::Lookup(format!("invalid process id: {process_id}")));
        }
        let path = self.records_path(process_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            // No records registered yet for this process.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| MatchError::Lookup(format!("{}: {e}", path.display())))
    }
}
