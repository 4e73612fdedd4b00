//! Persistent record of matched, renamed and (eventually) synchronized
//! uploads.
//!
//! Rows survive process restarts and are never silently overwritten:
//! re-processing an identical file short-circuits to the existing row. The
//! registry doubles as the durable backend for per-file transfer progress,
//! so pollers observe values without being attached to the running job.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use progress_tracking::{ProgressKey, ProgressStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("No uploaded file with id {0}")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// One file that has been matched and renamed. `extra` preserves fields this
/// portal does not model explicitly, as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: i64,
    pub sequencer_record_id: i64,
    pub original_filename: String,
    pub new_filename: String,
    pub md5: String,
    /// Remote-sync percentage; `None` means the transfer has not started.
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub total_sequences: Option<u64>,
    #[serde(default)]
    pub primer_occurrences: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDoc {
    next_id: i64,
    files: Vec<UploadedFile>,
    #[serde(default)]
    bucket_progress: HashMap<String, u8>,
}

/// Whether `create_if_absent` inserted a new row or found an identical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created(i64),
    /// Idempotent no-op: the (sequencer record, original, new) triple is
    /// already registered.
    DuplicateSkip(i64),
}

impl RegisterOutcome {
    pub fn file_id(&self) -> i64 {
        match *self {
            RegisterOutcome::Created(id) | RegisterOutcome::DuplicateSkip(id) => id,
        }
    }
}

/// JSON-file-backed registry with atomic rewrites. Writes happen once per
/// registration and once per completed transfer part, which is infrequent
/// enough to persist synchronously under the lock.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    doc: Mutex<RegistryDoc>,
}

impl FileRegistry {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryDoc::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Registers a file unless the identical (sequencer record, original
    /// filename, new filename) triple already exists, in which case the
    /// existing row id is returned unchanged.
    pub fn create_if_absent(
        &self,
        sequencer_record_id: i64,
        original_filename: &str,
        new_filename: &str,
        md5: &str,
    ) -> Result<RegisterOutcome> {
        let mut doc = self.doc.lock();

        if let Some(existing) = doc.files.iter().find(|f| {
            f.sequencer_record_id == sequencer_record_id
                && f.original_filename == original_filename
                && f.new_filename == new_filename
        }) {
            debug!(file_id = existing.id, original_filename, "identical upload already registered, skipping");
            return Ok(RegisterOutcome::DuplicateSkip(existing.id));
        }

        doc.next_id += 1;
        let id = doc.next_id;
        doc.files.push(UploadedFile {
            id,
            sequencer_record_id,
            original_filename: original_filename.to_string(),
            new_filename: new_filename.to_string(),
            md5: md5.to_string(),
            progress: None,
            total_sequences: None,
            primer_occurrences: None,
            extra: HashMap::new(),
        });

        self.save(&doc)?;
        Ok(RegisterOutcome::Created(id))
    }

    pub fn get(&self, id: i64) -> Option<UploadedFile> {
        self.doc.lock().files.iter().find(|f| f.id == id).cloned()
    }

    /// Canonical filenames of all uploads for one sequencer record, used for
    /// forward/reverse pairing downstream.
    pub fn filenames_for_record(&self, sequencer_record_id: i64) -> Vec<String> {
        self.doc
            .lock()
            .files
            .iter()
            .filter(|f| f.sequencer_record_id == sequencer_record_id)
            .map(|f| f.new_filename.clone())
            .collect()
    }

    /// Records metrics derived by downstream analysis steps.
    pub fn set_metrics(&self, id: i64, total_sequences: Option<u64>, primer_occurrences: Option<u64>) -> Result<()> {
        let mut doc = self.doc.lock();
        let file = doc.files.iter_mut().find(|f| f.id == id).ok_or(RegistryError::NotFound(id))?;
        if total_sequences.is_some() {
            file.total_sequences = total_sequences;
        }
        if primer_occurrences.is_some() {
            file.primer_occurrences = primer_occurrences;
        }
        self.save(&doc)?;
        Ok(())
    }

    /// Atomic rewrite: serialize next to the target, then rename over it.
    fn save(&self, doc: &RegistryDoc) -> Result<()> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            fs::create_dir_all(dir)?;
        }

        let mut tempfile = tempfile::Builder::new()
            .prefix(&format!("{}.", std::process::id()))
            .suffix(".registry")
            .tempfile_in(dir.unwrap_or_else(|| std::path::Path::new(".")))?;
        serde_json::to_writer_pretty(&mut tempfile, doc)?;
        tempfile.flush()?;
        tempfile.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProgressStore for FileRegistry {
    async fn set_progress(&self, key: &ProgressKey, percent: u8) {
        let percent = percent.min(100);
        let mut doc = self.doc.lock();

        match key {
            ProgressKey::File(id) => {
                let Some(file) = doc.files.iter_mut().find(|f| f.id == *id) else {
                    debug!(%key, percent, "progress update for unknown file dropped");
                    return;
                };
                // Monotonic within one attempt.
                if file.progress.is_some_and(|p| p >= percent) {
                    return;
                }
                file.progress = Some(percent);
            },
            ProgressKey::Bucket(name) => {
                let entry = doc.bucket_progress.entry(name.clone()).or_insert(0);
                if percent <= *entry {
                    return;
                }
                *entry = percent;
            },
        }

        if let Err(e) = self.save(&doc) {
            debug!(%key, percent, error = %e, "failed to persist progress update");
        }
    }

    async fn progress(&self, key: &ProgressKey) -> Option<u8> {
        let doc = self.doc.lock();
        match key {
            ProgressKey::File(id) => doc.files.iter().find(|f| f.id == *id).and_then(|f| f.progress),
            ProgressKey::Bucket(name) => doc.bucket_progress.get(name).copied(),
        }
    }

    async fn reset(&self, key: &ProgressKey) {
        let mut doc = self.doc.lock();
        match key {
            ProgressKey::File(id) => {
                if let Some(file) = doc.files.iter_mut().find(|f| f.id == *id) {
                    file.progress = None;
                }
            },
            ProgressKey::Bucket(name) => {
                doc.bucket_progress.remove(name);
            },
        }
        if let Err(e) = self.save(&doc) {
            debug!(%key, error = %e, "failed to persist progress reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_in(dir: &std::path::Path) -> FileRegistry {
        FileRegistry::open(dir.join("uploaded_files.json")).unwrap()
    }

    #[test]
    fn test_duplicate_triple_returns_original_id() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let first = registry.create_if_absent(3, "raw.fastq.gz", "7_V4_raw.fastq.gz", "abc").unwrap();
        assert_eq!(first, RegisterOutcome::Created(1));

        let second = registry.create_if_absent(3, "raw.fastq.gz", "7_V4_raw.fastq.gz", "abc").unwrap();
        assert_eq!(second, RegisterOutcome::DuplicateSkip(1));
        assert_eq!(second.file_id(), 1);

        // A different triple still creates a new row.
        let third = registry.create_if_absent(4, "raw.fastq.gz", "8_V4_raw.fastq.gz", "abc").unwrap();
        assert_eq!(third, RegisterOutcome::Created(2));
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = registry_in(dir.path());
            registry.create_if_absent(1, "a.fastq.gz", "5_V4_a.fastq.gz", "d41d").unwrap();
        }

        let reopened = registry_in(dir.path());
        let row = reopened.get(1).unwrap();
        assert_eq!(row.new_filename, "5_V4_a.fastq.gz");
        // Ids keep counting from where they left off.
        let next = reopened.create_if_absent(1, "b.fastq.gz", "5_V4_b.fastq.gz", "e107").unwrap();
        assert_eq!(next, RegisterOutcome::Created(2));
    }

    #[tokio::test]
    async fn test_file_progress_monotonic_and_persistent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());
        registry.create_if_absent(1, "a.fastq.gz", "5_V4_a.fastq.gz", "x").unwrap();
        let key = ProgressKey::File(1);

        assert_eq!(registry.progress(&key).await, None);
        registry.set_progress(&key, 40).await;
        registry.set_progress(&key, 20).await;
        assert_eq!(registry.progress(&key).await, Some(40));

        let reopened = registry_in(dir.path());
        assert_eq!(reopened.progress(&key).await, Some(40));

        registry.reset(&key).await;
        assert_eq!(registry.progress(&key).await, None);
    }

    #[tokio::test]
    async fn test_bucket_progress_is_independent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());

        let a = ProgressKey::Bucket("run-a".to_string());
        let b = ProgressKey::Bucket("run-b".to_string());
        registry.set_progress(&a, 70).await;
        registry.set_progress(&b, 10).await;
        assert_eq!(registry.progress(&a).await, Some(70));
        assert_eq!(registry.progress(&b).await, Some(10));
    }

    #[test]
    fn test_metrics_update() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(dir.path());
        registry.create_if_absent(1, "a.fastq.gz", "5_V4_a.fastq.gz", "x").unwrap();

        registry.set_metrics(1, Some(120_000), None).unwrap();
        registry.set_metrics(1, None, Some(117)).unwrap();
        let row = registry.get(1).unwrap();
        assert_eq!(row.total_sequences, Some(120_000));
        assert_eq!(row.primer_occurrences, Some(117));

        assert!(matches!(registry.set_metrics(99, Some(1), None), Err(RegistryError::NotFound(99))));
    }

    #[test]
    fn test_extra_fields_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploaded_files.json");
        {
            let registry = FileRegistry::open(&path).unwrap();
            registry.create_if_absent(1, "a.fastq.gz", "5_V4_a.fastq.gz", "x").unwrap();
        }

        // A field written by another tool is preserved across load/save.
        let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        doc["files"][0]["lane"] = serde_json::json!(4);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let registry = FileRegistry::open(&path).unwrap();
        assert_eq!(registry.get(1).unwrap().extra["lane"], serde_json::json!(4));
        registry.set_metrics(1, Some(5), None).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["files"][0]["lane"], serde_json::json!(4));
    }
}
