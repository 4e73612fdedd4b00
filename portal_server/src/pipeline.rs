//! Orchestration of the completion flow: reassemble, verify, match, promote,
//! register, and hand off to the background synchronization job.

use std::path::PathBuf;
use std::sync::Arc;

use chunk_store::{clean_path_component, ChunkStore, ChunkStoreError};
use object_sync::ObjectSynchronizer;
use progress_tracking::{ProgressKey, ProgressStore};
use sample_match::{match_filename, paired_reads, MatchOutcome, SequencerRecord, SequencerRegistry};
use tracing::{debug, info, warn};

use crate::dispatch::{JobDispatcher, JobId};
use crate::error::Result;
use crate::registry::{FileRegistry, RegisterOutcome};
use crate::report::ReportTrigger;

/// Everything one chunked upload needs to become a registered, synchronized
/// canonical file.
#[derive(Debug)]
pub struct UploadPipeline {
    pub chunks: ChunkStore,
    pub registry: Arc<FileRegistry>,
    pub sequencers: Arc<dyn SequencerRegistry>,
    pub synchronizer: Arc<ObjectSynchronizer>,
    pub progress: Arc<dyn ProgressStore>,
    pub dispatcher: JobDispatcher,
    pub reports: Arc<dyn ReportTrigger>,
    /// Per-process working directories live under here.
    pub data_root: PathBuf,
}

/// What the completion endpoint reports back to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed {
        file_id: i64,
        original_filename: String,
        new_name: String,
        job_id: JobId,
    },
    /// Soft failure: the attempt is over but the pipeline is healthy. The
    /// reason is surfaced to the operator as-is.
    Rejected { reason: String },
}

impl UploadPipeline {
    /// Runs the full completion flow for one upload session.
    ///
    /// Size and digest disagreements, unmatched filenames and ambiguous
    /// matches come back as `Rejected`; only infrastructure problems
    /// propagate as errors.
    pub async fn complete_upload(
        &self,
        process_id: &str,
        filename: &str,
        filechunks: u32,
        declared_md5: &str,
        declared_total: Option<u64>,
    ) -> Result<CompletionOutcome> {
        // Both names become path components under the data root; anything
        // with separators or dot-dot never touches the filesystem.
        if !clean_path_component(process_id) || !clean_path_component(filename) {
            warn!(process_id, filename, "rejecting name that is not a single path component");
            return Ok(CompletionOutcome::Rejected {
                reason: "invalid process or file name".to_string(),
            });
        }

        let missing = self.chunks.missing_chunks(process_id, filename, filechunks).await;
        if !missing.is_empty() {
            return Ok(CompletionOutcome::Rejected {
                reason: format!("chunks not yet stored: {missing:?}"),
            });
        }

        let declared_size = match declared_total {
            Some(size) => Some(size),
            None => self.chunks.declared_size(process_id, filename).await,
        };

        let assembled = match self.chunks.reassemble(process_id, filename, filechunks, declared_size).await {
            Ok(path) => path,
            Err(e @ ChunkStoreError::SizeMismatch { .. }) => {
                return Ok(CompletionOutcome::Rejected { reason: e.to_string() });
            },
            Err(e) => return Err(e.into()),
        };

        // Client-to-server transfer verification.
        let digest_path = assembled.clone();
        let actual_md5 = tokio::task::spawn_blocking(move || integrity::file_md5_hex(&digest_path)).await??;
        if !integrity::digests_match(declared_md5, &actual_md5) {
            warn!(process_id, filename, declared_md5, actual_md5, "md5 mismatch, discarding assembly");
            let _ = tokio::fs::remove_file(&assembled).await;
            return Ok(CompletionOutcome::Rejected {
                reason: format!("md5 checksum mismatch: declared {declared_md5}, computed {actual_md5}"),
            });
        }

        let records = self.sequencers.records_for_process(process_id).await?;
        let (record, new_name) = match match_filename(filename, &records) {
            MatchOutcome::Matched { record, new_name } => (record, new_name),
            MatchOutcome::NoMatch => {
                // The file stays in the uploads directory, unclaimed, for
                // manual operator handling.
                info!(process_id, filename, "no matching sequencer IDs found");
                return Ok(CompletionOutcome::Rejected {
                    reason: "no matching sequencer IDs found".to_string(),
                });
            },
            MatchOutcome::Ambiguous { sequencer_ids } => {
                info!(process_id, filename, ?sequencer_ids, "ambiguous sequencer ID match");
                return Ok(CompletionOutcome::Rejected {
                    reason: format!("ambiguous sequencer IDs: {}", sequencer_ids.join(", ")),
                });
            },
        };

        // Promote to the canonical per-process directory.
        let renamed_dir = self.data_root.join(process_id).join("renamed");
        tokio::fs::create_dir_all(&renamed_dir).await?;
        let canonical = renamed_dir.join(&new_name);
        tokio::fs::rename(&assembled, &canonical).await?;

        let registered = self.registry.create_if_absent(record.id, filename, &new_name, &actual_md5)?;
        if let RegisterOutcome::DuplicateSkip(id) = registered {
            debug!(process_id, filename, file_id = id, "re-processing an already registered file");
        }
        let file_id = registered.file_id();

        let job_id = self.enqueue_sync(process_id, file_id, &record, renamed_dir, &new_name);

        Ok(CompletionOutcome::Completed {
            file_id,
            original_filename: filename.to_string(),
            new_name,
            job_id,
        })
    }

    /// Queues the remote synchronization and report trigger for one
    /// registered file. Safe to re-run: an already synchronized object is
    /// skipped by the existence probe.
    ///
    /// The report trigger receives every canonical file registered so far
    /// for the sequencer record, paired in read order, so a completed
    /// reverse read re-reports the pair as a whole.
    fn enqueue_sync(
        &self,
        process_id: &str,
        file_id: i64,
        record: &SequencerRecord,
        renamed_dir: PathBuf,
        new_name: &str,
    ) -> JobId {
        let object = format!("{process_id}/{new_name}");
        let canonical = renamed_dir.join(new_name);
        let synchronizer = self.synchronizer.clone();
        let progress = self.progress.clone();
        let registry = self.registry.clone();
        let reports = self.reports.clone();
        let record_id = record.id;
        let sample_id = record.sample_id;
        let region = record.region.clone();
        let entity = object.clone();

        self.dispatcher.submit("sync_uploaded_file", &entity, move || {
            let synchronizer = synchronizer.clone();
            let progress = progress.clone();
            let registry = registry.clone();
            let reports = reports.clone();
            let object = object.clone();
            let canonical = canonical.clone();
            let renamed_dir = renamed_dir.clone();
            let region = region.clone();
            async move {
                let key = ProgressKey::File(file_id);
                if synchronizer.object_present(&object).await? {
                    debug!(object, "object already present, skipping transfer");
                    progress.set_progress(&key, 100).await;
                } else {
                    synchronizer.upload(&canonical, &object, &key).await?;
                }

                if let Some(reads) = paired_reads(registry.filenames_for_record(record_id)) {
                    reports.trigger(&renamed_dir, &reads, sample_id, &region).await;
                }
                Ok(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use bytes::Bytes;
    use object_sync::{FsObjectStore, ObjectSynchronizer};
    use parking_lot::Mutex;
    use sample_match::PairedReads;
    use tempfile::TempDir;

    use super::*;
    use crate::dispatch::JobStatus;
    use crate::sequencers::JsonSequencerRegistry;

    #[derive(Debug, Default)]
    struct RecordingReportTrigger {
        calls: Mutex<Vec<(PathBuf, PairedReads, i64, String)>>,
    }

    #[async_trait::async_trait]
    impl ReportTrigger for RecordingReportTrigger {
        async fn trigger(&self, renamed_dir: &Path, reads: &PairedReads, sample_id: i64, region: &str) {
            self.calls
                .lock()
                .push((renamed_dir.to_path_buf(), reads.clone(), sample_id, region.to_string()));
        }
    }

    fn pipeline_with(data: &TempDir, remote: &TempDir, reports: Arc<dyn ReportTrigger>) -> UploadPipeline {
        let registry = Arc::new(FileRegistry::open(data.path().join("registry.json")).unwrap());
        let progress: Arc<dyn ProgressStore> = registry.clone();
        let store = Arc::new(FsObjectStore::new(remote.path()));

        UploadPipeline {
            chunks: ChunkStore::new(data.path()),
            registry,
            sequencers: Arc::new(JsonSequencerRegistry::new(data.path())),
            synchronizer: Arc::new(ObjectSynchronizer::new(store, progress.clone())),
            progress,
            dispatcher: JobDispatcher::with_policy(Duration::from_millis(10), 3, Duration::from_secs(10)),
            reports,
            data_root: data.path().to_path_buf(),
        }
    }

    fn seed_record(data: &TempDir, process_id: &str, record: &SequencerRecord) {
        let dir = data.path().join(process_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sequencers.json"), serde_json::to_vec(&[record]).unwrap()).unwrap();
    }

    async fn wait_for_terminal(pipeline: &UploadPipeline, job_id: &JobId) {
        for _ in 0..200 {
            match pipeline.dispatcher.status(job_id) {
                Some(JobStatus::Succeeded) => return,
                Some(JobStatus::Failed { error }) => panic!("job failed: {error}"),
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        panic!("job never finished");
    }

    async fn upload_one(pipeline: &UploadPipeline, filename: &str, body: &'static [u8]) -> CompletionOutcome {
        pipeline
            .chunks
            .save_chunk("p1", filename, 1, Bytes::from_static(body))
            .await
            .unwrap();
        pipeline
            .complete_upload("p1", filename, 1, &integrity::bytes_md5_hex(body), Some(body.len() as u64))
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_report_receives_paired_reads_in_read_order() {
        let data = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let reports = Arc::new(RecordingReportTrigger::default());
        let pipeline = pipeline_with(&data, &remote, reports.clone());
        seed_record(&data, "p1", &SequencerRecord {
            id: 11,
            sample_id: 55,
            sequencer_id: "M00123-S7".to_string(),
            region: "V4".to_string(),
        });

        // The reverse read lands first. It reports alone.
        let job_id = match upload_one(&pipeline, "M00123-S7_R2_001.fastq.gz", b"reverse read").await {
            CompletionOutcome::Completed { job_id, .. } => job_id,
            other => panic!("unexpected outcome: {other:?}"),
        };
        wait_for_terminal(&pipeline, &job_id).await;

        let job_id = match upload_one(&pipeline, "M00123-S7_R1_001.fastq.gz", b"forward read").await {
            CompletionOutcome::Completed { job_id, .. } => job_id,
            other => panic!("unexpected outcome: {other:?}"),
        };
        wait_for_terminal(&pipeline, &job_id).await;

        let calls = reports.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, PairedReads {
            forward: "55_V4__R2_001.fastq.gz".to_string(),
            reverse: None,
        });
        // Once both reads are registered the pair is reported whole, the
        // lexicographically first canonical name as the forward read.
        assert_eq!(calls[1].1, PairedReads {
            forward: "55_V4__R1_001.fastq.gz".to_string(),
            reverse: Some("55_V4__R2_001.fastq.gz".to_string()),
        });
        assert_eq!(calls[1].0, data.path().join("p1/renamed"));
        assert_eq!(calls[1].2, 55);
        assert_eq!(calls[1].3, "V4");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_completion_rejects_non_component_names() {
        let data = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let pipeline = pipeline_with(&data, &remote, crate::report::NoOpReportTrigger::new());

        for (process_id, filename) in [("p1", "../../../evil.fastq.gz"), ("../p1", "a.fastq.gz")] {
            let outcome = pipeline
                .complete_upload(process_id, filename, 1, "d41d8cd98f00b204e9800998ecf8427e", None)
                .await
                .unwrap();
            assert_eq!(outcome, CompletionOutcome::Rejected {
                reason: "invalid process or file name".to_string(),
            });
        }
    }
}
