use std::cmp::min;
use std::path::Path;
use std::sync::Arc;

use progress_tracking::{ProgressKey, ProgressStore};
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::store::RemoteObjectStore;

pub const MIB: u64 = 1024 * 1024;

/// Size-tier thresholds for one upload. The defaults are the documented
/// operating points; tests shrink them to exercise every tier with small
/// payloads.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// At or below this size the file goes up as one atomic put.
    pub single_put_limit: u64,
    /// At or below this size the file is split into `part_size` parts.
    pub fixed_part_limit: u64,
    /// Part size for the fixed-part tier.
    pub part_size: u64,
    /// Above `fixed_part_limit` the file is split this many ways, keeping
    /// the part count bounded for arbitrarily large files. Stays under the
    /// 32-part compose limit of GCS-style backends, so composition is a
    /// single call.
    pub large_file_parts: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            single_put_limit: 30 * MIB,
            fixed_part_limit: 700 * MIB,
            part_size: 30 * MIB,
            large_file_parts: 30,
        }
    }
}

/// How an upload went through, for logging and tier assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub bytes: u64,
    /// 1 for a single-shot put.
    pub n_parts: u64,
}

/// Durably copies local files into a remote object store, choosing a
/// size-dependent strategy and verifying the stored object's hash.
///
/// Failure semantics: any part failure aborts the call and leaves already
/// uploaded temporary parts in place for manual cleanup; retrying the whole
/// call is safe and is owned by the job dispatcher, never done here.
#[derive(Debug)]
pub struct ObjectSynchronizer {
    store: Arc<dyn RemoteObjectStore>,
    progress: Arc<dyn ProgressStore>,
    config: SyncConfig,
}

impl ObjectSynchronizer {
    pub fn new(store: Arc<dyn RemoteObjectStore>, progress: Arc<dyn ProgressStore>) -> Self {
        Self::with_config(store, progress, SyncConfig::default())
    }

    pub fn with_config(store: Arc<dyn RemoteObjectStore>, progress: Arc<dyn ProgressStore>, config: SyncConfig) -> Self {
        Self { store, progress, config }
    }

    /// Existence probe so an idempotent job retry can skip re-uploading an
    /// object that already made it.
    pub async fn object_present(&self, object: &str) -> Result<bool> {
        self.store.exists(object).await
    }

    /// Uploads `local` as `object`, reporting percentages under `key`.
    ///
    /// Multi-part transfers emit progress after each part; single-shot
    /// transfers jump straight to 100 on completion. On a remote-hash
    /// mismatch the composed object is left in place for inspection and
    /// `IntegrityMismatch` returned; the object must not be treated as
    /// synchronized.
    pub async fn upload(&self, local: &Path, object: &str, key: &ProgressKey) -> Result<SyncOutcome> {
        let size = tokio::fs::metadata(local).await?.len();

        let local_path = local.to_path_buf();
        let local_hex = tokio::task::spawn_blocking(move || integrity::file_md5_hex(&local_path)).await??;

        let n_parts = if size <= self.config.single_put_limit {
            self.store.put_file(object, local, 0, size).await?;
            1
        } else {
            self.upload_parts(local, object, size, key).await?
        };

        let remote = self.store.object_md5_base64(object).await?;
        let local_b64 = integrity::hex_md5_to_base64(&local_hex)?;
        if remote != local_b64 {
            warn!(object, remote, local = local_hex, "remote hash mismatch after upload, leaving object for inspection");
            return Err(SyncError::IntegrityMismatch {
                object: object.to_string(),
                remote,
            });
        }

        self.progress.set_progress(key, 100).await;
        info!(object, size, n_parts, "object synchronized");
        Ok(SyncOutcome { bytes: size, n_parts })
    }

    /// Chunk-and-compose path: byte ranges of the local file go up as
    /// independently named temporary objects, the store joins them in
    /// ordinal order, then the temporaries are deleted. Ranges are streamed
    /// by the store, so part memory stays bounded no matter the file size.
    async fn upload_parts(&self, local: &Path, object: &str, size: u64, key: &ProgressKey) -> Result<u64> {
        let part_size = if size <= self.config.fixed_part_limit {
            self.config.part_size
        } else {
            size.div_ceil(self.config.large_file_parts)
        };
        let n_parts = size.div_ceil(part_size);

        let mut part_names = Vec::with_capacity(n_parts as usize);
        let mut uploaded = 0u64;

        for ordinal in 0..n_parts {
            let len = min(part_size, size - uploaded);

            let part_name = format!("{object}.part-{ordinal:04}");
            self.store.put_file(&part_name, local, uploaded, len).await?;
            part_names.push(part_name);

            uploaded += len;
            self.progress.set_progress(key, (uploaded * 100 / size) as u8).await;
        }

        self.store.compose(&part_names, object).await?;
        for part in &part_names {
            self.store.delete(part).await?;
        }

        Ok(n_parts)
    }
}
