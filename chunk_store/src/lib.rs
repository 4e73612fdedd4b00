//! On-disk storage for in-flight upload chunks and their reassembly.
//!
//! Browsers send large files as discrete chunks, each of which may arrive out
//! of order, more than once, or not at all until a reconnect. Chunks for one
//! upload session live under the owning process's working directory and are
//! disposable: once concatenated into the reassembled file they are deleted.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

use bytes::Bytes;
use tracing::{debug, warn};

mod error;

pub use error::{ChunkStoreError, Result};

/// Suffix of the per-session metadata file holding the declared total size.
const SIZE_META_SUFFIX: &str = ".size";

/// Whether `name` is usable as a single path component under the store root.
///
/// Process ids and filenames arrive straight from the client; anything with
/// a separator or dot-dot would escape the per-process working directory.
pub fn clean_path_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn check_components(folder: &str, filename: &str) -> Result<()> {
    for name in [folder, filename] {
        if !clean_path_component(name) {
            return Err(ChunkStoreError::InvalidName(name.to_string()));
        }
    }
    Ok(())
}

/// Stores chunks as `<root>/<folder>/uploads/<filename>.part<ordinal>`.
///
/// Ordinals are 1-based, matching the browser resume protocol. Writes to
/// distinct ordinals of one session may proceed concurrently; the store never
/// blocks waiting for a missing ordinal. Chunk and assembly writes run on the
/// blocking pool so a large session never stalls a runtime worker.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The uploads-in-progress directory for one process folder.
    pub fn upload_dir(&self, folder: &str) -> PathBuf {
        self.root.join(folder).join("uploads")
    }

    fn chunk_path(&self, folder: &str, filename: &str, ordinal: u32) -> PathBuf {
        self.upload_dir(folder).join(format!("{filename}.part{ordinal}"))
    }

    fn size_meta_path(&self, folder: &str, filename: &str) -> PathBuf {
        self.upload_dir(folder).join(format!("{filename}{SIZE_META_SUFFIX}"))
    }

    /// Writes one chunk. Re-sending the same ordinal overwrites cleanly, so a
    /// browser retry after a broken connection is a no-op for reassembly.
    pub async fn save_chunk(&self, folder: &str, filename: &str, ordinal: u32, bytes: Bytes) -> Result<()> {
        check_components(folder, filename)?;
        let this = self.clone();
        let folder = folder.to_string();
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || this.save_chunk_sync(&folder, &filename, ordinal, &bytes)).await?
    }

    fn save_chunk_sync(&self, folder: &str, filename: &str, ordinal: u32, bytes: &[u8]) -> Result<()> {
        let dir = self.upload_dir(folder);
        fs::create_dir_all(&dir)?;

        // Write to a temp file in the same directory, then persist; a
        // concurrent existence poll never observes a partial chunk.
        let tempfile = tempfile::Builder::new()
            .prefix(&format!("{}.", std::process::id()))
            .suffix(".chunk")
            .tempfile_in(&dir)?;
        {
            let mut writer = BufWriter::new(&tempfile);
            writer.write_all(bytes)?;
            writer.flush()?;
        }

        let chunk_path = self.chunk_path(folder, filename, ordinal);
        tempfile.persist(&chunk_path).map_err(|e| e.error)?;

        debug!(folder, filename, ordinal, len = bytes.len(), "chunk stored");
        Ok(())
    }

    /// Records the total size the client declared for this session. Created
    /// implicitly with the first chunk that carries it; idempotent.
    pub async fn record_declared_size(&self, folder: &str, filename: &str, total_size: u64) -> Result<()> {
        check_components(folder, filename)?;
        let dir = self.upload_dir(folder);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(self.size_meta_path(folder, filename), total_size.to_string()).await?;
        Ok(())
    }

    /// The declared total size for this session, if the client ever sent one.
    pub async fn declared_size(&self, folder: &str, filename: &str) -> Option<u64> {
        if check_components(folder, filename).is_err() {
            return None;
        }
        let contents = tokio::fs::read_to_string(self.size_meta_path(folder, filename)).await.ok()?;
        contents.trim().parse().ok()
    }

    /// Used by the client polling protocol to decide whether a chunk can be
    /// skipped after a reconnect.
    pub async fn chunk_exists(&self, folder: &str, filename: &str, ordinal: u32) -> bool {
        check_components(folder, filename).is_ok()
            && tokio::fs::try_exists(self.chunk_path(folder, filename, ordinal))
                .await
                .unwrap_or(false)
    }

    /// Ordinals in `1..=declared_count` that have not been stored yet. The
    /// caller checks this is empty before asking for reassembly.
    pub async fn missing_chunks(&self, folder: &str, filename: &str, declared_count: u32) -> Vec<u32> {
        if check_components(folder, filename).is_err() {
            return (1..=declared_count).collect();
        }

        let mut missing = Vec::new();
        for ordinal in 1..=declared_count {
            if !tokio::fs::try_exists(self.chunk_path(folder, filename, ordinal))
                .await
                .unwrap_or(false)
            {
                missing.push(ordinal);
            }
        }
        missing
    }

    /// Concatenates chunks `1..=declared_count` in ordinal order into one
    /// file and returns its path.
    ///
    /// Chunk artifacts are deleted once concatenated, whether or not the
    /// size check then passes; they are disposable after concatenation. On a
    /// declared-size disagreement the bad assembly is removed and
    /// `SizeMismatch` returned.
    pub async fn reassemble(
        &self,
        folder: &str,
        filename: &str,
        declared_count: u32,
        declared_size: Option<u64>,
    ) -> Result<PathBuf> {
        check_components(folder, filename)?;
        let this = self.clone();
        let folder = folder.to_string();
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || this.reassemble_sync(&folder, &filename, declared_count, declared_size))
            .await?
    }

    fn reassemble_sync(
        &self,
        folder: &str,
        filename: &str,
        declared_count: u32,
        declared_size: Option<u64>,
    ) -> Result<PathBuf> {
        let dir = self.upload_dir(folder);
        let assembled_path = dir.join(filename);

        let tempfile = tempfile::Builder::new()
            .prefix(&format!("{}.", std::process::id()))
            .suffix(".assembly")
            .tempfile_in(&dir)?;
        {
            let mut writer = BufWriter::new(&tempfile);
            let mut buf = [0u8; 64 * 1024];

            for ordinal in 1..=declared_count {
                let chunk_path = self.chunk_path(folder, filename, ordinal);
                let mut chunk = File::open(&chunk_path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        ChunkStoreError::MissingChunk {
                            filename: filename.to_string(),
                            ordinal,
                        }
                    } else {
                        e.into()
                    }
                })?;

                loop {
                    let n = chunk.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    writer.write_all(&buf[..n])?;
                }
            }
            writer.flush()?;
        }

        tempfile.persist(&assembled_path).map_err(|e| e.error)?;

        // The constituent chunks are no longer needed regardless of what the
        // size check below says.
        self.remove_session_artifacts(folder, filename, declared_count);

        let actual = fs::metadata(&assembled_path)?.len();
        if let Some(expected) = declared_size {
            if actual != expected {
                warn!(folder, filename, expected, actual, "reassembled size mismatch, discarding assembly");
                let _ = fs::remove_file(&assembled_path);
                return Err(ChunkStoreError::SizeMismatch { expected, actual });
            }
        }

        debug!(folder, filename, declared_count, size = actual, "session reassembled");
        Ok(assembled_path)
    }

    /// Abandonment cleanup: removes any stored chunks and session metadata.
    pub async fn discard(&self, folder: &str, filename: &str, declared_count: u32) {
        if check_components(folder, filename).is_err() {
            return;
        }
        let this = self.clone();
        let folder = folder.to_string();
        let filename = filename.to_string();
        let _ = tokio::task::spawn_blocking(move || {
            this.remove_session_artifacts(&folder, &filename, declared_count);
        })
        .await;
    }

    fn remove_session_artifacts(&self, folder: &str, filename: &str, declared_count: u32) {
        for ordinal in 1..=declared_count {
            let _ = fs::remove_file(self.chunk_path(folder, filename, ordinal));
        }
        let _ = fs::remove_file(self.size_meta_path(folder, filename));
    }
}
