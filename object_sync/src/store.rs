use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, SyncError};

/// The narrow interface the synchronizer needs from a remote object store.
///
/// A backend implements only what it supports: a single-shot-only backend may
/// return `Unsupported` from `compose`, in which case only files under the
/// single-put limit can be synchronized to it.
#[async_trait]
pub trait RemoteObjectStore: std::fmt::Debug + Send + Sync {
    /// Atomic write of one object.
    async fn put(&self, name: &str, data: Bytes) -> Result<()>;

    /// Atomic write of one object from a byte range of a local file. The
    /// range is streamed, never buffered whole, so part memory stays bounded
    /// no matter how large the file is.
    async fn put_file(&self, name: &str, local: &Path, offset: u64, len: u64) -> Result<()>;

    /// Server-side join of `parts`, in order, into `dest`. Atomic from the
    /// caller's point of view: `dest` either appears complete or not at all.
    async fn compose(&self, parts: &[String], dest: &str) -> Result<()>;

    /// The store-reported MD5 of the object, base64-encoded.
    async fn object_md5_base64(&self, name: &str) -> Result<String>;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// Removes an object; absent objects are not an error.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Directory-backed object store: each object is a file under the root,
/// compose is a local concatenation, and the reported hash is an MD5 of the
/// file contents. Backs tests and single-host deployments.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write-then-persist into the root so readers never observe a partial
    /// object.
    fn write_atomic(&self, name: &str, write: impl FnOnce(&mut BufWriter<&File>) -> io::Result<()>) -> Result<()> {
        let path = self.object_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tempfile = tempfile::Builder::new()
            .prefix(&format!("{}.", std::process::id()))
            .suffix(".obj")
            .tempfile_in(&self.root)?;
        {
            let mut writer = BufWriter::new(tempfile.as_file());
            write(&mut writer)?;
            writer.flush()?;
        }
        tempfile.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteObjectStore for FsObjectStore {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        self.write_atomic(name, |writer| writer.write_all(&data))?;
        debug!(name, len = data.len(), "object stored");
        Ok(())
    }

    async fn put_file(&self, name: &str, local: &Path, offset: u64, len: u64) -> Result<()> {
        let this = self.clone();
        let object = name.to_string();
        let local = local.to_path_buf();
        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&this.root)?;
            this.write_atomic(&object, |writer| {
                let mut file = File::open(&local)?;
                file.seek(SeekFrom::Start(offset))?;
                io::copy(&mut file.take(len), writer)?;
                Ok(())
            })
        })
        .await??;
        debug!(name, offset, len, "object stored from file");
        Ok(())
    }

    async fn compose(&self, parts: &[String], dest: &str) -> Result<()> {
        if parts.is_empty() {
            return Err(SyncError::RemoteTransferFailure("compose of zero parts".to_string()));
        }

        let part_paths: Vec<PathBuf> = parts.iter().map(|p| self.object_path(p)).collect();
        for (part, path) in parts.iter().zip(&part_paths) {
            if !path.is_file() {
                return Err(SyncError::RemoteTransferFailure(format!("compose part {part} does not exist")));
            }
        }

        self.write_atomic(dest, |writer| {
            for path in &part_paths {
                let mut part = File::open(path)?;
                io::copy(&mut part, writer)?;
            }
            Ok(())
        })?;

        info!(dest, n_parts = parts.len(), "objects composed");
        Ok(())
    }

    async fn object_md5_base64(&self, name: &str) -> Result<String> {
        let hex = integrity::file_md5_hex(self.object_path(name))?;
        Ok(integrity::hex_md5_to_base64(&hex)?)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.object_path(name).is_file())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.object_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_exists_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        assert!(!store.exists("a/b.fastq.gz").await.unwrap());
        store.put("a/b.fastq.gz", Bytes::from_static(b"payload")).await.unwrap();
        assert!(store.exists("a/b.fastq.gz").await.unwrap());

        store.delete("a/b.fastq.gz").await.unwrap();
        assert!(!store.exists("a/b.fastq.gz").await.unwrap());
        // Deleting an absent object is a no-op.
        store.delete("a/b.fastq.gz").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_file_streams_a_byte_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let local = dir.path().join("local.bin");
        fs::write(&local, b"abcdefgh").unwrap();

        store.put_file("whole", &local, 0, 8).await.unwrap();
        assert_eq!(fs::read(dir.path().join("whole")).unwrap(), b"abcdefgh");

        store.put_file("mid", &local, 2, 3).await.unwrap();
        assert_eq!(fs::read(dir.path().join("mid")).unwrap(), b"cde");
    }

    #[tokio::test]
    async fn test_compose_joins_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("f.part-0001", Bytes::from_static(b"bbb")).await.unwrap();
        store.put("f.part-0000", Bytes::from_static(b"aaa")).await.unwrap();
        store
            .compose(&["f.part-0000".to_string(), "f.part-0001".to_string()], "f")
            .await
            .unwrap();

        assert_eq!(fs::read(dir.path().join("f")).unwrap(), b"aaabbb");
    }

    #[tokio::test]
    async fn test_compose_missing_part_fails_without_dest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("g.part-0000", Bytes::from_static(b"aaa")).await.unwrap();
        let err = store
            .compose(&["g.part-0000".to_string(), "g.part-0001".to_string()], "g")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteTransferFailure(_)));
        assert!(!store.exists("g").await.unwrap());
    }

    #[tokio::test]
    async fn test_reported_hash_matches_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("h", Bytes::new()).await.unwrap();
        assert_eq!(store.object_md5_base64("h").await.unwrap(), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }
}
