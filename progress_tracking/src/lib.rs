//! Durable per-entity transfer progress, queryable by polling clients that
//! are not attached to the long-running job doing the transfer.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use parking_lot::RwLock;

/// What a progress percentage is attached to: a single uploaded file or a
/// bucket-wide aggregate job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgressKey {
    File(i64),
    Bucket(String),
}

impl Display for ProgressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressKey::File(id) => write!(f, "file:{id}"),
            ProgressKey::Bucket(name) => write!(f, "bucket:{name}"),
        }
    }
}

/// Store of transfer percentages, written many times per second by in-flight
/// jobs and read by concurrent pollers.
///
/// Within one transfer attempt values are monotonically non-decreasing; only
/// an explicit `reset` starts a key over. Updates to distinct keys never
/// interfere.
#[async_trait::async_trait]
pub trait ProgressStore: std::fmt::Debug + Send + Sync {
    /// Records `percent` (clamped to 100) for `key`. A late write lower than
    /// an already-observed value is dropped.
    async fn set_progress(&self, key: &ProgressKey, percent: u8);

    /// The last recorded percentage, or `None` for "not yet started".
    async fn progress(&self, key: &ProgressKey) -> Option<u8>;

    /// Explicit restart of a transfer: clears the key back to "not started".
    async fn reset(&self, key: &ProgressKey);
}

/// In-memory `ProgressStore`. The map write is the only critical section, so
/// per-part updates during a transfer never become a bottleneck.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    inner: RwLock<HashMap<ProgressKey, u8>>,
}

impl MemoryProgressStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait::async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn set_progress(&self, key: &ProgressKey, percent: u8) {
        let percent = percent.min(100);
        let mut map = self.inner.write();
        let entry = map.entry(key.clone()).or_insert(0);
        if percent > *entry {
            *entry = percent;
        }
    }

    async fn progress(&self, key: &ProgressKey) -> Option<u8> {
        self.inner.read().get(key).copied()
    }

    async fn reset(&self, key: &ProgressKey) {
        self.inner.write().remove(key);
    }
}

/// Progress sink for callers that do not track progress.
#[derive(Debug, Default)]
pub struct NoOpProgressStore;

impl NoOpProgressStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait::async_trait]
impl ProgressStore for NoOpProgressStore {
    async fn set_progress(&self, _key: &ProgressKey, _percent: u8) {}

    async fn progress(&self, _key: &ProgressKey) -> Option<u8> {
        None
    }

    async fn reset(&self, _key: &ProgressKey) {}
}
