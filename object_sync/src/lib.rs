//! Remote object-storage synchronization: size-tiered chunk-and-compose
//! uploads with hash verification and per-part progress reporting.

pub mod error;
mod store;
mod synchronizer;

pub use error::{Result, SyncError};
pub use store::{FsObjectStore, RemoteObjectStore};
pub use synchronizer::{ObjectSynchronizer, SyncConfig, SyncOutcome, MIB};
