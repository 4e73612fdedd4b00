//! Laboratory-sample submission portal: resumable chunked ingestion of raw
//! sequencing files, integrity verification, sample identity matching, and
//! background synchronization to remote object storage.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod sequencers;
pub mod server;

pub use error::{PortalError, Result};
pub use server::{build_state, router, AppState};
