use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration for the sample portal server.
#[derive(Parser, Debug, Clone)]
#[command(name = "portal_server", about = "Sequencing-sample upload and synchronization portal")]
pub struct PortalArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1:8087")]
    pub bind: SocketAddr,

    /// Root of the per-process working directories (uploads in progress and
    /// renamed canonical files).
    #[arg(long, default_value = "./portal_data")]
    pub data_root: PathBuf,

    /// Root directory of the filesystem-backed object store.
    #[arg(long, default_value = "./object_store")]
    pub object_store_root: PathBuf,

    /// Path of the persisted uploaded-files registry.
    #[arg(long, default_value = "./portal_data/uploaded_files.json")]
    pub registry_path: PathBuf,

    /// External program invoked (fire-and-forget) for report generation
    /// after each synchronized file.
    #[arg(long)]
    pub report_command: Option<PathBuf>,
}
