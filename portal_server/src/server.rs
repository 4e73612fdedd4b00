//! Router assembly and state wiring for the portal server.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use chunk_store::ChunkStore;
use object_sync::{FsObjectStore, ObjectSynchronizer};
use progress_tracking::ProgressStore;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::PortalArgs;
use crate::dispatch::JobDispatcher;
use crate::handlers;
use crate::pipeline::UploadPipeline;
use crate::registry::FileRegistry;
use crate::report::{CommandReportTrigger, NoOpReportTrigger, ReportTrigger};
use crate::sequencers::JsonSequencerRegistry;

/// Individual browser chunks stay well under this.
const MAX_CHUNK_BODY: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chunk", post(handlers::post_chunk).get(handlers::get_chunk))
        .route("/file_upload_completed", post(handlers::file_upload_completed))
        .route("/progress", get(handlers::get_progress))
        .route("/health", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(MAX_CHUNK_BODY))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wires the pipeline from configuration. Collaborators are injected here
/// once, scoped to the application.
pub fn build_state(args: &PortalArgs) -> anyhow::Result<AppState> {
    let registry = Arc::new(FileRegistry::open(&args.registry_path)?);
    let progress: Arc<dyn ProgressStore> = registry.clone();

    let store = Arc::new(FsObjectStore::new(&args.object_store_root));
    let synchronizer = Arc::new(ObjectSynchronizer::new(store, progress.clone()));

    let reports: Arc<dyn ReportTrigger> = match &args.report_command {
        Some(program) => Arc::new(CommandReportTrigger::new(program)),
        None => NoOpReportTrigger::new(),
    };

    let pipeline = UploadPipeline {
        chunks: ChunkStore::new(&args.data_root),
        registry,
        sequencers: Arc::new(JsonSequencerRegistry::new(&args.data_root)),
        synchronizer,
        progress,
        dispatcher: JobDispatcher::new(),
        reports,
        data_root: args.data_root.clone(),
    };

    Ok(AppState {
        pipeline: Arc::new(pipeline),
    })
}

pub async fn serve(args: PortalArgs) -> anyhow::Result<()> {
    let state = build_state(&args)?;
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(addr = %args.bind, data_root = %args.data_root.display(), "sample portal listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
