//! HTTP handlers for the browser-facing upload protocol.
//!
//! All handlers extract request data, call into the pipeline, and map the
//! outcome to a response; hard errors go through `error_to_response`.
//! Chunk endpoints answer plain success/failure with no silent retries; the
//! progress endpoint always answers with the last known value.

use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use progress_tracking::{ProgressKey, ProgressStore};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::PortalError;
use crate::pipeline::CompletionOutcome;
use crate::server::AppState;

/// Query parameters of the browser resume protocol.
#[derive(Debug, Deserialize)]
pub struct ChunkParams {
    pub process_id: String,
    #[serde(rename = "resumableChunkNumber")]
    pub chunk_number: u32,
    #[serde(rename = "resumableFilename")]
    pub filename: Option<String>,
    #[serde(rename = "resumableTotalSize")]
    pub total_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessParams {
    pub process_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FileUploadCompletedRequest {
    pub filename: String,
    pub filechunks: u32,
    pub md5: String,
    #[serde(default)]
    pub total_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub result: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressParams {
    pub file_id: Option<i64>,
    pub bucket: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub progress: Option<u8>,
}

/// Maps pipeline failures to HTTP status codes. Names that are not single
/// path components are a client error, everything else is internal.
fn error_to_response(e: PortalError) -> Response {
    let status = match &e {
        PortalError::ChunkStore(chunk_store::ChunkStoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!(error = %e, "request failed");
    (status, e.to_string()).into_response()
}

/// POST /chunk?process_id&resumableChunkNumber
///
/// Stores one chunk from the multipart body. Re-sending an already stored
/// chunk overwrites it cleanly.
pub async fn post_chunk(
    State(state): State<AppState>,
    Query(params): Query<ChunkParams>,
    mut multipart: Multipart,
) -> Response {
    let mut filename = params.filename.clone();
    let mut data: Option<Bytes> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if filename.is_none() {
            filename = field.file_name().map(|s| s.to_string());
        }
        match field.bytes().await {
            Ok(bytes) => {
                data = Some(bytes);
                break;
            },
            Err(e) => return (StatusCode::BAD_REQUEST, format!("Error reading chunk body: {e}")).into_response(),
        }
    }

    let Some(filename) = filename else {
        return (StatusCode::BAD_REQUEST, "Missing filename").into_response();
    };
    let Some(data) = data else {
        return (StatusCode::BAD_REQUEST, "Missing chunk body").into_response();
    };

    let chunks = &state.pipeline.chunks;
    if let Some(total_size) = params.total_size {
        if let Err(e) = chunks.record_declared_size(&params.process_id, &filename, total_size).await {
            return error_to_response(e.into());
        }
    }

    match chunks.save_chunk(&params.process_id, &filename, params.chunk_number, data).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_to_response(e.into()),
    }
}

/// GET /chunk?process_id&resumableChunkNumber&resumableFilename
///
/// Resume protocol probe: 200 if the chunk is already stored (the client
/// skips re-sending it), 204 otherwise.
pub async fn get_chunk(State(state): State<AppState>, Query(params): Query<ChunkParams>) -> Response {
    let Some(filename) = params.filename else {
        return (StatusCode::BAD_REQUEST, "Missing resumableFilename").into_response();
    };

    if state.pipeline.chunks.chunk_exists(&params.process_id, &filename, params.chunk_number).await {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

/// POST /file_upload_completed?process_id
///
/// The client reports all chunks sent: reassemble, verify, match, register
/// and enqueue the synchronization job. Mismatches and unmatched filenames
/// are reported in the body with `result: 0`.
pub async fn file_upload_completed(
    State(state): State<AppState>,
    Query(params): Query<ProcessParams>,
    Json(req): Json<FileUploadCompletedRequest>,
) -> Response {
    let outcome = state
        .pipeline
        .complete_upload(&params.process_id, &req.filename, req.filechunks, &req.md5, req.total_size)
        .await;

    match outcome {
        Ok(CompletionOutcome::Completed {
            file_id,
            original_filename,
            new_name,
            job_id,
        }) => Json(CompletionResponse {
            result: 1,
            original_filename: Some(original_filename),
            new_name: Some(new_name),
            file_id: Some(file_id),
            job_id: Some(job_id.to_string()),
            message: None,
        })
        .into_response(),
        Ok(CompletionOutcome::Rejected { reason }) => Json(CompletionResponse {
            result: 0,
            original_filename: Some(req.filename),
            new_name: None,
            file_id: None,
            job_id: None,
            message: Some(reason),
        })
        .into_response(),
        Err(e) => error_to_response(e),
    }
}

/// GET /progress?file_id=... or ?bucket=...
///
/// Always answers with the last known good percentage (or null for "not
/// started"), even while the underlying job is failing.
pub async fn get_progress(State(state): State<AppState>, Query(params): Query<ProgressParams>) -> Response {
    let key = match (params.file_id, params.bucket) {
        (Some(id), _) => ProgressKey::File(id),
        (None, Some(bucket)) => ProgressKey::Bucket(bucket),
        (None, None) => return (StatusCode::BAD_REQUEST, "file_id or bucket required").into_response(),
    };

    let progress = state.pipeline.progress.progress(&key).await;
    Json(ProgressResponse { progress }).into_response()
}

/// GET /health
///
/// Liveness probe with no-cache headers.
pub async fn health_check() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    (StatusCode::OK, headers).into_response()
}
