use std::path::Path;

use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::config::replay;
use crate::error::{AppError, AppResult};
use crate::recording::{Recording, RecordingMeta, Summary};
use crate::transcript::{format_transcript, truncate_transcript, TranscriptSegment};

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    path: String,
}

/// Content type from the extension; anything unknown is opaque bytes.
fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "txt" | "md" | "log" | "csv" | "toml" | "yaml" | "yml" | "rs" | "py" | "js" | "ts" | "css"
        | "sh" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// `GET /api/file?path=`: stream a file from inside the root.
pub async fn stream_file(State(state): State<AppState>, Query(query): Query<FileQuery>) -> AppResult<Response> {
    let (path, len) = state.access.stream_target(&query.path)?;
    let file = tokio::fs::File::open(&path).await.map_err(AppError::from_io)?;
    tracing::debug!(path = %path.display(), bytes = len, "Streaming file");

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

pub async fn list_recordings(State(state): State<AppState>) -> AppResult<Json<Vec<RecordingMeta>>> {
    let list = state.with_store(|store| store.list()).await?;
    Ok(Json(list))
}

pub async fn get_recording(State(state): State<AppState>, UrlPath(id): UrlPath<String>) -> AppResult<Json<Recording>> {
    let recording = state.with_store(move |store| store.load(&id)).await?;
    Ok(Json(recording))
}

pub async fn delete_recording(State(state): State<AppState>, UrlPath(id): UrlPath<String>) -> AppResult<StatusCode> {
    state.with_store(move |store| store.delete(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    segments: Vec<TranscriptSegment>,
    text: String,
}

pub async fn get_transcript(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> AppResult<Json<TranscriptResponse>> {
    let classifier = state.classifier.clone();
    let response = state
        .with_store(move |store| {
            let recording = store.load(&id)?;
            let segments = classifier.classify(&recording.events);
            let text = format_transcript(&segments);
            Ok(TranscriptResponse { segments, text })
        })
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    #[serde(flatten)]
    summary: Summary,
    stale: bool,
}

pub async fn get_summary(State(state): State<AppState>, UrlPath(id): UrlPath<String>) -> AppResult<Json<SummaryResponse>> {
    let response = state
        .with_store(move |store| {
            let recording = store.load(&id)?;
            let summary = store
                .load_summary(&id)?
                .ok_or_else(|| AppError::NotFound(format!("no summary for recording {}", id)))?;
            Ok(SummaryResponse {
                stale: summary.is_stale(&recording),
                summary,
            })
        })
        .await?;
    Ok(Json(response))
}

/// Classify, summarize through the LLM and cache the result beside the
/// recording.
pub async fn generate_summary(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> AppResult<Json<SummaryResponse>> {
    let classifier = state.classifier.clone();
    let load_id = id.clone();
    let (transcript, event_count) = state
        .with_store(move |store| {
            let recording = store.load(&load_id)?;
            let segments = classifier.classify(&recording.events);
            let transcript = truncate_transcript(&format_transcript(&segments), replay::TRANSCRIPT_CEILING);
            Ok((transcript, recording.events.len()))
        })
        .await?;

    let summary = state.llm.summarize(&transcript, event_count).await?;
    let cached = summary.clone();
    let save_id = id.clone();
    state.with_store(move |store| store.save_summary(&save_id, &cached)).await?;
    tracing::info!(recording_id = %id, events = summary.event_count, "Summary generated");
    Ok(Json(SummaryResponse { summary, stale: false }))
}
