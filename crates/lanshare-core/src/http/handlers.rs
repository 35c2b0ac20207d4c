use super::AppState;
use super::page::render_index;
use crate::speedtest::{UploadTrial, unix_now_secs};
use crate::store::StoreError;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

const NO_FILE_PART: &str = "No file part";
const NO_SELECTED_FILE: &str = "No selected file";
const FILE_NOT_FOUND: &str = "File not found";

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    message: &'static str,
    filename: String,
    size: u64,
    upload_speed: String,
}

#[derive(Serialize)]
struct GenerateResponse {
    success: bool,
    filename: String,
    size_mb: u64,
}

#[derive(Serialize)]
struct SpeedtestUploadResponse {
    success: bool,
    upload_speed: f64,
    upload_speed_formatted: String,
    duration: String,
}

/// `{ "success": false, "message": ... }`
fn failure(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(json!({ "success": false, "message": message.into() }))
}

fn internal_error(context: &str, e: &dyn std::fmt::Display) -> Response {
    error!("{}: {}", context, e);
    (StatusCode::INTERNAL_SERVER_ERROR, failure(format!("{context}: {e}"))).into_response()
}

fn attachment(file: File, name: &str, size_bytes: u64) -> Response {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    let headers = [
        (header::CONTENT_TYPE, mime.to_string()),
        (header::CONTENT_LENGTH, size_bytes.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        ),
    ];
    let stream = ReaderStream::new(file);
    (headers, Body::from_stream(stream)).into_response()
}

pub(super) async fn index(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list().await {
        Ok(mut files) => {
            files.sort_by(|a, b| a.name.cmp(&b.name));
            Html(render_index(&files)).into_response()
        }
        Err(e) => internal_error("Failed to list files", &e),
    }
}

pub(super) async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let Ok(mut multipart) = multipart else {
        return failure(NO_FILE_PART).into_response();
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return failure(NO_FILE_PART).into_response(),
            Err(e) => {
                warn!("Malformed upload: {}", e);
                return failure(e.body_text()).into_response();
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return failure(NO_SELECTED_FILE).into_response();
        }

        return match state.store.save(&file_name, field).await {
            Ok(saved) => {
                let speed = saved.upload_speed_mb_s();
                Json(UploadResponse {
                    success: true,
                    message: "File uploaded successfully",
                    filename: saved.name,
                    size: saved.size_bytes,
                    upload_speed: format!("{speed:.2} MB/s"),
                })
                .into_response()
            }
            Err(e @ (StoreError::InvalidName | StoreError::Upload(_))) => {
                warn!("Upload of {:?} rejected: {}", file_name, e);
                failure(e.to_string()).into_response()
            }
            Err(e) => internal_error("Failed to save file", &e),
        };
    }
}

pub(super) async fn download(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let opened = match state.store.open_for_download(&filename).await {
        Ok(opened) => opened,
        Err(StoreError::NotFound(name)) => {
            debug!("Download of missing file {}", name);
            return (StatusCode::NOT_FOUND, failure(FILE_NOT_FOUND)).into_response();
        }
        Err(e) => return internal_error("Failed to open file", &e),
    };

    match state.store.record_download(&opened.name).await {
        Ok(count) => info!("Download {} (#{})", opened.name, count),
        Err(e) => return internal_error("Failed to update download stats", &e),
    }

    attachment(opened.file, &opened.name, opened.size_bytes)
}

pub(super) async fn delete(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Redirect {
    if let Err(e) = state.store.delete(&filename).await {
        error!("Failed to delete {}: {}", filename, e);
    }
    Redirect::to("/")
}

pub(super) async fn generate_speedtest_file(
    State(state): State<Arc<AppState>>,
    Path(size): Path<u64>,
) -> Response {
    match state.speedtest.generate(size).await {
        Ok(generated) => Json(GenerateResponse {
            success: true,
            filename: generated.filename,
            size_mb: generated.size_mb,
        })
        .into_response(),
        Err(e) => {
            error!("Failed to generate speedtest file: {}", e);
            failure(e.to_string()).into_response()
        }
    }
}

pub(super) async fn speedtest_download(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let Some(path) = state.speedtest.locate(&filename).await else {
        return (StatusCode::NOT_FOUND, FILE_NOT_FOUND).into_response();
    };

    // 清理可能在 locate 之后发生
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(_) => return (StatusCode::NOT_FOUND, FILE_NOT_FOUND).into_response(),
    };
    let size_bytes = match file.metadata().await {
        Ok(m) => m.len(),
        Err(e) => return internal_error("Failed to read speedtest file", &e),
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    attachment(file, &name, size_bytes)
}

pub(super) async fn speedtest_upload(multipart: Result<Multipart, MultipartRejection>) -> Response {
    let Ok(mut multipart) = multipart else {
        return failure(NO_FILE_PART).into_response();
    };

    let mut file_name: Option<String> = None;
    let mut received: u64 = 0;
    let mut file_size: Option<String> = None;
    let mut start_time: Option<String> = None;

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed speedtest upload: {}", e);
                return failure(e.body_text()).into_response();
            }
        };

        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                file_name = Some(field.file_name().unwrap_or_default().to_string());
                // 内容直接丢弃
                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => received += chunk.len() as u64,
                        Ok(None) => break,
                        Err(e) => return failure(e.body_text()).into_response(),
                    }
                }
            }
            Some(key @ ("file_size" | "start_time")) => {
                let is_size = key == "file_size";
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(e) => return failure(e.body_text()).into_response(),
                };
                if is_size {
                    file_size = Some(value);
                } else {
                    start_time = Some(value);
                }
            }
            _ => {}
        }
    }
    let now = unix_now_secs();

    match file_name.as_deref() {
        None => return failure(NO_FILE_PART).into_response(),
        Some("") => return failure(NO_SELECTED_FILE).into_response(),
        Some(_) => {}
    }

    let trial = match UploadTrial::from_fields(file_size.as_deref(), start_time.as_deref()) {
        Ok(trial) => trial,
        Err(e) => return failure(e.to_string()).into_response(),
    };
    let result = trial.measure(now);

    info!(
        "Upload speed trial: {} bytes received, {} reported, {}",
        received,
        trial.file_size,
        result.speed_formatted()
    );

    Json(SpeedtestUploadResponse {
        success: true,
        upload_speed: result.speed_mb_s,
        upload_speed_formatted: result.speed_formatted(),
        duration: result.duration_formatted(),
    })
    .into_response()
}

pub(super) async fn clean_speedtest_files(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    match state.speedtest.clean_all().await {
        Ok(count) => Json(json!({
            "success": true,
            "message": format!("Removed {count} speedtest files"),
        })),
        Err(e) => {
            error!("Failed to clean speedtest files: {}", e);
            failure(e.to_string())
        }
    }
}
