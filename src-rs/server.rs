//! Label persistence service.
//!
//! Accepts a label document on `POST /save-label`, re-derives every label's
//! `intensityMatrix` from the authoritative matrix loaded at startup, and
//! writes the enriched `data` part into the labels directory.
//!
//! Responses are plaintext. Every response carries the CORS headers for the
//! configured origin; any `OPTIONS` request answers `204`.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::dataset::Dataset;
use crate::error::{HeatmapError, Result};
use crate::labels::LabelData;
use crate::persist::SAVE_LABEL_PATH;

pub const DEFAULT_ALLOW_ORIGIN: &str = "http://localhost:9000";
/// Environment fallback for the labels directory.
pub const LABELS_DIR_ENV: &str = "HOTMAP_LABELS_DIR";
pub const DEFAULT_LABELS_DIR: &str = "data/labels";
const MAX_FILE_NAME_LEN: usize = 255;

/// Request-level failures, each with a fixed status and plaintext body.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Missing file name or label data")]
    MissingFields,
    #[error("Invalid file name")]
    InvalidFileName,
    /// Unusable labels or label bounds; the body is the inner message.
    #[error("{0}")]
    InvalidLabelFile(HeatmapError),
    #[error("Error saving label")]
    Write(String),
    #[error("Not Found")]
    NotFound,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidJson
            | ServiceError::MissingFields
            | ServiceError::InvalidFileName
            | ServiceError::InvalidLabelFile(_) => StatusCode::BAD_REQUEST,
            ServiceError::Write(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Resolve the labels directory: flag, then `HOTMAP_LABELS_DIR`, then `data/labels`.
pub fn labels_dir_from(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| {
        std::env::var(LABELS_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    })
    .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_DIR))
}

pub fn mb_to_bytes(mb: usize) -> usize {
    mb.saturating_mul(1024 * 1024)
}

/// Accepts only a single plain file name; appends `.json` when missing.
pub fn validate_file_name(raw: &str) -> std::result::Result<String, ServiceError> {
    let name = raw.trim();
    if name.is_empty()
        || name.len() > MAX_FILE_NAME_LEN
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0', ':'])
    {
        return Err(ServiceError::InvalidFileName);
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(ServiceError::InvalidFileName),
    }
    if name.to_ascii_lowercase().ends_with(".json") {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}.json"))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Service state shared by all handlers.
#[derive(Debug)]
pub struct LabelService {
    dataset: Dataset,
    labels_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LabelService {
    pub fn new(dataset: Dataset, labels_dir: impl Into<PathBuf>) -> Result<Self> {
        let labels_dir = labels_dir.into();
        fs::create_dir_all(&labels_dir)?;
        Ok(Self {
            dataset,
            labels_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn labels_dir(&self) -> &Path {
        &self.labels_dir
    }

    /// Number of `.json` documents currently in the labels directory.
    pub fn saved_label_files(&self) -> usize {
        fs::read_dir(&self.labels_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Validates every label's bounds and attaches its slice of the matrix.
    /// Client-sent `intensityMatrix` values are always replaced.
    pub fn enrich(&self, data: &mut LabelData) -> std::result::Result<(), ServiceError> {
        let view = &self.dataset.view;
        let rows = view.row_count();
        let cols = view.col_count();
        for label in &mut data.labels {
            let bounds = label.bounds();
            let Some(slice) = view.slice(&bounds) else {
                let err = HeatmapError::LabelBounds {
                    id: label.id.clone(),
                    start_row: bounds.start_row,
                    end_row: bounds.end_row,
                    start_col: bounds.start_col,
                    end_col: bounds.end_col,
                    rows,
                    cols,
                };
                return Err(ServiceError::InvalidLabelFile(err));
            };
            label.intensity_matrix = Some(slice);
        }
        Ok(())
    }

    /// Parses, validates, enriches and writes one request body. Returns the
    /// path written. Nothing touches the disk unless every check passes.
    pub async fn save(&self, body: &[u8]) -> std::result::Result<PathBuf, ServiceError> {
        let document: Value = serde_json::from_slice(body).map_err(|_| ServiceError::InvalidJson)?;
        let file_name = document.get("fileName").filter(|v| !is_blank(v));
        let data = document.get("data").filter(|v| !is_blank(v));
        let (Some(file_name), Some(data)) = (file_name, data) else {
            return Err(ServiceError::MissingFields);
        };
        let file_name = file_name.as_str().ok_or(ServiceError::InvalidFileName)?;
        let file_name = validate_file_name(file_name)?;

        let mut data = LabelData::from_value(data.clone())
            .map_err(|e| {
                ServiceError::InvalidLabelFile(HeatmapError::invalid_label_file(format!(
                    "Invalid label data: {e}"
                )))
            })?;
        self.enrich(&mut data)?;

        let pretty =
            serde_json::to_vec_pretty(&data).map_err(|e| ServiceError::Write(e.to_string()))?;
        let target = self.labels_dir.join(&file_name);

        let _guard = self.write_lock.lock().await;
        let dir = self.labels_dir.clone();
        let path = target.clone();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &pretty))
            .await
            .map_err(|e| ServiceError::Write(format!("writer task failed: {e}")))?
            .map_err(|e| ServiceError::Write(e.to_string()))?;

        info!(file = %target.display(), labels = data.labels.len(), "label document saved");
        Ok(target)
    }
}

/// Temp file in the same directory, then rename over the target.
fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

async fn save_label(
    State(service): State<Arc<LabelService>>,
    body: Bytes,
) -> std::result::Result<&'static str, ServiceError> {
    match service.save(&body).await {
        Ok(_) => Ok("Label saved successfully"),
        Err(err) => {
            match &err {
                ServiceError::Write(detail) => error!(%detail, "failed to write label document"),
                other => warn!(reason = %other, "label document rejected"),
            }
            Err(err)
        }
    }
}

async fn health(State(service): State<Arc<LabelService>>) -> Json<Value> {
    let view = &service.dataset.view;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rows": view.row_count(),
        "cols": view.col_count(),
        "labelsDir": service.labels_dir.display().to_string(),
        "savedLabels": service.saved_label_files(),
    }))
}

async fn data(State(service): State<Arc<LabelService>>) -> Json<Value> {
    Json(service.dataset.to_document())
}

async fn not_found() -> ServiceError {
    ServiceError::NotFound
}

async fn cors(State(origin): State<HeaderValue>, request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    response
}

pub fn router(
    service: Arc<LabelService>,
    allow_origin: HeaderValue,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .route(SAVE_LABEL_PATH, post(save_label))
        .route("/health", get(health))
        .route("/data", get(data))
        .fallback(not_found)
        .with_state(service)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn_with_state(allow_origin, cors))
        .layer(TraceLayer::new_for_http())
}
