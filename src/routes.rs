use std::{path::PathBuf, sync::Arc};

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    error::{ApiError, PredictError},
    service::{InferenceService, PredictionResult},
    upload::UploadedFile,
};

pub struct AppState {
    pub service: InferenceService,
    pub upload_dir: PathBuf,
}

pub fn create_router(
    state: Arc<AppState>,
    body_limit_bytes: usize,
    cors_permissive: bool,
) -> Router {
    let mut app = Router::new()
        .route("/predict", post(predict_handler))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state);

    if cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }

    app.layer(TraceLayer::new_for_http())
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        warn!(%rejection, "Request body is not multipart");
        ApiError::NoFile
    })?;
    let (filename, bytes) = read_file_field(&mut multipart).await?;

    let upload = UploadedFile::save(&state.upload_dir, &filename, bytes)
        .await
        .map_err(PredictError::Store)?;

    let result = state.service.predict(upload.path()).await;
    drop(upload);

    let result = result?;
    info!(
        filename = %filename,
        prediction = %result.prediction,
        confidence = result.confidence,
        "Prediction served"
    );
    Ok(Json(result))
}

/// Finds the `file` part. Parts without a filename are form values, not files.
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes), ApiError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ApiError::NoFile),
            Err(e) => return Err(multipart_error(e)),
        };

        if field.name() != Some("file") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if filename.is_empty() {
            return Err(ApiError::EmptyFilename);
        }

        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok((filename, bytes));
    }
}

/// A body cut off by the size limit is a 413; any other stream failure means
/// no usable file arrived.
fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %e, "Upload exceeds the body limit");
        ApiError::FileTooLarge
    } else {
        warn!(error = %e, "Malformed multipart body");
        ApiError::NoFile
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK" }))
}
