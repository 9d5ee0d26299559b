//! Error types for startup and for the `/predict` request pipeline.

use std::{io, path::PathBuf};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::model::InferenceError;

/// Anything that stops the service from coming up. Never seen by clients.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("artifact {0} is missing and no download URL is configured")]
    MissingArtifact(PathBuf),

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to download {url}: server answered {status}")]
    DownloadStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("class name table {0} is empty")]
    EmptyClassTable(PathBuf),

    #[error("failed to load model graph: {0}")]
    Model(String),
}

/// Failures between saving the upload and producing a prediction.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("failed to store upload: {0}")]
    Store(#[source] io::Error),

    #[error("failed to read upload: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("class index {index} is outside the class table ({classes} classes)")]
    UnknownClass { index: usize, classes: usize },

    #[error("inference worker failed: {0}")]
    Worker(String),
}

/// Errors returned by the HTTP layer. The display text is the client-facing message.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No file uploaded")]
    NoFile,

    #[error("Empty filename")]
    EmptyFilename,

    #[error("File too large")]
    FileTooLarge,

    #[error("Prediction failed")]
    PredictionFailed(#[from] PredictError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFile | ApiError::EmptyFilename => StatusCode::BAD_REQUEST,
            ApiError::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::PredictionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::PredictionFailed(cause) => {
                if let PredictError::UnknownClass { .. } = cause {
                    tracing::error!(detail = %cause, "Model output does not match the class table");
                } else {
                    tracing::error!(detail = %cause, "Prediction failed");
                }
            }
            other => tracing::warn!(reason = %other, "Rejected prediction request"),
        }

        let body = Json(json!({
            "error": true,
            "message": self.to_string(),
            "prediction": null,
        }));

        (self.status(), body).into_response()
    }
}
