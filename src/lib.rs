//! Livestock disease diagnosis service.
//!
//! Accepts an uploaded photo on `POST /predict`, classifies it with a frozen
//! TensorFlow graph and answers with the predicted condition and its care
//! instructions.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod model;
pub mod routes;
pub mod service;
pub mod tables;
pub mod upload;

pub use config::Config;
pub use error::{ApiError, PredictError, StartupError};
pub use routes::{create_router, AppState};
pub use service::{InferenceService, PredictionResult};
