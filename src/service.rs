use std::{path::Path, sync::Arc};

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{PredictError, StartupError},
    model::{confidence_percent, decode_image, preprocess, top_class, Classifier, TfClassifier},
    tables::{ClassNames, DiseaseInfo, DiseaseTable},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub prediction: String,
    /// Percentage in `[0, 100]`, two decimals.
    pub confidence: f64,
    #[serde(flatten)]
    pub info: DiseaseInfo,
}

/// Model plus lookup tables, immutable after startup.
pub struct InferenceService {
    classifier: Arc<dyn Classifier>,
    class_names: ClassNames,
    diseases: DiseaseTable,
    workers: Semaphore,
}

impl InferenceService {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        class_names: ClassNames,
        diseases: DiseaseTable,
        workers: usize,
    ) -> Self {
        InferenceService {
            classifier,
            class_names,
            diseases,
            workers: Semaphore::new(workers),
        }
    }

    /// Loads the TensorFlow model and both tables named by `config`.
    pub fn load(config: &Config) -> Result<Self, StartupError> {
        info!(path = %config.model.path.display(), "Loading model");
        let classifier =
            TfClassifier::load(&config.model.path, &config.input_op, &config.output_op)?;
        info!("Model loaded successfully");

        let class_names = ClassNames::load(&config.class_names.path)?;
        info!(classes = class_names.len(), "Loaded class names");

        let diseases = DiseaseTable::load(&config.disease_info.path)?;
        info!(diseases = diseases.len(), "Loaded disease info");

        for label in class_names.iter().filter(|label| !diseases.contains(label)) {
            warn!(label, "No disease info for class, responses will carry empty lists");
        }

        Ok(Self::new(
            Arc::new(classifier),
            class_names,
            diseases,
            config.inference_workers,
        ))
    }

    /// Decodes, preprocesses and classifies the image at `image_path` on the
    /// blocking pool, at most `workers` at a time.
    pub async fn predict(&self, image_path: &Path) -> Result<PredictionResult, PredictError> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| PredictError::Worker(e.to_string()))?;

        let classifier = Arc::clone(&self.classifier);
        let path = image_path.to_path_buf();
        let scores = tokio::task::spawn_blocking(move || -> Result<Vec<f32>, PredictError> {
            let image = decode_image(&path)?;
            let input = preprocess(&image);
            debug!(path = %path.display(), "Image preprocessed");
            Ok(classifier.scores(&input)?)
        })
        .await
        .map_err(|e| PredictError::Worker(e.to_string()))??;

        self.resolve(&scores)
    }

    /// Maps raw class scores to a labelled result with its disease info.
    pub fn resolve(&self, scores: &[f32]) -> Result<PredictionResult, PredictError> {
        let (index, score) = top_class(scores)?;
        let label = self
            .class_names
            .get(index)
            .ok_or(PredictError::UnknownClass {
                index,
                classes: self.class_names.len(),
            })?;

        Ok(PredictionResult {
            prediction: label.to_string(),
            confidence: confidence_percent(score),
            info: self.diseases.lookup(label),
        })
    }
}
