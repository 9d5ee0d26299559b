use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use tensorflow::{
    Graph, ImportGraphDefOptions, Operation, Output, Session, SessionOptions, SessionRunArgs,
    Shape, Tensor,
};
use thiserror::Error;
use tracing::info;

use crate::error::{PredictError, StartupError};

/// Height and width of the model input.
pub const IMAGE_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;
/// Number of values in one NHWC input tensor with batch size 1.
pub const INPUT_LEN: usize = (IMAGE_SIZE as usize) * (IMAGE_SIZE as usize) * CHANNELS;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("operation {0:?} not found in graph")]
    MissingOperation(String),

    #[error("input has {actual} values, expected {expected}")]
    InputShape { expected: usize, actual: usize },

    #[error("tensorflow: {0}")]
    Runtime(String),

    #[error("model returned no scores")]
    EmptyOutput,

    #[error("model returned NaN at index {0}")]
    NanScore(usize),
}

/// A loaded classification model. `input` is a flattened `[1, 224, 224, 3]`
/// tensor in `[0, 1]`; the result holds one score per class.
pub trait Classifier: Send + Sync {
    fn scores(&self, input: &[f32]) -> Result<Vec<f32>, InferenceError>;
}

/// Frozen TensorFlow graph run through a single session.
pub struct TfClassifier {
    session: Session,
    graph: Graph,
    input_op: String,
    output_op: String,
}

impl TfClassifier {
    pub fn load(model_path: &Path, input_op: &str, output_op: &str) -> Result<Self, StartupError> {
        let model_bytes = std::fs::read(model_path).map_err(|source| StartupError::Read {
            path: model_path.to_path_buf(),
            source,
        })?;
        Self::from_graph_def(&model_bytes, input_op, output_op)
    }

    /// Builds a classifier from a serialized `GraphDef`.
    pub fn from_graph_def(
        graph_def: &[u8],
        input_op: &str,
        output_op: &str,
    ) -> Result<Self, StartupError> {
        let mut graph = Graph::new();
        graph
            .import_graph_def(graph_def, &ImportGraphDefOptions::new())
            .map_err(|e| StartupError::Model(e.to_string()))?;

        for name in [input_op, output_op] {
            graph
                .operation_by_name_required(name)
                .map_err(|e| StartupError::Model(format!("operation {name:?}: {e}")))?;
        }

        let session = Session::new(&SessionOptions::new(), &graph)
            .map_err(|e| StartupError::Model(e.to_string()))?;

        let classifier = TfClassifier {
            session,
            graph,
            input_op: input_op.to_string(),
            output_op: output_op.to_string(),
        };
        let shape = classifier
            .input_shape()
            .map_err(|e| StartupError::Model(e.to_string()))?;
        info!(
            input = input_op,
            output = output_op,
            input_shape = ?shape,
            "Model graph imported"
        );
        Ok(classifier)
    }

    /// Static shape of the input operation; unknown dimensions are `None`.
    pub fn input_shape(&self) -> Result<Shape, InferenceError> {
        let operation = self.operation(&self.input_op)?;
        self.graph
            .tensor_shape(Output {
                operation,
                index: 0,
            })
            .map_err(|e| InferenceError::Runtime(e.to_string()))
    }

    fn operation(&self, name: &str) -> Result<Operation, InferenceError> {
        self.graph
            .operation_by_name(name)
            .map_err(|e| InferenceError::Runtime(e.to_string()))?
            .ok_or_else(|| InferenceError::MissingOperation(name.to_string()))
    }
}

impl Classifier for TfClassifier {
    fn scores(&self, input: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if input.len() != INPUT_LEN {
            return Err(InferenceError::InputShape {
                expected: INPUT_LEN,
                actual: input.len(),
            });
        }

        let size = u64::from(IMAGE_SIZE);
        let mut tensor: Tensor<f32> = Tensor::new(&[1, size, size, CHANNELS as u64]);
        tensor.copy_from_slice(input);

        let input_operation = self.operation(&self.input_op)?;
        let output_operation = self.operation(&self.output_op)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &tensor);
        let output_token = args.request_fetch(&output_operation, 0);
        self.session
            .run(&mut args)
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let output: Tensor<f32> = args
            .fetch(output_token)
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;
        Ok(output.to_vec())
    }
}

/// Decodes an image file, sniffing the format from its contents.
pub fn decode_image(path: &Path) -> Result<DynamicImage, PredictError> {
    let image = image::io::Reader::open(path)?
        .with_guessed_format()?
        .decode()?;
    Ok(image)
}

/// RGB, exact 224x224 nearest-neighbour resize, NHWC order, scaled to `[0, 1]`.
pub fn preprocess(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, IMAGE_SIZE, IMAGE_SIZE, FilterType::Nearest);

    resized
        .pixels()
        .flat_map(|pixel| pixel.0)
        .map(|value| f32::from(value) / 255.0)
        .collect()
}

/// Index and value of the highest score; the lowest index wins a tie.
pub fn top_class(scores: &[f32]) -> Result<(usize, f32), InferenceError> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            return Err(InferenceError::NanScore(index));
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best.ok_or(InferenceError::EmptyOutput)
}

/// Score as a percentage rounded to two decimals.
pub fn confidence_percent(score: f32) -> f64 {
    (f64::from(score) * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tensorflow::DataType;

    use super::*;

    /// `x` is a float placeholder of the model's input shape, `Identity` echoes it.
    fn echo_graph_def() -> Vec<u8> {
        let mut graph = Graph::new();
        let size = i64::from(IMAGE_SIZE);
        let placeholder = {
            let mut op = graph.new_operation("Placeholder", "x").unwrap();
            op.set_attr_type("dtype", DataType::Float).unwrap();
            let shape = Shape::from(Some(vec![Some(1), Some(size), Some(size), Some(3)]));
            op.set_attr_shape("shape", &shape).unwrap();
            op.finish().unwrap()
        };
        {
            let mut op = graph.new_operation("Identity", "Identity").unwrap();
            op.add_input(placeholder);
            op.finish().unwrap();
        }
        graph.graph_def().unwrap()
    }

    fn echo_classifier() -> TfClassifier {
        TfClassifier::from_graph_def(&echo_graph_def(), "x", "Identity").unwrap()
    }

    #[test]
    fn test_tf_classifier_rejects_wrong_input_length() {
        let err = echo_classifier().scores(&[0.5; 10]).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::InputShape {
                expected: INPUT_LEN,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_tf_classifier_runs_graph() {
        let input: Vec<f32> = (0..INPUT_LEN).map(|i| (i % 256) as f32 / 255.0).collect();
        let output = echo_classifier().scores(&input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_tf_classifier_input_shape() {
        let shape = echo_classifier().input_shape().unwrap();
        assert_eq!(shape.dims(), Some(4));
        assert_eq!(shape[1], Some(i64::from(IMAGE_SIZE)));
        assert_eq!(shape[3], Some(3));
    }

    #[test]
    fn test_tf_classifier_missing_operation() {
        let result = TfClassifier::from_graph_def(&echo_graph_def(), "x", "softmax");
        assert!(matches!(result, Err(StartupError::Model(_))));
    }

    #[test]
    fn test_tf_classifier_garbage_graph() {
        let result = TfClassifier::from_graph_def(b"not a graph", "x", "Identity");
        assert!(matches!(result, Err(StartupError::Model(_))));
    }

    #[test]
    fn test_top_class_picks_max() {
        assert_eq!(top_class(&[0.1, 0.7, 0.2]).unwrap(), (1, 0.7));
    }

    #[test]
    fn test_top_class_tie_goes_to_lowest_index() {
        assert_eq!(top_class(&[0.2, 0.4, 0.4]).unwrap(), (1, 0.4));
        assert_eq!(top_class(&[0.25; 4]).unwrap().0, 0);
    }

    #[test]
    fn test_top_class_rejects_empty_and_nan() {
        assert!(matches!(top_class(&[]), Err(InferenceError::EmptyOutput)));
        assert!(matches!(
            top_class(&[0.3, f32::NAN, 0.2]),
            Err(InferenceError::NanScore(1))
        ));
    }

    #[test]
    fn test_confidence_rounding() {
        assert_eq!(confidence_percent(0.7), 70.0);
        assert_eq!(confidence_percent(0.98766), 98.77);
        assert_eq!(confidence_percent(1.0), 100.0);
        assert_eq!(confidence_percent(0.0), 0.0);
    }

    #[test]
    fn test_preprocess_shape_and_scale() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([255, 0, 51])));
        let input = preprocess(&image);
        assert_eq!(input.len(), INPUT_LEN);
        assert_eq!(&input[..3], &[1.0, 0.0, 0.2]);
        assert!(input.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_preprocess_drops_alpha_and_expands_gray() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 255, 0, 0])));
        let input = preprocess(&rgba);
        assert_eq!(input.len(), INPUT_LEN);
        assert_eq!(&input[..3], &[0.0, 1.0, 0.0]);

        let gray = image::GrayImage::from_pixel(300, 50, image::Luma([255]));
        let gray = DynamicImage::ImageLuma8(gray);
        assert!(preprocess(&gray).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"definitely not an image").unwrap();
        assert!(decode_image(file.path()).is_err());
    }
}
