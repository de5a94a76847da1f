use crate::config::{Config, ExecutionContext, OnnxConfig};
use crate::image::preprocessing::{INPUT_CHANNELS, INPUT_SIZE};
use crate::utils::error::ForgeryError;
use crate::Result;
use ndarray::{Array3, Array4, ArrayView4, ArrayViewD, Axis};
use ort::{
    execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch},
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::{Tensor, ValueType},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Number of classes the forgery head produces.
pub const NUM_CLASSES: usize = 2;

/// Classifier verdict. Index 0 is genuine, index 1 is forged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Genuine,
    Forged,
}

impl Label {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Label::Genuine),
            1 => Some(Label::Forged),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Genuine => "Genuine",
            Label::Forged => "Forged",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw (unnormalized) scores for one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassScores(pub [f32; NUM_CLASSES]);

impl ClassScores {
    pub fn new(genuine: f32, forged: f32) -> Self {
        Self([genuine, forged])
    }

    /// Index of the highest score; ties go to the lower index.
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, &score) in self.0.iter().enumerate().skip(1) {
            if score > self.0[best] {
                best = i;
            }
        }
        best
    }

    pub fn label(&self) -> Label {
        Label::from_index(self.argmax()).unwrap_or(Label::Forged)
    }

    /// Numerically stable softmax.
    pub fn softmax(&self) -> [f32; NUM_CLASSES] {
        let max = self.0.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut exp = [0.0f32; NUM_CLASSES];
        let mut sum = 0.0;
        for (e, &score) in exp.iter_mut().zip(self.0.iter()) {
            *e = (score - max).exp();
            sum += *e;
        }
        for e in exp.iter_mut() {
            *e /= sum;
        }
        exp
    }

    /// Top softmax probability as a percentage, in [50, 100].
    pub fn confidence_percent(&self) -> f32 {
        let probs = self.softmax();
        let top = probs.iter().copied().fold(0.0f32, f32::max);
        (top * 100.0).clamp(50.0, 100.0)
    }

    fn from_row(row: &[f32]) -> Result<Self> {
        if row.len() != NUM_CLASSES {
            return Err(ForgeryError::Inference(format!(
                "Expected {} class scores, got {}",
                NUM_CLASSES,
                row.len()
            )));
        }
        if row.iter().any(|s| !s.is_finite()) {
            return Err(ForgeryError::Inference(format!(
                "Model produced non-finite scores: {:?}",
                row
            )));
        }
        Ok(Self([row[0], row[1]]))
    }
}

/// A frozen two-class model. Implementations must not mutate weights.
pub trait ScoreModel: Send + Sync {
    /// Scores a batch shaped (N, 3, 224, 224).
    fn predict_batch(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<ClassScores>>;

    /// Scores a single (3, 224, 224) tensor.
    fn predict(&self, tensor: &Array3<f32>) -> Result<ClassScores> {
        let batch = tensor.view().insert_axis(Axis(0));
        let mut scores = self.predict_batch(batch)?;
        if scores.len() != 1 {
            return Err(ForgeryError::Inference(format!(
                "Expected 1 result for a single image, got {}",
                scores.len()
            )));
        }
        Ok(scores.remove(0))
    }

    /// Short human readable description for logs and `/api/info`.
    fn describe(&self) -> String {
        "score model".to_string()
    }
}

/// ResNet-50 forgery classifier exported to ONNX.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String, // discovered from the graph
    execution: ExecutionContext,
}

impl OnnxClassifier {
    pub fn new(config: &Config) -> Result<Self> {
        Self::from_file(&config.model_file(), &config.onnx_config, config.execution)
    }

    pub fn from_file(
        model_path: &Path,
        onnx_config: &OnnxConfig,
        execution: ExecutionContext,
    ) -> Result<Self> {
        if !model_path.exists() {
            return Err(ForgeryError::ModelLoad(format!(
                "Classification model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!(
            "Loading forgery model from: {} (device: {})",
            model_path.display(),
            execution
        );

        let load_err = |stage: &str, e: &dyn fmt::Display| {
            ForgeryError::ModelLoad(format!("{} for {}: {}", stage, model_path.display(), e))
        };

        let session = Session::builder()
            .map_err(|e| load_err("Failed to create session builder", &e))?
            .with_optimization_level(Self::optimization_level(onnx_config))
            .map_err(|e| load_err("Failed to set optimization level", &e))?
            .with_intra_threads(onnx_config.intra_threads)
            .map_err(|e| load_err("Failed to set thread count", &e))?
            .with_execution_providers(Self::execution_providers(execution)?)
            .map_err(|e| load_err("Failed to register execution providers", &e))?
            .commit_from_file(model_path)
            .map_err(|e| load_err("Failed to load model", &e))?;

        let (input_name, input_dims) = match session.inputs.first() {
            Some(input) => (input.name.clone(), Self::tensor_dims(&input.input_type)),
            None => {
                return Err(ForgeryError::ModelLoad(
                    "Classification model has no inputs".to_string(),
                ))
            }
        };

        let (output_name, output_dims) = match session.outputs.first() {
            Some(output) => (output.name.clone(), Self::tensor_dims(&output.output_type)),
            None => {
                return Err(ForgeryError::ModelLoad(
                    "Classification model has no outputs".to_string(),
                ))
            }
        };

        match (input_dims, output_dims) {
            (Some(input), Some(output)) => Self::check_io_shapes(&input, &output)?,
            _ => {
                return Err(ForgeryError::ModelLoad(format!(
                    "{}: model input and output must be tensors",
                    model_path.display()
                )))
            }
        }

        tracing::info!(
            "Forgery model input: '{}', output: '{}'",
            input_name,
            output_name
        );
        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Forgery model output[{}]: '{}'", i, output.name);
        }

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            execution,
        })
    }

    fn tensor_dims(value_type: &ValueType) -> Option<Vec<i64>> {
        match value_type {
            ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
            _ => None,
        }
    }

    /// Input must be `[N, 3, 224, 224]` and output `[N, 2]`. Negative dims are
    /// symbolic and accepted.
    pub(crate) fn check_io_shapes(input: &[i64], output: &[i64]) -> Result<()> {
        let fits = |dim: i64, want: usize| dim < 0 || dim as usize == want;

        let input_ok = input.len() == 4
            && fits(input[1], INPUT_CHANNELS)
            && fits(input[2], INPUT_SIZE as usize)
            && fits(input[3], INPUT_SIZE as usize);
        if !input_ok {
            return Err(ForgeryError::ModelLoad(format!(
                "Incompatible classifier: expected input [N, {}, {}, {}], model declares {:?}",
                INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE, input
            )));
        }

        if output.len() != 2 || !fits(output[1], NUM_CLASSES) {
            return Err(ForgeryError::ModelLoad(format!(
                "Incompatible classifier: expected output [N, {}], model declares {:?}",
                NUM_CLASSES, output
            )));
        }
        Ok(())
    }

    fn optimization_level(onnx_config: &OnnxConfig) -> GraphOptimizationLevel {
        if !onnx_config.enable_optimization {
            return GraphOptimizationLevel::Disable;
        }
        match onnx_config.optimization_level {
            i32::MIN..=0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        }
    }

    fn execution_providers(execution: ExecutionContext) -> Result<Vec<ExecutionProviderDispatch>> {
        match execution {
            ExecutionContext::Cpu => Ok(vec![CPUExecutionProvider::default().build()]),
            #[cfg(feature = "cuda")]
            ExecutionContext::Cuda { device_id } => Ok(vec![
                ort::execution_providers::CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ]),
            #[cfg(not(feature = "cuda"))]
            ExecutionContext::Cuda { .. } => Err(ForgeryError::ModelLoad(
                "CUDA requested but this build lacks the `cuda` feature".to_string(),
            )),
        }
    }

    fn parse_scores(predictions: &ArrayViewD<'_, f32>, expected: usize) -> Result<Vec<ClassScores>> {
        let shape = predictions.shape();
        if shape.len() != 2 || shape[1] != NUM_CLASSES {
            return Err(ForgeryError::Inference(format!(
                "Expected output shape [N, {}], got {:?}",
                NUM_CLASSES, shape
            )));
        }
        if shape[0] != expected {
            return Err(ForgeryError::Inference(format!(
                "Expected {} rows of scores, got {}",
                expected, shape[0]
            )));
        }

        predictions
            .outer_iter()
            .map(|row| {
                let row: Vec<f32> = row.iter().copied().collect();
                ClassScores::from_row(&row)
            })
            .collect()
    }
}

impl ScoreModel for OnnxClassifier {
    fn predict_batch(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<ClassScores>> {
        let batch_size = batch.shape()[0];
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let input: Array4<f32> = batch.to_owned();
        let input_tensor = Tensor::from_array(input)?;

        // Extract while the lock is held; outputs borrow the session.
        let predictions = {
            let mut session = self.session.lock();
            let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

            match outputs.get(self.output_name.as_str()) {
                Some(output) => output.try_extract_array::<f32>()?.into_owned(),
                None => {
                    let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                    return Err(ForgeryError::Inference(format!(
                        "Output '{}' not found. Available outputs: {:?}",
                        self.output_name, available
                    )));
                }
            }
        };

        Self::parse_scores(&predictions.view(), batch_size)
    }

    fn describe(&self) -> String {
        format!("ResNet-50 forgery classifier (onnx, {})", self.execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    #[test]
    fn argmax_breaks_ties_toward_genuine() {
        let scores = ClassScores::new(1.5, 1.5);
        assert_eq!(scores.argmax(), 0);
        assert_eq!(scores.label(), Label::Genuine);
        assert!((scores.confidence_percent() - 50.0).abs() < 1e-4);
    }

    #[test]
    fn confidence_stays_between_fifty_and_hundred() {
        let cases = [
            (0.0, 0.0),
            (3.0, -2.0),
            (-7.5, 4.25),
            (1000.0, -1000.0),
            (-1e6, 1e6),
            (0.001, 0.0),
        ];
        for (g, f) in cases {
            let c = ClassScores::new(g, f).confidence_percent();
            assert!((50.0..=100.0).contains(&c), "({g}, {f}) -> {c}");
        }
    }

    #[test]
    fn softmax_matches_closed_form() {
        let scores = ClassScores::new(2.0, 0.0);
        let probs = scores.softmax();
        let expected = 1.0 / (1.0 + (-2.0f32).exp());
        assert!((probs[0] - expected).abs() < 1e-6);
        assert!((probs[0] + probs[1] - 1.0).abs() < 1e-6);
        assert_eq!(scores.label(), Label::Genuine);
        assert!((scores.confidence_percent() - expected * 100.0).abs() < 1e-4);
    }

    #[test]
    fn higher_forged_score_selects_forged() {
        assert_eq!(ClassScores::new(-1.0, 0.5).label(), Label::Forged);
        assert_eq!(Label::from_index(1), Some(Label::Forged));
        assert_eq!(Label::from_index(2), None);
    }

    #[test]
    fn parse_scores_checks_output_shape() {
        let ok: Array2<f32> = arr2(&[[0.1, 0.9], [2.0, -1.0]]);
        let parsed = OnnxClassifier::parse_scores(&ok.into_dyn().view(), 2).unwrap();
        assert_eq!(parsed[1], ClassScores::new(2.0, -1.0));

        let wrong_classes: Array2<f32> = arr2(&[[0.1, 0.2, 0.7]]);
        assert!(OnnxClassifier::parse_scores(&wrong_classes.into_dyn().view(), 1).is_err());

        let wrong_rows: Array2<f32> = arr2(&[[0.1, 0.9]]);
        assert!(OnnxClassifier::parse_scores(&wrong_rows.into_dyn().view(), 3).is_err());
    }

    #[test]
    fn non_finite_scores_are_rejected() {
        assert!(ClassScores::from_row(&[f32::NAN, 0.0]).is_err());
    }

    #[test]
    fn resnet_shapes_pass_the_io_check() {
        assert!(OnnxClassifier::check_io_shapes(&[1, 3, 224, 224], &[1, 2]).is_ok());
        assert!(OnnxClassifier::check_io_shapes(&[-1, 3, -1, -1], &[-1, 2]).is_ok());
    }

    #[test]
    fn imagenet_head_is_rejected_at_load() {
        let err = OnnxClassifier::check_io_shapes(&[1, 3, 224, 224], &[1, 1000]).unwrap_err();
        assert!(matches!(err, ForgeryError::ModelLoad(_)));
        assert!(err.to_string().contains("1000"));
    }

    #[test]
    fn mismatched_inputs_are_rejected_at_load() {
        let cases: [&[i64]; 4] = [
            &[1, 1, 224, 224],
            &[1, 3, 299, 299],
            &[1, 224, 224, 3],
            &[3, 224, 224],
        ];
        for input in cases {
            let err = OnnxClassifier::check_io_shapes(input, &[1, 2]).unwrap_err();
            assert!(matches!(err, ForgeryError::ModelLoad(_)), "{input:?}");
        }
        assert!(OnnxClassifier::check_io_shapes(&[1, 3, 224, 224], &[1, 2, 1]).is_err());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn cuda_without_feature_is_a_load_error() {
        let err = OnnxClassifier::execution_providers(ExecutionContext::Cuda { device_id: 0 })
            .err()
            .expect("cuda should be unavailable");
        assert!(matches!(err, ForgeryError::ModelLoad(_)));
        assert!(err.to_string().contains("cuda"));
    }

    #[test]
    fn cpu_execution_provider_is_always_available() {
        let providers = OnnxClassifier::execution_providers(ExecutionContext::Cpu).unwrap();
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn missing_model_file_is_a_load_error() {
        let err = OnnxClassifier::from_file(
            Path::new("/nonexistent/forgery_detection_model.onnx"),
            &OnnxConfig::default(),
            ExecutionContext::Cpu,
        )
        .err()
        .expect("load should fail");
        assert!(matches!(err, ForgeryError::ModelLoad(_)));
    }
}
