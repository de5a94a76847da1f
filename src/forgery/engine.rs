use crate::forgery::types::{BatchItem, PredictionResult};
use crate::image::{DocumentImage, ImageLoader, Preprocessor};
use crate::models::{ClassScores, ScoreModel};
use crate::Result;
use std::sync::Arc;

/// Runs one image through preprocessing and the model.
///
/// Every per-item error is turned into a failed [`PredictionResult`]; nothing
/// raised here can abort a batch.
pub struct PredictionEngine {
    model: Arc<dyn ScoreModel>,
    loader: ImageLoader,
    preprocessor: Preprocessor,
}

impl PredictionEngine {
    pub fn new(model: Arc<dyn ScoreModel>) -> Self {
        Self {
            model,
            loader: ImageLoader::default(),
            preprocessor: Preprocessor::default(),
        }
    }

    pub fn with_loader(mut self, loader: ImageLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Loads the item's source, then classifies it.
    pub fn process(&self, item: &BatchItem) -> PredictionResult {
        match self.loader.load(&item.source) {
            Ok(image) => self.classify(&item.name, &image),
            Err(e) => {
                tracing::warn!("Failed to load '{}': {}", item.name, e);
                PredictionResult::failed(&item.name, e.to_string())
            }
        }
    }

    pub fn classify(&self, file_name: &str, image: &DocumentImage) -> PredictionResult {
        match self.score(image) {
            Ok(scores) => {
                let label = scores.label();
                let confidence = scores.confidence_percent();
                tracing::debug!(
                    "'{}': {} ({:.2}%), scores={:?}",
                    file_name,
                    label,
                    confidence,
                    scores.0
                );
                PredictionResult::success(file_name, label, confidence)
            }
            Err(e) => {
                if e.is_item_error() {
                    tracing::warn!("Failed to classify '{}': {}", file_name, e);
                } else {
                    tracing::error!("Model error while classifying '{}': {}", file_name, e);
                }
                PredictionResult::failed(file_name, e.to_string())
            }
        }
    }

    fn score(&self, image: &DocumentImage) -> Result<ClassScores> {
        let tensor = self.preprocessor.transform(image)?;
        self.model.predict(&tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forgery::types::Outcome;
    use crate::image::ImageSource;
    use crate::models::Label;
    use crate::utils::error::ForgeryError;
    use image::{DynamicImage, Rgb, RgbImage};
    use ndarray::ArrayView4;

    struct Fixed(ClassScores);

    impl ScoreModel for Fixed {
        fn predict_batch(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<ClassScores>> {
            Ok(vec![self.0; batch.shape()[0]])
        }
    }

    struct Broken;

    impl ScoreModel for Broken {
        fn predict_batch(&self, _batch: ArrayView4<'_, f32>) -> Result<Vec<ClassScores>> {
            Err(ForgeryError::Inference("session poisoned".to_string()))
        }
    }

    fn white_page() -> DocumentImage {
        DocumentImage::from_dynamic(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            32,
            48,
            Rgb([255, 255, 255]),
        )))
    }

    #[test]
    fn label_and_confidence_come_from_scores() {
        let engine = PredictionEngine::new(Arc::new(Fixed(ClassScores::new(0.0, 2.0))));
        let result = engine.classify("scan.png", &white_page());

        assert_eq!(result.file_name, "scan.png");
        assert_eq!(result.label(), Some(Label::Forged));
        let expected = 100.0 / (1.0 + (-2.0f32).exp());
        assert!((result.confidence().unwrap() - expected).abs() < 1e-3);
    }

    #[test]
    fn inference_failure_becomes_failed_result() {
        let engine = PredictionEngine::new(Arc::new(Broken));
        let result = engine.classify("scan.png", &white_page());

        match result.outcome {
            Outcome::Failed { reason } => assert!(reason.contains("session poisoned")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn load_failure_becomes_failed_result() {
        let engine = PredictionEngine::new(Arc::new(Fixed(ClassScores::new(1.0, 0.0))));
        let item = BatchItem::new("junk.jpg", ImageSource::Bytes(b"not an image".to_vec()));
        let result = engine.process(&item);

        assert_eq!(result.file_name, "junk.jpg");
        assert!(!result.is_success());
        assert!(!result.failure_reason().unwrap().is_empty());
    }
}
