pub mod classifier;
pub mod manager;

pub use classifier::{ClassScores, Label, OnnxClassifier, ScoreModel, NUM_CLASSES};
pub use manager::{ModelHandle, ModelLoader, OnnxModelLoader};
