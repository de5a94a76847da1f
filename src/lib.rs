pub mod config;
pub mod forgery;
pub mod image;
pub mod models;
pub mod utils;
pub mod web;

// Re-export the main types
pub use config::{Config, ExecutionContext};
pub use forgery::{BatchReport, BatchRunner, PredictionEngine, PredictionResult, ReportExporter};
pub use models::{ModelHandle, ScoreModel};
pub use utils::error::ForgeryError;

pub type Result<T> = std::result::Result<T, ForgeryError>;
