use crate::config::Config;
use crate::models::classifier::{OnnxClassifier, ScoreModel};
use crate::utils::error::ForgeryError;
use crate::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Builds the frozen model. Called at most once per [`ModelHandle`].
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn ScoreModel>>;
}

/// Loads the ONNX classifier described by a [`Config`].
pub struct OnnxModelLoader {
    config: Config,
}

impl OnnxModelLoader {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Arc<dyn ScoreModel>> {
        let classifier = OnnxClassifier::new(&self.config)?;
        Ok(Arc::new(classifier))
    }
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Arc<dyn ScoreModel>> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn ScoreModel>> {
        self()
    }
}

/// Owns the process's single model instance.
///
/// The first call to [`ModelHandle::get`] runs the loader; every later call
/// returns the same `Arc`. A failed load is remembered and replayed as
/// [`ForgeryError::ModelUnavailable`] without touching the artifact again.
pub struct ModelHandle {
    loader: Box<dyn ModelLoader>,
    cell: OnceCell<std::result::Result<Arc<dyn ScoreModel>, String>>,
}

impl ModelHandle {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            cell: OnceCell::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(OnnxModelLoader::new(config.clone()))
    }

    /// Wraps an already constructed model.
    pub fn preloaded(model: Arc<dyn ScoreModel>) -> Self {
        let handle = Self::new(|| -> Result<Arc<dyn ScoreModel>> {
            Err(ForgeryError::Internal("preloaded handle has no loader".to_string()))
        });
        // A fresh cell cannot already be set.
        let _ = handle.cell.set(Ok(model));
        handle
    }

    pub fn get(&self) -> Result<Arc<dyn ScoreModel>> {
        let mut first_error = None;
        let cached = self.cell.get_or_init(|| {
            tracing::info!("Initializing forgery model...");
            match self.loader.load() {
                Ok(model) => {
                    tracing::info!("Model ready: {}", model.describe());
                    Ok(model)
                }
                Err(e) => {
                    tracing::error!("Model initialization failed: {}", e);
                    let message = e.to_string();
                    first_error = Some(e);
                    Err(message)
                }
            }
        });

        // The caller that triggered the load sees the original error kind.
        if let Some(e) = first_error {
            return Err(e);
        }

        match cached {
            Ok(model) => Ok(Arc::clone(model)),
            Err(message) => Err(ForgeryError::ModelUnavailable(message.clone())),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }
}
