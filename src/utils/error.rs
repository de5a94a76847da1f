use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeryError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Model unavailable (initial load failed): {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unexpected tensor shape: expected {expected:?}, got {actual:?}")]
    Shape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0} bytes, max allowed: {1} bytes")]
    FileTooLarge(usize, usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ForgeryError {
    /// Errors that belong to a single input item and must not abort a batch.
    pub fn is_item_error(&self) -> bool {
        matches!(
            self,
            ForgeryError::Inference(_)
                | ForgeryError::Shape { .. }
                | ForgeryError::FileTooLarge(_, _)
                | ForgeryError::UnsupportedFormat(_)
                | ForgeryError::Io(_)
                | ForgeryError::Base64(_)
                | ForgeryError::ImageDecode(_)
                | ForgeryError::Ort(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ForgeryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ForgeryError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            ForgeryError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ForgeryError::Base64(_) => StatusCode::BAD_REQUEST,
            ForgeryError::Json(_) => StatusCode::BAD_REQUEST,
            ForgeryError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ForgeryError::Shape { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ForgeryError::ModelLoad(_) | ForgeryError::ModelUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ForgeryError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            ForgeryError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            ForgeryError::Inference(_) => "INFERENCE_ERROR",
            ForgeryError::Shape { .. } => "SHAPE_ERROR",
            ForgeryError::InvalidInput(_) => "INVALID_INPUT",
            ForgeryError::FileTooLarge(_, _) => "FILE_TOO_LARGE",
            ForgeryError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ForgeryError::Config(_) => "CONFIG_ERROR",
            ForgeryError::Io(_) => "IO_ERROR",
            ForgeryError::Json(_) => "JSON_ERROR",
            ForgeryError::Base64(_) => "BASE64_DECODE_ERROR",
            ForgeryError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            ForgeryError::Ort(_) => "ORT_ERROR",
            ForgeryError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ForgeryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        });

        tracing::error!("Request failed: {} ({})", self, status);

        (status, axum::Json(error_response)).into_response()
    }
}
