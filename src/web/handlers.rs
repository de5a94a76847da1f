use crate::{
    forgery::{
        BatchItem, BatchProgress, BatchRunner, BatchSummary, ChannelObserver, NoopObserver,
        PredictionEngine, PredictionResult, ProgressObserver, ReportExporter,
    },
    image::{ImageLoader, ImageSource},
    utils::error::ForgeryError,
    web::AppState,
    BatchReport, Result,
};
use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        Multipart, State,
    },
    http::header,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Base64 upload body
#[derive(Debug, Deserialize)]
pub struct ClassifyJsonRequest {
    pub images: Vec<JsonImage>,
}

#[derive(Debug, Deserialize)]
pub struct JsonImage {
    /// File name shown in the report
    pub name: String,
    /// Base64 data, optionally as a data URL
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, request_id: String) -> Self {
        Self {
            success: true,
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub results: Vec<PredictionResult>,
    pub summary: BatchSummary,
    /// Seconds
    pub processing_time: f32,
}

pub async fn classify_upload_handler(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<ClassifyResponse>>> {
    let start_time = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("Processing multipart classify request: request_id={}", request_id);

    let multipart = multipart.map_err(multipart_rejection)?;
    let items = read_uploads(multipart, state.config.server_config.max_files_per_request).await?;
    let report = run_batch(&state, items, &request_id).await?;

    Ok(Json(ApiResponse::success(
        to_response(report, start_time),
        request_id,
    )))
}

pub async fn classify_json_handler(
    State(state): State<AppState>,
    request: std::result::Result<Json<ClassifyJsonRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ClassifyResponse>>> {
    let start_time = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let Json(request) = request
        .map_err(|e| ForgeryError::InvalidInput(format!("Invalid JSON body: {}", e.body_text())))?;
    tracing::info!(
        "Processing JSON classify request: request_id={}, images={}",
        request_id,
        request.images.len()
    );

    if request.images.is_empty() {
        return Err(ForgeryError::InvalidInput("No images provided".to_string()));
    }
    check_file_count(request.images.len(), state.config.server_config.max_files_per_request)?;

    let items = request
        .images
        .into_iter()
        .map(|image| BatchItem::new(image.name, ImageSource::Base64(image.data)))
        .collect();

    let report = run_batch(&state, items, &request_id).await?;

    Ok(Json(ApiResponse::success(
        to_response(report, start_time),
        request_id,
    )))
}

/// Same input as [`classify_upload_handler`], answered with the CSV report.
pub async fn classify_report_handler(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse> {
    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("Processing report request: request_id={}", request_id);

    let multipart = multipart.map_err(multipart_rejection)?;
    let items = read_uploads(multipart, state.config.server_config.max_files_per_request).await?;
    let report = run_batch(&state, items, &request_id).await?;
    let csv = ReportExporter::to_delimited_text(&ReportExporter::export(&report));

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"prediction_report.csv\"",
            ),
        ],
        csv,
    ))
}

fn to_response(report: BatchReport, start_time: Instant) -> ClassifyResponse {
    let summary = report.summary();
    ClassifyResponse {
        results: report.into_results(),
        summary,
        processing_time: start_time.elapsed().as_secs_f32(),
    }
}

fn multipart_rejection(rejection: MultipartRejection) -> ForgeryError {
    ForgeryError::InvalidInput(format!("Invalid multipart body: {}", rejection.body_text()))
}

fn check_file_count(count: usize, max: usize) -> Result<()> {
    if count > max {
        return Err(ForgeryError::InvalidInput(format!(
            "Too many images: {}, max allowed: {}",
            count, max
        )));
    }
    Ok(())
}

/// Collects every `files`/`file` part, in upload order.
async fn read_uploads(mut multipart: Multipart, max_files: usize) -> Result<Vec<BatchItem>> {
    let mut items = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ForgeryError::InvalidInput(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "files" | "file" => {
                let name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("upload-{}", items.len() + 1));

                let data = field.bytes().await.map_err(|e| {
                    ForgeryError::InvalidInput(format!("Failed to read file data: {}", e))
                })?;

                tracing::debug!("Received file '{}': {} bytes", name, data.len());
                items.push(BatchItem::new(name, ImageSource::Bytes(data.to_vec())));
                check_file_count(items.len(), max_files)?;
            }
            _ => {
                tracing::debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    if items.is_empty() {
        return Err(ForgeryError::InvalidInput("No image files provided".to_string()));
    }

    Ok(items)
}

/// Runs the batch on the blocking pool so inference does not stall the runtime.
async fn run_batch(state: &AppState, items: Vec<BatchItem>, request_id: &str) -> Result<BatchReport> {
    let model = Arc::clone(&state.model);
    let loader = ImageLoader::new(state.config.max_image_bytes);

    let mut observer: Box<dyn ProgressObserver + Send> = if state.config.dev_mode {
        let (status_tx, mut status_rx) = mpsc::unbounded_channel::<BatchProgress>();
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            while let Some(progress) = status_rx.recv().await {
                tracing::debug!(
                    "Progress [{}]: {}/{} ({:.1}%) - {}",
                    request_id,
                    progress.completed,
                    progress.total,
                    progress.fraction() * 100.0,
                    progress.result.file_name
                );
            }
        });
        Box::new(ChannelObserver(status_tx))
    } else {
        Box::new(NoopObserver)
    };

    let report = tokio::task::spawn_blocking(move || {
        let runner = BatchRunner::new(PredictionEngine::new(model).with_loader(loader));
        runner.run(items, observer.as_mut())
    })
    .await
    .map_err(|e| ForgeryError::Internal(format!("Batch task failed: {}", e)))?;

    tracing::info!(
        "Request completed: request_id={}, items={}",
        request_id,
        report.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassScores, ScoreModel};
    use crate::web::create_app;
    use crate::Config;
    use axum::{body::Body, http::Request, http::StatusCode};
    use base64::Engine;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use ndarray::ArrayView4;
    use std::io::Cursor;
    use tower::ServiceExt;

    struct Forged;

    impl ScoreModel for Forged {
        fn predict_batch(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<ClassScores>> {
            Ok(vec![ClassScores::new(-1.0, 1.0); batch.shape()[0]])
        }
    }

    fn config() -> Config {
        Config::new("127.0.0.1:0".into(), "models".into(), Some(1), false).unwrap()
    }

    fn app() -> axum::Router {
        app_with(config())
    }

    fn app_with(config: Config) -> axum::Router {
        create_app(AppState::new(config, Arc::new(Forged)))
    }

    const BOUNDARY: &str = "XBOUNDARYX";

    fn multipart_body(file_names: &[&str]) -> Vec<u8> {
        let png = png_bytes();
        let mut body = Vec::new();
        for name in file_names {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&png);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(uri: &str, file_names: &[&str]) -> Request<Body> {
        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(file_names)))
            .unwrap()
    }

    async fn error_code(response: axum::response::Response) -> String {
        let value: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        value["error"]["code"].as_str().unwrap_or_default().to_string()
    }

    fn png_bytes() -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 40, Rgb([12, 200, 90])))
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn json_upload_reports_each_image() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes());
        let body = serde_json::json!({
            "images": [
                { "name": "good.png", "data": encoded },
                { "name": "bad.png", "data": "bm90IGFuIGltYWdl" },
            ]
        });

        let response = app()
            .oneshot(
                Request::post("/classify/json")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let results = value["data"]["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["file_name"], "good.png");
        assert_eq!(results[0]["label"], "Forged");
        assert_eq!(results[1]["status"], "failed");
        assert_eq!(value["data"]["summary"]["failed"], 1);
    }

    #[tokio::test]
    async fn empty_json_upload_is_rejected() {
        let response = app()
            .oneshot(
                Request::post("/classify/json")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"images": []}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn multipart_report_returns_csv() {
        let response = app()
            .oneshot(multipart_request("/classify/report", &["scan.png"]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        let rows = ReportExporter::parse_delimited_text(&text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_name, "scan.png");
        assert_eq!(rows[0].prediction, "Forged");
    }

    #[tokio::test]
    async fn multipart_classify_returns_json_in_upload_order() {
        let response = app()
            .oneshot(multipart_request("/classify", &["b.png", "a.png"]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(value["success"], true);
        let results = value["data"]["results"].as_array().unwrap();
        let names: Vec<_> = results.iter().map(|r| r["file_name"].as_str().unwrap()).collect();
        assert_eq!(names, ["b.png", "a.png"]);
        assert!(results.iter().all(|r| r["label"] == "Forged"));
        assert_eq!(value["data"]["summary"]["forged"], 2);
    }

    #[tokio::test]
    async fn too_many_uploaded_files_are_rejected() {
        let mut config = config();
        config.server_config.max_files_per_request = 2;

        let response = app_with(config)
            .oneshot(multipart_request("/classify", &["1.png", "2.png", "3.png"]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_INPUT");
    }

    #[tokio::test]
    async fn too_many_json_images_are_rejected() {
        let mut config = config();
        config.server_config.max_files_per_request = 1;
        let body = serde_json::json!({
            "images": [
                { "name": "a.png", "data": "AAAA" },
                { "name": "b.png", "data": "AAAA" },
            ]
        });

        let response = app_with(config)
            .oneshot(
                Request::post("/classify/json")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_INPUT");
    }

    #[tokio::test]
    async fn malformed_json_gets_a_json_error_body() {
        let response = app()
            .oneshot(
                Request::post("/classify/json")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"images\": [oops"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_INPUT");
    }

    #[tokio::test]
    async fn multipart_without_boundary_gets_a_json_error_body() {
        let response = app()
            .oneshot(
                Request::post("/classify")
                    .header(header::CONTENT_TYPE, "multipart/form-data")
                    .body(Body::from("nothing"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_INPUT");
    }
}
