use crate::utils::error::ForgeryError;
use crate::Result;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default name of the exported classifier inside the models directory.
pub const DEFAULT_MODEL_FILE: &str = "forgery_detection_model.onnx";

/// Default report file written by the folder scan.
pub const DEFAULT_REPORT_FILE: &str = "prediction_results.csv";

#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Model directory
    pub models_dir: PathBuf,

    /// Explicit model file, overrides `models_dir`
    pub model_path: Option<PathBuf>,

    /// Worker threads for the HTTP runtime
    pub workers: usize,

    /// Development mode
    pub dev_mode: bool,

    /// Upper bound for a single encoded image, in bytes
    pub max_image_bytes: usize,

    /// Where the folder scan writes its report
    pub report_path: PathBuf,

    /// Device the classifier session runs on
    pub execution: ExecutionContext,

    /// ONNX Runtime settings
    pub onnx_config: OnnxConfig,

    /// HTTP server settings
    pub server_config: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// Intra-op CPU threads
    pub intra_threads: usize,

    /// Graph optimization level (0-3)
    pub optimization_level: i32,

    /// Enable graph optimization
    pub enable_optimization: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Request timeout (seconds)
    pub request_timeout: u64,

    /// Maximum request body (bytes)
    pub max_request_size: usize,

    /// Maximum number of images in a single upload
    pub max_files_per_request: usize,
}

/// Device selection, chosen once at startup and never changed mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    #[default]
    Cpu,
    Cuda { device_id: i32 },
}

impl FromStr for ExecutionContext {
    type Err = ForgeryError;

    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "cpu" => Ok(ExecutionContext::Cpu),
            "cuda" | "gpu" => Ok(ExecutionContext::Cuda { device_id: 0 }),
            other => match other.strip_prefix("cuda:") {
                Some(id) => id
                    .parse::<i32>()
                    .ok()
                    .filter(|id| *id >= 0)
                    .map(|device_id| ExecutionContext::Cuda { device_id })
                    .ok_or_else(|| ForgeryError::Config(format!("Invalid CUDA device id: {}", id))),
                None => Err(ForgeryError::Config(format!(
                    "Unknown device '{}', expected cpu, cuda or cuda:<id>",
                    s
                ))),
            },
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Cpu => write!(f, "cpu"),
            ExecutionContext::Cuda { device_id } => write!(f, "cuda:{}", device_id),
        }
    }
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            intra_threads: (num_cpus::get() * 3 / 4).max(1),
            optimization_level: 3,
            enable_optimization: true,
        }
    }
}

impl Config {
    pub fn new(
        bind_addr: String,
        models_dir: String,
        workers: Option<usize>,
        dev_mode: bool,
    ) -> Result<Self> {
        let cpu_cores = num_cpus::get();
        let workers = workers.unwrap_or(cpu_cores);
        if workers == 0 {
            return Err(ForgeryError::Config("workers must be at least 1".to_string()));
        }

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 },
            max_request_size: 200 * 1024 * 1024,
            max_files_per_request: if dev_mode { 16 } else { 64 },
        };

        Ok(Self {
            bind_addr,
            models_dir: PathBuf::from(models_dir),
            model_path: None,
            workers,
            dev_mode,
            max_image_bytes: 50 * 1024 * 1024,
            report_path: PathBuf::from(DEFAULT_REPORT_FILE),
            execution: ExecutionContext::default(),
            onnx_config: OnnxConfig::default(),
            server_config,
        })
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.onnx_config.intra_threads = threads.max(1);
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = path.into();
        self
    }

    /// Path of the classifier artifact
    pub fn model_file(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.models_dir.join(DEFAULT_MODEL_FILE))
    }
}
