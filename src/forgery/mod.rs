pub mod engine;
pub mod report;
pub mod runner;
pub mod types;

pub use engine::PredictionEngine;
pub use report::{ReportExporter, ReportRow, ReportTable, REPORT_COLUMNS};
pub use runner::{
    collect_folder, has_supported_extension, BatchRunner, ChannelObserver, NoopObserver,
    ProgressObserver, SUPPORTED_EXTENSIONS,
};
pub use types::{BatchItem, BatchProgress, BatchReport, BatchSummary, Outcome, PredictionResult};
