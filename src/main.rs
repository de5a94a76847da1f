use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc_forgery::{
    config::Config,
    forgery::{collect_folder, BatchProgress, BatchRunner, PredictionEngine, ReportExporter},
    image::ImageLoader,
    web::serve,
    ExecutionContext, ModelHandle,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "doc-forgery")]
#[command(about = "Classify document images as genuine or forged")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Model directory path
    #[arg(long, default_value = "models", global = true)]
    models_dir: String,

    /// Explicit model file (overrides --models-dir)
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Execution device: cpu, cuda or cuda:<id>
    #[arg(long, default_value = "cpu", global = true)]
    device: String,

    /// ONNX Runtime intra-op threads
    #[arg(long, global = true)]
    intra_threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify every image in a folder and write a CSV report
    Scan {
        /// Folder containing png/jpg/jpeg/tif/tiff files
        folder: PathBuf,

        /// Report file
        #[arg(long, short, default_value = doc_forgery::config::DEFAULT_REPORT_FILE)]
        output: PathBuf,
    },
    /// Serve the upload API
    Serve {
        /// Server bind address
        #[arg(long, default_value = "0.0.0.0:8501")]
        bind: String,

        /// Number of worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Enable development mode
        #[arg(long)]
        dev: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let execution: ExecutionContext = args.device.parse()?;

    match args.command {
        Command::Scan { ref folder, ref output } => {
            let config = build_config(&args, "127.0.0.1:0".to_string(), None, false)?
                .with_execution(execution)
                .with_report_path(output.clone());
            scan(config, folder.clone())
        }
        Command::Serve { ref bind, workers, dev } => {
            let config = build_config(&args, bind.clone(), workers, dev)?.with_execution(execution);
            run_server(config)
        }
    }
}

fn build_config(args: &Args, bind: String, workers: Option<usize>, dev: bool) -> Result<Config> {
    let mut config = Config::new(bind, args.models_dir.clone(), workers, dev)?;
    if let Some(model) = &args.model {
        config = config.with_model_path(model.clone());
    }
    if let Some(threads) = args.intra_threads {
        config = config.with_intra_threads(threads);
    }
    Ok(config)
}

fn scan(config: Config, folder: PathBuf) -> Result<()> {
    tracing::info!("Loading model...");
    let handle = ModelHandle::from_config(&config);
    let model = handle.get().context("failed to load the forgery model")?;

    tracing::info!("Processing images in folder: {}", folder.display());
    let items = collect_folder(&folder)
        .with_context(|| format!("failed to read folder {}", folder.display()))?;

    let engine = PredictionEngine::new(model).with_loader(ImageLoader::new(config.max_image_bytes));
    let runner = BatchRunner::new(engine);
    let report = runner.run(items, &mut |progress: &BatchProgress| {
        tracing::info!(
            "[{}/{}] {}",
            progress.completed,
            progress.total,
            progress.result.file_name
        );
    });

    let table = ReportExporter::export(&report);
    ReportExporter::write_csv(&table, &config.report_path)
        .with_context(|| format!("failed to write {}", config.report_path.display()))?;

    let summary = report.summary();
    println!(
        "Processed {} image(s): {} genuine, {} forged, {} failed",
        summary.total, summary.genuine, summary.forged, summary.failed
    );
    println!("Results saved to '{}'", config.report_path.display());

    Ok(())
}

fn run_server(config: Config) -> Result<()> {
    tracing::info!("Starting document forgery service...");
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!("Model file: {}", config.model_file().display());

    // Fail before binding if the model is unusable.
    let handle = ModelHandle::from_config(&config);
    let model = handle.get().context("failed to load the forgery model")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(config, model))?;
    Ok(())
}
