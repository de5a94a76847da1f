use crate::forgery::engine::PredictionEngine;
use crate::forgery::types::{BatchItem, BatchProgress, BatchReport};
use crate::image::ImageSource;
use crate::Result;
use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc;

/// Extensions picked up by a folder scan, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "tif", "tiff"];

/// Receives a [`BatchProgress`] after each item.
pub trait ProgressObserver {
    fn on_progress(&mut self, progress: &BatchProgress);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&BatchProgress),
{
    fn on_progress(&mut self, progress: &BatchProgress) {
        self(progress)
    }
}

/// Ignores progress.
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&mut self, _progress: &BatchProgress) {}
}

/// Forwards progress into an unbounded channel. A closed receiver is ignored.
pub struct ChannelObserver(pub mpsc::UnboundedSender<BatchProgress>);

impl ProgressObserver for ChannelObserver {
    fn on_progress(&mut self, progress: &BatchProgress) {
        let _ = self.0.send(progress.clone());
    }
}

/// Sequential batch driver. Results keep input order.
pub struct BatchRunner {
    engine: PredictionEngine,
}

impl BatchRunner {
    pub fn new(engine: PredictionEngine) -> Self {
        Self { engine }
    }

    pub fn run(&self, items: Vec<BatchItem>, observer: &mut dyn ProgressObserver) -> BatchReport {
        let total = items.len();
        let start_time = Instant::now();
        let mut report = BatchReport::with_capacity(total);

        tracing::info!("Starting batch of {} item(s)", total);

        for (index, item) in items.into_iter().enumerate() {
            let result = self.engine.process(&item);
            report.push(result.clone());

            observer.on_progress(&BatchProgress {
                completed: index + 1,
                total,
                result,
            });
        }

        let summary = report.summary();
        tracing::info!(
            "Batch completed: total={}, genuine={}, forged={}, failed={}, time={:.3}s",
            summary.total,
            summary.genuine,
            summary.forged,
            summary.failed,
            start_time.elapsed().as_secs_f32()
        );

        report
    }

    pub fn run_silent(&self, items: Vec<BatchItem>) -> BatchReport {
        self.run(items, &mut NoopObserver)
    }
}

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Lists the images directly inside `dir`, sorted by file name.
pub fn collect_folder(dir: &Path) -> Result<Vec<BatchItem>> {
    let mut items = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if !entry.file_type()?.is_file() && !path.is_file() {
            continue;
        }
        if !has_supported_extension(&path) {
            tracing::debug!("Skipping non-image file: {}", path.display());
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        items.push(BatchItem::new(name, ImageSource::Path(path)));
    }

    items.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::info!("Found {} image(s) in {}", items.len(), dir.display());
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassScores, ScoreModel};
    use ndarray::ArrayView4;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Genuine;

    impl ScoreModel for Genuine {
        fn predict_batch(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<ClassScores>> {
            Ok(vec![ClassScores::new(3.0, 0.0); batch.shape()[0]])
        }
    }

    fn runner() -> BatchRunner {
        BatchRunner::new(PredictionEngine::new(Arc::new(Genuine)))
    }

    #[test]
    fn extension_matching_ignores_case() {
        for name in ["a.png", "b.JPG", "c.Jpeg", "d.tif", "e.TIFF"] {
            assert!(has_supported_extension(&PathBuf::from(name)), "{name}");
        }
        for name in ["a.gif", "b.bmp", "noext", "c.png.txt", ".png"] {
            assert!(!has_supported_extension(&PathBuf::from(name)), "{name}");
        }
    }

    #[test]
    fn empty_batch_gives_empty_report() {
        let mut calls = 0;
        let report = runner().run(Vec::new(), &mut |_: &BatchProgress| calls += 1);
        assert!(report.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn observer_sees_every_item_in_order() {
        let items = vec![
            BatchItem::new("first.png", ImageSource::Bytes(vec![1, 2, 3])),
            BatchItem::new("second.png", ImageSource::Bytes(vec![4, 5, 6])),
        ];

        let mut seen = Vec::new();
        let report = runner().run(items, &mut |p: &BatchProgress| {
            seen.push((p.completed, p.total, p.result.file_name.clone()))
        });

        assert_eq!(report.len(), 2);
        assert_eq!(
            seen,
            vec![
                (1, 2, "first.png".to_string()),
                (2, 2, "second.png".to_string()),
            ]
        );
    }

    #[test]
    fn channel_observer_forwards_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let items = vec![BatchItem::new("only.png", ImageSource::Bytes(Vec::new()))];

        runner().run(items, &mut ChannelObserver(tx));

        let progress = rx.try_recv().unwrap();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.fraction(), 1.0);
        assert_eq!(progress.result.file_name, "only.png");
    }

    #[test]
    fn missing_folder_is_an_error() {
        assert!(collect_folder(Path::new("/nonexistent/scan-dir")).is_err());
    }
}
