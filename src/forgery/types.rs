use crate::image::ImageSource;
use crate::models::Label;
use serde::Serialize;

/// One input of a batch: a display name plus where to read the image from.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub name: String,
    pub source: ImageSource,
}

impl BatchItem {
    pub fn new(name: impl Into<String>, source: impl Into<ImageSource>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Per-item outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        label: Label,
        /// Top softmax probability, percent.
        confidence: f32,
    },
    Failed {
        reason: String,
    },
}

/// Classification result for a single item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub file_name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl PredictionResult {
    pub fn success(file_name: impl Into<String>, label: Label, confidence: f32) -> Self {
        Self {
            file_name: file_name.into(),
            outcome: Outcome::Success { label, confidence },
        }
    }

    pub fn failed(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            outcome: Outcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn label(&self) -> Option<Label> {
        match self.outcome {
            Outcome::Success { label, .. } => Some(label),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        match self.outcome {
            Outcome::Success { confidence, .. } => Some(confidence),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { reason } => Some(reason),
            Outcome::Success { .. } => None,
        }
    }
}

/// Results of one batch, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    results: Vec<PredictionResult>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, result: PredictionResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[PredictionResult] {
        &self.results
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PredictionResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_results(self) -> Vec<PredictionResult> {
        self.results
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.results.len(),
            ..BatchSummary::default()
        };
        for result in &self.results {
            match result.label() {
                Some(Label::Genuine) => summary.genuine += 1,
                Some(Label::Forged) => summary.forged += 1,
                None => summary.failed += 1,
            }
        }
        summary
    }
}

impl From<Vec<PredictionResult>> for BatchReport {
    fn from(results: Vec<PredictionResult>) -> Self {
        Self { results }
    }
}

impl<'a> IntoIterator for &'a BatchReport {
    type Item = &'a PredictionResult;
    type IntoIter = std::slice::Iter<'a, PredictionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

/// Counts per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub genuine: usize,
    pub forged: usize,
    pub failed: usize,
}

/// Emitted after every processed item.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// Items finished so far, including this one
    pub completed: usize,
    pub total: usize,
    pub result: PredictionResult,
}

impl BatchProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}
