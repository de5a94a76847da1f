//! Tabular export of a [`BatchReport`].
//!
//! The canonical schema is `file_name,prediction,confidence`. Successful rows
//! carry the label and a two-decimal percentage; failed rows carry the failure
//! reason in `prediction` and leave `confidence` empty.

use crate::forgery::types::{BatchReport, Outcome};
use crate::models::Label;
use crate::utils::error::ForgeryError;
use crate::Result;
use serde::Serialize;
use std::path::Path;

pub const REPORT_COLUMNS: [&str; 3] = ["file_name", "prediction", "confidence"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub file_name: String,
    pub prediction: String,
    pub confidence: Option<String>,
}

impl ReportRow {
    /// The label, when the row records a successful prediction.
    pub fn label(&self) -> Option<Label> {
        match self.prediction.as_str() {
            "Genuine" => Some(Label::Genuine),
            "Forged" => Some(Label::Forged),
            _ => None,
        }
    }

    /// Numeric confidence parsed back from the percentage string.
    pub fn confidence_value(&self) -> Option<f32> {
        self.confidence
            .as_deref()
            .and_then(|c| c.strip_suffix('%'))
            .and_then(|c| c.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportTable {
    pub columns: [&'static str; 3],
    pub rows: Vec<ReportRow>,
}

pub struct ReportExporter;

impl ReportExporter {
    pub fn export(report: &BatchReport) -> ReportTable {
        let rows = report
            .iter()
            .map(|result| match &result.outcome {
                Outcome::Success { label, confidence } => ReportRow {
                    file_name: result.file_name.clone(),
                    prediction: label.to_string(),
                    confidence: Some(Self::format_confidence(*confidence)),
                },
                Outcome::Failed { reason } => ReportRow {
                    file_name: result.file_name.clone(),
                    prediction: reason.clone(),
                    confidence: None,
                },
            })
            .collect();

        ReportTable {
            columns: REPORT_COLUMNS,
            rows,
        }
    }

    pub fn format_confidence(confidence: f32) -> String {
        format!("{:.2}%", confidence)
    }

    /// Header plus one line per row, every line `\n` terminated.
    pub fn to_delimited_text(table: &ReportTable) -> String {
        let mut csv = table.columns.join(",");
        csv.push('\n');

        for row in &table.rows {
            csv.push_str(&Self::escape_field(&row.file_name));
            csv.push(',');
            csv.push_str(&Self::escape_field(&row.prediction));
            csv.push(',');
            if let Some(confidence) = &row.confidence {
                csv.push_str(&Self::escape_field(confidence));
            }
            csv.push('\n');
        }

        csv
    }

    pub fn write_csv(table: &ReportTable, path: &Path) -> Result<()> {
        std::fs::write(path, Self::to_delimited_text(table))?;
        tracing::info!("Report with {} row(s) written to {}", table.rows.len(), path.display());
        Ok(())
    }

    /// Reads text produced by [`ReportExporter::to_delimited_text`].
    pub fn parse_delimited_text(text: &str) -> Result<Vec<ReportRow>> {
        let mut records = Self::split_records(text)?.into_iter();

        let header = records
            .next()
            .ok_or_else(|| ForgeryError::InvalidInput("Report is empty".to_string()))?;
        if header != REPORT_COLUMNS {
            return Err(ForgeryError::InvalidInput(format!(
                "Unexpected report header: {:?}",
                header
            )));
        }

        records
            .enumerate()
            .map(|(i, mut fields)| {
                if fields.len() != REPORT_COLUMNS.len() {
                    return Err(ForgeryError::InvalidInput(format!(
                        "Row {} has {} fields, expected {}",
                        i + 1,
                        fields.len(),
                        REPORT_COLUMNS.len()
                    )));
                }
                let confidence = fields.pop().filter(|c| !c.is_empty());
                let prediction = fields.pop().unwrap_or_default();
                let file_name = fields.pop().unwrap_or_default();
                Ok(ReportRow {
                    file_name,
                    prediction,
                    confidence,
                })
            })
            .collect()
    }

    fn escape_field(field: &str) -> String {
        if field.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    fn split_records(text: &str) -> Result<Vec<Vec<String>>> {
        let mut records = Vec::new();
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            if in_quotes {
                match ch {
                    '"' if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    '"' => in_quotes = false,
                    other => field.push(other),
                }
                continue;
            }

            match ch {
                '"' if field.is_empty() => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                '\r' if chars.peek() == Some(&'\n') => {}
                '\n' => {
                    fields.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut fields));
                }
                other => field.push(other),
            }
        }

        if in_quotes {
            return Err(ForgeryError::InvalidInput(
                "Unterminated quoted field in report".to_string(),
            ));
        }
        if !field.is_empty() || !fields.is_empty() {
            fields.push(field);
            records.push(fields);
        }

        Ok(records)
    }
}
