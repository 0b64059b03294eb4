use crate::analysis::{AggregateResult, AttributeSelector, KindFilter, KindSummary};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Aggregate result together with what was aggregated
///
/// ```json
/// {
///   "recording": "/tmp/app.jfr",
///   "kinds": "jdk.JavaMonitorEnter",
///   "attribute": "duration",
///   "count": 3,
///   "mean": 20.0,
///   "stddev": 8.16496580927726,
///   "unit": "nanoseconds"
/// }
/// ```
///
/// `mean` and `stddev` are `null` when no event matched.
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub recording: String,
    pub kinds: String,
    pub attribute: String,
    #[serde(flatten)]
    pub result: AggregateResult,
}

impl JsonReport {
    #[must_use]
    pub fn new(
        recording: &Path,
        filter: &KindFilter,
        selector: &AttributeSelector,
        result: AggregateResult,
    ) -> Self {
        Self {
            recording: recording.display().to_string(),
            kinds: filter.to_string(),
            attribute: selector.name().to_string(),
            result,
        }
    }

    /// Write the report as pretty-printed JSON followed by a newline
    ///
    /// # Errors
    /// Returns an error if serialization or the writer fails.
    pub fn export<W: Write>(&self, writer: W) -> Result<()> {
        write_json(writer, self)
    }
}

/// Per-kind counts of one recording
#[derive(Debug, Clone, Serialize)]
pub struct KindsReport {
    pub recording: String,
    pub total: usize,
    pub kinds: Vec<KindSummary>,
}

impl KindsReport {
    #[must_use]
    pub fn new(recording: &Path, kinds: Vec<KindSummary>) -> Self {
        Self {
            recording: recording.display().to_string(),
            total: kinds.iter().map(|k| k.count).sum(),
            kinds,
        }
    }

    /// # Errors
    /// Returns an error if serialization or the writer fails.
    pub fn export<W: Write>(&self, writer: W) -> Result<()> {
        write_json(writer, self)
    }
}

fn write_json<W: Write, T: Serialize>(mut writer: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, value).context("Failed to write report JSON")?;
    writeln!(writer).context("Failed to write report JSON")?;
    Ok(())
}
