//! Run metrics for the metadata pipeline
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed. Batch runs install a Prometheus recorder and
//! dump the rendered exposition text to a file once the run finishes, so a
//! node_exporter textfile collector can pick it up.

use std::fmt;
use std::fs;
use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Sources
    SourceFetchSuccess,
    SourceFetchError,
    SourcePayloadBytes,

    // Quality gate
    RecordsClassified,
    RecordsFlagged,

    // Aggregation and merge
    LineageAggregateRows,
    MergedRows,
    RollupRows,

    // Output
    OutputRowsWritten,
    StageDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SourceFetchSuccess => "seqmeta_source_fetch_success_total",
            MetricName::SourceFetchError => "seqmeta_source_fetch_error_total",
            MetricName::SourcePayloadBytes => "seqmeta_source_payload_bytes",
            MetricName::RecordsClassified => "seqmeta_records_classified_total",
            MetricName::RecordsFlagged => "seqmeta_records_flagged_total",
            MetricName::LineageAggregateRows => "seqmeta_lineage_aggregate_rows",
            MetricName::MergedRows => "seqmeta_merged_rows",
            MetricName::RollupRows => "seqmeta_rollup_rows",
            MetricName::OutputRowsWritten => "seqmeta_output_rows_written_total",
            MetricName::StageDuration => "seqmeta_stage_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Install the Prometheus recorder and keep its handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| PipelineError::Config(format!("Failed to install Prometheus recorder: {}", e)))
}

/// Write the current exposition text to `path`.
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, handle.render())?;
    info!("Wrote run metrics to {}", path.display());
    Ok(())
}

/// End-of-run textfile write. A failure is logged and reported as `false`
/// so it never masks the outcome of the run itself.
pub fn write_textfile_or_warn(handle: &PrometheusHandle, path: &Path) -> bool {
    match write_textfile(handle, path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not write metrics textfile {}: {}", path.display(), e);
            false
        }
    }
}

pub fn stage_completed(stage: &'static str, seconds: f64) {
    metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage).record(seconds);
}

pub mod sources {
    use super::MetricName;

    pub fn fetch_succeeded(source: &'static str, bytes: usize) {
        metrics::counter!(MetricName::SourceFetchSuccess.as_str(), "source" => source).increment(1);
        metrics::gauge!(MetricName::SourcePayloadBytes.as_str(), "source" => source).set(bytes as f64);
    }

    pub fn fetch_failed(source: &'static str) {
        metrics::counter!(MetricName::SourceFetchError.as_str(), "source" => source).increment(1);
    }
}

pub mod quality_gate {
    use super::MetricName;

    pub fn records_classified(count: usize) {
        metrics::counter!(MetricName::RecordsClassified.as_str()).increment(count as u64);
    }

    pub fn records_flagged(flag: &'static str, count: usize) {
        metrics::counter!(MetricName::RecordsFlagged.as_str(), "flag" => flag).increment(count as u64);
    }
}

pub mod aggregation {
    use super::MetricName;

    pub fn lineage_rows(count: usize) {
        metrics::gauge!(MetricName::LineageAggregateRows.as_str()).set(count as f64);
    }

    pub fn merged_rows(count: usize) {
        metrics::gauge!(MetricName::MergedRows.as_str()).set(count as f64);
    }

    pub fn rollup_rows(count: usize) {
        metrics::gauge!(MetricName::RollupRows.as_str()).set(count as f64);
    }
}

pub mod output {
    use super::MetricName;

    pub fn rows_written(output: &'static str, count: usize) {
        metrics::counter!(MetricName::OutputRowsWritten.as_str(), "output" => output)
            .increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed_and_unique() {
        let all = [
            MetricName::SourceFetchSuccess,
            MetricName::SourceFetchError,
            MetricName::SourcePayloadBytes,
            MetricName::RecordsClassified,
            MetricName::RecordsFlagged,
            MetricName::LineageAggregateRows,
            MetricName::MergedRows,
            MetricName::RollupRows,
            MetricName::OutputRowsWritten,
            MetricName::StageDuration,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), all.len());
        assert!(names.iter().all(|n| n.starts_with("seqmeta_")));
        assert_eq!(MetricName::RecordsFlagged.to_string(), "seqmeta_records_flagged_total");
    }

    #[test]
    fn test_textfile_write_failure_is_reported_not_raised() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        assert!(!write_textfile_or_warn(&handle, &blocker.join("seqmeta.prom")));
        assert!(write_textfile_or_warn(&handle, &dir.path().join("out/seqmeta.prom")));
        assert!(dir.path().join("out/seqmeta.prom").exists());
    }
}
