use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::app::ports::HttpClientPort;
use crate::config::Config;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::ingestion::exclusion::load_exclusion_list;
use crate::pipeline::ingestion::external_series::load_external_series;
use crate::pipeline::ingestion::metadata::MetadataTable;
use crate::pipeline::ingestion::regions::RegionTable;
use crate::pipeline::output;
use crate::pipeline::processing::enrich::{AnnotatedRecord, DefaultAnnotator};
use crate::pipeline::processing::lineage::aggregate_by_lineage;
use crate::pipeline::processing::merge::{apply_derived_rates, merge_with_external, MergedTable};
use crate::pipeline::processing::quality_gate::{
    ClassificationStats, DefaultQualityGate, QualityGateConfig,
};
use crate::pipeline::processing::rollup::{
    add_region_labels, append_rollups, compute_vaccination_bottom_up,
    overwrite_regional_vaccination, LagStatsIndex,
};
use crate::pipeline::processing::weekly::aggregate_weekly;

/// Row counts of each written output
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputCounts {
    pub cleaned: usize,
    pub merged: usize,
    pub weekly: Option<usize>,
}

/// What a run did, written next to the outputs as JSON
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub reference_date: NaiveDate,
    pub excluded_names: usize,
    pub quality: ClassificationStats,
    pub lineage_count_rows: usize,
    pub external_series_rows: usize,
    pub country_rows: usize,
    pub rollup_rows: usize,
    /// Latest submission date in the metadata; later rows are dropped
    pub truncation_date: Option<NaiveDate>,
    pub rows_truncated: usize,
    pub outputs: OutputCounts,
}

/// Runs one full batch pass over a metadata snapshot
pub struct MetadataPipeline<'a> {
    config: &'a Config,
    http: &'a dyn HttpClientPort,
}

impl<'a> MetadataPipeline<'a> {
    pub fn new(config: &'a Config, http: &'a dyn HttpClientPort) -> Self {
        Self { config, http }
    }

    pub fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id);
        let _enter = span.enter();

        let started_at = Utc::now();
        let reference_date = self.config.reference_date();
        let sources = &self.config.sources;
        info!("🚀 Starting metadata run (processing date {})", reference_date);

        let metadata = timed("read_metadata", || MetadataTable::from_path(&sources.metadata_path))?;
        metadata.validate_columns()?;
        let records = metadata.sequence_records()?;
        drop(metadata);

        let exclusions = load_exclusion_list(self.http, &sources.exclusion_list_url)?;

        let gate = DefaultQualityGate::with_config(
            &exclusions,
            QualityGateConfig {
                reference_date,
                ..QualityGateConfig::default()
            },
        );
        let classified = timed("classify", || Ok(gate.classify_batch(records)))?;
        let quality = ClassificationStats::from_records(&classified);

        let annotated = timed("annotate", || Ok(DefaultAnnotator::new().annotate_batch(classified)))?;
        let cleaned_rows =
            output::write_cleaned(&self.config.output_path(&self.config.outputs.cleaned_file), &annotated)?;

        let counts = timed("aggregate", || Ok(aggregate_by_lineage(&annotated)))?;
        let lineage_count_rows = counts.len();
        debug!("{} lineage count rows", lineage_count_rows);

        let series = load_external_series(self.http, &sources.external_series_url)?;
        let mut table = timed("merge", || merge_with_external(counts, &series))?;
        let country_rows = table.rows.len();

        let regions = RegionTable::from_path(&sources.who_regions_path)?;
        timed("rollup", || {
            add_region_labels(&mut table, &regions);
            append_rollups(&mut table);
            LagStatsIndex::compute(&annotated, &series.location_profiles(), &regions)
                .attach(&mut table.rows);
            compute_vaccination_bottom_up(&mut table.rows);
            overwrite_regional_vaccination(&mut table.rows, series.regional_vaccination());
            apply_derived_rates(&mut table.rows);
            Ok(())
        })?;
        let rollup_rows = table.rows.len() - country_rows;

        let truncation_date = latest_submission(&annotated);
        let rows_truncated = truncate_after(&mut table, truncation_date);

        let merged_rows =
            output::write_merged(&self.config.output_path(&self.config.outputs.merged_file), &table)?;
        let weekly_rows = match &self.config.outputs.weekly_file {
            Some(file) => {
                let weekly = aggregate_weekly(&table);
                Some(output::write_weekly(&self.config.output_path(file), &table, &weekly)?)
            }
            None => None,
        };

        let summary = RunSummary {
            run_id,
            started_at,
            reference_date,
            excluded_names: exclusions.len(),
            quality,
            lineage_count_rows,
            external_series_rows: series.len(),
            country_rows,
            rollup_rows,
            truncation_date,
            rows_truncated,
            outputs: OutputCounts {
                cleaned: cleaned_rows,
                merged: merged_rows,
                weekly: weekly_rows,
            },
        };
        output::write_json(&self.config.output_path(&self.config.outputs.summary_file), &summary)?;

        info!(
            "✅ Run complete: {} records, {} country rows, {} rollup rows, {} rows written",
            summary.quality.total_records, country_rows, rollup_rows, merged_rows
        );
        Ok(summary)
    }
}

fn timed<T>(stage: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed().as_secs_f64();
    metrics::stage_completed(stage, elapsed);
    debug!("Stage {} took {:.3}s", stage, elapsed);
    result
}

pub fn latest_submission(records: &[AnnotatedRecord]) -> Option<NaiveDate> {
    records.iter().filter_map(|r| r.submit_date).max()
}

/// Drop every row whose external date is after `cutoff`. Without a cutoff
/// nothing is dropped.
pub fn truncate_after(table: &mut MergedTable, cutoff: Option<NaiveDate>) -> usize {
    let Some(cutoff) = cutoff else {
        return 0;
    };
    let before = table.rows.len();
    table.rows.retain(|row| row.owid_date <= cutoff);
    let dropped = before - table.rows.len();
    if dropped > 0 {
        info!("Dropped {} rows dated after {}", dropped, cutoff);
    }
    dropped
}
