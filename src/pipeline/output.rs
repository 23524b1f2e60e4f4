//! CSV and JSON writers for the run outputs.
//!
//! Column names of the final table carry their source: `gisaid_` for the
//! metadata-derived identifiers and `owid_` for external series fields.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::processing::enrich::{AnnotatedRecord, CleanedRow};
use crate::pipeline::processing::merge::{MergedRow, MergedTable};
use crate::pipeline::processing::weekly::WeeklyRow;

const IDENTIFIER_COLUMNS: [&str; 5] = [
    "gisaid_collect_date",
    "gisaid_collect_yearweek",
    "gisaid_collect_weekstartdate",
    "gisaid_country",
    "aggregate_location",
];

const EXTERNAL_COLUMNS: [&str; 13] = [
    "owid_date",
    "owid_location",
    "owid_continent",
    "owid_population",
    "owid_new_cases",
    "owid_new_cases_smoothed",
    "owid_new_people_vaccinated",
    "owid_new_people_fully_vaccinated",
    "owid_people_vaccinated",
    "owid_people_fully_vaccinated",
    "owid_people_vaccinated_per_hundred",
    "owid_people_fully_vaccinated_per_hundred",
    "who_region",
];

const LAG_COLUMNS: [&str; 6] = [
    "seq_count",
    "gisaid_lagdays_median",
    "gisaid_lagdays_min",
    "gisaid_lagdays_max",
    "gisaid_lagdays_q1",
    "gisaid_lagdays_q3",
];

const RATE_COLUMNS: [&str; 2] = ["sequences_over_cases", "cases_per_million"];

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

/// The intermediate cleaned table: one row per input record
pub fn write_cleaned(path: &Path, records: &[AnnotatedRecord]) -> Result<usize> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(CleanedRow::from(record))?;
    }
    writer.flush()?;

    info!("Wrote {} cleaned records to {}", records.len(), path.display());
    metrics::output::rows_written("cleaned", records.len());
    Ok(records.len())
}

pub fn merged_header(table: &MergedTable) -> Vec<String> {
    IDENTIFIER_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(table.lineage_columns.iter().cloned())
        .chain(table.who_columns.iter().cloned())
        .chain(EXTERNAL_COLUMNS.iter().map(|c| c.to_string()))
        .chain(LAG_COLUMNS.iter().map(|c| c.to_string()))
        .chain(RATE_COLUMNS.iter().map(|c| c.to_string()))
        .collect()
}

pub fn merged_record(table: &MergedTable, row: &MergedRow) -> Vec<String> {
    let ext = &row.external;
    let lag = row.lag.as_ref();

    let mut record = vec![
        date(row.collect_date),
        row.collect_yearweek.clone(),
        date(row.collect_weekstartdate),
        opt(row.country.as_deref()),
        opt(row.aggregate_location.as_deref()),
    ];
    record.extend(
        table
            .lineage_columns
            .iter()
            .map(|c| opt(row.lineage_counts.get(c))),
    );
    record.extend(table.who_columns.iter().map(|c| opt(row.who_counts.get(c))));
    record.extend([
        date(row.owid_date),
        opt(ext.location.as_deref()),
        opt(ext.continent.as_deref()),
        opt(ext.population),
        opt(ext.new_cases),
        opt(ext.new_cases_smoothed),
        opt(ext.new_people_vaccinated),
        opt(ext.new_people_fully_vaccinated),
        opt(ext.people_vaccinated),
        opt(ext.people_fully_vaccinated),
        opt(ext.people_vaccinated_per_hundred),
        opt(ext.people_fully_vaccinated_per_hundred),
        opt(row.who_region.as_deref()),
    ]);
    record.extend([
        opt(lag.map(|l| l.seq_count)),
        opt(lag.and_then(|l| l.median)),
        opt(lag.and_then(|l| l.min)),
        opt(lag.and_then(|l| l.max)),
        opt(lag.and_then(|l| l.q1)),
        opt(lag.and_then(|l| l.q3)),
        opt(row.sequences_over_cases),
        opt(row.cases_per_million),
    ]);
    record
}

/// The final wide table: country rows followed by rollup rows
pub fn write_merged(path: &Path, table: &MergedTable) -> Result<usize> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(merged_header(table))?;
    for row in &table.rows {
        writer.write_record(merged_record(table, row))?;
    }
    writer.flush()?;

    info!("Wrote {} merged rows to {}", table.rows.len(), path.display());
    metrics::output::rows_written("merged", table.rows.len());
    Ok(table.rows.len())
}

pub fn write_weekly(path: &Path, table: &MergedTable, rows: &[WeeklyRow]) -> Result<usize> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;

    let header: Vec<String> = ["gisaid_collect_weekstartdate", "gisaid_collect_yearweek", "gisaid_country"]
        .iter()
        .map(|c| c.to_string())
        .chain(table.lineage_columns.iter().cloned())
        .chain(table.who_columns.iter().cloned())
        .chain(
            [
                "owid_new_cases",
                "owid_new_people_vaccinated",
                "owid_new_people_fully_vaccinated",
                "owid_location",
                "owid_population",
                "who_region",
                "owid_continent",
                "sequences_over_cases",
                "cases_per_million",
            ]
            .iter()
            .map(|c| c.to_string()),
        )
        .collect();
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            date(row.collect_weekstartdate),
            row.collect_yearweek.clone(),
            row.country.clone(),
        ];
        record.extend(
            table
                .lineage_columns
                .iter()
                .map(|c| opt(row.lineage_counts.get(c))),
        );
        record.extend(table.who_columns.iter().map(|c| opt(row.who_counts.get(c))));
        record.extend([
            row.new_cases.to_string(),
            row.new_people_vaccinated.to_string(),
            row.new_people_fully_vaccinated.to_string(),
            opt(row.owid_location.as_deref()),
            opt(row.population),
            opt(row.who_region.as_deref()),
            opt(row.continent.as_deref()),
            opt(row.sequences_over_cases),
            opt(row.cases_per_million),
        ]);
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!("Wrote {} weekly rows to {}", rows.len(), path.display());
    metrics::output::rows_written("weekly", rows.len());
    Ok(rows.len())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    create_parent(path)?;
    let mut file = File::create(path)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.write_all(b"\n")?;
    Ok(())
}
