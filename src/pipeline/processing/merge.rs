use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::constants::ALL_LINEAGES;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::ingestion::external_series::{ExternalSeries, ExternalSeriesRecord};
use crate::pipeline::processing::enrich::{iso_yearweek, week_start};
use crate::pipeline::processing::lag_stats::LagStats;
use crate::pipeline::processing::lineage::{pivot, LineageCount, WhoCounts, WhoGrouping};

/// External series values carried on a final row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalFields {
    pub location: Option<String>,
    pub continent: Option<String>,
    pub population: Option<f64>,
    pub new_cases: Option<f64>,
    pub new_cases_smoothed: Option<f64>,
    pub new_people_vaccinated: Option<f64>,
    pub new_people_fully_vaccinated: Option<f64>,
    /// Bottom-up running totals, filled on rollup rows only
    pub people_vaccinated: Option<f64>,
    pub people_fully_vaccinated: Option<f64>,
    pub people_vaccinated_per_hundred: Option<f64>,
    pub people_fully_vaccinated_per_hundred: Option<f64>,
}

impl ExternalFields {
    fn attach_daily(&mut self, record: &ExternalSeriesRecord) {
        self.new_cases = record.new_cases;
        self.new_cases_smoothed = record.new_cases_smoothed;
        self.new_people_vaccinated = record.new_people_vaccinated;
        self.new_people_fully_vaccinated = record.new_people_fully_vaccinated;
    }
}

/// One row of the final table. Country rows carry `country`; rollup rows
/// carry `aggregate_location` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub collect_date: NaiveDate,
    pub collect_yearweek: String,
    pub collect_weekstartdate: NaiveDate,
    pub country: Option<String>,
    pub aggregate_location: Option<String>,
    pub lineage_counts: BTreeMap<String, u64>,
    pub who_counts: WhoCounts,
    /// External date; the collection date when the series has no row
    pub owid_date: NaiveDate,
    pub external: ExternalFields,
    pub who_region: Option<String>,
    pub lag: Option<LagStats>,
    pub sequences_over_cases: Option<f64>,
    pub cases_per_million: Option<f64>,
}

impl MergedRow {
    pub fn is_rollup(&self) -> bool {
        self.aggregate_location.is_some()
    }

    pub fn all_lineages(&self) -> Option<u64> {
        self.lineage_counts.get(ALL_LINEAGES).copied()
    }

    /// `sequences_over_cases` and `cases_per_million`; non-finite results are dropped
    pub fn compute_rates(&mut self) {
        let cases = self.external.new_cases;
        self.sequences_over_cases = match (self.all_lineages(), cases) {
            (Some(all), Some(cases)) => finite(all as f64 / cases),
            _ => None,
        };
        self.cases_per_million = match (cases, self.external.population) {
            (Some(cases), Some(population)) => finite(cases / (population / 1e6)),
            _ => None,
        };
    }
}

pub(crate) fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// The merged table and the dynamic column sets it carries
#[derive(Debug, Clone, Default)]
pub struct MergedTable {
    pub lineage_columns: Vec<String>,
    pub who_columns: Vec<String>,
    pub rows: Vec<MergedRow>,
}

impl MergedTable {
    pub fn country_rows(&self) -> impl Iterator<Item = &MergedRow> {
        self.rows.iter().filter(|r| !r.is_rollup())
    }
}

/// Outer-join the lineage counts with the external series on
/// (date, country) = (date, location), pivot to one row per key and attach
/// the external fields.
pub fn merge_with_external(counts: Vec<LineageCount>, series: &ExternalSeries) -> Result<MergedTable> {
    let index = series.index_by_date_location()?;
    let profiles = series.location_profiles();

    let external_only: Vec<(NaiveDate, String)> = {
        let lineage_keys: BTreeSet<(NaiveDate, &str)> = counts
            .iter()
            .map(|c| (c.collect_date, c.country.as_str()))
            .collect();
        debug!("Join: {} lineage keys", lineage_keys.len());
        series
            .records()
            .iter()
            .filter(|r| !lineage_keys.contains(&(r.date, r.location.as_str())))
            .map(|r| (r.date, r.location.clone()))
            .collect()
    };

    let wide = pivot(
        counts
            .into_iter()
            .map(|c| (c.collect_date, c.country, Some(c.bucket), c.count))
            .chain(external_only.into_iter().map(|(date, location)| (date, location, None, 0))),
    );
    let grouping = WhoGrouping::resolve(&wide.lineage_columns);

    let mut rows: Vec<MergedRow> = wide
        .rows
        .into_iter()
        .map(|row| {
            let mut external = ExternalFields::default();
            if let Some(profile) = profiles.get(&row.country) {
                external.location = Some(row.country.clone());
                external.continent = profile.continent.clone();
                external.population = profile.population;
            }
            if let Some(&i) = index.get(&(row.collect_date, row.country.as_str())) {
                external.attach_daily(&series.records()[i]);
            }

            MergedRow {
                collect_yearweek: iso_yearweek(row.collect_date),
                collect_weekstartdate: week_start(row.collect_date),
                who_counts: grouping.label_counts(&row.counts),
                owid_date: row.collect_date,
                collect_date: row.collect_date,
                country: Some(row.country),
                aggregate_location: None,
                lineage_counts: row.counts,
                external,
                who_region: None,
                lag: None,
                sequences_over_cases: None,
                cases_per_million: None,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.owid_date
            .cmp(&b.owid_date)
            .then_with(|| match (&a.external.location, &b.external.location) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.country.cmp(&b.country))
    });

    report_unmatched_countries(&rows);
    metrics::aggregation::merged_rows(rows.len());

    Ok(MergedTable {
        lineage_columns: wide.lineage_columns,
        who_columns: grouping.column_names(),
        rows,
    })
}

/// Countries with sequences but no external-series location
fn report_unmatched_countries(rows: &[MergedRow]) {
    let mut unmatched: BTreeMap<&str, u64> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.external.location.is_none()) {
        if let Some(country) = row.country.as_deref() {
            *unmatched.entry(country).or_default() += row.all_lineages().unwrap_or(0);
        }
    }
    for (country, sequences) in unmatched {
        warn!(
            "No external series for '{}' ({} sequences left without case data)",
            country, sequences
        );
    }
}

pub fn apply_derived_rates(rows: &mut [MergedRow]) {
    rows.iter_mut().for_each(MergedRow::compute_rates);
}
