use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::constants::ALL_LINEAGES;
use crate::pipeline::processing::lineage::WhoCounts;
use crate::pipeline::processing::merge::{finite, MergedRow, MergedTable};

/// Per-country weekly totals
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyRow {
    pub collect_weekstartdate: NaiveDate,
    pub collect_yearweek: String,
    pub country: String,
    pub lineage_counts: BTreeMap<String, u64>,
    pub who_counts: WhoCounts,
    pub new_cases: f64,
    pub new_people_vaccinated: f64,
    pub new_people_fully_vaccinated: f64,
    pub owid_location: Option<String>,
    pub population: Option<f64>,
    pub who_region: Option<String>,
    pub continent: Option<String>,
    pub sequences_over_cases: Option<f64>,
    pub cases_per_million: Option<f64>,
}

/// Sum country rows by (week start, week, country). Location attributes are
/// re-attached per country rather than summed; lag statistics are dropped
/// and the rates recomputed from the weekly totals.
pub fn aggregate_weekly(table: &MergedTable) -> Vec<WeeklyRow> {
    let mut weeks: BTreeMap<(NaiveDate, String, String), WeeklyRow> = BTreeMap::new();

    for row in table.country_rows() {
        let Some(country) = row.country.clone() else {
            continue;
        };
        let key = (row.collect_weekstartdate, row.collect_yearweek.clone(), country);
        let week = weeks.entry(key).or_insert_with_key(|(start, yearweek, country)| {
            empty_week(*start, yearweek, country, row)
        });
        add_row(week, row);
    }

    let mut rows: Vec<WeeklyRow> = weeks.into_values().collect();
    for week in &mut rows {
        let all = week.lineage_counts.get(ALL_LINEAGES).copied();
        week.sequences_over_cases = all.and_then(|n| finite(n as f64 / week.new_cases));
        week.cases_per_million = week
            .population
            .and_then(|p| finite(week.new_cases / (p / 1e6)));
    }
    debug!("Weekly aggregation: {} rows", rows.len());
    rows
}

fn empty_week(start: NaiveDate, yearweek: &str, country: &str, template: &MergedRow) -> WeeklyRow {
    WeeklyRow {
        collect_weekstartdate: start,
        collect_yearweek: yearweek.to_string(),
        country: country.to_string(),
        lineage_counts: BTreeMap::new(),
        who_counts: WhoCounts {
            labels: BTreeMap::new(),
            who_other: Some(0),
        },
        new_cases: 0.0,
        new_people_vaccinated: 0.0,
        new_people_fully_vaccinated: 0.0,
        owid_location: template.external.location.clone(),
        population: template.external.population,
        who_region: template.who_region.clone(),
        continent: template.external.continent.clone(),
        sequences_over_cases: None,
        cases_per_million: None,
    }
}

fn add_row(week: &mut WeeklyRow, row: &MergedRow) {
    for (column, n) in &row.lineage_counts {
        *week.lineage_counts.entry(column.clone()).or_default() += n;
    }
    for (label, n) in &row.who_counts.labels {
        *week.who_counts.labels.entry(label.clone()).or_default() += n;
    }
    if let (Some(sum), Some(n)) = (week.who_counts.who_other.as_mut(), row.who_counts.who_other) {
        *sum += n;
    }
    week.new_cases += row.external.new_cases.unwrap_or(0.0);
    week.new_people_vaccinated += row.external.new_people_vaccinated.unwrap_or(0.0);
    week.new_people_fully_vaccinated += row.external.new_people_fully_vaccinated.unwrap_or(0.0);
}
