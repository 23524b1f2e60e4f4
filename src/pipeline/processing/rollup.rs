//! Continent, WHO-region and global rollups of the country rows.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::constants::{GLOBAL_LOCATION, WHO_OTHER, WHO_REGION_PREFIX};
use crate::observability::metrics;
use crate::pipeline::ingestion::external_series::{LocationProfile, RegionalVaccination};
use crate::pipeline::ingestion::regions::RegionTable;
use crate::pipeline::processing::enrich::AnnotatedRecord;
use crate::pipeline::processing::lag_stats::{lag_stats_by, LagStats};
use crate::pipeline::processing::lineage::WhoCounts;
use crate::pipeline::processing::merge::{finite, ExternalFields, MergedRow, MergedTable};

/// Rollup level a row or record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RollupLevel {
    Continent,
    WhoRegion,
    Global,
}

impl RollupLevel {
    pub const ALL: [RollupLevel; 3] = [RollupLevel::Continent, RollupLevel::WhoRegion, RollupLevel::Global];

    /// `aggregate_location` label for a group at this level
    pub fn label(&self, group: &str) -> String {
        match self {
            RollupLevel::Continent => group.to_string(),
            RollupLevel::WhoRegion => format!("{}{}", WHO_REGION_PREFIX, group),
            RollupLevel::Global => GLOBAL_LOCATION.to_string(),
        }
    }
}

/// WHO region of every country row, looked up by its external location
pub fn add_region_labels(table: &mut MergedTable, regions: &RegionTable) {
    for row in table.rows.iter_mut().filter(|r| !r.is_rollup()) {
        row.who_region = row
            .external
            .location
            .as_deref()
            .and_then(|location| regions.who_region(location))
            .map(str::to_string);
    }
}

type RollupKey = (NaiveDate, String, NaiveDate, NaiveDate, String);

/// Group key of a country row at `level`; `None` when the row has no
/// continent (or WHO region) and so stays out of that rollup.
fn rollup_key(row: &MergedRow, level: RollupLevel) -> Option<RollupKey> {
    let group = match level {
        RollupLevel::Continent => row.external.continent.clone()?,
        RollupLevel::WhoRegion => row.who_region.clone()?,
        RollupLevel::Global => String::new(),
    };
    Some((
        row.collect_date,
        row.collect_yearweek.clone(),
        row.collect_weekstartdate,
        row.owid_date,
        group,
    ))
}

/// Sum the country rows per continent, WHO region and globally and append
/// the rollup rows beneath them. Absent values sum as 0.
pub fn append_rollups(table: &mut MergedTable) {
    let mut rollups = Vec::new();
    for level in RollupLevel::ALL {
        let mut groups: BTreeMap<RollupKey, MergedRow> = BTreeMap::new();
        for row in table.rows.iter().filter(|r| !r.is_rollup()) {
            let Some(key) = rollup_key(row, level) else {
                continue;
            };
            let label = level.label(&key.4);
            let total = groups
                .entry(key)
                .or_insert_with(|| empty_rollup_row(row, level, label, table));
            accumulate(total, row);
        }
        debug!("{:?} rollup: {} rows", level, groups.len());
        rollups.extend(groups.into_values());
    }

    metrics::aggregation::rollup_rows(rollups.len());
    table.rows.extend(rollups);
}

fn empty_rollup_row(
    template: &MergedRow,
    level: RollupLevel,
    label: String,
    table: &MergedTable,
) -> MergedRow {
    let lineage_counts = table.lineage_columns.iter().map(|c| (c.clone(), 0)).collect();
    let who_counts = WhoCounts {
        labels: table
            .who_columns
            .iter()
            .filter(|c| c.as_str() != WHO_OTHER)
            .map(|c| (c.clone(), 0))
            .collect(),
        who_other: Some(0),
    };
    let external = ExternalFields {
        continent: match level {
            RollupLevel::Continent => template.external.continent.clone(),
            _ => None,
        },
        population: Some(0.0),
        new_cases: Some(0.0),
        new_cases_smoothed: Some(0.0),
        new_people_vaccinated: Some(0.0),
        new_people_fully_vaccinated: Some(0.0),
        ..ExternalFields::default()
    };
    MergedRow {
        collect_date: template.collect_date,
        collect_yearweek: template.collect_yearweek.clone(),
        collect_weekstartdate: template.collect_weekstartdate,
        country: None,
        aggregate_location: Some(label),
        lineage_counts,
        who_counts,
        owid_date: template.owid_date,
        external,
        who_region: match level {
            RollupLevel::WhoRegion => template.who_region.clone(),
            _ => None,
        },
        lag: None,
        sequences_over_cases: None,
        cases_per_million: None,
    }
}

fn accumulate(total: &mut MergedRow, row: &MergedRow) {
    for (column, n) in &row.lineage_counts {
        *total.lineage_counts.entry(column.clone()).or_default() += n;
    }
    for (label, n) in &row.who_counts.labels {
        *total.who_counts.labels.entry(label.clone()).or_default() += n;
    }
    if let (Some(sum), Some(n)) = (total.who_counts.who_other.as_mut(), row.who_counts.who_other) {
        *sum += n;
    }

    let add = |sum: &mut Option<f64>, value: Option<f64>| {
        if let (Some(s), Some(v)) = (sum.as_mut(), value) {
            *s += v;
        }
    };
    let ext = &row.external;
    add(&mut total.external.population, ext.population);
    add(&mut total.external.new_cases, ext.new_cases);
    add(&mut total.external.new_cases_smoothed, ext.new_cases_smoothed);
    add(&mut total.external.new_people_vaccinated, ext.new_people_vaccinated);
    add(&mut total.external.new_people_fully_vaccinated, ext.new_people_fully_vaccinated);
}

/// Lag statistics at every level, keyed the same way as the rows they land on
#[derive(Debug, Default)]
pub struct LagStatsIndex {
    by_country: BTreeMap<(NaiveDate, String), LagStats>,
    by_aggregate: BTreeMap<(NaiveDate, String), LagStats>,
}

impl LagStatsIndex {
    /// Country stats per (date, country); rollup stats per (date, label)
    /// using each record's country → continent and country → WHO region.
    /// A country enters a continent or WHO-region group only when it has an
    /// external location, matching how the rollup rows themselves are built.
    pub fn compute(
        records: &[AnnotatedRecord],
        profiles: &BTreeMap<String, LocationProfile>,
        regions: &RegionTable,
    ) -> Self {
        let by_country = lag_stats_by(records, |r| Some((r.collect_date?, r.country.clone())));

        let mut by_aggregate = BTreeMap::new();
        for level in RollupLevel::ALL {
            let stats = lag_stats_by(records, |r| {
                let group = match level {
                    RollupLevel::Continent => profiles.get(&r.country)?.continent.clone()?,
                    RollupLevel::WhoRegion => {
                        profiles.get(&r.country)?;
                        regions.who_region(&r.country)?.to_string()
                    }
                    RollupLevel::Global => String::new(),
                };
                Some((r.collect_date?, level.label(&group)))
            });
            by_aggregate.extend(stats);
        }

        Self { by_country, by_aggregate }
    }

    pub fn attach(&self, rows: &mut [MergedRow]) {
        for row in rows {
            let stats = match (&row.aggregate_location, &row.country) {
                (Some(label), _) => self.by_aggregate.get(&(row.collect_date, label.clone())),
                (None, Some(country)) => self.by_country.get(&(row.collect_date, country.clone())),
                (None, None) => None,
            };
            row.lag = stats.cloned();
        }
    }
}

/// Running totals of the daily vaccination deltas per aggregate location,
/// and the per-hundred shares derived from them.
pub fn compute_vaccination_bottom_up(rows: &mut [MergedRow]) {
    let mut by_location: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        if let Some(location) = &row.aggregate_location {
            by_location.entry(location.clone()).or_default().push(i);
        }
    }

    for indices in by_location.into_values() {
        let mut ordered = indices;
        ordered.sort_by_key(|&i| rows[i].owid_date);
        let (mut vaccinated, mut fully) = (0.0, 0.0);
        for i in ordered {
            let ext = &mut rows[i].external;
            vaccinated += ext.new_people_vaccinated.unwrap_or(0.0);
            fully += ext.new_people_fully_vaccinated.unwrap_or(0.0);
            ext.people_vaccinated = Some(vaccinated);
            ext.people_fully_vaccinated = Some(fully);
            ext.people_vaccinated_per_hundred = per_hundred(vaccinated, ext.population);
            ext.people_fully_vaccinated_per_hundred = per_hundred(fully, ext.population);
        }
    }
}

/// Replace the bottom-up per-hundred shares of every rollup row that has a
/// published regional series with the published value for its collection
/// week. Weeks without a published value are left empty.
pub fn overwrite_regional_vaccination(rows: &mut [MergedRow], published: &RegionalVaccination) {
    if published.is_empty() {
        return;
    }
    let mut overwritten = 0;
    for row in rows.iter_mut() {
        let Some(location) = &row.aggregate_location else {
            continue;
        };
        if !published.covers(location) {
            continue;
        }
        let (vaccinated, fully) = published
            .week(location, row.collect_weekstartdate)
            .unwrap_or((None, None));
        row.external.people_vaccinated_per_hundred = vaccinated;
        row.external.people_fully_vaccinated_per_hundred = fully;
        overwritten += 1;
    }
    debug!("Published regional vaccination shares on {} rollup rows", overwritten);
}

fn per_hundred(count: f64, population: Option<f64>) -> Option<f64> {
    let share = finite(count / (population? / 100.0))?;
    Some((share * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingestion::external_series::ExternalSeries;
    use crate::pipeline::ingestion::metadata::SequenceRecord;
    use crate::pipeline::processing::enrich::{iso_yearweek, week_start, Annotator, DefaultAnnotator};
    use crate::pipeline::processing::quality_gate::{ClassifiedRecord, QualityFlags};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn country_row(d: &str, country: &str, continent: Option<&str>, all: u64, cases: Option<f64>) -> MergedRow {
        let collect_date = date(d);
        MergedRow {
            collect_date,
            collect_yearweek: iso_yearweek(collect_date),
            collect_weekstartdate: week_start(collect_date),
            country: Some(country.to_string()),
            aggregate_location: None,
            lineage_counts: BTreeMap::from([
                ("All lineages".to_string(), all),
                ("Other lineages".to_string(), all),
            ]),
            who_counts: WhoCounts {
                labels: BTreeMap::from([("who_delta".to_string(), 0)]),
                who_other: Some(all as i64),
            },
            owid_date: collect_date,
            external: ExternalFields {
                location: continent.map(|_| country.to_string()),
                continent: continent.map(str::to_string),
                population: Some(1_000_000.0),
                new_cases: cases,
                new_people_vaccinated: Some(1000.0),
                ..ExternalFields::default()
            },
            who_region: None,
            lag: None,
            sequences_over_cases: None,
            cases_per_million: None,
        }
    }

    fn table(rows: Vec<MergedRow>) -> MergedTable {
        MergedTable {
            lineage_columns: vec!["All lineages".to_string(), "B.1.617.2".to_string(), "Other lineages".to_string()],
            who_columns: vec!["who_delta".to_string(), "who_other".to_string()],
            rows,
        }
    }

    #[test]
    fn test_rollups_sum_country_rows() {
        let mut t = table(vec![
            country_row("2021-06-01", "France", Some("Europe"), 3, Some(10.0)),
            country_row("2021-06-01", "Spain", Some("Europe"), 4, None),
            country_row("2021-06-01", "Atlantis", None, 5, Some(1.0)),
        ]);
        let regions: RegionTable = [("France".to_string(), "Europe".to_string())].into_iter().collect();
        add_region_labels(&mut t, &regions);
        append_rollups(&mut t);

        let find = |label: &str| {
            t.rows
                .iter()
                .find(|r| r.aggregate_location.as_deref() == Some(label))
                .unwrap()
        };

        let europe = find("Europe");
        assert_eq!(europe.all_lineages(), Some(7));
        assert_eq!(europe.lineage_counts.get("B.1.617.2"), Some(&0));
        assert_eq!(europe.external.new_cases, Some(10.0));
        assert_eq!(europe.external.population, Some(2_000_000.0));
        assert_eq!(europe.country, None);

        let who = find("WHO Region: Europe");
        assert_eq!(who.all_lineages(), Some(3));
        assert_eq!(who.who_region.as_deref(), Some("Europe"));

        let global = find("Global");
        assert_eq!(global.all_lineages(), Some(12));
        assert_eq!(global.who_counts.who_other, Some(12));
        assert_eq!(t.rows.len(), 6);
        assert!(t.rows[..3].iter().all(|r| !r.is_rollup()));
    }

    #[test]
    fn test_continent_rows_match_country_sums_per_date() {
        let mut t = table(vec![
            country_row("2021-06-01", "France", Some("Europe"), 3, None),
            country_row("2021-06-02", "France", Some("Europe"), 1, None),
            country_row("2021-06-02", "Italy", Some("Europe"), 6, None),
        ]);
        append_rollups(&mut t);

        for rollup in t.rows.iter().filter(|r| r.aggregate_location.as_deref() == Some("Europe")) {
            let expected: u64 = t
                .rows
                .iter()
                .filter(|r| !r.is_rollup() && r.collect_date == rollup.collect_date)
                .filter_map(|r| r.all_lineages())
                .sum();
            assert_eq!(rollup.all_lineages(), Some(expected));
        }
    }

    #[test]
    fn test_vaccination_running_totals() {
        let mut t = table(vec![
            country_row("2021-06-02", "France", Some("Europe"), 1, None),
            country_row("2021-06-01", "France", Some("Europe"), 1, None),
        ]);
        append_rollups(&mut t);
        compute_vaccination_bottom_up(&mut t.rows);

        let mut europe: Vec<&MergedRow> = t
            .rows
            .iter()
            .filter(|r| r.aggregate_location.as_deref() == Some("Europe"))
            .collect();
        europe.sort_by_key(|r| r.owid_date);
        assert_eq!(europe[0].external.people_vaccinated, Some(1000.0));
        assert_eq!(europe[1].external.people_vaccinated, Some(2000.0));
        assert_eq!(europe[1].external.people_vaccinated_per_hundred, Some(0.2));

        let france = t.rows.iter().find(|r| !r.is_rollup()).unwrap();
        assert_eq!(france.external.people_vaccinated, None);
    }

    fn annotated(country: &str, collected: &str, lag: i64) -> AnnotatedRecord {
        let submitted = date(collected) + chrono::Duration::days(lag);
        DefaultAnnotator::new().annotate(ClassifiedRecord {
            record: SequenceRecord {
                accession_id: Some("EPI_ISL_1".to_string()),
                virus_name: format!("hCoV-19/{country}/1/2021"),
                collection_date: collected.to_string(),
                submission_date: submitted.to_string(),
                location: format!("Europe / {country}"),
                sequence_length: Some(29000),
                host: "Human".to_string(),
                pango_lineage: Some("B.1.617.2".to_string()),
                n_content: None,
                gc_content: Some(0.38),
            },
            flags: QualityFlags::new(false, false, false, false),
        })
    }

    #[test]
    fn test_lag_stats_are_recomputed_per_rollup_level() {
        let d = "2021-06-01";
        let records = vec![
            annotated("France", d, 1),
            annotated("France", d, 2),
            annotated("France", d, 3),
            annotated("Italy", d, 100),
            // in the region table but without an external series
            annotated("Kosovo", d, 500),
            annotated("Kosovo", d, 600),
            annotated("Atlantis", d, 7),
        ];
        let europe = LocationProfile {
            continent: Some("Europe".to_string()),
            population: Some(1_000_000.0),
        };
        let profiles = BTreeMap::from([
            ("France".to_string(), europe.clone()),
            ("Italy".to_string(), europe),
        ]);
        let regions: RegionTable = ["France", "Italy", "Kosovo"]
            .into_iter()
            .map(|c| (c.to_string(), "Europe".to_string()))
            .collect();

        let mut t = table(vec![
            country_row(d, "France", Some("Europe"), 3, None),
            country_row(d, "Italy", Some("Europe"), 1, None),
            country_row(d, "Kosovo", None, 2, None),
            country_row(d, "Atlantis", None, 1, None),
        ]);
        add_region_labels(&mut t, &regions);
        append_rollups(&mut t);
        LagStatsIndex::compute(&records, &profiles, &regions).attach(&mut t.rows);

        let row = |label: &str| {
            t.rows
                .iter()
                .find(|r| r.aggregate_location.as_deref() == Some(label))
                .unwrap()
        };

        let france = t.rows.iter().find(|r| r.country.as_deref() == Some("France")).unwrap();
        assert_eq!(france.lag.as_ref().unwrap().median, Some(2.0));

        // median of the pooled lags, not of the country medians (2 and 100)
        let continent = row("Europe").lag.clone().unwrap();
        assert_eq!(continent.seq_count, 4);
        assert_eq!(continent.median, Some(2.5));
        assert_eq!(continent.max, Some(100));

        let who = row("WHO Region: Europe");
        let who_lag = who.lag.clone().unwrap();
        assert_eq!(Some(who_lag.seq_count), who.all_lineages());
        assert_eq!(who_lag.median, Some(2.5));
        assert_eq!(who_lag.max, Some(100));

        let global = row("Global");
        let global_lag = global.lag.clone().unwrap();
        assert_eq!(global_lag.seq_count, 7);
        assert_eq!(Some(global_lag.seq_count), global.all_lineages());
        assert_eq!(global_lag.median, Some(7.0));
        assert_eq!(global_lag.max, Some(600));
    }

    #[test]
    fn test_published_regional_shares_replace_bottom_up_values() {
        let series = ExternalSeries::parse_csv(
            "iso_code,continent,location,date,people_vaccinated_per_hundred,people_fully_vaccinated_per_hundred\n\
             OWID_EUR,,Europe,2021-06-06,40.5,20.25\n\
             OWID_WRL,,World,2021-06-13,11.0,6.0\n",
        )
        .unwrap();

        let mut t = table(vec![
            country_row("2021-06-01", "France", Some("Europe"), 1, None),
            country_row("2021-06-01", "Canada", Some("North America"), 1, None),
        ]);
        append_rollups(&mut t);
        compute_vaccination_bottom_up(&mut t.rows);
        overwrite_regional_vaccination(&mut t.rows, series.regional_vaccination());

        let ext = |label: &str| {
            &t.rows
                .iter()
                .find(|r| r.aggregate_location.as_deref() == Some(label))
                .unwrap()
                .external
        };
        assert_eq!(ext("Europe").people_vaccinated_per_hundred, Some(40.5));
        assert_eq!(ext("Europe").people_fully_vaccinated_per_hundred, Some(20.25));
        // bottom-up totals themselves are kept
        assert_eq!(ext("Europe").people_vaccinated, Some(1000.0));
        // no published value for this week
        assert_eq!(ext("Global").people_vaccinated_per_hundred, None);
        // no published series at all
        assert_eq!(ext("North America").people_vaccinated_per_hundred, Some(0.1));

        let france = t.rows.iter().find(|r| !r.is_rollup()).unwrap();
        assert_eq!(france.external.people_vaccinated_per_hundred, None);
    }

    #[test]
    fn test_per_hundred_rounding_and_zero_population() {
        assert_eq!(per_hundred(1234.0, Some(1_000_000.0)), Some(0.12));
        assert_eq!(per_hundred(1.0, Some(0.0)), None);
        assert_eq!(per_hundred(1.0, None), None);
    }
}
