//! Lineage bucketing, per-location counts and the long → wide pivot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::constants::{
    lineage_alias, tracked_lineages, ALL_LINEAGES, GREEK_LINEAGES, OTHER_LINEAGES, WHO_OTHER,
};
use crate::observability::metrics;
use crate::pipeline::processing::enrich::AnnotatedRecord;

/// `X*` matches any candidate whose first `len(X*) - 1` characters equal `X`.
/// Patterns without a trailing `*` match only themselves.
pub fn wildcard_matches(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => {
            let prefix = prefix.replace('*', "");
            let width = pattern.chars().count() - 1;
            candidate.chars().take(width).eq(prefix.chars())
        }
        None => pattern == candidate,
    }
}

/// Result of resolving curated lineage entries against the observed ones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineageMatch {
    /// Observed lineages covered by a curated literal or wildcard
    pub matched: BTreeSet<String>,
    /// Curated literals that never occur in the observed set
    pub not_found: Vec<String>,
}

/// Curated literals present in `observed`, plus every observed lineage
/// matched by a curated wildcard.
pub fn find_lineages<'a, I>(curated: &[&str], observed: I) -> LineageMatch
where
    I: IntoIterator<Item = &'a str>,
{
    let observed: BTreeSet<&str> = observed.into_iter().collect();
    let mut result = LineageMatch::default();

    for entry in curated {
        if entry.ends_with('*') {
            result.matched.extend(
                observed
                    .iter()
                    .filter(|candidate| wildcard_matches(entry, candidate))
                    .map(|c| c.to_string()),
            );
        } else if observed.contains(entry) {
            result.matched.insert(entry.to_string());
        } else {
            result.not_found.push(entry.to_string());
        }
    }
    result
}

/// Column a record is counted under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LineageBucket {
    /// Full-group total, computed in its own pass
    All,
    /// Curated literal, wildcard match or alias
    Lineage(String),
    Other,
}

impl LineageBucket {
    pub fn column_name(&self) -> &str {
        match self {
            LineageBucket::All => ALL_LINEAGES,
            LineageBucket::Lineage(name) => name,
            LineageBucket::Other => OTHER_LINEAGES,
        }
    }
}

impl fmt::Display for LineageBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Count of records for one date × week × country × bucket
#[derive(Debug, Clone, PartialEq)]
pub struct LineageCount {
    pub collect_date: NaiveDate,
    pub collect_yearweek: String,
    pub collect_weekstartdate: NaiveDate,
    pub country: String,
    pub bucket: LineageBucket,
    pub count: u64,
}

type GroupKey = (NaiveDate, String, NaiveDate, String);

/// Two passes over the annotated records: per-bucket counts for records
/// with a lineage, then `All lineages` over every record of the group.
/// Only records with a non-empty accession id are counted; records with no
/// usable collection date are left out.
pub fn aggregate_by_lineage(records: &[AnnotatedRecord]) -> Vec<LineageCount> {
    let curated = tracked_lineages();
    let keys = find_lineages(&curated, records.iter().filter_map(|r| r.lineage()));
    if !keys.not_found.is_empty() {
        warn!(
            "Curated lineages not present in metadata: {}",
            keys.not_found.join(", ")
        );
    }
    debug!("{} observed lineages get their own column", keys.matched.len());

    let mut buckets: BTreeMap<(GroupKey, LineageBucket), u64> = BTreeMap::new();
    let mut totals: BTreeMap<GroupKey, u64> = BTreeMap::new();

    for record in records {
        let Some(key) = group_key(record) else {
            continue;
        };
        let counted = u64::from(record.has_accession_id());

        if let Some(lineage) = record.lineage() {
            let bucket = bucket_for(lineage, &keys.matched);
            *buckets.entry((key.clone(), bucket)).or_default() += counted;
        }
        *totals.entry(key).or_default() += counted;
    }

    let counts: Vec<LineageCount> = buckets
        .into_iter()
        .chain(totals.into_iter().map(|(key, n)| ((key, LineageBucket::All), n)))
        .map(|((key, bucket), count)| LineageCount {
            collect_date: key.0,
            collect_yearweek: key.1,
            collect_weekstartdate: key.2,
            country: key.3,
            bucket,
            count,
        })
        .collect();

    metrics::aggregation::lineage_rows(counts.len());
    counts
}

fn group_key(record: &AnnotatedRecord) -> Option<GroupKey> {
    Some((
        record.collect_date?,
        record.collect_yearweek.clone()?,
        record.collect_weekstartdate?,
        record.country.clone(),
    ))
}

fn bucket_for(lineage: &str, matched: &BTreeSet<String>) -> LineageBucket {
    if !matched.contains(lineage) {
        return LineageBucket::Other;
    }
    let name = lineage_alias(lineage).unwrap_or(lineage);
    LineageBucket::Lineage(name.to_string())
}

/// One (date, country) row of the pivot. A missing entry means the bucket
/// never occurred for that row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideRow {
    pub collect_date: NaiveDate,
    pub country: String,
    pub counts: BTreeMap<String, u64>,
}

impl WideRow {
    pub fn count(&self, column: &str) -> Option<u64> {
        self.counts.get(column).copied()
    }
}

/// Wide lineage table: one row per (date, country)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideTable {
    /// `All lineages`, dotted bucket columns sorted, `Other lineages`
    pub lineage_columns: Vec<String>,
    pub rows: Vec<WideRow>,
}

/// Pivot long counts into wide rows. Entries whose bucket is `None` come
/// from the external series only; they produce a row with every bucket absent.
pub fn pivot<I>(entries: I) -> WideTable
where
    I: IntoIterator<Item = (NaiveDate, String, Option<LineageBucket>, u64)>,
{
    let mut rows: BTreeMap<(NaiveDate, String), BTreeMap<String, u64>> = BTreeMap::new();
    let mut dotted: BTreeSet<String> = BTreeSet::new();

    for (date, country, bucket, count) in entries {
        let counts = rows.entry((date, country)).or_default();
        let Some(bucket) = bucket else {
            continue;
        };
        let column = bucket.column_name().to_string();
        if matches!(bucket, LineageBucket::Lineage(_)) {
            if !column.contains('.') {
                continue;
            }
            dotted.insert(column.clone());
        }
        *counts.entry(column).or_default() += count;
    }

    let lineage_columns = std::iter::once(ALL_LINEAGES.to_string())
        .chain(dotted)
        .chain(std::iter::once(OTHER_LINEAGES.to_string()))
        .collect();

    WideTable {
        lineage_columns,
        rows: rows
            .into_iter()
            .map(|((collect_date, country), counts)| WideRow {
                collect_date,
                country,
                counts,
            })
            .collect(),
    }
}

/// WHO grouping columns resolved against the pivot's bucket columns
#[derive(Debug, Clone, PartialEq)]
pub struct WhoGrouping {
    /// Label and the bucket columns it sums, in curated order
    pub groups: Vec<(String, Vec<String>)>,
    /// Union of every column matched by any label
    pub matched: BTreeSet<String>,
}

impl WhoGrouping {
    pub fn resolve(lineage_columns: &[String]) -> Self {
        let available = || lineage_columns.iter().map(String::as_str);
        let mut matched = BTreeSet::new();
        let groups = GREEK_LINEAGES
            .iter()
            .map(|(label, codes)| {
                let found = find_lineages(codes, available());
                matched.extend(found.matched.iter().cloned());
                debug!("{} groups {:?}", label, found.matched);
                (label.to_string(), found.matched.into_iter().collect())
            })
            .collect();
        Self { groups, matched }
    }

    /// Label column names, then `who_other`
    pub fn column_names(&self) -> Vec<String> {
        self.groups
            .iter()
            .map(|(label, _)| label.clone())
            .chain(std::iter::once(WHO_OTHER.to_string()))
            .collect()
    }

    /// Sum the matched bucket columns per label (absent counts as 0)
    pub fn label_counts(&self, counts: &BTreeMap<String, u64>) -> WhoCounts {
        let labels = self
            .groups
            .iter()
            .map(|(label, columns)| (label.clone(), sum_columns(counts, columns)))
            .collect();
        let who_other = counts
            .get(ALL_LINEAGES)
            .map(|&all| all as i64 - sum_columns(counts, &self.matched));
        WhoCounts { labels, who_other }
    }
}

fn sum_columns<'a>(
    counts: &BTreeMap<String, u64>,
    columns: impl IntoIterator<Item = &'a String>,
) -> i64 {
    columns
        .into_iter()
        .filter_map(|c| counts.get(c))
        .map(|&n| n as i64)
        .sum()
}

/// Per-row WHO label sums
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhoCounts {
    pub labels: BTreeMap<String, i64>,
    /// Absent when `All lineages` is absent
    pub who_other: Option<i64>,
}

impl WhoCounts {
    pub fn get(&self, label: &str) -> Option<i64> {
        if label == WHO_OTHER {
            return self.who_other;
        }
        self.labels.get(label).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingestion::metadata::SequenceRecord;
    use crate::pipeline::processing::enrich::{iso_yearweek, week_start};
    use crate::pipeline::processing::quality_gate::QualityFlags;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn annotated(country: &str, collected: &str, lineage: Option<&str>) -> AnnotatedRecord {
        let collect_date = NaiveDate::parse_from_str(collected, "%Y-%m-%d").ok();
        AnnotatedRecord {
            record: SequenceRecord {
                accession_id: Some("EPI_ISL_1".to_string()),
                virus_name: "hCoV-19/X/1/2021".to_string(),
                collection_date: collected.to_string(),
                submission_date: "2021-07-01".to_string(),
                location: format!("Somewhere / {country}"),
                sequence_length: Some(29_000),
                host: "Human".to_string(),
                pango_lineage: lineage.map(str::to_string),
                n_content: None,
                gc_content: Some(0.38),
            },
            flags: QualityFlags::default(),
            region: "Somewhere".to_string(),
            country: country.to_string(),
            division: String::new(),
            collect_date,
            submit_date: Some(date("2021-07-01")),
            collect_yearweek: collect_date.map(iso_yearweek),
            collect_weekstartdate: collect_date.map(week_start),
            submit_yearweek: None,
            submit_weekstartdate: None,
            lag_days: None,
        }
    }

    fn counts_for(counts: &[LineageCount], bucket: &LineageBucket) -> u64 {
        counts
            .iter()
            .filter(|c| &c.bucket == bucket)
            .map(|c| c.count)
            .sum()
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(wildcard_matches("AY.*", "AY.4.2"));
        assert!(wildcard_matches("AY.*", "AY.1"));
        assert!(!wildcard_matches("AY.*", "AZ.1"));
        assert!(!wildcard_matches("AY.*", "AY"));
        assert!(!wildcard_matches("P.1.*", "P.1"));
        assert!(wildcard_matches("P.1", "P.1"));
        assert!(!wildcard_matches("P.1", "P.1.2"));
    }

    #[test]
    fn test_find_lineages_reports_missing_literals() {
        let found = find_lineages(&["B.1.1.7", "AY.*", "P.1"], ["AY.4", "B.1.1.7", "B.1.2"]);
        assert_eq!(
            found.matched,
            BTreeSet::from(["AY.4".to_string(), "B.1.1.7".to_string()])
        );
        assert_eq!(found.not_found, vec!["P.1".to_string()]);
    }

    #[test]
    fn test_aggregate_buckets_and_totals() {
        let records = vec![
            annotated("France", "2021-06-01", Some("B.1.617.2")),
            annotated("France", "2021-06-01", Some("AY.4")),
            annotated("France", "2021-06-01", Some("B.1.2")),
            annotated("France", "2021-06-01", Some("B.1.429")),
            annotated("France", "2021-06-01", None),
            annotated("France", "unknown", Some("AY.4")),
        ];
        let counts = aggregate_by_lineage(&records);

        assert_eq!(counts_for(&counts, &LineageBucket::All), 5);
        assert_eq!(counts_for(&counts, &LineageBucket::Other), 1);
        assert_eq!(counts_for(&counts, &LineageBucket::Lineage("AY.4".into())), 1);
        assert_eq!(
            counts_for(&counts, &LineageBucket::Lineage("B.1.427/429".into())),
            1
        );
        assert_eq!(counts_for(&counts, &LineageBucket::Lineage("B.1.429".into())), 0);
    }

    #[test]
    fn test_records_without_accession_are_not_counted() {
        let mut record = annotated("France", "2021-06-01", Some("AY.4"));
        record.record.accession_id = None;
        let counts = aggregate_by_lineage(&[record]);
        assert_eq!(counts_for(&counts, &LineageBucket::All), 0);
    }

    #[test]
    fn test_pivot_column_order_and_external_only_rows() {
        let d = date("2021-06-01");
        let table = pivot(vec![
            (d, "France".to_string(), Some(LineageBucket::Other), 3),
            (d, "France".to_string(), Some(LineageBucket::Lineage("B.1.617.2".into())), 2),
            (d, "France".to_string(), Some(LineageBucket::Lineage("AY.4".into())), 1),
            (d, "France".to_string(), Some(LineageBucket::All), 6),
            (d, "France".to_string(), Some(LineageBucket::Lineage("XYZ".into())), 9),
            (d, "Peru".to_string(), None, 0),
        ]);

        assert_eq!(
            table.lineage_columns,
            vec!["All lineages", "AY.4", "B.1.617.2", "Other lineages"]
        );
        assert_eq!(table.rows.len(), 2);
        let france = &table.rows[0];
        assert_eq!(france.count("All lineages"), Some(6));
        assert_eq!(france.count("XYZ"), None);
        let peru = &table.rows[1];
        assert_eq!(peru.country, "Peru");
        assert!(peru.counts.is_empty());
    }

    #[test]
    fn test_buckets_plus_other_equal_all() {
        let records = vec![
            annotated("Peru", "2021-06-01", Some("C.37")),
            annotated("Peru", "2021-06-01", Some("C.37")),
            annotated("Peru", "2021-06-01", Some("B.1.1.7")),
            annotated("Peru", "2021-06-01", Some("A.2.5")),
            annotated("Peru", "2021-06-02", Some("BA.1")),
        ];
        let counts = aggregate_by_lineage(&records);
        let table = pivot(
            counts
                .into_iter()
                .map(|c| (c.collect_date, c.country, Some(c.bucket), c.count)),
        );

        for row in &table.rows {
            let buckets: u64 = table.lineage_columns[1..]
                .iter()
                .filter_map(|c| row.count(c))
                .sum();
            assert_eq!(Some(buckets), row.count(ALL_LINEAGES));
        }
    }

    #[test]
    fn test_who_grouping_sums_and_other() {
        let columns: Vec<String> = ["All lineages", "AY.4", "B.1.617.2", "C.37", "B.1.525", "Other lineages"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let grouping = WhoGrouping::resolve(&columns);

        let counts = BTreeMap::from([
            ("All lineages".to_string(), 10),
            ("AY.4".to_string(), 2),
            ("B.1.617.2".to_string(), 3),
            ("B.1.525".to_string(), 1),
            ("Other lineages".to_string(), 4),
        ]);
        let who = grouping.label_counts(&counts);

        assert_eq!(who.get("who_delta"), Some(5));
        assert_eq!(who.get("who_allvois"), Some(0));
        assert_eq!(who.get("who_alpha"), Some(0));
        assert_eq!(who.get(WHO_OTHER), Some(5));
        assert_eq!(grouping.column_names().last().map(String::as_str), Some(WHO_OTHER));

        let empty = grouping.label_counts(&BTreeMap::new());
        assert_eq!(empty.who_other, None);
        assert_eq!(empty.get("who_delta"), Some(0));
    }
}
