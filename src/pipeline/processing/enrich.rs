use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::constants::{COUNTRY_CORRECTIONS, TITLECASE_EXCEPTIONS};
use crate::pipeline::ingestion::metadata::SequenceRecord;
use crate::pipeline::processing::quality_gate::{ClassifiedRecord, QualityFlags};

static USA_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)usa").expect("valid regex"));

/// A classified record annotated with geographic and temporal fields
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRecord {
    /// The original record, unchanged
    pub record: SequenceRecord,
    pub flags: QualityFlags,
    pub region: String,
    /// Canonical country name, aligned with the external series vocabulary
    pub country: String,
    /// Empty when the location has no third segment
    pub division: String,
    pub collect_date: Option<NaiveDate>,
    pub submit_date: Option<NaiveDate>,
    /// ISO week of collection, `YYYY-Www`
    pub collect_yearweek: Option<String>,
    /// Monday of the collection week
    pub collect_weekstartdate: Option<NaiveDate>,
    pub submit_yearweek: Option<String>,
    pub submit_weekstartdate: Option<NaiveDate>,
    /// Submission minus collection, in days. May be negative.
    pub lag_days: Option<i64>,
}

impl AnnotatedRecord {
    pub fn lineage(&self) -> Option<&str> {
        self.record.pango_lineage.as_deref().filter(|l| !l.is_empty())
    }

    pub fn has_accession_id(&self) -> bool {
        self.record
            .accession_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

/// Row of the intermediate cleaned table
#[derive(Debug, Clone, Serialize)]
pub struct CleanedRow<'a> {
    pub collect_date: Option<NaiveDate>,
    pub submit_date: Option<NaiveDate>,
    pub any_abnormal: bool,
    pub country: &'a str,
    #[serde(rename = "Pango lineage")]
    pub pango_lineage: Option<&'a str>,
}

impl<'a> From<&'a AnnotatedRecord> for CleanedRow<'a> {
    fn from(r: &'a AnnotatedRecord) -> Self {
        Self {
            collect_date: r.collect_date,
            submit_date: r.submit_date,
            any_abnormal: r.flags.any_abnormal,
            country: &r.country,
            pango_lineage: r.record.pango_lineage.as_deref(),
        }
    }
}

/// Trait for deriving annotation fields from a classified record
pub trait Annotator {
    fn annotate(&self, record: ClassifiedRecord) -> AnnotatedRecord;
}

#[derive(Debug, Default)]
pub struct DefaultAnnotator;

impl DefaultAnnotator {
    pub fn new() -> Self {
        Self
    }

    pub fn annotate_batch(&self, records: Vec<ClassifiedRecord>) -> Vec<AnnotatedRecord> {
        let annotated: Vec<AnnotatedRecord> =
            records.into_iter().map(|r| self.annotate(r)).collect();
        let undated = annotated.iter().filter(|r| r.collect_date.is_none()).count();
        debug!(
            "Annotated {} records ({} without a usable collection date)",
            annotated.len(),
            undated
        );
        annotated
    }
}

impl Annotator for DefaultAnnotator {
    fn annotate(&self, classified: ClassifiedRecord) -> AnnotatedRecord {
        let ClassifiedRecord { record, flags } = classified;
        let location = parse_location(&record.location);
        let country = canonical_country(&titlecase_location(&location.country));

        let collect_date = parse_partial_date(&record.collection_date);
        let submit_date = parse_partial_date(&record.submission_date);
        let lag_days = match (collect_date, submit_date) {
            (Some(c), Some(s)) => Some((s - c).num_days()),
            _ => None,
        };

        AnnotatedRecord {
            region: location.region,
            country,
            division: location.division,
            collect_yearweek: collect_date.map(iso_yearweek),
            collect_weekstartdate: collect_date.map(week_start),
            submit_yearweek: submit_date.map(iso_yearweek),
            submit_weekstartdate: submit_date.map(week_start),
            collect_date,
            submit_date,
            lag_days,
            record,
            flags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedLocation {
    pub region: String,
    pub country: String,
    pub division: String,
}

/// Split `region / country / division`, trimming every segment.
/// Missing segments come back empty.
pub fn parse_location(location: &str) -> ParsedLocation {
    let mut parts = location.split('/').map(str::trim);
    ParsedLocation {
        region: parts.next().unwrap_or_default().to_string(),
        country: parts.next().unwrap_or_default().to_string(),
        division: parts.next().unwrap_or_default().to_string(),
    }
}

/// Capitalize each space-separated word (first letter upper, rest lower),
/// leaving connector words as they are. Repeated spaces are kept.
pub fn titlecase_location(name: &str) -> String {
    name.split(' ')
        .map(|word| {
            if TITLECASE_EXCEPTIONS.contains(&word) {
                word.to_string()
            } else {
                capitalize(word)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Apply the country substitution table to a title-cased name
pub fn canonical_country(country: &str) -> String {
    if USA_PATTERN.is_match(country) {
        return "United States".to_string();
    }
    COUNTRY_CORRECTIONS
        .get(country)
        .map(|c| c.to_string())
        .unwrap_or_else(|| country.to_string())
}

/// `YYYY-MM-DD`, `YYYY-MM` (first of month) or `YYYY` (January 1st)
pub fn parse_partial_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    let mut parts = value.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 1,
    };
    if parts.next().is_some() || value.len() < 4 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn iso_yearweek(date: NaiveDate) -> String {
    date.format("%G-W%V").to_string()
}

pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn create_classified(location: &str, collected: &str, submitted: &str) -> ClassifiedRecord {
        ClassifiedRecord {
            record: SequenceRecord {
                accession_id: Some("EPI_ISL_1".to_string()),
                virus_name: "hCoV-19/X/1/2021".to_string(),
                collection_date: collected.to_string(),
                submission_date: submitted.to_string(),
                location: location.to_string(),
                sequence_length: Some(29_000),
                host: "Human".to_string(),
                pango_lineage: Some("AY.4".to_string()),
                n_content: None,
                gc_content: Some(0.38),
            },
            flags: QualityFlags::default(),
        }
    }

    #[test]
    fn test_parse_location_segments() {
        let parsed = parse_location("North America / United States / California");
        assert_eq!(parsed.region, "North America");
        assert_eq!(parsed.country, "United States");
        assert_eq!(parsed.division, "California");

        let parsed = parse_location("Europe/France");
        assert_eq!(parsed.country, "France");
        assert_eq!(parsed.division, "");

        let parsed = parse_location("Oceania");
        assert_eq!(parsed.country, "");
    }

    #[test]
    fn test_titlecase_keeps_connector_words() {
        assert_eq!(titlecase_location("bosnia and herzegovina"), "Bosnia and Herzegovina");
        assert_eq!(titlecase_location("CÔTE d'Ivoire"), "Côte d'Ivoire");
        assert_eq!(titlecase_location("DEMOCRATIC REPUBLIC of the CONGO"), "Democratic Republic of the Congo");
        assert_eq!(titlecase_location("u.s. virgin islands"), "U.s. Virgin Islands");
        assert_eq!(titlecase_location("BOSNIA  and herzegovina"), "Bosnia  and Herzegovina");
        assert_eq!(titlecase_location("new\tzealand"), "New\tzealand");
    }

    #[test]
    fn test_canonical_country_substitutions() {
        assert_eq!(canonical_country("Usa"), "United States");
        assert_eq!(canonical_country("Usa Texas"), "United States");
        assert_eq!(canonical_country("Czech Republic"), "Czechia");
        assert_eq!(canonical_country("England"), "United Kingdom");
        assert_eq!(canonical_country("U.s. Virgin Islands"), "United States");
        assert_eq!(canonical_country("France"), "France");
        assert_eq!(
            canonical_country(&titlecase_location("czech republic")),
            "Czechia"
        );
    }

    #[test]
    fn test_parse_partial_dates() {
        assert_eq!(parse_partial_date("2021-06-01"), Some(date("2021-06-01")));
        assert_eq!(parse_partial_date("2021-06"), Some(date("2021-06-01")));
        assert_eq!(parse_partial_date("2021"), Some(date("2021-01-01")));
        assert_eq!(parse_partial_date("2020-1-1"), Some(date("2020-01-01")));
        assert_eq!(parse_partial_date(""), None);
        assert_eq!(parse_partial_date("unknown"), None);
        assert_eq!(parse_partial_date("2021-13"), None);
    }

    #[test]
    fn test_iso_week_fields() {
        // 2021-01-03 is a Sunday belonging to ISO week 53 of 2020
        assert_eq!(iso_yearweek(date("2021-01-03")), "2020-W53");
        assert_eq!(week_start(date("2021-01-03")), date("2020-12-28"));
        assert_eq!(week_start(date("2021-06-07")), date("2021-06-07"));
        assert_eq!(iso_yearweek(date("2021-06-01")), "2021-W22");
    }

    #[test]
    fn test_annotate_derives_all_fields() {
        let annotator = DefaultAnnotator::new();
        let annotated = annotator.annotate(create_classified(
            "North America / USA / Texas",
            "2021-06-01",
            "2021-06-15",
        ));

        assert_eq!(annotated.region, "North America");
        assert_eq!(annotated.country, "United States");
        assert_eq!(annotated.division, "Texas");
        assert_eq!(annotated.collect_yearweek.as_deref(), Some("2021-W22"));
        assert_eq!(annotated.collect_weekstartdate, Some(date("2021-05-31")));
        assert_eq!(annotated.submit_weekstartdate, Some(date("2021-06-14")));
        assert_eq!(annotated.lag_days, Some(14));
    }

    #[test]
    fn test_negative_lag_is_kept() {
        let annotator = DefaultAnnotator::new();
        let annotated =
            annotator.annotate(create_classified("Europe / France", "2021-06-10", "2021-06-01"));
        assert_eq!(annotated.lag_days, Some(-9));
    }

    #[test]
    fn test_unparseable_date_leaves_fields_empty() {
        let annotator = DefaultAnnotator::new();
        let annotated =
            annotator.annotate(create_classified("Europe / France", "n/a", "2021-06-01"));
        assert_eq!(annotated.collect_date, None);
        assert_eq!(annotated.collect_yearweek, None);
        assert_eq!(annotated.lag_days, None);
        assert!(annotated.submit_date.is_some());
    }
}
