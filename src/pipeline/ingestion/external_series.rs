//! External case/vaccination time series (one row per location per day).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;
use tracing::{debug, info};

use crate::app::ports::HttpClientPort;
use crate::constants::{
    EARLIEST_COLLECTION_DATE, EXTERNAL_AGGREGATE_ISO_CODES, REGIONAL_VACCINATION_SOURCES,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::fetch_source_text;
use crate::pipeline::processing::enrich::week_start;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExternalSeriesRecord {
    pub date: NaiveDate,
    pub location: String,
    #[serde(default)]
    pub iso_code: String,
    pub continent: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub new_cases: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub new_cases_smoothed: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub population: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub people_vaccinated: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub people_fully_vaccinated: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub people_vaccinated_per_hundred: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub people_fully_vaccinated_per_hundred: Option<f64>,
    /// Day-over-day change of `people_vaccinated`, derived after loading
    #[serde(skip)]
    pub new_people_vaccinated: Option<f64>,
    /// Day-over-day change of `people_fully_vaccinated`, derived after loading
    #[serde(skip)]
    pub new_people_fully_vaccinated: Option<f64>,
}

/// Date-independent attributes of a location
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationProfile {
    pub continent: Option<String>,
    pub population: Option<f64>,
}

/// Vaccination shares published for continents and the world, one value
/// per week taken from that week's Sunday.
#[derive(Debug, Clone, Default)]
pub struct RegionalVaccination {
    by_week: BTreeMap<(String, NaiveDate), (Option<f64>, Option<f64>)>,
    locations: BTreeSet<String>,
}

impl RegionalVaccination {
    pub fn from_records(records: &[ExternalSeriesRecord]) -> Self {
        let mut regional = Self::default();
        for record in records {
            let Some(label) = regional_label(&record.iso_code) else {
                continue;
            };
            regional.locations.insert(label.to_string());
            if record.date.weekday() != Weekday::Sun {
                continue;
            }
            regional.by_week.insert(
                (label.to_string(), week_start(record.date)),
                (
                    record.people_vaccinated_per_hundred,
                    record.people_fully_vaccinated_per_hundred,
                ),
            );
        }
        regional
    }

    /// Whether `aggregate_location` has a published series at all
    pub fn covers(&self, aggregate_location: &str) -> bool {
        self.locations.contains(aggregate_location)
    }

    /// (people vaccinated, people fully vaccinated) per hundred for the week
    /// starting on `weekstart`
    pub fn week(&self, aggregate_location: &str, weekstart: NaiveDate) -> Option<(Option<f64>, Option<f64>)> {
        self.by_week
            .get(&(aggregate_location.to_string(), weekstart))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

fn regional_label(iso_code: &str) -> Option<&'static str> {
    REGIONAL_VACCINATION_SOURCES
        .iter()
        .find(|(code, _)| *code == iso_code)
        .map(|(_, label)| *label)
}

/// The cleaned external series: aggregate rows removed, sorted by
/// (location, date), vaccination deltas filled in. Published regional
/// vaccination shares are set aside before the aggregate rows go.
#[derive(Debug, Clone, Default)]
pub struct ExternalSeries {
    records: Vec<ExternalSeriesRecord>,
    regional_vaccination: RegionalVaccination,
}

impl ExternalSeries {
    pub fn from_records(records: Vec<ExternalSeriesRecord>) -> Self {
        let regional_vaccination = RegionalVaccination::from_records(&records);
        let earliest = earliest_date();
        let mut records: Vec<_> = records
            .into_iter()
            .filter(|r| r.date >= earliest)
            .filter(|r| !EXTERNAL_AGGREGATE_ISO_CODES.contains(&r.iso_code.as_str()))
            .collect();
        records.sort_by(|a, b| a.location.cmp(&b.location).then(a.date.cmp(&b.date)));
        fill_vaccination_deltas(&mut records);
        Self {
            records,
            regional_vaccination,
        }
    }

    pub fn parse_csv(text: &str) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(text.as_bytes());
        let records = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<ExternalSeriesRecord>, _>>()?;
        let raw_rows = records.len();
        let series = Self::from_records(records);
        debug!("External series: {} raw rows, {} kept", raw_rows, series.len());
        Ok(series)
    }

    pub fn records(&self) -> &[ExternalSeriesRecord] {
        &self.records
    }

    pub fn regional_vaccination(&self) -> &RegionalVaccination {
        &self.regional_vaccination
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index rows by (date, location). The series must be one row per key.
    pub fn index_by_date_location(&self) -> Result<HashMap<(NaiveDate, &str), usize>> {
        let mut index = HashMap::with_capacity(self.records.len());
        for (i, record) in self.records.iter().enumerate() {
            if index.insert((record.date, record.location.as_str()), i).is_some() {
                return Err(PipelineError::JoinAmbiguity {
                    date: record.date,
                    location: record.location.clone(),
                });
            }
        }
        Ok(index)
    }

    /// Continent and population per location, taking the latest non-empty value of each.
    pub fn location_profiles(&self) -> BTreeMap<String, LocationProfile> {
        let mut profiles: BTreeMap<String, LocationProfile> = BTreeMap::new();
        // records are date-ordered within a location, so later values win
        for record in &self.records {
            let profile = profiles.entry(record.location.clone()).or_default();
            if let Some(continent) = record.continent.as_ref().filter(|c| !c.is_empty()) {
                profile.continent = Some(continent.clone());
            }
            if record.population.is_some() {
                profile.population = record.population;
            }
        }
        profiles
    }
}

pub fn load_external_series(http: &dyn HttpClientPort, url: &str) -> Result<ExternalSeries> {
    let text = fetch_source_text(http, "external_series", url)?;
    let series = ExternalSeries::parse_csv(&text)?;
    info!("Loaded {} external series rows", series.len());
    Ok(series)
}

fn earliest_date() -> NaiveDate {
    NaiveDate::parse_from_str(EARLIEST_COLLECTION_DATE, "%Y-%m-%d").unwrap_or(NaiveDate::MIN)
}

/// Per location: forward-fill the cumulative counts, zero-fill what is still
/// missing, then take the difference to the previous day. The first row of
/// each location has no previous day and stays empty.
fn fill_vaccination_deltas(records: &mut [ExternalSeriesRecord]) {
    let mut start = 0;
    while start < records.len() {
        let location = records[start].location.clone();
        let end = records[start..]
            .iter()
            .position(|r| r.location != location)
            .map_or(records.len(), |offset| start + offset);

        let group = &mut records[start..end];
        let vaccinated = cumulative_deltas(group.iter().map(|r| r.people_vaccinated));
        let fully = cumulative_deltas(group.iter().map(|r| r.people_fully_vaccinated));
        for ((record, delta), fully_delta) in group.iter_mut().zip(vaccinated).zip(fully) {
            record.new_people_vaccinated = delta;
            record.new_people_fully_vaccinated = fully_delta;
        }

        start = end;
    }
}

fn cumulative_deltas(values: impl Iterator<Item = Option<f64>>) -> Vec<Option<f64>> {
    let mut last_seen: Option<f64> = None;
    let mut previous: Option<f64> = None;
    values
        .map(|value| {
            if value.is_some() {
                last_seen = value;
            }
            let filled = last_seen.unwrap_or(0.0);
            let delta = previous.map(|p| filled - p);
            previous = Some(filled);
            delta
        })
        .collect()
}
