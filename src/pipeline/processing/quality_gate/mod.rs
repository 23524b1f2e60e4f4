use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::EARLIEST_COLLECTION_DATE;
use crate::observability::metrics;
use crate::pipeline::ingestion::exclusion::ExclusionList;
use crate::pipeline::ingestion::metadata::SequenceRecord;

/// Per-record quality flags. Records are never dropped; every flag is kept
/// so downstream analysts can filter on the individual reasons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    /// Virus name appears on the exclusion list
    pub excluded_by_denylist: bool,
    /// Collection date is incomplete, too early or in the future
    pub abnormal_date: bool,
    /// Too short, too many ambiguous bases, or not a human sample
    pub low_quality_sequence: bool,
    /// GC content outside the normal band
    pub abnormal_gc_content: bool,
    /// Any of the above
    pub any_abnormal: bool,
}

impl QualityFlags {
    pub fn new(
        excluded_by_denylist: bool,
        abnormal_date: bool,
        low_quality_sequence: bool,
        abnormal_gc_content: bool,
    ) -> Self {
        Self {
            excluded_by_denylist,
            abnormal_date,
            low_quality_sequence,
            abnormal_gc_content,
            any_abnormal: excluded_by_denylist
                || abnormal_date
                || low_quality_sequence
                || abnormal_gc_content,
        }
    }
}

/// A metadata record with its quality flags attached
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub record: SequenceRecord,
    pub flags: QualityFlags,
}

/// Configuration for the per-record quality checks
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// Processing date; later collection dates are suspect
    pub reference_date: NaiveDate,
    /// Collection dates must sort strictly after this ISO date
    pub earliest_collection_date: String,
    /// Sequences must be strictly longer than this
    pub min_sequence_length: u32,
    /// N-content must be strictly below this when reported
    pub max_n_content: f64,
    pub required_host: String,
    /// Exclusive GC-content band
    pub gc_content_range: (f64, f64),
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            reference_date: Local::now().date_naive(),
            earliest_collection_date: EARLIEST_COLLECTION_DATE.to_string(),
            min_sequence_length: 20_000,
            max_n_content: 0.02,
            required_host: "Human".to_string(),
            gc_content_range: (0.25, 0.40),
        }
    }
}

/// Trait for per-record quality assessment
pub trait QualityGate {
    fn assess(&self, record: &SequenceRecord) -> QualityFlags;
}

/// Default gate: date, sequence, GC-content and exclusion-list checks
pub struct DefaultQualityGate<'a> {
    pub config: QualityGateConfig,
    exclusions: &'a ExclusionList,
}

impl<'a> DefaultQualityGate<'a> {
    pub fn new(exclusions: &'a ExclusionList) -> Self {
        Self::with_config(exclusions, QualityGateConfig::default())
    }

    pub fn with_config(exclusions: &'a ExclusionList, config: QualityGateConfig) -> Self {
        Self { config, exclusions }
    }

    /// The date string must be a full `YYYY-MM-DD`, after the earliest date
    /// and not after the reference date. Comparison is on the ISO strings.
    pub fn is_suspect_date(&self, collection_date: &str) -> bool {
        let today = self.config.reference_date.format("%Y-%m-%d").to_string();
        let legit_date = collection_date.len() == 10
            && collection_date > self.config.earliest_collection_date.as_str()
            && collection_date <= today.as_str();
        !legit_date
    }

    pub fn is_suspect_sequence(&self, record: &SequenceRecord) -> bool {
        let long_enough = record
            .sequence_length
            .is_some_and(|len| len > self.config.min_sequence_length);
        let resolved = match record.n_content {
            Some(n) if n.is_nan() => true,
            Some(n) => n < self.config.max_n_content,
            None => true,
        };
        let human = record.host == self.config.required_host;
        !(long_enough && resolved && human)
    }

    pub fn is_abnormal_gc_content(&self, gc_content: Option<f64>) -> bool {
        let (low, high) = self.config.gc_content_range;
        let normal = gc_content.is_some_and(|gc| gc > low && gc < high);
        !normal
    }

    pub fn is_excluded(&self, virus_name: &str) -> bool {
        self.exclusions.contains(virus_name)
    }

    /// Classify every record, keeping all of them
    pub fn classify_batch(&self, records: Vec<SequenceRecord>) -> Vec<ClassifiedRecord> {
        let classified: Vec<ClassifiedRecord> = records
            .into_iter()
            .map(|record| {
                let flags = self.assess(&record);
                ClassifiedRecord { record, flags }
            })
            .collect();

        let stats = ClassificationStats::from_records(&classified);
        info!(
            "Classified {} records: {} abnormal ({} excluded, {} bad date, {} low quality, {} abnormal GC)",
            stats.total_records,
            stats.any_abnormal,
            stats.excluded_by_denylist,
            stats.abnormal_date,
            stats.low_quality_sequence,
            stats.abnormal_gc_content
        );
        stats.record_metrics();

        classified
    }
}

impl QualityGate for DefaultQualityGate<'_> {
    fn assess(&self, record: &SequenceRecord) -> QualityFlags {
        // every check runs; the individual flags are reported separately
        let excluded = self.is_excluded(&record.virus_name);
        let abnormal_date = self.is_suspect_date(&record.collection_date);
        let low_quality = self.is_suspect_sequence(record);
        let abnormal_gc = self.is_abnormal_gc_content(record.gc_content);
        QualityFlags::new(excluded, abnormal_date, low_quality, abnormal_gc)
    }
}

/// Flag counts over a classified batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationStats {
    pub total_records: usize,
    pub excluded_by_denylist: usize,
    pub abnormal_date: usize,
    pub low_quality_sequence: usize,
    pub abnormal_gc_content: usize,
    pub any_abnormal: usize,
}

impl ClassificationStats {
    pub fn from_records(records: &[ClassifiedRecord]) -> Self {
        Self::from_flags(records.iter().map(|r| &r.flags))
    }

    pub fn from_flags<'a>(flags: impl Iterator<Item = &'a QualityFlags>) -> Self {
        let mut stats = Self::default();
        for f in flags {
            stats.total_records += 1;
            stats.excluded_by_denylist += f.excluded_by_denylist as usize;
            stats.abnormal_date += f.abnormal_date as usize;
            stats.low_quality_sequence += f.low_quality_sequence as usize;
            stats.abnormal_gc_content += f.abnormal_gc_content as usize;
            stats.any_abnormal += f.any_abnormal as usize;
        }
        stats
    }

    fn record_metrics(&self) {
        metrics::quality_gate::records_classified(self.total_records);
        metrics::quality_gate::records_flagged("excluded_by_denylist", self.excluded_by_denylist);
        metrics::quality_gate::records_flagged("abnormal_date", self.abnormal_date);
        metrics::quality_gate::records_flagged("low_quality_sequence", self.low_quality_sequence);
        metrics::quality_gate::records_flagged("abnormal_gc_content", self.abnormal_gc_content);
        metrics::quality_gate::records_flagged("any_abnormal", self.any_abnormal);
    }
}
