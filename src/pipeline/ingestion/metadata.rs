use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::REQUIRED_METADATA_COLUMNS;
use crate::error::{PipelineError, Result};

/// One row of the sequence metadata export. Only the fields the pipeline
/// reads are kept; the remaining required columns are checked for presence only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    #[serde(rename = "Accession ID")]
    pub accession_id: Option<String>,
    #[serde(rename = "Virus name", default)]
    pub virus_name: String,
    #[serde(rename = "Collection date", default)]
    pub collection_date: String,
    #[serde(rename = "Submission date", default)]
    pub submission_date: String,
    #[serde(rename = "Location", default)]
    pub location: String,
    #[serde(rename = "Sequence length", default, deserialize_with = "csv::invalid_option")]
    pub sequence_length: Option<u32>,
    #[serde(rename = "Host", default)]
    pub host: String,
    #[serde(rename = "Pango lineage")]
    pub pango_lineage: Option<String>,
    #[serde(rename = "N-Content", default, deserialize_with = "csv::invalid_option")]
    pub n_content: Option<f64>,
    #[serde(rename = "GC-Content", default, deserialize_with = "csv::invalid_option")]
    pub gc_content: Option<f64>,
}

/// The raw metadata table as read from the tab-separated export
#[derive(Debug, Clone)]
pub struct MetadataTable {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl MetadataTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            PipelineError::Config(format!("Failed to open metadata '{}': {}", path.display(), e))
        })?;
        let table = Self::from_reader(BufReader::new(file))?;
        info!("Read {} metadata rows from {}", table.len(), path.display());
        Ok(table)
    }

    /// Short rows are padded with empty fields, which read as missing values.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        let mut rows = rdr.records().collect::<std::result::Result<Vec<_>, _>>()?;

        let mut padded = 0;
        for row in rows.iter_mut().filter(|r| r.len() < headers.len()) {
            while row.len() < headers.len() {
                row.push_field("");
            }
            padded += 1;
        }
        if padded > 0 {
            warn!("{} metadata rows had fewer fields than the header; padded with empty values", padded);
        }
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Required columns absent from the header, in their canonical order
    pub fn missing_columns(&self) -> Vec<String> {
        let observed: HashSet<&str> = self.headers.iter().collect();
        REQUIRED_METADATA_COLUMNS
            .iter()
            .filter(|column| !observed.contains(*column))
            .map(|column| column.to_string())
            .collect()
    }

    pub fn validate_columns(&self) -> Result<()> {
        let missing = self.missing_columns();
        if !missing.is_empty() {
            return Err(PipelineError::Schema { missing });
        }
        debug!("All {} required metadata columns present", REQUIRED_METADATA_COLUMNS.len());
        Ok(())
    }

    pub fn sequence_records(&self) -> Result<Vec<SequenceRecord>> {
        self.rows
            .iter()
            .map(|row| row.deserialize(Some(&self.headers)).map_err(PipelineError::from))
            .collect()
    }
}
