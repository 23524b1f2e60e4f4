use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{PipelineError, Result};

#[derive(Debug, Deserialize)]
struct RegionRow {
    #[serde(rename = "Entity")]
    entity: String,
    #[serde(rename = "WHO region")]
    who_region: Option<String>,
}

/// Location name → WHO region
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: HashMap<String, String>,
}

impl RegionTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to open WHO region table '{}': {}",
                path.display(),
                e
            ))
        })?;
        let table = Self::from_reader(BufReader::new(file))?;
        info!("Loaded WHO regions for {} locations", table.regions.len());
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut regions = HashMap::new();
        for row in rdr.deserialize::<RegionRow>() {
            let row = row?;
            if let Some(region) = row.who_region.filter(|r| !r.is_empty()) {
                // first assignment wins for repeated entities
                regions.entry(row.entity).or_insert(region);
            }
        }
        Ok(Self { regions })
    }

    pub fn who_region(&self, location: &str) -> Option<&str> {
        self.regions.get(location).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for RegionTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { regions: iter.into_iter().collect() }
    }
}
