use std::collections::HashSet;

use tracing::info;

use crate::app::ports::HttpClientPort;
use crate::constants::SEQUENCE_NAME_PREFIX;
use crate::error::Result;
use crate::pipeline::ingestion::fetch_source_text;

/// Virus names known to be problematic, already in metadata naming format
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionList {
    names: HashSet<String>,
}

impl ExclusionList {
    /// Parse the newline-delimited list. Blank and `#` comment lines are skipped;
    /// every remaining entry gets the `hCoV-19/` prefix.
    pub fn parse(text: &str) -> Self {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| format!("{}{}", SEQUENCE_NAME_PREFIX, line))
            .collect();
        Self { names }
    }

    pub fn contains(&self, virus_name: &str) -> bool {
        self.names.contains(virus_name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<String> for ExclusionList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self { names: iter.into_iter().collect() }
    }
}

pub fn load_exclusion_list(http: &dyn HttpClientPort, url: &str) -> Result<ExclusionList> {
    let text = fetch_source_text(http, "exclusion_list", url)?;
    let list = ExclusionList::parse(&text);
    info!("Loaded {} excluded sequence names", list.len());
    Ok(list)
}
