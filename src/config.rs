use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use crate::error::{PipelineError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub outputs: OutputsConfig,
    pub run: RunConfig,
}

/// Where the run reads its inputs from
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub metadata_path: PathBuf,
    pub exclusion_list_url: String,
    pub external_series_url: String,
    pub who_regions_path: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("data/raw/metadata.tsv"),
            exclusion_list_url:
                "https://raw.githubusercontent.com/nextstrain/ncov/master/defaults/exclude.txt"
                    .to_string(),
            external_series_url:
                "https://raw.githubusercontent.com/owid/covid-19-data/master/public/data/owid-covid-data.csv"
                    .to_string(),
            who_regions_path: PathBuf::from("data/raw/who_regions.csv"),
        }
    }
}

/// Output locations, relative to `output_dir`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputsConfig {
    pub output_dir: PathBuf,
    pub cleaned_file: String,
    pub merged_file: String,
    pub weekly_file: Option<String>,
    pub summary_file: String,
    pub metrics_file: Option<String>,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/processed"),
            cleaned_file: "initial_clean_metadata.csv".to_string(),
            merged_file: "gisaid_cleaning_output.csv".to_string(),
            weekly_file: None,
            summary_file: "run_summary.json".to_string(),
            metrics_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Processing date used for the future-date check; today when unset
    pub reference_date: Option<NaiveDate>,
    pub log_dir: PathBuf,
    pub timeout_seconds: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            reference_date: None,
            log_dir: PathBuf::from("logs"),
            timeout_seconds: 120,
        }
    }
}

impl Config {
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.run.timeout_seconds == 0 {
            return Err(PipelineError::Config(
                "run.timeout_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.run
            .reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.outputs.output_dir.join(file_name)
    }
}
