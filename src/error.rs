use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing column(s): {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("Failed to fetch {source_name}: {reason}")]
    SourceFetch { source_name: String, reason: String },

    #[error("External series has more than one row for location '{location}' on {date}")]
    JoinAmbiguity { date: NaiveDate, location: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
