// Pipeline ingestion: metadata table, remote sources and reference tables

pub mod exclusion;
pub mod external_series;
pub mod metadata;
pub mod regions;

use tracing::{info, warn};

use crate::app::ports::HttpClientPort;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;

/// Fetch a remote text source. Transport failures and non-success statuses
/// both surface as `SourceFetch`; callers never get an empty body instead.
pub fn fetch_source_text(
    http: &dyn HttpClientPort,
    source_name: &'static str,
    url: &str,
) -> Result<String> {
    let response = http.get(url).map_err(|e| {
        metrics::sources::fetch_failed(source_name);
        warn!("Fetching {} from {} failed: {}", source_name, url, e);
        PipelineError::SourceFetch {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        }
    })?;

    if !response.is_success() {
        metrics::sources::fetch_failed(source_name);
        return Err(PipelineError::SourceFetch {
            source_name: source_name.to_string(),
            reason: format!("HTTP status {} from {}", response.status, url),
        });
    }

    info!(
        "Fetched {} ({} bytes, {})",
        source_name, response.content_length, response.content_type
    );
    metrics::sources::fetch_succeeded(source_name, response.body.len());
    Ok(response.body)
}
