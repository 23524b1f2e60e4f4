use std::collections::HashMap;

use crate::app::ports::{HttpClientPort, HttpGetResult};
use crate::error::{PipelineError, Result};

/// In-memory HTTP client serving canned bodies by URL. Unknown URLs fail
/// the same way an unreachable host would.
#[derive(Default, Clone)]
pub struct StaticHttp {
    responses: HashMap<String, HttpGetResult>,
}

impl StaticHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: &str) -> Self {
        self.responses.insert(url.to_string(), Self::response(200, body));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), Self::response(status, ""));
        self
    }

    fn response(status: u16, body: &str) -> HttpGetResult {
        HttpGetResult {
            status,
            body: body.to_string(),
            content_type: "text/plain".to_string(),
            content_length: body.len() as u64,
        }
    }
}

impl HttpClientPort for StaticHttp {
    fn get(&self, url: &str) -> Result<HttpGetResult> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::SourceFetch {
                source_name: url.to_string(),
                reason: "connection refused".to_string(),
            })
    }
}
