//! Cleaning, annotation and aggregation of viral sequence metadata, merged
//! with a public case and vaccination time series.

pub mod config;
pub mod constants;
pub mod error;
pub mod observability;
pub mod pipeline;

// Layered boundaries: ports in `app`, adapters in `infra`
pub mod app;
pub mod infra;

pub use error::{PipelineError, Result};
