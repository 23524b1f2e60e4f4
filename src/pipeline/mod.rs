// Metadata pipeline: ingestion, processing and output

pub mod ingestion;
pub mod orchestrator;
pub mod output;
pub mod processing;

pub use orchestrator::{MetadataPipeline, RunSummary};
