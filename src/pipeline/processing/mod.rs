// Pipeline processing: classification, annotation, aggregation and merge

pub mod enrich;
pub mod lag_stats;
pub mod lineage;
pub mod merge;
pub mod quality_gate;
pub mod rollup;
pub mod weekly;
