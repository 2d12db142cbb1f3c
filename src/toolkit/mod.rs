

pub mod citation;
pub mod dedup;
pub mod graph;
pub mod ingest;
pub mod scoring;
pub mod search;
