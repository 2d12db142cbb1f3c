pub mod models;
pub mod pipeline;

pub use models::{
    ExtractionBatch, IngestReport, RawConcept, RawExtraction, RawRelationship, Rejection,
};
pub use pipeline::IngestionPipeline;
