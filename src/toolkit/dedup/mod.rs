

pub mod canonical;
pub mod deduplicator;
pub mod registry;

pub use canonical::{canonicalize, ABBREVIATION_MAP};
pub use deduplicator::{should_merge, ConceptMatch, DedupReport, Deduplicator, MERGE_THRESHOLD};
pub use registry::{ConceptRegistry, KnownConcept};
