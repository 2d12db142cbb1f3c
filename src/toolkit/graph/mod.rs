

pub mod engine;
pub mod path;
pub mod snapshot;

pub use engine::{GraphQueryEngine, GraphScore, NeighborConcept, Neighborhood};
pub use path::{relationship_weight, ConceptPath, Direction, PathOutcome, PathStep};
pub use snapshot::ConceptGraph;
