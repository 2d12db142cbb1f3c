

pub mod client;
pub mod helix;
pub mod memory;
pub mod store;

pub use client::{HelixClient, HelixClientError};
pub use helix::HelixStore;
pub use memory::InMemoryStore;
pub use store::{
    Candidate, CandidateQuery, CandidateSet, ChunkStore, ConceptStore, KnowledgeStore, SharedStore, SourceStore,
    WeightedTerm,
};
