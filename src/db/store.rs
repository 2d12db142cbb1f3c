

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::models::{
    Chunk, ChunkConcept, Citation, Concept, ConceptRelationship, Source, SourceCitation, SourceType,
};


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f64,
}

impl WeightedTerm {
    pub fn new(term: impl Into<String>, weight: f64) -> Self {
        Self { term: term.into(), weight }
    }
}

/// Candidate generation request. Lexical and vector candidates are
/// unioned; scoring beyond the raw text rank happens in the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub terms: Vec<WeightedTerm>,
    pub embedding: Option<Vec<f32>>,
    pub source_type: Option<SourceType>,
    pub limit: usize,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk: Chunk,
    pub source: Source,
    /// Raw text-search rank, 0 when the chunk was only a vector hit.
    pub lexical_rank: f64,
}

/// Candidates plus the reason the vector leg failed, if it did. Lexical
/// hits survive a vector failure.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub candidates: Vec<Candidate>,
    pub vector_error: Option<String>,
}

impl CandidateSet {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}


#[async_trait]
pub trait ConceptStore: Send + Sync {
    
    async fn list_concepts(&self) -> Result<Vec<Concept>>;

    
    async fn list_relationships(&self) -> Result<Vec<ConceptRelationship>>;

    
    async fn create_concepts(&self, concepts: &[Concept]) -> Result<()>;

    /// Fails with a validation error if an endpoint does not exist.
    async fn create_relationships(&self, relationships: &[ConceptRelationship]) -> Result<()>;

    
    async fn link_chunk_concepts(&self, links: &[ChunkConcept]) -> Result<()>;

    
    async fn concept_ids_for_chunks(&self, chunk_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>>;

    /// Folds `merged` into `keep`: aliases, relationships and chunk links
    /// are re-pointed and the merged concepts removed.
    async fn merge_concepts(&self, keep: Uuid, merged: &[Uuid]) -> Result<()>;
}


#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Fails only when the lexical leg fails.
    async fn search_candidates(&self, query: &CandidateQuery) -> Result<CandidateSet>;
}


#[async_trait]
pub trait SourceStore: Send + Sync {
    
    async fn list_sources(&self) -> Result<Vec<Source>>;

    
    async fn list_citations(&self) -> Result<Vec<Citation>>;

    
    async fn list_citation_edges(&self) -> Result<Vec<SourceCitation>>;

    /// Keyed by `(citing_source_id, citation_id)`.
    async fn upsert_citation_edge(&self, edge: &SourceCitation) -> Result<()>;

    /// Whole-batch swap; sources absent from `scores` are reset to none.
    async fn replace_citation_authority(&self, scores: &HashMap<Uuid, f64>) -> Result<()>;
}


pub trait KnowledgeStore: ConceptStore + ChunkStore + SourceStore {}

impl<T: ConceptStore + ChunkStore + SourceStore> KnowledgeStore for T {}


pub type SharedStore = Arc<dyn KnowledgeStore>;
