

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::HelixClient;
use super::store::{Candidate, CandidateQuery, CandidateSet, ChunkStore, ConceptStore, SourceStore, WeightedTerm};
use crate::core::config::KbConfig;
use crate::core::error::{KbError, Result};
use crate::core::models::{
    Chunk, ChunkConcept, Citation, Concept, ConceptRelationship, Source, SourceCitation,
};


#[derive(Deserialize)]
struct ConceptsOutput {
    concepts: Vec<Concept>,
}

#[derive(Deserialize)]
struct RelationshipsOutput {
    relationships: Vec<ConceptRelationship>,
}

#[derive(Deserialize)]
struct ChunkConceptsOutput {
    links: Vec<ChunkConcept>,
}

#[derive(Deserialize)]
struct SourcesOutput {
    sources: Vec<Source>,
}

#[derive(Deserialize)]
struct CitationsOutput {
    citations: Vec<Citation>,
}

#[derive(Deserialize)]
struct CitationEdgesOutput {
    edges: Vec<SourceCitation>,
}

#[derive(Deserialize)]
struct ChunkHit {
    chunk: Chunk,
    source: Source,
    #[serde(default)]
    rank: f64,
}

#[derive(Deserialize)]
struct ChunkHitsOutput {
    hits: Vec<ChunkHit>,
}

#[derive(Deserialize)]
struct Ack {}

#[derive(Serialize)]
struct TextSearchInput<'a> {
    terms: &'a [WeightedTerm],
    source_type: Option<&'static str>,
    limit: usize,
}

#[derive(Serialize)]
struct VectorSearchInput<'a> {
    vector: &'a [f32],
    source_type: Option<&'static str>,
    limit: usize,
}

#[derive(Serialize)]
struct AuthorityRow {
    source_id: Uuid,
    authority: f64,
}

/// HelixDB-backed store. Every round trip holds one pool permit for the
/// duration of the query only.
pub struct HelixStore {
    client: Arc<HelixClient>,
    permits: Arc<Semaphore>,
}

impl HelixStore {
    pub fn new(client: Arc<HelixClient>, pool_size: usize) -> Self {
        info!("HelixStore initialized: pool_size={}", pool_size);
        Self {
            client,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    pub fn from_config(config: &KbConfig) -> Self {
        Self::new(Arc::new(HelixClient::from_config(config)), config.pool_size)
    }

    async fn query<T, P>(&self, name: &str, params: &P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + Sync,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| KbError::Connection(format!("pool closed: {}", e)))?;
        Ok(self.client.execute_query(name, params).await?)
    }
}

#[async_trait]
impl ConceptStore for HelixStore {
    async fn list_concepts(&self) -> Result<Vec<Concept>> {
        let out: ConceptsOutput = self.query("getAllConcepts", &serde_json::json!({})).await?;
        Ok(out.concepts)
    }

    async fn list_relationships(&self) -> Result<Vec<ConceptRelationship>> {
        let out: RelationshipsOutput = self
            .query("getAllConceptRelationships", &serde_json::json!({}))
            .await?;
        Ok(out.relationships)
    }

    async fn create_concepts(&self, concepts: &[Concept]) -> Result<()> {
        if concepts.is_empty() {
            return Ok(());
        }
        let _: Ack = self
            .query("addConcepts", &serde_json::json!({ "concepts": concepts }))
            .await?;
        debug!("Stored {} concepts", concepts.len());
        Ok(())
    }

    async fn create_relationships(&self, relationships: &[ConceptRelationship]) -> Result<()> {
        if relationships.is_empty() {
            return Ok(());
        }
        let _: Ack = self
            .query(
                "addConceptRelationships",
                &serde_json::json!({ "relationships": relationships }),
            )
            .await
            .map_err(|e| match e {
                KbError::Query(msg) => KbError::Validation(msg),
                other => other,
            })?;
        Ok(())
    }

    async fn link_chunk_concepts(&self, links: &[ChunkConcept]) -> Result<()> {
        if links.is_empty() {
            return Ok(());
        }
        let _: Ack = self
            .query("linkChunkConcepts", &serde_json::json!({ "links": links }))
            .await?;
        Ok(())
    }

    async fn concept_ids_for_chunks(&self, chunk_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        let out: ChunkConceptsOutput = self
            .query("getChunkConcepts", &serde_json::json!({ "chunk_ids": chunk_ids }))
            .await?;
        let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for link in out.links {
            map.entry(link.chunk_id).or_default().push(link.concept_id);
        }
        Ok(map)
    }

    async fn merge_concepts(&self, keep: Uuid, merged: &[Uuid]) -> Result<()> {
        let _: Ack = self
            .query(
                "mergeConcepts",
                &serde_json::json!({ "keep_id": keep, "merged_ids": merged }),
            )
            .await?;
        Ok(())
    }
}

/// Text hits keep their rank and order; vector-only hits follow with rank 0.
fn merge_hits(text: Vec<ChunkHit>, vector: Vec<ChunkHit>) -> Vec<Candidate> {
    let mut seen: HashSet<Uuid> = text.iter().map(|h| h.chunk.id).collect();
    let vector_only = vector.into_iter().filter(|h| seen.insert(h.chunk.id)).map(|mut h| {
        h.rank = 0.0;
        h
    });
    text.into_iter()
        .chain(vector_only)
        .map(|h| Candidate {
            chunk: h.chunk,
            source: h.source,
            lexical_rank: h.rank,
        })
        .collect()
}

#[async_trait]
impl ChunkStore for HelixStore {
    async fn search_candidates(&self, query: &CandidateQuery) -> Result<CandidateSet> {
        let source_type = query.source_type.map(|t| -> &'static str { t.into() });

        let text_hits: Vec<ChunkHit> = if query.terms.is_empty() {
            Vec::new()
        } else {
            let out: ChunkHitsOutput = self
                .query(
                    "searchChunksText",
                    &TextSearchInput {
                        terms: &query.terms,
                        source_type,
                        limit: query.limit,
                    },
                )
                .await?;
            out.hits
        };

        let mut vector_error = None;
        let vector_hits: Vec<ChunkHit> = match &query.embedding {
            Some(vector) => {
                let out: Result<ChunkHitsOutput> = self
                    .query(
                        "searchChunksVector",
                        &VectorSearchInput {
                            vector,
                            source_type,
                            limit: query.limit,
                        },
                    )
                    .await;
                match out {
                    Ok(out) => out.hits,
                    Err(e) => {
                        warn!("Vector candidate query failed, keeping lexical hits: {}", e);
                        vector_error = Some(e.to_string());
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        Ok(CandidateSet {
            candidates: merge_hits(text_hits, vector_hits),
            vector_error,
        })
    }
}

#[async_trait]
impl SourceStore for HelixStore {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        let out: SourcesOutput = self.query("getAllSources", &serde_json::json!({})).await?;
        Ok(out.sources)
    }

    async fn list_citations(&self) -> Result<Vec<Citation>> {
        let out: CitationsOutput = self.query("getAllCitations", &serde_json::json!({})).await?;
        Ok(out.citations)
    }

    async fn list_citation_edges(&self) -> Result<Vec<SourceCitation>> {
        let out: CitationEdgesOutput = self
            .query("getAllSourceCitations", &serde_json::json!({}))
            .await?;
        Ok(out.edges)
    }

    async fn upsert_citation_edge(&self, edge: &SourceCitation) -> Result<()> {
        let _: Ack = self.query("upsertSourceCitation", edge).await?;
        Ok(())
    }

    async fn replace_citation_authority(&self, scores: &HashMap<Uuid, f64>) -> Result<()> {
        let rows: Vec<AuthorityRow> = scores
            .iter()
            .map(|(id, score)| AuthorityRow {
                source_id: *id,
                authority: *score,
            })
            .collect();
        let _: Ack = self
            .query("replaceCitationAuthority", &serde_json::json!({ "scores": rows }))
            .await?;
        info!("Replaced citation authority for {} sources", scores.len());
        Ok(())
    }
}
