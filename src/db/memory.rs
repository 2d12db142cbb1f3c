

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::store::{Candidate, CandidateQuery, CandidateSet, ChunkStore, ConceptStore, SourceStore};
use crate::core::error::{KbError, Result};
use crate::core::models::{
    Chunk, ChunkConcept, Citation, Concept, ConceptRelationship, Source, SourceCitation,
};
use crate::toolkit::scoring::raw_cosine;
use crate::utils::word_tokens;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;


#[derive(Default)]
struct Tables {
    concepts: Vec<Concept>,
    relationships: Vec<ConceptRelationship>,
    chunk_concepts: Vec<ChunkConcept>,
    chunks: Vec<Chunk>,
    sources: HashMap<Uuid, Source>,
    citations: Vec<Citation>,
    citation_edges: Vec<SourceCitation>,
}

#[cfg(test)]
#[derive(Default)]
struct Faults {
    authority_writes: AtomicBool,
    chunk_concepts: AtomicBool,
    vector_search: AtomicBool,
    failing_concept: parking_lot::Mutex<Option<String>>,
    write_delay_ms: AtomicU64,
    read_delay_ms: AtomicU64,
}

#[cfg(test)]
async fn pause(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

/// In-process datastore. Text ranking is a BM25 scan over chunk content.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    #[cfg(test)]
    faults: Faults,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&self, source: Source) -> Uuid {
        let id = source.id;
        self.tables.write().sources.insert(id, source);
        id
    }

    pub fn add_chunk(&self, chunk: Chunk) -> Uuid {
        let id = chunk.id;
        self.tables.write().chunks.push(chunk);
        id
    }

    pub fn add_citation(&self, citation: Citation) -> Uuid {
        let id = citation.id;
        self.tables.write().citations.push(citation);
        id
    }

    pub fn source(&self, id: Uuid) -> Option<Source> {
        self.tables.read().sources.get(&id).cloned()
    }

    pub fn concept(&self, id: Uuid) -> Option<Concept> {
        self.tables.read().concepts.iter().find(|c| c.id == id).cloned()
    }

    pub fn concept_count(&self) -> usize {
        self.tables.read().concepts.len()
    }

    #[cfg(test)]
    pub(crate) fn fail_authority_writes(&self, fail: bool) {
        self.faults.authority_writes.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn fail_chunk_concepts(&self, fail: bool) {
        self.faults.chunk_concepts.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn fail_vector_search(&self, fail: bool) {
        self.faults.vector_search.store(fail, Ordering::SeqCst);
    }

    /// Rejects any concept insert that contains a concept with this name.
    #[cfg(test)]
    pub(crate) fn fail_concept_named(&self, name: Option<&str>) {
        *self.faults.failing_concept.lock() = name.map(str::to_string);
    }

    /// Concept inserts and merges sleep before committing.
    #[cfg(test)]
    pub(crate) fn delay_writes(&self, ms: u64) {
        self.faults.write_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// `list_concepts` sleeps after reading, returning what it read.
    #[cfg(test)]
    pub(crate) fn delay_reads(&self, ms: u64) {
        self.faults.read_delay_ms.store(ms, Ordering::SeqCst);
    }
}

fn bm25_scores(chunks: &[&Chunk], query: &CandidateQuery) -> HashMap<Uuid, f64> {
    let docs: Vec<(Uuid, Vec<String>)> = chunks
        .iter()
        .map(|c| (c.id, word_tokens(&c.content)))
        .collect();
    let n = docs.len() as f64;
    if docs.is_empty() {
        return HashMap::new();
    }
    let avg_len = docs.iter().map(|(_, t)| t.len()).sum::<usize>() as f64 / n;

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for (_, tokens) in &docs {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for t in unique {
            *doc_freq.entry(t).or_insert(0) += 1;
        }
    }

    let mut scores = HashMap::new();
    for (id, tokens) in &docs {
        let len = tokens.len() as f64;
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for t in tokens {
            *tf.entry(t.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0;
        for term in &query.terms {
            for word in word_tokens(&term.term) {
                let Some(&freq) = tf.get(word.as_str()) else {
                    continue;
                };
                let df = doc_freq.get(word.as_str()).copied().unwrap_or(0) as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let freq = freq as f64;
                let norm = freq * (BM25_K1 + 1.0)
                    / (freq + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len.max(1.0)));
                score += term.weight * idf * norm;
            }
        }
        if score > 0.0 {
            scores.insert(*id, score);
        }
    }
    scores
}

#[async_trait]
impl ConceptStore for InMemoryStore {
    async fn list_concepts(&self) -> Result<Vec<Concept>> {
        let concepts = self.tables.read().concepts.clone();
        #[cfg(test)]
        pause(&self.faults.read_delay_ms).await;
        Ok(concepts)
    }

    async fn list_relationships(&self) -> Result<Vec<ConceptRelationship>> {
        Ok(self.tables.read().relationships.clone())
    }

    async fn create_concepts(&self, concepts: &[Concept]) -> Result<()> {
        #[cfg(test)]
        {
            pause(&self.faults.write_delay_ms).await;
            let failing = self.faults.failing_concept.lock().clone();
            if let Some(name) = failing.filter(|n| concepts.iter().any(|c| &c.name == n)) {
                return Err(KbError::Connection(format!("insert of '{}' rejected", name)));
            }
        }
        let mut tables = self.tables.write();
        for concept in concepts {
            if tables.concepts.iter().any(|c| c.id == concept.id) {
                return Err(KbError::Validation(format!("concept {} already exists", concept.id)));
            }
        }
        tables.concepts.extend(concepts.iter().cloned());
        Ok(())
    }

    async fn create_relationships(&self, relationships: &[ConceptRelationship]) -> Result<()> {
        let mut tables = self.tables.write();
        let known: HashSet<Uuid> = tables.concepts.iter().map(|c| c.id).collect();
        for rel in relationships {
            for endpoint in [rel.source_concept_id, rel.target_concept_id] {
                if !known.contains(&endpoint) {
                    return Err(KbError::Validation(format!(
                        "relationship {} references unknown concept {}",
                        rel.id, endpoint
                    )));
                }
            }
        }
        tables.relationships.extend(relationships.iter().cloned());
        Ok(())
    }

    async fn link_chunk_concepts(&self, links: &[ChunkConcept]) -> Result<()> {
        let mut tables = self.tables.write();
        for link in links {
            if !tables.chunk_concepts.contains(link) {
                tables.chunk_concepts.push(*link);
            }
        }
        Ok(())
    }

    async fn concept_ids_for_chunks(&self, chunk_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        #[cfg(test)]
        if self.faults.chunk_concepts.load(Ordering::SeqCst) {
            return Err(KbError::Connection("chunk_concepts unavailable".to_string()));
        }
        let wanted: HashSet<&Uuid> = chunk_ids.iter().collect();
        let tables = self.tables.read();
        let mut out: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for link in tables.chunk_concepts.iter().filter(|l| wanted.contains(&l.chunk_id)) {
            out.entry(link.chunk_id).or_default().push(link.concept_id);
        }
        Ok(out)
    }

    async fn merge_concepts(&self, keep: Uuid, merged: &[Uuid]) -> Result<()> {
        #[cfg(test)]
        pause(&self.faults.write_delay_ms).await;
        let mut tables = self.tables.write();
        let Some(keep_idx) = tables.concepts.iter().position(|c| c.id == keep) else {
            return Err(KbError::NotFound { kind: "concept", id: keep });
        };
        let merged: HashSet<Uuid> = merged.iter().copied().filter(|id| *id != keep).collect();

        let mut absorbed = Vec::new();
        for c in tables.concepts.iter().filter(|c| merged.contains(&c.id)) {
            absorbed.push(c.name.clone());
            absorbed.extend(c.aliases.iter().cloned());
        }
        let target = &mut tables.concepts[keep_idx];
        for alias in absorbed {
            if alias != target.name && !target.aliases.contains(&alias) {
                target.aliases.push(alias);
            }
        }
        tables.concepts.retain(|c| !merged.contains(&c.id));

        for rel in tables.relationships.iter_mut() {
            if merged.contains(&rel.source_concept_id) {
                rel.source_concept_id = keep;
            }
            if merged.contains(&rel.target_concept_id) {
                rel.target_concept_id = keep;
            }
        }
        let mut seen = HashSet::new();
        tables.relationships.retain(|r| {
            !r.is_self_loop()
                && seen.insert((r.source_concept_id, r.target_concept_id, r.relationship_type))
        });

        for link in tables.chunk_concepts.iter_mut() {
            if merged.contains(&link.concept_id) {
                link.concept_id = keep;
            }
        }
        let mut seen = HashSet::new();
        tables.chunk_concepts.retain(|l| seen.insert(*l));

        debug!("Merged {} concepts into {}", merged.len(), keep);
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn search_candidates(&self, query: &CandidateQuery) -> Result<CandidateSet> {
        #[cfg(test)]
        let vector_down = self.faults.vector_search.load(Ordering::SeqCst);
        #[cfg(not(test))]
        let vector_down = false;

        let tables = self.tables.read();
        let eligible: Vec<&Chunk> = tables
            .chunks
            .iter()
            .filter(|c| match (query.source_type, tables.sources.get(&c.source_id)) {
                (_, None) => false,
                (Some(t), Some(s)) => s.source_type == t,
                (None, Some(_)) => true,
            })
            .collect();

        let lexical = bm25_scores(&eligible, query);
        let mut lexical_hits: Vec<(&Chunk, f64)> = eligible
            .iter()
            .filter_map(|c| lexical.get(&c.id).map(|s| (*c, *s)))
            .collect();
        lexical_hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.id.cmp(&b.0.id)));
        lexical_hits.truncate(query.limit);

        let mut picked: Vec<&Chunk> = lexical_hits.iter().map(|(c, _)| *c).collect();
        let mut vector_error = None;
        if query.embedding.is_some() && vector_down {
            vector_error = Some("vector index unavailable".to_string());
        } else if let Some(embedding) = &query.embedding {
            let mut vector_hits: Vec<(&Chunk, f64)> = eligible
                .iter()
                .filter_map(|c| c.embedding.as_ref().map(|e| (*c, raw_cosine(embedding, e))))
                .collect();
            vector_hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.id.cmp(&b.0.id)));
            for (chunk, _) in vector_hits.into_iter().take(query.limit) {
                if !picked.iter().any(|c| c.id == chunk.id) {
                    picked.push(chunk);
                }
            }
        }

        let candidates = picked
            .into_iter()
            .filter_map(|chunk| {
                tables.sources.get(&chunk.source_id).map(|source| Candidate {
                    chunk: chunk.clone(),
                    source: source.clone(),
                    lexical_rank: lexical.get(&chunk.id).copied().unwrap_or(0.0),
                })
            })
            .collect();
        Ok(CandidateSet {
            candidates,
            vector_error,
        })
    }
}

#[async_trait]
impl SourceStore for InMemoryStore {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self.tables.read().sources.values().cloned().collect();
        sources.sort_by_key(|s| s.id);
        Ok(sources)
    }

    async fn list_citations(&self) -> Result<Vec<Citation>> {
        Ok(self.tables.read().citations.clone())
    }

    async fn list_citation_edges(&self) -> Result<Vec<SourceCitation>> {
        Ok(self.tables.read().citation_edges.clone())
    }

    async fn upsert_citation_edge(&self, edge: &SourceCitation) -> Result<()> {
        let mut tables = self.tables.write();
        match tables
            .citation_edges
            .iter_mut()
            .find(|e| e.citing_source_id == edge.citing_source_id && e.citation_id == edge.citation_id)
        {
            Some(existing) => existing.cited_source_id = edge.cited_source_id,
            None => tables.citation_edges.push(edge.clone()),
        }
        Ok(())
    }

    async fn replace_citation_authority(&self, scores: &HashMap<Uuid, f64>) -> Result<()> {
        #[cfg(test)]
        if self.faults.authority_writes.load(Ordering::SeqCst) {
            return Err(KbError::Connection("authority write rejected".to_string()));
        }
        let mut tables = self.tables.write();
        for source in tables.sources.values_mut() {
            source.citation_authority = scores.get(&source.id).copied();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{ConceptType, RelationshipType, SourceType};
    use crate::db::store::WeightedTerm;

    #[tokio::test]
    async fn test_relationship_endpoints_must_exist() {
        let store = InMemoryStore::new();
        let a = Concept::new("endogeneity", ConceptType::Problem);
        store.create_concepts(&[a.clone()]).await.unwrap();

        let dangling = ConceptRelationship::new(a.id, Uuid::new_v4(), RelationshipType::Requires);
        let result = store.create_relationships(&[dangling]).await;
        assert!(matches!(result, Err(KbError::Validation(_))));
        assert!(store.list_relationships().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lexical_candidates_rank_by_term_frequency() {
        let store = InMemoryStore::new();
        let paper = store.add_source(Source::new(SourceType::Paper, "IV in practice", Some(2019)));
        let dense = store.add_chunk(Chunk::new(paper, "endogeneity endogeneity and bias"));
        let sparse = store.add_chunk(Chunk::new(paper, "endogeneity and some other words here"));
        store.add_chunk(Chunk::new(paper, "unrelated discussion of priors"));

        let query = CandidateQuery {
            terms: vec![WeightedTerm::new("endogeneity", 1.0)],
            limit: 10,
            ..Default::default()
        };
        let hits = store.search_candidates(&query).await.unwrap().candidates;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, dense);
        assert_eq!(hits[1].chunk.id, sparse);
        assert!(hits[0].lexical_rank > hits[1].lexical_rank);
    }

    #[tokio::test]
    async fn test_vector_failure_keeps_lexical_candidates() {
        let store = InMemoryStore::new();
        let paper = store.add_source(Source::new(SourceType::Paper, "Shift-share designs", Some(2020)));
        let lexical = store.add_chunk(Chunk::new(paper, "shift-share instruments"));
        let mut semantic = Chunk::new(paper, "bartik exposure weights");
        semantic.embedding = Some(vec![1.0, 0.0]);
        let semantic = store.add_chunk(semantic);

        let query = CandidateQuery {
            terms: vec![WeightedTerm::new("instruments", 1.0)],
            embedding: Some(vec![1.0, 0.0]),
            limit: 10,
            ..Default::default()
        };
        let both = store.search_candidates(&query).await.unwrap();
        assert!(both.vector_error.is_none());
        assert_eq!(both.len(), 2);
        assert_eq!(both.candidates[1].chunk.id, semantic);
        assert_eq!(both.candidates[1].lexical_rank, 0.0);

        store.fail_vector_search(true);
        let degraded = store.search_candidates(&query).await.unwrap();
        assert!(degraded.vector_error.is_some());
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded.candidates[0].chunk.id, lexical);
    }

    #[tokio::test]
    async fn test_source_type_filter() {
        let store = InMemoryStore::new();
        let paper = store.add_source(Source::new(SourceType::Paper, "A", None));
        let book = store.add_source(Source::new(SourceType::Textbook, "B", None));
        store.add_chunk(Chunk::new(paper, "lasso regularization"));
        let in_book = store.add_chunk(Chunk::new(book, "lasso penalty"));

        let query = CandidateQuery {
            terms: vec![WeightedTerm::new("lasso", 1.0)],
            source_type: Some(SourceType::Textbook),
            limit: 10,
            ..Default::default()
        };
        let hits = store.search_candidates(&query).await.unwrap().candidates;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, in_book);
    }

    #[tokio::test]
    async fn test_merge_repoints_links_and_aliases() {
        let store = InMemoryStore::new();
        let keep = Concept::new("instrumental variables", ConceptType::Method);
        let dup = Concept::new("IV", ConceptType::Method);
        let other = Concept::new("endogeneity", ConceptType::Problem);
        store
            .create_concepts(&[keep.clone(), dup.clone(), other.clone()])
            .await
            .unwrap();
        store
            .create_relationships(&[ConceptRelationship::new(dup.id, other.id, RelationshipType::Addresses)])
            .await
            .unwrap();
        let chunk = Uuid::new_v4();
        store
            .link_chunk_concepts(&[ChunkConcept { chunk_id: chunk, concept_id: dup.id }])
            .await
            .unwrap();

        store.merge_concepts(keep.id, &[dup.id]).await.unwrap();

        assert!(store.concept(dup.id).is_none());
        assert!(store.concept(keep.id).unwrap().aliases.contains(&"IV".to_string()));
        let rels = store.list_relationships().await.unwrap();
        assert_eq!(rels[0].source_concept_id, keep.id);
        let links = store.concept_ids_for_chunks(&[chunk]).await.unwrap();
        assert_eq!(links[&chunk], vec![keep.id]);
    }

    #[tokio::test]
    async fn test_authority_swap_resets_missing() {
        let store = InMemoryStore::new();
        let a = store.add_source(Source::new(SourceType::Paper, "A", None));
        let b = store.add_source(Source::new(SourceType::Paper, "B", None));
        store
            .replace_citation_authority(&HashMap::from([(a, 0.6), (b, 0.4)]))
            .await
            .unwrap();
        store
            .replace_citation_authority(&HashMap::from([(a, 1.0)]))
            .await
            .unwrap();
        assert_eq!(store.source(a).unwrap().citation_authority, Some(1.0));
        assert_eq!(store.source(b).unwrap().citation_authority, None);
    }
}
