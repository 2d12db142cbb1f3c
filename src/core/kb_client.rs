

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::config::KbConfig;
use super::error::Result;
use super::gate::{BatchStatus, ExclusiveGate};
use super::models::{Concept, Source, SourceType};
use crate::db::{HelixStore, SharedStore};
use crate::llm::{EmbeddingProvider, ExpansionProvider, ExtractionProvider, ProviderFactory, RerankProvider};
use crate::toolkit::citation::{
    validate_damping, AuthorityReport, CitationAuthority, CitationGraphStats, CitationStats, CitedSource,
    CorpusCitationSummary,
};
use crate::toolkit::dedup::{ConceptMatch, ConceptRegistry, DedupReport, Deduplicator};
use crate::toolkit::graph::{GraphQueryEngine, Neighborhood, PathOutcome};
use crate::toolkit::ingest::{ExtractionBatch, IngestReport, IngestionPipeline};
use crate::toolkit::search::{
    ExpandedQuery, FusionEngine, FusionSettings, QueryExpander, SearchRequest, SearchResponse, SynonymMap,
};

/// Optional external signal providers.
#[derive(Clone, Default)]
pub struct Providers {
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub reranker: Option<Arc<dyn RerankProvider>>,
    pub expansion: Option<Arc<dyn ExpansionProvider>>,
}

/// Entry point to the ranking core. Owns the store handle, the concept
/// registry and the batch gate; nothing here is global.
pub struct KnowledgeBase {
    config: KbConfig,
    store: SharedStore,
    graph: Arc<GraphQueryEngine>,
    expander: Arc<QueryExpander>,
    fusion: FusionEngine,
    deduplicator: Arc<Deduplicator>,
    citations: CitationAuthority,
    ingestion: IngestionPipeline,
    gate: ExclusiveGate,
}

impl KnowledgeBase {
    pub fn new(
        config: KbConfig,
        store: SharedStore,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        reranker: Option<Arc<dyn RerankProvider>>,
    ) -> Result<Self> {
        Self::with_providers(
            config,
            store,
            Providers {
                embedder,
                reranker,
                expansion: None,
            },
        )
    }

    /// Fails with `KbError::Config` when the config does not validate.
    pub fn with_providers(config: KbConfig, store: SharedStore, providers: Providers) -> Result<Self> {
        config.validate()?;
        let Providers {
            embedder,
            reranker,
            expansion,
        } = providers;
        let guard = ProviderFactory::signal_guard(&config);
        let graph = Arc::new(GraphQueryEngine::new(
            store.clone(),
            config.traversal_max_steps,
            Duration::from_millis(config.traversal_timeout_ms),
        ));

        let synonyms = match &config.synonyms_path {
            Some(path) => SynonymMap::from_json_file(path)?,
            None => SynonymMap::builtin(),
        };
        let mut expander = QueryExpander::new(synonyms, config.expansion_max_terms)
            .with_graph(graph.clone(), config.expansion_graph_hops);
        if let Some(provider) = expansion {
            expander = expander.with_llm(provider, guard.clone(), config.expansion_llm_terms);
        }
        let expander = Arc::new(expander);

        let mut fusion = FusionEngine::new(
            store.clone(),
            graph.clone(),
            expander.clone(),
            guard.clone(),
            config.context_weights.clone(),
            FusionSettings::from_config(&config),
        );
        if let Some(embedder) = &embedder {
            fusion = fusion.with_embedder(embedder.clone());
        }
        if let Some(reranker) = reranker {
            fusion = fusion.with_reranker(reranker);
        }

        let deduplicator = Arc::new(Deduplicator::new(
            Arc::new(tokio::sync::Mutex::new(ConceptRegistry::new())),
            embedder,
            guard.clone(),
        ));
        let citations = CitationAuthority::new(store.clone(), config.citation_title_threshold);
        let ingestion = IngestionPipeline::new(
            store.clone(),
            deduplicator.clone(),
            graph.clone(),
            guard,
            config.min_confidence,
        );

        Ok(Self {
            config,
            store,
            graph,
            expander,
            fusion,
            deduplicator,
            citations,
            ingestion,
            gate: ExclusiveGate::new(),
        })
    }

    /// HelixDB-backed instance with providers chosen from config.
    pub fn from_config(config: KbConfig) -> Result<Self> {
        let store: SharedStore = Arc::new(HelixStore::from_config(&config));
        let providers = Providers {
            embedder: ProviderFactory::embedding_from_config(&config)?,
            reranker: ProviderFactory::rerank_from_config(&config)?,
            expansion: ProviderFactory::expansion_from_config(&config)?,
        };
        info!(
            "Knowledge base configured: helix={}, embeddings={}, rerank={}, llm_expansion={}",
            config.base_url(),
            config.embedding_provider,
            config.rerank_enabled,
            config.expansion_llm_enabled
        );
        Self::with_providers(config, store, providers)
    }

    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Seeds the dedup registry from stored concepts.
    pub async fn load_registry(&self) -> Result<usize> {
        let loaded = self.deduplicator.load_from_store(&self.store).await?;
        info!("Concept registry loaded with {} concepts", loaded);
        Ok(loaded)
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.fusion.search(request).await
    }

    pub async fn get_neighborhood(&self, concept_id: Uuid, hops: usize, limit: usize) -> Result<Option<Neighborhood>> {
        self.graph.get_neighborhood(concept_id, hops, limit).await
    }

    pub async fn find_shortest_path(&self, a: Uuid, b: Uuid, max_hops: usize) -> Result<PathOutcome> {
        self.graph.find_shortest_path(a, b, max_hops).await
    }

    pub async fn compute_graph_score(
        &self,
        query_concepts: &[Uuid],
        chunk_concepts: &[Uuid],
        max_hops: usize,
    ) -> Result<f64> {
        self.graph
            .compute_graph_score(query_concepts, chunk_concepts, max_hops)
            .await
    }

    pub async fn expand_query(&self, text: &str) -> ExpandedQuery {
        self.expander.expand(text).await
    }

    pub async fn deduplicate_batch(&self, concepts: Vec<Concept>) -> Vec<ConceptMatch> {
        self.deduplicator.deduplicate_batch(concepts).await
    }

    pub async fn ingest(&self, batch: ExtractionBatch) -> IngestReport {
        let report = self.ingestion.ingest(batch).await;
        self.fusion.invalidate_cache();
        report
    }

    pub async fn ingest_text(
        &self,
        chunk_id: Uuid,
        text: &str,
        provider: &dyn ExtractionProvider,
    ) -> Result<IngestReport> {
        let report = self.ingestion.ingest_text(chunk_id, text, provider).await;
        self.fusion.invalidate_cache();
        report
    }

    /// Rejected with `ConcurrencyConflict` while another batch job runs.
    pub async fn build_citation_graph(&self) -> Result<CitationGraphStats> {
        let _permit = self.gate.try_enter("build_citation_graph")?;
        Ok(self.citations.build_citation_graph().await)
    }

    /// Rejected with `Validation` for damping outside (0, 1) and with
    /// `ConcurrencyConflict` while another batch job runs.
    pub async fn compute_pagerank_authority(&self, iterations: usize, damping: f64) -> Result<AuthorityReport> {
        validate_damping(damping)?;
        let _permit = self.gate.try_enter("compute_pagerank_authority")?;
        let report = self.citations.compute_pagerank_authority(iterations, damping).await;
        if report.status == BatchStatus::Completed {
            self.fusion.invalidate_cache();
        }
        Ok(report)
    }

    /// Rejected with `ConcurrencyConflict` while another batch job runs.
    pub async fn deduplicate_corpus(&self) -> Result<DedupReport> {
        let _permit = self.gate.try_enter("deduplicate_corpus")?;
        let report = self.deduplicator.deduplicate_corpus(&self.store).await;
        if report.merged > 0 {
            self.graph.invalidate();
            self.fusion.invalidate_cache();
        }
        Ok(report)
    }

    pub async fn get_citing_sources(
        &self,
        source_id: Uuid,
        source_type: Option<SourceType>,
        limit: usize,
    ) -> Result<Vec<CitedSource>> {
        self.citations.get_citing_sources(source_id, source_type, limit).await
    }

    pub async fn get_cited_sources(
        &self,
        source_id: Uuid,
        source_type: Option<SourceType>,
        limit: usize,
    ) -> Result<Vec<Source>> {
        self.citations.get_cited_sources(source_id, source_type, limit).await
    }

    pub async fn get_most_cited_sources(&self, source_type: Option<SourceType>, limit: usize) -> Result<Vec<CitedSource>> {
        self.citations.get_most_cited_sources(source_type, limit).await
    }

    pub async fn get_citation_stats(&self, source_id: Uuid) -> Result<CitationStats> {
        self.citations.citation_stats(source_id).await
    }

    pub async fn corpus_citation_summary(&self) -> Result<CorpusCitationSummary> {
        self.citations.corpus_citation_summary().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ContextType;
    use crate::core::error::KbError;
    use crate::core::models::{Chunk, Citation, ConceptType, RelationshipType};
    use crate::db::{ConceptStore, InMemoryStore};
    use crate::llm::SignalError;
    use crate::toolkit::ingest::{RawConcept, RawRelationship};
    use crate::toolkit::search::ExpansionStrategy;

    fn kb() -> (KnowledgeBase, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let kb = KnowledgeBase::new(KbConfig::default(), store.clone(), None, None).unwrap();
        (kb, store)
    }

    #[tokio::test]
    async fn test_neighborhood_of_three() {
        let (kb, _store) = kb();
        let chunk = Uuid::new_v4();
        let report = kb
            .ingest(ExtractionBatch {
                chunk_id: chunk,
                concepts: vec![
                    RawConcept::new("instrumental variables", "method"),
                    RawConcept::new("endogeneity", "problem"),
                    RawConcept::new("exclusion restriction", "assumption"),
                    RawConcept::new("two-stage least squares", "method"),
                    RawConcept::new("weak instruments", "problem"),
                ],
                relationships: vec![
                    RawRelationship::new("instrumental variables", "endogeneity", "ADDRESSES"),
                    RawRelationship::new("instrumental variables", "exclusion restriction", "REQUIRES"),
                    RawRelationship::new("two-stage least squares", "instrumental variables", "SPECIALIZES"),
                    RawRelationship::new("two-stage least squares", "weak instruments", "ADDRESSES"),
                ],
            })
            .await;
        assert_eq!(report.relationships, 4);

        let matches = kb
            .deduplicate_batch(vec![Concept::new("IV", ConceptType::Method)])
            .await;
        let iv = matches[0].matched_concept_id.unwrap();

        let hood = kb.get_neighborhood(iv, 1, 50).await.unwrap().unwrap();
        assert_eq!(hood.concepts.len(), 3);
        assert_eq!(hood.relationships.len(), 3);
        assert!(!hood.truncated);
        assert!(hood.relationships.iter().all(|r| r.source_concept_id == iv || r.target_concept_id == iv));

        assert!(kb.get_neighborhood(Uuid::new_v4(), 1, 50).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_after_ingest_uses_graph() {
        let (kb, store) = kb();
        let source = store.add_source(Source::new(SourceType::Paper, "Endogeneity in Practice", Some(2019)));
        let linked = store.add_chunk(Chunk::new(source, "endogeneity bias corrected using instrumental variables"));
        let plain = store.add_chunk(Chunk::new(source, "endogeneity bias discussed for labor markets"));

        kb.ingest(ExtractionBatch {
            chunk_id: linked,
            concepts: vec![
                RawConcept::new("instrumental variables", "method"),
                RawConcept::new("endogeneity", "problem"),
            ],
            relationships: vec![RawRelationship::new("instrumental variables", "endogeneity", "ADDRESSES")],
        })
        .await;

        let request = SearchRequest::new("endogeneity")
            .with_context(ContextType::Auditing)
            .with_graph(0.2);
        let response = kb.search(&request).await.unwrap();
        let ids: Vec<Uuid> = response.results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids[0], linked);
        assert!(ids.contains(&plain));
    }

    #[tokio::test]
    async fn test_expand_iv_uses_synonyms() {
        let (kb, _store) = kb();
        let expanded = kb.expand_query("IV").await;
        assert!(expanded.expanded_text.contains("IV"));
        assert!(expanded.expanded_text.contains("instrumental variables"));
        assert!(expanded.terms.iter().all(|t| t.strategy == ExpansionStrategy::Synonym));
    }

    #[tokio::test]
    async fn test_batch_jobs_are_exclusive() {
        let (kb, store) = kb();
        let a = store.add_source(Source::new(SourceType::Paper, "Matching Estimators", Some(2006)));
        let b = store.add_source(Source::new(SourceType::Textbook, "Causal Inference for Statistics", Some(2015)));
        store.add_citation(Citation::new(a, "Causal Inference for Statistics", Some(2015)));

        let held = kb.gate.try_enter("deduplicate_corpus").unwrap();
        match kb.compute_pagerank_authority(20, 0.85).await {
            Err(KbError::ConcurrencyConflict(running)) => assert_eq!(running, "deduplicate_corpus"),
            other => panic!("expected conflict, got {:?}", other.map(|r| r.status)),
        }
        assert!(kb.build_citation_graph().await.is_err());
        drop(held);

        let stats = kb.build_citation_graph().await.unwrap();
        assert_eq!(stats.matched, 1);
        let report = kb.compute_pagerank_authority(20, 0.85).await.unwrap();
        assert_eq!(report.status, BatchStatus::Completed);
        assert!(report.scores[&b] > report.scores[&a]);

        let most = kb.get_most_cited_sources(None, 5).await.unwrap();
        assert_eq!(most[0].source.id, b);
    }

    #[tokio::test]
    async fn test_corpus_dedup_merges_duplicates() {
        let (kb, store) = kb();
        let first = Concept::new("Regression Discontinuity", ConceptType::Method);
        let second = Concept::new("regression  discontinuity", ConceptType::Method);
        store.create_concepts(&[first.clone(), second.clone()]).await.unwrap();

        let report = kb.deduplicate_corpus().await.unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(store.concept_count(), 1);
        assert_eq!(kb.load_registry().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shortest_path_and_graph_score() {
        let (kb, store) = kb();
        let a = Concept::new("propensity score", ConceptType::Method);
        let b = Concept::new("matching", ConceptType::Method);
        let c = Concept::new("unconfoundedness", ConceptType::Assumption);
        store.create_concepts(&[a.clone(), b.clone(), c.clone()]).await.unwrap();
        store
            .create_relationships(&[
                crate::core::models::ConceptRelationship::new(b.id, a.id, RelationshipType::Uses),
                crate::core::models::ConceptRelationship::new(a.id, c.id, RelationshipType::Requires),
            ])
            .await
            .unwrap();

        let path = kb.find_shortest_path(b.id, c.id, 3).await.unwrap();
        assert_eq!(path.path().unwrap().hops(), 2);
        assert_eq!(kb.compute_graph_score(&[b.id], &[c.id], 3).await.unwrap(), 0.5);
        assert_eq!(kb.compute_graph_score(&[], &[c.id], 3).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_ingest_waits_for_corpus_dedup() {
        let (kb, store) = kb();
        let mut keeper = Concept::new("Instrumental Variables", ConceptType::Method);
        keeper.validated = true;
        let dup = Concept::new("IV", ConceptType::Method);
        store.create_concepts(&[keeper.clone(), dup.clone()]).await.unwrap();
        kb.deduplicator.register_known_concept("IV", dup.id).await;
        store.delay_reads(50);

        let chunk = Uuid::new_v4();
        let (report, ingested) = tokio::join!(kb.deduplicate_corpus(), async {
            tokio::time::sleep(Duration::from_millis(70)).await;
            kb.ingest(ExtractionBatch {
                chunk_id: chunk,
                concepts: vec![RawConcept::new("IV", "method")],
                relationships: Vec::new(),
            })
            .await
        });
        assert_eq!(report.unwrap().merged, 1);
        assert_eq!(ingested.matched_concepts, 1);

        let links = store.concept_ids_for_chunks(&[chunk]).await.unwrap();
        assert_eq!(links[&chunk], vec![keeper.id]);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = KbConfig::default();
        config.pagerank_damping = 1.2;
        let store: SharedStore = Arc::new(InMemoryStore::new());
        assert!(matches!(
            KnowledgeBase::new(config, store, None, None),
            Err(KbError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_pagerank_rejects_bad_damping() {
        let (kb, store) = kb();
        store.add_source(Source::new(SourceType::Paper, "Mostly Harmless Econometrics", Some(2009)));
        for damping in [0.0, 1.0, f64::NAN] {
            assert!(matches!(
                kb.compute_pagerank_authority(20, damping).await,
                Err(KbError::Validation(_))
            ));
        }
        assert!(kb.compute_pagerank_authority(20, 0.85).await.is_ok());
    }

    #[tokio::test]
    async fn test_citation_stats_through_kb() {
        let (kb, store) = kb();
        let paper = store.add_source(Source::new(SourceType::Paper, "Matching Estimators", Some(2006)));
        let book = store.add_source(Source::new(SourceType::Textbook, "Causal Inference for Statistics", Some(2015)));
        store.add_citation(Citation::new(paper, "Causal Inference for Statistics", Some(2015)));
        kb.build_citation_graph().await.unwrap();

        let stats = kb.get_citation_stats(book).await.unwrap();
        assert_eq!((stats.cited_by_count, stats.cited_by_papers), (1, 1));
        assert_eq!(stats.citation_authority, 0.0);
        assert!(kb.get_citation_stats(Uuid::new_v4()).await.is_err());
    }

    struct FixedExpansion;

    #[async_trait::async_trait]
    impl ExpansionProvider for FixedExpansion {
        async fn expand(&self, _query: &str, _max_terms: usize) -> std::result::Result<Vec<String>, SignalError> {
            Ok(vec!["exclusion restriction".to_string()])
        }

        async fn available(&self) -> bool {
            true
        }

        fn provider_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_llm_expansion_wired_through_providers() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let providers = Providers {
            expansion: Some(Arc::new(FixedExpansion)),
            ..Providers::default()
        };
        let kb = KnowledgeBase::with_providers(KbConfig::default(), store, providers).unwrap();
        let expanded = kb.expand_query("weak instruments").await;
        assert_eq!(expanded.terms_from(ExpansionStrategy::Llm), vec!["exclusion restriction"]);
    }
}
