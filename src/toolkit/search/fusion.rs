

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::{CacheStats, SearchCache};
use super::expander::{build_lexical_query, QueryExpander};
use super::models::{
    ScoreBreakdown, SearchRequest, SearchResponse, SearchResult, Signal, SignalReport, SignalStatus,
};
use super::query_concepts::{match_query_concepts, MAX_QUERY_CONCEPTS};
use crate::core::config::KbConfig;
use crate::core::context::{ContextPolicy, FusionWeights};
use crate::core::error::Result;
use crate::db::{Candidate, CandidateQuery, CandidateSet, SharedStore};
use crate::llm::{EmbeddingProvider, RerankProvider, SignalGuard};
use crate::toolkit::graph::GraphQueryEngine;
use crate::toolkit::scoring::{cosine_similarity, normalize_by_max};


#[derive(Debug, Clone)]
pub struct FusionSettings {
    pub candidate_multiplier: usize,
    pub rerank_top_k: usize,
    pub cache_size: usize,
    pub cache_ttl_secs: u64,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            candidate_multiplier: 2,
            rerank_top_k: 50,
            cache_size: 256,
            cache_ttl_secs: 300,
        }
    }
}

impl FusionSettings {
    pub fn from_config(config: &KbConfig) -> Self {
        Self {
            candidate_multiplier: config.candidate_multiplier.max(1),
            rerank_top_k: config.rerank_top_k,
            cache_size: config.search_cache_size,
            cache_ttl_secs: config.search_cache_ttl,
        }
    }
}


struct Scored {
    candidate: Candidate,
    scores: ScoreBreakdown,
    fused_rank: usize,
}

fn by_score_then_rank(a: &Scored, b: &Scored) -> std::cmp::Ordering {
    b.scores
        .ranking_score()
        .partial_cmp(&a.scores.ranking_score())
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.fused_rank.cmp(&b.fused_rank))
        .then(a.candidate.chunk.id.cmp(&b.candidate.chunk.id))
}

/// Hybrid retrieval: lexical, vector, graph and citation signals fused
/// under a context policy, optionally reranked by a cross-encoder.
pub struct FusionEngine {
    store: SharedStore,
    graph: Arc<GraphQueryEngine>,
    expander: Arc<QueryExpander>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn RerankProvider>>,
    guard: SignalGuard,
    policy: ContextPolicy,
    settings: FusionSettings,
    cache: SearchCache<SearchResponse>,
}

impl FusionEngine {
    pub fn new(
        store: SharedStore,
        graph: Arc<GraphQueryEngine>,
        expander: Arc<QueryExpander>,
        guard: SignalGuard,
        policy: ContextPolicy,
        settings: FusionSettings,
    ) -> Self {
        let cache = SearchCache::new(settings.cache_size, settings.cache_ttl_secs);
        Self {
            store,
            graph,
            expander,
            embedder: None,
            reranker: None,
            guard,
            policy,
            settings,
            cache,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn RerankProvider>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Drops cached responses after the corpus or authority changes.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        request.validate()?;
        let key = SearchCache::<SearchResponse>::make_key(request);
        if let Some(hit) = self.cache.get(&key) {
            debug!("Search cache hit for '{}'", crate::safe_truncate(&request.query, 100));
            return Ok(hit);
        }

        let start = Instant::now();
        let mut signals = SignalReport::default();

        let expanded = if request.use_expand && !request.query.trim().is_empty() {
            Some(self.expander.expand(&request.query).await)
        } else {
            None
        };
        signals.graph_truncated = expanded.as_ref().is_some_and(|e| e.graph_truncated);
        let terms = match &expanded {
            Some(e) => e.lexical_query.clone(),
            None => build_lexical_query(&request.query, &[]),
        };

        let query_embedding = self.query_embedding(request, &mut signals).await;
        let query_concepts = self.query_concepts(request, &mut signals).await;

        let CandidateSet {
            candidates,
            vector_error,
        } = self
            .store
            .search_candidates(&CandidateQuery {
                terms,
                embedding: query_embedding.clone(),
                source_type: request.source_filter,
                limit: request
                    .limit
                    .saturating_mul(self.settings.candidate_multiplier.max(1)),
            })
            .await?;
        debug!("Fusing {} candidates", candidates.len());

        let query_embedding = match vector_error {
            Some(reason) => {
                warn!("Vector search failed, ranking without it: {}", reason);
                signals.vector = SignalStatus::Unavailable(reason);
                None
            }
            None => query_embedding,
        };
        let lexical = normalize_by_max(&candidates.iter().map(|c| c.lexical_rank).collect::<Vec<_>>());
        let vector: Vec<Signal> = candidates
            .iter()
            .map(|c| match (&query_embedding, &c.chunk.embedding) {
                (Some(q), Some(e)) => Signal::Score(cosine_similarity(q, e)),
                _ => Signal::Unavailable,
            })
            .collect();
        let graph = self
            .graph_signals(request, &query_concepts, &candidates, &mut signals)
            .await;
        let citation = citation_signals(request.use_graph, &candidates, &mut signals);

        let weights = FusionWeights::resolve(
            self.policy.weights_for(request.context_type),
            request.graph_weight,
            request.use_graph,
        );

        let mut scored: Vec<Scored> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| {
                let lexical = Signal::Score(lexical[i]);
                let combined = weights.lexical * lexical.value()
                    + weights.vector * vector[i].value()
                    + weights.graph * graph[i].value()
                    + weights.citation * citation[i].value();
                Scored {
                    candidate,
                    scores: ScoreBreakdown {
                        lexical,
                        vector: vector[i],
                        graph: graph[i],
                        citation: citation[i],
                        rerank: None,
                        combined,
                    },
                    fused_rank: 0,
                }
            })
            .collect();
        scored.sort_by(by_score_then_rank);
        for (i, s) in scored.iter_mut().enumerate() {
            s.fused_rank = i + 1;
        }

        if request.use_rerank {
            self.rerank(&request.query, &mut scored, request.limit, &mut signals).await;
        }

        scored.truncate(request.limit);
        let results: Vec<SearchResult> = scored
            .into_iter()
            .enumerate()
            .map(|(i, s)| SearchResult {
                source: s.candidate.source,
                chunk: s.candidate.chunk,
                scores: s.scores,
                rank: i + 1,
                fused_rank: s.fused_rank,
            })
            .collect();

        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "Search '{}' ({}): {} results in {:.2}ms, degraded={}",
            crate::safe_truncate(&request.query, 100),
            request.context_type,
            results.len(),
            execution_time_ms,
            signals.is_degraded()
        );

        let response = SearchResponse {
            query: request.query.clone(),
            expanded_query: expanded,
            results,
            signals,
            query_concepts,
            execution_time_ms,
        };
        if !response.signals.is_degraded() {
            self.cache.set(&key, response.clone());
        }
        Ok(response)
    }

    async fn query_embedding(&self, request: &SearchRequest, signals: &mut SignalReport) -> Option<Vec<f32>> {
        if let Some(embedding) = &request.query_embedding {
            signals.vector = SignalStatus::Active;
            return Some(embedding.clone());
        }
        let embedder = self.embedder.as_ref()?;
        if request.query.trim().is_empty() {
            return None;
        }
        match self.guard.call(embedder.embed(&request.query)).await {
            Ok(embedding) => {
                signals.vector = SignalStatus::Active;
                Some(embedding)
            }
            Err(e) => {
                warn!("Vector signal unavailable ({}): {}", embedder.provider_name(), e);
                signals.vector = SignalStatus::Unavailable(e.to_string());
                None
            }
        }
    }

    async fn query_concepts(&self, request: &SearchRequest, signals: &mut SignalReport) -> Vec<Uuid> {
        if !request.use_graph {
            return Vec::new();
        }
        match self.graph.graph().await {
            Ok(graph) => {
                signals.graph = SignalStatus::Active;
                match_query_concepts(&request.query, graph.concepts(), MAX_QUERY_CONCEPTS)
            }
            Err(e) => {
                warn!("Graph signal unavailable: {}", e);
                signals.graph = SignalStatus::Unavailable(e.to_string());
                Vec::new()
            }
        }
    }

    async fn graph_signals(
        &self,
        request: &SearchRequest,
        query_concepts: &[Uuid],
        candidates: &[Candidate],
        signals: &mut SignalReport,
    ) -> Vec<Signal> {
        if !request.use_graph || signals.graph.is_degraded() {
            return vec![Signal::Unavailable; candidates.len()];
        }
        if query_concepts.is_empty() || candidates.is_empty() {
            return vec![Signal::Score(0.0); candidates.len()];
        }

        let chunk_ids: Vec<Uuid> = candidates.iter().map(|c| c.chunk.id).collect();
        let links: HashMap<Uuid, Vec<Uuid>> = match self.store.concept_ids_for_chunks(&chunk_ids).await {
            Ok(links) => links,
            Err(e) => {
                warn!("Graph signal unavailable, chunk concepts failed: {}", e);
                signals.graph = SignalStatus::Unavailable(e.to_string());
                return vec![Signal::Unavailable; candidates.len()];
            }
        };

        let mut out = Vec::with_capacity(candidates.len());
        let mut truncated = 0usize;
        for candidate in candidates {
            let chunk_concepts = links.get(&candidate.chunk.id).map(Vec::as_slice).unwrap_or(&[]);
            match self
                .graph
                .graph_score(query_concepts, chunk_concepts, request.max_hops)
                .await
            {
                Ok(score) => {
                    truncated += score.truncated as usize;
                    out.push(Signal::Score(score.score));
                }
                Err(e) => {
                    warn!("Graph score for chunk {} failed: {}", candidate.chunk.id, e);
                    signals.graph = SignalStatus::Unavailable(e.to_string());
                    out.push(Signal::Unavailable);
                }
            }
        }
        if truncated > 0 {
            warn!("Graph scoring hit the traversal budget for {} candidates", truncated);
            signals.graph_truncated = true;
        }
        out
    }

    /// Cross-encoder scores replace the fused score inside the rerank
    /// window. Any failure keeps the fused order untouched.
    async fn rerank(&self, query: &str, scored: &mut Vec<Scored>, limit: usize, signals: &mut SignalReport) {
        let Some(reranker) = &self.reranker else {
            signals.rerank = SignalStatus::Unavailable("no rerank provider configured".to_string());
            return;
        };
        let window = limit.max(self.settings.rerank_top_k).min(scored.len());
        if window == 0 {
            signals.rerank = SignalStatus::Active;
            return;
        }
        let documents: Vec<String> = scored[..window]
            .iter()
            .map(|s| s.candidate.chunk.content.clone())
            .collect();

        let scores = match self.guard.call(reranker.rerank(query, &documents)).await {
            Ok(scores) if scores.len() == window && scores.iter().all(|s| s.is_finite()) => scores,
            Ok(scores) => {
                warn!(
                    "Rerank returned {} usable scores for {} documents, keeping fused order",
                    scores.len(),
                    window
                );
                signals.rerank = SignalStatus::Unavailable(format!(
                    "expected {} scores, got {}",
                    window,
                    scores.len()
                ));
                return;
            }
            Err(e) => {
                warn!("Rerank failed ({}), keeping fused order: {}", reranker.provider_name(), e);
                signals.rerank = SignalStatus::Unavailable(e.to_string());
                return;
            }
        };

        for (s, score) in scored[..window].iter_mut().zip(scores) {
            s.scores.rerank = Some(score);
        }
        scored[..window].sort_by(by_score_then_rank);
        signals.rerank = SignalStatus::Active;
    }
}

/// Authority normalized by the candidate-set maximum. Only folded in with
/// graph boosting.
fn citation_signals(use_graph: bool, candidates: &[Candidate], signals: &mut SignalReport) -> Vec<Signal> {
    if !use_graph {
        return vec![Signal::Unavailable; candidates.len()];
    }
    let max = candidates
        .iter()
        .filter_map(|c| c.source.citation_authority)
        .fold(None, |acc: Option<f64>, a| Some(acc.map_or(a, |m| m.max(a))));
    let Some(max) = max else {
        signals.citation = SignalStatus::Unavailable("citation authority not computed".to_string());
        return vec![Signal::Unavailable; candidates.len()];
    };
    signals.citation = SignalStatus::Active;
    candidates
        .iter()
        .map(|c| match c.source.citation_authority {
            Some(a) if max > 0.0 => Signal::Score((a / max).clamp(0.0, 1.0)),
            Some(_) => Signal::Score(0.0),
            None => Signal::Unavailable,
        })
        .collect()
}
