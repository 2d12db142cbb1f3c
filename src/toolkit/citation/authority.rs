

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::matcher::CitationMatcher;
use super::pagerank::pagerank;
use crate::core::error::{KbError, Result};
use crate::core::gate::BatchStatus;
use crate::core::models::{Source, SourceCitation, SourceType};
use crate::db::SharedStore;

const PROGRESS_EVERY: usize = 500;


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationGraphStats {
    pub status: BatchStatus,
    pub total_processed: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Keyed "citing→cited" by source type.
    pub by_type: BTreeMap<String, usize>,
}

impl CitationGraphStats {
    fn new(status: BatchStatus) -> Self {
        Self {
            status,
            total_processed: 0,
            matched: 0,
            unmatched: 0,
            skipped: 0,
            errors: 0,
            by_type: BTreeMap::new(),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityReport {
    pub status: BatchStatus,
    pub sources: usize,
    pub iterations: usize,
    pub damping: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub teleport_floor: f64,
    #[serde(skip)]
    pub scores: HashMap<Uuid, f64>,
}

impl AuthorityReport {
    fn empty(status: BatchStatus, iterations: usize, damping: f64) -> Self {
        Self {
            status,
            sources: 0,
            iterations,
            damping,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            teleport_floor: 0.0,
            scores: HashMap::new(),
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitedSource {
    pub source: Source,
    pub count: usize,
}


#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusCitationSummary {
    pub total_citations: usize,
    pub total_edges: usize,
    pub internal_edges: usize,
    pub external_edges: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// Per-source citation counts, distinct sources on each side, split by
/// source type. Only internal (matched) edges count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationStats {
    pub cited_by_count: usize,
    pub cited_by_papers: usize,
    pub cited_by_textbooks: usize,
    pub cites_count: usize,
    pub cites_papers: usize,
    pub cites_textbooks: usize,
    pub citation_authority: f64,
}

/// Damping must lie strictly inside (0, 1).
pub fn validate_damping(damping: f64) -> Result<()> {
    if damping.is_finite() && damping > 0.0 && damping < 1.0 {
        Ok(())
    } else {
        Err(KbError::Validation(format!("damping must be in (0, 1), got {}", damping)))
    }
}

fn type_pair(citing: SourceType, cited: SourceType) -> String {
    format!("{}→{}", citing, cited)
}

fn authority_desc(a: &Source, b: &Source) -> std::cmp::Ordering {
    let a = a.citation_authority.unwrap_or(0.0);
    let b = b.citation_authority.unwrap_or(0.0);
    b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
}

/// Links citations to corpus sources and ranks sources by citation
/// authority. Batch entry points do not take the batch gate themselves.
pub struct CitationAuthority {
    store: SharedStore,
    title_threshold: f64,
}

impl CitationAuthority {
    pub fn new(store: SharedStore, title_threshold: f64) -> Self {
        Self {
            store,
            title_threshold,
        }
    }

    /// Matches every unlinked citation and records the edge. Individual
    /// failures are counted and skipped.
    pub async fn build_citation_graph(&self) -> CitationGraphStats {
        let loaded = futures::try_join!(
            self.store.list_sources(),
            self.store.list_citations(),
            self.store.list_citation_edges()
        );
        let (sources, citations, edges) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Citation graph build aborted: {}", e);
                let mut stats = CitationGraphStats::new(BatchStatus::Failed);
                stats.errors = 1;
                return stats;
            }
        };
        if citations.is_empty() {
            return CitationGraphStats::new(BatchStatus::Empty);
        }

        let existing: HashSet<(Uuid, Uuid)> =
            edges.iter().map(|e| (e.citing_source_id, e.citation_id)).collect();
        let types: HashMap<Uuid, SourceType> = sources.iter().map(|s| (s.id, s.source_type)).collect();
        let matcher = CitationMatcher::new(sources, self.title_threshold);

        info!("Building citation graph from {} citations", citations.len());
        let mut stats = CitationGraphStats::new(BatchStatus::Completed);
        for citation in &citations {
            stats.total_processed += 1;
            if stats.total_processed % PROGRESS_EVERY == 0 {
                info!("Citation progress: {}/{}", stats.total_processed, citations.len());
            }
            if existing.contains(&(citation.source_id, citation.id)) {
                stats.skipped += 1;
                continue;
            }
            let Some(citing_type) = types.get(&citation.source_id).copied() else {
                warn!("Citation {} belongs to unknown source {}", citation.id, citation.source_id);
                stats.errors += 1;
                continue;
            };

            let hit = matcher.match_citation(citation);
            let edge = SourceCitation {
                citing_source_id: citation.source_id,
                cited_source_id: hit.map(|h| h.source_id),
                citation_id: citation.id,
            };
            if let Err(e) = self.store.upsert_citation_edge(&edge).await {
                warn!("Failed to record citation {}: {}", citation.id, e);
                stats.errors += 1;
                continue;
            }

            match hit {
                Some(hit) => {
                    debug!("Citation {} matched {} via {:?}", citation.id, hit.source_id, hit.method);
                    stats.matched += 1;
                    if let Some(cited_type) = types.get(&hit.source_id) {
                        *stats.by_type.entry(type_pair(citing_type, *cited_type)).or_default() += 1;
                    }
                }
                None => stats.unmatched += 1,
            }
        }

        info!(
            "Citation graph built: processed={}, matched={}, unmatched={}, skipped={}, errors={}",
            stats.total_processed, stats.matched, stats.unmatched, stats.skipped, stats.errors
        );
        stats
    }

    /// Recomputes authority for every source and swaps the whole set in
    /// one write. On failure the previous scores stay in place.
    pub async fn compute_pagerank_authority(&self, iterations: usize, damping: f64) -> AuthorityReport {
        if let Err(e) = validate_damping(damping) {
            warn!("PageRank rejected: {}", e);
            return AuthorityReport::empty(BatchStatus::Failed, iterations, damping);
        }
        let loaded = futures::try_join!(self.store.list_sources(), self.store.list_citation_edges());
        let (sources, edges) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("PageRank aborted, citation graph unavailable: {}", e);
                return AuthorityReport::empty(BatchStatus::Failed, iterations, damping);
            }
        };
        if sources.is_empty() {
            info!("PageRank skipped: no sources");
            return AuthorityReport::empty(BatchStatus::Empty, iterations, damping);
        }

        let nodes: Vec<Uuid> = sources.iter().map(|s| s.id).collect();
        let pairs: Vec<(Uuid, Uuid)> = edges
            .iter()
            .filter_map(|e| e.cited_source_id.map(|cited| (e.citing_source_id, cited)))
            .collect();
        info!(
            "Computing PageRank: sources={}, internal_edges={}, iterations={}",
            nodes.len(),
            pairs.len(),
            iterations
        );
        let ranked = pagerank(&nodes, &pairs, iterations, damping);

        let values: Vec<f64> = ranked.scores.values().copied().collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;

        let status = match self.store.replace_citation_authority(&ranked.scores).await {
            Ok(()) => BatchStatus::Completed,
            Err(e) => {
                warn!("Authority write failed, keeping previous scores: {}", e);
                BatchStatus::Failed
            }
        };
        info!(
            "PageRank {:?}: sources={}, min={:.6}, max={:.6}, mean={:.6}",
            status,
            nodes.len(),
            min,
            max,
            mean
        );

        AuthorityReport {
            status,
            sources: nodes.len(),
            iterations,
            damping,
            min,
            max,
            mean,
            teleport_floor: ranked.teleport_floor,
            scores: ranked.scores,
        }
    }

    /// Corpus sources that cite `source_id`, most citations first.
    pub async fn get_citing_sources(
        &self,
        source_id: Uuid,
        source_type: Option<SourceType>,
        limit: usize,
    ) -> Result<Vec<CitedSource>> {
        let edges = self.store.list_citation_edges().await?;
        let counts = count_by(
            edges
                .iter()
                .filter(|e| e.cited_source_id == Some(source_id))
                .map(|e| e.citing_source_id),
        );
        self.rank_counted(counts, source_type, limit).await
    }

    /// Corpus sources cited by `source_id`, highest authority first.
    pub async fn get_cited_sources(
        &self,
        source_id: Uuid,
        source_type: Option<SourceType>,
        limit: usize,
    ) -> Result<Vec<Source>> {
        let (sources, edges) =
            futures::try_join!(self.store.list_sources(), self.store.list_citation_edges())?;
        let cited: HashSet<Uuid> = edges
            .iter()
            .filter(|e| e.citing_source_id == source_id)
            .filter_map(|e| e.cited_source_id)
            .collect();
        let mut out: Vec<Source> = sources
            .into_iter()
            .filter(|s| cited.contains(&s.id))
            .filter(|s| source_type.is_none_or(|t| s.source_type == t))
            .collect();
        out.sort_by(authority_desc);
        out.truncate(limit);
        Ok(out)
    }

    /// Sources with at least one internal citation, most cited first.
    pub async fn get_most_cited_sources(
        &self,
        source_type: Option<SourceType>,
        limit: usize,
    ) -> Result<Vec<CitedSource>> {
        let edges = self.store.list_citation_edges().await?;
        let counts = count_by(edges.iter().filter_map(|e| e.cited_source_id));
        self.rank_counted(counts, source_type, limit).await
    }

    pub async fn citation_stats(&self, source_id: Uuid) -> Result<CitationStats> {
        let (sources, edges) =
            futures::try_join!(self.store.list_sources(), self.store.list_citation_edges())?;
        let Some(source) = sources.iter().find(|s| s.id == source_id) else {
            return Err(KbError::NotFound { kind: "source", id: source_id });
        };
        let types: HashMap<Uuid, SourceType> = sources.iter().map(|s| (s.id, s.source_type)).collect();

        let citing: HashSet<Uuid> = edges
            .iter()
            .filter(|e| e.cited_source_id == Some(source_id))
            .map(|e| e.citing_source_id)
            .collect();
        let cited: HashSet<Uuid> = edges
            .iter()
            .filter(|e| e.citing_source_id == source_id)
            .filter_map(|e| e.cited_source_id)
            .collect();
        let of_type = |ids: &HashSet<Uuid>, t: SourceType| ids.iter().filter(|id| types.get(*id) == Some(&t)).count();

        Ok(CitationStats {
            cited_by_count: citing.len(),
            cited_by_papers: of_type(&citing, SourceType::Paper),
            cited_by_textbooks: of_type(&citing, SourceType::Textbook),
            cites_count: cited.len(),
            cites_papers: of_type(&cited, SourceType::Paper),
            cites_textbooks: of_type(&cited, SourceType::Textbook),
            citation_authority: source.citation_authority.unwrap_or(0.0),
        })
    }

    pub async fn corpus_citation_summary(&self) -> Result<CorpusCitationSummary> {
        let (sources, citations, edges) = futures::try_join!(
            self.store.list_sources(),
            self.store.list_citations(),
            self.store.list_citation_edges()
        )?;
        let types: HashMap<Uuid, SourceType> = sources.iter().map(|s| (s.id, s.source_type)).collect();

        let mut summary = CorpusCitationSummary {
            total_citations: citations.len(),
            total_edges: edges.len(),
            ..Default::default()
        };
        for edge in &edges {
            let Some(cited) = edge.cited_source_id else {
                summary.external_edges += 1;
                continue;
            };
            summary.internal_edges += 1;
            if let (Some(a), Some(b)) = (types.get(&edge.citing_source_id), types.get(&cited)) {
                *summary.by_type.entry(type_pair(*a, *b)).or_default() += 1;
            }
        }
        Ok(summary)
    }

    async fn rank_counted(
        &self,
        counts: HashMap<Uuid, usize>,
        source_type: Option<SourceType>,
        limit: usize,
    ) -> Result<Vec<CitedSource>> {
        let sources = self.store.list_sources().await?;
        let mut out: Vec<CitedSource> = sources
            .into_iter()
            .filter(|s| source_type.is_none_or(|t| s.source_type == t))
            .filter_map(|s| counts.get(&s.id).map(|&count| CitedSource { source: s, count }))
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| authority_desc(&a.source, &b.source)));
        out.truncate(limit);
        Ok(out)
    }
}

fn count_by(ids: impl Iterator<Item = Uuid>) -> HashMap<Uuid, usize> {
    let mut counts = HashMap::new();
    for id in ids {
        *counts.entry(id).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Citation;
    use crate::db::{InMemoryStore, SourceStore};
    use std::sync::Arc;

    struct Corpus {
        store: Arc<InMemoryStore>,
        textbook: Uuid,
        paper_a: Uuid,
        paper_b: Uuid,
        loner: Uuid,
    }

    fn corpus() -> Corpus {
        let store = Arc::new(InMemoryStore::new());
        let textbook = store.add_source(Source::new(SourceType::Textbook, "Causal Inference: The Mixtape", Some(2021)));
        let paper_a = store.add_source(Source::new(SourceType::Paper, "Synthetic Control Methods", Some(2010)));
        let paper_b = store.add_source(Source::new(SourceType::Paper, "Regression Discontinuity Designs", Some(2008)));
        let loner = store.add_source(Source::new(SourceType::Paper, "An Uncited Working Paper", Some(2023)));

        store.add_citation(Citation::new(paper_a, "Causal inference: the mixtape", Some(2021)));
        store.add_citation(Citation::new(paper_b, "Causal Inference - The Mixtape", None));
        store.add_citation(Citation::new(paper_b, "Synthetic control methods", Some(2010)));
        store.add_citation(Citation::new(textbook, "Regression discontinuity designs", Some(2008)));
        store.add_citation(Citation::new(loner, "A Theory of Justice", Some(1971)));
        store.add_citation(Citation::new(loner, "Synthetic Control Methods", Some(2010)));
        Corpus {
            store,
            textbook,
            paper_a,
            paper_b,
            loner,
        }
    }

    fn service(store: &Arc<InMemoryStore>) -> CitationAuthority {
        CitationAuthority::new(store.clone(), 0.85)
    }

    #[tokio::test]
    async fn test_build_citation_graph() {
        let c = corpus();
        let stats = service(&c.store).build_citation_graph().await;
        assert_eq!(stats.status, BatchStatus::Completed);
        assert_eq!(stats.total_processed, 6);
        assert_eq!(stats.matched, 5);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.by_type.get("paper→textbook"), Some(&2));
        assert_eq!(stats.by_type.get("paper→paper"), Some(&2));
        assert_eq!(stats.by_type.get("textbook→paper"), Some(&1));

        let again = service(&c.store).build_citation_graph().await;
        assert_eq!(again.skipped, 6);
        assert_eq!(again.matched, 0);
        assert_eq!(c.store.list_citation_edges().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_pagerank_authority() {
        let c = corpus();
        let svc = service(&c.store);
        svc.build_citation_graph().await;
        let report = svc.compute_pagerank_authority(20, 0.85).await;

        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!(report.sources, 4);
        let total: f64 = report.scores.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((report.scores[&c.loner] - report.teleport_floor).abs() < 1e-12);
        assert!(report.scores[&c.paper_a] > report.scores[&c.loner]);
        assert!(report.min <= report.mean && report.mean <= report.max);

        let stored = c.store.source(c.textbook).unwrap().citation_authority.unwrap();
        assert_eq!(stored, report.scores[&c.textbook]);
    }

    #[tokio::test]
    async fn test_empty_corpus_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let report = service(&store).compute_pagerank_authority(20, 0.85).await;
        assert_eq!(report.status, BatchStatus::Empty);
        assert_eq!((report.sources, report.max), (0, 0.0));
        assert_eq!(service(&store).build_citation_graph().await.status, BatchStatus::Empty);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_prior_scores() {
        let c = corpus();
        let svc = service(&c.store);
        svc.build_citation_graph().await;
        let first = svc.compute_pagerank_authority(20, 0.85).await;

        c.store.add_citation(Citation::new(c.textbook, "Synthetic Control Methods", Some(2010)));
        svc.build_citation_graph().await;
        c.store.fail_authority_writes(true);
        let second = svc.compute_pagerank_authority(20, 0.85).await;
        assert_eq!(second.status, BatchStatus::Failed);
        assert_eq!(
            c.store.source(c.paper_a).unwrap().citation_authority,
            Some(first.scores[&c.paper_a])
        );
    }

    #[tokio::test]
    async fn test_invalid_damping_rejected() {
        let c = corpus();
        let svc = service(&c.store);
        svc.build_citation_graph().await;
        for damping in [0.0, 1.0, 1.5, -0.2, f64::NAN, f64::INFINITY] {
            assert!(validate_damping(damping).is_err());
            let report = svc.compute_pagerank_authority(20, damping).await;
            assert_eq!(report.status, BatchStatus::Failed);
        }
        assert!(c.store.source(c.textbook).unwrap().citation_authority.is_none());
        assert!(validate_damping(0.85).is_ok());
    }

    #[tokio::test]
    async fn test_citation_stats() {
        let c = corpus();
        let svc = service(&c.store);
        svc.build_citation_graph().await;
        let report = svc.compute_pagerank_authority(20, 0.85).await;

        let textbook = svc.citation_stats(c.textbook).await.unwrap();
        assert_eq!((textbook.cited_by_count, textbook.cited_by_papers, textbook.cited_by_textbooks), (2, 2, 0));
        assert_eq!((textbook.cites_count, textbook.cites_papers, textbook.cites_textbooks), (1, 1, 0));
        assert_eq!(textbook.citation_authority, report.scores[&c.textbook]);

        let paper_a = svc.citation_stats(c.paper_a).await.unwrap();
        assert_eq!((paper_a.cited_by_count, paper_a.cites_textbooks), (2, 1));

        let loner = svc.citation_stats(c.loner).await.unwrap();
        assert_eq!((loner.cited_by_count, loner.cites_count), (0, 1));

        assert!(matches!(
            svc.citation_stats(Uuid::new_v4()).await,
            Err(KbError::NotFound { kind: "source", .. })
        ));
    }

    #[tokio::test]
    async fn test_citation_queries() {
        let c = corpus();
        let svc = service(&c.store);
        svc.build_citation_graph().await;
        svc.compute_pagerank_authority(20, 0.85).await;

        let citing = svc.get_citing_sources(c.paper_a, None, 10).await.unwrap();
        let ids: HashSet<Uuid> = citing.iter().map(|s| s.source.id).collect();
        assert_eq!(ids, HashSet::from([c.paper_b, c.loner]));

        let only_textbooks = svc.get_citing_sources(c.paper_b, Some(SourceType::Textbook), 10).await.unwrap();
        assert_eq!(only_textbooks.len(), 1);
        assert_eq!(only_textbooks[0].source.id, c.textbook);

        let cited = svc.get_cited_sources(c.paper_b, None, 10).await.unwrap();
        assert_eq!(cited.len(), 2);

        let most = svc.get_most_cited_sources(None, 1).await.unwrap();
        assert_eq!(most.len(), 1);
        assert_eq!(most[0].count, 2);
        let never_cited = svc.get_most_cited_sources(None, 10).await.unwrap();
        assert!(never_cited.iter().all(|s| s.source.id != c.loner));

        let summary = svc.corpus_citation_summary().await.unwrap();
        assert_eq!(summary.total_citations, 6);
        assert_eq!((summary.internal_edges, summary.external_edges), (5, 1));
    }
}
