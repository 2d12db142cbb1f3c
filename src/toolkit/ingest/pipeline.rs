

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{validate_relationship_confidence, ExtractionBatch, IngestReport, RawExtraction};
use crate::core::error::{KbError, Result};
use crate::core::gate::BatchStatus;
use crate::core::models::{ChunkConcept, ConceptRelationship};
use crate::db::SharedStore;
use crate::llm::{ExtractionProvider, SignalGuard};
use crate::toolkit::dedup::{canonicalize, ConceptRegistry, Deduplicator};
use crate::toolkit::graph::GraphQueryEngine;

/// Validates extractor output, deduplicates it against the registry and
/// writes concepts, relationships and chunk links.
pub struct IngestionPipeline {
    store: SharedStore,
    deduplicator: Arc<Deduplicator>,
    graph: Arc<GraphQueryEngine>,
    guard: SignalGuard,
    min_confidence: f64,
}

impl IngestionPipeline {
    pub fn new(
        store: SharedStore,
        deduplicator: Arc<Deduplicator>,
        graph: Arc<GraphQueryEngine>,
        guard: SignalGuard,
        min_confidence: f64,
    ) -> Self {
        Self {
            store,
            deduplicator,
            graph,
            guard,
            min_confidence,
        }
    }

    /// Runs the extractor over chunk text, then ingests its output.
    pub async fn ingest_text(
        &self,
        chunk_id: Uuid,
        text: &str,
        provider: &dyn ExtractionProvider,
    ) -> Result<IngestReport> {
        let extraction: RawExtraction = self
            .guard
            .call(provider.extract(text))
            .await
            .map_err(|e| KbError::SignalUnavailable {
                signal: "extraction",
                reason: format!("{}: {}", provider.provider_name(), e),
            })?;
        debug!(
            "Extractor {} returned {} concepts, {} relationships",
            provider.provider_name(),
            extraction.concepts.len(),
            extraction.relationships.len()
        );
        Ok(self.ingest(ExtractionBatch::new(chunk_id, extraction)).await)
    }

    pub async fn ingest(&self, batch: ExtractionBatch) -> IngestReport {
        let mut report = IngestReport::new(batch.chunk_id);
        if batch.is_empty() {
            report.status = BatchStatus::Empty;
            return report;
        }

        let mut accepted = Vec::new();
        for raw in &batch.concepts {
            match raw.validate() {
                Ok(_) if raw.confidence < self.min_confidence => report.below_confidence += 1,
                Ok(concept) => accepted.push(concept),
                Err(e) => report.reject(raw.name.clone(), e),
            }
        }

        let names: Vec<(String, Vec<String>)> = accepted
            .iter()
            .map(|c| (c.name.clone(), c.aliases.clone()))
            .collect();
        // Held until relationships and links are written.
        let mut registry = self.deduplicator.lock_registry().await;
        let matches = self.deduplicator.deduplicate_locked(&mut registry, accepted).await;

        let new: Vec<_> = matches.iter().filter(|m| m.is_new).map(|m| m.concept.clone()).collect();
        let new_ids: Vec<Uuid> = new.iter().map(|c| c.id).collect();
        if !new.is_empty() {
            if let Err(e) = self.store.create_concepts(&new).await {
                warn!("Concept insert failed for chunk {}: {}", batch.chunk_id, e);
                registry.forget(&new_ids);
                report.fail(e);
                return report;
            }
        }
        report.new_concepts = new.len();
        report.matched_concepts = matches.len() - new.len();

        let mut resolved: HashMap<String, Uuid> = HashMap::new();
        for ((name, aliases), m) in names.iter().zip(&matches) {
            let id = m.resolved_id();
            for key in std::iter::once(name).chain(aliases.iter()) {
                resolved.entry(canonicalize(key)).or_insert(id);
            }
        }

        let mut relationships = Vec::new();
        let mut seen_edges = HashSet::new();
        for raw in &batch.relationships {
            let relationship_type = match raw.parse_type() {
                Ok(t) => t,
                Err(e) => {
                    report.reject(raw.label(), e);
                    continue;
                }
            };
            if let Err(e) = validate_relationship_confidence(raw) {
                report.reject(raw.label(), e);
                continue;
            }
            if raw.confidence < self.min_confidence {
                report.below_confidence += 1;
                continue;
            }
            let (Some(source), Some(target)) = (
                resolve(&registry, &resolved, &raw.source_concept),
                resolve(&registry, &resolved, &raw.target_concept),
            ) else {
                report.reject(
                    raw.label(),
                    KbError::Validation("endpoint is neither in the batch nor registered".to_string()),
                );
                continue;
            };
            if source == target {
                report.reject(raw.label(), KbError::Validation("self-referencing relationship".to_string()));
                continue;
            }
            if !seen_edges.insert((source, target, relationship_type)) {
                continue;
            }
            let mut rel = ConceptRelationship::new(source, target, relationship_type);
            rel.strength = raw.confidence;
            relationships.push(rel);
        }

        let links: Vec<ChunkConcept> = matches
            .iter()
            .map(|m| m.resolved_id())
            .collect::<HashSet<_>>()
            .into_iter()
            .map(|concept_id| ChunkConcept {
                chunk_id: batch.chunk_id,
                concept_id,
            })
            .collect();

        let written = async {
            if !relationships.is_empty() {
                self.store.create_relationships(&relationships).await?;
            }
            if !links.is_empty() {
                self.store.link_chunk_concepts(&links).await?;
            }
            Ok::<(), KbError>(())
        }
        .await;
        drop(registry);
        match written {
            Ok(()) => {
                report.relationships = relationships.len();
                report.links = links.len();
            }
            Err(e) => {
                warn!("Relationship or link write failed for chunk {}: {}", batch.chunk_id, e);
                report.fail(e);
            }
        }

        if report.new_concepts > 0 || report.relationships > 0 {
            self.graph.invalidate();
        }
        info!(
            "Ingested chunk {}: new={}, matched={}, relationships={}, rejected={}, below_confidence={}",
            batch.chunk_id,
            report.new_concepts,
            report.matched_concepts,
            report.relationships,
            report.rejected.len(),
            report.below_confidence
        );
        report
    }
}

/// Batch names first, then concepts already registered.
fn resolve(registry: &ConceptRegistry, resolved: &HashMap<String, Uuid>, name: &str) -> Option<Uuid> {
    let canonical = canonicalize(name);
    if canonical.is_empty() {
        return None;
    }
    match resolved.get(&canonical) {
        Some(id) => Some(*id),
        None => registry.find_existing_concept(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::RelationshipType;
    use crate::db::{ConceptStore, InMemoryStore};
    use crate::llm::{SignalError, TokenBucket};
    use crate::toolkit::ingest::{RawConcept, RawRelationship};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct Harness {
        store: Arc<InMemoryStore>,
        graph: Arc<GraphQueryEngine>,
        pipeline: IngestionPipeline,
    }

    fn harness(min_confidence: f64) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let shared: SharedStore = store.clone();
        let guard = SignalGuard::new(Arc::new(TokenBucket::new(100.0, 10)), Duration::from_millis(200));
        let dedup = Arc::new(Deduplicator::new(
            Arc::new(Mutex::new(ConceptRegistry::new())),
            None,
            guard.clone(),
        ));
        let graph = Arc::new(GraphQueryEngine::new(shared.clone(), 1000, Duration::from_secs(1)));
        let pipeline = IngestionPipeline::new(shared, dedup, graph.clone(), guard, min_confidence);
        Harness { store, graph, pipeline }
    }

    fn iv_batch(chunk_id: Uuid) -> ExtractionBatch {
        ExtractionBatch {
            chunk_id,
            concepts: vec![
                RawConcept::new("Instrumental Variables", "method").with_aliases(["IV"]),
                RawConcept::new("endogeneity", "problem"),
                RawConcept::new("IV", "method"),
            ],
            relationships: vec![RawRelationship::new("IV", "Endogeneity", "ADDRESSES")],
        }
    }

    #[tokio::test]
    async fn test_ingest_writes_concepts_relationships_and_links() {
        let h = harness(0.0);
        let chunk = Uuid::new_v4();
        let report = h.pipeline.ingest(iv_batch(chunk)).await;

        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!((report.new_concepts, report.matched_concepts), (2, 1));
        assert_eq!((report.relationships, report.links), (1, 2));
        assert!(report.rejected.is_empty());
        assert_eq!(h.store.concept_count(), 2);

        let rels = h.store.list_relationships().await.unwrap();
        assert_eq!(rels[0].relationship_type, RelationshipType::Addresses);
        let linked = h.store.concept_ids_for_chunks(&[chunk]).await.unwrap();
        assert_eq!(linked[&chunk].len(), 2);
        assert_eq!(h.graph.graph().await.unwrap().edge_count(), 1);
    }

    #[tokio::test]
    async fn test_second_batch_links_to_registered_concepts() {
        let h = harness(0.0);
        h.pipeline.ingest(iv_batch(Uuid::new_v4())).await;
        let report = h
            .pipeline
            .ingest(ExtractionBatch {
                chunk_id: Uuid::new_v4(),
                concepts: vec![RawConcept::new("two-stage least squares", "method")],
                relationships: vec![RawRelationship::new("2SLS", "instrumental variables", "SPECIALIZES")],
            })
            .await;
        assert_eq!(report.new_concepts, 1);
        assert_eq!(report.relationships, 1);
        assert_eq!(h.store.concept_count(), 3);
    }

    #[tokio::test]
    async fn test_invalid_items_rejected_per_item() {
        let h = harness(0.5);
        let report = h
            .pipeline
            .ingest(ExtractionBatch {
                chunk_id: Uuid::new_v4(),
                concepts: vec![
                    RawConcept::new("regression discontinuity", "method"),
                    RawConcept::new("bandwidth", "estimator"),
                    RawConcept::new("", "method"),
                    RawConcept::new("kernel choice", "assumption").with_confidence(0.2),
                ],
                relationships: vec![
                    RawRelationship::new("regression discontinuity", "running variable", "REQUIRES"),
                    RawRelationship::new("regression discontinuity", "regression discontinuity", "USES"),
                    RawRelationship::new("regression discontinuity", "bandwidth", "CAUSES"),
                ],
            })
            .await;

        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!(report.new_concepts, 1);
        assert_eq!(report.below_confidence, 1);
        assert_eq!(report.rejected.len(), 5);
        assert_eq!(report.relationships, 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let h = harness(0.0);
        let report = h
            .pipeline
            .ingest(ExtractionBatch::new(Uuid::new_v4(), RawExtraction::default()))
            .await;
        assert_eq!(report.status, BatchStatus::Empty);
    }

    fn single(chunk_id: Uuid, names: &[&str]) -> ExtractionBatch {
        ExtractionBatch {
            chunk_id,
            concepts: names.iter().map(|n| RawConcept::new(*n, "method")).collect(),
            relationships: Vec::new(),
        }
    }

    async fn linked_concepts_exist(store: &InMemoryStore, chunk: Uuid) -> bool {
        let links = store.concept_ids_for_chunks(&[chunk]).await.unwrap();
        links.values().flatten().all(|id| store.concept(*id).is_some())
    }

    #[tokio::test]
    async fn test_concurrent_batch_waits_for_pending_insert() {
        let h = harness(0.0);
        h.store.delay_writes(50);
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        let (a, (b, b_links_ok)) = tokio::join!(
            h.pipeline.ingest(single(first, &["instrumental variables"])),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let report = h.pipeline.ingest(single(second, &["IV"])).await;
                (report, linked_concepts_exist(&h.store, second).await)
            }
        );

        assert_eq!(a.status, BatchStatus::Completed);
        assert_eq!(b.status, BatchStatus::Completed);
        assert_eq!(b.matched_concepts, 1);
        assert!(b_links_ok);
        assert_eq!(h.store.concept_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_insert_is_not_reused_by_concurrent_batch() {
        let h = harness(0.0);
        h.store.delay_writes(50);
        h.store.fail_concept_named(Some("instrumental variables"));
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let batch = ExtractionBatch {
            chunk_id: second,
            concepts: vec![RawConcept::new("IV", "method"), RawConcept::new("weak instruments", "problem")],
            relationships: vec![RawRelationship::new("IV", "weak instruments", "ADDRESSES")],
        };

        let (a, b) = tokio::join!(h.pipeline.ingest(single(first, &["instrumental variables"])), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.pipeline.ingest(batch).await
        });

        assert_eq!(a.status, BatchStatus::Failed);
        assert_eq!(b.status, BatchStatus::Completed);
        assert_eq!((b.new_concepts, b.relationships), (2, 1));
        assert!(linked_concepts_exist(&h.store, second).await);
        let rels = h.store.list_relationships().await.unwrap();
        assert!(rels
            .iter()
            .all(|r| h.store.concept(r.source_concept_id).is_some() && h.store.concept(r.target_concept_id).is_some()));
    }

    struct StaticExtractor(Option<RawExtraction>);

    #[async_trait]
    impl ExtractionProvider for StaticExtractor {
        async fn extract(&self, text: &str) -> std::result::Result<RawExtraction, SignalError> {
            if text.trim().is_empty() {
                return Err(SignalError::EmptyText);
            }
            self.0
                .clone()
                .ok_or_else(|| SignalError::Unavailable("model not loaded".to_string()))
        }

        async fn available(&self) -> bool {
            self.0.is_some()
        }

        fn provider_name(&self) -> &str {
            "static"
        }
    }

    #[tokio::test]
    async fn test_ingest_text_through_provider() {
        let h = harness(0.0);
        let extractor = StaticExtractor(Some(RawExtraction {
            concepts: vec![RawConcept::new("synthetic control", "method")],
            relationships: Vec::new(),
        }));
        let report = h
            .pipeline
            .ingest_text(Uuid::new_v4(), "synthetic control weights donors", &extractor)
            .await
            .unwrap();
        assert_eq!(report.new_concepts, 1);

        let down = StaticExtractor(None);
        match h.pipeline.ingest_text(Uuid::new_v4(), "text", &down).await {
            Err(KbError::SignalUnavailable { signal, .. }) => assert_eq!(signal, "extraction"),
            other => panic!("expected signal error, got {:?}", other.map(|r| r.status)),
        }
    }
}
