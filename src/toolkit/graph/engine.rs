

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::path::PathOutcome;
use super::snapshot::ConceptGraph;
use crate::core::budget::TraversalBudget;
use crate::core::error::Result;
use crate::core::models::{Concept, ConceptRelationship, RelationshipType};
use crate::db::SharedStore;


pub const MIN_HOPS: usize = 1;

pub const MAX_HOPS: usize = 5;


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborConcept {
    pub concept: Concept,
    pub distance: usize,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighborhood {
    pub center: Concept,
    /// Neighbors in BFS discovery order, center excluded.
    pub concepts: Vec<NeighborConcept>,
    pub relationships: Vec<ConceptRelationship>,
    pub truncated: bool,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphScore {
    pub score: f64,
    pub truncated: bool,
}

/// Graph queries over a cached arena snapshot of the concept graph.
pub struct GraphQueryEngine {
    store: SharedStore,
    snapshot: RwLock<Option<Arc<ConceptGraph>>>,
    /// Bumped by `invalidate`; a load only installs if it is unchanged.
    generation: AtomicU64,
    max_steps: usize,
    timeout: Duration,
}

impl GraphQueryEngine {
    pub fn new(store: SharedStore, max_steps: usize, timeout: Duration) -> Self {
        Self {
            store,
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
            max_steps,
            timeout,
        }
    }

    fn budget(&self) -> TraversalBudget {
        TraversalBudget::new(self.max_steps, Some(self.timeout))
    }

    /// Current snapshot, loading it from the store on first use.
    pub async fn graph(&self) -> Result<Arc<ConceptGraph>> {
        let cached = self.snapshot.read().clone();
        if let Some(graph) = cached {
            return Ok(graph);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let start = Instant::now();
        let (concepts, relationships) =
            futures::try_join!(self.store.list_concepts(), self.store.list_relationships())?;
        let graph = Arc::new(ConceptGraph::build(concepts, relationships));
        info!(
            "Concept graph loaded: {} nodes, {} edges in {:.2}ms",
            graph.node_count(),
            graph.edge_count(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        let mut slot = self.snapshot.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            *slot = Some(Arc::clone(&graph));
        } else {
            debug!("Concept graph changed during load, not caching");
        }
        Ok(graph)
    }

    /// Drops the snapshot; the next query reloads it. A load already in
    /// flight still answers its caller but is not cached.
    pub fn invalidate(&self) {
        let mut slot = self.snapshot.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        slot.take();
        debug!("Concept graph snapshot invalidated");
    }

    /// `None` when the center concept is unknown.
    pub async fn get_neighborhood(
        &self,
        concept_id: Uuid,
        hops: usize,
        limit: usize,
    ) -> Result<Option<Neighborhood>> {
        self.get_neighborhood_filtered(concept_id, hops, limit, &[]).await
    }

    /// Only walks the given relationship types; empty means all.
    pub async fn get_neighborhood_filtered(
        &self,
        concept_id: Uuid,
        hops: usize,
        limit: usize,
        relationship_types: &[RelationshipType],
    ) -> Result<Option<Neighborhood>> {
        let graph = self.graph().await?;
        let Some(center) = graph.index_of(&concept_id) else {
            return Ok(None);
        };
        let hops = hops.clamp(MIN_HOPS, MAX_HOPS);
        let filter: Option<HashSet<RelationshipType>> = (!relationship_types.is_empty())
            .then(|| relationship_types.iter().copied().collect());

        let mut budget = self.budget();
        let expansion = graph.expand(center, hops, limit, filter.as_ref(), &mut budget);

        debug!(
            "Neighborhood of {}: {} nodes, {} edges, truncated={}",
            concept_id,
            expansion.nodes.len() - 1,
            expansion.edges.len(),
            expansion.truncated
        );

        Ok(Some(Neighborhood {
            center: graph.node(center).clone(),
            concepts: expansion
                .nodes
                .iter()
                .skip(1)
                .map(|&(idx, distance)| NeighborConcept {
                    concept: graph.node(idx).clone(),
                    distance,
                })
                .collect(),
            relationships: expansion
                .edges
                .iter()
                .map(|&e| graph.relationship(e).clone())
                .collect(),
            truncated: expansion.truncated,
        }))
    }

    pub async fn find_shortest_path(&self, a: Uuid, b: Uuid, max_hops: usize) -> Result<PathOutcome> {
        let graph = self.graph().await?;
        let mut budget = self.budget();
        Ok(graph.shortest_path(&a, &b, max_hops, &mut budget))
    }

    /// Mean pairwise relatedness in [0, 1]: 1.0 for the same concept or a
    /// direct edge, `1/d` at distance `d` within `max_hops`, else 0.
    pub async fn compute_graph_score(
        &self,
        query_concepts: &[Uuid],
        chunk_concepts: &[Uuid],
        max_hops: usize,
    ) -> Result<f64> {
        Ok(self
            .graph_score(query_concepts, chunk_concepts, max_hops)
            .await?
            .score)
    }

    pub async fn graph_score(
        &self,
        query_concepts: &[Uuid],
        chunk_concepts: &[Uuid],
        max_hops: usize,
    ) -> Result<GraphScore> {
        if query_concepts.is_empty() || chunk_concepts.is_empty() {
            return Ok(GraphScore {
                score: 0.0,
                truncated: false,
            });
        }
        let graph = self.graph().await?;
        let mut budget = self.budget();
        let mut truncated = false;
        let mut total = 0.0;

        for q in query_concepts {
            let Some(q_idx) = graph.index_of(q) else {
                continue;
            };
            let (dist, cut) = graph.distances(q_idx, max_hops, &mut budget);
            truncated |= cut;
            for c in chunk_concepts {
                let Some(d) = graph.index_of(c).and_then(|i| dist.get(&i).copied()) else {
                    continue;
                };
                total += pair_score(d);
            }
        }

        let pairs = (query_concepts.len() * chunk_concepts.len()) as f64;
        Ok(GraphScore {
            score: (total / pairs).clamp(0.0, 1.0),
            truncated,
        })
    }
}

fn pair_score(distance: usize) -> f64 {
    match distance {
        0 | 1 => 1.0,
        d => 1.0 / d as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ConceptType;
    use crate::db::{ConceptStore, InMemoryStore};

    async fn engine_with(
        concepts: &[Concept],
        relationships: &[ConceptRelationship],
    ) -> GraphQueryEngine {
        let store = InMemoryStore::new();
        store.create_concepts(concepts).await.unwrap();
        store.create_relationships(relationships).await.unwrap();
        GraphQueryEngine::new(Arc::new(store), 10_000, Duration::from_secs(2))
    }

    fn concept(name: &str) -> Concept {
        Concept::new(name, ConceptType::Method)
    }

    #[test]
    fn test_pair_score_strictly_decreasing() {
        assert_eq!(pair_score(1), 1.0);
        assert!(pair_score(2) < pair_score(1));
        assert!(pair_score(3) < pair_score(2));
    }

    #[tokio::test]
    async fn test_neighborhood_of_three() {
        let x = concept("x");
        let (a, b, c, far) = (concept("a"), concept("b"), concept("c"), concept("far"));
        let rels = vec![
            ConceptRelationship::new(x.id, a.id, RelationshipType::Uses),
            ConceptRelationship::new(b.id, x.id, RelationshipType::Requires),
            ConceptRelationship::new(x.id, c.id, RelationshipType::Extends),
            ConceptRelationship::new(c.id, far.id, RelationshipType::Uses),
        ];
        let engine = engine_with(&[x.clone(), a, b, c, far], &rels).await;

        let hood = engine.get_neighborhood(x.id, 1, 50).await.unwrap().unwrap();
        assert_eq!(hood.concepts.len(), 3);
        assert_eq!(hood.relationships.len(), 3);
        assert!(!hood.truncated);
        assert!(hood.concepts.iter().all(|n| n.distance == 1));
    }

    #[tokio::test]
    async fn test_neighborhood_unknown_center_and_hop_clamp() {
        let (a, b) = (concept("a"), concept("b"));
        let engine = engine_with(
            &[a.clone(), b.clone()],
            &[ConceptRelationship::new(a.id, b.id, RelationshipType::Uses)],
        )
        .await;
        assert!(engine.get_neighborhood(Uuid::new_v4(), 1, 10).await.unwrap().is_none());

        let hood = engine.get_neighborhood(a.id, 0, 10).await.unwrap().unwrap();
        assert_eq!(hood.concepts.len(), 1);
    }

    #[tokio::test]
    async fn test_relationship_filter() {
        let (a, b, c) = (concept("a"), concept("b"), concept("c"));
        let engine = engine_with(
            &[a.clone(), b.clone(), c.clone()],
            &[
                ConceptRelationship::new(a.id, b.id, RelationshipType::Uses),
                ConceptRelationship::new(a.id, c.id, RelationshipType::AlternativeTo),
            ],
        )
        .await;
        let hood = engine
            .get_neighborhood_filtered(a.id, 2, 10, &[RelationshipType::AlternativeTo])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hood.concepts.len(), 1);
        assert_eq!(hood.concepts[0].concept.id, c.id);
        assert_eq!(hood.relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_graph_score_empty_inputs() {
        let a = concept("a");
        let engine = engine_with(&[a.clone()], &[]).await;
        for k in [0, 1, 3] {
            assert_eq!(engine.compute_graph_score(&[], &[a.id], k).await.unwrap(), 0.0);
            assert_eq!(engine.compute_graph_score(&[a.id], &[], k).await.unwrap(), 0.0);
        }
    }

    #[tokio::test]
    async fn test_graph_score_decays_with_distance() {
        let (a, b, c, d) = (concept("a"), concept("b"), concept("c"), concept("d"));
        let engine = engine_with(
            &[a.clone(), b.clone(), c.clone(), d.clone()],
            &[
                ConceptRelationship::new(a.id, b.id, RelationshipType::Uses),
                ConceptRelationship::new(b.id, c.id, RelationshipType::Uses),
            ],
        )
        .await;

        assert_eq!(engine.compute_graph_score(&[a.id], &[b.id], 3).await.unwrap(), 1.0);
        assert_eq!(engine.compute_graph_score(&[a.id], &[c.id], 3).await.unwrap(), 0.5);
        assert_eq!(engine.compute_graph_score(&[a.id], &[c.id], 1).await.unwrap(), 0.0);
        assert_eq!(engine.compute_graph_score(&[a.id], &[d.id], 3).await.unwrap(), 0.0);

        let mixed = engine.compute_graph_score(&[a.id], &[b.id, d.id], 3).await.unwrap();
        assert!((mixed - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalidate_reloads() {
        let store = Arc::new(InMemoryStore::new());
        let engine = GraphQueryEngine::new(store.clone(), 100, Duration::from_secs(1));
        assert_eq!(engine.graph().await.unwrap().node_count(), 0);

        store.create_concepts(&[concept("late")]).await.unwrap();
        assert_eq!(engine.graph().await.unwrap().node_count(), 0);
        engine.invalidate();
        assert_eq!(engine.graph().await.unwrap().node_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_during_load_is_not_cached() {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(GraphQueryEngine::new(store.clone(), 100, Duration::from_secs(1)));
        store.delay_reads(50);

        let loader = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.graph().await.unwrap().node_count() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.create_concepts(&[concept("late")]).await.unwrap();
        engine.invalidate();

        assert_eq!(loader.await.unwrap(), 0);
        store.delay_reads(0);
        assert_eq!(engine.graph().await.unwrap().node_count(), 1);
    }
}
