

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;
use uuid::Uuid;

use super::path::{ConceptPath, Direction, PathOutcome, PathStep};
use crate::core::budget::TraversalBudget;
use crate::core::models::{Concept, ConceptRelationship, RelationshipType};


#[derive(Debug, Clone)]
struct Edge {
    source: usize,
    target: usize,
    relationship: ConceptRelationship,
}

/// Arena copy of the concept graph: nodes by index, adjacency lists of
/// edge indices in both directions.
#[derive(Debug, Default)]
pub struct ConceptGraph {
    nodes: Vec<Concept>,
    index: HashMap<Uuid, usize>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
}

/// Result of a bounded BFS expansion, as arena indices.
#[derive(Debug)]
pub(crate) struct Expansion {
    /// Discovery order; the center comes first.
    pub nodes: Vec<(usize, usize)>,
    pub edges: Vec<usize>,
    pub truncated: bool,
}

impl ConceptGraph {
    pub fn build(concepts: Vec<Concept>, relationships: Vec<ConceptRelationship>) -> Self {
        let index: HashMap<Uuid, usize> = concepts
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();
        let mut adjacency = vec![Vec::new(); concepts.len()];
        let mut edges = Vec::with_capacity(relationships.len());

        for rel in relationships {
            let (Some(&source), Some(&target)) = (
                index.get(&rel.source_concept_id),
                index.get(&rel.target_concept_id),
            ) else {
                warn!("Skipping relationship {} with a dangling endpoint", rel.id);
                continue;
            };
            let edge_idx = edges.len();
            edges.push(Edge {
                source,
                target,
                relationship: rel,
            });
            if source != target {
                adjacency[source].push(edge_idx);
                adjacency[target].push(edge_idx);
            }
        }

        Self {
            nodes: concepts,
            index,
            edges,
            adjacency,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn concepts(&self) -> &[Concept] {
        &self.nodes
    }

    pub fn concept(&self, id: &Uuid) -> Option<&Concept> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub(crate) fn index_of(&self, id: &Uuid) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn node(&self, idx: usize) -> &Concept {
        &self.nodes[idx]
    }

    pub(crate) fn relationship(&self, edge: usize) -> &ConceptRelationship {
        &self.edges[edge].relationship
    }

    fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, usize, Direction)> + '_ {
        self.adjacency[node].iter().map(move |&e| {
            let edge = &self.edges[e];
            if edge.source == node {
                (e, edge.target, Direction::Forward)
            } else {
                (e, edge.source, Direction::Backward)
            }
        })
    }

    fn allowed(&self, edge: usize, filter: Option<&HashSet<RelationshipType>>) -> bool {
        filter.is_none_or(|f| f.contains(&self.edges[edge].relationship.relationship_type))
    }

    /// Direction-agnostic BFS from `center` up to `hops` levels, keeping at
    /// most `limit` neighbors plus every edge among the kept nodes.
    pub(crate) fn expand(
        &self,
        center: usize,
        hops: usize,
        limit: usize,
        filter: Option<&HashSet<RelationshipType>>,
        budget: &mut TraversalBudget,
    ) -> Expansion {
        let mut visited: HashSet<usize> = HashSet::from([center]);
        let mut order = vec![(center, 0)];
        let mut queue = VecDeque::from([(center, 0usize)]);
        let mut truncated = false;

        'bfs: while let Some((node, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            for (edge, other, _) in self.neighbors(node) {
                if !budget.tick() {
                    truncated = true;
                    break 'bfs;
                }
                if !self.allowed(edge, filter) || visited.contains(&other) {
                    continue;
                }
                if order.len() - 1 >= limit {
                    truncated = true;
                    break 'bfs;
                }
                visited.insert(other);
                order.push((other, depth + 1));
                queue.push_back((other, depth + 1));
            }
        }

        let mut edges: Vec<usize> = Vec::new();
        let mut seen = HashSet::new();
        for &(node, _) in &order {
            for &e in &self.adjacency[node] {
                let edge = &self.edges[e];
                if visited.contains(&edge.source)
                    && visited.contains(&edge.target)
                    && self.allowed(e, filter)
                    && seen.insert(e)
                {
                    edges.push(e);
                }
            }
        }
        edges.sort_unstable();

        Expansion {
            nodes: order,
            edges,
            truncated,
        }
    }

    /// Hop distance to every node reachable within `max_hops`.
    pub(crate) fn distances(
        &self,
        source: usize,
        max_hops: usize,
        budget: &mut TraversalBudget,
    ) -> (HashMap<usize, usize>, bool) {
        let mut dist = HashMap::from([(source, 0usize)]);
        let mut queue = VecDeque::from([source]);

        while let Some(node) = queue.pop_front() {
            let d = dist[&node];
            if d >= max_hops {
                continue;
            }
            for (_, other, _) in self.neighbors(node) {
                if !budget.tick() {
                    return (dist, true);
                }
                if !dist.contains_key(&other) {
                    dist.insert(other, d + 1);
                    queue.push_back(other);
                }
            }
        }
        (dist, false)
    }

    /// Unweighted minimum-hop path, capped at `max_hops`.
    pub fn shortest_path(
        &self,
        a: &Uuid,
        b: &Uuid,
        max_hops: usize,
        budget: &mut TraversalBudget,
    ) -> PathOutcome {
        let Some(start) = self.index_of(a) else {
            return PathOutcome::UnknownConcept { id: *a };
        };
        let Some(goal) = self.index_of(b) else {
            return PathOutcome::UnknownConcept { id: *b };
        };

        let mut parent: HashMap<usize, (usize, usize, Direction)> = HashMap::new();
        let mut depth: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut queue = VecDeque::from([start]);
        let mut found = start == goal;

        'bfs: while let Some(node) = queue.pop_front() {
            if found {
                break;
            }
            let d = depth[&node];
            if d >= max_hops {
                continue;
            }
            for (edge, other, direction) in self.neighbors(node) {
                if !budget.tick() {
                    return PathOutcome::NoPath { truncated: true };
                }
                if depth.contains_key(&other) {
                    continue;
                }
                depth.insert(other, d + 1);
                parent.insert(other, (node, edge, direction));
                if other == goal {
                    found = true;
                    break 'bfs;
                }
                queue.push_back(other);
            }
        }

        if !found {
            return PathOutcome::NoPath { truncated: false };
        }

        let mut steps = Vec::new();
        let mut indices = vec![goal];
        let mut cursor = goal;
        while let Some(&(prev, edge, direction)) = parent.get(&cursor) {
            steps.push(PathStep {
                from: self.nodes[prev].id,
                to: self.nodes[cursor].id,
                relationship_type: self.edges[edge].relationship.relationship_type,
                direction,
            });
            indices.push(prev);
            cursor = prev;
        }
        steps.reverse();
        indices.reverse();

        PathOutcome::Found(ConceptPath {
            concepts: indices.into_iter().map(|i| self.nodes[i].clone()).collect(),
            steps,
        })
    }
}
