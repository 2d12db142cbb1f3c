

use std::collections::{HashMap, HashSet};
use uuid::Uuid;


#[derive(Debug, Clone, PartialEq)]
pub struct PageRank {
    pub scores: HashMap<Uuid, f64>,
    /// Uniform share every source receives in the final iteration:
    /// teleport plus redistributed dangling mass. A source nobody cites
    /// ends exactly here.
    pub teleport_floor: f64,
}

/// Damped PageRank over internal citation edges. Scores start at `1/N`
/// and always sum to 1; sources without outgoing citations spread their
/// mass evenly over the corpus.
pub fn pagerank(nodes: &[Uuid], edges: &[(Uuid, Uuid)], iterations: usize, damping: f64) -> PageRank {
    let n = nodes.len();
    if n == 0 {
        return PageRank {
            scores: HashMap::new(),
            teleport_floor: 0.0,
        };
    }
    let index: HashMap<Uuid, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut seen = HashSet::new();
    let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut out_degree = vec![0usize; n];
    for (citing, cited) in edges {
        let (Some(&u), Some(&v)) = (index.get(citing), index.get(cited)) else {
            continue;
        };
        if u == v || !seen.insert((u, v)) {
            continue;
        }
        incoming[v].push(u);
        out_degree[u] += 1;
    }

    let nf = n as f64;
    let mut scores = vec![1.0 / nf; n];
    let mut floor = 1.0 / nf;
    for _ in 0..iterations {
        let dangling: f64 = (0..n).filter(|&u| out_degree[u] == 0).map(|u| scores[u]).sum();
        floor = (1.0 - damping) / nf + damping * dangling / nf;
        let next: Vec<f64> = (0..n)
            .map(|v| {
                floor
                    + damping
                        * incoming[v]
                            .iter()
                            .map(|&u| scores[u] / out_degree[u] as f64)
                            .sum::<f64>()
            })
            .collect();
        scores = next;
    }

    PageRank {
        scores: nodes.iter().copied().zip(scores).collect(),
        teleport_floor: floor,
    }
}
