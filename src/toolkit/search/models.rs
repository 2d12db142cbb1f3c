

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::expander::ExpandedQuery;
use crate::core::context::ContextType;
use crate::core::error::{KbError, Result};
use crate::core::models::{Chunk, Source, SourceType};

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_GRAPH_WEIGHT: f64 = 0.2;
pub const DEFAULT_MAX_HOPS: usize = 2;


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_embedding: Option<Vec<f32>>,
    pub limit: usize,
    #[serde(default)]
    pub context_type: ContextType,
    #[serde(default)]
    pub source_filter: Option<SourceType>,
    #[serde(default)]
    pub use_graph: bool,
    #[serde(default)]
    pub use_rerank: bool,
    #[serde(default)]
    pub use_expand: bool,
    pub graph_weight: f64,
    pub max_hops: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            query_embedding: None,
            limit: DEFAULT_LIMIT,
            context_type: ContextType::default(),
            source_filter: None,
            use_graph: false,
            use_rerank: false,
            use_expand: false,
            graph_weight: DEFAULT_GRAPH_WEIGHT,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn with_context(mut self, context_type: ContextType) -> Self {
        self.context_type = context_type;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    pub fn with_source_filter(mut self, source_type: SourceType) -> Self {
        self.source_filter = Some(source_type);
        self
    }

    pub fn with_graph(mut self, graph_weight: f64) -> Self {
        self.use_graph = true;
        self.graph_weight = graph_weight;
        self
    }

    pub fn with_rerank(mut self) -> Self {
        self.use_rerank = true;
        self
    }

    pub fn with_expansion(mut self) -> Self {
        self.use_expand = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() && self.query_embedding.is_none() {
            return Err(KbError::Validation(
                "search needs query text or an embedding".to_string(),
            ));
        }
        if self.limit == 0 {
            return Err(KbError::Validation("limit must be positive".to_string()));
        }
        if !self.graph_weight.is_finite() || !(0.0..=1.0).contains(&self.graph_weight) {
            return Err(KbError::Validation(format!(
                "graph_weight must be in [0, 1], got {}",
                self.graph_weight
            )));
        }
        if self.query_embedding.as_ref().is_some_and(|e| e.is_empty()) {
            return Err(KbError::Validation("query embedding is empty".to_string()));
        }
        Ok(())
    }
}


/// One ranking component for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Signal {
    Score(f64),
    Unavailable,
}

impl Signal {
    /// Unavailable components contribute nothing.
    pub fn value(&self) -> f64 {
        match self {
            Signal::Score(v) => *v,
            Signal::Unavailable => 0.0,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Signal::Score(_))
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub lexical: Signal,
    pub vector: Signal,
    pub graph: Signal,
    pub citation: Signal,
    pub rerank: Option<f64>,
    pub combined: f64,
}

impl ScoreBreakdown {
    /// The score the final order is based on.
    pub fn ranking_score(&self) -> f64 {
        self.rerank.unwrap_or(self.combined)
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub source: Source,
    pub chunk: Chunk,
    pub scores: ScoreBreakdown,
    pub rank: usize,
    /// Position before reranking.
    pub fused_rank: usize,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SignalStatus {
    Active,
    Disabled,
    Unavailable(String),
}

impl SignalStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SignalStatus::Unavailable(_))
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalReport {
    pub vector: SignalStatus,
    pub graph: SignalStatus,
    pub citation: SignalStatus,
    pub rerank: SignalStatus,
    /// A graph walk (expansion or scoring) ran out of traversal budget, so
    /// graph-derived terms or scores may be partial.
    #[serde(default)]
    pub graph_truncated: bool,
}

impl SignalReport {
    pub fn is_degraded(&self) -> bool {
        [&self.vector, &self.graph, &self.citation, &self.rerank]
            .iter()
            .any(|s| s.is_degraded())
    }
}

impl Default for SignalReport {
    fn default() -> Self {
        Self {
            vector: SignalStatus::Disabled,
            graph: SignalStatus::Disabled,
            citation: SignalStatus::Disabled,
            rerank: SignalStatus::Disabled,
            graph_truncated: false,
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub expanded_query: Option<ExpandedQuery>,
    pub results: Vec<SearchResult>,
    pub signals: SignalReport,
    pub query_concepts: Vec<Uuid>,
    pub execution_time_ms: f64,
}
