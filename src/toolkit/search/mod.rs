pub mod cache;
pub mod expander;
pub mod fusion;
pub mod models;
pub mod query_concepts;

pub use cache::{CacheStats, SearchCache};
pub use expander::{
    build_lexical_query, ExpandedQuery, ExpansionStrategy, ExpansionTerm, QueryExpander, SynonymMap,
};
pub use fusion::{FusionEngine, FusionSettings};
pub use models::{
    ScoreBreakdown, SearchRequest, SearchResponse, SearchResult, Signal, SignalReport, SignalStatus,
};
pub use query_concepts::{match_query_concepts, MAX_QUERY_CONCEPTS};
