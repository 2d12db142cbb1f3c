pub mod authority;
pub mod matcher;
pub mod pagerank;

pub use authority::{
    validate_damping, AuthorityReport, CitationAuthority, CitationGraphStats, CitationStats, CitedSource,
    CorpusCitationSummary,
};
pub use matcher::{trigram_similarity, CitationMatch, CitationMatcher, MatchMethod};
pub use pagerank::{pagerank, PageRank};
