

pub mod embeddings;
pub mod expansion;
pub mod factory;
pub mod limiter;
pub mod providers;
pub mod reranker;

pub use embeddings::HttpEmbeddingProvider;
pub use expansion::OllamaExpansionProvider;
pub use factory::ProviderFactory;
pub use limiter::{SignalGuard, TokenBucket};
pub use providers::{EmbeddingProvider, ExpansionProvider, ExtractionProvider, RerankProvider, SignalError};
pub use reranker::HttpRerankProvider;
