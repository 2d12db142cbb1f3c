

pub mod base;

pub use base::{EmbeddingProvider, ExpansionProvider, ExtractionProvider, RerankProvider, SignalError};
