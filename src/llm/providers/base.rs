

use async_trait::async_trait;
use thiserror::Error;

use crate::toolkit::ingest::RawExtraction;


#[derive(Error, Debug)]
pub enum SignalError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Empty text")]
    EmptyText,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}


#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SignalError>;

    
    async fn available(&self) -> bool;

    
    fn provider_name(&self) -> &str;
}

/// Cross-encoder scoring. Returns one score per document, in input order.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f64>, SignalError>;

    
    async fn available(&self) -> bool;

    
    fn provider_name(&self) -> &str;
}


/// Related search terms for a query, at most `max_terms` of them.
#[async_trait]
pub trait ExpansionProvider: Send + Sync {
    
    async fn expand(&self, query: &str, max_terms: usize) -> Result<Vec<String>, SignalError>;

    
    async fn available(&self) -> bool;

    
    fn provider_name(&self) -> &str;
}


#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    
    async fn extract(&self, text: &str) -> Result<RawExtraction, SignalError>;

    
    async fn available(&self) -> bool;

    
    fn provider_name(&self) -> &str;
}

