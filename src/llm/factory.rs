

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::embeddings::HttpEmbeddingProvider;
use super::expansion::OllamaExpansionProvider;
use super::limiter::{SignalGuard, TokenBucket};
use super::providers::{EmbeddingProvider, ExpansionProvider, RerankProvider};
use super::reranker::HttpRerankProvider;
use crate::core::config::KbConfig;
use crate::core::error::Result;
use crate::DEFAULT_EMBEDDING_CACHE_SIZE;


pub struct ProviderFactory;

impl ProviderFactory {
    /// `None` when `embedding_provider` is `"none"`.
    pub fn embedding_from_config(config: &KbConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
        if config.embedding_provider == "none" {
            info!("Embedding provider disabled");
            return Ok(None);
        }
        let provider = HttpEmbeddingProvider::new(
            &config.embedding_provider,
            config.embedding_url.clone(),
            config.embedding_model.clone(),
            config.embedding_api_key.clone(),
            Duration::from_secs(config.timeout),
            DEFAULT_EMBEDDING_CACHE_SIZE,
        )?;
        Ok(Some(Arc::new(provider)))
    }

    
    pub fn rerank_from_config(config: &KbConfig) -> Result<Option<Arc<dyn RerankProvider>>> {
        if !config.rerank_enabled {
            return Ok(None);
        }
        let provider = HttpRerankProvider::new(config.rerank_url.clone(), Duration::from_secs(config.timeout))?;
        Ok(Some(Arc::new(provider)))
    }

    /// `None` unless `expansion_llm_enabled`.
    pub fn expansion_from_config(config: &KbConfig) -> Result<Option<Arc<dyn ExpansionProvider>>> {
        if !config.expansion_llm_enabled {
            return Ok(None);
        }
        let provider = OllamaExpansionProvider::new(
            config.expansion_llm_url.clone(),
            config.expansion_llm_model.clone(),
            Duration::from_secs(config.timeout),
        )?;
        Ok(Some(Arc::new(provider)))
    }

    /// One limiter shared by every provider built from this config.
    pub fn signal_guard(config: &KbConfig) -> SignalGuard {
        SignalGuard::new(
            Arc::new(TokenBucket::new(config.signal_rate_per_sec, config.signal_burst)),
            Duration::from_millis(config.signal_timeout_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_providers() {
        let mut config = KbConfig::default();
        config.embedding_provider = "none".to_string();
        assert!(ProviderFactory::embedding_from_config(&config).unwrap().is_none());
        assert!(ProviderFactory::rerank_from_config(&config).unwrap().is_none());
        assert!(ProviderFactory::expansion_from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_expansion_enabled() {
        let mut config = KbConfig::default();
        config.expansion_llm_enabled = true;
        let provider = ProviderFactory::expansion_from_config(&config).unwrap().unwrap();
        assert_eq!(provider.provider_name(), "ollama");
    }

    #[test]
    fn test_rerank_enabled() {
        let mut config = KbConfig::default();
        config.rerank_enabled = true;
        let provider = ProviderFactory::rerank_from_config(&config).unwrap().unwrap();
        assert_eq!(provider.provider_name(), "cross-encoder");
    }
}
