

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::{debug, info};

use super::providers::{EmbeddingProvider, SignalError};
use crate::core::error::KbError;


#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Ollama,
    OpenAi,
}

/// Query embeddings over HTTP (Ollama or an OpenAI-compatible API).
pub struct HttpEmbeddingProvider {
    backend: Backend,
    url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        provider: &str,
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        cache_size: usize,
    ) -> Result<Self, KbError> {
        let backend = match provider.to_lowercase().as_str() {
            "openai" => Backend::OpenAi,
            _ => Backend::Ollama,
        };
        let model = model.into();
        info!(
            "HttpEmbeddingProvider initialized: provider={:?}, model={}, cache={}",
            backend, model, cache_size
        );

        Ok(Self {
            backend,
            url: url.into().trim_end_matches('/').to_string(),
            model,
            api_key,
            client: Client::builder().timeout(timeout).build()?,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>, SignalError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.url))
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<OllamaEmbeddingResponse>()
            .await?;

        Ok(response.embedding)
    }

    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>, SignalError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| SignalError::Unavailable("API key required".to_string()))?;

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&OpenAIEmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<OpenAIEmbeddingResponse>()
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| SignalError::InvalidResponse("No embedding in response".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SignalError> {
        if text.trim().is_empty() {
            return Err(SignalError::EmptyText);
        }
        let cached = self.cache.lock().get(text).cloned();
        if let Some(cached) = cached {
            debug!("Cache HIT for: {}...", crate::safe_truncate(text, 50));
            return Ok(cached);
        }

        let embedding = match self.backend {
            Backend::Ollama => self.embed_ollama(text).await?,
            Backend::OpenAi => self.embed_openai(text).await?,
        };
        if embedding.is_empty() {
            return Err(SignalError::InvalidResponse("empty embedding".to_string()));
        }
        self.cache.lock().put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    async fn available(&self) -> bool {
        match self.backend {
            Backend::Ollama => self
                .client
                .get(format!("{}/api/tags", self.url))
                .send()
                .await
                .map(|r| r.status().is_success())
                .unwrap_or(false),
            Backend::OpenAi => self.api_key.is_some(),
        }
    }

    fn provider_name(&self) -> &str {
        match self.backend {
            Backend::Ollama => "ollama",
            Backend::OpenAi => "openai",
        }
    }
}
