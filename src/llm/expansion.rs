

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::providers::{ExpansionProvider, SignalError};
use crate::core::error::KbError;

const SYSTEM_PROMPT: &str = "You return only valid JSON arrays of strings.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: &'static str,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TermList {
    Bare(Vec<serde_json::Value>),
    Wrapped { terms: Vec<serde_json::Value> },
}

fn prompt(query: &str, max_terms: usize) -> String {
    format!(
        "You are expanding a search query about causal inference and econometrics.\n\n\
         Given the query: \"{}\"\n\n\
         List up to {} related technical terms or synonyms that would help find relevant documents.\n\
         Return ONLY a JSON array of strings, no explanation.\n\n\
         Example: [\"term1\", \"term2\", \"term3\"]",
        query, max_terms
    )
}

/// Accepts a bare array or `{"terms": [...]}`; non-string entries are skipped.
fn parse_terms(content: &str) -> Result<Vec<String>, SignalError> {
    let values = match serde_json::from_str::<TermList>(content.trim())? {
        TermList::Bare(values) | TermList::Wrapped { terms: values } => values,
    };
    Ok(values
        .into_iter()
        .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect())
}

/// Query expansion through an Ollama chat model in JSON mode.
pub struct OllamaExpansionProvider {
    url: String,
    model: String,
    client: Client,
}

impl OllamaExpansionProvider {
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, KbError> {
        let url = url.into().trim_end_matches('/').to_string();
        let model = model.into();
        info!("Ollama expansion provider initialized (model={}, url={})", model, url);
        Ok(Self {
            url,
            model,
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ExpansionProvider for OllamaExpansionProvider {
    async fn expand(&self, query: &str, max_terms: usize) -> Result<Vec<String>, SignalError> {
        if query.trim().is_empty() {
            return Err(SignalError::EmptyText);
        }
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt(query, max_terms),
                },
            ],
            stream: false,
            format: "json",
            options: ChatOptions { temperature: 0.0 },
        };
        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        let mut terms = parse_terms(&response.message.content)?;
        terms.truncate(max_terms);
        debug!("LLM expansion for '{}': {:?}", crate::safe_truncate(query, 50), terms);
        Ok(terms)
    }

    async fn available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}
