

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::providers::{RerankProvider, SignalError};
use crate::core::error::KbError;


#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    score: f64,
}

/// Cross-encoder service speaking `POST /rerank {query, texts}`.
pub struct HttpRerankProvider {
    url: String,
    client: Client,
}

impl HttpRerankProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KbError> {
        let url = url.into().trim_end_matches('/').to_string();
        info!("HttpRerankProvider initialized: {}", url);
        Ok(Self {
            url,
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

/// Reorders service hits back into input order.
fn scores_in_input_order(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f64>, SignalError> {
    let mut scores = vec![None; expected];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| {
            SignalError::InvalidResponse(format!("index {} out of range", hit.index))
        })?;
        *slot = Some(hit.score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| SignalError::InvalidResponse(format!("missing score for {}", i))))
        .collect()
}

#[async_trait]
impl RerankProvider for HttpRerankProvider {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f64>, SignalError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self
            .client
            .post(format!("{}/rerank", self.url))
            .json(&RerankRequest { query, texts: documents })
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<RerankHit>>()
            .await?;
        scores_in_input_order(hits, documents.len())
    }

    async fn available(&self) -> bool {
        self.client
            .get(format!("{}/health", self.url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn provider_name(&self) -> &str {
        "cross-encoder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_restored_to_input_order() {
        let hits = vec![
            RerankHit { index: 2, score: 0.9 },
            RerankHit { index: 0, score: 0.4 },
            RerankHit { index: 1, score: 0.1 },
        ];
        assert_eq!(scores_in_input_order(hits, 3).unwrap(), vec![0.4, 0.1, 0.9]);
    }

    #[test]
    fn test_missing_or_extra_index_is_invalid() {
        let missing = vec![RerankHit { index: 0, score: 0.4 }];
        assert!(scores_in_input_order(missing, 2).is_err());

        let extra = vec![RerankHit { index: 5, score: 0.4 }];
        assert!(scores_in_input_order(extra, 2).is_err());
    }
}
