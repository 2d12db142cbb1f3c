

use helix_rs::{HelixDB, HelixDBClient, HelixError};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::config::KbConfig;
use crate::core::error::KbError;


const INITIAL_RETRY_DELAY_MS: u64 = 100;

const MAX_RETRY_DELAY_MS: u64 = 10000;


#[derive(Debug, Error)]
pub enum HelixClientError {
    #[error("Query failed: {0}")]
    Query(String),
    #[error("Helix error: {0}")]
    Helix(#[from] HelixError),
    #[error("Retry exhausted after {0} attempts: {1}")]
    RetryExhausted(u32, String),
}

impl From<HelixClientError> for KbError {
    fn from(e: HelixClientError) -> Self {
        match e {
            HelixClientError::RetryExhausted(..) => KbError::Connection(e.to_string()),
            other => KbError::Query(other.to_string()),
        }
    }
}

/// Named-query client with exponential backoff.
pub struct HelixClient {
    inner: HelixDB,
    base_url: String,
    max_retries: u32,
}

impl HelixClient {
    pub fn new(host: &str, port: u16, max_retries: u32) -> Self {
        let endpoint = format!("http://{}", host);
        let base_url = format!("http://{}:{}", host, port);

        let inner = <HelixDB as HelixDBClient>::new(Some(&endpoint), Some(port), None);

        info!("HelixClient created for {}", base_url);

        Self {
            inner,
            base_url,
            max_retries: max_retries.max(1),
        }
    }

    pub fn from_config(config: &KbConfig) -> Self {
        Self::new(&config.helix_host, config.helix_port, config.max_retries)
    }

    
    pub async fn execute_query<T, P>(&self, query_name: &str, params: &P) -> Result<T, HelixClientError>
    where
        T: DeserializeOwned,
        P: Serialize + Sync,
    {
        let mut last_error = None;
        let mut delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);

        for attempt in 1..=self.max_retries {
            debug!("Executing query: {} (attempt {})", query_name, attempt);

            match self.inner.query::<P, T>(query_name, params).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let err_str = e.to_string();
                    if err_str.contains("not found") || err_str.contains("No value") {
                        return Err(HelixClientError::Query(err_str));
                    }

                    debug!("Query {} failed (attempt {}): {}", query_name, attempt, e);
                    last_error = Some(err_str);

                    if attempt < self.max_retries {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(Duration::from_millis(MAX_RETRY_DELAY_MS));
                    }
                }
            }
        }

        Err(HelixClientError::RetryExhausted(
            self.max_retries,
            last_error.unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }

    
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
