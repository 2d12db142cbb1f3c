

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::context::{ContextPolicy, ContextWeights};
use super::error::{KbError, Result};


const ENV_PREFIX: &str = "RKB";


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KbConfig {
    
    pub helix_host: String,
    pub helix_port: u16,
    /// Upper bound on concurrent datastore round trips.
    pub pool_size: usize,
    pub timeout: u64,
    pub max_retries: u32,

    
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_url: String,
    pub embedding_api_key: Option<String>,

    
    pub rerank_enabled: bool,
    pub rerank_url: String,
    pub rerank_top_k: usize,

    
    pub signal_rate_per_sec: f64,
    pub signal_burst: u32,
    pub signal_timeout_ms: u64,

    
    pub default_search_limit: usize,
    pub default_graph_weight: f64,
    pub default_max_hops: usize,
    pub candidate_multiplier: usize,
    pub search_cache_size: usize,
    pub search_cache_ttl: u64,
    pub context_weights: ContextPolicy,

    
    pub traversal_max_steps: usize,
    pub traversal_timeout_ms: u64,

    
    pub pagerank_iterations: usize,
    pub pagerank_damping: f64,
    pub citation_title_threshold: f64,

    
    pub expansion_max_terms: usize,
    pub expansion_graph_hops: usize,
    pub synonyms_path: Option<String>,
    pub expansion_llm_enabled: bool,
    pub expansion_llm_url: String,
    pub expansion_llm_model: String,
    pub expansion_llm_terms: usize,

    
    pub min_confidence: f64,
}

impl KbConfig {
    
    pub fn new(helix_host: &str, helix_port: u16) -> Self {
        Self {
            helix_host: helix_host.to_string(),
            helix_port,
            pool_size: 8,
            timeout: 30,
            max_retries: 3,

            embedding_provider: "ollama".to_string(),
            embedding_model: crate::DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_url: crate::DEFAULT_EMBEDDING_URL.to_string(),
            embedding_api_key: None,

            rerank_enabled: false,
            rerank_url: "http://localhost:8081".to_string(),
            rerank_top_k: 50,

            signal_rate_per_sec: 10.0,
            signal_burst: 20,
            signal_timeout_ms: 5_000,

            default_search_limit: 10,
            default_graph_weight: 0.2,
            default_max_hops: 2,
            candidate_multiplier: 2,
            search_cache_size: 256,
            search_cache_ttl: crate::DEFAULT_SEARCH_CACHE_TTL,
            context_weights: ContextPolicy::default(),

            traversal_max_steps: 10_000,
            traversal_timeout_ms: 2_000,

            pagerank_iterations: 20,
            pagerank_damping: 0.85,
            citation_title_threshold: 0.85,

            expansion_max_terms: 10,
            expansion_graph_hops: 1,
            synonyms_path: None,
            expansion_llm_enabled: false,
            expansion_llm_url: crate::DEFAULT_EMBEDDING_URL.to_string(),
            expansion_llm_model: "llama3.1:8b".to_string(),
            expansion_llm_terms: 3,

            min_confidence: 0.0,
        }
    }

    
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.helix_host, self.helix_port)
    }

    /// Defaults overlaid with `RKB_*` variables.
    pub fn from_env() -> Self {
        let mut config = Self::new(
            &std::env::var("RKB_HELIX_HOST").unwrap_or_else(|_| "localhost".to_string()),
            std::env::var("RKB_HELIX_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(6969),
        );

        if let Some(size) = env_parse("RKB_POOL_SIZE") {
            config.pool_size = size;
        }
        if let Ok(provider) = std::env::var("RKB_EMBEDDING_PROVIDER") {
            config.embedding_provider = provider;
        }
        if let Ok(model) = std::env::var("RKB_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(url) = std::env::var("RKB_EMBEDDING_URL") {
            config.embedding_url = url;
        }
        if let Ok(key) = std::env::var("RKB_EMBEDDING_API_KEY") {
            config.embedding_api_key = Some(key);
        }
        if let Some(enabled) = env_parse("RKB_RERANK_ENABLED") {
            config.rerank_enabled = enabled;
        }
        if let Ok(url) = std::env::var("RKB_RERANK_URL") {
            config.rerank_url = url;
        }
        if let Some(rate) = env_parse("RKB_SIGNAL_RATE_PER_SEC") {
            config.signal_rate_per_sec = rate;
        }
        if let Some(burst) = env_parse("RKB_SIGNAL_BURST") {
            config.signal_burst = burst;
        }
        if let Some(timeout) = env_parse("RKB_SIGNAL_TIMEOUT_MS") {
            config.signal_timeout_ms = timeout;
        }
        if let Ok(path) = std::env::var("RKB_SYNONYMS_PATH") {
            config.synonyms_path = Some(path);
        }
        if let Some(enabled) = env_parse("RKB_EXPANSION_LLM_ENABLED") {
            config.expansion_llm_enabled = enabled;
        }
        if let Ok(model) = std::env::var("RKB_EXPANSION_LLM_MODEL") {
            config.expansion_llm_model = model;
        }

        config
    }

    /// Defaults, then an optional config file, then `RKB__*` environment
    /// overrides (nested keys separated by `__`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            debug!("Loading config file {}", path);
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    
    pub fn validate(&self) -> Result<()> {
        if self.embedding_provider != "none" {
            Url::parse(&self.embedding_url).map_err(|e| {
                KbError::Config(format!("invalid embedding_url '{}': {}", self.embedding_url, e))
            })?;
        }
        if self.rerank_enabled {
            Url::parse(&self.rerank_url).map_err(|e| {
                KbError::Config(format!("invalid rerank_url '{}': {}", self.rerank_url, e))
            })?;
        }
        if self.expansion_llm_enabled {
            Url::parse(&self.expansion_llm_url).map_err(|e| {
                KbError::Config(format!("invalid expansion_llm_url '{}': {}", self.expansion_llm_url, e))
            })?;
        }
        if self.pool_size == 0 {
            return Err(KbError::Config("pool_size must be at least 1".to_string()));
        }
        if !(self.pagerank_damping > 0.0 && self.pagerank_damping < 1.0) {
            return Err(KbError::Config(format!(
                "pagerank_damping must be in (0, 1), got {}",
                self.pagerank_damping
            )));
        }
        if self.signal_rate_per_sec <= 0.0 || self.signal_burst == 0 {
            return Err(KbError::Config("signal rate and burst must be positive".to_string()));
        }
        if !(1..=2).contains(&self.expansion_graph_hops) {
            return Err(KbError::Config("expansion_graph_hops must be 1 or 2".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(KbError::Config("min_confidence must be in [0, 1]".to_string()));
        }
        let policy = &self.context_weights;
        for (name, w) in [
            ("building", policy.building),
            ("auditing", policy.auditing),
            ("balanced", policy.balanced),
        ] {
            check_weights(name, w)?;
        }
        if self.default_graph_weight < 0.0 {
            return Err(KbError::Config("default_graph_weight must be non-negative".to_string()));
        }
        Ok(())
    }
}

impl Default for KbConfig {
    fn default() -> Self {
        Self::new("localhost", crate::DEFAULT_HELIX_PORT)
    }
}

fn check_weights(name: &str, w: ContextWeights) -> Result<()> {
    if w.lexical < 0.0 || w.vector < 0.0 || w.citation < 0.0 {
        return Err(KbError::Config(format!("{} weights must be non-negative", name)));
    }
    if w.lexical + w.vector + w.citation <= 0.0 {
        return Err(KbError::Config(format!("{} weights are all zero", name)));
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
