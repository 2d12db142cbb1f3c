

#![allow(dead_code)]

pub mod core;
pub mod db;
pub mod llm;
pub mod toolkit;
pub mod utils;

pub use utils::{safe_truncate, safe_truncate_ellipsis};


pub use crate::core::config::KbConfig;
pub use crate::core::error::{KbError, Result};
pub use crate::core::kb_client::{KnowledgeBase, Providers};
pub use db::{HelixClient, HelixClientError, HelixStore, InMemoryStore, SharedStore};
pub use toolkit::search::{SearchRequest, SearchResponse};


pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11434";


pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";


pub const DEFAULT_HELIX_PORT: u16 = 6969;


pub const DEFAULT_EMBEDDING_CACHE_SIZE: usize = 1000;


pub const DEFAULT_SEARCH_CACHE_TTL: u64 = 300;
