pub mod budget;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod kb_client;
pub mod models;

pub use self::config::KbConfig;
pub use self::context::{ContextPolicy, ContextType, ContextWeights, FusionWeights};
pub use self::error::{KbError, Result};
pub use self::gate::{BatchStatus, ExclusiveGate, GatePermit};
pub use self::kb_client::{KnowledgeBase, Providers};
