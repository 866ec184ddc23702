pub mod cache;

pub use cache::*;

// Re-export common types for convenience
pub use errorgraph_core::{CacheSettings, UnifiedError};
