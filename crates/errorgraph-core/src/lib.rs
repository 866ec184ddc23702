pub mod categorize;
pub mod config;
pub mod error;
pub mod fixes;
pub mod store;
pub mod symbols;
pub mod types;

pub use categorize::*;
pub use self::config::*;
pub use error::*;
pub use fixes::*;
pub use store::*;
pub use symbols::*;
pub use types::*;
