pub mod context;
pub mod edits;
pub mod interface;
pub mod resolver;
pub mod session;
pub mod telemetry;

pub use context::{
    code_window, CodeLine, CodeWindow, ContextScope, EnclosingSymbol, ErrorContext,
    ErrorContextEngine, SymbolDefinition, SymbolReference,
};
pub use edits::{already_present, apply_changes, EditLog, LineBuffer};
pub use interface::{ErrorQuery, UnifiedErrorInterface};
pub use resolver::{
    BatchCandidate, BatchResult, ErrorResolver, EstimatedImpact, FixPreview, ResolutionResult,
    ResolutionState,
};
pub use session::Session;
pub use telemetry::init_tracing;
