pub mod aggregator;
pub mod command;
pub mod discovery;
pub mod lsp;
pub mod parsers;
pub mod source;

pub use aggregator::{sources_from_settings, AggregationReport, ErrorAggregator};
pub use command::CommandSource;
pub use discovery::discover_files;
pub use lsp::{LspProcess, LspSource};
pub use parsers::{parse_output, ParsedOutput};
pub use source::{DiagnosticSource, SourceOutcome};
