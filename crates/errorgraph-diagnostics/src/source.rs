use async_trait::async_trait;
use errorgraph_core::RawDiagnostic;
use std::path::Path;

/// Result of one adapter invocation. The adapter reports what happened; the aggregator decides
/// what to log and what to keep.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Ok(Vec<RawDiagnostic>),
    /// The call exceeded its deadline or was cancelled.
    Timeout,
    /// Backend binary missing, connection refused, or process crashed.
    Unavailable(String),
    /// Some output lines could not be parsed; the well-formed ones are kept.
    ParseError {
        diagnostics: Vec<RawDiagnostic>,
        malformed: Vec<String>,
    },
}

impl SourceOutcome {
    pub fn from_parsed(diagnostics: Vec<RawDiagnostic>, malformed: Vec<String>) -> Self {
        if malformed.is_empty() {
            SourceOutcome::Ok(diagnostics)
        } else {
            SourceOutcome::ParseError {
                diagnostics,
                malformed,
            }
        }
    }

    /// Diagnostics contributed to aggregation; failures contribute none.
    pub fn into_diagnostics(self) -> Vec<RawDiagnostic> {
        match self {
            SourceOutcome::Ok(d) => d,
            SourceOutcome::ParseError { diagnostics, .. } => diagnostics,
            SourceOutcome::Timeout | SourceOutcome::Unavailable(_) => Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SourceOutcome::Timeout | SourceOutcome::Unavailable(_))
    }
}

/// One external diagnostic producer. Implementations never panic or error out of `scan`;
/// every failure is expressed as a `SourceOutcome`.
#[async_trait]
pub trait DiagnosticSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this source should be asked about `file_path`.
    fn handles(&self, file_path: &str) -> bool;

    /// Scans one file (relative to `root`). Reported paths are relative to `root`.
    async fn scan(&self, root: &Path, file_path: &str) -> SourceOutcome;

    /// True when `scan` bounds its own work, starting the clock only once any shared
    /// resource (such as a single server connection) is held. The aggregator then skips
    /// its outer per-job timeout for this source but still honours cancellation.
    fn times_itself(&self) -> bool {
        false
    }

    /// Releases long-lived resources such as language-server processes.
    async fn shutdown(&self) {}
}

pub(crate) fn extension_matches(extensions: &[String], file_path: &str) -> bool {
    if extensions.is_empty() {
        return true;
    }
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x.trim_start_matches('.') == ext))
}
