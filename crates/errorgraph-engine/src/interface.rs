use crate::context::ErrorContext;
use crate::resolver::{BatchResult, FixPreview, ResolutionResult, ResolutionState};
use crate::session::Session;
use errorgraph_cache::CacheStats;
use errorgraph_core::{
    EngineConfig, ErrorCategory, ErrorSummary, FsSourceStore, Severity, SourceStore,
    SymbolProvider, UnifiedError,
};
use errorgraph_diagnostics::{sources_from_settings, DiagnosticSource};
use errorgraph_graph::{BlastRadiusResult, GraphExport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

/// Filters for [`UnifiedErrorInterface::errors`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorQuery {
    pub include_warnings: bool,
    pub include_hints: bool,
    pub category: Option<ErrorCategory>,
    pub source: Option<String>,
    pub file_path: Option<String>,
}

impl Default for ErrorQuery {
    fn default() -> Self {
        Self {
            include_warnings: true,
            include_hints: false,
            category: None,
            source: None,
            file_path: None,
        }
    }
}

impl ErrorQuery {
    pub fn errors_only() -> Self {
        Self {
            include_warnings: false,
            ..Self::default()
        }
    }

    pub fn for_file(file_path: impl Into<String>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, error: &UnifiedError) -> bool {
        if !self.include_warnings && error.severity == Severity::Warning {
            return false;
        }
        if !self.include_hints && error.severity == Severity::Hint {
            return false;
        }
        if self.category.is_some_and(|c| c != error.category) {
            return false;
        }
        if self.source.as_deref().is_some_and(|s| s != error.source) {
            return false;
        }
        true
    }
}

/// Entry point for CLIs and UIs.
///
/// Construction does no I/O. The session (sources, cache, graph) is created on the first
/// call. No method returns an error: failures are logged and degrade to an empty or
/// unsuccessful result.
pub struct UnifiedErrorInterface {
    root: PathBuf,
    config: EngineConfig,
    sources: Option<Vec<Arc<dyn DiagnosticSource>>>,
    symbols: Option<Arc<dyn SymbolProvider>>,
    store: Option<Arc<dyn SourceStore>>,
    session: OnceCell<Arc<Session>>,
}

impl UnifiedErrorInterface {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: EngineConfig::default(),
            sources: None,
            symbols: None,
            store: None,
            session: OnceCell::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the sources built from configuration.
    pub fn with_sources(mut self, sources: Vec<Arc<dyn DiagnosticSource>>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn DiagnosticSource>) -> Self {
        self.sources.get_or_insert_with(Vec::new).push(source);
        self
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolProvider>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_initialized(&self) -> bool {
        self.session.initialized()
    }

    async fn session(&self) -> &Arc<Session> {
        self.session
            .get_or_init(|| async {
                let sources = self
                    .sources
                    .clone()
                    .unwrap_or_else(|| sources_from_settings(&self.config.diagnostics));
                let store: Arc<dyn SourceStore> = match self.store.clone() {
                    Some(store) => store,
                    None => Arc::new(FsSourceStore::new(self.root.clone())),
                };
                let session = Arc::new(Session::new(
                    self.root.clone(),
                    self.config.clone(),
                    sources,
                    self.symbols.clone(),
                    store,
                ));
                if self.config.refresh.enabled {
                    session.start_background_refresh();
                }
                session
            })
            .await
    }

    pub async fn errors(&self, query: &ErrorQuery) -> Vec<UnifiedError> {
        let session = self.session().await;
        let result = match &query.file_path {
            Some(file) => {
                let file = session.relative_path(file);
                session.errors_for_files(&[file]).await
            }
            None => session.all_errors().await,
        };
        match result {
            Ok(errors) => errors.into_iter().filter(|e| query.matches(e)).collect(),
            Err(e) => {
                warn!("errors unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn error_summary(&self) -> ErrorSummary {
        match self.session().await.all_errors().await {
            Ok(errors) => ErrorSummary::from_errors(&errors),
            Err(e) => {
                warn!("error summary unavailable: {}", e);
                ErrorSummary::default()
            }
        }
    }

    pub async fn full_error_context(&self, error_id: &str) -> Option<ErrorContext> {
        match self.session().await.context(error_id).await {
            Ok(context) => context,
            Err(e) => {
                warn!(error = %error_id, "context unavailable: {}", e);
                None
            }
        }
    }

    /// With `auto_fixable_only = false`, every error carrying at least one fix.
    pub async fn get_fixable_errors(&self, auto_fixable_only: bool) -> Vec<UnifiedError> {
        match self.session().await.all_errors().await {
            Ok(errors) => errors
                .into_iter()
                .filter(|e| {
                    if auto_fixable_only {
                        e.auto_fixable()
                    } else {
                        !e.fixes().is_empty()
                    }
                })
                .collect(),
            Err(e) => {
                warn!("fixable errors unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn preview_fix(&self, error_id: &str) -> Option<FixPreview> {
        match self.session().await.preview(error_id).await {
            Ok(preview) => preview,
            Err(e) => {
                warn!(error = %error_id, "preview unavailable: {}", e);
                None
            }
        }
    }

    pub async fn resolve_error(&self, error_id: &str) -> ResolutionResult {
        match self.session().await.resolve(error_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %error_id, "resolution failed: {}", e);
                let mut result = ResolutionResult::not_found(error_id);
                result.message = e.to_string();
                result
            }
        }
    }

    /// `max_fixes` falls back to the configured default.
    pub async fn resolve_errors(
        &self,
        error_ids: Option<&[String]>,
        auto_fixable_only: bool,
        max_fixes: Option<usize>,
    ) -> BatchResult {
        let max_fixes = max_fixes.unwrap_or(self.config.fixes.default_max_fixes);
        match self
            .session()
            .await
            .resolve_many(error_ids, auto_fixable_only, max_fixes)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!("batch resolution failed: {}", e);
                let mut batch = BatchResult::default();
                for id in error_ids.unwrap_or_default() {
                    let mut result = ResolutionResult::not_found(id);
                    result.message = e.to_string();
                    batch.push(result);
                }
                batch
            }
        }
    }

    pub async fn resolution_state(&self, error_id: &str) -> Option<ResolutionState> {
        self.session().await.resolver().state(error_id)
    }

    pub async fn refresh_errors(&self) {
        self.session().await.refresh_errors();
    }

    pub async fn refresh_graph(&self) -> bool {
        match self.session().await.refresh_graph().await {
            Ok(_) => true,
            Err(e) => {
                warn!("graph refresh failed: {}", e);
                false
            }
        }
    }

    /// Node and edge listing for visualisation; empty when no graph is available.
    pub async fn get_dependency_graph(&self) -> GraphExport {
        match self.session().await.graph().await {
            Ok(Some(graph)) => graph.export(),
            Ok(None) => GraphExport::default(),
            Err(e) => {
                warn!("dependency graph unavailable: {}", e);
                GraphExport::default()
            }
        }
    }

    pub async fn analyze_blast_radius(
        &self,
        origin_id: &str,
        max_depth: Option<usize>,
        include_reverse: bool,
    ) -> BlastRadiusResult {
        let max_depth = max_depth.unwrap_or(self.config.blast_radius.max_depth);
        match self
            .session()
            .await
            .blast_radius(origin_id, max_depth, include_reverse)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(origin = %origin_id, "blast radius unavailable: {}", e);
                BlastRadiusResult::empty(origin_id)
            }
        }
    }

    pub async fn start_background_refresh(&self) -> bool {
        self.session().await.start_background_refresh()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.session().await.cache_stats()
    }

    /// Stops background work and releases sources. A session that was never started is
    /// left untouched.
    pub async fn shutdown(&self) {
        if let Some(session) = self.session.get() {
            session.shutdown().await;
        }
    }
}
