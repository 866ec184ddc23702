use crate::context::{ErrorContext, ErrorContextEngine};
use crate::resolver::{BatchCandidate, BatchResult, ErrorResolver, FixPreview, ResolutionResult};
use dashmap::DashMap;
use errorgraph_cache::{CacheConfig, CacheStats, ErrorCache};
use errorgraph_core::{
    EngineConfig, ErrorGraphError, FixConfidence, Result, SourceStore, SymbolProvider,
    UnifiedError,
};
use errorgraph_diagnostics::{discover_files, DiagnosticSource, ErrorAggregator};
use errorgraph_graph::{BlastRadiusAnalyzer, BlastRadiusResult, DependencyGraph, DependencyGraphBuilder};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One open codebase: owns the error cache, the dependency graph and the refresher task.
pub struct Session {
    root: PathBuf,
    config: EngineConfig,
    cache: ErrorCache,
    aggregator: ErrorAggregator,
    resolver: ErrorResolver,
    context: ErrorContextEngine,
    analyzer: BlastRadiusAnalyzer,
    symbols: Option<Arc<dyn SymbolProvider>>,
    store: Arc<dyn SourceStore>,
    graph: RwLock<Option<Arc<DependencyGraph>>>,
    files: RwLock<Option<Arc<Vec<String>>>>,
    mtimes: DashMap<String, Option<SystemTime>>,
    cancel: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        sources: Vec<Arc<dyn DiagnosticSource>>,
        symbols: Option<Arc<dyn SymbolProvider>>,
        store: Arc<dyn SourceStore>,
    ) -> Self {
        let root = root.into();
        let aggregator = ErrorAggregator::new(root.clone(), sources, store.clone())
            .with_settings(&config.diagnostics)
            .with_min_auto_confidence(config.fixes.min_auto_confidence);
        Self {
            cache: ErrorCache::new(CacheConfig::from(&config.cache)),
            resolver: ErrorResolver::new(store.clone(), config.fixes.min_auto_confidence),
            context: ErrorContextEngine::new(config.context.clone(), config.blast_radius.clone()),
            analyzer: BlastRadiusAnalyzer::new(config.blast_radius.clone()),
            aggregator,
            symbols,
            store,
            graph: RwLock::new(None),
            files: RwLock::new(None),
            mtimes: DashMap::new(),
            cancel: CancellationToken::new(),
            refresher: Mutex::new(None),
            root,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ErrorCache {
        &self.cache
    }

    pub fn resolver(&self) -> &ErrorResolver {
        &self.resolver
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Scannable files under the root, discovered once per refresh cycle.
    pub fn files(&self) -> Result<Arc<Vec<String>>> {
        if let Some(files) = self.files.read().as_ref() {
            return Ok(files.clone());
        }
        let discovered = Arc::new(discover_files(
            &self.root,
            "",
            &self.config.diagnostics.extensions,
        )?);
        *self.files.write() = Some(discovered.clone());
        Ok(discovered)
    }

    /// Maps an absolute or root-relative path to the cache key form.
    pub fn relative_path(&self, file_path: &str) -> String {
        let path = Path::new(file_path);
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let text = relative.to_string_lossy().replace('\\', "/");
        text.strip_prefix("./").unwrap_or(&text).to_string()
    }

    /// Cached errors for each file; misses are aggregated in one pass and cached.
    pub async fn errors_for_files(&self, files: &[String]) -> Result<Vec<UnifiedError>> {
        if self.is_shut_down() {
            return Err(ErrorGraphError::InvalidOperation(
                "session has been shut down".to_string(),
            ));
        }

        let mut hits: Vec<(String, Arc<Vec<UnifiedError>>)> = Vec::new();
        let mut misses: Vec<String> = Vec::new();
        for file in files {
            match self.cache.get(file) {
                Some(errors) => hits.push((file.clone(), errors)),
                None => misses.push(file.clone()),
            }
        }

        if !misses.is_empty() {
            debug!(misses = misses.len(), hits = hits.len(), "aggregating uncached files");
            let report = self.aggregator.aggregate(&misses, &self.cancel).await;
            if !report.failed_sources.is_empty() {
                debug!(failed = ?report.failed_sources, "pass completed with failed sources");
            }
            for (file, errors) in report.errors_by_file {
                self.resolver.track(&errors);
                self.mtimes.insert(file.clone(), self.modified(&file).await);
                self.cache.set(&file, errors.clone());
                hits.push((file, Arc::new(errors)));
            }
        }

        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits
            .into_iter()
            .flat_map(|(_, errors)| errors.iter().cloned().collect::<Vec<_>>())
            .collect())
    }

    pub async fn all_errors(&self) -> Result<Vec<UnifiedError>> {
        let files = self.files()?;
        self.errors_for_files(&files).await
    }

    pub async fn find_error(&self, error_id: &str) -> Result<Option<UnifiedError>> {
        Ok(self
            .all_errors()
            .await?
            .into_iter()
            .find(|e| e.id == error_id))
    }

    /// Current graph, built from the symbol provider on first use.
    pub async fn graph(&self) -> Result<Option<Arc<DependencyGraph>>> {
        if let Some(graph) = self.graph.read().as_ref() {
            return Ok(Some(graph.clone()));
        }
        if self.symbols.is_none() {
            return Ok(None);
        }
        self.refresh_graph().await.map(Some)
    }

    /// Rebuilds the graph wholesale and swaps it in.
    pub async fn refresh_graph(&self) -> Result<Arc<DependencyGraph>> {
        let symbols = self.symbols.as_ref().ok_or_else(|| {
            ErrorGraphError::InvalidOperation("no symbol provider configured".to_string())
        })?;
        let mut builder = DependencyGraphBuilder::new();
        let graph = Arc::new(builder.build(symbols.as_ref()).await?);
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            dropped = builder.dropped_edges(),
            "dependency graph built"
        );
        *self.graph.write() = Some(graph.clone());
        Ok(graph)
    }

    /// Forgets every cached result so the next read re-aggregates.
    pub fn refresh_errors(&self) {
        self.cache.clear();
        self.mtimes.clear();
        *self.files.write() = None;
        self.resolver.reset();
        debug!(root = %self.root.display(), "error cache cleared");
    }

    /// Invalidates cached files whose modification time changed since they were scanned.
    pub async fn refresh_changed(&self) -> usize {
        let tracked: Vec<(String, Option<SystemTime>)> = self
            .mtimes
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        let mut invalidated = 0;
        for (file, seen) in tracked {
            let current = self.modified(&file).await;
            if current != seen || current.is_none() {
                self.cache.invalidate(&file);
                self.mtimes.remove(&file);
                invalidated += 1;
            }
        }
        if invalidated > 0 {
            // Deleted or added files change the discovered set.
            *self.files.write() = None;
        }
        let expired = self.cache.purge_expired();
        if invalidated > 0 || expired > 0 {
            debug!(invalidated, expired, "background refresh");
        }
        invalidated
    }

    pub fn invalidate_files(&self, files: &[String]) {
        for file in files {
            self.cache.invalidate(file);
            self.mtimes.remove(file);
        }
    }

    pub async fn context(&self, error_id: &str) -> Result<Option<ErrorContext>> {
        let Some(error) = self.find_error(error_id).await? else {
            return Ok(None);
        };
        let graph = self.graph().await?;
        let content = match self.store.read(&error.location.file_path).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(file = %error.location.file_path, "content unavailable: {}", e);
                None
            }
        };
        Ok(self
            .context
            .build(&error, graph.as_deref(), content.as_deref()))
    }

    pub async fn preview(&self, error_id: &str) -> Result<Option<FixPreview>> {
        let Some(error) = self.find_error(error_id).await? else {
            return Ok(None);
        };
        let graph = self.graph().await?;
        let blast_radius = graph
            .as_deref()
            .and_then(|g| {
                g.enclosing_node(&error.location.file_path, error.location.line)
                    .map(|node| {
                        self.analyzer
                            .analyze(g, &node.id, self.config.blast_radius.max_depth, true)
                            .total_affected_nodes
                    })
            })
            .unwrap_or(0);
        Ok(Some(self.resolver.preview(&error, blast_radius)))
    }

    pub async fn resolve(&self, error_id: &str) -> Result<ResolutionResult> {
        let result = match self.find_error(error_id).await? {
            Some(error) => self.resolver.resolve(&error).await,
            None => ResolutionResult::not_found(error_id),
        };
        self.invalidate_files(&result.files_modified);
        Ok(result)
    }

    /// Without ids, candidates are the fixable errors ordered per file from the bottom up,
    /// by the last line their fix edits rather than the line they were reported on.
    pub async fn resolve_many(
        &self,
        error_ids: Option<&[String]>,
        auto_fixable_only: bool,
        max_fixes: usize,
    ) -> Result<BatchResult> {
        let errors = self.all_errors().await?;
        let candidates: Vec<BatchCandidate> = match error_ids {
            Some(ids) => ids
                .iter()
                .map(|id| BatchCandidate {
                    error_id: id.clone(),
                    error: errors
                        .iter()
                        .find(|e| &e.id == id)
                        .filter(|e| !auto_fixable_only || e.auto_fixable())
                        .cloned(),
                })
                .collect(),
            None => {
                let mut eligible: Vec<UnifiedError> = errors
                    .into_iter()
                    .filter(|e| {
                        if auto_fixable_only {
                            e.auto_fixable()
                        } else {
                            !e.fixes().is_empty()
                        }
                    })
                    .collect();
                let min_confidence = self.resolver.min_confidence();
                eligible.sort_by(|a, b| {
                    a.location
                        .file_path
                        .cmp(&b.location.file_path)
                        .then_with(|| {
                            edit_anchor(b, min_confidence).cmp(&edit_anchor(a, min_confidence))
                        })
                        .then_with(|| b.location.character.cmp(&a.location.character))
                });
                eligible
                    .into_iter()
                    .map(|e| BatchCandidate {
                        error_id: e.id.clone(),
                        error: Some(e),
                    })
                    .collect()
            }
        };

        let batch = self.resolver.resolve_batch(candidates, max_fixes).await;
        for result in &batch.individual_results {
            self.invalidate_files(&result.files_modified);
        }
        Ok(batch)
    }

    pub async fn blast_radius(
        &self,
        origin_id: &str,
        max_depth: usize,
        include_reverse: bool,
    ) -> Result<BlastRadiusResult> {
        Ok(match self.graph().await? {
            Some(graph) => self
                .analyzer
                .analyze(&graph, origin_id, max_depth, include_reverse),
            None => BlastRadiusResult::empty(origin_id),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Spawns the periodic refresher. The task holds only a weak reference and stops on
    /// shutdown or when the session is dropped.
    pub fn start_background_refresh(self: &Arc<Self>) -> bool {
        let mut slot = self.refresher.lock();
        if slot.is_some() || self.is_shut_down() {
            return false;
        }

        let period = self.config.refresh.interval();
        let cancel = self.cancel.clone();
        let session: Weak<Session> = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(session) = session.upgrade() else { break };
                        session.refresh_changed().await;
                    }
                }
            }
            debug!("background refresh stopped");
        }));
        info!(interval_secs = period.as_secs(), "background refresh started");
        true
    }

    /// Cancels in-flight work, stops the refresher and shuts down every source.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.refresher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("background refresh task ended abnormally: {}", e);
            }
        }
        for source in self.aggregator.sources() {
            source.shutdown().await;
        }
        info!(root = %self.root.display(), "session shut down");
    }

    async fn modified(&self, file: &str) -> Option<SystemTime> {
        tokio::fs::metadata(self.root.join(file))
            .await
            .ok()
            .and_then(|m| m.modified().ok())
    }
}

/// Last line the best automatic fix edits, or the reported line when there is none.
/// Undefined-name fixes insert near the top of the file, far from where they are reported.
fn edit_anchor(error: &UnifiedError, min_confidence: FixConfidence) -> u32 {
    error
        .best_automatic_fix(min_confidence)
        .or_else(|| error.best_fix())
        .and_then(|fix| {
            fix.changes
                .iter()
                .filter(|c| c.file_path == error.location.file_path)
                .map(|c| c.end_line.unwrap_or(c.line).max(c.line))
                .max()
        })
        .unwrap_or(error.location.line)
}
