use crate::command::CommandSource;
use crate::lsp::LspSource;
use crate::source::{DiagnosticSource, SourceOutcome};
use errorgraph_core::{
    CategoryRules, DiagnosticsSettings, ErrorLocation, FixConfidence, FixSynthesizer,
    RawDiagnostic, Result,
    Severity, SourceKind, SourceStore, UnifiedError,
};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one aggregation pass.
#[derive(Debug, Default)]
pub struct AggregationReport {
    /// Every requested file has an entry, possibly empty.
    pub errors_by_file: BTreeMap<String, Vec<UnifiedError>>,
    /// Sources that timed out or were unavailable at least once during the pass.
    pub failed_sources: BTreeSet<String>,
    pub malformed_lines: usize,
}

impl AggregationReport {
    pub fn total_errors(&self) -> usize {
        self.errors_by_file.values().map(Vec::len).sum()
    }
}

/// Builds configured sources. LSP sources share the pass timeout.
pub fn sources_from_settings(settings: &DiagnosticsSettings) -> Vec<Arc<dyn DiagnosticSource>> {
    let mut sources: Vec<Arc<dyn DiagnosticSource>> = Vec::new();
    for config in &settings.sources {
        let built: Result<Arc<dyn DiagnosticSource>> = match config.kind {
            SourceKind::Command => {
                CommandSource::from_config(config).map(|s| Arc::new(s) as Arc<dyn DiagnosticSource>)
            }
            SourceKind::Lsp => LspSource::from_config(config, settings.timeout())
                .map(|s| Arc::new(s) as Arc<dyn DiagnosticSource>),
        };
        match built {
            Ok(source) => sources.push(source),
            Err(e) => warn!(source = %config.name, error = %e, "skipping misconfigured source"),
        }
    }
    sources
}

/// Runs every source over every file with a bounded worker pool, then normalises,
/// categorises and attaches fixes.
pub struct ErrorAggregator {
    root: PathBuf,
    sources: Vec<Arc<dyn DiagnosticSource>>,
    store: Arc<dyn SourceStore>,
    rules: CategoryRules,
    synthesizer: FixSynthesizer,
    min_auto_confidence: FixConfidence,
    timeout: Duration,
    max_workers: usize,
}

impl ErrorAggregator {
    pub fn new(
        root: impl Into<PathBuf>,
        sources: Vec<Arc<dyn DiagnosticSource>>,
        store: Arc<dyn SourceStore>,
    ) -> Self {
        let defaults = DiagnosticsSettings::default();
        Self {
            root: root.into(),
            sources,
            store,
            rules: CategoryRules::default(),
            synthesizer: FixSynthesizer::default(),
            min_auto_confidence: FixConfidence::Medium,
            timeout: defaults.timeout(),
            max_workers: defaults.max_workers,
        }
    }

    pub fn with_settings(mut self, settings: &DiagnosticsSettings) -> Self {
        self.timeout = settings.timeout();
        self.max_workers = settings.max_workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Threshold behind `UnifiedError::auto_fixable`; keep it equal to the resolver's.
    pub fn with_min_auto_confidence(mut self, min_confidence: FixConfidence) -> Self {
        self.min_auto_confidence = min_confidence;
        self
    }

    pub fn with_rules(mut self, rules: CategoryRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: FixSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sources(&self) -> &[Arc<dyn DiagnosticSource>] {
        &self.sources
    }

    pub fn rules(&self) -> &CategoryRules {
        &self.rules
    }

    pub async fn aggregate(&self, files: &[String], cancel: &CancellationToken) -> AggregationReport {
        let mut report = AggregationReport::default();
        for file in files {
            report.errors_by_file.entry(file.clone()).or_default();
        }

        let jobs: Vec<(usize, usize, &String)> = files
            .iter()
            .enumerate()
            .flat_map(|(fi, file)| {
                self.sources
                    .iter()
                    .enumerate()
                    .filter(move |(_, s)| s.handles(file))
                    .map(move |(si, _)| (fi, si, file))
            })
            .collect();
        debug!(files = files.len(), jobs = jobs.len(), "starting aggregation pass");

        let root = self.root.as_path();
        let timeout = self.timeout;
        let mut outcomes: Vec<(usize, usize, SourceOutcome)> = stream::iter(jobs)
            .map(|(fi, si, file)| {
                let source = self.sources[si].clone();
                async move {
                    let outcome = if source.times_itself() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => SourceOutcome::Timeout,
                            outcome = source.scan(root, file) => outcome,
                        }
                    } else {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => SourceOutcome::Timeout,
                            res = tokio::time::timeout(timeout, source.scan(root, file)) => {
                                res.unwrap_or(SourceOutcome::Timeout)
                            }
                        }
                    };
                    (fi, si, outcome)
                }
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;
        // Workers finish in any order; merge in (file, source) order for stable output.
        outcomes.sort_by_key(|(fi, si, _)| (*fi, *si));

        let requested: HashSet<&str> = files.iter().map(String::as_str).collect();
        let mut raw_by_file: BTreeMap<String, Vec<(usize, RawDiagnostic)>> = BTreeMap::new();
        for (_, si, outcome) in outcomes {
            let name = self.sources[si].name();
            match &outcome {
                SourceOutcome::Timeout => {
                    if report.failed_sources.insert(name.to_string()) {
                        warn!(source = %name, timeout = ?timeout, "diagnostic source timed out");
                    }
                }
                SourceOutcome::Unavailable(reason) => {
                    if report.failed_sources.insert(name.to_string()) {
                        warn!(source = %name, reason = %reason, "diagnostic source unavailable");
                    }
                }
                SourceOutcome::ParseError { malformed, .. } => {
                    report.malformed_lines += malformed.len();
                    debug!(source = %name, skipped = malformed.len(), "skipped malformed output lines");
                }
                SourceOutcome::Ok(_) => {}
            }
            for raw in outcome.into_diagnostics() {
                // Tools may report on files they were not asked about (imports, stubs).
                if !requested.contains(raw.file_path.as_str()) {
                    debug!(source = %name, file = %raw.file_path, "dropping diagnostic for unrequested file");
                    continue;
                }
                raw_by_file.entry(raw.file_path.clone()).or_default().push((si, raw));
            }
        }

        for (file, raws) in raw_by_file {
            let content = self.store.read(&file).await.ok();
            let errors = self.unify(raws, content.as_deref());
            report.errors_by_file.insert(file, errors);
        }

        info!(
            files = report.errors_by_file.len(),
            errors = report.total_errors(),
            failed_sources = report.failed_sources.len(),
            "aggregation pass complete"
        );
        report
    }

    /// Normalises one file's raw diagnostics (tagged with source index).
    fn unify(&self, raws: Vec<(usize, RawDiagnostic)>, content: Option<&str>) -> Vec<UnifiedError> {
        let mut seen = HashSet::new();
        let mut errors: Vec<(usize, UnifiedError)> = Vec::with_capacity(raws.len());
        for (si, raw) in raws {
            let error = self.normalize(self.sources[si].name(), raw, content);
            if seen.insert(error.id.clone()) {
                errors.push((si, error));
            }
        }

        // Same position, different source: keep both and cross-link.
        let mut by_position: HashMap<(u32, u32), Vec<(usize, String)>> = HashMap::new();
        for (si, e) in &errors {
            by_position
                .entry((e.location.line, e.location.character))
                .or_default()
                .push((*si, e.id.clone()));
        }

        let mut linked: Vec<(usize, UnifiedError)> = errors
            .into_iter()
            .map(|(si, e)| {
                let related: Vec<String> = by_position
                    .get(&(e.location.line, e.location.character))
                    .map(|group| {
                        group
                            .iter()
                            .filter(|(other_si, _)| *other_si != si)
                            .map(|(_, id)| id.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                if related.is_empty() {
                    (si, e)
                } else {
                    (si, e.with_related(related))
                }
            })
            .collect();

        linked.sort_by_key(|(si, e)| (e.location.line, e.location.character, *si));
        linked.into_iter().map(|(_, e)| e).collect()
    }

    pub fn normalize(&self, source: &str, raw: RawDiagnostic, content: Option<&str>) -> UnifiedError {
        let mut location = ErrorLocation::new(raw.file_path, raw.line.max(1), raw.column.max(1));
        if let (Some(end_line), Some(end_col)) = (raw.end_line, raw.end_column) {
            location = location.with_end(end_line, end_col);
        }
        let category = self.rules.categorize(&raw.message, raw.code.as_deref());
        let error = UnifiedError::new(
            raw.message,
            Severity::from_text(&raw.severity_text),
            category,
            location,
            source,
            raw.code,
        );
        let fixes = self.synthesizer.synthesize(&error, content);
        error.with_fixes_at(fixes, self.min_auto_confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use errorgraph_core::{ChangeKind, ErrorCategory, ErrorGraphError};
    use parking_lot::Mutex;
    use std::time::Instant;

    struct MemoryStore(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl SourceStore for MemoryStore {
        async fn read(&self, path: &str) -> Result<String> {
            self.0
                .lock()
                .get(path)
                .cloned()
                .ok_or_else(|| ErrorGraphError::NotFound(path.to_string()))
        }

        async fn write(&self, path: &str, content: &str) -> Result<()> {
            self.0.lock().insert(path.to_string(), content.to_string());
            Ok(())
        }
    }

    struct Fixed {
        name: &'static str,
        outcome: SourceOutcome,
    }

    #[async_trait]
    impl DiagnosticSource for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn handles(&self, _file_path: &str) -> bool {
            true
        }

        async fn scan(&self, _root: &Path, _file_path: &str) -> SourceOutcome {
            self.outcome.clone()
        }
    }

    /// Sleeps before answering.
    struct Sleepy {
        delay: Duration,
    }

    #[async_trait]
    impl DiagnosticSource for Sleepy {
        fn name(&self) -> &str {
            "pyright"
        }

        fn handles(&self, _file_path: &str) -> bool {
            true
        }

        async fn scan(&self, _root: &Path, file_path: &str) -> SourceOutcome {
            tokio::time::sleep(self.delay).await;
            SourceOutcome::Ok(vec![raw(file_path, 1, 1, "undefined name 'x'", "F821")])
        }
    }

    /// One connection shared by every file: scans run one at a time and each is
    /// bounded only after it holds the connection.
    struct SingleConnection {
        conn: tokio::sync::Mutex<()>,
        work: Duration,
        budget: Duration,
    }

    #[async_trait]
    impl DiagnosticSource for SingleConnection {
        fn name(&self) -> &str {
            "pylsp"
        }

        fn handles(&self, _file_path: &str) -> bool {
            true
        }

        fn times_itself(&self) -> bool {
            true
        }

        async fn scan(&self, _root: &Path, file_path: &str) -> SourceOutcome {
            let _conn = self.conn.lock().await;
            let work = tokio::time::sleep(self.work);
            match tokio::time::timeout(self.budget, work).await {
                Ok(()) => SourceOutcome::Ok(vec![raw(file_path, 1, 1, "trailing whitespace", "W291")]),
                Err(_) => SourceOutcome::Timeout,
            }
        }
    }

    fn raw(file: &str, line: u32, col: u32, message: &str, code: &str) -> RawDiagnostic {
        RawDiagnostic {
            file_path: file.to_string(),
            line,
            column: col,
            severity_text: "warning".to_string(),
            message: message.to_string(),
            code: Some(code.to_string()),
            end_line: None,
            end_column: None,
        }
    }

    fn store(files: &[(&str, &str)]) -> Arc<dyn SourceStore> {
        Arc::new(MemoryStore(Mutex::new(
            files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )))
    }

    #[tokio::test]
    async fn unused_import_becomes_auto_fixable_delete() {
        let flake8 = Fixed {
            name: "flake8",
            outcome: SourceOutcome::Ok(vec![raw("a.py", 3, 1, "'os' imported but unused", "F401")]),
        };
        let aggregator = ErrorAggregator::new(
            "/project",
            vec![Arc::new(flake8)],
            store(&[("a.py", "import sys\n\nimport os\nprint(sys.argv)\n")]),
        );

        let report = aggregator
            .aggregate(&["a.py".to_string()], &CancellationToken::new())
            .await;
        let errors = &report.errors_by_file["a.py"];
        assert_eq!(errors.len(), 1);
        let e = &errors[0];
        assert_eq!(e.category, ErrorCategory::Unused);
        assert!(e.auto_fixable());
        let change = &e.fixes()[0].changes[0];
        assert_eq!(change.kind, ChangeKind::DeleteLine);
        assert_eq!(change.line, 3);
    }

    #[tokio::test]
    async fn same_position_from_two_sources_is_kept_and_linked() {
        let flake8 = Fixed {
            name: "flake8",
            outcome: SourceOutcome::Ok(vec![raw("b.py", 2, 5, "undefined name 'np'", "F821")]),
        };
        let pyright = Fixed {
            name: "pyright",
            outcome: SourceOutcome::Ok(vec![raw("b.py", 2, 5, "\"np\" is not defined", "reportUndefinedVariable")]),
        };
        let aggregator = ErrorAggregator::new(
            "/project",
            vec![Arc::new(flake8), Arc::new(pyright)],
            store(&[]),
        );

        let report = aggregator
            .aggregate(&["b.py".to_string()], &CancellationToken::new())
            .await;
        let errors = &report.errors_by_file["b.py"];
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].source, "flake8");
        assert_eq!(errors[1].source, "pyright");
        assert_eq!(errors[0].related(), &[errors[1].id.clone()]);
        assert_eq!(errors[1].related(), &[errors[0].id.clone()]);
    }

    #[tokio::test]
    async fn failed_sources_contribute_nothing() {
        let dead = Fixed {
            name: "mypy",
            outcome: SourceOutcome::Unavailable("mypy: not found".to_string()),
        };
        let slow = Fixed {
            name: "pyright",
            outcome: SourceOutcome::Timeout,
        };
        let ok = Fixed {
            name: "flake8",
            outcome: SourceOutcome::ParseError {
                diagnostics: vec![raw("c.py", 1, 1, "trailing whitespace", "W291")],
                malformed: vec!["???".to_string()],
            },
        };
        let aggregator = ErrorAggregator::new(
            "/project",
            vec![Arc::new(dead), Arc::new(slow), Arc::new(ok)],
            store(&[("c.py", "x = 1   \n")]),
        );

        let files = vec!["c.py".to_string(), "d.py".to_string()];
        let report = aggregator.aggregate(&files, &CancellationToken::new()).await;
        assert_eq!(report.errors_by_file["c.py"].len(), 1);
        assert!(report.errors_by_file["d.py"].is_empty());
        assert_eq!(report.malformed_lines, 2);
        assert_eq!(
            report.failed_sources.iter().cloned().collect::<Vec<_>>(),
            vec!["mypy".to_string(), "pyright".to_string()]
        );
        assert_eq!(report.errors_by_file["c.py"][0].category, ErrorCategory::Style);
    }

    #[tokio::test]
    async fn cancelled_pass_returns_empty_entries() {
        let flake8 = Fixed {
            name: "flake8",
            outcome: SourceOutcome::Ok(vec![raw("a.py", 1, 1, "'os' imported but unused", "F401")]),
        };
        let aggregator =
            ErrorAggregator::new("/project", vec![Arc::new(flake8)], store(&[]));
        let token = CancellationToken::new();
        token.cancel();
        let report = aggregator.aggregate(&["a.py".to_string()], &token).await;
        assert!(report.errors_by_file["a.py"].is_empty());
        assert!(report.failed_sources.contains("flake8"));
    }

    #[tokio::test]
    async fn slow_source_times_out_while_others_contribute() {
        let flake8 = Fixed {
            name: "flake8",
            outcome: SourceOutcome::Ok(vec![raw("a.py", 1, 1, "'os' imported but unused", "F401")]),
        };
        let slow = Sleepy {
            delay: Duration::from_secs(5),
        };
        let aggregator = ErrorAggregator::new(
            "/project",
            vec![Arc::new(flake8), Arc::new(slow)],
            store(&[("a.py", "import os\n")]),
        )
        .with_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let report = aggregator
            .aggregate(&["a.py".to_string()], &CancellationToken::new())
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            report.failed_sources.iter().cloned().collect::<Vec<_>>(),
            vec!["pyright".to_string()]
        );
        let errors = &report.errors_by_file["a.py"];
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, "flake8");
    }

    #[tokio::test]
    async fn queued_files_on_one_connection_get_their_own_budget() {
        // Each scan takes 150ms of a 300ms budget; the pass timeout is 200ms. The second
        // file waits ~150ms for the connection, which must not count against it.
        let lsp = SingleConnection {
            conn: tokio::sync::Mutex::new(()),
            work: Duration::from_millis(150),
            budget: Duration::from_millis(300),
        };
        let aggregator = ErrorAggregator::new("/project", vec![Arc::new(lsp)], store(&[]))
            .with_timeout(Duration::from_millis(200));
        let aggregator = ErrorAggregator {
            max_workers: 2,
            ..aggregator
        };

        let files = vec!["a.py".to_string(), "b.py".to_string()];
        let report = aggregator.aggregate(&files, &CancellationToken::new()).await;
        assert!(report.failed_sources.is_empty());
        assert_eq!(report.errors_by_file["a.py"].len(), 1);
        assert_eq!(report.errors_by_file["b.py"].len(), 1);
    }

    #[tokio::test]
    async fn diagnostics_for_unrequested_files_are_dropped() {
        let mypy = Fixed {
            name: "mypy",
            outcome: SourceOutcome::Ok(vec![
                raw("a.py", 1, 1, "undefined name 'x'", "F821"),
                raw("b.py", 4, 1, "undefined name 'y'", "F821"),
            ]),
        };
        let aggregator = ErrorAggregator::new("/project", vec![Arc::new(mypy)], store(&[]));

        let report = aggregator
            .aggregate(&["a.py".to_string()], &CancellationToken::new())
            .await;
        assert_eq!(report.errors_by_file.keys().collect::<Vec<_>>(), vec!["a.py"]);
        assert_eq!(report.total_errors(), 1);
    }

    #[tokio::test]
    async fn auto_fixable_uses_the_configured_threshold() {
        // Removing one name from a multi-name import is a MEDIUM fix.
        let flake8 = || Fixed {
            name: "flake8",
            outcome: SourceOutcome::Ok(vec![raw("a.py", 1, 1, "'os.path' imported but unused", "F401")]),
        };
        let files = [("a.py", "import os.path, sys\nprint(sys.argv)\n")];

        let strict = ErrorAggregator::new("/project", vec![Arc::new(flake8())], store(&files))
            .with_min_auto_confidence(FixConfidence::High);
        let report = strict
            .aggregate(&["a.py".to_string()], &CancellationToken::new())
            .await;
        let error = &report.errors_by_file["a.py"][0];
        assert_eq!(error.fixes()[0].confidence, FixConfidence::Medium);
        assert!(!error.auto_fixable());

        let default = ErrorAggregator::new("/project", vec![Arc::new(flake8())], store(&files));
        let report = default
            .aggregate(&["a.py".to_string()], &CancellationToken::new())
            .await;
        assert!(report.errors_by_file["a.py"][0].auto_fixable());
    }
}
