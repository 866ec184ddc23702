use errorgraph_core::{
    ChangeKind, DiagnosticsSettings, ErrorCategory, FsSourceStore, OutputFormat, Severity,
    SourceConfig, SourceKind,
};
use errorgraph_diagnostics::{
    discover_files, sources_from_settings, CommandSource, DiagnosticSource, ErrorAggregator,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("a.py"),
        "import sys\n\nimport os\n\nprint(sys.argv)\n",
    )
    .unwrap();
    std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
    std::fs::write(dir.path().join("pkg/b.py"), "x = 1\n").unwrap();
    dir
}

#[cfg(unix)]
#[tokio::test]
async fn test_flake8_style_command_over_project() {
    let dir = project();
    // Reports an unused import only for a.py, like flake8 would.
    let script = r#"case "$0" in
  a.py) echo "./a.py:3:1: F401 'os' imported but unused"; exit 1;;
  *) exit 0;;
esac"#;
    let fake = CommandSource::new(
        "flake8",
        "sh",
        vec!["-c".to_string(), script.to_string()],
        OutputFormat::Flake8,
    )
    .with_extensions(vec!["py".to_string()]);

    let sources: Vec<Arc<dyn DiagnosticSource>> = vec![Arc::new(fake)];
    let aggregator = ErrorAggregator::new(
        dir.path(),
        sources,
        Arc::new(FsSourceStore::new(dir.path())),
    );

    let files = discover_files(dir.path(), "", &["py".to_string()]).unwrap();
    assert_eq!(files, vec!["a.py".to_string(), "pkg/b.py".to_string()]);

    let report = aggregator.aggregate(&files, &CancellationToken::new()).await;
    assert!(report.failed_sources.is_empty());
    assert!(report.errors_by_file["pkg/b.py"].is_empty());

    let errors = &report.errors_by_file["a.py"];
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    assert_eq!(error.category, ErrorCategory::Unused);
    assert_eq!(error.severity, Severity::Warning);
    assert!(error.auto_fixable());
    assert!(error.fixes()[0]
        .changes
        .iter()
        .any(|c| c.kind == ChangeKind::DeleteLine && c.line == 3));
    assert_eq!(
        error.fixes()[0].changes[0].expected.as_deref(),
        Some("import os")
    );
}

#[tokio::test]
async fn test_missing_backends_do_not_fail_the_pass() {
    let dir = project();
    let settings = DiagnosticsSettings {
        sources: vec![
            SourceConfig {
                name: "ghost-linter".to_string(),
                kind: SourceKind::Command,
                command: "errorgraph-ghost-linter".to_string(),
                args: Vec::new(),
                format: Some(OutputFormat::Flake8),
                language_id: None,
                extensions: vec!["py".to_string()],
            },
            SourceConfig {
                name: "ghost-lsp".to_string(),
                kind: SourceKind::Lsp,
                command: "errorgraph-ghost-lsp".to_string(),
                args: Vec::new(),
                format: None,
                language_id: Some("python".to_string()),
                extensions: vec!["py".to_string()],
            },
        ],
        ..DiagnosticsSettings::default()
    };
    let sources = sources_from_settings(&settings);
    assert_eq!(sources.len(), 2);

    let aggregator = ErrorAggregator::new(
        dir.path(),
        sources,
        Arc::new(FsSourceStore::new(dir.path())),
    )
    .with_settings(&settings);

    let files = discover_files(dir.path(), "", &settings.extensions).unwrap();
    let report = aggregator.aggregate(&files, &CancellationToken::new()).await;
    assert_eq!(report.total_errors(), 0);
    assert_eq!(report.errors_by_file.len(), 2);
    assert_eq!(report.failed_sources.len(), 2);
}
