use crate::parsers::parse_output;
use crate::source::{extension_matches, DiagnosticSource, SourceOutcome};
use async_trait::async_trait;
use errorgraph_core::{ErrorGraphError, OutputFormat, Result, SourceConfig, SourceKind};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs a linter or type checker as a child process, one invocation per scanned file.
///
/// Non-zero exit codes are normal for linters that found issues; only exits above 1 with no
/// parseable output are reported as unavailable.
#[derive(Debug, Clone)]
pub struct CommandSource {
    name: String,
    command: String,
    args: Vec<String>,
    format: OutputFormat,
    extensions: Vec<String>,
}

impl CommandSource {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        format: OutputFormat,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            format,
            extensions: Vec::new(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        if config.kind != SourceKind::Command {
            return Err(ErrorGraphError::Config(format!(
                "source '{}' is not a command source",
                config.name
            )));
        }
        let format = config.format.ok_or_else(|| {
            ErrorGraphError::Config(format!("command source '{}' needs a format", config.name))
        })?;
        Ok(Self::new(
            config.name.clone(),
            config.command.clone(),
            config.args.clone(),
            format,
        )
        .with_extensions(config.extensions.clone()))
    }

    pub fn flake8() -> Self {
        Self::new("flake8", "flake8", Vec::new(), OutputFormat::Flake8)
            .with_extensions(vec!["py".to_string()])
    }

    pub fn mypy() -> Self {
        let config = SourceConfig::mypy();
        Self::new(config.name, config.command, config.args, OutputFormat::Mypy)
            .with_extensions(config.extensions)
    }
}

#[async_trait]
impl DiagnosticSource for CommandSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, file_path: &str) -> bool {
        extension_matches(&self.extensions, file_path)
    }

    async fn scan(&self, root: &Path, file_path: &str) -> SourceOutcome {
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(file_path)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return SourceOutcome::Unavailable(format!("failed to run {}: {}", self.command, e))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed = parse_output(self.format, &stdout, root);
        let code = output.status.code();
        debug!(
            source = %self.name,
            file = file_path,
            status = ?code,
            diagnostics = parsed.diagnostics.len(),
            "command source finished"
        );

        let crashed = match code {
            Some(c) => c > 1,
            None => true,
        };
        if crashed && parsed.diagnostics.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return SourceOutcome::Unavailable(format!(
                "{} exited with {:?}: {}",
                self.command,
                code,
                stderr.trim()
            ));
        }

        SourceOutcome::from_parsed(parsed.diagnostics, parsed.malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let source = CommandSource::new(
            "ghost",
            "errorgraph-definitely-not-installed",
            Vec::new(),
            OutputFormat::Flake8,
        );
        let outcome = source.scan(Path::new("."), "a.py").await;
        assert!(matches!(outcome, SourceOutcome::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn parses_stdout_of_child_process() {
        let source = CommandSource::new(
            "fake-flake8",
            "sh",
            vec![
                "-c".to_string(),
                "echo \"$0:3:1: F401 'os' imported but unused\"; exit 1".to_string(),
            ],
            OutputFormat::Flake8,
        );
        let outcome = source.scan(Path::new("."), "a.py").await;
        let SourceOutcome::Ok(diags) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file_path, "a.py");
        assert_eq!(diags[0].line, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crash_without_output_is_unavailable() {
        let source = CommandSource::new(
            "broken",
            "sh",
            vec!["-c".to_string(), "echo boom 1>&2; exit 3".to_string()],
            OutputFormat::Mypy,
        );
        match source.scan(Path::new("."), "a.py").await {
            SourceOutcome::Unavailable(reason) => assert!(reason.contains("boom")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn from_config_requires_format() {
        let mut config = SourceConfig::flake8();
        assert!(CommandSource::from_config(&config).is_ok());
        config.format = None;
        assert!(CommandSource::from_config(&config).is_err());
        assert!(CommandSource::flake8().handles("x.py"));
        assert!(!CommandSource::mypy().handles("x.rs"));
    }
}
