use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config as cfg;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::FixConfidence;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "CacheSettings::default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "CacheSettings::default_capacity")]
    pub capacity: usize,
}

impl CacheSettings {
    fn default_ttl_secs() -> u64 {
        300
    }

    fn default_capacity() -> usize {
        1024
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: Self::default_ttl_secs(),
            capacity: Self::default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Linter or type checker run as a child process per scan.
    Command,
    /// Language server spoken to over stdio.
    Lsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// `path:line:col: CODE message`
    Flake8,
    /// `path:line:col: severity: message  [code]`
    Mypy,
    /// `ruff check --output-format=json`
    RuffJson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    /// LSP `languageId` sent with `didOpen`.
    #[serde(default)]
    pub language_id: Option<String>,
    /// Restricts the source to these file extensions; empty means all scanned files.
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl SourceConfig {
    pub fn flake8() -> Self {
        Self {
            name: "flake8".to_string(),
            kind: SourceKind::Command,
            command: "flake8".to_string(),
            args: Vec::new(),
            format: Some(OutputFormat::Flake8),
            language_id: None,
            extensions: vec!["py".to_string()],
        }
    }

    pub fn mypy() -> Self {
        Self {
            name: "mypy".to_string(),
            kind: SourceKind::Command,
            command: "mypy".to_string(),
            args: vec![
                "--show-column-numbers".to_string(),
                "--show-error-codes".to_string(),
                "--no-error-summary".to_string(),
                "--no-color-output".to_string(),
            ],
            format: Some(OutputFormat::Mypy),
            language_id: None,
            extensions: vec!["py".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSettings {
    /// Per adapter call.
    #[serde(default = "DiagnosticsSettings::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "DiagnosticsSettings::default_max_workers")]
    pub max_workers: usize,
    /// Extensions considered when scanning a directory.
    #[serde(default = "DiagnosticsSettings::default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "DiagnosticsSettings::default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl DiagnosticsSettings {
    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_max_workers() -> usize {
        num_cpus::get().max(1)
    }

    fn default_extensions() -> Vec<String> {
        vec!["py".to_string()]
    }

    fn default_sources() -> Vec<SourceConfig> {
        vec![SourceConfig::flake8(), SourceConfig::mypy()]
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
            max_workers: Self::default_max_workers(),
            extensions: Self::default_extensions(),
            sources: Self::default_sources(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    #[serde(default = "ContextSettings::default_window_lines")]
    pub window_lines: u32,
    #[serde(default = "ContextSettings::default_severity_weight")]
    pub severity_weight: f64,
    #[serde(default = "ContextSettings::default_confidence_weight")]
    pub confidence_weight: f64,
    #[serde(default = "ContextSettings::default_impact_weight")]
    pub impact_weight: f64,
    /// Aggregate impact at which the impact component reaches one half.
    #[serde(default = "ContextSettings::default_impact_saturation")]
    pub impact_saturation: f64,
}

impl ContextSettings {
    fn default_window_lines() -> u32 {
        10
    }

    fn default_severity_weight() -> f64 {
        0.4
    }

    fn default_confidence_weight() -> f64 {
        0.35
    }

    fn default_impact_weight() -> f64 {
        0.25
    }

    fn default_impact_saturation() -> f64 {
        5.0
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            window_lines: Self::default_window_lines(),
            severity_weight: Self::default_severity_weight(),
            confidence_weight: Self::default_confidence_weight(),
            impact_weight: Self::default_impact_weight(),
            impact_saturation: Self::default_impact_saturation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSettings {
    #[serde(default = "FixSettings::default_min_auto_confidence")]
    pub min_auto_confidence: FixConfidence,
    #[serde(default = "FixSettings::default_max_fixes")]
    pub default_max_fixes: usize,
}

impl FixSettings {
    fn default_min_auto_confidence() -> FixConfidence {
        FixConfidence::Medium
    }

    fn default_max_fixes() -> usize {
        10
    }
}

impl Default for FixSettings {
    fn default() -> Self {
        Self {
            min_auto_confidence: Self::default_min_auto_confidence(),
            default_max_fixes: Self::default_max_fixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastRadiusSettings {
    #[serde(default = "BlastRadiusSettings::default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "BlastRadiusSettings::default_function_multiplier")]
    pub function_multiplier: f64,
    #[serde(default = "BlastRadiusSettings::default_class_multiplier")]
    pub class_multiplier: f64,
    #[serde(default = "BlastRadiusSettings::default_module_multiplier")]
    pub module_multiplier: f64,
    #[serde(default = "BlastRadiusSettings::default_complexity_threshold")]
    pub complexity_threshold: f32,
    /// Fraction of the gap to the next-closer level granted to complex nodes, in [0, 1).
    #[serde(default = "BlastRadiusSettings::default_complexity_boost")]
    pub complexity_boost: f64,
    #[serde(default = "BlastRadiusSettings::default_critical_threshold")]
    pub critical_threshold: f64,
    #[serde(default = "BlastRadiusSettings::default_max_critical_paths")]
    pub max_critical_paths: usize,
}

impl BlastRadiusSettings {
    fn default_max_depth() -> usize {
        5
    }

    fn default_function_multiplier() -> f64 {
        1.0
    }

    fn default_class_multiplier() -> f64 {
        1.3
    }

    fn default_module_multiplier() -> f64 {
        1.5
    }

    fn default_complexity_threshold() -> f32 {
        10.0
    }

    fn default_complexity_boost() -> f64 {
        0.5
    }

    fn default_critical_threshold() -> f64 {
        0.7
    }

    fn default_max_critical_paths() -> usize {
        10
    }
}

impl Default for BlastRadiusSettings {
    fn default() -> Self {
        Self {
            max_depth: Self::default_max_depth(),
            function_multiplier: Self::default_function_multiplier(),
            class_multiplier: Self::default_class_multiplier(),
            module_multiplier: Self::default_module_multiplier(),
            complexity_threshold: Self::default_complexity_threshold(),
            complexity_boost: Self::default_complexity_boost(),
            critical_threshold: Self::default_critical_threshold(),
            max_critical_paths: Self::default_max_critical_paths(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "RefreshSettings::default_interval_secs")]
    pub interval_secs: u64,
}

impl RefreshSettings {
    fn default_interval_secs() -> u64 {
        60
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: Self::default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// Engine configuration, layered from files and `ERRORGRAPH__*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(default)]
    pub fixes: FixSettings,
    #[serde(default)]
    pub blast_radius: BlastRadiusSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn default_env() -> String {
        env::var("ERRORGRAPH_ENV")
            .ok()
            .unwrap_or_else(|| "development".to_string())
    }

    /// `default.toml`, then `{env}.toml`, then `local.toml`, then the environment.
    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Self> {
        let settings: EngineConfig = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("ERRORGRAPH").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        settings.validate()?;
        info!(config_dir = %config_dir.display(), env = env_name, "loaded engine configuration");
        Ok(settings)
    }

    /// Project-local `.errorgraph/` when present, otherwise the working directory.
    pub fn default_config_dir(project_root: &Path) -> PathBuf {
        let project = project_root.join(".errorgraph");
        if project.exists() {
            return project;
        }
        env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text).context("parsing TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.cache.ttl_secs > 0, "cache.ttl_secs must be > 0");
        anyhow::ensure!(self.cache.capacity > 0, "cache.capacity must be > 0");
        anyhow::ensure!(
            self.diagnostics.timeout_secs > 0,
            "diagnostics.timeout_secs must be > 0"
        );
        anyhow::ensure!(
            self.diagnostics.max_workers > 0,
            "diagnostics.max_workers must be > 0"
        );
        for source in &self.diagnostics.sources {
            anyhow::ensure!(!source.name.trim().is_empty(), "source name cannot be empty");
            anyhow::ensure!(
                !source.command.trim().is_empty(),
                "source '{}' has an empty command",
                source.name
            );
            if source.kind == SourceKind::Command {
                anyhow::ensure!(
                    source.format.is_some(),
                    "command source '{}' needs an output format",
                    source.name
                );
            }
        }

        let weights = [
            ("context.severity_weight", self.context.severity_weight),
            ("context.confidence_weight", self.context.confidence_weight),
            ("context.impact_weight", self.context.impact_weight),
        ];
        for (name, weight) in weights {
            anyhow::ensure!((0.0..=1.0).contains(&weight), "{} must be within 0..=1", name);
        }
        anyhow::ensure!(
            self.context.impact_saturation > 0.0,
            "context.impact_saturation must be > 0"
        );

        let br = &self.blast_radius;
        anyhow::ensure!(br.max_depth > 0, "blast_radius.max_depth must be > 0");
        anyhow::ensure!(
            br.function_multiplier >= 0.0 && br.class_multiplier >= 0.0 && br.module_multiplier >= 0.0,
            "blast_radius multipliers must be non-negative"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&br.complexity_boost),
            "blast_radius.complexity_boost must be within 0..1"
        );
        anyhow::ensure!(
            br.critical_threshold > 0.0 && br.critical_threshold < 1.0,
            "blast_radius.critical_threshold must be within (0, 1)"
        );
        anyhow::ensure!(
            self.refresh.interval_secs > 0,
            "refresh.interval_secs must be > 0"
        );
        Ok(())
    }
}
