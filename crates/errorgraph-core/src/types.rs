use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type ErrorId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    /// Maps free-form backend severity text onto the canonical scale.
    /// Unknown text is treated as a warning.
    pub fn from_text(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "error" | "e" | "fatal" | "critical" | "1" => Severity::Error,
            "warning" | "warn" | "w" | "2" => Severity::Warning,
            "info" | "information" | "i" | "note" | "convention" | "refactor" | "3" => {
                Severity::Info
            }
            "hint" | "h" | "4" => Severity::Hint,
            _ => Severity::Warning,
        }
    }

    /// Normalised rank in (0, 1]; errors rank highest.
    pub fn rank(&self) -> f64 {
        match self {
            Severity::Error => 1.0,
            Severity::Warning => 0.75,
            Severity::Info => 0.5,
            Severity::Hint => 0.25,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Syntax,
    Type,
    Import,
    Undefined,
    Unused,
    Style,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Type => "type",
            ErrorCategory::Import => "import",
            ErrorCategory::Undefined => "undefined",
            ErrorCategory::Unused => "unused",
            ErrorCategory::Style => "style",
            ErrorCategory::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "syntax" => Ok(ErrorCategory::Syntax),
            "type" => Ok(ErrorCategory::Type),
            "import" => Ok(ErrorCategory::Import),
            "undefined" => Ok(ErrorCategory::Undefined),
            "unused" => Ok(ErrorCategory::Unused),
            "style" => Ok(ErrorCategory::Style),
            "other" => Ok(ErrorCategory::Other),
            other => Err(format!("unknown error category: {}", other)),
        }
    }
}

/// Certainty that a fix is correct. Declaration order gives `None < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixConfidence {
    None,
    Low,
    Medium,
    High,
}

impl FixConfidence {
    pub fn rank(&self) -> f64 {
        match self {
            FixConfidence::High => 1.0,
            FixConfidence::Medium => 2.0 / 3.0,
            FixConfidence::Low => 1.0 / 3.0,
            FixConfidence::None => 0.0,
        }
    }
}

impl fmt::Display for FixConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FixConfidence::High => "high",
            FixConfidence::Medium => "medium",
            FixConfidence::Low => "low",
            FixConfidence::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// Position of a diagnostic. Lines and characters are 1-based throughout the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub file_path: String,
    pub line: u32,
    pub character: u32,
    pub end_line: Option<u32>,
    pub end_character: Option<u32>,
}

impl ErrorLocation {
    pub fn new(file_path: impl Into<String>, line: u32, character: u32) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            character,
            end_line: None,
            end_character: None,
        }
    }

    pub fn with_end(mut self, end_line: u32, end_character: u32) -> Self {
        self.end_line = Some(end_line);
        self.end_character = Some(end_character);
        self
    }

    pub fn range_text(&self) -> String {
        match (self.end_line, self.end_character) {
            (Some(end_line), Some(end_character)) => format!(
                "{}:{}:{}-{}:{}",
                self.file_path, self.line, self.character, end_line, end_character
            ),
            _ => format!("{}:{}:{}", self.file_path, self.line, self.character),
        }
    }
}

/// A diagnostic as reported by a backend, before normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiagnostic {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub severity_text: String,
    pub message: String,
    pub code: Option<String>,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default)]
    pub end_column: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    DeleteLine,
    ReplaceLine,
    /// Inserts `new_text` as a new line before `line`.
    InsertLine,
    ReplaceRange,
}

/// One atomic edit inside a fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixChange {
    pub kind: ChangeKind,
    pub file_path: String,
    pub line: u32,
    pub end_line: Option<u32>,
    pub character: Option<u32>,
    pub end_character: Option<u32>,
    pub new_text: Option<String>,
    /// Line content captured when the diagnostic was aggregated.
    pub expected: Option<String>,
}

impl FixChange {
    pub fn delete_line(file_path: impl Into<String>, line: u32, expected: Option<String>) -> Self {
        Self {
            kind: ChangeKind::DeleteLine,
            file_path: file_path.into(),
            line,
            end_line: None,
            character: None,
            end_character: None,
            new_text: None,
            expected,
        }
    }

    pub fn replace_line(
        file_path: impl Into<String>,
        line: u32,
        new_text: impl Into<String>,
        expected: Option<String>,
    ) -> Self {
        Self {
            kind: ChangeKind::ReplaceLine,
            file_path: file_path.into(),
            line,
            end_line: None,
            character: None,
            end_character: None,
            new_text: Some(new_text.into()),
            expected,
        }
    }

    pub fn insert_line(file_path: impl Into<String>, line: u32, new_text: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::InsertLine,
            file_path: file_path.into(),
            line,
            end_line: None,
            character: None,
            end_character: None,
            new_text: Some(new_text.into()),
            expected: None,
        }
    }

    pub fn replace_range(
        location: &ErrorLocation,
        new_text: impl Into<String>,
        expected: Option<String>,
    ) -> Self {
        Self {
            kind: ChangeKind::ReplaceRange,
            file_path: location.file_path.clone(),
            line: location.line,
            end_line: Some(location.end_line.unwrap_or(location.line)),
            character: Some(location.character),
            end_character: location.end_character,
            new_text: Some(new_text.into()),
            expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFix {
    pub id: String,
    pub title: String,
    pub description: String,
    pub confidence: FixConfidence,
    pub changes: Vec<FixChange>,
    pub requires_user_input: bool,
}

impl ErrorFix {
    /// Eligible for unattended application at the given confidence floor.
    pub fn is_automatic(&self, min_confidence: FixConfidence) -> bool {
        self.confidence >= min_confidence && !self.requires_user_input
    }
}

/// Canonical, source-agnostic error. Fixes and `auto_fixable` are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedError {
    pub id: ErrorId,
    pub message: String,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub location: ErrorLocation,
    pub source: String,
    pub code: Option<String>,
    fixes: Vec<ErrorFix>,
    auto_fixable: bool,
    related: Vec<ErrorId>,
}

impl UnifiedError {
    pub fn new(
        message: impl Into<String>,
        severity: Severity,
        category: ErrorCategory,
        location: ErrorLocation,
        source: impl Into<String>,
        code: Option<String>,
    ) -> Self {
        let message = message.into();
        let source = source.into();
        let id = Self::compute_id(&location, &source, &message);
        Self {
            id,
            message,
            severity,
            category,
            location,
            source,
            code,
            fixes: Vec::new(),
            auto_fixable: false,
            related: Vec::new(),
        }
    }

    /// Stable across scans of an unchanged file.
    pub fn compute_id(location: &ErrorLocation, source: &str, message: &str) -> ErrorId {
        let mut hasher = Sha256::new();
        hasher.update(location.file_path.as_bytes());
        hasher.update([0]);
        hasher.update(location.line.to_le_bytes());
        hasher.update(location.character.to_le_bytes());
        hasher.update(source.as_bytes());
        hasher.update([0]);
        hasher.update(message.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    /// Attaches the fix list at the default MEDIUM auto-fix threshold.
    pub fn with_fixes(self, fixes: Vec<ErrorFix>) -> Self {
        self.with_fixes_at(fixes, FixConfidence::Medium)
    }

    /// Attaches the fix list. Fix ids are derived from the error id and position;
    /// `auto_fixable` holds when some fix clears `min_confidence` without user input.
    pub fn with_fixes_at(mut self, fixes: Vec<ErrorFix>, min_confidence: FixConfidence) -> Self {
        self.fixes = fixes
            .into_iter()
            .enumerate()
            .map(|(idx, mut fix)| {
                fix.id = format!("{}-fix-{}", self.id, idx);
                fix
            })
            .collect();
        self.auto_fixable = self
            .fixes
            .iter()
            .any(|f| f.is_automatic(min_confidence));
        self
    }

    pub fn with_related(mut self, related: Vec<ErrorId>) -> Self {
        self.related = related;
        self
    }

    pub fn fixes(&self) -> &[ErrorFix] {
        &self.fixes
    }

    pub fn auto_fixable(&self) -> bool {
        self.auto_fixable
    }

    pub fn related(&self) -> &[ErrorId] {
        &self.related
    }

    /// Highest-confidence fix that can be applied without user input.
    pub fn best_automatic_fix(&self, min_confidence: FixConfidence) -> Option<&ErrorFix> {
        self.fixes
            .iter()
            .filter(|f| f.is_automatic(min_confidence))
            .fold(None, |best: Option<&ErrorFix>, f| match best {
                Some(b) if b.confidence >= f.confidence => Some(b),
                _ => Some(f),
            })
    }

    pub fn best_fix(&self) -> Option<&ErrorFix> {
        self.fixes
            .iter()
            .fold(None, |best: Option<&ErrorFix>, f| match best {
                Some(b) if b.confidence >= f.confidence => Some(b),
                _ => Some(f),
            })
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            id: self.id.clone(),
            file_path: self.location.file_path.clone(),
            line: self.location.line,
            character: self.location.character,
            severity: self.severity,
            message: self.message.clone(),
            source: self.source.clone(),
            code: self.code.clone(),
            category: self.category,
            auto_fixable: self.auto_fixable,
            fixes: self
                .fixes
                .iter()
                .map(|f| FixRecord {
                    id: f.id.clone(),
                    title: f.title.clone(),
                    confidence: f.confidence,
                    requires_user_input: f.requires_user_input,
                })
                .collect(),
        }
    }
}

/// Wire shape of an error for CLIs and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: ErrorId,
    pub file_path: String,
    pub line: u32,
    pub character: u32,
    pub severity: Severity,
    pub message: String,
    pub source: String,
    pub code: Option<String>,
    pub category: ErrorCategory,
    pub auto_fixable: bool,
    pub fixes: Vec<FixRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub id: String,
    pub title: String,
    pub confidence: FixConfidence,
    pub requires_user_input: bool,
}

/// Aggregate view over one snapshot of errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub total_warnings: usize,
    pub total_info: usize,
    pub total_hints: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_source: BTreeMap<String, usize>,
    /// Files ordered by error count, highest first.
    pub error_hotspots: Vec<(String, usize)>,
    pub auto_fixable: usize,
}

impl ErrorSummary {
    pub fn from_errors(errors: &[UnifiedError]) -> Self {
        let mut summary = ErrorSummary::default();
        let mut per_file: BTreeMap<String, usize> = BTreeMap::new();

        for error in errors {
            match error.severity {
                Severity::Error => summary.total_errors += 1,
                Severity::Warning => summary.total_warnings += 1,
                Severity::Info => summary.total_info += 1,
                Severity::Hint => summary.total_hints += 1,
            }
            *summary.by_category.entry(error.category).or_default() += 1;
            *summary.by_source.entry(error.source.clone()).or_default() += 1;
            *per_file.entry(error.location.file_path.clone()).or_default() += 1;
            if error.auto_fixable() {
                summary.auto_fixable += 1;
            }
        }

        let mut hotspots: Vec<(String, usize)> = per_file.into_iter().collect();
        hotspots.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary.error_hotspots = hotspots;
        summary
    }

    pub fn total(&self) -> usize {
        self.total_errors + self.total_warnings + self.total_info + self.total_hints
    }
}
