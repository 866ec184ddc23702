use crate::{ErrorCategory, ErrorGraphError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// One message rule. Rules are evaluated in table order and the first match wins.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: ErrorCategory,
    pub pattern: Regex,
}

impl CategoryRule {
    pub fn new(category: ErrorCategory, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ErrorGraphError::Config(format!("invalid category rule: {}", e)))?;
        Ok(Self { category, pattern })
    }

    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }
}

const DEFAULT_RULES: &[(ErrorCategory, &str)] = &[
    (
        ErrorCategory::Syntax,
        r"(?i)syntax ?error|invalid syntax|unexpected (token|indent|eof|end of file|character)|unterminated|unindent does not match|expected an indented block|parse error",
    ),
    (
        ErrorCategory::Type,
        r#"(?i)incompatible (type|return value)|type error|mismatched types|has no attribute|is not callable|not assignable to|cannot be assigned to|argument \d+ to .* has incompatible|unsupported operand type|expected type|type mismatch"#,
    ),
    (
        ErrorCategory::Import,
        r#"(?i)no module named|cannot find module|unable to import|import .*could not be resolved|unresolved import|failed to import|module not found|cannot find implementation or library stub"#,
    ),
    (
        ErrorCategory::Undefined,
        r#"(?i)undefined (name|variable)|is not defined|cannot find (name|value|function)|unresolved reference|not found in (this )?scope|undeclared|used before assignment"#,
    ),
    (
        ErrorCategory::Unused,
        r"(?i)\bunused\b|imported but unused|never used|assigned to but never used|is not accessed",
    ),
    (
        ErrorCategory::Style,
        r"(?i)whitespace|line too long|blank line|indentation is not a multiple|missing docstring|naming convention|should be (snake|camel|upper)|too many blank|missing whitespace|expected \d+ blank lines?",
    ),
];

/// Fallback for pyflakes/pycodestyle codes, consulted only when no message rule matches.
const CODE_PREFIXES: &[(&str, ErrorCategory)] = &[
    ("E9", ErrorCategory::Syntax),
    ("F401", ErrorCategory::Unused),
    ("F841", ErrorCategory::Unused),
    ("F821", ErrorCategory::Undefined),
    ("F822", ErrorCategory::Undefined),
    ("E1", ErrorCategory::Style),
    ("E2", ErrorCategory::Style),
    ("E3", ErrorCategory::Style),
    ("E5", ErrorCategory::Style),
    ("W", ErrorCategory::Style),
];

static DEFAULT_TABLE: Lazy<CategoryRules> = Lazy::new(|| {
    let rules = DEFAULT_RULES
        .iter()
        .map(|(category, pattern)| {
            CategoryRule::new(*category, pattern).expect("built-in category rule must compile")
        })
        .collect();
    CategoryRules { rules }
});

/// Ordered categorisation table: syntax, type, import, undefined, unused, style, then OTHER.
#[derive(Debug, Clone)]
pub struct CategoryRules {
    rules: Vec<CategoryRule>,
}

impl Default for CategoryRules {
    fn default() -> Self {
        DEFAULT_TABLE.clone()
    }
}

impl CategoryRules {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Appends a rule after the built-in ones.
    pub fn push(&mut self, rule: CategoryRule) {
        self.rules.push(rule);
    }

    /// Appends user-supplied rules. Patterns that fail to compile are logged and skipped.
    pub fn extend_patterns<'a, I>(&mut self, patterns: I) -> usize
    where
        I: IntoIterator<Item = (ErrorCategory, &'a str)>,
    {
        let mut added = 0;
        for (category, pattern) in patterns {
            match CategoryRule::new(category, pattern) {
                Ok(rule) => {
                    self.rules.push(rule);
                    added += 1;
                }
                Err(e) => warn!("Skipping category rule {:?} for {:?}: {}", pattern, category, e),
            }
        }
        added
    }

    pub fn categorize_message(&self, message: &str) -> Option<ErrorCategory> {
        self.rules
            .iter()
            .find(|rule| rule.matches(message))
            .map(|rule| rule.category)
    }

    pub fn categorize(&self, message: &str, code: Option<&str>) -> ErrorCategory {
        if let Some(category) = self.categorize_message(message) {
            return category;
        }
        code.and_then(category_for_code)
            .unwrap_or(ErrorCategory::Other)
    }
}

fn category_for_code(code: &str) -> Option<ErrorCategory> {
    let code = code.trim().to_ascii_uppercase();
    CODE_PREFIXES
        .iter()
        .find(|(prefix, _)| code.starts_with(prefix))
        .map(|(_, category)| *category)
}
