use crate::{ErrorCategory, ErrorFix, FixChange, FixConfidence, UnifiedError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static QUOTED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"`]([A-Za-z_][A-Za-z0-9_.]*)(?: as [A-Za-z_][A-Za-z0-9_]*)?['"`]"#)
        .expect("static regex")
});

static IMPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(from\s+\S+\s+import\s+|import\s+)(.+?)\s*$").expect("static regex")
});

const STDLIB_MODULES: &[&str] = &[
    "abc", "argparse", "asyncio", "base64", "collections", "contextlib", "copy", "csv",
    "dataclasses", "datetime", "decimal", "enum", "functools", "glob", "hashlib", "heapq",
    "inspect", "io", "itertools", "json", "logging", "math", "operator", "os", "pathlib",
    "pickle", "platform", "pprint", "queue", "random", "re", "shutil", "signal", "socket",
    "sqlite3", "statistics", "string", "struct", "subprocess", "sys", "tempfile", "textwrap",
    "threading", "time", "traceback", "typing", "unittest", "urllib", "uuid", "warnings",
    "weakref",
];

/// Builds the default fixes attached to an error at aggregation time.
#[derive(Debug, Clone)]
pub struct FixSynthesizer {
    known_modules: HashSet<String>,
}

impl Default for FixSynthesizer {
    fn default() -> Self {
        Self {
            known_modules: STDLIB_MODULES.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl FixSynthesizer {
    pub fn with_known_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_modules.extend(modules.into_iter().map(Into::into));
        self
    }

    /// `content` is the owning file's text at scan time; snapshots are taken from it.
    pub fn synthesize(&self, error: &UnifiedError, content: Option<&str>) -> Vec<ErrorFix> {
        let line_text = content.and_then(|c| line_at(c, error.location.line));
        match error.category {
            ErrorCategory::Unused => self.unused_fixes(error, line_text),
            ErrorCategory::Undefined => self.undefined_fixes(error, content),
            ErrorCategory::Style => whitespace_fix(error, line_text).into_iter().collect(),
            ErrorCategory::Import => {
                let name = quoted_name(&error.message).unwrap_or_else(|| "module".to_string());
                vec![suggestion(
                    format!("Resolve import of '{}'", name),
                    format!(
                        "Install the package providing '{}' or correct the module path",
                        name
                    ),
                    FixConfidence::Low,
                )]
            }
            ErrorCategory::Syntax | ErrorCategory::Type | ErrorCategory::Other => Vec::new(),
        }
    }

    fn unused_fixes(&self, error: &UnifiedError, line_text: Option<&str>) -> Vec<ErrorFix> {
        let message = error.message.to_lowercase();
        let name = quoted_name(&error.message);
        let file = &error.location.file_path;
        let line = error.location.line;

        if message.contains("import") {
            let name = name.unwrap_or_default();
            if let Some(text) = line_text {
                if text.contains('(') && !text.contains(')') {
                    return vec![suggestion(
                        format!("Remove unused import '{}'", name),
                        "Import spans several lines; edit it by hand".to_string(),
                        FixConfidence::Low,
                    )];
                }
                if let Some(rewritten) = remove_import_name(text, &name) {
                    return vec![ErrorFix {
                        id: String::new(),
                        title: format!("Remove '{}' from import", name),
                        description: format!(
                            "Drop the unused name '{}' and keep the other imports on line {}",
                            name, line
                        ),
                        confidence: FixConfidence::Medium,
                        changes: vec![FixChange::replace_line(
                            file.clone(),
                            line,
                            rewritten,
                            Some(text.to_string()),
                        )],
                        requires_user_input: false,
                    }];
                }
            }
            return vec![delete_line_fix(
                format!("Remove unused import '{}'", name),
                error,
                line_text,
            )];
        }

        if message.contains("variable") || message.contains("assigned to") {
            let name = name.unwrap_or_default();
            if let Some(text) = line_text {
                let trimmed = text.trim_end();
                if trimmed.ends_with('(') || trimmed.ends_with('\\') || trimmed.ends_with(',') {
                    return vec![suggestion(
                        format!("Remove unused variable '{}'", name),
                        "Assignment continues on following lines; edit it by hand".to_string(),
                        FixConfidence::Low,
                    )];
                }
            }
            return vec![delete_line_fix(
                format!("Remove unused variable '{}'", name),
                error,
                line_text,
            )];
        }

        Vec::new()
    }

    fn undefined_fixes(&self, error: &UnifiedError, content: Option<&str>) -> Vec<ErrorFix> {
        let Some(name) = quoted_name(&error.message) else {
            return Vec::new();
        };
        let root = name.split('.').next().unwrap_or(&name).to_string();

        if self.known_modules.contains(&root) {
            if let Some(content) = content {
                let insert_at = import_insertion_line(content);
                let mut change = FixChange::insert_line(
                    error.location.file_path.clone(),
                    insert_at,
                    format!("import {}", root),
                );
                change.expected = line_at(content, insert_at).map(str::to_string);
                return vec![ErrorFix {
                    id: String::new(),
                    title: format!("Add 'import {}'", root),
                    description: format!("'{}' is a standard library module", root),
                    confidence: FixConfidence::Medium,
                    changes: vec![change],
                    requires_user_input: false,
                }];
            }
        }

        vec![suggestion(
            format!("Add import for '{}'", root),
            format!("The origin of '{}' is ambiguous; choose the module to import", root),
            FixConfidence::Low,
        )]
    }
}

fn delete_line_fix(title: String, error: &UnifiedError, line_text: Option<&str>) -> ErrorFix {
    ErrorFix {
        id: String::new(),
        title,
        description: format!("Delete line {}", error.location.line),
        confidence: FixConfidence::High,
        changes: vec![FixChange::delete_line(
            error.location.file_path.clone(),
            error.location.line,
            line_text.map(str::to_string),
        )],
        requires_user_input: false,
    }
}

fn whitespace_fix(error: &UnifiedError, line_text: Option<&str>) -> Option<ErrorFix> {
    let message = error.message.to_lowercase();
    let whitespace_only = message.contains("trailing whitespace")
        || message.contains("blank line contains whitespace")
        || message.contains("whitespace on blank line");
    if !whitespace_only {
        return None;
    }
    let text = line_text?;
    let trimmed = text.trim_end();
    if trimmed == text {
        return None;
    }
    Some(ErrorFix {
        id: String::new(),
        title: "Strip trailing whitespace".to_string(),
        description: format!("Remove trailing whitespace on line {}", error.location.line),
        confidence: FixConfidence::High,
        changes: vec![FixChange::replace_line(
            error.location.file_path.clone(),
            error.location.line,
            trimmed,
            Some(text.to_string()),
        )],
        requires_user_input: false,
    })
}

fn suggestion(title: String, description: String, confidence: FixConfidence) -> ErrorFix {
    ErrorFix {
        id: String::new(),
        title,
        description,
        confidence,
        changes: Vec::new(),
        requires_user_input: true,
    }
}

/// First quoted identifier in a diagnostic message.
pub fn quoted_name(message: &str) -> Option<String> {
    QUOTED_NAME
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// All quoted identifiers in a diagnostic message, in order, without duplicates.
pub fn quoted_names(message: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    QUOTED_NAME
        .captures_iter(message)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// 1-based line lookup without the line terminator.
pub fn line_at(content: &str, line: u32) -> Option<&str> {
    if line == 0 {
        return None;
    }
    content
        .split('\n')
        .nth(line as usize - 1)
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
}

/// Rewrites an import line without `name`, or `None` when it is the only name imported.
fn remove_import_name(line: &str, name: &str) -> Option<String> {
    let caps = IMPORT_LINE.captures(line)?;
    let indent = caps.get(1).map_or("", |m| m.as_str());
    let head = caps.get(2).map_or("", |m| m.as_str());
    let body = caps.get(3).map_or("", |m| m.as_str());
    let is_from = head.trim_start().starts_with("from");

    let (open, inner, close) = match body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        Some(inner) => ("(", inner, ")"),
        None => ("", body, ""),
    };

    let items: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if items.len() < 2 {
        return None;
    }

    let short = name.rsplit('.').next().unwrap_or(name);
    let matches = |item: &str| {
        let mut parts = item.split_whitespace();
        let imported = parts.next().unwrap_or("");
        let alias = match (parts.next(), parts.next()) {
            (Some("as"), Some(alias)) => Some(alias),
            _ => None,
        };
        let target = if is_from { short } else { name };
        imported == target || alias == Some(short) || alias == Some(name)
    };

    let kept: Vec<&str> = items.iter().copied().filter(|item| !matches(item)).collect();
    if kept.len() == items.len() || kept.is_empty() {
        return None;
    }
    Some(format!("{}{}{}{}{}", indent, head, open, kept.join(", "), close))
}

/// 1-based line before which a new top-level import should go: after shebang, encoding
/// comments, the module docstring and `from __future__` imports.
fn import_insertion_line(content: &str) -> u32 {
    let lines: Vec<&str> = content.lines().collect();
    let mut idx = 0;

    while idx < lines.len() {
        let trimmed = lines[idx].trim();
        if trimmed.starts_with("#!") || trimmed.starts_with("# -*-") || trimmed.starts_with("# coding") {
            idx += 1;
        } else {
            break;
        }
    }

    if let Some(first) = lines.get(idx).map(|l| l.trim_start()) {
        for quote in ["\"\"\"", "'''"] {
            if let Some(rest) = first.strip_prefix(quote) {
                if rest.contains(quote) {
                    idx += 1;
                } else {
                    idx += 1;
                    while idx < lines.len() && !lines[idx].contains(quote) {
                        idx += 1;
                    }
                    idx = (idx + 1).min(lines.len());
                }
                break;
            }
        }
    }

    let mut after_future = false;
    while idx < lines.len() {
        let trimmed = lines[idx].trim();
        if trimmed.starts_with("from __future__") {
            after_future = true;
            idx += 1;
        } else if trimmed.is_empty() && after_future {
            idx += 1;
        } else {
            break;
        }
    }

    idx as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeKind, ErrorLocation, Severity};

    fn error(category: ErrorCategory, message: &str, line: u32) -> UnifiedError {
        UnifiedError::new(
            message,
            Severity::Warning,
            category,
            ErrorLocation::new("a.py", line, 1),
            "flake8",
            None,
        )
    }

    #[test]
    fn unused_import_deletes_line_with_high_confidence() {
        let content = "import sys\n\nimport os\nprint(sys)\n";
        let err = error(ErrorCategory::Unused, "'os' imported but unused", 3);
        let fixes = FixSynthesizer::default().synthesize(&err, Some(content));
        assert_eq!(fixes.len(), 1);
        let fix = &fixes[0];
        assert_eq!(fix.confidence, FixConfidence::High);
        assert!(!fix.requires_user_input);
        assert_eq!(fix.changes[0].kind, ChangeKind::DeleteLine);
        assert_eq!(fix.changes[0].line, 3);
        assert_eq!(fix.changes[0].expected.as_deref(), Some("import os"));
    }

    #[test]
    fn unused_name_in_multi_import_is_removed_in_place() {
        let content = "import os, sys\nfrom typing import List, Dict as D\n";
        let synth = FixSynthesizer::default();

        let fixes = synth.synthesize(
            &error(ErrorCategory::Unused, "'os' imported but unused", 1),
            Some(content),
        );
        assert_eq!(fixes[0].confidence, FixConfidence::Medium);
        assert_eq!(fixes[0].changes[0].kind, ChangeKind::ReplaceLine);
        assert_eq!(fixes[0].changes[0].new_text.as_deref(), Some("import sys"));

        let fixes = synth.synthesize(
            &error(ErrorCategory::Unused, "'typing.Dict as D' imported but unused", 2),
            Some(content),
        );
        assert_eq!(
            fixes[0].changes[0].new_text.as_deref(),
            Some("from typing import List")
        );
    }

    #[test]
    fn known_undefined_module_gets_import_after_docstring() {
        let content = "#!/usr/bin/env python\n\"\"\"Tool.\"\"\"\nfrom __future__ import annotations\n\nprint(json.dumps({}))\n";
        let err = error(ErrorCategory::Undefined, "undefined name 'json'", 5);
        let fixes = FixSynthesizer::default().synthesize(&err, Some(content));
        assert_eq!(fixes[0].confidence, FixConfidence::Medium);
        assert!(!fixes[0].requires_user_input);
        let change = &fixes[0].changes[0];
        assert_eq!(change.kind, ChangeKind::InsertLine);
        assert_eq!(change.line, 5);
        assert_eq!(change.new_text.as_deref(), Some("import json"));
    }

    #[test]
    fn ambiguous_undefined_name_requires_user_input() {
        let err = error(ErrorCategory::Undefined, "undefined name 'Widget'", 2);
        let fixes = FixSynthesizer::default().synthesize(&err, Some("x = 1\nWidget()\n"));
        assert_eq!(fixes[0].confidence, FixConfidence::Low);
        assert!(fixes[0].requires_user_input);
        assert!(fixes[0].changes.is_empty());
    }

    #[test]
    fn style_only_fixes_whitespace() {
        let content = "x = 1   \ny=2\n";
        let synth = FixSynthesizer::default();
        let ws = synth.synthesize(&error(ErrorCategory::Style, "trailing whitespace", 1), Some(content));
        assert_eq!(ws[0].changes[0].new_text.as_deref(), Some("x = 1"));

        let other = synth.synthesize(
            &error(ErrorCategory::Style, "missing whitespace around operator", 2),
            Some(content),
        );
        assert!(other.is_empty());
    }

    #[test]
    fn extracts_quoted_names_in_order() {
        assert_eq!(
            quoted_names("'a' shadows 'b' and 'a'"),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(line_at("a\r\nb\n", 1), Some("a"));
        assert_eq!(line_at("a\nb\n", 0), None);
    }
}
