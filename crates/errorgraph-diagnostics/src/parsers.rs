use errorgraph_core::{OutputFormat, RawDiagnostic};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::path::Path;

static FLAKE8_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<path>.+?):(?P<line>\d+):(?:(?P<col>\d+):)?\s+(?P<code>[A-Z]+\d+)\s+(?P<msg>.+)$")
        .expect("static regex")
});

static MYPY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<path>.+?):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<sev>error|warning|note):\s*(?P<msg>.+?)(?:\s+\[(?P<code>[a-z0-9-]+)\])?$",
    )
    .expect("static regex")
});

/// Output lines that carry no diagnostic and are not malformed either.
static SUMMARY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(Found \d+ errors?|Success: no issues found|\d+\s+[A-Z]\d+ |All checks passed)")
        .expect("static regex")
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedOutput {
    pub diagnostics: Vec<RawDiagnostic>,
    pub malformed: Vec<String>,
}

pub fn parse_output(format: OutputFormat, output: &str, root: &Path) -> ParsedOutput {
    match format {
        OutputFormat::Flake8 => parse_flake8_output(output, root),
        OutputFormat::Mypy => parse_mypy_output(output, root),
        OutputFormat::RuffJson => parse_ruff_json(output, root),
    }
}

/// Severity for pyflakes/pycodestyle style codes: runtime-breaking codes are errors.
pub fn severity_for_code(code: &str) -> &'static str {
    const ERROR_PREFIXES: &[&str] = &["E9", "F63", "F7", "F82"];
    if ERROR_PREFIXES.iter().any(|p| code.starts_with(p)) {
        "error"
    } else {
        "warning"
    }
}

/// Makes a reported path relative to the scan root.
pub fn normalize_path(root: &Path, reported: &str) -> String {
    let reported = reported.trim();
    let path = Path::new(reported);
    let relative = path
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| reported.to_string());
    let relative = relative.replace('\\', "/");
    relative.trim_start_matches("./").to_string()
}

fn parse_u32(text: Option<regex::Match<'_>>, default: u32) -> u32 {
    text.and_then(|m| m.as_str().parse().ok()).unwrap_or(default)
}

/// `path:line:col: CODE message`
pub fn parse_flake8_output(output: &str, root: &Path) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();
    for line in output.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() || SUMMARY_LINE.is_match(line) {
            continue;
        }
        let Some(caps) = FLAKE8_LINE.captures(line) else {
            parsed.malformed.push(line.to_string());
            continue;
        };
        let code = caps["code"].to_string();
        parsed.diagnostics.push(RawDiagnostic {
            file_path: normalize_path(root, &caps["path"]),
            line: parse_u32(caps.name("line"), 1).max(1),
            column: parse_u32(caps.name("col"), 1).max(1),
            severity_text: severity_for_code(&code).to_string(),
            message: caps["msg"].trim().to_string(),
            code: Some(code),
            end_line: None,
            end_column: None,
        });
    }
    parsed
}

/// `path:line:col: severity: message  [code]`
pub fn parse_mypy_output(output: &str, root: &Path) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();
    for line in output.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() || SUMMARY_LINE.is_match(line) {
            continue;
        }
        let Some(caps) = MYPY_LINE.captures(line) else {
            parsed.malformed.push(line.to_string());
            continue;
        };
        parsed.diagnostics.push(RawDiagnostic {
            file_path: normalize_path(root, &caps["path"]),
            line: parse_u32(caps.name("line"), 1).max(1),
            column: parse_u32(caps.name("col"), 1).max(1),
            severity_text: caps["sev"].to_string(),
            message: caps["msg"].trim().to_string(),
            code: caps.name("code").map(|m| m.as_str().to_string()),
            end_line: None,
            end_column: None,
        });
    }
    parsed
}

/// `ruff check --output-format=json`: an array of violation objects.
pub fn parse_ruff_json(output: &str, root: &Path) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();
    if output.trim().is_empty() {
        return parsed;
    }
    let entries: Vec<JsonValue> = match serde_json::from_str(output) {
        Ok(JsonValue::Array(entries)) => entries,
        _ => {
            parsed.malformed.push(output.trim().to_string());
            return parsed;
        }
    };

    for entry in entries {
        let filename = entry.get("filename").and_then(|v| v.as_str());
        let message = entry.get("message").and_then(|v| v.as_str());
        let row = entry
            .get("location")
            .and_then(|l| l.get("row"))
            .and_then(|v| v.as_u64());
        let (Some(filename), Some(message), Some(row)) = (filename, message, row) else {
            parsed.malformed.push(entry.to_string());
            continue;
        };
        let column = entry
            .get("location")
            .and_then(|l| l.get("column"))
            .and_then(|v| v.as_u64())
            .unwrap_or(1);
        let end = entry.get("end_location");
        let code = entry
            .get("code")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        parsed.diagnostics.push(RawDiagnostic {
            file_path: normalize_path(root, filename),
            line: (row as u32).max(1),
            column: (column as u32).max(1),
            severity_text: code
                .as_deref()
                .map(severity_for_code)
                .unwrap_or("warning")
                .to_string(),
            message: message.to_string(),
            code,
            end_line: end
                .and_then(|e| e.get("row"))
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            end_column: end
                .and_then(|e| e.get("column"))
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
        });
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flake8_lines() {
        let root = Path::new("/work/project");
        let out = "/work/project/a.py:3:1: F401 'os' imported but unused\n\
                   ./pkg/b.py:10:80: E501 line too long (88 > 79 characters)\n\
                   c.py:1: E902 TokenError: EOF in multi-line statement\n\
                   this is not a diagnostic\n";
        let parsed = parse_flake8_output(out, root);

        assert_eq!(parsed.diagnostics.len(), 3);
        let first = &parsed.diagnostics[0];
        assert_eq!(first.file_path, "a.py");
        assert_eq!((first.line, first.column), (3, 1));
        assert_eq!(first.code.as_deref(), Some("F401"));
        assert_eq!(first.message, "'os' imported but unused");
        assert_eq!(first.severity_text, "warning");

        assert_eq!(parsed.diagnostics[1].file_path, "pkg/b.py");
        assert_eq!(parsed.diagnostics[2].column, 1);
        assert_eq!(parsed.diagnostics[2].severity_text, "error");
        assert_eq!(parsed.malformed, vec!["this is not a diagnostic".to_string()]);
    }

    #[test]
    fn mypy_lines() {
        let out = "a.py:5:12: error: Incompatible types in assignment (expression has type \"str\", variable has type \"int\")  [assignment]\n\
                   a.py:7: note: Revealed type is \"builtins.int\"\n\
                   Found 1 error in 1 file (checked 1 source file)\n";
        let parsed = parse_mypy_output(out, Path::new("."));

        assert!(parsed.malformed.is_empty());
        assert_eq!(parsed.diagnostics.len(), 2);
        let err = &parsed.diagnostics[0];
        assert_eq!(err.code.as_deref(), Some("assignment"));
        assert_eq!(err.severity_text, "error");
        assert!(err.message.starts_with("Incompatible types"));
        assert!(!err.message.contains("[assignment]"));
        assert_eq!(parsed.diagnostics[1].severity_text, "note");
        assert_eq!(parsed.diagnostics[1].column, 1);
    }

    #[test]
    fn ruff_json() {
        let out = r#"[
            {"code": "F401", "message": "`os` imported but unused", "filename": "/r/a.py",
             "location": {"row": 1, "column": 8}, "end_location": {"row": 1, "column": 10}},
            {"code": "E999", "message": "SyntaxError", "location": {"row": 2, "column": 1}}
        ]"#;
        let parsed = parse_ruff_json(out, Path::new("/r"));
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.malformed.len(), 1);
        let d = &parsed.diagnostics[0];
        assert_eq!(d.file_path, "a.py");
        assert_eq!((d.line, d.column, d.end_column), (1, 8, Some(10)));

        let garbage = parse_ruff_json("not json", Path::new("/r"));
        assert_eq!(garbage.malformed.len(), 1);
    }
}
