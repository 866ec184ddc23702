use errorgraph_core::{ChangeKind, ErrorGraphError, FixChange, Result};
use std::collections::{HashMap, HashSet};

/// A file split into lines, remembering its line ending and final newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBuffer {
    lines: Vec<String>,
    eol: &'static str,
    trailing_newline: bool,
}

impl LineBuffer {
    pub fn parse(content: &str) -> Self {
        let eol = if content.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = content.ends_with('\n');
        let body = if trailing_newline {
            &content[..content.len() - 1]
        } else {
            content
        };
        let lines = if content.is_empty() {
            Vec::new()
        } else {
            body.split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                .collect()
        };
        Self {
            lines,
            eol,
            trailing_newline,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, line: u32) -> Option<&str> {
        if line == 0 {
            return None;
        }
        self.lines.get(line as usize - 1).map(String::as_str)
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join(self.eol);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.eol);
        }
        out
    }
}

/// Applies every change to `content` or none of them.
///
/// Line numbers in `changes` refer to the content as it was when the fix was synthesized.
/// Snapshots and bounds are checked for every change before the buffer is touched, and
/// changes are then applied bottom-up so earlier edits never shift later ones.
pub fn apply_changes(file_path: &str, content: &str, changes: &[&FixChange]) -> Result<String> {
    let mut buffer = LineBuffer::parse(content);
    validate(file_path, &buffer, changes)?;

    let mut ordered: Vec<&FixChange> = changes.to_vec();
    ordered.sort_by(|a, b| {
        b.line
            .cmp(&a.line)
            .then_with(|| insert_last(a.kind).cmp(&insert_last(b.kind)))
            .then_with(|| b.character.cmp(&a.character))
    });

    for change in ordered {
        let idx = change.line as usize - 1;
        match change.kind {
            ChangeKind::DeleteLine => {
                buffer.lines.remove(idx);
            }
            ChangeKind::ReplaceLine => {
                let text = change.new_text.as_deref().unwrap_or_default();
                let replacement: Vec<String> = text.split('\n').map(str::to_string).collect();
                buffer.lines.splice(idx..=idx, replacement);
            }
            ChangeKind::InsertLine => {
                let text = change.new_text.as_deref().unwrap_or_default();
                for (offset, l) in text.split('\n').enumerate() {
                    buffer.lines.insert(idx + offset, l.to_string());
                }
            }
            ChangeKind::ReplaceRange => {
                let end = change.end_line.unwrap_or(change.line) as usize - 1;
                let first = &buffer.lines[idx];
                let last = &buffer.lines[end];
                let prefix = &first[..byte_offset(first, change.character.unwrap_or(1))];
                let suffix = match change.end_character {
                    Some(c) => &last[byte_offset(last, c)..],
                    None => "",
                };
                let merged = format!(
                    "{}{}{}",
                    prefix,
                    change.new_text.as_deref().unwrap_or_default(),
                    suffix
                );
                let replacement: Vec<String> = merged.split('\n').map(str::to_string).collect();
                buffer.lines.splice(idx..=end, replacement);
            }
        }
    }

    Ok(buffer.render())
}

/// True when an insert would duplicate the line already at, or just above, its target.
pub fn already_present(buffer: &LineBuffer, change: &FixChange) -> bool {
    if change.kind != ChangeKind::InsertLine {
        return false;
    }
    let Some(text) = change.new_text.as_deref() else {
        return false;
    };
    [change.line.saturating_sub(1), change.line]
        .into_iter()
        .any(|n| buffer.line(n) == Some(text))
}

/// A written edit, in the line numbers its diagnostic was captured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Splice {
    start: u32,
    removed: u32,
    added: u32,
}

impl Splice {
    fn of(change: &FixChange) -> Self {
        let added = change
            .new_text
            .as_deref()
            .map_or(1, |t| t.split('\n').count()) as u32;
        let (removed, added) = match change.kind {
            ChangeKind::DeleteLine => (1, 0),
            ChangeKind::ReplaceLine => (1, added),
            ChangeKind::InsertLine => (0, added),
            ChangeKind::ReplaceRange => {
                let end = change.end_line.unwrap_or(change.line).max(change.line);
                (end - change.line + 1, added)
            }
        };
        Self {
            start: change.line,
            removed,
            added,
        }
    }

    /// Whether original line `line` was replaced or removed by this edit.
    fn covers(&self, line: u32) -> bool {
        self.removed > 0 && self.start <= line && line < self.start + self.removed
    }

    /// Net line shift this edit applies to original line `line`.
    fn shift_at(&self, line: u32) -> i64 {
        let applies = if self.removed == 0 {
            self.start <= line
        } else {
            self.start + self.removed <= line
        };
        if applies {
            self.added as i64 - self.removed as i64
        } else {
            0
        }
    }
}

/// Edits written so far in one batch, per file, so that later fixes computed against the
/// same diagnostic snapshot land on the lines they were meant for.
#[derive(Debug, Default)]
pub struct EditLog {
    files: HashMap<String, Vec<Splice>>,
}

impl EditLog {
    pub fn record(&mut self, change: &FixChange) {
        self.files
            .entry(change.file_path.clone())
            .or_default()
            .push(Splice::of(change));
    }

    /// Maps `change` onto the current file. Fails when the lines it targets were already
    /// rewritten. An insert whose anchor line was rewritten goes where that edit began and
    /// drops its snapshot.
    pub fn rebase(&self, change: &FixChange) -> Result<FixChange> {
        let Some(splices) = self.files.get(&change.file_path) else {
            return Ok(change.clone());
        };
        let shifted = |line: u32| -> u32 {
            let delta: i64 = splices.iter().map(|s| s.shift_at(line)).sum();
            (line as i64 + delta).max(1) as u32
        };

        let mut rebased = change.clone();
        if change.kind == ChangeKind::InsertLine {
            let mut anchor = change.line;
            if let Some(edited) = splices.iter().find(|s| s.covers(anchor)) {
                anchor = edited.start;
                rebased.expected = None;
            }
            rebased.line = shifted(anchor);
            return Ok(rebased);
        }

        let end = change.end_line.unwrap_or(change.line).max(change.line);
        if let Some(line) = (change.line..=end).find(|l| splices.iter().any(|s| s.covers(*l))) {
            return Err(ErrorGraphError::FixConflict {
                file: change.file_path.clone(),
                reason: format!("line {} was already edited by an earlier fix", line),
            });
        }
        rebased.line = shifted(change.line);
        rebased.end_line = change.end_line.map(shifted);
        Ok(rebased)
    }
}

fn validate(file_path: &str, buffer: &LineBuffer, changes: &[&FixChange]) -> Result<()> {
    let conflict = |reason: String| ErrorGraphError::FixConflict {
        file: file_path.to_string(),
        reason,
    };
    let count = buffer.len() as u32;
    let mut touched: HashSet<u32> = HashSet::new();

    for change in changes {
        let (start, end) = match change.kind {
            ChangeKind::InsertLine => {
                if change.line == 0 || change.line > count + 1 {
                    return Err(conflict(format!("insert position {} out of range", change.line)));
                }
                // Inserting at the end has no anchor line to compare.
                if let (Some(expected), Some(actual)) =
                    (change.expected.as_deref(), buffer.line(change.line))
                {
                    if actual != expected {
                        return Err(conflict(format!(
                            "line {} changed since the diagnostic was captured",
                            change.line
                        )));
                    }
                }
                continue;
            }
            ChangeKind::ReplaceRange => (change.line, change.end_line.unwrap_or(change.line)),
            ChangeKind::DeleteLine | ChangeKind::ReplaceLine => (change.line, change.line),
        };
        if start == 0 || end < start || end > count {
            return Err(conflict(format!("line {} out of range", start)));
        }
        for line in start..=end {
            if !touched.insert(line) {
                return Err(conflict(format!("overlapping edits at line {}", line)));
            }
        }
        if let Some(expected) = change.expected.as_deref() {
            let actual = buffer.line(start).unwrap_or_default();
            if actual != expected {
                return Err(conflict(format!(
                    "line {} changed since the diagnostic was captured",
                    start
                )));
            }
        }
        if change.kind == ChangeKind::ReplaceRange {
            if let (Some(c), Some(e)) = (change.character, change.end_character) {
                if start == end && e < c {
                    return Err(conflict(format!("inverted range on line {}", start)));
                }
            }
        }
    }
    Ok(())
}

fn insert_last(kind: ChangeKind) -> u8 {
    match kind {
        ChangeKind::InsertLine => 1,
        _ => 0,
    }
}

/// Byte offset of a 1-based character column, clamped to the line.
fn byte_offset(line: &str, column: u32) -> usize {
    let skip = column.saturating_sub(1) as usize;
    line.char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use errorgraph_core::ErrorLocation;

    #[test]
    fn delete_and_insert_keep_line_endings() {
        let content = "import os\r\nimport sys\r\nprint(sys.argv)\r\n";
        let delete = FixChange::delete_line("a.py", 1, Some("import os".to_string()));
        let insert = FixChange::insert_line("a.py", 3, "import json");
        let out = apply_changes("a.py", content, &[&delete, &insert]).unwrap();
        assert_eq!(out, "import sys\r\nimport json\r\nprint(sys.argv)\r\n");
    }

    #[test]
    fn stale_snapshot_rejects_every_change() {
        let content = "a\nb\nc";
        let ok = FixChange::delete_line("f.py", 3, Some("c".to_string()));
        let stale = FixChange::replace_line("f.py", 1, "z", Some("not a".to_string()));
        let err = apply_changes("f.py", content, &[&ok, &stale]).unwrap_err();
        assert!(matches!(err, ErrorGraphError::FixConflict { .. }));
    }

    #[test]
    fn replace_range_within_line() {
        let location = ErrorLocation::new("f.py", 2, 7).with_end(2, 10);
        let change = FixChange::replace_range(&location, "bar", None);
        let out = apply_changes("f.py", "x = 1\nprint(foo)\n", &[&change]).unwrap();
        assert_eq!(out, "x = 1\nprint(bar)\n");
    }

    #[test]
    fn overlapping_and_out_of_range_edits_conflict() {
        let a = FixChange::delete_line("f.py", 1, None);
        let b = FixChange::replace_line("f.py", 1, "x", None);
        assert!(apply_changes("f.py", "a\n", &[&a, &b]).is_err());
        let far = FixChange::delete_line("f.py", 9, None);
        assert!(apply_changes("f.py", "a\n", &[&far]).is_err());
    }

    #[test]
    fn insert_checks_its_anchor_line() {
        let mut insert = FixChange::insert_line("f.py", 1, "import json");
        insert.expected = Some("x = json.dumps(1)".to_string());
        let err = apply_changes("f.py", "import json\nx = json.dumps(1)\n", &[&insert]).unwrap_err();
        assert!(matches!(err, ErrorGraphError::FixConflict { .. }));

        let out = apply_changes("f.py", "x = json.dumps(1)\n", &[&insert]).unwrap();
        assert_eq!(out, "import json\nx = json.dumps(1)\n");

        // Appending after the last line has nothing to compare against.
        let mut append = FixChange::insert_line("f.py", 2, "y = 2");
        append.expected = Some(String::new());
        assert_eq!(apply_changes("f.py", "x = 1\n", &[&append]).unwrap(), "x = 1\ny = 2\n");
    }

    #[test]
    fn duplicate_insert_is_detected_at_or_above_target() {
        let buffer = LineBuffer::parse("import json\nx = json.dumps(1)\n");
        let at_target = FixChange::insert_line("f.py", 1, "import json");
        let below = FixChange::insert_line("f.py", 2, "import json");
        let elsewhere = FixChange::insert_line("f.py", 1, "import os");
        assert!(already_present(&buffer, &at_target));
        assert!(already_present(&buffer, &below));
        assert!(!already_present(&buffer, &elsewhere));
    }

    #[test]
    fn edit_log_moves_later_changes_past_earlier_ones() {
        // "import os\nimport sys\nx = json.dumps(sys.argv)\n", both fixes computed up front.
        let mut insert = FixChange::insert_line("f.py", 1, "import json");
        insert.expected = Some("import os".to_string());
        let delete_os = FixChange::delete_line("f.py", 1, Some("import os".to_string()));
        let replace_x = FixChange::replace_line("f.py", 3, "x = 1", Some("x = json.dumps(sys.argv)".to_string()));

        let mut log = EditLog::default();
        assert_eq!(log.rebase(&insert).unwrap(), insert);
        log.record(&insert);

        let moved = log.rebase(&replace_x).unwrap();
        assert_eq!(moved.line, 4);
        let moved = log.rebase(&delete_os).unwrap();
        assert_eq!(moved.line, 2);
        log.record(&delete_os);

        // The deleted line cannot be edited again; an insert anchored on it keeps its spot.
        let again = FixChange::replace_line("f.py", 1, "import re", None);
        assert!(matches!(log.rebase(&again), Err(ErrorGraphError::FixConflict { .. })));
        let anchored = log.rebase(&insert).unwrap();
        assert_eq!(anchored.line, 2);
        assert_eq!(anchored.expected, None);
        assert_eq!(log.rebase(&replace_x).unwrap().line, 3);

        let other_file = FixChange::delete_line("g.py", 1, None);
        assert_eq!(log.rebase(&other_file).unwrap(), other_file);
    }

    #[test]
    fn deleting_the_only_line_leaves_empty_file() {
        let d = FixChange::delete_line("f.py", 1, Some("import os".to_string()));
        assert_eq!(apply_changes("f.py", "import os\n", &[&d]).unwrap(), "");
    }
}
