use crate::edits::{already_present, apply_changes, EditLog, LineBuffer};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use errorgraph_core::{
    ErrorFix, ErrorGraphError, ErrorId, FixChange, FixConfidence, Result, SourceStore,
    UnifiedError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-error lifecycle: `Detected -> Previewed -> Applied | Failed | Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    Detected,
    Previewed,
    Applied,
    Failed,
    Skipped,
}

impl ResolutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolutionState::Applied | ResolutionState::Failed | ResolutionState::Skipped
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatedImpact {
    pub files: usize,
    pub lines_changed: usize,
    /// Graph nodes reached from the error's enclosing symbol.
    pub blast_radius: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixPreview {
    pub error_id: ErrorId,
    pub can_resolve: bool,
    pub fix_title: Option<String>,
    pub confidence: Option<FixConfidence>,
    pub requires_user_input: bool,
    pub estimated_impact: EstimatedImpact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub error_id: ErrorId,
    pub success: bool,
    pub applied_fixes: Vec<String>,
    pub files_modified: Vec<String>,
    pub message: String,
    pub remaining_issues: Vec<String>,
    pub state: ResolutionState,
    pub finished_at: DateTime<Utc>,
}

impl ResolutionResult {
    fn failure(error_id: &str, state: ResolutionState, message: impl Into<String>) -> Self {
        Self {
            error_id: error_id.to_string(),
            success: false,
            applied_fixes: Vec::new(),
            files_modified: Vec::new(),
            message: message.into(),
            remaining_issues: Vec::new(),
            state,
            finished_at: Utc::now(),
        }
    }

    pub fn not_found(error_id: &str) -> Self {
        let mut result = Self::failure(
            error_id,
            ResolutionState::Failed,
            format!("error {} is not present (already fixed or unknown)", error_id),
        );
        result.remaining_issues.push(error_id.to_string());
        result
    }

    pub fn skipped(error_id: &str, message: impl Into<String>) -> Self {
        Self::failure(error_id, ResolutionState::Skipped, message)
    }
}

/// Counts always satisfy `total == successful + failed + skipped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub individual_results: Vec<ResolutionResult>,
}

impl BatchResult {
    pub fn push(&mut self, result: ResolutionResult) {
        self.total += 1;
        if result.success {
            self.successful += 1;
        } else if result.state == ResolutionState::Skipped {
            self.skipped += 1;
        } else {
            self.failed += 1;
        }
        self.individual_results.push(result);
    }
}

/// A batch entry: the id the caller asked for and the error it maps to, if any.
#[derive(Debug, Clone)]
pub struct BatchCandidate {
    pub error_id: ErrorId,
    pub error: Option<UnifiedError>,
}

/// Applies fixes as all-or-nothing transactions with one writer per file.
pub struct ErrorResolver {
    store: Arc<dyn SourceStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    states: DashMap<ErrorId, ResolutionState>,
    min_confidence: FixConfidence,
}

impl ErrorResolver {
    pub fn new(store: Arc<dyn SourceStore>, min_confidence: FixConfidence) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            states: DashMap::new(),
            min_confidence,
        }
    }

    pub fn min_confidence(&self) -> FixConfidence {
        self.min_confidence
    }

    pub fn state(&self, error_id: &str) -> Option<ResolutionState> {
        self.states.get(error_id).map(|s| *s)
    }

    /// Marks newly seen errors as detected without touching existing states.
    pub fn track<'a>(&self, errors: impl IntoIterator<Item = &'a UnifiedError>) {
        for error in errors {
            self.states
                .entry(error.id.clone())
                .or_insert(ResolutionState::Detected);
        }
    }

    /// Drops all lifecycle state, e.g. after a full refresh.
    pub fn reset(&self) {
        self.states.clear();
    }

    pub fn preview(&self, error: &UnifiedError, blast_radius: usize) -> FixPreview {
        let best = error.best_fix();
        let automatic = error.best_automatic_fix(self.min_confidence);
        let shown = automatic.or(best);

        let estimated_impact = shown
            .map(|fix| EstimatedImpact {
                files: fix
                    .changes
                    .iter()
                    .map(|c| c.file_path.as_str())
                    .collect::<BTreeSet<_>>()
                    .len(),
                lines_changed: fix.changes.iter().map(lines_touched).sum(),
                blast_radius,
            })
            .unwrap_or(EstimatedImpact {
                blast_radius,
                ..EstimatedImpact::default()
            });

        let mut state = self
            .states
            .entry(error.id.clone())
            .or_insert(ResolutionState::Detected);
        if !state.is_terminal() {
            *state = ResolutionState::Previewed;
        }

        FixPreview {
            error_id: error.id.clone(),
            can_resolve: automatic.is_some(),
            fix_title: shown.map(|f| f.title.clone()),
            confidence: shown.map(|f| f.confidence),
            requires_user_input: shown.is_some_and(|f| f.requires_user_input),
            estimated_impact,
        }
    }

    /// Applies the best eligible fix. Never errors; failures are reported in the result.
    pub async fn resolve(&self, error: &UnifiedError) -> ResolutionResult {
        self.resolve_with(error, &mut EditLog::default()).await
    }

    async fn resolve_with(&self, error: &UnifiedError, log: &mut EditLog) -> ResolutionResult {
        if self.state(&error.id) == Some(ResolutionState::Applied) {
            return ResolutionResult::failure(
                &error.id,
                ResolutionState::Applied,
                format!("error {} was already resolved", error.id),
            );
        }

        let Some(fix) = error.best_automatic_fix(self.min_confidence) else {
            let reason = if error.fixes().is_empty() {
                "no fix available"
            } else {
                "available fixes need user input or lack confidence"
            };
            self.states.insert(error.id.clone(), ResolutionState::Skipped);
            let mut result = ResolutionResult::skipped(&error.id, reason);
            result.remaining_issues.push(describe(error));
            return result;
        };

        match self.apply_fix_logged(fix, log).await {
            Ok(files_modified) => {
                self.states.insert(error.id.clone(), ResolutionState::Applied);
                info!(error = %error.id, fix = %fix.id, files = files_modified.len(), "applied fix");
                let message = if files_modified.is_empty() {
                    format!("'{}' was already in place", fix.title)
                } else {
                    format!("applied '{}'", fix.title)
                };
                ResolutionResult {
                    error_id: error.id.clone(),
                    success: true,
                    applied_fixes: vec![fix.id.clone()],
                    files_modified,
                    message,
                    remaining_issues: Vec::new(),
                    state: ResolutionState::Applied,
                    finished_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!(error = %error.id, fix = %fix.id, "fix not applied: {}", e);
                self.states.insert(error.id.clone(), ResolutionState::Failed);
                let mut result =
                    ResolutionResult::failure(&error.id, ResolutionState::Failed, e.to_string());
                result.remaining_issues.push(describe(error));
                result
            }
        }
    }

    /// Resolves candidates in order until `max_fixes` fixes have been applied; the rest
    /// are reported as skipped. Every fix in the batch refers to the same diagnostic
    /// snapshot, so each one is moved past the edits written before it.
    pub async fn resolve_batch(
        &self,
        candidates: Vec<BatchCandidate>,
        max_fixes: usize,
    ) -> BatchResult {
        let mut batch = BatchResult::default();
        let mut log = EditLog::default();
        for candidate in candidates {
            if batch.successful >= max_fixes {
                if candidate.error.is_some() {
                    self.states
                        .entry(candidate.error_id.clone())
                        .or_insert(ResolutionState::Skipped);
                }
                batch.push(ResolutionResult::skipped(
                    &candidate.error_id,
                    format!("fix limit of {} reached", max_fixes),
                ));
                continue;
            }
            let result = match &candidate.error {
                Some(error) => self.resolve_with(error, &mut log).await,
                None => ResolutionResult::not_found(&candidate.error_id),
            };
            batch.push(result);
        }
        debug!(
            total = batch.total,
            successful = batch.successful,
            failed = batch.failed,
            skipped = batch.skipped,
            "batch resolution finished"
        );
        batch
    }

    /// Applies every change of `fix` or none. Returns the modified files; inserts whose
    /// line is already there are dropped, so the list may be empty.
    pub async fn apply_fix(&self, fix: &ErrorFix) -> Result<Vec<String>> {
        self.apply_fix_logged(fix, &mut EditLog::default()).await
    }

    async fn apply_fix_logged(&self, fix: &ErrorFix, log: &mut EditLog) -> Result<Vec<String>> {
        if fix.changes.is_empty() {
            return Err(ErrorGraphError::InvalidOperation(format!(
                "fix {} has no edits",
                fix.id
            )));
        }

        let mut by_file: BTreeMap<&str, Vec<&FixChange>> = BTreeMap::new();
        for change in &fix.changes {
            by_file.entry(change.file_path.as_str()).or_default().push(change);
        }

        // Sorted acquisition keeps multi-file fixes from deadlocking each other.
        let mut guards = Vec::with_capacity(by_file.len());
        for file in by_file.keys() {
            guards.push(self.lock_for(file).lock_owned().await);
        }

        let mut staged: Vec<(&str, String, String)> = Vec::with_capacity(by_file.len());
        let mut landed: Vec<&FixChange> = Vec::new();
        for (file, changes) in &by_file {
            let original = self.store.read(file).await?;
            let buffer = LineBuffer::parse(&original);
            let mut pending: Vec<(&FixChange, FixChange)> = Vec::with_capacity(changes.len());
            for change in changes {
                let rebased = log.rebase(change)?;
                if already_present(&buffer, &rebased) {
                    debug!(file = %file, line = rebased.line, "insert already present, skipping");
                    continue;
                }
                pending.push((*change, rebased));
            }
            if pending.is_empty() {
                continue;
            }
            let rebased: Vec<&FixChange> = pending.iter().map(|(_, r)| r).collect();
            let updated = apply_changes(file, &original, &rebased)?;
            landed.extend(pending.iter().map(|(c, _)| *c));
            staged.push((*file, original, updated));
        }

        let mut written: Vec<(&str, &str)> = Vec::new();
        for (file, original, updated) in &staged {
            if let Err(e) = self.store.write(file, updated).await {
                self.rollback(&written).await;
                return Err(e);
            }
            written.push((*file, original.as_str()));
        }

        for change in landed {
            log.record(change);
        }
        drop(guards);
        Ok(written.into_iter().map(|(f, _)| f.to_string()).collect())
    }

    async fn rollback(&self, written: &[(&str, &str)]) {
        for (file, original) in written.iter().rev() {
            match self.store.write(file, original).await {
                Ok(()) => debug!(file = %file, "rolled back"),
                Err(e) => warn!(file = %file, "rollback failed: {}", e),
            }
        }
    }

    fn lock_for(&self, file: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(file.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn lines_touched(change: &FixChange) -> usize {
    let span = change
        .end_line
        .map_or(1, |end| end.saturating_sub(change.line) as usize + 1);
    span.max(change.new_text.as_deref().map_or(1, |t| t.split('\n').count()))
}

fn describe(error: &UnifiedError) -> String {
    format!(
        "{}:{}: {}",
        error.location.file_path, error.location.line, error.message
    )
}
