use errorgraph_core::{
    quoted_names, BlastRadiusSettings, ContextSettings, ErrorRecord, FixConfidence, Severity,
    UnifiedError, UsageSite,
};
use errorgraph_graph::{BlastRadiusAnalyzer, DependencyGraph, ImpactSummary, NodeKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextScope {
    Function,
    Class,
    Module,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnclosingSymbol {
    pub id: String,
    pub name: String,
    pub node_type: NodeKind,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeLine {
    pub number: u32,
    pub text: String,
    pub is_error_line: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeWindow {
    pub start_line: u32,
    pub end_line: u32,
    pub lines: Vec<CodeLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolDefinition {
    pub id: String,
    pub node_type: NodeKind,
    pub file_path: String,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolReference {
    pub name: String,
    pub definitions: Vec<SymbolDefinition>,
    /// Usage sites in files other than the error's file.
    pub cross_file_usages: Vec<UsageSite>,
    pub total_usages: usize,
}

/// Everything known about one error, for UI display and prioritisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContext {
    pub error: ErrorRecord,
    pub scope: ContextScope,
    pub enclosing_symbol: Option<EnclosingSymbol>,
    pub code_window: CodeWindow,
    pub symbols: Vec<SymbolReference>,
    pub impact: Option<ImpactSummary>,
    /// Sum of non-origin blast-radius scores of the enclosing symbol.
    pub downstream_impact: f64,
    pub fix_priority: f64,
}

pub struct ErrorContextEngine {
    settings: ContextSettings,
    analyzer: BlastRadiusAnalyzer,
}

impl ErrorContextEngine {
    pub fn new(settings: ContextSettings, blast_radius: BlastRadiusSettings) -> Self {
        Self {
            settings,
            analyzer: BlastRadiusAnalyzer::new(blast_radius),
        }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Weighted sum of severity, best-fix confidence and saturated impact. Non-decreasing in
    /// each input.
    pub fn fix_priority(
        &self,
        severity: Severity,
        best_confidence: Option<FixConfidence>,
        downstream_impact: f64,
    ) -> f64 {
        let s = &self.settings;
        let impact = downstream_impact.max(0.0);
        let impact_rank = impact / (impact + s.impact_saturation);
        s.severity_weight * severity.rank()
            + s.confidence_weight * best_confidence.map_or(0.0, |c| c.rank())
            + s.impact_weight * impact_rank
    }

    /// Returns `None` when either the graph or the file content is unavailable.
    pub fn build(
        &self,
        error: &UnifiedError,
        graph: Option<&DependencyGraph>,
        content: Option<&str>,
    ) -> Option<ErrorContext> {
        let graph = graph?;
        let content = content?;
        let location = &error.location;

        let enclosing = graph
            .enclosing_node(&location.file_path, location.line)
            .filter(|n| n.node_type != NodeKind::Module);
        let scope = match enclosing.map(|n| n.node_type) {
            Some(NodeKind::Function) => ContextScope::Function,
            Some(NodeKind::Class) => ContextScope::Class,
            _ => ContextScope::Module,
        };

        let origin = enclosing.or_else(|| graph.module_for_file(&location.file_path));
        let blast = origin.map(|node| {
            self.analyzer.analyze(
                graph,
                &node.id,
                self.analyzer.settings().max_depth,
                true,
            )
        });
        let downstream_impact = blast.as_ref().map_or(0.0, |b| b.downstream_impact());

        let fix_priority = self.fix_priority(
            error.severity,
            error.best_fix().map(|f| f.confidence),
            downstream_impact,
        );

        Some(ErrorContext {
            error: error.to_record(),
            scope,
            enclosing_symbol: enclosing.map(|n| EnclosingSymbol {
                id: n.id.clone(),
                name: n.name.clone(),
                node_type: n.node_type,
                line_start: n.line_start,
                line_end: n.line_end,
            }),
            code_window: code_window(content, location.line, self.settings.window_lines),
            symbols: symbol_references(graph, error),
            impact: blast.map(|b| b.impact_summary),
            downstream_impact,
            fix_priority,
        })
    }
}

impl Default for ErrorContextEngine {
    fn default() -> Self {
        Self::new(ContextSettings::default(), BlastRadiusSettings::default())
    }
}

/// Lines `line - radius ..= line + radius`, clamped to the file.
pub fn code_window(content: &str, line: u32, radius: u32) -> CodeWindow {
    let all: Vec<&str> = content.lines().collect();
    if all.is_empty() {
        return CodeWindow {
            start_line: line,
            end_line: line,
            lines: Vec::new(),
        };
    }
    let last = all.len() as u32;
    let center = line.clamp(1, last);
    let start_line = center.saturating_sub(radius).max(1);
    let end_line = center.saturating_add(radius).min(last);

    let lines = (start_line..=end_line)
        .map(|n| CodeLine {
            number: n,
            text: all[(n - 1) as usize].to_string(),
            is_error_line: n == line,
        })
        .collect();
    CodeWindow {
        start_line,
        end_line,
        lines,
    }
}

fn symbol_references(graph: &DependencyGraph, error: &UnifiedError) -> Vec<SymbolReference> {
    quoted_names(&error.message)
        .into_iter()
        .filter_map(|name| {
            let short = name.rsplit('.').next().unwrap_or(&name).to_string();
            let mut nodes: Vec<_> = graph
                .nodes()
                .filter(|n| {
                    n.name == name
                        || n.name == short
                        || n.name.rsplit('.').next() == Some(short.as_str())
                })
                .collect();
            if nodes.is_empty() {
                return None;
            }
            nodes.sort_by(|a, b| a.id.cmp(&b.id));

            let mut usages: Vec<UsageSite> =
                nodes.iter().flat_map(|n| n.usages.iter().cloned()).collect();
            usages.sort_by(|a, b| (&a.file_path, a.line).cmp(&(&b.file_path, b.line)));
            usages.dedup();
            let total_usages = usages.len();
            let cross_file_usages = usages
                .into_iter()
                .filter(|u| u.file_path != error.location.file_path)
                .collect();

            Some(SymbolReference {
                name,
                definitions: nodes
                    .iter()
                    .map(|n| SymbolDefinition {
                        id: n.id.clone(),
                        node_type: n.node_type,
                        file_path: n.file_path.clone(),
                        line: n.line_start,
                    })
                    .collect(),
                cross_file_usages,
                total_usages,
            })
        })
        .collect()
}
