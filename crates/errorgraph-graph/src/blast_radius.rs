use crate::graph::{DependencyGraph, GraphNode, NodeId, NodeKind};
use errorgraph_core::BlastRadiusSettings;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusNode {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeKind,
    pub file_path: String,
    /// BFS distance from the origin; 0 for the origin itself.
    pub impact_level: usize,
    pub impact_score: f64,
    /// Outgoing neighbour ids.
    pub dependencies: Vec<NodeId>,
    /// Incoming neighbour ids.
    pub dependents: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPath {
    pub target: NodeId,
    /// Origin first, target last.
    pub path: Vec<NodeId>,
    pub target_score: f64,
}

impl CriticalPath {
    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityBuckets {
    /// score > 0.7
    pub high: usize,
    /// 0.3 < score <= 0.7
    pub medium: usize,
    /// score <= 0.3
    pub low: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    pub by_type: BTreeMap<NodeKind, usize>,
    pub by_severity: SeverityBuckets,
    pub average_score: f64,
    pub max_impact_level: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusResult {
    pub origin_id: NodeId,
    /// Ordered by (impact_level, id).
    pub nodes: Vec<BlastRadiusNode>,
    pub impact_levels: BTreeMap<usize, Vec<NodeId>>,
    pub critical_paths: Vec<CriticalPath>,
    pub total_affected_nodes: usize,
    pub impact_summary: ImpactSummary,
}

impl BlastRadiusResult {
    pub fn empty(origin_id: &str) -> Self {
        Self {
            origin_id: origin_id.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&BlastRadiusNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn origin_score(&self) -> Option<f64> {
        self.node(&self.origin_id).map(|n| n.impact_score)
    }

    /// Sum of scores over every affected node except the origin.
    pub fn downstream_impact(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| n.impact_level > 0)
            .map(|n| n.impact_score)
            .sum()
    }
}

/// Breadth-first reach from a node, bounded by depth.
struct Reach {
    levels: HashMap<NodeId, usize>,
    parents: HashMap<NodeId, NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

pub struct BlastRadiusAnalyzer {
    settings: BlastRadiusSettings,
}

impl BlastRadiusAnalyzer {
    pub fn new(settings: BlastRadiusSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BlastRadiusSettings {
        &self.settings
    }

    fn multiplier(&self, kind: NodeKind) -> f64 {
        match kind {
            NodeKind::Function => self.settings.function_multiplier,
            NodeKind::Class => self.settings.class_multiplier,
            NodeKind::Module => self.settings.module_multiplier,
        }
    }

    /// Score for a node at `level`. The complexity boost never exceeds the gap to the next
    /// level, so among nodes of the same type a smaller level never scores lower.
    pub fn impact_score(&self, node: &GraphNode, level: usize) -> f64 {
        if level == 0 {
            return 1.0;
        }
        let base = 1.0 / (level as f64 + 1.0);
        let next = 1.0 / (level as f64 + 2.0);
        let boost = match node.complexity {
            Some(c) if c > self.settings.complexity_threshold => {
                self.settings.complexity_boost.clamp(0.0, 1.0) * (base - next)
            }
            _ => 0.0,
        };
        (self.multiplier(node.node_type) * (base + boost)).clamp(0.0, 1.0)
    }

    pub fn analyze(
        &self,
        graph: &DependencyGraph,
        origin_id: &str,
        max_depth: usize,
        include_reverse: bool,
    ) -> BlastRadiusResult {
        if !graph.contains(origin_id) {
            debug!(origin = origin_id, "blast radius origin not in graph");
            return BlastRadiusResult::empty(origin_id);
        }

        let forward = bfs(graph, origin_id, max_depth, Direction::Forward);
        let reverse = include_reverse.then(|| bfs(graph, origin_id, max_depth, Direction::Reverse));

        // Minimum level wins; remember which traversal produced it for path reconstruction.
        let mut merged: HashMap<NodeId, (usize, Direction)> = forward
            .levels
            .iter()
            .map(|(id, &level)| (id.clone(), (level, Direction::Forward)))
            .collect();
        if let Some(reverse) = &reverse {
            for (id, &level) in &reverse.levels {
                merged
                    .entry(id.clone())
                    .and_modify(|entry| {
                        if level < entry.0 {
                            *entry = (level, Direction::Reverse);
                        }
                    })
                    .or_insert((level, Direction::Reverse));
            }
        }

        let mut nodes: Vec<BlastRadiusNode> = merged
            .iter()
            .filter_map(|(id, &(level, _))| {
                let node = graph.node(id)?;
                Some(BlastRadiusNode {
                    id: id.clone(),
                    name: node.name.clone(),
                    node_type: node.node_type,
                    file_path: node.file_path.clone(),
                    impact_level: level,
                    impact_score: self.impact_score(node, level),
                    dependencies: graph.successors(id),
                    dependents: graph.predecessors(id),
                })
            })
            .collect();
        nodes.sort_by(|a, b| a.impact_level.cmp(&b.impact_level).then_with(|| a.id.cmp(&b.id)));

        let mut impact_levels: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        for node in &nodes {
            impact_levels
                .entry(node.impact_level)
                .or_default()
                .push(node.id.clone());
        }

        let mut critical_paths: Vec<CriticalPath> = nodes
            .iter()
            .filter(|n| n.impact_level > 0 && n.impact_score > self.settings.critical_threshold)
            .filter_map(|n| {
                let (_, direction) = merged.get(&n.id)?;
                let reach = match direction {
                    Direction::Forward => &forward,
                    Direction::Reverse => reverse.as_ref()?,
                };
                Some(CriticalPath {
                    target: n.id.clone(),
                    path: reconstruct_path(reach, origin_id, &n.id),
                    target_score: n.impact_score,
                })
            })
            .collect();
        critical_paths.sort_by(|a, b| {
            a.len()
                .cmp(&b.len())
                .then_with(|| b.target_score.total_cmp(&a.target_score))
                .then_with(|| a.target.cmp(&b.target))
        });
        critical_paths.truncate(self.settings.max_critical_paths);

        let impact_summary = summarize(&nodes);
        let total_affected_nodes = nodes.len();
        debug!(
            origin = origin_id,
            affected = total_affected_nodes,
            critical = critical_paths.len(),
            "blast radius computed"
        );

        BlastRadiusResult {
            origin_id: origin_id.to_string(),
            nodes,
            impact_levels,
            critical_paths,
            total_affected_nodes,
            impact_summary,
        }
    }
}

impl Default for BlastRadiusAnalyzer {
    fn default() -> Self {
        Self::new(BlastRadiusSettings::default())
    }
}

fn bfs(graph: &DependencyGraph, origin: &str, max_depth: usize, direction: Direction) -> Reach {
    let mut levels = HashMap::new();
    let mut parents = HashMap::new();
    let mut queue = VecDeque::new();

    levels.insert(origin.to_string(), 0usize);
    queue.push_back(origin.to_string());

    while let Some(current) = queue.pop_front() {
        let level = levels[&current];
        if level >= max_depth {
            continue;
        }
        let neighbours = match direction {
            Direction::Forward => graph.successors(&current),
            Direction::Reverse => graph.predecessors(&current),
        };
        for next in neighbours {
            if !levels.contains_key(&next) {
                levels.insert(next.clone(), level + 1);
                parents.insert(next.clone(), current.clone());
                queue.push_back(next);
            }
        }
    }

    Reach { levels, parents }
}

fn reconstruct_path(reach: &Reach, origin: &str, target: &str) -> Vec<NodeId> {
    let mut path = vec![target.to_string()];
    let mut node = target;
    while node != origin {
        match reach.parents.get(node) {
            Some(prev) => {
                path.push(prev.clone());
                node = prev.as_str();
            }
            None => break,
        }
    }
    path.reverse();
    path
}

fn summarize(nodes: &[BlastRadiusNode]) -> ImpactSummary {
    let mut summary = ImpactSummary::default();
    if nodes.is_empty() {
        return summary;
    }
    let mut total = 0.0;
    for node in nodes {
        *summary.by_type.entry(node.node_type).or_default() += 1;
        if node.impact_score > 0.7 {
            summary.by_severity.high += 1;
        } else if node.impact_score > 0.3 {
            summary.by_severity.medium += 1;
        } else {
            summary.by_severity.low += 1;
        }
        total += node.impact_score;
        summary.max_impact_level = summary.max_impact_level.max(node.impact_level);
    }
    summary.average_score = total / nodes.len() as f64;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeKind, GraphEdge};

    fn chain(ids: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (i, id) in ids.iter().enumerate() {
            let start = i as u32 * 10 + 1;
            graph.add_node(
                GraphNode::new(*id, NodeKind::Function, *id, "m.py").with_span(start, start + 5),
            );
        }
        for pair in ids.windows(2) {
            graph.add_edge(GraphEdge::new(pair[0], pair[1], EdgeKind::Calls));
        }
        graph
    }

    #[test]
    fn scores_follow_level_and_type() {
        let analyzer = BlastRadiusAnalyzer::default();
        let function = GraphNode::new("f", NodeKind::Function, "f", "m.py");
        let class = GraphNode::new("c", NodeKind::Class, "c", "m.py");
        let module = GraphNode::new("m", NodeKind::Module, "m", "m.py");

        assert_eq!(analyzer.impact_score(&function, 0), 1.0);
        assert_eq!(analyzer.impact_score(&function, 1), 0.5);
        assert!((analyzer.impact_score(&class, 1) - 0.65).abs() < 1e-9);
        assert!((analyzer.impact_score(&module, 1) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn complexity_boost_keeps_scores_monotonic() {
        let analyzer = BlastRadiusAnalyzer::default();
        let plain = GraphNode::new("p", NodeKind::Function, "p", "m.py");
        let complex = plain.clone().with_complexity(Some(25.0));

        for level in 1..8 {
            let boosted = analyzer.impact_score(&complex, level);
            assert!(boosted > analyzer.impact_score(&plain, level));
            assert!(boosted <= analyzer.impact_score(&plain, level - 1));
            assert!(analyzer.impact_score(&complex, level + 1) <= boosted);
        }
    }

    #[test]
    fn reverse_edges_merge_with_minimum_level() {
        // x -> a -> b, and b -> a' style back edge through y
        let mut graph = chain(&["x", "a", "b"]);
        graph.add_node(GraphNode::new("y", NodeKind::Function, "y", "m.py"));
        graph.add_edge(GraphEdge::new("y", "a", EdgeKind::Calls));

        let analyzer = BlastRadiusAnalyzer::default();
        let forward_only = analyzer.analyze(&graph, "a", 5, false);
        assert_eq!(forward_only.total_affected_nodes, 2);

        let both = analyzer.analyze(&graph, "a", 5, true);
        assert_eq!(both.total_affected_nodes, 4);
        assert_eq!(both.node("x").unwrap().impact_level, 1);
        assert_eq!(both.node("y").unwrap().impact_level, 1);
        assert_eq!(both.node("a").unwrap().dependents, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn critical_paths_use_module_multiplier() {
        let mut graph = chain(&["f", "g"]);
        graph.add_node(GraphNode::new("m.py", NodeKind::Module, "m", "m.py"));
        graph.add_edge(GraphEdge::new("m.py", "f", EdgeKind::Contains));

        let analyzer = BlastRadiusAnalyzer::default();
        let result = analyzer.analyze(&graph, "f", 3, true);
        // Only the module at level 1 clears the 0.7 threshold.
        assert_eq!(result.critical_paths.len(), 1);
        assert_eq!(result.critical_paths[0].target, "m.py");
        assert_eq!(
            result.critical_paths[0].path,
            vec!["f".to_string(), "m.py".to_string()]
        );
        assert_eq!(result.impact_summary.by_severity.high, 2);
        assert_eq!(result.impact_summary.by_severity.medium, 1);
    }

    #[test]
    fn unknown_origin_is_empty() {
        let graph = chain(&["a", "b"]);
        let result = BlastRadiusAnalyzer::default().analyze(&graph, "zzz", 5, true);
        assert!(result.is_empty());
        assert_eq!(result.total_affected_nodes, 0);
        assert_eq!(result.origin_id, "zzz");
    }
}
