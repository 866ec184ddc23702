use errorgraph_core::UsageSite;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Function,
    Class,
    Module,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Function => "function",
            NodeKind::Class => "class",
            NodeKind::Module => "module",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Calls,
    Inherits,
    Contains,
}

impl EdgeKind {
    pub fn default_weight(&self) -> f64 {
        match self {
            EdgeKind::Calls => 1.0,
            EdgeKind::Inherits => 2.0,
            EdgeKind::Contains => 0.5,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::Calls => "calls",
            EdgeKind::Inherits => "inherits",
            EdgeKind::Contains => "contains",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub node_type: NodeKind,
    pub name: String,
    pub file_path: String,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    pub complexity: Option<f32>,
    #[serde(default)]
    pub usages: Vec<UsageSite>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl GraphNode {
    pub fn new(
        id: impl Into<NodeId>,
        node_type: NodeKind,
        name: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type,
            name: name.into(),
            file_path: file_path.into(),
            line_start: None,
            line_end: None,
            complexity: None,
            usages: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_span(mut self, line_start: u32, line_end: u32) -> Self {
        self.line_start = Some(line_start);
        self.line_end = Some(line_end.max(line_start));
        self
    }

    pub fn with_complexity(mut self, complexity: Option<f32>) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn contains_line(&self, line: u32) -> bool {
        match (self.line_start, self.line_end) {
            (Some(start), Some(end)) => start <= line && line <= end,
            _ => false,
        }
    }

    fn span_len(&self) -> u32 {
        match (self.line_start, self.line_end) {
            (Some(start), Some(end)) => end - start,
            _ => u32::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub edge_type: EdgeKind,
    pub weight: f64,
}

impl GraphEdge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, edge_type: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge_type,
            weight: edge_type.default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_type: BTreeMap<NodeKind, usize>,
    pub edges_by_type: BTreeMap<EdgeKind, usize>,
}

/// Serializable node/edge listing for visualization layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub stats: GraphStats,
}

/// Directed multigraph of code entities. Edges whose endpoints are not both present are rejected,
/// so adjacency never points at a missing node.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<NodeId, GraphNode>,
    edges: Vec<GraphEdge>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    incoming: HashMap<NodeId, Vec<usize>>,
    edge_keys: HashSet<(NodeId, NodeId, EdgeKind)>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a node.
    pub fn add_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Returns false when either endpoint is unknown or the same typed edge already exists.
    pub fn add_edge(&mut self, edge: GraphEdge) -> bool {
        if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(&edge.to) {
            return false;
        }
        let key = (edge.from.clone(), edge.to.clone(), edge.edge_type);
        if !self.edge_keys.insert(key) {
            return false;
        }

        let idx = self.edges.len();
        self.outgoing.entry(edge.from.clone()).or_default().push(idx);
        self.incoming.entry(edge.to.clone()).or_default().push(idx);
        self.edges.push(edge);
        true
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    /// Distinct outgoing neighbours, sorted.
    pub fn successors(&self, id: &str) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.outgoing(id).map(|e| e.to.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Distinct incoming neighbours, sorted.
    pub fn predecessors(&self, id: &str) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.incoming(id).map(|e| e.from.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn find_by_name(&self, name: &str) -> Vec<&GraphNode> {
        self.nodes.values().filter(|n| n.name == name).collect()
    }

    pub fn nodes_in_file<'a, 'b>(&'a self, file_path: &'b str) -> impl Iterator<Item = &'a GraphNode> + use<'a, 'b> {
        self.nodes.values().filter(move |n| n.file_path == file_path)
    }

    pub fn module_for_file(&self, file_path: &str) -> Option<&GraphNode> {
        self.nodes_in_file(file_path)
            .find(|n| n.node_type == NodeKind::Module)
    }

    /// Innermost function or class whose span contains `line`; falls back to the file's module node.
    pub fn enclosing_node(&self, file_path: &str, line: u32) -> Option<&GraphNode> {
        self.nodes_in_file(file_path)
            .filter(|n| n.node_type != NodeKind::Module && n.contains_line(line))
            .min_by(|a, b| {
                a.span_len()
                    .cmp(&b.span_len())
                    .then_with(|| a.node_type.cmp(&b.node_type))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .or_else(|| self.module_for_file(file_path))
    }

    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<NodeId>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }

        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();

        queue.push_back(from.to_string());
        visited.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut node = current;
                while let Some(prev) = parent.get(&node) {
                    path.push(prev.clone());
                    node = prev.clone();
                }
                path.reverse();
                return Some(path);
            }

            for neighbor in self.successors(&current) {
                if visited.insert(neighbor.clone()) {
                    parent.insert(neighbor.clone(), current.clone());
                    queue.push_back(neighbor);
                }
            }
        }

        None
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            ..GraphStats::default()
        };
        for node in self.nodes.values() {
            *stats.nodes_by_type.entry(node.node_type).or_default() += 1;
        }
        for edge in &self.edges {
            *stats.edges_by_type.entry(edge.edge_type).or_default() += 1;
        }
        stats
    }

    /// Nodes ordered by id, edges by (from, to, type).
    pub fn export(&self) -> GraphExport {
        let mut edges = self.edges.clone();
        edges.sort_by(|a, b| {
            a.from
                .cmp(&b.from)
                .then_with(|| a.to.cmp(&b.to))
                .then_with(|| a.edge_type.cmp(&b.edge_type))
        });
        GraphExport {
            nodes: self.nodes.values().cloned().collect(),
            edges,
            stats: self.stats(),
        }
    }
}
