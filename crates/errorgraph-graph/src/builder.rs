use crate::graph::{DependencyGraph, EdgeKind, GraphEdge, GraphNode, NodeId, NodeKind};
use errorgraph_core::{ClassSymbol, FunctionSymbol, ModuleSymbol, Result, SymbolProvider};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Builds a `DependencyGraph` from parser-provided symbols.
///
/// Node ids are the qualified name (`name`, or `Class.method` for methods) when that name is
/// unique across the codebase, and `file_path::qualified` otherwise. Module ids are file paths.
/// Inputs are sorted before insertion so identical inputs always produce an identical graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraphBuilder {
    dropped_edges: usize,
}

#[derive(Debug, Default)]
struct NameIndex {
    /// qualified name -> ids
    qualified: HashMap<String, Vec<NodeId>>,
    /// bare name -> ids
    bare: HashMap<String, Vec<NodeId>>,
    /// id -> file
    files: HashMap<NodeId, String>,
}

impl NameIndex {
    fn insert(&mut self, id: &str, qualified: &str, bare: &str, file_path: &str) {
        self.qualified
            .entry(qualified.to_string())
            .or_default()
            .push(id.to_string());
        if qualified != bare {
            self.bare
                .entry(bare.to_string())
                .or_default()
                .push(id.to_string());
        }
        self.files.insert(id.to_string(), file_path.to_string());
    }

    /// Exact qualified match first, then bare-name match; same-file candidates win, ties by id.
    fn resolve(&self, name: &str, from_file: &str) -> Option<NodeId> {
        let candidates = self
            .qualified
            .get(name)
            .or_else(|| self.bare.get(name))?;
        candidates
            .iter()
            .min_by_key(|id| {
                let other_file = self.files.get(id.as_str()).map(String::as_str) != Some(from_file);
                (other_file, id.as_str())
            })
            .cloned()
    }
}

fn qualified_name(function: &FunctionSymbol) -> String {
    match &function.class_name {
        Some(class) => format!("{class}.{}", function.name),
        None => function.name.clone(),
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

impl DependencyGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edges dropped during the last build because their target could not be resolved.
    pub fn dropped_edges(&self) -> usize {
        self.dropped_edges
    }

    pub async fn build(&mut self, provider: &dyn SymbolProvider) -> Result<DependencyGraph> {
        let functions = provider.functions().await?;
        let classes = provider.classes().await?;
        let modules = provider.modules().await?;
        Ok(self.build_from(functions, classes, modules))
    }

    pub fn build_from(
        &mut self,
        mut functions: Vec<FunctionSymbol>,
        mut classes: Vec<ClassSymbol>,
        mut modules: Vec<ModuleSymbol>,
    ) -> DependencyGraph {
        self.dropped_edges = 0;
        functions.sort_by(|a, b| {
            (&a.file_path, a.line_start, &a.name).cmp(&(&b.file_path, b.line_start, &b.name))
        });
        classes.sort_by(|a, b| {
            (&a.file_path, a.line_start, &a.name).cmp(&(&b.file_path, b.line_start, &b.name))
        });
        modules.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        modules.dedup_by(|a, b| a.file_path == b.file_path);

        let mut graph = DependencyGraph::new();

        // Qualified names shared by more than one symbol get file-scoped ids.
        let mut name_counts: BTreeMap<String, usize> = BTreeMap::new();
        for f in &functions {
            *name_counts.entry(qualified_name(f)).or_default() += 1;
        }
        for c in &classes {
            *name_counts.entry(c.name.clone()).or_default() += 1;
        }
        let make_id = |qualified: &str, file_path: &str| -> NodeId {
            if name_counts.get(qualified).copied().unwrap_or(0) > 1 {
                format!("{file_path}::{qualified}")
            } else {
                qualified.to_string()
            }
        };

        for module in &modules {
            graph.add_node(GraphNode::new(
                module.file_path.clone(),
                NodeKind::Module,
                module.name.clone(),
                module.file_path.clone(),
            ));
        }

        let mut functions_index = NameIndex::default();
        let mut classes_index = NameIndex::default();
        let mut class_ids: Vec<NodeId> = Vec::with_capacity(classes.len());
        let mut function_ids: Vec<NodeId> = Vec::with_capacity(functions.len());

        for class in &classes {
            let id = make_id(&class.name, &class.file_path);
            let mut node = GraphNode::new(
                id.clone(),
                NodeKind::Class,
                class.name.clone(),
                class.file_path.clone(),
            )
            .with_span(class.line_start, class.line_end);
            if !class.base_classes.is_empty() {
                node = node.with_attribute("base_classes", class.base_classes.join(","));
            }
            node.usages = class.usages.clone();
            graph.add_node(node);
            classes_index.insert(&id, &class.name, &class.name, &class.file_path);
            class_ids.push(id);
        }

        for function in &functions {
            let qualified = qualified_name(function);
            let id = make_id(&qualified, &function.file_path);
            let mut node = GraphNode::new(
                id.clone(),
                NodeKind::Function,
                qualified.clone(),
                function.file_path.clone(),
            )
            .with_span(function.line_start, function.line_end)
            .with_complexity(function.complexity)
            .with_attribute("parameters", function.parameters.join(","));
            if let Some(class) = &function.class_name {
                node = node.with_attribute("class", class.clone());
            }
            node.usages = function.usages.clone();
            graph.add_node(node);
            functions_index.insert(&id, &qualified, &function.name, &function.file_path);
            function_ids.push(id);
        }

        // Every entity hangs off a module; files without an explicit module get one.
        let files = classes
            .iter()
            .map(|c| &c.file_path)
            .chain(functions.iter().map(|f| &f.file_path));
        for file_path in files {
            if !graph.contains(file_path) {
                let module = ModuleSymbol::from_path(file_path);
                graph.add_node(GraphNode::new(
                    module.file_path.clone(),
                    NodeKind::Module,
                    module.name,
                    module.file_path,
                ));
            }
        }

        // contains: module -> class, module -> top-level function, class -> method
        for (class, id) in classes.iter().zip(&class_ids) {
            graph.add_edge(GraphEdge::new(class.file_path.clone(), id.clone(), EdgeKind::Contains));
        }
        for (function, id) in functions.iter().zip(&function_ids) {
            let owner = function
                .class_name
                .as_deref()
                .and_then(|class| classes_index.resolve(class, &function.file_path));
            match owner {
                Some(class_id) => {
                    graph.add_edge(GraphEdge::new(class_id, id.clone(), EdgeKind::Contains));
                }
                None => {
                    graph.add_edge(GraphEdge::new(
                        function.file_path.clone(),
                        id.clone(),
                        EdgeKind::Contains,
                    ));
                }
            }
        }
        for (class, id) in classes.iter().zip(&class_ids) {
            for method in &class.methods {
                let qualified = format!("{}.{}", class.name, method);
                if let Some(method_id) = functions_index.resolve(&qualified, &class.file_path) {
                    graph.add_edge(GraphEdge::new(id.clone(), method_id, EdgeKind::Contains));
                }
            }
        }

        // inherits: class -> base
        for (class, id) in classes.iter().zip(&class_ids) {
            for base in &class.base_classes {
                match classes_index.resolve(last_segment(base), &class.file_path) {
                    Some(base_id) if &base_id != id => {
                        graph.add_edge(GraphEdge::new(id.clone(), base_id, EdgeKind::Inherits));
                    }
                    _ => {
                        self.dropped_edges += 1;
                        debug!(class = %id, base = %base, "dropping unresolved base class");
                    }
                }
            }
        }

        // calls: function -> function
        for (function, id) in functions.iter().zip(&function_ids) {
            for call in &function.calls {
                match self.resolve_call(&functions_index, function, call) {
                    Some(target) => {
                        graph.add_edge(GraphEdge::new(id.clone(), target, EdgeKind::Calls));
                    }
                    None => {
                        self.dropped_edges += 1;
                        debug!(caller = %id, call = %call, "dropping unresolved call");
                    }
                }
            }
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            dropped = self.dropped_edges,
            "built dependency graph"
        );
        graph
    }

    fn resolve_call(
        &self,
        index: &NameIndex,
        caller: &FunctionSymbol,
        call: &str,
    ) -> Option<NodeId> {
        let call = call.trim().trim_end_matches("()");
        if call.is_empty() {
            return None;
        }

        if let Some(method) = call
            .strip_prefix("self.")
            .or_else(|| call.strip_prefix("cls."))
        {
            if let Some(class) = &caller.class_name {
                if let Some(id) = index.resolve(&format!("{class}.{method}"), &caller.file_path) {
                    return Some(id);
                }
            }
            return index.resolve(last_segment(method), &caller.file_path);
        }

        index
            .resolve(call, &caller.file_path)
            .or_else(|| index.resolve(last_segment(call), &caller.file_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, file: &str, start: u32, calls: &[&str]) -> FunctionSymbol {
        FunctionSymbol {
            name: name.to_string(),
            file_path: file.to_string(),
            line_start: start,
            line_end: start + 4,
            parameters: Vec::new(),
            calls: calls.iter().map(|c| c.to_string()).collect(),
            usages: Vec::new(),
            class_name: None,
            complexity: None,
        }
    }

    fn class(name: &str, file: &str, start: u32, bases: &[&str]) -> ClassSymbol {
        ClassSymbol {
            name: name.to_string(),
            file_path: file.to_string(),
            line_start: start,
            line_end: start + 20,
            base_classes: bases.iter().map(|b| b.to_string()).collect(),
            methods: Vec::new(),
            usages: Vec::new(),
        }
    }

    #[test]
    fn builds_call_chain_and_drops_unknown_targets() {
        let mut builder = DependencyGraphBuilder::new();
        let graph = builder.build_from(
            vec![
                function("a", "m.py", 1, &["b", "print"]),
                function("b", "m.py", 10, &["c"]),
                function("c", "m.py", 20, &[]),
            ],
            Vec::new(),
            Vec::new(),
        );

        assert_eq!(graph.successors("a"), vec!["b".to_string()]);
        assert_eq!(graph.successors("b"), vec!["c".to_string()]);
        assert_eq!(builder.dropped_edges(), 1);
        // Module created implicitly and contains all three functions.
        assert_eq!(graph.successors("m.py").len(), 3);
    }

    #[test]
    fn duplicate_names_get_file_scoped_ids() {
        let mut builder = DependencyGraphBuilder::new();
        let graph = builder.build_from(
            vec![
                function("helper", "a.py", 1, &[]),
                function("helper", "b.py", 1, &[]),
                function("main", "b.py", 10, &["helper"]),
            ],
            Vec::new(),
            Vec::new(),
        );

        assert!(graph.contains("a.py::helper"));
        assert!(graph.contains("b.py::helper"));
        // Same-file target preferred.
        assert_eq!(graph.successors("main"), vec!["b.py::helper".to_string()]);
    }

    #[test]
    fn methods_and_inheritance() {
        let mut method = function("save", "models.py", 5, &["self.validate"]);
        method.class_name = Some("User".to_string());
        let mut validate = function("validate", "models.py", 12, &[]);
        validate.class_name = Some("User".to_string());

        let mut user = class("User", "models.py", 1, &["base.Model"]);
        user.methods = vec!["save".to_string(), "validate".to_string()];

        let mut builder = DependencyGraphBuilder::new();
        let graph = builder.build_from(
            vec![method, validate],
            vec![user, class("Model", "base.py", 1, &[])],
            Vec::new(),
        );

        assert_eq!(graph.successors("User.save"), vec!["User.validate".to_string()]);
        let inherits: Vec<_> = graph
            .outgoing("User")
            .filter(|e| e.edge_type == EdgeKind::Inherits)
            .collect();
        assert_eq!(inherits.len(), 1);
        assert_eq!(inherits[0].to, "Model");
        assert_eq!(inherits[0].weight, 2.0);
        assert!(graph
            .outgoing("User")
            .any(|e| e.edge_type == EdgeKind::Contains && e.to == "User.save"));
    }

    #[test]
    fn rebuild_is_idempotent() {
        let functions = vec![
            function("b", "m.py", 10, &["a"]),
            function("a", "m.py", 1, &["b"]),
        ];
        let mut builder = DependencyGraphBuilder::new();
        let first = builder.build_from(functions.clone(), Vec::new(), Vec::new());
        let mut reversed = functions;
        reversed.reverse();
        let second = builder.build_from(reversed, Vec::new(), Vec::new());
        assert_eq!(first.export(), second.export());
    }

    #[test]
    fn builds_from_provider() {
        let symbols = errorgraph_core::StaticSymbols {
            functions: vec![
                function("main", "app.py", 1, &["run"]),
                function("run", "app.py", 8, &[]),
            ],
            classes: Vec::new(),
            modules: Vec::new(),
        };
        let mut builder = DependencyGraphBuilder::new();
        let graph = tokio_test::block_on(builder.build(&symbols)).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert!(graph.module_for_file("app.py").is_some());
        assert_eq!(graph.successors("main"), vec!["run".to_string()]);
    }
}
