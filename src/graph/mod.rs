// Flow graph: files, functions, call edges and variable-flow edges

pub mod cache;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grammar::symbols::{self, Callee};
use crate::grammar::{Ast, AstKind, AstNode};
use crate::resolver::references::file_stem;
use crate::resolver::CompilationUnit;

pub use cache::AnalysisCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Call,
    VariableFlow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// File path, or `path#qualifiedName` for functions.
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub kind: EdgeKind,
    pub label: String,
}

/// An edge whose endpoint is not a node of the same graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("edge {edge} references missing node {node}")]
pub struct DanglingEdge {
    pub edge: String,
    pub node: String,
}

/// Nodes and edges in deterministic insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl FlowGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Check that every edge connects two nodes of this graph.
    pub fn validate(&self) -> Result<(), DanglingEdge> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &self.edges {
            for endpoint in [&edge.source_node_id, &edge.target_node_id] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(DanglingEdge {
                        edge: edge.id.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A function definition found in the first pass.
struct FunctionSite {
    id: String,
    name: String,
    /// Enclosing scope segments (class, impl, namespace).
    scope: Vec<String>,
    file: String,
}

/// Build the flow graph of a unit. Never fails: files without a tree get a
/// node and nothing else.
pub fn build(unit: &CompilationUnit, asts: &[Ast]) -> FlowGraph {
    let mut builder = GraphBuilder::new(unit);

    let ordered: Vec<&Ast> = unit
        .paths()
        .filter_map(|path| asts.iter().find(|ast| ast.path == path))
        .collect();

    for path in unit.paths() {
        builder.add_node(GraphNode {
            id: path.to_string(),
            kind: NodeKind::File,
            label: path.rsplit('/').next().unwrap_or(path).to_string(),
            file: path.to_string(),
            line: 1,
        });
    }

    for ast in &ordered {
        let mut scope = Vec::new();
        builder.collect_functions(ast, &ast.root, &mut scope);
    }
    for ast in &ordered {
        builder.collect_edges(ast, &ast.root, None);
    }

    debug!(
        "Built flow graph: {} nodes, {} edges",
        builder.graph.nodes.len(),
        builder.graph.edges.len()
    );
    builder.graph
}

struct GraphBuilder<'u> {
    unit: &'u CompilationUnit,
    graph: FlowGraph,
    node_ids: HashSet<String>,
    edge_ids: HashSet<String>,
    functions: Vec<FunctionSite>,
    /// (file, byte offset of the definition) -> index into `functions`
    by_site: HashMap<(String, usize), usize>,
}

impl<'u> GraphBuilder<'u> {
    fn new(unit: &'u CompilationUnit) -> Self {
        Self {
            unit,
            graph: FlowGraph::default(),
            node_ids: HashSet::new(),
            edge_ids: HashSet::new(),
            functions: Vec::new(),
            by_site: HashMap::new(),
        }
    }

    fn add_node(&mut self, node: GraphNode) {
        if self.node_ids.insert(node.id.clone()) {
            self.graph.nodes.push(node);
        }
    }

    fn add_edge(&mut self, edge: GraphEdge) {
        if self.edge_ids.insert(edge.id.clone()) {
            self.graph.edges.push(edge);
        }
    }

    fn collect_functions(&mut self, ast: &Ast, node: &AstNode, scope: &mut Vec<String>) {
        let mut pushed = false;
        match node.kind {
            AstKind::ScopeDefinition => {
                if let Some(name) = symbols::scope_name(ast, node) {
                    scope.push(name);
                    pushed = true;
                }
            }
            AstKind::FunctionDefinition => {
                if let Some(name) = symbols::function_name(ast, node) {
                    let separator = ast.language.scope_separator();
                    let qualified = if scope.is_empty() {
                        name.clone()
                    } else {
                        format!("{}{}{}", scope.join(separator), separator, name)
                    };
                    let mut id = format!("{}#{}", ast.path, qualified);
                    if self.node_ids.contains(&id) {
                        // overloads and redefinitions
                        id = format!("{}@{}", id, node.line());
                    }

                    // `Shape::area` defined out of line belongs to scope Shape
                    let mut site_scope = scope.clone();
                    if let Some((owner, _)) = name.rsplit_once("::") {
                        site_scope.extend(owner.split("::").map(str::to_string));
                    }

                    self.add_node(GraphNode {
                        id: id.clone(),
                        kind: NodeKind::Function,
                        label: qualified,
                        file: ast.path.clone(),
                        line: node.line(),
                    });
                    self.by_site.insert((ast.path.clone(), node.span.start), self.functions.len());
                    self.functions.push(FunctionSite {
                        id,
                        name: symbols::simple_name(&name).to_string(),
                        scope: site_scope,
                        file: ast.path.clone(),
                    });
                    scope.push(name);
                    pushed = true;
                }
            }
            _ => {}
        }

        for child in &node.children {
            self.collect_functions(ast, child, scope);
        }
        if pushed {
            scope.pop();
        }
    }

    fn collect_edges(&mut self, ast: &Ast, node: &AstNode, current: Option<usize>) {
        if node.kind == AstKind::FunctionDefinition {
            if let Some(&index) = self.by_site.get(&(ast.path.clone(), node.span.start)) {
                self.variable_flow(ast, node, index);
                for child in &node.children {
                    self.collect_edges(ast, child, Some(index));
                }
                return;
            }
        }

        if node.kind == AstKind::CallExpression {
            if let (Some(caller), Some(callee)) = (current, symbols::callee(ast, node)) {
                if let Some(target) = self.resolve_callee(caller, &callee) {
                    let source_id = self.functions[caller].id.clone();
                    let target_id = self.functions[target].id.clone();
                    self.add_edge(GraphEdge {
                        id: format!("call:{}->{}", source_id, target_id),
                        source_node_id: source_id,
                        target_node_id: target_id,
                        kind: EdgeKind::Call,
                        label: callee.name,
                    });
                }
            }
        }

        for child in &node.children {
            self.collect_edges(ast, child, current);
        }
    }

    /// Pick the definition a call refers to. Qualifier match first, then the
    /// caller's file, then files the caller depends on, then unit order.
    fn resolve_callee(&self, caller: usize, callee: &Callee) -> Option<usize> {
        let candidates: Vec<usize> = self
            .functions
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name == callee.name)
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let caller_site = &self.functions[caller];
        if let Some(qualifier) = callee.qualifier.as_deref() {
            let owner = symbols::simple_name(qualifier);
            let matched = candidates.iter().copied().find(|&i| {
                let f = &self.functions[i];
                match owner {
                    "self" | "this" | "Self" => f.file == caller_site.file && f.scope == caller_site.scope,
                    _ => f.scope.last().map(String::as_str) == Some(owner) || file_stem(&f.file) == owner,
                }
            });
            if matched.is_some() {
                return matched;
            }
        }

        candidates
            .iter()
            .copied()
            .find(|&i| self.functions[i].file == caller_site.file)
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .find(|&i| self.unit.depends_on(&caller_site.file, &self.functions[i].file))
            })
            .or_else(|| {
                self.unit.paths().find_map(|path| {
                    candidates.iter().copied().find(|&i| self.functions[i].file == path)
                })
            })
    }

    /// Intra-function edges: an assignment whose right-hand side reads a
    /// parameter or an earlier assignment target of the same function.
    fn variable_flow(&mut self, ast: &Ast, function: &AstNode, index: usize) {
        let mut tracked: Vec<String> = symbols::parameters(ast, function)
            .into_iter()
            .map(|p| p.name)
            .collect();
        let function_id = self.functions[index].id.clone();

        let mut assignments = Vec::new();
        collect_assignments(function, &mut assignments);

        for assignment in assignments {
            let Some((target, value)) = symbols::assignment_parts(ast, assignment) else {
                continue;
            };
            for source in symbols::read_identifiers(ast, value) {
                if source != target && tracked.iter().any(|t| t == source) {
                    self.add_edge(GraphEdge {
                        id: format!("var:{}:{}->{}", function_id, source, target),
                        source_node_id: function_id.clone(),
                        target_node_id: function_id.clone(),
                        kind: EdgeKind::VariableFlow,
                        label: format!("{} -> {}", source, target),
                    });
                }
            }
            if !tracked.iter().any(|t| t == target) {
                tracked.push(target.to_string());
            }
        }
    }
}

/// Assignments in document order, not descending into nested functions.
fn collect_assignments<'a>(node: &'a AstNode, out: &mut Vec<&'a AstNode>) {
    for child in &node.children {
        if child.kind == AstKind::FunctionDefinition {
            continue;
        }
        if child.kind == AstKind::Assignment {
            out.push(child);
        }
        collect_assignments(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{GrammarRegistry, Language};
    use crate::resolver::{resolve, FileInput};

    fn graph_for(language: Language, primary: FileInput, aux: Vec<FileInput>) -> FlowGraph {
        let unit = resolve(primary, aux, language).unwrap();
        let parsed = GrammarRegistry::new().parse_unit(&unit).unwrap();
        build(&unit, &parsed.asts)
    }

    #[test]
    fn test_cross_file_call_edge() {
        let graph = graph_for(
            Language::Python,
            FileInput::new("main", "import utils\n\ndef main():\n    utils.helper()\n\nmain()\n"),
            vec![FileInput::new("utils", "def helper():\n    return 1\n")],
        );

        assert_eq!(graph.nodes_of_kind(NodeKind::File).count(), 2);
        assert_eq!(graph.nodes_of_kind(NodeKind::Function).count(), 2);
        let calls: Vec<_> = graph.edges_of_kind(EdgeKind::Call).collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].source_node_id, "main#main");
        assert_eq!(calls[0].target_node_id, "utils#helper");
        assert_eq!(calls[0].id, "call:main#main->utils#helper");
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_no_functions_gives_file_nodes_only() {
        let graph = graph_for(
            Language::Python,
            FileInput::new("a.py", "x = 1\nprint(x)\n"),
            vec![FileInput::new("b.py", "y = 2\n")],
        );
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.nodes.iter().all(|n| n.kind == NodeKind::File));
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_scoped_function_ids() {
        let graph = graph_for(
            Language::Java,
            FileInput::new(
                "Main.java",
                "class Main {\n  static int twice(int x) { return x * 2; }\n  public static void main(String[] args) { twice(3); }\n}\n",
            ),
            vec![],
        );
        assert!(graph.node("Main.java#Main.twice").is_some());
        let call = graph.edges_of_kind(EdgeKind::Call).next().unwrap();
        assert_eq!(call.source_node_id, "Main.java#Main.main");
        assert_eq!(call.target_node_id, "Main.java#Main.twice");
    }

    #[test]
    fn test_cpp_out_of_line_method() {
        let graph = graph_for(
            Language::Cpp,
            FileInput::new(
                "shape.cpp",
                "struct Shape { int area(); };\nint Shape::area() { return 4; }\nint main() { Shape s; return s.area(); }\n",
            ),
            vec![],
        );
        assert!(graph.node("shape.cpp#Shape::area").is_some());
        let call = graph.edges_of_kind(EdgeKind::Call).next().unwrap();
        assert_eq!(call.target_node_id, "shape.cpp#Shape::area");
    }

    #[test]
    fn test_variable_flow_edges() {
        let graph = graph_for(
            Language::Python,
            FileInput::new("m.py", "def f(a):\n    b = a + 1\n    c = b * b\n    c = c + 1\n    return c\n"),
            vec![],
        );
        let labels: Vec<_> = graph.edges_of_kind(EdgeKind::VariableFlow).map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["a -> b", "b -> c"]);
        let edge = graph.edges_of_kind(EdgeKind::VariableFlow).next().unwrap();
        assert_eq!(edge.source_node_id, "m.py#f");
        assert_eq!(edge.target_node_id, "m.py#f");
    }

    #[test]
    fn test_top_level_calls_have_no_edge() {
        let graph = graph_for(
            Language::Python,
            FileInput::new("m.py", "def f():\n    pass\n\nf()\nf()\n"),
            vec![],
        );
        assert_eq!(graph.edges_of_kind(EdgeKind::Call).count(), 0);
    }

    #[test]
    fn test_build_is_deterministic() {
        let make = || {
            graph_for(
                Language::Rust,
                FileInput::new(
                    "main.rs",
                    "mod utils;\nfn main() { let a = utils::helper(1); let b = a + 1; show(b); }\nfn show(v: i32) { println!(\"{}\", v); }\n",
                ),
                vec![FileInput::new("utils.rs", "pub fn helper(x: i32) -> i32 { x + 1 }\n")],
            )
        };
        let first = make();
        assert_eq!(first, make());
        let targets: Vec<_> = first.edges_of_kind(EdgeKind::Call).map(|e| e.target_node_id.as_str()).collect();
        assert_eq!(targets, vec!["utils.rs#helper", "main.rs#show"]);
    }

    #[test]
    fn test_validate_reports_dangling_edge() {
        let mut graph = FlowGraph::default();
        graph.edges.push(GraphEdge {
            id: "call:a->b".into(),
            source_node_id: "a".into(),
            target_node_id: "b".into(),
            kind: EdgeKind::Call,
            label: "b".into(),
        });
        assert_eq!(graph.validate().unwrap_err().node, "a");
    }
}
