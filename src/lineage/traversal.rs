//! Cycle-safe lineage resolution.
//!
//! Resolution is a depth-first walk from a root. The record of what the
//! current path has visited is an immutable value handed to each child call,
//! so sibling branches never see each other's visits.

use crate::error::{LineageError, Result};
use crate::lineage::graph::{EdgeKind, LineageGraph, NodeKind};
use crate::types::*;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;
use std::str::FromStr;
use tracing::{debug, instrument, warn};

/// Rule deciding when a path revisits itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CyclePolicy {
    /// Stop on any node already on the current path
    #[default]
    NodeRepeat,
    /// Stop on a repeated directed edge, with the shared-endpoint closure the
    /// legacy tool applied to its visited-edge set
    EdgeClosure,
}

impl CyclePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePolicy::NodeRepeat => "node-repeat",
            CyclePolicy::EdgeClosure => "edge-closure",
        }
    }
}

impl std::fmt::Display for CyclePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CyclePolicy {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "node-repeat" | "node_repeat" | "node" => Ok(CyclePolicy::NodeRepeat),
            "edge-closure" | "edge_closure" | "edge" | "legacy" => Ok(CyclePolicy::EdgeClosure),
            other => Err(LineageError::InvalidConfig(format!(
                "unknown cycle policy '{}'",
                other
            ))),
        }
    }
}

/// What one DFS path has visited so far
pub trait PathGuard: Sized {
    /// Whether following `from -> to` would revisit the path
    fn revisits(&self, from: NodeIndex, to: NodeIndex) -> bool;

    /// A new guard for the child call; `self` is left untouched
    fn extend(&self, graph: &LineageGraph, from: NodeIndex, to: NodeIndex) -> Self;
}

/// Persistent parent-linked path of visited nodes. Extending shares the
/// parent's frames, so siblings branch off the same prefix.
#[derive(Debug, Clone)]
pub struct NodePath {
    head: Rc<Frame>,
}

#[derive(Debug)]
struct Frame {
    node: NodeIndex,
    parent: Option<Rc<Frame>>,
}

impl NodePath {
    pub fn root(node: NodeIndex) -> Self {
        Self {
            head: Rc::new(Frame { node, parent: None }),
        }
    }

    pub fn contains(&self, node: NodeIndex) -> bool {
        let mut frame = Some(&self.head);
        while let Some(current) = frame {
            if current.node == node {
                return true;
            }
            frame = current.parent.as_ref();
        }
        false
    }
}

impl PathGuard for NodePath {
    fn revisits(&self, _from: NodeIndex, to: NodeIndex) -> bool {
        self.contains(to)
    }

    fn extend(&self, _graph: &LineageGraph, _from: NodeIndex, to: NodeIndex) -> Self {
        Self {
            head: Rc::new(Frame {
                node: to,
                parent: Some(Rc::clone(&self.head)),
            }),
        }
    }
}

/// Set of directed edges visited on the path
#[derive(Debug, Clone, Default)]
pub struct EdgePath {
    edges: HashSet<(NodeIndex, NodeIndex)>,
}

impl EdgePath {
    pub fn contains(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// One pass of shared-endpoint inference: for two visited edges sharing an
    /// endpoint whose other endpoints differ in kind, the edge between those
    /// other endpoints is forbidden too.
    fn close(&mut self, graph: &LineageGraph) {
        let differ = |a: NodeIndex, b: NodeIndex| graph.kind(a) != graph.kind(b);
        let mut inferred = Vec::new();

        for &(a, b) in &self.edges {
            for &(c, d) in &self.edges {
                if c == a && d != b && differ(d, b) {
                    inferred.push((d, b));
                }
                if c == b && d != a && differ(d, a) {
                    inferred.push((d, a));
                }
                if d == a && c != b && differ(c, b) {
                    inferred.push((c, b));
                }
                if d == b && c != a && differ(c, a) {
                    inferred.push((c, a));
                }
            }
        }

        self.edges.extend(inferred);
    }
}

impl PathGuard for EdgePath {
    fn revisits(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.contains(from, to)
    }

    fn extend(&self, graph: &LineageGraph, from: NodeIndex, to: NodeIndex) -> Self {
        let mut next = self.clone();
        next.edges.insert((from, to));
        next.close(graph);
        next
    }
}

/// Resolves rooted lineage trees over a built graph
pub struct GraphTraversal<'g> {
    graph: &'g LineageGraph,
    policy: CyclePolicy,
}

impl<'g> GraphTraversal<'g> {
    pub fn new(graph: &'g LineageGraph, policy: CyclePolicy) -> Self {
        Self { graph, policy }
    }

    pub fn policy(&self) -> CyclePolicy {
        self.policy
    }

    /// Endpoint explores plus any extra roots, deduplicated, in that order.
    /// Extra roots naming no explore or view are skipped with a warning.
    pub fn roots(&self, extra_roots: &[String]) -> Vec<NodeIndex> {
        let mut roots = self.graph.endpoint_explores();

        for name in extra_roots {
            match self.lookup_root(name) {
                Some(index) if !roots.contains(&index) => roots.push(index),
                Some(_) => debug!("Extra root '{}' is already an endpoint", name),
                None => warn!("Extra root '{}' matches no explore or view; skipping", name),
            }
        }

        roots
    }

    fn lookup_root(&self, name: &str) -> Option<NodeIndex> {
        self.graph
            .lookup(NodeKind::Explore, name)
            .or_else(|| self.graph.lookup(NodeKind::View, name))
    }

    /// Resolve the tree rooted at the explore (or, failing that, view) named `name`
    pub fn resolve_named(&self, name: &str) -> Result<LineageNode> {
        let root = self
            .lookup_root(name)
            .ok_or_else(|| LineageError::RootNotFound(name.to_string()))?;
        Ok(self.resolve(root))
    }

    /// Resolve the tree rooted at a declared node
    #[instrument(skip_all, fields(root = %self.graph.key(root), policy = ?self.policy))]
    pub fn resolve(&self, root: NodeIndex) -> LineageNode {
        let tree = match self.policy {
            CyclePolicy::NodeRepeat => self.walk(root, &NodePath::root(root)),
            CyclePolicy::EdgeClosure => self.walk(root, &EdgePath::default()),
        };

        debug!(
            "Resolved tree with {} nodes, depth {}",
            tree.node_count(),
            tree.depth()
        );
        tree
    }

    /// Resolve every root: `(root name, tree)` pairs in root order
    pub fn resolve_all(&self, roots: &[NodeIndex]) -> Vec<(String, LineageNode)> {
        roots
            .iter()
            .map(|&root| (self.graph.key(root).name.clone(), self.resolve(root)))
            .collect()
    }

    fn walk<P: PathGuard>(&self, index: NodeIndex, path: &P) -> LineageNode {
        let (name, kind) = self.describe(index);
        let children = self
            .child_steps(index)
            .into_iter()
            .map(|step| match step {
                Step::Leaf(leaf) => leaf,
                Step::Follow(next) if path.revisits(index, next) => self.circular(next),
                Step::Follow(next) => self.walk(next, &path.extend(self.graph, index, next)),
            })
            .collect();

        LineageNode::with_children(name, kind, children)
    }

    fn describe(&self, index: NodeIndex) -> (String, LineageNodeKind) {
        let key = self.graph.key(index);
        let kind = match key.kind {
            NodeKind::View => LineageNodeKind::View,
            NodeKind::Explore => LineageNodeKind::Explore,
            NodeKind::Origin => LineageNodeKind::Origin,
            NodeKind::Unresolved => LineageNodeKind::Unresolved,
        };
        (key.name.clone(), kind)
    }

    fn circular(&self, index: NodeIndex) -> LineageNode {
        let name = &self.graph.key(index).name;
        debug!("Circular reference to {}", name);
        LineageNode::leaf(name.clone(), LineageNodeKind::CircularReference)
    }

    /// What a node expands to, before any cycle check
    fn child_steps(&self, index: NodeIndex) -> Vec<Step> {
        let sources = self.graph.sources(index);

        match self.graph.kind(index) {
            NodeKind::Explore => sources
                .into_iter()
                .map(|(target, kind)| match kind {
                    EdgeKind::Joins => Step::Follow(target),
                    _ => Step::Leaf(self.terminal(target)),
                })
                .collect(),
            NodeKind::View => match sources.first() {
                Some(&(target, EdgeKind::DerivedFromExplore | EdgeKind::DerivedFromView)) => {
                    vec![Step::Follow(target)]
                }
                Some(&(target, _)) => vec![Step::Leaf(self.terminal(target))],
                None => vec![Step::Leaf(LineageNode::leaf(
                    UNKNOWN_SOURCE_MARKER,
                    LineageNodeKind::Unresolved,
                ))],
            },
            NodeKind::Origin | NodeKind::Unresolved => Vec::new(),
        }
    }

    /// Leaf for a target that never expands: an origin or a missing name
    fn terminal(&self, target: NodeIndex) -> LineageNode {
        let key = self.graph.key(target);
        match key.kind {
            NodeKind::Origin => LineageNode::origin(key.name.clone()),
            _ => LineageNode::leaf(key.name.clone(), LineageNodeKind::Unresolved),
        }
    }
}

enum Step {
    Leaf(LineageNode),
    Follow(NodeIndex),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_declarations;
    use crate::lineage::analyzer::LineageAnalyzer;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn build(view_text: &str, model_text: &str) -> LineageGraph {
        let mut declarations = extract_declarations(view_text, "test.view.lkml", FileKind::ViewFile);
        declarations.extend(extract_declarations(model_text, "test.model.lkml", FileKind::ModelFile));
        LineageAnalyzer::new().build_dependency_graph(declarations)
    }

    fn node(name: &str, kind: LineageNodeKind, children: Vec<LineageNode>) -> LineageNode {
        LineageNode::with_children(name, kind, children)
    }

    fn both_policies() -> [CyclePolicy; 2] {
        [CyclePolicy::NodeRepeat, CyclePolicy::EdgeClosure]
    }

    #[test]
    fn test_orders_example() {
        let graph = build("view: orders { sql_table_name: db.orders ;; }", "explore: orders {}");

        for policy in both_policies() {
            let tree = GraphTraversal::new(&graph, policy).resolve_named("orders").unwrap();
            assert_eq!(
                tree,
                node(
                    "orders",
                    LineageNodeKind::Explore,
                    vec![node("orders", LineageNodeKind::View, vec![LineageNode::origin("db.orders")])]
                )
            );
        }
    }

    #[test]
    fn test_fan_out_is_not_a_cycle() {
        let graph = build(
            "view: a { sql_table_name: db.a ;; }\nview: b { sql_table_name: db.b ;; }",
            "explore: combined { join: a {} join: b {} }",
        );

        for policy in both_policies() {
            let tree = GraphTraversal::new(&graph, policy).resolve_named("combined").unwrap();
            assert_eq!(
                tree,
                node(
                    "combined",
                    LineageNodeKind::Explore,
                    vec![
                        node("a", LineageNodeKind::View, vec![LineageNode::origin("db.a")]),
                        node("b", LineageNodeKind::View, vec![LineageNode::origin("db.b")]),
                    ]
                )
            );
        }
    }

    #[test]
    fn test_shared_view_in_sibling_branches() {
        // Both branches reach `base`; neither is a cycle.
        let graph = build(
            r#"
view: base { sql_table_name: db.base ;; }
view: left { derived_table: { explore_source: base_explore {} } }
view: right { derived_table: { explore_source: base_explore {} } }
"#,
            "explore: base_explore { from: base }\nexplore: top { join: left {} join: right {} }",
        );

        for policy in both_policies() {
            let tree = GraphTraversal::new(&graph, policy).resolve_named("top").unwrap();
            assert_eq!(tree.count_kind(LineageNodeKind::CircularReference), 0);
            assert_eq!(tree.count_kind(LineageNodeKind::Origin), 2);
        }
    }

    #[test]
    fn test_view_explore_cycle_terminates() {
        let graph = build(
            "view: view_a { derived_table: { explore_source: explore_b {} } }",
            "explore: explore_b { from: view_a }",
        );

        let traversal = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat);
        assert_eq!(
            traversal.resolve_named("explore_b").unwrap(),
            node(
                "explore_b",
                LineageNodeKind::Explore,
                vec![node(
                    "view_a",
                    LineageNodeKind::View,
                    vec![LineageNode::leaf("explore_b", LineageNodeKind::CircularReference)]
                )]
            )
        );

        let view = graph.lookup(NodeKind::View, "view_a").unwrap();
        assert_eq!(
            traversal.resolve(view),
            node(
                "view_a",
                LineageNodeKind::View,
                vec![node(
                    "explore_b",
                    LineageNodeKind::Explore,
                    vec![LineageNode::leaf("view_a", LineageNodeKind::CircularReference)]
                )]
            )
        );
    }

    #[test]
    fn test_edge_closure_cycle_stops_on_repeated_edge() {
        let graph = build(
            "view: view_a { derived_table: { explore_source: explore_b {} } }",
            "explore: explore_b { from: view_a }",
        );

        // The edge explore_b -> view_a is only repeated one level further down.
        let tree = GraphTraversal::new(&graph, CyclePolicy::EdgeClosure)
            .resolve_named("explore_b")
            .unwrap();
        assert_eq!(tree.count_kind(LineageNodeKind::CircularReference), 1);
        assert_eq!(tree.depth(), 4);
        assert_eq!(tree.children[0].children[0].children[0].name, "view_a");
    }

    #[test]
    fn test_origin_view_yields_single_origin_child() {
        let graph = build(
            "view: t { sql_table_name: db.t ;; }\nview: q { derived_table: { sql: SELECT 1 ;; } }",
            "explore: e { join: t {} join: q {} }",
        );

        let traversal = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat);
        for view in ["t", "q"] {
            let index = graph.lookup(NodeKind::View, view).unwrap();
            let tree = traversal.resolve(index);
            assert_eq!(tree.children.len(), 1);
            let origin = &tree.children[0];
            assert_eq!(origin.kind, LineageNodeKind::Origin);
            assert_eq!(origin.children, vec![LineageNode::leaf(SELF_MARKER, LineageNodeKind::SelfMarker)]);
        }

        let q = traversal.resolve(graph.lookup(NodeKind::View, "q").unwrap());
        assert_eq!(q.children[0].name, CUSTOM_SQL_MARKER);
    }

    #[test]
    fn test_unresolved_and_unknown_leaves() {
        let graph = build("view: vague { dimension: id {} }", "explore: e { join: vague {} join: missing {} }");
        let tree = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat)
            .resolve_named("e")
            .unwrap();

        assert_eq!(
            tree,
            node(
                "e",
                LineageNodeKind::Explore,
                vec![
                    LineageNode::leaf("missing", LineageNodeKind::Unresolved),
                    node(
                        "vague",
                        LineageNodeKind::View,
                        vec![LineageNode::leaf(UNKNOWN_SOURCE_MARKER, LineageNodeKind::Unresolved)]
                    ),
                ]
            )
        );
    }

    #[test]
    fn test_view_derived_from_missing_explore() {
        let graph = build("view: v { derived_table: { explore_source: nowhere {} } }", "explore: e { from: v }");
        let tree = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat)
            .resolve_named("e")
            .unwrap();
        assert_eq!(
            tree.children[0].children,
            vec![LineageNode::leaf("nowhere", LineageNodeKind::Unresolved)]
        );
    }

    #[test]
    fn test_self_referencing_view() {
        let graph = build("view: looped { derived_table: { explore_source: looped {} } }", "");
        let view = graph.lookup(NodeKind::View, "looped").unwrap();

        let tree = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat).resolve(view);
        assert_eq!(
            tree,
            node(
                "looped",
                LineageNodeKind::View,
                vec![LineageNode::leaf("looped", LineageNodeKind::CircularReference)]
            )
        );

        let tree = GraphTraversal::new(&graph, CyclePolicy::EdgeClosure).resolve(view);
        assert_eq!(tree.count_kind(LineageNodeKind::CircularReference), 1);
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn test_roots_with_extra_roots() {
        let graph = build(
            "view: o { sql_table_name: db.o ;; }\nview: f { derived_table: { explore_source: orders {} } }",
            "explore: orders { from: o }\nexplore: facts { from: f }",
        );
        let traversal = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat);

        let names = |roots: Vec<NodeIndex>| -> Vec<String> {
            roots.into_iter().map(|r| graph.key(r).name.clone()).collect()
        };

        assert_eq!(names(traversal.roots(&[])), vec!["facts"]);
        assert_eq!(
            names(traversal.roots(&["Orders".to_string(), "facts".to_string(), "ghost".to_string()])),
            vec!["facts", "orders"]
        );
    }

    #[test]
    fn test_resolve_named_missing_root() {
        let graph = build("", "explore: e {}");
        let result = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat).resolve_named("nope");
        assert!(matches!(result, Err(LineageError::RootNotFound(name)) if name == "nope"));
    }

    #[test]
    fn test_edge_closure_infers_mixed_kind_edges() {
        let graph = build(
            "view: w { sql_table_name: t ;; }\nview: v { derived_table: { explore_source: w {} } }",
            "explore: e { join: v {} }",
        );
        let e = graph.lookup(NodeKind::Explore, "e").unwrap();
        let v = graph.lookup(NodeKind::View, "v").unwrap();
        let w = graph.lookup(NodeKind::View, "w").unwrap();

        let path = EdgePath::default().extend(&graph, e, v);
        assert_eq!(path.len(), 1);

        // (e -> v) and (v -> w) share v; e and w differ in kind.
        let path = path.extend(&graph, v, w);
        assert_eq!(path.len(), 4);
        assert!(path.revisits(w, e));
        assert!(path.revisits(e, w));
        assert!(!path.revisits(w, v));
    }

    #[test]
    fn test_edge_closure_skips_same_kind_endpoints() {
        let graph = build(
            "view: v { derived_table: { explore_source: x {} } }",
            "explore: e { join: v {} }\nexplore: x { join: v {} }",
        );
        let e = graph.lookup(NodeKind::Explore, "e").unwrap();
        let v = graph.lookup(NodeKind::View, "v").unwrap();
        let x = graph.lookup(NodeKind::Explore, "x").unwrap();

        let path = EdgePath::default().extend(&graph, e, v).extend(&graph, v, x);
        assert_eq!(path.len(), 2);
        assert!(!path.revisits(x, e));
    }

    #[test]
    fn test_cycle_policy_from_str() {
        assert_eq!("node-repeat".parse::<CyclePolicy>().unwrap(), CyclePolicy::NodeRepeat);
        assert_eq!("legacy".parse::<CyclePolicy>().unwrap(), CyclePolicy::EdgeClosure);
        assert!("sideways".parse::<CyclePolicy>().is_err());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let views = "view: a { derived_table: { explore_source: e2 {} } }\nview: b { sql_table_name: db.b ;; }";
        let models = "explore: e1 { join: a {} join: b {} }\nexplore: e2 { join: b {} join: a {} }";

        let render = || {
            let graph = build(views, models);
            let traversal = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat);
            let trees = traversal.resolve_all(&traversal.roots(&["e2".to_string()]));
            let diagnostics = graph.diagnostics();
            (serde_json::to_string(&trees).unwrap(), diagnostics)
        };

        assert_eq!(render(), render());
    }

    /// A random corpus: each view gets one source kind, each explore a handful of joins.
    /// Names are drawn from a small pool so cycles and dangling references are common.
    fn corpus() -> impl Strategy<Value = (String, String)> {
        let view_source = prop_oneof![
            Just(None::<String>),
            Just(Some("table".to_string())),
            Just(Some("sql".to_string())),
            (0usize..5).prop_map(|i| Some(format!("e{}", i))),
            (0usize..5).prop_map(|i| Some(format!("v{}", i))),
        ];
        let views = prop::collection::vec(view_source, 1..6);
        let explores = prop::collection::vec(prop::collection::vec(0usize..6, 0..4), 1..5);

        (views, explores).prop_map(|(views, explores)| {
            let view_text = views
                .iter()
                .enumerate()
                .map(|(i, source)| match source.as_deref() {
                    None => format!("view: v{} {{}}\n", i),
                    Some("table") => format!("view: v{} {{ sql_table_name: db.v{} ;; }}\n", i, i),
                    Some("sql") => format!("view: v{} {{ derived_table: {{ sql: SELECT 1 ;; }} }}\n", i),
                    Some(target) => format!(
                        "view: v{} {{ derived_table: {{ explore_source: {} {{}} }} }}\n",
                        i, target
                    ),
                })
                .collect::<String>();
            let model_text = explores
                .iter()
                .enumerate()
                .map(|(i, joins)| {
                    let joins: String = joins.iter().map(|j| format!("join: v{} {{}} ", j)).collect();
                    format!("explore: e{} {{ {} }}\n", i, joins)
                })
                .collect::<String>();
            (view_text, model_text)
        })
    }

    proptest! {
        #[test]
        fn test_node_repeat_depth_is_bounded((views, models) in corpus()) {
            let graph = build(&views, &models);
            let traversal = GraphTraversal::new(&graph, CyclePolicy::NodeRepeat);

            for root in graph.explores().into_iter().chain(graph.views()) {
                let tree = traversal.resolve(root);
                let reachable = graph.reachable_from(root).len();
                prop_assert!(tree.depth() <= 2 * reachable + 1,
                    "depth {} exceeds bound for {} reachable nodes", tree.depth(), reachable);
            }
        }

        #[test]
        fn test_edge_closure_terminates((views, models) in corpus()) {
            let graph = build(&views, &models);
            let traversal = GraphTraversal::new(&graph, CyclePolicy::EdgeClosure);

            for root in graph.explores().into_iter().chain(graph.views()) {
                let tree = traversal.resolve(root);
                prop_assert!(tree.depth() <= graph.edge_count() + 3);
            }
        }

        #[test]
        fn test_resolution_is_deterministic((views, models) in corpus()) {
            let first = build(&views, &models);
            let second = build(&views, &models);
            for policy in both_policies() {
                let a = GraphTraversal::new(&first, policy);
                let b = GraphTraversal::new(&second, policy);
                prop_assert_eq!(
                    serde_json::to_string(&a.resolve_all(&a.roots(&[]))).unwrap(),
                    serde_json::to_string(&b.resolve_all(&b.roots(&[]))).unwrap()
                );
            }
        }
    }
}
