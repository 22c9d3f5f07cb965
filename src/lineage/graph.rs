use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::types::{normalize_name, Declaration, DeclarationKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    View,
    Explore,
    Origin,
    Unresolved,
}

impl From<DeclarationKind> for NodeKind {
    fn from(kind: DeclarationKind) -> Self {
        match kind {
            DeclarationKind::View => NodeKind::View,
            DeclarationKind::Explore => NodeKind::Explore,
        }
    }
}

/// Index key of a graph node. Declared names are stored normalized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub kind: NodeKind,
    pub name: String,
}

impl NodeKey {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub key: NodeKey,
    /// Index into the graph's declaration list, for declared nodes
    pub declaration: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// View built on a physical table
    Table,
    /// View built on a custom SQL query
    CustomSql,
    /// View built on an explore
    DerivedFromExplore,
    /// View whose `explore_source` names another view
    DerivedFromView,
    /// Explore joining a view
    Joins,
    /// Reference with no matching declaration
    Unresolved,
}

#[derive(Debug, Clone, Copy)]
pub struct SourceEdge {
    pub kind: EdgeKind,
    /// Position among the source node's references
    pub ordinal: usize,
}

/// A `(kind, name)` pair declared more than once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateDeclaration {
    pub key: NodeKey,
    /// Every occurrence as `(file, line)`, in input order
    pub locations: Vec<(String, usize)>,
}

/// Immutable dependency graph over views, explores and their origins
#[derive(Debug)]
pub struct LineageGraph {
    graph: DiGraph<GraphNode, SourceEdge>,
    node_map: HashMap<NodeKey, NodeIndex>,
    declarations: Vec<Declaration>,
    duplicates: Vec<DuplicateDeclaration>,
    file_includes: BTreeMap<String, BTreeSet<String>>,
}

impl LineageGraph {
    pub(crate) fn new(
        graph: DiGraph<GraphNode, SourceEdge>,
        node_map: HashMap<NodeKey, NodeIndex>,
        declarations: Vec<Declaration>,
        duplicates: Vec<DuplicateDeclaration>,
        file_includes: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        Self {
            graph,
            node_map,
            declarations,
            duplicates,
            file_includes,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Look up a node by kind and (unnormalized) name
    pub fn lookup(&self, kind: NodeKind, name: &str) -> Option<NodeIndex> {
        let name = match kind {
            NodeKind::Origin => name.to_string(),
            _ => normalize_name(name),
        };
        self.node_map.get(&NodeKey::new(kind, name)).copied()
    }

    pub fn key(&self, index: NodeIndex) -> &NodeKey {
        &self.graph[index].key
    }

    pub fn kind(&self, index: NodeIndex) -> NodeKind {
        self.graph[index].key.kind
    }

    /// The declaration owning a declared node's index slot
    pub fn declaration(&self, index: NodeIndex) -> Option<&Declaration> {
        self.graph[index]
            .declaration
            .and_then(|i| self.declarations.get(i))
    }

    /// All declarations, duplicates included, in input order
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn duplicates(&self) -> &[DuplicateDeclaration] {
        &self.duplicates
    }

    /// For each file, the other files owning a node it references
    pub fn file_includes(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.file_includes
    }

    /// Outgoing source edges of a node, in reference order
    pub fn sources(&self, index: NodeIndex) -> Vec<(NodeIndex, EdgeKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (edge.weight().ordinal, edge.target(), edge.weight().kind))
            .collect();
        edges.sort_by_key(|(ordinal, _, _)| *ordinal);
        edges
            .into_iter()
            .map(|(_, target, kind)| (target, kind))
            .collect()
    }

    /// Nodes that use this node as a source
    pub fn consumers(&self, index: NodeIndex) -> Vec<(NodeIndex, EdgeKind)> {
        let mut consumers: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| (edge.source(), edge.weight().kind))
            .collect();
        consumers.sort_by(|a, b| self.key(a.0).cmp(self.key(b.0)));
        consumers
    }

    /// Explore nodes in name order
    pub fn explores(&self) -> Vec<NodeIndex> {
        self.nodes_of_kind(NodeKind::Explore)
    }

    pub fn views(&self) -> Vec<NodeIndex> {
        self.nodes_of_kind(NodeKind::View)
    }

    fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&index| self.kind(index) == kind)
            .collect();
        nodes.sort_by(|a, b| self.key(*a).cmp(self.key(*b)));
        nodes
    }

    /// True when no view derives from this explore
    pub fn is_endpoint(&self, index: NodeIndex) -> bool {
        self.kind(index) == NodeKind::Explore
            && !self
                .graph
                .edges_directed(index, Direction::Incoming)
                .any(|edge| edge.weight().kind == EdgeKind::DerivedFromExplore)
    }

    /// Explores never consumed as a view's source, in name order
    pub fn endpoint_explores(&self) -> Vec<NodeIndex> {
        self.explores()
            .into_iter()
            .filter(|&index| self.is_endpoint(index))
            .collect()
    }

    /// Every node reachable from `start` along source edges, `start` included
    pub fn reachable_from(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        queue.push_back(start);
        visited.insert(start);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }

        debug!("{} nodes reachable from {}", visited.len(), self.key(start));
        visited
    }

    /// `(referencing node, missing name)` for every unresolved edge
    pub fn unresolved_references(&self) -> Vec<(NodeIndex, String)> {
        let mut references: Vec<(NodeIndex, String)> = self
            .graph
            .edge_indices()
            .filter_map(|edge| {
                let (from, to) = self.graph.edge_endpoints(edge)?;
                (self.graph[edge].kind == EdgeKind::Unresolved)
                    .then(|| (from, self.key(to).name.clone()))
            })
            .collect();
        references.sort_by(|a, b| (self.key(a.0), &a.1).cmp(&(self.key(b.0), &b.1)));
        references
    }

    /// Flags recorded on declarations plus graph-level findings
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics: Vec<Diagnostic> = self
            .declarations
            .iter()
            .flat_map(Diagnostic::from_declaration)
            .collect();

        for duplicate in &self.duplicates {
            let files: Vec<String> = duplicate
                .locations
                .iter()
                .map(|(file, line)| format!("{}:{}", file, line))
                .collect();
            for (file, line) in &duplicate.locations {
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticCode::DuplicateDeclaration,
                        duplicate.key.to_string(),
                        format!("declared {} times: {}", files.len(), files.join(", ")),
                    )
                    .at(file, *line),
                );
            }
        }

        for (from, missing) in self.unresolved_references() {
            let mut diagnostic = Diagnostic::new(
                DiagnosticCode::UnresolvedSource,
                self.key(from).to_string(),
                format!("references undeclared '{}'", missing),
            );
            if let Some(declaration) = self.declaration(from) {
                diagnostic = diagnostic.at(&declaration.file_location, declaration.line);
            }
            diagnostics.push(diagnostic);
        }

        diagnostics
    }

    pub fn get_statistics(&self) -> GraphStatistics {
        let count = |kind| {
            self.graph
                .node_indices()
                .filter(|&index| self.kind(index) == kind)
                .count()
        };

        GraphStatistics {
            total_nodes: self.node_count(),
            total_edges: self.edge_count(),
            views: count(NodeKind::View),
            explores: count(NodeKind::Explore),
            origins: count(NodeKind::Origin),
            unresolved: count(NodeKind::Unresolved),
            endpoint_explores: self.endpoint_explores().len(),
            duplicates: self.duplicates.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub views: usize,
    pub explores: usize,
    pub origins: usize,
    pub unresolved: usize,
    pub endpoint_explores: usize,
    pub duplicates: usize,
}
