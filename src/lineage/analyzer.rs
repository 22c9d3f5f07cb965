use crate::lineage::graph::*;
use crate::types::*;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, instrument, warn};

/// Builds the dependency graph from the declarations of every file
#[derive(Debug, Default)]
pub struct LineageAnalyzer;

impl LineageAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Build the complete dependency graph. Never fails: duplicates and
    /// dangling references end up as reportable data on the graph.
    #[instrument(skip_all, fields(declarations = declarations.len()))]
    pub fn build_dependency_graph(&self, declarations: Vec<Declaration>) -> LineageGraph {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();

        // First pass: one node per declared (kind, name)
        info!("Building dependency graph - adding nodes");
        let duplicates = self.add_declared_nodes(&mut graph, &mut node_map, &declarations);

        // Second pass: source edges, creating origin and unresolved nodes on demand
        info!("Building dependency graph - adding edges");
        self.add_source_edges(&mut graph, &mut node_map, &declarations);

        let file_includes = self.file_includes(&graph, &declarations);

        let lineage_graph = LineageGraph::new(graph, node_map, declarations, duplicates, file_includes);

        info!(
            "Dependency graph built successfully with {} nodes and {} edges",
            lineage_graph.node_count(),
            lineage_graph.edge_count()
        );

        lineage_graph
    }

    fn add_declared_nodes(
        &self,
        graph: &mut DiGraph<GraphNode, SourceEdge>,
        node_map: &mut HashMap<NodeKey, NodeIndex>,
        declarations: &[Declaration],
    ) -> Vec<DuplicateDeclaration> {
        let mut occurrences: BTreeMap<NodeKey, Vec<(String, usize)>> = BTreeMap::new();

        for (position, declaration) in declarations.iter().enumerate() {
            let key = NodeKey::new(declaration.kind.into(), declaration.name.clone());
            occurrences
                .entry(key.clone())
                .or_default()
                .push((declaration.file_location.clone(), declaration.line));

            // The first occurrence owns the index slot.
            node_map.entry(key).or_insert_with_key(|key| {
                graph.add_node(GraphNode {
                    key: key.clone(),
                    declaration: Some(position),
                })
            });
        }

        let duplicates: Vec<DuplicateDeclaration> = occurrences
            .into_iter()
            .filter(|(_, locations)| locations.len() > 1)
            .map(|(key, locations)| {
                warn!("{} declared {} times", key, locations.len());
                DuplicateDeclaration { key, locations }
            })
            .collect();

        debug!(
            "Added {} declared nodes ({} duplicate keys)",
            node_map.len(),
            duplicates.len()
        );
        duplicates
    }

    fn add_source_edges(
        &self,
        graph: &mut DiGraph<GraphNode, SourceEdge>,
        node_map: &mut HashMap<NodeKey, NodeIndex>,
        declarations: &[Declaration],
    ) {
        let mut edge_count = 0;

        for (position, declaration) in declarations.iter().enumerate() {
            let key = NodeKey::new(declaration.kind.into(), declaration.name.clone());
            let Some(&from) = node_map.get(&key) else {
                continue;
            };
            // Later duplicates contribute no edges; they are reported instead.
            if graph[from].declaration != Some(position) {
                continue;
            }

            let targets: Vec<(NodeKey, EdgeKind)> = match &declaration.source {
                Source::SqlTable(table) => {
                    vec![(NodeKey::new(NodeKind::Origin, table.clone()), EdgeKind::Table)]
                }
                Source::CustomSql => vec![(
                    NodeKey::new(NodeKind::Origin, CUSTOM_SQL_MARKER),
                    EdgeKind::CustomSql,
                )],
                Source::ExploreSource(name) => {
                    vec![Self::resolve_view_source(node_map, name)]
                }
                Source::Views(names) => names
                    .iter()
                    .map(|name| {
                        let view = NodeKey::new(NodeKind::View, name.clone());
                        if node_map.contains_key(&view) {
                            (view, EdgeKind::Joins)
                        } else {
                            (NodeKey::new(NodeKind::Unresolved, name.clone()), EdgeKind::Unresolved)
                        }
                    })
                    .collect(),
                Source::Unknown => Vec::new(),
            };

            for (ordinal, (target, kind)) in targets.into_iter().enumerate() {
                let to = *node_map.entry(target).or_insert_with_key(|key| {
                    graph.add_node(GraphNode {
                        key: key.clone(),
                        declaration: None,
                    })
                });
                graph.add_edge(from, to, SourceEdge { kind, ordinal });
                edge_count += 1;
            }
        }

        debug!("Added {} edges to dependency graph", edge_count);
    }

    /// An `explore_source` names an explore; fall back to a view of that name
    fn resolve_view_source(node_map: &HashMap<NodeKey, NodeIndex>, name: &str) -> (NodeKey, EdgeKind) {
        let explore = NodeKey::new(NodeKind::Explore, name);
        if node_map.contains_key(&explore) {
            return (explore, EdgeKind::DerivedFromExplore);
        }

        let view = NodeKey::new(NodeKind::View, name);
        if node_map.contains_key(&view) {
            return (view, EdgeKind::DerivedFromView);
        }

        (NodeKey::new(NodeKind::Unresolved, name), EdgeKind::Unresolved)
    }

    /// One-hop file inclusion: a file includes every other file owning a
    /// declaration that one of its declarations references.
    fn file_includes(
        &self,
        graph: &DiGraph<GraphNode, SourceEdge>,
        declarations: &[Declaration],
    ) -> BTreeMap<String, BTreeSet<String>> {
        let mut includes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for edge in graph.raw_edges() {
            let owner = |index: NodeIndex| graph[index].declaration.map(|i| &declarations[i].file_location);
            if let (Some(from_file), Some(to_file)) = (owner(edge.source()), owner(edge.target())) {
                if from_file != to_file {
                    includes
                        .entry(from_file.clone())
                        .or_default()
                        .insert(to_file.clone());
                }
            }
        }

        includes
    }
}
