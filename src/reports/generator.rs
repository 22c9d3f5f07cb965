use crate::diagnostics::{count_by_code, Diagnostic, DiagnosticCode};
use crate::error::Result;
use crate::lineage::{CyclePolicy, GraphStatistics, GraphTraversal, LineageGraph, NodeKind};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRow {
    pub view_name: String,
    pub source_type: SourceType,
    /// Table name, explore name or `custom_sql_query`; empty when unknown
    pub source_name: String,
    pub file_location: String,
    pub line: usize,
    pub misplaced: bool,
    pub flags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploreRow {
    pub explore_name: String,
    pub file_location: String,
    pub line: usize,
    /// Joined view names, `|`-separated
    pub view_sources: String,
    pub is_endpoint: bool,
    pub misplaced: bool,
    pub flags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploreDerivedViewRow {
    pub view_name: String,
    pub view_file_location: String,
    pub explore_name: String,
    /// Empty when no explore of that name is declared
    pub explore_file_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeRow {
    pub file_location: String,
    /// Files this one depends on, `|`-separated
    pub includes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSummary {
    pub root: String,
    pub nodes: usize,
    pub depth: usize,
    pub circular_references: usize,
    /// SHA-256 of the tree's compact JSON
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub cycle_policy: CyclePolicy,
    pub statistics: GraphStatistics,
    pub diagnostics: BTreeMap<DiagnosticCode, usize>,
    pub trees: Vec<TreeSummary>,
}

/// Everything one analysis run produces
#[derive(Debug, Clone)]
pub struct LineageReport {
    pub generated_at: DateTime<Utc>,
    pub trees: Vec<(String, LineageNode)>,
    pub views: Vec<ViewRow>,
    pub explores: Vec<ExploreRow>,
    pub explore_derived_views: Vec<ExploreDerivedViewRow>,
    pub view_includes: Vec<IncludeRow>,
    pub model_includes: Vec<IncludeRow>,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: RunSummary,
}

/// Resolves the requested roots and flattens the graph into report tables
#[derive(Debug, Clone, Default)]
pub struct ReportGenerator {
    cycle_policy: CyclePolicy,
    extra_roots: Vec<String>,
    only_roots: Vec<String>,
}

impl ReportGenerator {
    pub fn new(cycle_policy: CyclePolicy) -> Self {
        Self {
            cycle_policy,
            ..Self::default()
        }
    }

    /// Roots resolved in addition to the endpoint explores
    pub fn with_extra_roots(mut self, extra_roots: Vec<String>) -> Self {
        self.extra_roots = extra_roots;
        self
    }

    /// Resolve only these roots; each must name an explore or view
    pub fn with_only_roots(mut self, roots: Vec<String>) -> Self {
        self.only_roots = roots;
        self
    }

    #[instrument(skip_all, fields(policy = %self.cycle_policy))]
    pub fn generate(&self, graph: &LineageGraph) -> Result<LineageReport> {
        let traversal = GraphTraversal::new(graph, self.cycle_policy);

        let trees = if self.only_roots.is_empty() {
            traversal.resolve_all(&traversal.roots(&self.extra_roots))
        } else {
            self.only_roots
                .iter()
                .map(|name| {
                    let tree = traversal.resolve_named(name)?;
                    Ok((tree.name.clone(), tree))
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut diagnostics = graph.diagnostics();
        diagnostics.extend(circular_diagnostics(&trees));

        let summary = RunSummary {
            generated_at: Utc::now(),
            cycle_policy: self.cycle_policy,
            statistics: graph.get_statistics(),
            diagnostics: count_by_code(&diagnostics).into_iter().collect(),
            trees: trees
                .iter()
                .map(|(root, tree)| summarize_tree(root, tree))
                .collect(),
        };

        let (view_includes, model_includes) = include_rows(graph);
        let report = LineageReport {
            generated_at: summary.generated_at,
            views: view_rows(graph),
            explores: explore_rows(graph),
            explore_derived_views: explore_derived_view_rows(graph),
            view_includes,
            model_includes,
            trees,
            diagnostics,
            summary,
        };

        info!(
            "Generated report with {} trees, {} views, {} explores and {} diagnostics",
            report.trees.len(),
            report.views.len(),
            report.explores.len(),
            report.diagnostics.len()
        );

        Ok(report)
    }
}

fn flags_column(declaration: &Declaration) -> String {
    declaration
        .flags
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn view_rows(graph: &LineageGraph) -> Vec<ViewRow> {
    let mut rows: Vec<ViewRow> = graph
        .declarations()
        .iter()
        .filter(|d| d.kind == DeclarationKind::View)
        .map(|d| ViewRow {
            view_name: d.name.clone(),
            source_type: d.source_type(),
            source_name: match &d.source {
                Source::ExploreSource(name) => name.clone(),
                Source::SqlTable(table) => table.clone(),
                Source::CustomSql => CUSTOM_SQL_MARKER.to_string(),
                Source::Views(names) => names.iter().cloned().collect::<Vec<_>>().join("|"),
                Source::Unknown => String::new(),
            },
            file_location: d.file_location.clone(),
            line: d.line,
            misplaced: d.misplaced,
            flags: flags_column(d),
        })
        .collect();

    rows.sort_by(|a, b| {
        (a.source_type, &a.view_name, &a.file_location, a.line)
            .cmp(&(b.source_type, &b.view_name, &b.file_location, b.line))
    });
    rows
}

fn explore_rows(graph: &LineageGraph) -> Vec<ExploreRow> {
    let mut rows: Vec<ExploreRow> = graph
        .declarations()
        .iter()
        .filter(|d| d.kind == DeclarationKind::Explore)
        .map(|d| ExploreRow {
            explore_name: d.name.clone(),
            file_location: d.file_location.clone(),
            line: d.line,
            view_sources: d.source_refs().join("|"),
            is_endpoint: graph
                .lookup(NodeKind::Explore, &d.name)
                .map(|index| graph.is_endpoint(index))
                .unwrap_or(false),
            misplaced: d.misplaced,
            flags: flags_column(d),
        })
        .collect();

    rows.sort_by(|a, b| {
        (&a.explore_name, &a.file_location, a.line).cmp(&(&b.explore_name, &b.file_location, b.line))
    });
    rows
}

fn explore_derived_view_rows(graph: &LineageGraph) -> Vec<ExploreDerivedViewRow> {
    let mut rows: Vec<ExploreDerivedViewRow> = graph
        .declarations()
        .iter()
        .filter(|d| d.kind == DeclarationKind::View)
        .filter_map(|d| match &d.source {
            Source::ExploreSource(explore) => Some(ExploreDerivedViewRow {
                view_name: d.name.clone(),
                view_file_location: d.file_location.clone(),
                explore_name: explore.clone(),
                explore_file_location: graph
                    .lookup(NodeKind::Explore, explore)
                    .and_then(|index| graph.declaration(index))
                    .map(|explore| explore.file_location.clone())
                    .unwrap_or_default(),
            }),
            _ => None,
        })
        .collect();

    rows.sort_by(|a, b| {
        (&a.view_name, &a.view_file_location).cmp(&(&b.view_name, &b.view_file_location))
    });
    rows
}

/// File inclusion split by the including file's kind
fn include_rows(graph: &LineageGraph) -> (Vec<IncludeRow>, Vec<IncludeRow>) {
    let mut view_includes = Vec::new();
    let mut model_includes = Vec::new();

    for (file, includes) in graph.file_includes() {
        let row = IncludeRow {
            file_location: file.clone(),
            includes: includes.iter().cloned().collect::<Vec<_>>().join("|"),
        };
        match FileKind::from_file_name(file) {
            Some(FileKind::ViewFile) => view_includes.push(row),
            Some(FileKind::ModelFile) => model_includes.push(row),
            None => {}
        }
    }

    (view_includes, model_includes)
}

/// One diagnostic per distinct repeated name per tree
fn circular_diagnostics(trees: &[(String, LineageNode)]) -> Vec<Diagnostic> {
    trees
        .iter()
        .flat_map(|(root, tree)| {
            let repeated: BTreeSet<&str> = tree
                .walk()
                .into_iter()
                .filter(|node| node.kind == LineageNodeKind::CircularReference)
                .map(|node| node.name.as_str())
                .collect();
            repeated.into_iter().map(move |name| {
                Diagnostic::new(
                    DiagnosticCode::CircularReference,
                    root.clone(),
                    format!("lineage path revisits '{}'", name),
                )
            })
        })
        .collect()
}

pub fn fingerprint(tree: &LineageNode) -> String {
    let json = serde_json::to_vec(tree).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

fn summarize_tree(root: &str, tree: &LineageNode) -> TreeSummary {
    TreeSummary {
        root: root.to_string(),
        nodes: tree.node_count(),
        depth: tree.depth(),
        circular_references: tree.count_kind(LineageNodeKind::CircularReference),
        fingerprint: fingerprint(tree),
    }
}

/// Index of a root in the report's tree list
pub fn tree_index(report: &LineageReport, root: &str) -> Option<usize> {
    let root = normalize_name(root);
    report.trees.iter().position(|(name, _)| *name == root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineageError;
    use crate::extract::extract_declarations;
    use crate::lineage::LineageAnalyzer;
    use pretty_assertions::assert_eq;

    fn build(files: &[(&str, FileKind, &str)]) -> LineageGraph {
        let declarations = files
            .iter()
            .flat_map(|(name, kind, text)| extract_declarations(text, name, *kind))
            .collect();
        LineageAnalyzer::new().build_dependency_graph(declarations)
    }

    fn shop() -> LineageGraph {
        build(&[
            (
                "orders.view.lkml",
                FileKind::ViewFile,
                "view: orders { sql_table_name: db.orders ;; }\nview: users { derived_table: { sql: SELECT 1 ;; } }",
            ),
            (
                "facts.view.lkml",
                FileKind::ViewFile,
                "view: order_facts { derived_table: { explore_source: orders {} } }",
            ),
            (
                "shop.model.lkml",
                FileKind::ModelFile,
                "explore: orders { join: users {} }\nexplore: facts { from: order_facts }",
            ),
        ])
    }

    #[test]
    fn test_report_tables() {
        let graph = shop();
        let report = ReportGenerator::new(CyclePolicy::NodeRepeat).generate(&graph).unwrap();

        let views: Vec<(&str, SourceType, &str)> = report
            .views
            .iter()
            .map(|row| (row.view_name.as_str(), row.source_type, row.source_name.as_str()))
            .collect();
        assert_eq!(
            views,
            vec![
                ("order_facts", SourceType::DerivedFromExplore, "orders"),
                ("users", SourceType::DerivedFromSql, CUSTOM_SQL_MARKER),
                ("orders", SourceType::DerivedFromSqlTable, "db.orders"),
            ]
        );

        let explores: Vec<(&str, bool, &str)> = report
            .explores
            .iter()
            .map(|row| (row.explore_name.as_str(), row.is_endpoint, row.view_sources.as_str()))
            .collect();
        assert_eq!(explores, vec![("facts", true, "order_facts"), ("orders", false, "users")]);

        assert_eq!(
            report.explore_derived_views,
            vec![ExploreDerivedViewRow {
                view_name: "order_facts".to_string(),
                view_file_location: "facts.view.lkml".to_string(),
                explore_name: "orders".to_string(),
                explore_file_location: "shop.model.lkml".to_string(),
            }]
        );

        assert_eq!(report.view_includes.len(), 1);
        assert_eq!(report.view_includes[0].includes, "shop.model.lkml");
        assert_eq!(report.model_includes[0].file_location, "shop.model.lkml");
        assert_eq!(report.model_includes[0].includes, "facts.view.lkml|orders.view.lkml");
    }

    #[test]
    fn test_trees_and_summary() {
        let graph = shop();
        let report = ReportGenerator::new(CyclePolicy::NodeRepeat)
            .with_extra_roots(vec!["orders".to_string()])
            .generate(&graph)
            .unwrap();

        let roots: Vec<&str> = report.trees.iter().map(|(root, _)| root.as_str()).collect();
        assert_eq!(roots, vec!["facts", "orders"]);
        assert_eq!(report.summary.trees.len(), 2);
        assert_eq!(report.summary.trees[0].fingerprint.len(), 64);
        assert_eq!(report.summary.trees[0].fingerprint, fingerprint(&report.trees[0].1));
        assert_eq!(tree_index(&report, "Orders"), Some(1));
    }

    #[test]
    fn test_only_roots() {
        let graph = shop();
        let report = ReportGenerator::new(CyclePolicy::NodeRepeat)
            .with_only_roots(vec!["order_facts".to_string()])
            .generate(&graph)
            .unwrap();
        assert_eq!(report.trees.len(), 1);
        assert_eq!(report.trees[0].1.kind, LineageNodeKind::View);

        let missing = ReportGenerator::new(CyclePolicy::NodeRepeat)
            .with_only_roots(vec!["ghost".to_string()])
            .generate(&graph);
        assert!(matches!(missing, Err(LineageError::RootNotFound(_))));
    }

    #[test]
    fn test_circular_diagnostics() {
        let graph = build(&[
            (
                "a.view.lkml",
                FileKind::ViewFile,
                "view: view_a { derived_table: { explore_source: explore_b {} } }",
            ),
            ("b.model.lkml", FileKind::ModelFile, "explore: explore_b { from: view_a }"),
        ]);

        let report = ReportGenerator::new(CyclePolicy::NodeRepeat)
            .with_only_roots(vec!["explore_b".to_string()])
            .generate(&graph)
            .unwrap();

        let circular: Vec<&Diagnostic> = report
            .diagnostics
            .iter()
            .filter(|d| d.code == DiagnosticCode::CircularReference)
            .collect();
        assert_eq!(circular.len(), 1);
        assert_eq!(circular[0].subject, "explore_b");
        assert_eq!(report.summary.diagnostics.get(&DiagnosticCode::CircularReference), Some(&1));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let tree = LineageNode::origin("db.orders");
        assert_eq!(fingerprint(&tree), fingerprint(&tree.clone()));
        assert_ne!(fingerprint(&tree), fingerprint(&LineageNode::origin("db.users")));
    }
}
