//! Core types shared by the extractor, the graph builder and the resolver

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Marker used as the origin name of views built from a custom SQL query
pub const CUSTOM_SQL_MARKER: &str = "custom_sql_query";

/// Name of the leaf closing every origin branch in a lineage tree
pub const SELF_MARKER: &str = "self";

/// Name given to the leaf under a view whose source could not be determined
pub const UNKNOWN_SOURCE_MARKER: &str = "unknown_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationKind {
    View,
    Explore,
}

impl DeclarationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationKind::View => "view",
            DeclarationKind::Explore => "explore",
        }
    }

    /// The file kind a declaration of this kind is expected to live in
    pub fn home_file_kind(&self) -> FileKind {
        match self {
            DeclarationKind::View => FileKind::ViewFile,
            DeclarationKind::Explore => FileKind::ModelFile,
        }
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileKind {
    ViewFile,
    ModelFile,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::ViewFile => "view",
            FileKind::ModelFile => "model",
        }
    }

    /// Classify a file by its conventional suffix (`.view.lkml` / `.model.lkml`)
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        if file_name.ends_with(".view.lkml") {
            Some(FileKind::ViewFile)
        } else if file_name.ends_with(".model.lkml") {
            Some(FileKind::ModelFile)
        } else {
            None
        }
    }
}

/// Flat classification of a declaration's source, as exported in tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    DerivedFromExplore,
    DerivedFromSql,
    DerivedFromSqlTable,
    Views,
    Unknown,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::DerivedFromExplore => "derived_from_explore",
            SourceType::DerivedFromSql => "derived_from_sql",
            SourceType::DerivedFromSqlTable => "derived_from_sql_table",
            SourceType::Views => "views",
            SourceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a declaration's rows come from. Exactly one variant applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// `derived_table: { explore_source: <name> { ... } }`
    ExploreSource(String),
    /// `derived_table: { sql: ... ;; }`
    CustomSql,
    /// `sql_table_name: <table> ;;`
    SqlTable(String),
    /// Views joined by an explore
    Views(BTreeSet<String>),
    Unknown,
}

impl Source {
    pub fn source_type(&self) -> SourceType {
        match self {
            Source::ExploreSource(_) => SourceType::DerivedFromExplore,
            Source::CustomSql => SourceType::DerivedFromSql,
            Source::SqlTable(_) => SourceType::DerivedFromSqlTable,
            Source::Views(_) => SourceType::Views,
            Source::Unknown => SourceType::Unknown,
        }
    }

    /// Name the source points at; the marker for custom queries
    pub fn target(&self) -> Option<&str> {
        match self {
            Source::ExploreSource(name) | Source::SqlTable(name) => Some(name.as_str()),
            Source::CustomSql => Some(CUSTOM_SQL_MARKER),
            Source::Views(_) | Source::Unknown => None,
        }
    }

    /// True for table and custom query sources, which end a lineage branch
    pub fn is_origin(&self) -> bool {
        matches!(self, Source::CustomSql | Source::SqlTable(_))
    }
}

/// Problems recovered while extracting a single declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum DeclarationFlag {
    /// A view in a model file or an explore in a view file
    Misplaced { found_in: FileKind },
    /// More than one view source pattern matched
    AmbiguousSourceType {
        matched: Vec<SourceType>,
        chosen: SourceType,
    },
    /// Several sources of the same kind name different targets
    ConflictingSources {
        source_type: SourceType,
        targets: Vec<String>,
    },
    /// The declaration's block was never closed
    Unterminated,
    /// A header with no `{ ... }` body
    MissingBody,
    /// A parameter value with no closing `;;`
    UnterminatedValue { key: String },
    /// `sql_table_name` holding something other than a table name
    InvalidTableName { value: String },
}

impl fmt::Display for DeclarationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationFlag::Misplaced { found_in } => {
                write!(f, "declared in a {} file", found_in.as_str())
            }
            DeclarationFlag::AmbiguousSourceType { matched, chosen } => {
                let matched: Vec<&str> = matched.iter().map(SourceType::as_str).collect();
                write!(f, "matched sources [{}], chose {}", matched.join(", "), chosen)
            }
            DeclarationFlag::ConflictingSources { source_type, targets } => {
                write!(f, "conflicting {} targets [{}]", source_type, targets.join(", "))
            }
            DeclarationFlag::Unterminated => f.write_str("block is never closed"),
            DeclarationFlag::MissingBody => f.write_str("header has no body"),
            DeclarationFlag::UnterminatedValue { key } => write!(f, "{} is missing ;;", key),
            DeclarationFlag::InvalidTableName { value } => write!(f, "invalid table name '{}'", value),
        }
    }
}

/// A view or explore found in one file. Never mutated after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub name: String,
    pub file_location: String,
    pub file_kind: FileKind,
    pub line: usize,
    pub source: Source,
    pub misplaced: bool,
    pub flags: Vec<DeclarationFlag>,
}

impl Declaration {
    pub fn source_type(&self) -> SourceType {
        self.source.source_type()
    }

    /// The referenced names, in set order. A view has at most one, the table
    /// or explore it reads from; custom queries and unknown sources have none.
    pub fn source_refs(&self) -> Vec<&str> {
        match &self.source {
            Source::ExploreSource(name) | Source::SqlTable(name) => vec![name.as_str()],
            Source::Views(names) => names.iter().map(String::as_str).collect(),
            Source::CustomSql | Source::Unknown => Vec::new(),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.flags
            .iter()
            .any(|flag| {
                matches!(
                    flag,
                    DeclarationFlag::AmbiguousSourceType { .. } | DeclarationFlag::ConflictingSources { .. }
                )
            })
    }

    pub fn is_malformed(&self) -> bool {
        self.flags
            .iter()
            .any(|flag| {
                matches!(
                    flag,
                    DeclarationFlag::Unterminated
                        | DeclarationFlag::MissingBody
                        | DeclarationFlag::UnterminatedValue { .. }
                        | DeclarationFlag::InvalidTableName { .. }
                )
            })
    }
}

/// Normalize a declaration or reference name for keying.
///
/// Names compare case-insensitively and ignore any whitespace.
pub fn normalize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineageNodeKind {
    #[serde(rename = "view")]
    View,
    #[serde(rename = "explore")]
    Explore,
    #[serde(rename = "sql")]
    Origin,
    #[serde(rename = "self")]
    SelfMarker,
    #[serde(rename = "Circular Reference")]
    CircularReference,
    #[serde(rename = "Unresolved")]
    Unresolved,
}

impl LineageNodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineageNodeKind::View => "view",
            LineageNodeKind::Explore => "explore",
            LineageNodeKind::Origin => "sql",
            LineageNodeKind::SelfMarker => "self",
            LineageNodeKind::CircularReference => "Circular Reference",
            LineageNodeKind::Unresolved => "Unresolved",
        }
    }
}

/// One node of a rendered lineage tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LineageNodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LineageNode>,
}

impl LineageNode {
    pub fn leaf(name: impl Into<String>, kind: LineageNodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(
        name: impl Into<String>,
        kind: LineageNodeKind,
        children: Vec<LineageNode>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            children,
        }
    }

    /// Origin branch: the table (or custom query marker) closed by the self leaf
    pub fn origin(name: impl Into<String>) -> Self {
        Self::with_children(
            name,
            LineageNodeKind::Origin,
            vec![Self::leaf(SELF_MARKER, LineageNodeKind::SelfMarker)],
        )
    }

    /// Number of nodes on the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(LineageNode::depth).max().unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(LineageNode::node_count).sum::<usize>()
    }

    /// Pre-order walk over every node of the tree
    pub fn walk(&self) -> Vec<&LineageNode> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.walk());
        }
        nodes
    }

    pub fn count_kind(&self, kind: LineageNodeKind) -> usize {
        self.walk().into_iter().filter(|node| node.kind == kind).count()
    }
}
