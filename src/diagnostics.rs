//! Recovered problems, surfaced as data instead of errors.
//!
//! Codes are stable identifiers used in `diagnostics.csv`; add new ones
//! rather than renaming existing ones.

use crate::types::{Declaration, DeclarationFlag};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    /// A view in a model file or an explore in a view file
    MisplacedDeclaration,

    /// More than one source pattern matched a view
    AmbiguousSourceType,

    /// Unterminated block or header without a body
    MalformedDeclaration,

    /// Same kind and name declared more than once
    DuplicateDeclaration,

    /// A referenced name has no declaration
    UnresolvedSource,

    /// A lineage path revisits itself
    CircularReference,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MisplacedDeclaration => "MISPLACED_DECLARATION",
            Self::AmbiguousSourceType => "AMBIGUOUS_SOURCE_TYPE",
            Self::MalformedDeclaration => "MALFORMED_DECLARATION",
            Self::DuplicateDeclaration => "DUPLICATE_DECLARATION",
            Self::UnresolvedSource => "UNRESOLVED_SOURCE",
            Self::CircularReference => "CIRCULAR_REFERENCE",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            Self::CircularReference => Severity::Info,
            _ => Severity::Warn,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub subject: String,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.default_severity(),
            subject: subject.into(),
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Diagnostics for the flags a declaration picked up during extraction
    pub fn from_declaration(declaration: &Declaration) -> Vec<Diagnostic> {
        declaration
            .flags
            .iter()
            .map(|flag| {
                let code = match flag {
                    DeclarationFlag::Misplaced { .. } => DiagnosticCode::MisplacedDeclaration,
                    DeclarationFlag::AmbiguousSourceType { .. }
                    | DeclarationFlag::ConflictingSources { .. } => DiagnosticCode::AmbiguousSourceType,
                    DeclarationFlag::Unterminated
                    | DeclarationFlag::MissingBody
                    | DeclarationFlag::UnterminatedValue { .. }
                    | DeclarationFlag::InvalidTableName { .. } => DiagnosticCode::MalformedDeclaration,
                };
                Diagnostic::new(
                    code,
                    format!("{}:{}", declaration.kind, declaration.name),
                    flag.to_string(),
                )
                .at(&declaration.file_location, declaration.line)
            })
            .collect()
    }
}

/// Count diagnostics per code, in code order
pub fn count_by_code(diagnostics: &[Diagnostic]) -> Vec<(DiagnosticCode, usize)> {
    let mut counts = std::collections::BTreeMap::new();
    for diagnostic in diagnostics {
        *counts.entry(diagnostic.code).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}
