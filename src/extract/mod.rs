//! Structural extraction of view and explore declarations from LookML text

pub mod lexer;
pub mod scanner;

pub use scanner::{scan, Param, ParamValue};

use lexer::is_table_name_char;

use crate::types::*;
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};

/// Extract every view and explore declared at the top level of `text`.
///
/// Declarations of the wrong kind for `file_kind` are kept and flagged as
/// misplaced. Malformed declarations are kept with an `Unknown` source.
#[instrument(skip(text), fields(bytes = text.len()))]
pub fn extract_declarations(text: &str, file_location: &str, file_kind: FileKind) -> Vec<Declaration> {
    let declarations: Vec<Declaration> = scan(text)
        .iter()
        .filter_map(|param| {
            let kind = match param.key.as_str() {
                "view" => DeclarationKind::View,
                "explore" => DeclarationKind::Explore,
                _ => return None,
            };
            declaration_from_param(param, kind, file_location, file_kind)
        })
        .collect();

    debug!(
        "Extracted {} declarations from {}",
        declarations.len(),
        file_location
    );
    declarations
}

fn declaration_from_param(
    param: &Param,
    kind: DeclarationKind,
    file_location: &str,
    file_kind: FileKind,
) -> Option<Declaration> {
    let mut flags = Vec::new();

    let misplaced = kind.home_file_kind() != file_kind;
    if misplaced {
        flags.push(DeclarationFlag::Misplaced { found_in: file_kind });
    }

    let (raw_name, terminated) = match &param.value {
        ParamValue::Block {
            name: Some(name),
            terminated,
            ..
        } => (name.as_str(), *terminated),
        ParamValue::Scalar(name) => {
            flags.push(DeclarationFlag::MissingBody);
            (name.as_str(), true)
        }
        _ => {
            warn!(
                "Skipping {} header without a name at {}:{}",
                kind, file_location, param.line
            );
            return None;
        }
    };

    let name = normalize_name(raw_name);
    if name.is_empty() {
        return None;
    }
    if !terminated {
        flags.push(DeclarationFlag::Unterminated);
    }

    let source = match kind {
        DeclarationKind::View => {
            if terminated && !flags.contains(&DeclarationFlag::MissingBody) {
                view_source(param, &mut flags)
            } else {
                Source::Unknown
            }
        }
        DeclarationKind::Explore => Source::Views(explore_sources(param, &name)),
    };

    for flag in &flags {
        debug!("{} '{}' in {}: {}", kind, name, file_location, flag);
    }

    Some(Declaration {
        kind,
        name,
        file_location: file_location.to_string(),
        file_kind,
        line: param.line,
        source,
        misplaced,
        flags,
    })
}

/// Pick the view's source by precedence, flagging blocks where several match
fn view_source(view: &Param, flags: &mut Vec<DeclarationFlag>) -> Source {
    let mut candidates = Vec::new();

    for child in view.children() {
        if child.key == "derived_table" {
            for derived in child.children() {
                match (derived.key.as_str(), &derived.value) {
                    ("explore_source", ParamValue::Block { name: Some(name), .. })
                    | ("explore_source", ParamValue::Scalar(name)) => {
                        candidates.push(Source::ExploreSource(normalize_name(name)));
                    }
                    ("sql", ParamValue::Raw { .. }) => candidates.push(Source::CustomSql),
                    _ => {}
                }
            }
        }
    }

    for child in view.children() {
        let ("sql_table_name", ParamValue::Raw { text, terminated }) = (child.key.as_str(), &child.value)
        else {
            continue;
        };

        if !terminated {
            flags.push(DeclarationFlag::UnterminatedValue {
                key: child.key.clone(),
            });
        } else if !text.chars().all(|c| is_table_name_char(c) || c.is_whitespace()) {
            flags.push(DeclarationFlag::InvalidTableName { value: text.clone() });
        } else {
            let table = clean_table_name(text);
            if !table.is_empty() {
                candidates.push(Source::SqlTable(table));
            }
        }
    }

    let mut unique: Vec<Source> = Vec::new();
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    // Precedence follows the variant order of SourceType.
    unique.sort_by_key(Source::source_type);

    let Some(chosen) = unique.first().cloned() else {
        return Source::Unknown;
    };

    let mut matched: Vec<SourceType> = unique.iter().map(Source::source_type).collect();
    matched.dedup();

    if matched.len() > 1 {
        flags.push(DeclarationFlag::AmbiguousSourceType {
            matched: matched.clone(),
            chosen: chosen.source_type(),
        });
    }

    for source_type in matched {
        let targets: Vec<String> = unique
            .iter()
            .filter(|source| source.source_type() == source_type)
            .filter_map(|source| source.target().map(String::from))
            .collect();
        if targets.len() > 1 {
            flags.push(DeclarationFlag::ConflictingSources { source_type, targets });
        }
    }

    chosen
}

/// Physical table names keep their case but lose quotes and whitespace
fn clean_table_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '"' && *c != '`')
        .collect()
}

/// Union of every `from`, `join` and `always_join` target inside the explore
fn explore_sources(explore: &Param, explore_name: &str) -> BTreeSet<String> {
    let mut sources = BTreeSet::new();

    for param in explore.descendants() {
        let targets: Vec<&str> = match (param.key.as_str(), &param.value) {
            ("from", ParamValue::Scalar(target)) => vec![target.as_str()],
            ("join", ParamValue::Block { name: Some(target), .. })
            | ("join", ParamValue::Scalar(target)) => vec![target.as_str()],
            ("always_join", ParamValue::List(targets)) => targets.iter().map(String::as_str).collect(),
            ("always_join", ParamValue::Scalar(target)) => vec![target.as_str()],
            _ => Vec::new(),
        };

        sources.extend(
            targets
                .into_iter()
                .map(normalize_name)
                .filter(|target| !target.is_empty()),
        );
    }

    if sources.is_empty() {
        sources.insert(explore_name.to_string());
    }
    sources
}
