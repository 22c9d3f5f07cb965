//! Nesting-aware block scanner.
//!
//! Turns the token stream into a tree of `key: value` parameters. Blocks are
//! bounded by matched braces, so a nested block can never be mistaken for the
//! start of the next top-level declaration.

use crate::extract::lexer::{Lexer, Token, TokenKind};
use std::iter::Peekable;
use std::vec::IntoIter;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Scalar(String),
    Raw { text: String, terminated: bool },
    List(Vec<String>),
    Block {
        name: Option<String>,
        params: Vec<Param>,
        terminated: bool,
    },
    /// `key:` followed by nothing usable
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: ParamValue,
    pub line: usize,
}

impl Param {
    pub fn block_name(&self) -> Option<&str> {
        match &self.value {
            ParamValue::Block { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Param] {
        match &self.value {
            ParamValue::Block { params, .. } => params,
            _ => &[],
        }
    }

    /// Every parameter nested anywhere below this one, in document order
    pub fn descendants(&self) -> Vec<&Param> {
        let mut found = Vec::new();
        for child in self.children() {
            found.push(child);
            found.extend(child.descendants());
        }
        found
    }
}

/// Scan a whole file into its top-level parameters
pub fn scan(text: &str) -> Vec<Param> {
    let tokens = Lexer::new(text).tokenize();
    let mut scanner = Scanner {
        tokens: tokens.into_iter().peekable(),
    };
    let (params, _) = scanner.params(false);
    params
}

struct Scanner {
    tokens: Peekable<IntoIter<Token>>,
}

impl Scanner {
    /// Parse parameters until the closing brace (when `nested`) or end of input.
    /// Returns the parameters and whether the closing brace was found.
    fn params(&mut self, nested: bool) -> (Vec<Param>, bool) {
        let mut params = Vec::new();

        while let Some(token) = self.tokens.next() {
            match token.kind {
                TokenKind::RBrace if nested => return (params, true),
                TokenKind::Word(key) if self.next_is(&TokenKind::Colon) => {
                    self.tokens.next();
                    let value = self.value();
                    params.push(Param {
                        key,
                        value,
                        line: token.line,
                    });
                }
                TokenKind::LBrace => {
                    // Anonymous block without a key: keep the nesting balanced.
                    self.params(true);
                }
                other => {
                    trace!("Skipping stray token {:?} on line {}", other, token.line);
                }
            }
        }

        (params, !nested)
    }

    fn next_is(&mut self, kind: &TokenKind) -> bool {
        self.tokens.peek().map(|t| &t.kind == kind).unwrap_or(false)
    }

    fn value(&mut self) -> ParamValue {
        let Some(peeked) = self.tokens.peek() else {
            return ParamValue::Missing;
        };

        match &peeked.kind {
            TokenKind::Raw { .. } => match self.tokens.next().map(|t| t.kind) {
                Some(TokenKind::Raw { text, terminated }) => ParamValue::Raw { text, terminated },
                _ => ParamValue::Missing,
            },
            TokenKind::LBrace => {
                self.tokens.next();
                self.block(None)
            }
            TokenKind::LBracket => {
                self.tokens.next();
                ParamValue::List(self.list())
            }
            TokenKind::Word(_) | TokenKind::Str(_) => {
                let scalar = match self.tokens.next().map(|t| t.kind) {
                    Some(TokenKind::Word(s)) | Some(TokenKind::Str(s)) => s,
                    _ => String::new(),
                };
                if self.next_is(&TokenKind::LBrace) {
                    self.tokens.next();
                    self.block(Some(scalar))
                } else {
                    ParamValue::Scalar(scalar)
                }
            }
            _ => ParamValue::Missing,
        }
    }

    fn block(&mut self, name: Option<String>) -> ParamValue {
        let (params, terminated) = self.params(true);
        ParamValue::Block {
            name,
            params,
            terminated,
        }
    }

    fn list(&mut self) -> Vec<String> {
        let mut items = Vec::new();
        while let Some(token) = self.tokens.peek() {
            match &token.kind {
                TokenKind::RBracket => {
                    self.tokens.next();
                    break;
                }
                // A list never spans a closing brace; leave it for the enclosing block.
                TokenKind::RBrace => break,
                TokenKind::Word(item) | TokenKind::Str(item) => {
                    items.push(item.clone());
                    self.tokens.next();
                }
                _ => {
                    self.tokens.next();
                }
            }
        }
        items
    }
}
