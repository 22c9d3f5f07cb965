//! Tokenizer for LookML text.
//!
//! Comments, quoted strings and `;;`-terminated raw values are consumed here
//! so that braces inside them never reach the block scanner.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(String),
    Str(String),
    /// Raw value of a SQL-like parameter, without the closing `;;`
    Raw { text: String, terminated: bool },
    Colon,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

/// Parameters whose value is free text ended by `;;`
pub fn is_raw_key(key: &str) -> bool {
    key == "sql"
        || key == "html"
        || key == "expression"
        || key.starts_with("sql_")
        || key.ends_with("_sql")
}

/// Characters allowed in a physical table name, besides whitespace
pub fn is_table_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '"' | '`')
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '{' | '}' | '[' | ']' | ',' | ':' | '"' | '#')
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    last_word: Option<String>,
    pending: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
            last_word: None,
            pending: None,
        }
    }

    /// Tokenize the whole input. Never fails; unterminated strings and raw
    /// values simply run to the end of the text.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token() {
            tokens.push(token);
        }
        tokens
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while let Some(&c) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        if let Some(token) = self.pending.take() {
            return Some(token);
        }

        self.skip_trivia();

        let line = self.line;
        let c = self.bump()?;
        let kind = match c {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '"' => TokenKind::Str(self.read_string()),
            ':' => {
                match self.last_word.take() {
                    Some(key) if key == "sql_table_name" => {
                        self.pending = Some(self.read_table_name());
                    }
                    Some(key) if is_raw_key(&key) => {
                        self.pending = Some(self.read_raw());
                    }
                    _ => {}
                }
                TokenKind::Colon
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&next) = self.chars.peek() {
                    if !is_word_char(next) {
                        break;
                    }
                    word.push(next);
                    self.bump();
                }
                self.last_word = Some(word.clone());
                return Some(Token {
                    kind: TokenKind::Word(word),
                    line,
                });
            }
        };

        self.last_word = None;
        Some(Token { kind, line })
    }

    fn read_string(&mut self) -> String {
        let mut value = String::new();
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    if let Some(escaped) = self.bump() {
                        value.push(escaped);
                    }
                }
                '"' => break,
                _ => value.push(c),
            }
        }
        value
    }

    /// Number of chars before the next `;;`, or `None` if a char rejected by
    /// `allowed` comes first
    fn find_terminator(&self, allowed: impl Fn(char) -> bool) -> Option<usize> {
        let mut chars = self.chars.clone();
        let mut count = 0;
        while let Some(c) = chars.next() {
            if c == ';' && chars.peek() == Some(&';') {
                return Some(count);
            }
            if !allowed(c) {
                return None;
            }
            count += 1;
        }
        None
    }

    /// `sql_table_name` values: a table name ended by `;;`, possibly on a
    /// later line, or anything up to `;;` on the same line. Without either the
    /// value stops at the end of the line or the first `}`.
    fn read_table_name(&mut self) -> Token {
        let line = self.line;
        let end = self
            .find_terminator(|c| is_table_name_char(c) || c.is_whitespace())
            .or_else(|| self.find_terminator(|c| c != '\n'));

        let mut text = String::new();
        let terminated = match end {
            Some(count) => {
                for _ in 0..count {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
                self.bump();
                self.bump();
                true
            }
            None => {
                while let Some(&c) = self.chars.peek() {
                    if c == '\n' || c == '}' {
                        break;
                    }
                    text.push(c);
                    self.bump();
                }
                false
            }
        };

        Token {
            kind: TokenKind::Raw {
                text: text.trim().to_string(),
                terminated,
            },
            line,
        }
    }

    fn read_raw(&mut self) -> Token {
        let line = self.line;
        let mut text = String::new();
        let mut terminated = false;
        while let Some(c) = self.bump() {
            if c == ';' && self.chars.peek() == Some(&';') {
                self.bump();
                terminated = true;
                break;
            }
            text.push(c);
        }

        Token {
            kind: TokenKind::Raw {
                text: text.trim().to_string(),
                terminated,
            },
            line,
        }
    }
}
