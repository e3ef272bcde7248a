//! Migration scripts
//!
//! A migration document is split on `;` into individually executable
//! statements. Comments are dropped, and empty fragments are discarded. A `;`
//! inside a string literal, a quoted identifier or a dollar-quoted body does
//! not end a statement.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::fs;
use std::path::Path;

use crate::error::{MigrateError, MigrateResult};

/// Id used for SQL passed inline instead of from a file
pub const INLINE_SCRIPT_ID: &str = "inline";

/// Skip reason recorded for transaction control statements
pub const TRANSACTION_CONTROL_REASON: &str = "transaction control statement not sent";

/// One executable statement of a migration script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    /// 1-based position in the script
    pub ordinal: usize,
    /// Line of the document the statement starts on (1-based)
    pub line: usize,
    pub sql: String,
}

impl Statement {
    /// First line of the statement, shortened for log output
    pub fn summary(&self) -> String {
        const MAX: usize = 72;
        let first_line = self.sql.lines().next().unwrap_or_default().trim();
        if first_line.chars().count() > MAX {
            let truncated: String = first_line.chars().take(MAX).collect();
            format!("{}...", truncated)
        } else if self.sql.lines().nth(1).is_some() {
            format!("{} ...", first_line)
        } else {
            first_line.to_string()
        }
    }

    /// Whether the statement opens, ends or nests a transaction.
    ///
    /// Scripts already run inside a transaction owned by the applier, so these
    /// are never sent.
    pub fn is_transaction_control(&self) -> bool {
        let mut words = self
            .sql
            .split_whitespace()
            .map(|word| word.trim_end_matches(';').to_ascii_uppercase());
        match words.next().as_deref() {
            Some("BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "ABORT" | "SAVEPOINT" | "RELEASE") => {
                true
            }
            Some("START") => words.next().as_deref() == Some("TRANSACTION"),
            _ => false,
        }
    }
}

/// A statement that the PostgreSQL grammar check could not parse
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxWarning {
    pub ordinal: usize,
    pub line: usize,
    pub message: String,
}

/// An ordered list of statements parsed from one SQL document
#[derive(Debug, Clone)]
pub struct MigrationScript {
    id: String,
    raw: String,
    checksum: String,
    statements: Vec<Statement>,
}

impl MigrationScript {
    /// Parse a SQL document
    pub fn parse(id: impl Into<String>, raw: impl Into<String>) -> MigrateResult<Self> {
        let raw = raw.into();
        let statements = split_statements(&raw)?;
        Ok(Self {
            id: id.into(),
            checksum: checksum(&raw),
            raw,
            statements,
        })
    }

    /// SQL given directly rather than read from a file
    pub fn inline(sql: impl Into<String>) -> MigrateResult<Self> {
        Self::parse(INLINE_SCRIPT_ID, sql)
    }

    /// Load a migration document; the script id is the file stem
    pub fn from_file(path: &Path) -> MigrateResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            MigrateError::script(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                MigrateError::script(format!("Invalid migration filename: {}", path.display()))
            })?;
        Self::parse(id, raw)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Hex encoded SHA-256 of the raw document
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Check every statement against the PostgreSQL grammar.
    ///
    /// The grammar does not cover every server feature, so the result is
    /// advisory only.
    pub fn validate(&self) -> Vec<SyntaxWarning> {
        let dialect = PostgreSqlDialect {};
        self.statements
            .iter()
            .filter_map(|statement| match Parser::parse_sql(&dialect, &statement.sql) {
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(
                        "Statement {} (line {}) did not parse: {}",
                        statement.ordinal,
                        statement.line,
                        e
                    );
                    Some(SyntaxWarning {
                        ordinal: statement.ordinal,
                        line: statement.line,
                        message: e.to_string(),
                    })
                }
            })
            .collect()
    }
}

fn checksum(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote { backslash_escapes: bool },
    DoubleQuote,
    DollarQuote { tag: String },
    LineComment,
    BlockComment { depth: usize },
}

/// Accumulates the current fragment and the line it started on
struct Fragment {
    text: String,
    start_line: Option<usize>,
}

impl Fragment {
    fn new() -> Self {
        Self {
            text: String::new(),
            start_line: None,
        }
    }

    fn push(&mut self, c: char, line: usize) {
        if self.start_line.is_none() && !c.is_whitespace() {
            self.start_line = Some(line);
        }
        self.text.push(c);
    }

    fn push_str(&mut self, s: &str, line: usize) {
        for c in s.chars() {
            self.push(c, line);
        }
    }

    fn finish(&mut self, statements: &mut Vec<Statement>) {
        let sql = self.text.trim();
        if let (false, Some(line)) = (sql.is_empty(), self.start_line) {
            statements.push(Statement {
                ordinal: statements.len() + 1,
                line,
                sql: sql.to_string(),
            });
        }
        self.text.clear();
        self.start_line = None;
    }
}

/// Split a SQL document into statements
pub fn split_statements(sql: &str) -> MigrateResult<Vec<Statement>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut fragment = Fragment::new();
    let mut state = State::Normal;
    let mut state_line = 1;
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match &mut state {
            State::Normal => match c {
                ';' => fragment.finish(&mut statements),
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    i += 1;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment { depth: 1 };
                    state_line = line;
                    i += 1;
                }
                '\'' => {
                    let backslash_escapes = i > 0
                        && matches!(chars[i - 1], 'E' | 'e')
                        && (i < 2 || !is_identifier_char(chars[i - 2]));
                    state = State::SingleQuote { backslash_escapes };
                    state_line = line;
                    fragment.push(c, line);
                }
                '"' => {
                    state = State::DoubleQuote;
                    state_line = line;
                    fragment.push(c, line);
                }
                '$' => match dollar_tag(&chars, i) {
                    Some(tag) if i == 0 || !is_identifier_char(chars[i - 1]) => {
                        fragment.push_str(&tag, line);
                        i += tag.chars().count() - 1;
                        state = State::DollarQuote { tag };
                        state_line = line;
                    }
                    _ => fragment.push(c, line),
                },
                _ => fragment.push(c, line),
            },
            State::SingleQuote { backslash_escapes } => {
                fragment.push(c, line);
                if *backslash_escapes && c == '\\' {
                    if let Some(escaped) = next {
                        fragment.push(escaped, line);
                        if escaped == '\n' {
                            line += 1;
                        }
                        i += 1;
                    }
                } else if c == '\'' {
                    state = State::Normal;
                }
            }
            State::DoubleQuote => {
                fragment.push(c, line);
                if c == '"' {
                    state = State::Normal;
                }
            }
            State::DollarQuote { tag } => {
                let tag_len = tag.chars().count();
                if c == '$' && chars[i..].iter().take(tag_len).copied().eq(tag.chars()) {
                    let closing = tag.clone();
                    fragment.push_str(&closing, line);
                    i += tag_len - 1;
                    state = State::Normal;
                } else {
                    fragment.push(c, line);
                }
            }
            State::LineComment => {
                if c == '\n' {
                    fragment.push(c, line);
                    state = State::Normal;
                }
            }
            State::BlockComment { depth } => {
                if c == '/' && next == Some('*') {
                    *depth += 1;
                    i += 1;
                } else if c == '*' && next == Some('/') {
                    *depth -= 1;
                    i += 1;
                    if *depth == 0 {
                        // keep tokens on either side of the comment apart
                        fragment.push(' ', line);
                        state = State::Normal;
                    }
                }
            }
        }

        if c == '\n' {
            line += 1;
        }
        i += 1;
    }

    let unterminated = match &state {
        State::SingleQuote { .. } => Some("string literal"),
        State::DoubleQuote => Some("quoted identifier"),
        State::DollarQuote { .. } => Some("dollar-quoted string"),
        State::BlockComment { .. } => Some("block comment"),
        State::Normal | State::LineComment => None,
    };
    if let Some(what) = unterminated {
        return Err(MigrateError::script(format!(
            "Unterminated {} starting on line {}",
            what, state_line
        )));
    }

    fragment.finish(&mut statements);
    Ok(statements)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `$$` or `$tag$` starting at `start`, if one is there
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut end = start + 1;
    while let Some(&c) = chars.get(end) {
        if c == '$' {
            return Some(chars[start..=end].iter().collect());
        }
        let valid = if end == start + 1 {
            c.is_alphabetic() || c == '_'
        } else {
            is_identifier_char(c)
        };
        if !valid {
            return None;
        }
        end += 1;
    }
    None
}
