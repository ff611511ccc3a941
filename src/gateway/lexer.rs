//! SQL text normalization.
//!
//! Splits statement text into a flat token stream with comments removed and
//! keywords case-folded. Quoting rules follow the target backend closely
//! enough that a `;` or comment marker inside a literal is never mistaken for
//! structure. MySQL executable comments (`/*! ... */`) are kept as code.

use crate::models::DatabaseType;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare word, upper-cased.
    Word(String),
    /// Contents of a string literal.
    Literal(String),
    /// Contents of a quoted identifier.
    QuotedIdent(String),
    Number(String),
    Symbol(char),
    /// Top-level `;`.
    Terminator,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Literal(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Token::QuotedIdent(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Token::Number(n) => f.write_str(n),
            Token::Symbol(c) => write!(f, "{}", c),
            Token::Terminator => f.write_str(";"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    UnterminatedComment,
    UnterminatedLiteral,
    UnterminatedIdentifier,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnterminatedComment => f.write_str("unterminated block comment"),
            LexError::UnterminatedLiteral => f.write_str("unterminated string literal"),
            LexError::UnterminatedIdentifier => f.write_str("unterminated quoted identifier"),
        }
    }
}

/// Token stream of one input text.
#[derive(Debug, Clone)]
pub struct NormalizedSql {
    tokens: Vec<Token>,
}

impl NormalizedSql {
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Upper-cased bare words, in order.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Word(w) => Some(w.as_str()),
            _ => None,
        })
    }

    pub fn leading_keyword(&self) -> Option<&str> {
        match self.tokens.first() {
            Some(Token::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.iter().all(|t| *t == Token::Terminator)
    }

    /// True when anything other than terminators follows a terminator.
    pub fn has_multiple_statements(&self) -> bool {
        let mut seen_terminator = false;
        for token in &self.tokens {
            match token {
                Token::Terminator => seen_terminator = true,
                _ if seen_terminator => return true,
                _ => {}
            }
        }
        false
    }

    /// Whitespace-collapsed, comment-free, case-folded rendering.
    pub fn normalized_text(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&token.to_string());
        }
        out
    }
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Tokenize `sql` under the quoting rules of `db_type`.
pub fn normalize(sql: &str, db_type: DatabaseType) -> Result<NormalizedSql, LexError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    // Open MySQL executable comments whose closing `*/` is still pending.
    let mut executable_depth = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Line comments. MySQL also accepts `#`.
        if (c == '-' && next == Some('-')) || (c == '#' && db_type == DatabaseType::MySQL) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '*' && next == Some('/') && executable_depth > 0 {
            executable_depth -= 1;
            i += 2;
            continue;
        }

        if c == '/' && next == Some('*') {
            if db_type == DatabaseType::MySQL && chars.get(i + 2) == Some(&'!') {
                executable_depth += 1;
                i += 3;
                // Optional version number right after `/*!`.
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                continue;
            }
            i = skip_block_comment(&chars, i, db_type)?;
            continue;
        }

        if c == ';' {
            tokens.push(Token::Terminator);
            i += 1;
            continue;
        }

        // E'...' escape strings in PostgreSQL.
        if db_type == DatabaseType::PostgreSQL
            && (c == 'e' || c == 'E')
            && next == Some('\'')
            && !preceded_by_word(&chars, i)
        {
            let (literal, end) = read_quoted(&chars, i + 1, '\'', true)
                .ok_or(LexError::UnterminatedLiteral)?;
            tokens.push(Token::Literal(literal));
            i = end;
            continue;
        }

        if c == '\'' {
            let backslash = db_type == DatabaseType::MySQL;
            let (literal, end) =
                read_quoted(&chars, i, '\'', backslash).ok_or(LexError::UnterminatedLiteral)?;
            tokens.push(Token::Literal(literal));
            i = end;
            continue;
        }

        if c == '"' {
            if db_type == DatabaseType::MySQL {
                let (literal, end) =
                    read_quoted(&chars, i, '"', true).ok_or(LexError::UnterminatedLiteral)?;
                tokens.push(Token::Literal(literal));
                i = end;
            } else {
                let (ident, end) =
                    read_quoted(&chars, i, '"', false).ok_or(LexError::UnterminatedIdentifier)?;
                tokens.push(Token::QuotedIdent(ident));
                i = end;
            }
            continue;
        }

        if c == '`' && db_type != DatabaseType::PostgreSQL {
            let (ident, end) =
                read_quoted(&chars, i, '`', false).ok_or(LexError::UnterminatedIdentifier)?;
            tokens.push(Token::QuotedIdent(ident));
            i = end;
            continue;
        }

        if c == '[' && db_type == DatabaseType::SQLite {
            let end = chars[i + 1..]
                .iter()
                .position(|&ch| ch == ']')
                .ok_or(LexError::UnterminatedIdentifier)?;
            tokens.push(Token::QuotedIdent(chars[i + 1..i + 1 + end].iter().collect()));
            i += end + 2;
            continue;
        }

        if c == '$' && db_type == DatabaseType::PostgreSQL && !preceded_by_word(&chars, i) {
            if let Some((literal, end)) = read_dollar_quoted(&chars, i) {
                tokens.push(Token::Literal(literal));
                i = end;
                continue;
            }
        }

        if is_word_start(c) {
            let start = i;
            while i < chars.len() && is_word_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(Token::Word(word.to_uppercase()));
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
            continue;
        }

        tokens.push(Token::Symbol(c));
        i += 1;
    }

    Ok(NormalizedSql { tokens })
}

fn preceded_by_word(chars: &[char], i: usize) -> bool {
    i > 0 && is_word_char(chars[i - 1])
}

/// Skip a `/* */` comment starting at `start`. PostgreSQL comments nest.
fn skip_block_comment(chars: &[char], start: usize, db_type: DatabaseType) -> Result<usize, LexError> {
    let nests = db_type == DatabaseType::PostgreSQL;
    let mut depth = 1usize;
    let mut i = start + 2;
    while i < chars.len() {
        match (chars[i], chars.get(i + 1).copied()) {
            ('*', Some('/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Ok(i);
                }
            }
            ('/', Some('*')) if nests => {
                depth += 1;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Err(LexError::UnterminatedComment)
}

/// Read a quoted run starting at the opening quote. Doubled quotes escape;
/// with `backslash`, `\x` escapes too. Returns the contents and the index
/// after the closing quote.
fn read_quoted(chars: &[char], start: usize, quote: char, backslash: bool) -> Option<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if backslash && c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                out.push(escaped);
                i += 2;
                continue;
            }
            return None;
        }
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return Some((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
    None
}

/// Read a `$tag$ ... $tag$` string. `None` when `$` does not open one.
fn read_dollar_quoted(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    while i < chars.len() && chars[i] != '$' {
        let valid = chars[i].is_alphanumeric() || chars[i] == '_';
        if !valid || (i == start + 1 && chars[i].is_ascii_digit()) {
            return None;
        }
        i += 1;
    }
    if i >= chars.len() {
        return None;
    }
    let tag: Vec<char> = chars[start..=i].to_vec();
    let body_start = i + 1;
    let mut j = body_start;
    while j + tag.len() <= chars.len() {
        if chars[j..j + tag.len()] == tag[..] {
            return Some((chars[body_start..j].iter().collect(), j + tag.len()));
        }
        j += 1;
    }
    None
}
