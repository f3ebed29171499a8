//! Advanced search syntax.
//!
//! ```text
//! query   := or
//! or      := and ("OR" and)*
//! and     := not (["AND"] not)*
//! not     := primary ("NOT" primary)*
//! primary := "(" or ")" | '"' phrase '"' ["*"] | word ["*"]
//! ```
//!
//! `AND`, `OR` and `NOT` are operators only in upper case. Words and phrases
//! go through the same tokenizer as indexed text, so `rust-lang` is the phrase
//! `rust lang`. A trailing `*` makes the last token a prefix. `NOT` binds
//! tightest and `OR` loosest; adjacent terms are ANDed.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::{Result, StoreError};
use crate::search::tokenize;

/// A parsed query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    /// Consecutive tokens. With `prefix` the last token matches as a prefix.
    Phrase { tokens: Vec<String>, prefix: bool },
    /// Documents matching every part.
    And(Vec<Query>),
    /// Documents matching any part.
    Or(Vec<Query>),
    /// Documents matching the left side but not the right.
    Not(Box<Query>, Box<Query>),
}

impl Query {
    /// A single token, exact or prefix.
    pub fn term(token: impl Into<String>, prefix: bool) -> Self {
        Query::Phrase {
            tokens: vec![token.into()],
            prefix,
        }
    }

    /// The default query form: every token of `text` must match as a prefix.
    ///
    /// `None` when `text` has no searchable characters.
    pub fn simple(text: &str) -> Option<Self> {
        let mut tokens = tokenize(text);
        tokens.sort();
        tokens.dedup();
        let mut parts: Vec<Query> = tokens.into_iter().map(|t| Query::term(t, true)).collect();
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Query::And(parts)),
        }
    }

    /// Parse the advanced syntax. `None` for a blank query.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let lexemes = lex(text)?;
        if lexemes.is_empty() {
            return Ok(None);
        }
        let mut parser = Parser { lexemes, pos: 0 };
        let query = parser.or()?;
        match parser.peek() {
            None => Ok(Some(query)),
            Some(extra) => Err(invalid(format!("unexpected {}", extra.describe()))),
        }
    }
}

fn invalid(reason: impl Into<String>) -> StoreError {
    StoreError::validation("query", reason)
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
enum Lexeme {
    Open,
    Close,
    And,
    Or,
    Not,
    Phrase { text: String, prefix: bool },
    Word { text: String, prefix: bool },
}

impl Lexeme {
    fn describe(&self) -> String {
        match self {
            Lexeme::Open => "`(`".into(),
            Lexeme::Close => "`)`".into(),
            Lexeme::And => "`AND`".into(),
            Lexeme::Or => "`OR`".into(),
            Lexeme::Not => "`NOT`".into(),
            Lexeme::Phrase { text, .. } => format!("phrase \"{text}\""),
            Lexeme::Word { text, .. } => format!("`{text}`"),
        }
    }

    fn starts_primary(&self) -> bool {
        matches!(
            self,
            Lexeme::Open | Lexeme::Phrase { .. } | Lexeme::Word { .. }
        )
    }
}

fn take_star(chars: &mut Peekable<Chars<'_>>) -> bool {
    let mut star = false;
    while chars.next_if_eq(&'*').is_some() {
        star = true;
    }
    star
}

fn lex(text: &str) -> Result<Vec<Lexeme>> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                out.push(Lexeme::Open);
            }
            ')' => {
                chars.next();
                out.push(Lexeme::Close);
            }
            '"' => {
                chars.next();
                let mut phrase = String::new();
                loop {
                    match chars.next() {
                        // `""` inside a phrase is a literal quote
                        Some('"') if chars.next_if_eq(&'"').is_some() => phrase.push('"'),
                        Some('"') => break,
                        Some(c) => phrase.push(c),
                        None => return Err(invalid("unterminated quoted phrase")),
                    }
                }
                let prefix = take_star(&mut chars);
                out.push(Lexeme::Phrase {
                    text: phrase,
                    prefix,
                });
            }
            _ => {
                let mut word = String::new();
                while let Some(c) =
                    chars.next_if(|c| !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | '*'))
                {
                    word.push(c);
                }
                let prefix = take_star(&mut chars);
                let lexeme = match (word.as_str(), prefix) {
                    ("AND", false) => Lexeme::And,
                    ("OR", false) => Lexeme::Or,
                    ("NOT", false) => Lexeme::Not,
                    _ => Lexeme::Word { text: word, prefix },
                };
                out.push(lexeme);
            }
        }
    }
    Ok(out)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn next_if(&mut self, want: &Lexeme) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Query> {
        let mut parts = vec![self.and()?];
        while self.next_if(&Lexeme::Or) {
            parts.push(self.and()?);
        }
        Ok(collapse(parts, Query::Or))
    }

    fn and(&mut self) -> Result<Query> {
        let mut parts = vec![self.not()?];
        loop {
            if self.next_if(&Lexeme::And) {
                parts.push(self.not()?);
            } else if self.peek().is_some_and(Lexeme::starts_primary) {
                parts.push(self.not()?);
            } else {
                break;
            }
        }
        Ok(collapse(parts, Query::And))
    }

    fn not(&mut self) -> Result<Query> {
        let mut query = self.primary()?;
        while self.next_if(&Lexeme::Not) {
            let excluded = self.primary()?;
            query = Query::Not(Box::new(query), Box::new(excluded));
        }
        Ok(query)
    }

    fn primary(&mut self) -> Result<Query> {
        let Some(lexeme) = self.lexemes.get(self.pos).cloned() else {
            return Err(invalid("query ends where a term was expected"));
        };
        self.pos += 1;
        match lexeme {
            Lexeme::Open => {
                let inner = self.or()?;
                if !self.next_if(&Lexeme::Close) {
                    return Err(invalid("unbalanced `(`"));
                }
                Ok(inner)
            }
            Lexeme::Phrase { text, prefix } | Lexeme::Word { text, prefix } => {
                let tokens = tokenize(&text);
                if tokens.is_empty() {
                    return Err(invalid(format!("`{text}` has nothing to search for")));
                }
                Ok(Query::Phrase { tokens, prefix })
            }
            other => Err(invalid(format!(
                "expected a term, found {}",
                other.describe()
            ))),
        }
    }
}

fn collapse(mut parts: Vec<Query>, join: fn(Vec<Query>) -> Query) -> Query {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        join(parts)
    }
}
