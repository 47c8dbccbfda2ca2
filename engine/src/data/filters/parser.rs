//! Filter expression parsing
//!
//! Tokenizes the `namespace:key<op>value[,...]` mini-language. Single or double
//! quotes may wrap any part of a token so that delimiters can appear in values;
//! quote characters are stripped from the returned tokens.

use crate::domain::QueryError;

use super::types::{Namespace, Term, TermOp};

const QUOTES: &[char] = &['\'', '"'];

/// Incremental tokenizer over a single filter expression
#[derive(Debug)]
pub struct Parser {
    expression: String,
    offset: usize,
}

impl Parser {
    pub fn new(expression: &str) -> Self {
        Self {
            expression: expression.to_string(),
            offset: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.expression.len()
    }

    /// Read the next token up to one of `delimiters`
    ///
    /// Returns the token and the delimiter that ended it. When input runs out
    /// first, the remainder is returned with `None` if `optional` is set or no
    /// delimiters were given; otherwise the call fails with `MissingDelimiter`.
    pub fn next_token(
        &mut self,
        delimiters: &[char],
        optional: bool,
    ) -> Result<(String, Option<char>), QueryError> {
        let mut token = String::new();
        // (quote char, byte offset) of each open quote, innermost last
        let mut quotes: Vec<(char, usize)> = Vec::new();

        let rest = &self.expression[self.offset..];
        for (index, ch) in rest.char_indices() {
            let position = self.offset + index;
            if QUOTES.contains(&ch) {
                match quotes.last() {
                    Some((open, _)) if *open == ch => {
                        quotes.pop();
                    }
                    _ => quotes.push((ch, position)),
                }
                continue;
            }
            if quotes.is_empty() && delimiters.contains(&ch) {
                self.offset = position + ch.len_utf8();
                return Ok((token, Some(ch)));
            }
            token.push(ch);
        }

        if let Some((_, position)) = quotes.first() {
            return Err(QueryError::malformed_expression(&self.expression, *position));
        }

        self.offset = self.expression.len();
        if optional || delimiters.is_empty() {
            Ok((token, None))
        } else {
            Err(QueryError::missing_delimiter(
                &self.expression,
                delimiters,
                &token,
            ))
        }
    }
}

/// Parse filter expressions into terms
///
/// Each expression may hold several comma-separated terms; terms from all
/// expressions are concatenated in order. Whitespace around the namespace and
/// key is ignored, so `tag:a=1, param:b=2` reads two terms. Values are kept
/// as written.
pub fn parse_terms(expressions: &[String]) -> Result<Vec<Term>, QueryError> {
    let mut terms = Vec::new();
    for expression in expressions {
        let mut parser = Parser::new(expression);
        while !parser.is_exhausted() {
            let (namespace, _) = parser.next_token(&[':'], false)?;
            let namespace = namespace.trim();
            let namespace = Namespace::parse(namespace)
                .ok_or_else(|| QueryError::unknown_namespace(namespace, Namespace::ALL))?;

            let (key, delimiter) = parser.next_token(&['=', '~'], false)?;
            let key = key.trim().to_string();
            let op = delimiter
                .and_then(TermOp::from_delimiter)
                .unwrap_or(TermOp::Exact);

            let (value, _) = parser.next_token(&[','], true)?;
            terms.push(Term {
                namespace,
                key,
                op,
                value,
            });
        }
    }
    Ok(terms)
}
