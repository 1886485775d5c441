//! Structured queries over indexed transactions.
//!
//! A query is a conjunction of conditions over composite keys, written in the
//! event-query grammar:
//!
//! ```text
//! query     = condition { "AND" condition }
//! condition = key op operand | key "EXISTS"
//! key       = [A-Za-z0-9._-]+            e.g. "tx.height", "acc.owner"
//! op        = "=" | "<" | "<=" | ">" | ">=" | "CONTAINS"
//! operand   = "'" chars "'" | integer
//! ```
//!
//! `tx.hash = '<hex>'` short-circuits to a point lookup, `tx.height` drives
//! the height index, and `match.events = 1` as the first condition switches
//! the search into per-event matching.

use std::fmt;
use std::str::FromStr;

use crate::error::{TxIndexError, TxIndexResult};

/// Composite key carrying the transaction hash fast path.
pub const TX_HASH_KEY: &str = "tx.hash";
/// Composite key of the height index.
pub const TX_HEIGHT_KEY: &str = "tx.height";
/// Pseudo-key enabling per-event matching when it heads the query.
pub const MATCH_EVENTS_KEY: &str = "match.events";

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    Exists,
}

impl Operator {
    /// Whether this operator participates in range extraction.
    pub fn is_range(self) -> bool {
        matches!(self, Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte)
    }
}

/// Operand of a condition. Heights and other numeric operands are used as
/// `i64`; everything else is text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Text(String),
    Int(i64),
}

impl Operand {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Operand::Text(s) => Some(s),
            Operand::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Operand::Int(v) => Some(*v),
            Operand::Text(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Text(s) => write!(f, "{s}"),
            Operand::Int(v) => write!(f, "{v}"),
        }
    }
}

/// One predicate of a parsed query. `operand` is `None` only for `EXISTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub composite_key: String,
    pub op: Operator,
    pub operand: Option<Operand>,
}

/// A parsed conjunction of conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    conditions: Vec<Condition>,
}

impl Query {
    /// Parse a query string. Malformed input is an input error surfaced to
    /// the caller; a parsed query is always non-empty.
    pub fn parse(input: &str) -> TxIndexResult<Self> {
        let mut parser = Parser::new(input);
        let mut conditions = Vec::new();

        loop {
            conditions.push(parser.condition()?);
            parser.skip_whitespace();
            if parser.at_end() {
                break;
            }
            parser.keyword("AND")?;
        }

        Ok(Self { conditions })
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

impl FromStr for Query {
    type Err = TxIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn error(&self, message: impl Into<String>) -> TxIndexError {
        TxIndexError::Query(format!("{} at byte {}", message.into(), self.pos))
    }

    fn condition(&mut self) -> TxIndexResult<Condition> {
        self.skip_whitespace();
        let composite_key = self.composite_key()?;
        self.skip_whitespace();

        if self.eat_word("EXISTS") {
            return Ok(Condition {
                composite_key,
                op: Operator::Exists,
                operand: None,
            });
        }

        if self.eat_word("CONTAINS") {
            self.skip_whitespace();
            let operand = self.operand()?;
            if operand.as_text().is_none() {
                return Err(self.error("CONTAINS requires a quoted string operand"));
            }
            return Ok(Condition {
                composite_key,
                op: Operator::Contains,
                operand: Some(operand),
            });
        }

        let op = self.comparison_operator()?;
        self.skip_whitespace();
        let operand = self.operand()?;
        Ok(Condition {
            composite_key,
            op,
            operand: Some(operand),
        })
    }

    fn composite_key(&mut self) -> TxIndexResult<String> {
        let key: String = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        if key.is_empty() {
            return Err(self.error("expected composite key"));
        }
        self.pos += key.len();
        Ok(key)
    }

    /// Consume `word` if it is present and followed by a token boundary.
    fn eat_word(&mut self, word: &str) -> bool {
        let rest = self.rest();
        if !rest.starts_with(word) {
            return false;
        }
        let boundary = rest[word.len()..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace());
        if boundary {
            self.pos += word.len();
        }
        boundary
    }

    fn keyword(&mut self, word: &str) -> TxIndexResult<()> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.error(format!("expected {word}")))
        }
    }

    fn comparison_operator(&mut self) -> TxIndexResult<Operator> {
        for (token, op) in [
            ("<=", Operator::Lte),
            (">=", Operator::Gte),
            ("<", Operator::Lt),
            (">", Operator::Gt),
            ("=", Operator::Eq),
        ] {
            if self.rest().starts_with(token) {
                self.pos += token.len();
                return Ok(op);
            }
        }
        Err(self.error("expected operator"))
    }

    fn operand(&mut self) -> TxIndexResult<Operand> {
        if self.rest().starts_with('\'') {
            self.pos += 1;
            let Some(end) = self.rest().find('\'') else {
                return Err(self.error("unterminated string operand"));
            };
            let text = self.rest()[..end].to_string();
            self.pos += end + 1;
            return Ok(Operand::Text(text));
        }

        let literal: String = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '-')
            .collect();
        if literal.is_empty() {
            return Err(self.error("expected operand"));
        }
        let value: i64 = literal
            .parse()
            .map_err(|_| self.error(format!("invalid number {literal:?}")))?;
        self.pos += literal.len();
        Ok(Operand::Int(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(key: &str, op: Operator, operand: Option<Operand>) -> Condition {
        Condition {
            composite_key: key.into(),
            op,
            operand,
        }
    }

    #[test]
    fn parses_equality_on_string() {
        let q = Query::parse("acc.owner = 'Ivan'").unwrap();
        assert_eq!(
            q.conditions(),
            &[cond("acc.owner", Operator::Eq, Some(Operand::Text("Ivan".into())))]
        );
    }

    #[test]
    fn parses_conjunction_and_ranges() {
        let q = Query::parse("tx.height >= 3 AND tx.height <= 7").unwrap();
        assert_eq!(
            q.conditions(),
            &[
                cond(TX_HEIGHT_KEY, Operator::Gte, Some(Operand::Int(3))),
                cond(TX_HEIGHT_KEY, Operator::Lte, Some(Operand::Int(7))),
            ]
        );
    }

    #[test]
    fn parses_without_spaces_around_operator() {
        let q = Query::parse("match.events=1 AND acc.owner='Ivan'").unwrap();
        assert_eq!(q.conditions().len(), 2);
        assert_eq!(q.conditions()[0].composite_key, MATCH_EVENTS_KEY);
        assert_eq!(q.conditions()[0].operand, Some(Operand::Int(1)));
    }

    #[test]
    fn parses_contains_and_exists() {
        let q = Query::parse("acc.owner CONTAINS 'van' AND tm.event EXISTS").unwrap();
        assert_eq!(
            q.conditions(),
            &[
                cond("acc.owner", Operator::Contains, Some(Operand::Text("van".into()))),
                cond("tm.event", Operator::Exists, None),
            ]
        );
    }

    #[test]
    fn quoted_operand_may_contain_keywords_and_separators() {
        let q = Query::parse("msg.memo = 'a AND b/c'").unwrap();
        assert_eq!(
            q.conditions()[0].operand,
            Some(Operand::Text("a AND b/c".into()))
        );
    }

    #[test]
    fn parses_negative_numbers() {
        let q = Query::parse("acc.delta = -5").unwrap();
        assert_eq!(q.conditions()[0].operand, Some(Operand::Int(-5)));
    }

    #[test]
    fn rejects_malformed_queries() {
        for input in [
            "",
            "acc.owner =",
            "= 'x'",
            "acc.owner LIKE 'x'",
            "acc.owner = 'unterminated",
            "acc.owner = 'a' AND",
            "acc.owner CONTAINS 5",
            "tx.height = 99999999999999999999",
        ] {
            assert!(
                matches!(Query::parse(input), Err(TxIndexError::Query(_))),
                "expected parse failure for {input:?}"
            );
        }
    }

    #[test]
    fn from_str_round_trip() {
        let q: Query = "tx.hash = 'AB12'".parse().unwrap();
        assert_eq!(q.conditions()[0].composite_key, TX_HASH_KEY);
    }
}
