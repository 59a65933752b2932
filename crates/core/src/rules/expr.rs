//! Rule condition expressions.
//!
//! Conditions are written as text, e.g.
//! `age >= 18 AND (observations.hba1c > 7 OR diagnoses.code contains "E11.9")`, parsed once into
//! a [`RuleExpr`] tree and evaluated many times.
//!
//! ```text
//! or         := and ("OR" and)*
//! and        := unary ("AND" unary)*
//! unary      := "NOT" unary | "(" or ")" | comparison
//! comparison := path op literal
//! op         := "==" | "=" | "!=" | ">" | "<" | ">=" | "<=" | "in" | "notIn" | "contains"
//! literal    := number | string | "true" | "false" | "null" | "[" (literal ("," literal)*)? "]"
//! ```
//!
//! Keywords are case-insensitive. Like every comparison, `a != b` is false when `a` is missing;
//! `NOT (a == b)` is true in that case.

use serde_json::Value;
use std::fmt;

use super::ops::{compare, resolve_path, ComparisonOp};

/// Nesting limit for parentheses and `NOT`.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rule parse error at position {position}: {message}")]
pub struct RuleParseError {
    /// Byte offset into the source text.
    pub position: usize,
    pub message: String,
}

impl RuleParseError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleExpr {
    Comparison {
        field: String,
        op: ComparisonOp,
        value: Value,
    },
    /// `field != value`; false when the field is missing.
    NotEqual { field: String, value: Value },
    And(Vec<RuleExpr>),
    Or(Vec<RuleExpr>),
    Not(Box<RuleExpr>),
}

impl RuleExpr {
    pub fn parse(source: &str) -> Result<Self, RuleParseError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            (Token::End, _) => Ok(expr),
            (token, at) => Err(RuleParseError::new(
                *at,
                format!("unexpected {} after complete expression", token.describe()),
            )),
        }
    }

    pub fn evaluate(&self, document: &Value) -> bool {
        match self {
            RuleExpr::Comparison { field, op, value } => {
                let actual = resolve_path(document, field);
                compare(*op, actual.as_ref(), value)
            }
            RuleExpr::NotEqual { field, value } => resolve_path(document, field)
                .is_some_and(|actual| !compare(ComparisonOp::Eq, Some(&actual), value)),
            RuleExpr::And(terms) => terms.iter().all(|t| t.evaluate(document)),
            RuleExpr::Or(terms) => terms.iter().any(|t| t.evaluate(document)),
            RuleExpr::Not(inner) => !inner.evaluate(document),
        }
    }
}

impl std::str::FromStr for RuleExpr {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RuleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleExpr::Comparison { field, op, value } => {
                write!(f, "{field} {} {value}", symbol(*op))
            }
            RuleExpr::NotEqual { field, value } => write!(f, "{field} != {value}"),
            RuleExpr::And(terms) => write_joined(f, terms, " AND "),
            RuleExpr::Or(terms) => write_joined(f, terms, " OR "),
            RuleExpr::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

fn symbol(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "==",
        ComparisonOp::Gt => ">",
        ComparisonOp::Lt => "<",
        ComparisonOp::Gte => ">=",
        ComparisonOp::Lte => "<=",
        other => other.as_str(),
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[RuleExpr], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{term}")?;
    }
    f.write_str(")")
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Literal(Value),
    Op(ComparisonOp),
    NotEq,
    And,
    Or,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Path(p) => format!("field '{p}'"),
            Token::Literal(v) => format!("literal {v}"),
            Token::Op(op) => format!("operator '{}'", symbol(*op)),
            Token::NotEq => "operator '!='".to_owned(),
            Token::And => "'AND'".to_owned(),
            Token::Or => "'OR'".to_owned(),
            Token::Not => "'NOT'".to_owned(),
            Token::LParen => "'('".to_owned(),
            Token::RParen => "')'".to_owned(),
            Token::LBracket => "'['".to_owned(),
            Token::RBracket => "']'".to_owned(),
            Token::Comma => "','".to_owned(),
            Token::End => "end of input".to_owned(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, RuleParseError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let token = match c {
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b'[' => {
                i += 1;
                Token::LBracket
            }
            b']' => {
                i += 1;
                Token::RBracket
            }
            b',' => {
                i += 1;
                Token::Comma
            }
            b'=' => {
                i += if bytes.get(i + 1) == Some(&b'=') { 2 } else { 1 };
                Token::Op(ComparisonOp::Eq)
            }
            b'!' => {
                if bytes.get(i + 1) != Some(&b'=') {
                    return Err(RuleParseError::new(start, "expected '!='"));
                }
                i += 2;
                Token::NotEq
            }
            b'>' | b'<' => {
                let or_equal = bytes.get(i + 1) == Some(&b'=');
                i += if or_equal { 2 } else { 1 };
                Token::Op(match (c, or_equal) {
                    (b'>', false) => ComparisonOp::Gt,
                    (b'>', true) => ComparisonOp::Gte,
                    (_, false) => ComparisonOp::Lt,
                    (_, true) => ComparisonOp::Lte,
                })
            }
            b'"' => {
                let (text, next) = read_string(source, start)?;
                i = next;
                Token::Literal(Value::String(text))
            }
            b'-' | b'0'..=b'9' => {
                let (number, next) = read_number(source, start)?;
                i = next;
                Token::Literal(number)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                {
                    i += 1;
                }
                word_token(&source[start..i])
            }
            _ => {
                let ch = source[start..].chars().next().unwrap_or('?');
                return Err(RuleParseError::new(start, format!("unexpected character '{ch}'")));
            }
        };
        tokens.push((token, start));
    }

    tokens.push((Token::End, source.len()));
    Ok(tokens)
}

fn word_token(word: &str) -> Token {
    match word.to_ascii_lowercase().as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "in" => Token::Op(ComparisonOp::In),
        "notin" => Token::Op(ComparisonOp::NotIn),
        "contains" => Token::Op(ComparisonOp::Contains),
        "true" => Token::Literal(Value::Bool(true)),
        "false" => Token::Literal(Value::Bool(false)),
        "null" => Token::Literal(Value::Null),
        _ => Token::Path(word.to_owned()),
    }
}

/// Read a double-quoted string starting at `start`; returns the text and the offset after the
/// closing quote.
fn read_string(source: &str, start: usize) -> Result<(String, usize), RuleParseError> {
    let mut text = String::new();
    let mut chars = source[start + 1..].char_indices();

    while let Some((offset, ch)) = chars.next() {
        match ch {
            '"' => return Ok((text, start + 1 + offset + 1)),
            '\\' => match chars.next() {
                Some((_, '"')) => text.push('"'),
                Some((_, '\\')) => text.push('\\'),
                Some((_, '/')) => text.push('/'),
                Some((_, 'n')) => text.push('\n'),
                Some((_, 't')) => text.push('\t'),
                Some((_, 'r')) => text.push('\r'),
                Some((_, 'b')) => text.push('\u{8}'),
                Some((_, 'f')) => text.push('\u{c}'),
                Some((at, 'u')) => {
                    let escape_at = start + 1 + at - 1;
                    let first = read_hex4(&mut chars, escape_at)?;
                    let code = if (0xD800..0xDC00).contains(&first) {
                        let low = match (chars.next(), chars.next()) {
                            (Some((_, '\\')), Some((_, 'u'))) => read_hex4(&mut chars, escape_at)?,
                            _ => {
                                return Err(RuleParseError::new(
                                    escape_at,
                                    "unpaired surrogate in '\\u' escape",
                                ))
                            }
                        };
                        if !(0xDC00..0xE000).contains(&low) {
                            return Err(RuleParseError::new(
                                escape_at,
                                "unpaired surrogate in '\\u' escape",
                            ));
                        }
                        0x10000 + ((first - 0xD800) << 10) + (low - 0xDC00)
                    } else {
                        first
                    };
                    let ch = char::from_u32(code).ok_or_else(|| {
                        RuleParseError::new(escape_at, "invalid '\\u' escape")
                    })?;
                    text.push(ch);
                }
                Some((at, other)) => {
                    return Err(RuleParseError::new(
                        start + 1 + at,
                        format!("unknown escape '\\{other}'"),
                    ));
                }
                None => break,
            },
            other => text.push(other),
        }
    }

    Err(RuleParseError::new(start, "unterminated string literal"))
}

/// Four hex digits of a `\u` escape.
fn read_hex4(chars: &mut std::str::CharIndices<'_>, escape_at: usize) -> Result<u32, RuleParseError> {
    let mut code = 0;
    for _ in 0..4 {
        let digit = chars
            .next()
            .and_then(|(_, c)| c.to_digit(16))
            .ok_or_else(|| RuleParseError::new(escape_at, "expected four hex digits after '\\u'"))?;
        code = code * 16 + digit;
    }
    Ok(code)
}

fn read_number(source: &str, start: usize) -> Result<(Value, usize), RuleParseError> {
    let bytes = source.as_bytes();
    let mut end = start;
    if bytes[end] == b'-' {
        end += 1;
    }
    while end < bytes.len()
        && (bytes[end].is_ascii_digit() || matches!(bytes[end], b'.' | b'e' | b'E'))
    {
        end += 1;
    }

    let text = &source[start..end];
    let invalid = || RuleParseError::new(start, format!("invalid number '{text}'"));

    let value = if text.contains(['.', 'e', 'E']) {
        let parsed: f64 = text.parse().map_err(|_| invalid())?;
        serde_json::Number::from_f64(parsed)
            .map(Value::Number)
            .ok_or_else(invalid)?
    } else {
        Value::from(text.parse::<i64>().map_err(|_| invalid())?)
    };
    Ok((value, end))
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &(Token, usize) {
        // The token list always ends with `End`, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> (Token, usize) {
        let current = self.peek().clone();
        if current.0 != Token::End {
            self.pos += 1;
        }
        current
    }

    fn expect(&mut self, expected: Token) -> Result<(), RuleParseError> {
        let (token, at) = self.advance();
        if token == expected {
            Ok(())
        } else {
            Err(RuleParseError::new(
                at,
                format!("expected {}, found {}", expected.describe(), token.describe()),
            ))
        }
    }

    fn enter(&mut self, at: usize) -> Result<(), RuleParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(RuleParseError::new(at, "expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<RuleExpr, RuleParseError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek().0 == Token::Or {
            self.advance();
            terms.push(self.parse_and()?);
        }
        Ok(collapse(terms, RuleExpr::Or))
    }

    fn parse_and(&mut self) -> Result<RuleExpr, RuleParseError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek().0 == Token::And {
            self.advance();
            terms.push(self.parse_unary()?);
        }
        Ok(collapse(terms, RuleExpr::And))
    }

    fn parse_unary(&mut self) -> Result<RuleExpr, RuleParseError> {
        let (token, at) = self.peek().clone();
        match token {
            Token::Not => {
                self.advance();
                self.enter(at)?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(RuleExpr::Not(Box::new(inner)))
            }
            Token::LParen => {
                self.advance();
                self.enter(at)?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<RuleExpr, RuleParseError> {
        let field = match self.advance() {
            (Token::Path(path), _) => path,
            (token, at) => {
                return Err(RuleParseError::new(
                    at,
                    format!("expected field, found {}", token.describe()),
                ));
            }
        };

        let op = match self.advance() {
            (Token::Op(op), _) => op,
            (Token::NotEq, _) => {
                let value = self.parse_literal()?;
                return Ok(RuleExpr::NotEqual { field, value });
            }
            (token, at) => {
                return Err(RuleParseError::new(
                    at,
                    format!("expected operator after '{field}', found {}", token.describe()),
                ));
            }
        };

        let value = self.parse_literal()?;
        if matches!(op, ComparisonOp::In | ComparisonOp::NotIn) && !value.is_array() {
            return Err(RuleParseError::new(
                self.tokens[self.pos.saturating_sub(1)].1,
                format!("operator '{op}' needs a list literal"),
            ));
        }

        Ok(RuleExpr::Comparison { field, op, value })
    }

    fn parse_literal(&mut self) -> Result<Value, RuleParseError> {
        match self.advance() {
            (Token::Literal(value), _) => Ok(value),
            (Token::LBracket, _) => {
                let mut items = Vec::new();
                if self.peek().0 == Token::RBracket {
                    self.advance();
                    return Ok(Value::Array(items));
                }
                loop {
                    items.push(self.parse_literal()?);
                    match self.advance() {
                        (Token::Comma, _) => continue,
                        (Token::RBracket, _) => return Ok(Value::Array(items)),
                        (token, at) => {
                            return Err(RuleParseError::new(
                                at,
                                format!("expected ',' or ']', found {}", token.describe()),
                            ));
                        }
                    }
                }
            }
            (token, at) => Err(RuleParseError::new(
                at,
                format!("expected literal, found {}", token.describe()),
            )),
        }
    }
}

fn collapse(mut terms: Vec<RuleExpr>, wrap: fn(Vec<RuleExpr>) -> RuleExpr) -> RuleExpr {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        wrap(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmp(field: &str, op: ComparisonOp, value: Value) -> RuleExpr {
        RuleExpr::Comparison {
            field: field.into(),
            op,
            value,
        }
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = RuleExpr::parse("a == 1 OR b == 2 AND c == 3").unwrap();
        assert_eq!(
            expr,
            RuleExpr::Or(vec![
                cmp("a", ComparisonOp::Eq, json!(1)),
                RuleExpr::And(vec![
                    cmp("b", ComparisonOp::Eq, json!(2)),
                    cmp("c", ComparisonOp::Eq, json!(3)),
                ]),
            ])
        );
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let expr = RuleExpr::parse("(a = 1 or b = 2) and not c >= 3.5").unwrap();
        assert_eq!(
            expr,
            RuleExpr::And(vec![
                RuleExpr::Or(vec![
                    cmp("a", ComparisonOp::Eq, json!(1)),
                    cmp("b", ComparisonOp::Eq, json!(2)),
                ]),
                RuleExpr::Not(Box::new(cmp("c", ComparisonOp::Gte, json!(3.5)))),
            ])
        );
    }

    #[test]
    fn test_not_equal_parses_to_its_own_node() {
        let expr = RuleExpr::parse(r#"sex != "male""#).unwrap();
        assert_eq!(
            expr,
            RuleExpr::NotEqual {
                field: "sex".into(),
                value: json!("male"),
            }
        );
        assert!(expr.evaluate(&json!({ "sex": "female" })));
        assert!(!expr.evaluate(&json!({ "sex": "male" })));
    }

    #[test]
    fn test_not_equal_is_false_for_missing_field() {
        let doc = json!({ "observations": {} });
        let not_equal = RuleExpr::parse("observations.smoker != true").unwrap();
        let equal = RuleExpr::parse("observations.smoker == true").unwrap();
        let negated = RuleExpr::parse("NOT observations.smoker == true").unwrap();

        assert!(!not_equal.evaluate(&doc));
        assert!(!equal.evaluate(&doc));
        assert!(negated.evaluate(&doc));
    }

    #[test]
    fn test_unicode_and_control_escapes() {
        let expr = RuleExpr::parse(r#"note == "a\u0001b\r\u00e9\ud83d\ude00""#).unwrap();
        assert_eq!(expr, cmp("note", ComparisonOp::Eq, json!("a\u{1}b\r\u{e9}\u{1F600}")));

        let err = RuleExpr::parse(r#"note == "\u12""#).unwrap_err();
        assert!(err.message.contains("hex digits"));
        let err = RuleExpr::parse(r#"note == "\ud83d""#).unwrap_err();
        assert!(err.message.contains("surrogate"));
    }

    #[test]
    fn test_list_and_keyword_literals() {
        let expr = RuleExpr::parse(r#"code notIn ["I10", "E78"] AND flag == true AND x == null"#)
            .unwrap();
        let RuleExpr::And(terms) = expr else {
            panic!("expected AND");
        };
        assert_eq!(terms[0], cmp("code", ComparisonOp::NotIn, json!(["I10", "E78"])));
        assert_eq!(terms[1], cmp("flag", ComparisonOp::Eq, json!(true)));
        assert_eq!(terms[2], cmp("x", ComparisonOp::Eq, Value::Null));
    }

    #[test]
    fn test_parse_errors_report_position() {
        let err = RuleExpr::parse("age >= ").unwrap_err();
        assert_eq!(err.position, 7);
        assert!(err.message.contains("expected literal"));

        let err = RuleExpr::parse("age >= 18 AND (egfr > 30").unwrap_err();
        assert_eq!(err.position, 24);

        let err = RuleExpr::parse(r#"name == "open"#).unwrap_err();
        assert_eq!(err.position, 8);

        let err = RuleExpr::parse("age # 3").unwrap_err();
        assert_eq!(err.position, 4);

        let err = RuleExpr::parse("code in \"I10\"").unwrap_err();
        assert!(err.message.contains("list literal"));

        let err = RuleExpr::parse("age > 1 age").unwrap_err();
        assert_eq!(err.position, 8);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("{}a == 1{}", "(".repeat(100), ")".repeat(100));
        let err = RuleExpr::parse(&source).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn test_evaluate_against_document() {
        let doc = json!({
            "age": 52,
            "observations": { "hba1c": 6.1 },
            "diagnoses": [{ "code": "E11.9" }, { "code": "I10" }]
        });
        let expr = RuleExpr::parse(
            r#"age >= 18 AND (observations.hba1c > 7 OR diagnoses.code contains "E11.9")"#,
        )
        .unwrap();
        assert!(expr.evaluate(&doc));

        let missing = RuleExpr::parse("observations.ldl notIn [1, 2]").unwrap();
        assert!(!missing.evaluate(&doc));
        assert!(RuleExpr::parse("NOT observations.ldl > 3").unwrap().evaluate(&doc));
    }

    #[test]
    fn test_display_round_trips_through_parser() {
        let expr = RuleExpr::parse(r#"age > 18 AND NOT (sex == "male" OR code in ["I10"])"#)
            .unwrap();
        let reparsed = RuleExpr::parse(&expr.to_string()).unwrap();
        assert_eq!(expr, reparsed);

        let expr = RuleExpr::parse(r#"note != "tab\there" AND text == "bell\u0007""#).unwrap();
        assert_eq!(RuleExpr::parse(&expr.to_string()).unwrap(), expr);
    }
}
