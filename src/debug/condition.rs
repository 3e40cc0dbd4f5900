//! Gate conditions: a closed set of comparisons evaluated against the
//! caller-supplied context map. Nothing here executes code.
//!
//! A condition is either built structurally ([`GateCondition::compare`],
//! [`GateCondition::All`], ...), written as a short expression such as
//! `userId === "123" && plan != "free"`, or supplied as a precompiled
//! [`ContextPredicate`].

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConditionError;

/// Context handed to `check_gate`, e.g. `{"userId": "123"}`.
pub type ContextMap = Map<String, Value>;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    // Exact
    #[serde(alias = "===")]
    StrictEqual,
    #[serde(alias = "!==")]
    StrictNotEqual,
    // Loose (string form)
    #[serde(alias = "==")]
    Is,
    #[serde(alias = "!=")]
    IsNot,
    // Numeric
    #[serde(alias = ">")]
    GreaterThan,
    #[serde(alias = "<")]
    LessThan,
    #[serde(alias = ">=")]
    GreaterOrEqual,
    #[serde(alias = "<=")]
    LessOrEqual,
    // String/Array
    Contains,
    NotContains,
    StartWith,
    EndWith,
    In,
    NotIn,
    // Emptiness
    Empty,
    NotEmpty,
    // Null
    Null,
    NotNull,
}

impl ComparisonOperator {
    /// Operator for a symbolic token in an expression.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "===" => ComparisonOperator::StrictEqual,
            "!==" => ComparisonOperator::StrictNotEqual,
            "==" => ComparisonOperator::Is,
            "!=" => ComparisonOperator::IsNot,
            ">" => ComparisonOperator::GreaterThan,
            "<" => ComparisonOperator::LessThan,
            ">=" => ComparisonOperator::GreaterOrEqual,
            "<=" => ComparisonOperator::LessOrEqual,
            _ => return None,
        })
    }

    /// Operator for a word token in an expression (`userId in ["a", "b"]`).
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "contains" => ComparisonOperator::Contains,
            "not_contains" => ComparisonOperator::NotContains,
            "start_with" | "starts_with" => ComparisonOperator::StartWith,
            "end_with" | "ends_with" => ComparisonOperator::EndWith,
            "in" => ComparisonOperator::In,
            "not_in" => ComparisonOperator::NotIn,
            _ => return None,
        })
    }
}

/// Precompiled predicate registered out of band.
#[derive(Clone)]
pub struct ContextPredicate(Arc<dyn Fn(&ContextMap) -> bool + Send + Sync>);

impl ContextPredicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ContextMap) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for ContextPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextPredicate(..)")
    }
}

#[derive(Debug, Clone)]
pub enum GateCondition {
    Compare {
        /// Dotted path into the context map.
        field: String,
        operator: ComparisonOperator,
        value: Value,
    },
    All(Vec<GateCondition>),
    Any(Vec<GateCondition>),
    Not(Box<GateCondition>),
    /// Expression source, parsed on every evaluation.
    Expression(String),
    Predicate(ContextPredicate),
}

impl GateCondition {
    pub fn compare(field: impl Into<String>, operator: ComparisonOperator, value: Value) -> Self {
        GateCondition::Compare {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn expression(source: impl Into<String>) -> Self {
        GateCondition::Expression(source.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&ContextMap) -> bool + Send + Sync + 'static,
    {
        GateCondition::Predicate(ContextPredicate::new(f))
    }

    /// Parse an expression eagerly into its structured form.
    pub fn parse(source: &str) -> Result<GateCondition, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let condition = parser.parse_or()?;
        match parser.peek() {
            None => Ok(condition),
            Some((token, offset)) => Err(ConditionError::UnexpectedToken {
                token: token.to_string(),
                offset: *offset,
            }),
        }
    }

    pub fn evaluate(&self, context: &ContextMap) -> Result<bool, ConditionError> {
        match self {
            GateCondition::Compare {
                field,
                operator,
                value,
            } => Ok(compare(lookup(context, field), *operator, value)),
            GateCondition::All(conditions) => {
                for cond in conditions {
                    if !cond.evaluate(context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            GateCondition::Any(conditions) => {
                for cond in conditions {
                    if cond.evaluate(context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            GateCondition::Not(inner) => Ok(!inner.evaluate(context)?),
            GateCondition::Expression(source) => GateCondition::parse(source)?.evaluate(context),
            GateCondition::Predicate(predicate) => {
                catch_unwind(AssertUnwindSafe(|| (predicate.0)(context)))
                    .map_err(|_| ConditionError::PredicatePanicked)
            }
        }
    }
}

// ================================
// Comparison
// ================================

fn lookup<'a>(context: &'a ContextMap, field: &str) -> Option<&'a Value> {
    lookup_path(context, field).or_else(|| {
        ["context.", "ctx."]
            .iter()
            .find_map(|prefix| field.strip_prefix(prefix))
            .and_then(|rest| lookup_path(context, rest))
    })
}

fn lookup_path<'a>(context: &'a ContextMap, field: &str) -> Option<&'a Value> {
    if let Some(value) = context.get(field) {
        return Some(value);
    }
    let mut parts = field.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn compare(actual: Option<&Value>, operator: ComparisonOperator, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    match operator {
        ComparisonOperator::StrictEqual => strict_equal(actual, expected),
        ComparisonOperator::StrictNotEqual => !strict_equal(actual, expected),
        ComparisonOperator::Is => value_to_string(actual) == value_to_string(expected),
        ComparisonOperator::IsNot => value_to_string(actual) != value_to_string(expected),

        ComparisonOperator::GreaterThan => numeric(actual, expected, |a, b| a > b),
        ComparisonOperator::LessThan => numeric(actual, expected, |a, b| a < b),
        ComparisonOperator::GreaterOrEqual => numeric(actual, expected, |a, b| a >= b),
        ComparisonOperator::LessOrEqual => numeric(actual, expected, |a, b| a <= b),

        ComparisonOperator::Contains => eval_contains(actual, expected),
        ComparisonOperator::NotContains => !eval_contains(actual, expected),
        ComparisonOperator::StartWith => match actual {
            Value::String(s) => s.starts_with(&value_to_string(expected)),
            _ => false,
        },
        ComparisonOperator::EndWith => match actual {
            Value::String(s) => s.ends_with(&value_to_string(expected)),
            _ => false,
        },
        ComparisonOperator::In => eval_in(actual, expected),
        ComparisonOperator::NotIn => !eval_in(actual, expected),

        ComparisonOperator::Empty => is_empty(actual),
        ComparisonOperator::NotEmpty => !is_empty(actual),
        ComparisonOperator::Null => actual.is_null(),
        ComparisonOperator::NotNull => !actual.is_null(),
    }
}

fn strict_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn numeric<F>(actual: &Value, expected: &Value, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (value_to_f64(actual), value_to_f64(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn eval_contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => s.contains(&value_to_string(expected)),
        Value::Array(items) => items
            .iter()
            .any(|item| item == expected || value_to_string(item) == value_to_string(expected)),
        Value::Object(map) => map.contains_key(&value_to_string(expected)),
        _ => false,
    }
}

fn eval_in(actual: &Value, expected: &Value) -> bool {
    let needle = value_to_string(actual);
    match expected {
        Value::Array(items) => items.iter().any(|item| value_to_string(item) == needle),
        Value::String(s) => s.contains(&needle),
        _ => false,
    }
}

// ================================
// Expression parsing
// ================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Op(String),
    Literal(Value),
    And,
    Or,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Op(s) => f.write_str(s),
            Token::Literal(v) => write!(f, "{}", v),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Bang => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBracket => f.write_str("["),
            Token::RBracket => f.write_str("]"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ConditionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((Token::LParen, offset));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, offset));
                i += 1;
            }
            '[' => {
                tokens.push((Token::LBracket, offset));
                i += 1;
            }
            ']' => {
                tokens.push((Token::RBracket, offset));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, offset));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((Token::And, offset));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((Token::Or, offset));
                i += 2;
            }
            '=' | '!' | '<' | '>' => {
                let mut op = String::from(ch);
                let mut j = i + 1;
                while let Some((_, c)) = chars.get(j) {
                    if *c == '=' && op.len() < 3 {
                        op.push('=');
                        j += 1;
                    } else {
                        break;
                    }
                }
                if op == "!" {
                    tokens.push((Token::Bang, offset));
                } else if ComparisonOperator::from_symbol(&op).is_some() {
                    tokens.push((Token::Op(op), offset));
                } else {
                    return Err(ConditionError::UnknownOperator(op));
                }
                i = j;
            }
            '"' | '\'' => {
                let quote = ch;
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while let Some((_, c)) = chars.get(j) {
                    match *c {
                        '\\' => {
                            let escaped = chars
                                .get(j + 1)
                                .map(|(_, e)| *e)
                                .ok_or(ConditionError::UnterminatedString(offset))?;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            j += 2;
                        }
                        c if c == quote => {
                            closed = true;
                            j += 1;
                            break;
                        }
                        other => {
                            text.push(other);
                            j += 1;
                        }
                    }
                }
                if !closed {
                    return Err(ConditionError::UnterminatedString(offset));
                }
                tokens.push((Token::Literal(Value::String(text)), offset));
                i = j;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while let Some((_, c)) = chars.get(j) {
                    if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-') {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let text = &source[offset..end];
                let value: Value = serde_json::from_str(text)
                    .map_err(|_| ConditionError::InvalidLiteral(text.to_string()))?;
                tokens.push((Token::Literal(value), offset));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut j = i + 1;
                while let Some((_, c)) = chars.get(j) {
                    if c.is_alphanumeric() || matches!(c, '_' | '$' | '.') {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let word = &source[offset..end];
                let token = match word {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" | "undefined" => Token::Literal(Value::Null),
                    "and" => Token::And,
                    "or" => Token::Or,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((token, offset));
                i = j;
            }
            other => {
                return Err(ConditionError::UnexpectedToken {
                    token: other.to_string(),
                    offset,
                })
            }
        }
    }
    Ok(tokens)
}

/// Deepest `!`, `(` or `[` nesting the parser accepts.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn nest(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ConditionError::TooDeep(MAX_NESTING));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Result<(Token, usize), ConditionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ConditionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().map(|(t, _)| t) == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<GateCondition, ConditionError> {
        let mut terms = vec![self.parse_and()?];
        while self.eat(&Token::Or) {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            GateCondition::Any(terms)
        })
    }

    fn parse_and(&mut self) -> Result<GateCondition, ConditionError> {
        let mut terms = vec![self.parse_unary()?];
        while self.eat(&Token::And) {
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            GateCondition::All(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<GateCondition, ConditionError> {
        if self.eat(&Token::Bang) {
            self.nest()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(GateCondition::Not(Box::new(inner)));
        }
        if self.eat(&Token::LParen) {
            self.nest()?;
            let inner = self.parse_or()?;
            self.depth -= 1;
            let (token, offset) = self.advance()?;
            if token != Token::RParen {
                return Err(ConditionError::UnexpectedToken {
                    token: token.to_string(),
                    offset,
                });
            }
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GateCondition, ConditionError> {
        let field = match self.advance()? {
            (Token::Ident(field), _) => field,
            (other, offset) => {
                return Err(ConditionError::UnexpectedToken {
                    token: other.to_string(),
                    offset,
                })
            }
        };

        let (op_token, op_offset) = self.advance()?;
        let operator = match &op_token {
            Token::Op(symbol) => ComparisonOperator::from_symbol(symbol),
            Token::Ident(word) => ComparisonOperator::from_word(word),
            _ => None,
        }
        .ok_or_else(|| ConditionError::UnexpectedToken {
            token: op_token.to_string(),
            offset: op_offset,
        })?;

        let value = self.parse_literal()?;
        Ok(GateCondition::Compare {
            field,
            operator,
            value,
        })
    }

    fn parse_literal(&mut self) -> Result<Value, ConditionError> {
        let (token, offset) = self.advance()?;
        match token {
            Token::Literal(value) => Ok(value),
            Token::LBracket => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Value::Array(items));
                }
                self.nest()?;
                loop {
                    items.push(self.parse_literal()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    let (closing, closing_offset) = self.advance()?;
                    if closing != Token::RBracket {
                        return Err(ConditionError::UnexpectedToken {
                            token: closing.to_string(),
                            offset: closing_offset,
                        });
                    }
                    self.depth -= 1;
                    return Ok(Value::Array(items));
                }
            }
            other => Err(ConditionError::UnexpectedToken {
                token: other.to_string(),
                offset,
            }),
        }
    }
}
