//! Transition guard expressions.
//!
//! A transition may declare a `guard` that is checked against the subject's
//! fields before any guard listener runs. The expression language supports:
//!
//! - `subject.field` - field access (truthy check)
//! - `subject.field.nested` - nested access into object values
//! - `subject.field == value` / `!=` - equality (strings, numbers, booleans, null)
//! - `subject.field > value` / `>=` / `<` / `<=` - numeric comparison
//! - `!expr`, `expr && expr`, `expr || expr` (AND binds tighter than OR)
//! - `(expr)` - grouping
//!
//! Examples:
//! - `subject.approved`
//! - `subject.amount > 100 && !subject.locked`
//! - `(subject.role == "editor" || subject.role == "admin") && subject.active`

use crate::error::WorkflowError;
use crate::subject::Subject;
use serde_json::Value;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A parsed guard expression.
#[derive(Debug, Clone)]
pub enum GuardExpr {
    /// Field is truthy.
    Truthy(Vec<String>),
    /// Field compared with a literal.
    Compare(Vec<String>, CmpOp, Value),
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    /// Parses a guard expression from a string.
    pub fn parse(s: &str) -> Result<Self, WorkflowError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty guard expression"));
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_or()?;
        parser.skip_whitespace();
        if parser.pos < parser.input.len() {
            return Err(invalid(format!(
                "unexpected input at position {}: '{}'",
                parser.pos,
                &parser.input[parser.pos..]
            )));
        }
        Ok(expr)
    }

    /// Evaluates the expression against the subject's fields.
    pub fn evaluate(&self, subject: &dyn Subject) -> bool {
        match self {
            GuardExpr::Truthy(path) => is_truthy(&resolve(subject, path)),
            GuardExpr::Compare(path, op, expected) => {
                compare(&resolve(subject, path), *op, expected)
            }
            GuardExpr::And(left, right) => left.evaluate(subject) && right.evaluate(subject),
            GuardExpr::Or(left, right) => left.evaluate(subject) || right.evaluate(subject),
            GuardExpr::Not(inner) => !inner.evaluate(subject),
        }
    }
}

/// A guard expression together with its source text.
#[derive(Debug, Clone)]
pub struct Guard {
    source: String,
    expr: GuardExpr,
}

impl Guard {
    pub fn parse(source: &str) -> Result<Self, WorkflowError> {
        Ok(Self {
            source: source.trim().to_string(),
            expr: GuardExpr::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn allows(&self, subject: &dyn Subject) -> bool {
        self.expr.evaluate(subject)
    }
}

fn invalid(reason: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidGuard {
        reason: reason.into(),
    }
}

fn resolve(subject: &dyn Subject, path: &[String]) -> Value {
    let Some((head, rest)) = path.split_first() else {
        return Value::Null;
    };
    let Some(mut current) = subject.field(head) else {
        return Value::Null;
    };

    for part in rest {
        current = match current {
            Value::Object(mut map) => map.remove(part).unwrap_or(Value::Null),
            _ => return Value::Null,
        };
    }

    current
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(actual: &Value, op: CmpOp, expected: &Value) -> bool {
    let numbers = actual.as_f64().zip(expected.as_f64());
    match op {
        CmpOp::Eq => values_equal(actual, expected),
        CmpOp::Ne => !values_equal(actual, expected),
        CmpOp::Gt => numbers.map(|(a, b)| a > b).unwrap_or(false),
        CmpOp::Ge => numbers.map(|(a, b)| a >= b).unwrap_or(false),
        CmpOp::Lt => numbers.map(|(a, b)| a < b).unwrap_or(false),
        CmpOp::Le => numbers.map(|(a, b)| a <= b).unwrap_or(false),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

const FIELD_PREFIX: &str = "subject.";

/// Recursive descent parser.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_or(&mut self) -> Result<GuardExpr, WorkflowError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.eat("||") {
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, WorkflowError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.eat("&&") {
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, WorkflowError> {
        self.skip_whitespace();

        // `!=` never starts an operand, so a bare `!` is negation.
        if self.eat("!") {
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        if self.eat("(") {
            let expr = self.parse_or()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(invalid("expected ')'"));
            }
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, WorkflowError> {
        let path = self.parse_field()?;
        self.skip_whitespace();

        // Two-character operators first so `>=` is not read as `>`.
        let op = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            (">=", CmpOp::Ge),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            ("<", CmpOp::Lt),
        ]
        .into_iter()
        .find(|(token, _)| self.peek_str(token));

        let Some((token, op)) = op else {
            return Ok(GuardExpr::Truthy(path));
        };
        self.pos += token.len();
        self.skip_whitespace();

        let value = match op {
            CmpOp::Eq | CmpOp::Ne => self.parse_literal()?,
            _ => self.parse_number()?,
        };
        Ok(GuardExpr::Compare(path, op, value))
    }

    fn parse_field(&mut self) -> Result<Vec<String>, WorkflowError> {
        self.skip_whitespace();
        if !self.peek_str(FIELD_PREFIX) {
            return Err(invalid(format!("field must start with '{}'", FIELD_PREFIX)));
        }
        self.pos += FIELD_PREFIX.len();

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let raw = &self.input[start..self.pos];
        let path: Vec<String> = raw.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(invalid(format!("invalid field name: '{}'", raw)));
        }

        Ok(path)
    }

    fn parse_literal(&mut self) -> Result<Value, WorkflowError> {
        for (word, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if self.eat(word) {
                return Ok(value);
            }
        }

        if self.peek_char() == Some('"') {
            return self.parse_string();
        }

        self.parse_number()
    }

    fn parse_string(&mut self) -> Result<Value, WorkflowError> {
        self.pos += 1;

        let mut out = String::new();
        let mut chars = self.input[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(Value::String(out));
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c => out.push(c),
            }
        }

        Err(invalid("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<Value, WorkflowError> {
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("invalid number: '{}'", text)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.peek_str(token) {
            self.pos += token.len();
            self.skip_whitespace();
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}
