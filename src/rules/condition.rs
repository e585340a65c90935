//! The rule condition language
//!
//! A small boolean expression language evaluated against a transaction's
//! fields: comparison operators (`==`, `!=`, `<`, `>`, `<=`, `>=`), regex
//! match (`=~`), and the combinators `and`, `or`, `not` with
//! parentheses. Operands are field names, quoted strings, decimal numbers
//! or `true`/`false`. Operand kinds are closed: a comparison between
//! incompatible kinds is an evaluation error, never a silent `false`.
//!
//! ```
//! use banksync_core::rules::condition::{Condition, Scope, Value};
//! use std::collections::BTreeMap;
//!
//! let cond = Condition::parse(r#"amount < 0 and description =~ "SNCF""#).unwrap();
//! let mut scope = BTreeMap::new();
//! scope.insert("amount".to_string(), Value::Num("-12.30".parse().unwrap()));
//! scope.insert("description".to_string(), Value::Str("SELECTA FR SNCF 123".into()));
//! assert!(cond.evaluate(&scope).unwrap());
//! ```

use bigdecimal::BigDecimal;
use regex::Regex;
use std::collections::BTreeMap;

/// A resolved operand value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(BigDecimal),
    Bool(bool),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "boolean",
        }
    }

    /// The textual form used when the value is substituted into a
    /// template.
    pub fn render(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
        }
    }
}

/// Field lookup for condition evaluation and template rendering.
pub trait Scope {
    fn lookup(&self, field: &str) -> Option<Value>;
}

impl Scope for BTreeMap<String, Value> {
    fn lookup(&self, field: &str) -> Option<Value> {
        self.get(field).cloned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
    #[error("'=~' requires a string literal pattern on the right")]
    RegexPattern,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unexpected end of condition")]
    UnexpectedEnd,
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("condition references undefined field '{0}'")]
    UndefinedField(String),
    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("expected a boolean, got a {0}")]
    NotBoolean(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(BigDecimal),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::Str(s) => format!("\"{}\"", s),
            Token::Num(n) => n.to_string(),
            Token::Eq => "==".to_string(),
            Token::Ne => "!=".to_string(),
            Token::Lt => "<".to_string(),
            Token::Le => "<=".to_string(),
            Token::Gt => ">".to_string(),
            Token::Ge => ">=".to_string(),
            Token::Match => "=~".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                match chars.next() {
                    Some('=') => tokens.push(Token::Eq),
                    Some('~') => tokens.push(Token::Match),
                    _ => return Err(ParseError::UnexpectedChar('=')),
                }
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some('=') => tokens.push(Token::Ne),
                    _ => return Err(ParseError::UnexpectedChar('!')),
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => return Err(ParseError::UnterminatedString),
                        Some(c) if c == quote => break,
                        Some('\\') => match chars.next() {
                            None => return Err(ParseError::UnterminatedString),
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(other) => value.push(other),
                        },
                        Some(other) => value.push(other),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '-' | '0'..='9' => {
                let mut literal = String::new();
                literal.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<BigDecimal>()
                    .map_err(|_| ParseError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ParseError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Field(String),
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Match {
        lhs: Box<Expr>,
        pattern: Regex,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn keyword(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Ident(word)) => Some(word.as_str()),
            _ => None,
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.and_expr()?;
        while self.keyword() == Some("or") {
            self.pos += 1;
            let rhs = self.and_expr()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.not_expr()?;
        while self.keyword() == Some("and") {
            self.pos += 1;
            let rhs = self.not_expr()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.keyword() == Some("not") {
            self.pos += 1;
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::Match) => {
                self.pos += 1;
                let pattern = match self.next()? {
                    Token::Str(pattern) => pattern,
                    _ => return Err(ParseError::RegexPattern),
                };
                let regex = Regex::new(&pattern).map_err(|e| ParseError::InvalidRegex {
                    pattern,
                    message: e.to_string(),
                })?;
                return Ok(Expr::Match {
                    lhs: Box::new(lhs),
                    pattern: regex,
                });
            }
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.operand()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn operand(&mut self) -> Result<Expr, ParseError> {
        match self.next()? {
            Token::LParen => {
                let expr = self.or_expr()?;
                match self.next()? {
                    Token::RParen => Ok(expr),
                    other => Err(ParseError::UnexpectedToken(other.describe())),
                }
            }
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Num(n) => Ok(Expr::Literal(Value::Num(n))),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "and" | "or" | "not" => Err(ParseError::UnexpectedToken(word)),
                _ => Ok(Expr::Field(word)),
            },
            other => Err(ParseError::UnexpectedToken(other.describe())),
        }
    }
}

fn eval(expr: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Field(name) => scope
            .lookup(name)
            .ok_or_else(|| EvalError::UndefinedField(name.clone())),
        Expr::Compare { op, lhs, rhs } => {
            let lv = eval(lhs, scope)?;
            let rv = eval(rhs, scope)?;
            compare(*op, &lv, &rv).map(Value::Bool)
        }
        Expr::Match { lhs, pattern } => match eval(lhs, scope)? {
            Value::Str(s) => Ok(Value::Bool(pattern.is_match(&s))),
            other => Err(EvalError::TypeMismatch {
                op: "=~",
                lhs: other.kind(),
                rhs: "string",
            }),
        },
        Expr::And(lhs, rhs) => {
            if !eval_bool(lhs, scope)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_bool(rhs, scope)?))
        }
        Expr::Or(lhs, rhs) => {
            if eval_bool(lhs, scope)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_bool(rhs, scope)?))
        }
        Expr::Not(inner) => Ok(Value::Bool(!eval_bool(inner, scope)?)),
    }
}

fn eval_bool(expr: &Expr, scope: &dyn Scope) -> Result<bool, EvalError> {
    match eval(expr, scope)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::NotBoolean(other.kind())),
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, EvalError> {
    let ordering = match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) if matches!(op, CmpOp::Eq | CmpOp::Ne) => {
            return Ok(match op {
                CmpOp::Eq => a == b,
                _ => a != b,
            });
        }
        _ => None,
    };
    let ordering = ordering.ok_or(EvalError::TypeMismatch {
        op: op.as_str(),
        lhs: lhs.kind(),
        rhs: rhs.kind(),
    })?;
    Ok(match op {
        CmpOp::Eq => ordering.is_eq(),
        CmpOp::Ne => !ordering.is_eq(),
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
    })
}

/// A parsed rule condition.
#[derive(Debug, Clone)]
pub struct Condition {
    raw: String,
    expr: Expr,
}

impl Condition {
    /// Parse a condition expression. Regex patterns are compiled here, so
    /// a bad pattern surfaces at rule load time, not mid-run.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        if let Some(extra) = parser.peek() {
            return Err(ParseError::UnexpectedToken(extra.describe()));
        }
        Ok(Self {
            raw: input.to_string(),
            expr,
        })
    }

    /// Evaluate against a field scope. The expression must produce a
    /// boolean.
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<bool, EvalError> {
        eval_bool(&self.expr, scope)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn num(s: &str) -> Value {
        Value::Num(s.parse().unwrap())
    }

    #[test]
    fn numeric_comparisons() {
        let s = scope(&[("amount", num("-42.17"))]);
        assert!(Condition::parse("amount < 0").unwrap().evaluate(&s).unwrap());
        assert!(!Condition::parse("amount >= 0").unwrap().evaluate(&s).unwrap());
        assert!(Condition::parse("amount == -42.17")
            .unwrap()
            .evaluate(&s)
            .unwrap());
        // Scale does not matter for equality.
        assert!(Condition::parse("amount == -42.170")
            .unwrap()
            .evaluate(&s)
            .unwrap());
    }

    #[test]
    fn string_equality_and_regex() {
        let s = scope(&[(
            "operation_type",
            Value::Str("RETRAIT AU DISTRIBUTEUR PARIS".to_string()),
        )]);
        assert!(
            Condition::parse(r#"operation_type =~ "RETRAIT AU DISTRIBUTEUR.*""#)
                .unwrap()
                .evaluate(&s)
                .unwrap()
        );
        assert!(
            !Condition::parse(r#"operation_type == "RETRAIT AU DISTRIBUTEUR""#)
                .unwrap()
                .evaluate(&s)
                .unwrap()
        );
    }

    #[test]
    fn boolean_combinators_and_precedence() {
        let s = scope(&[
            ("amount", num("-10")),
            ("description", Value::Str("SNCF PARIS".to_string())),
        ]);
        let cond =
            Condition::parse(r#"amount < 0 and description =~ "SNCF" or amount > 100"#).unwrap();
        assert!(cond.evaluate(&s).unwrap());

        // `not` applies to the whole comparison that follows it.
        let cond = Condition::parse("not amount > 0").unwrap();
        assert!(cond.evaluate(&s).unwrap());

        let cond = Condition::parse(r#"not (amount < 0 and description == "SNCF PARIS")"#).unwrap();
        assert!(!cond.evaluate(&s).unwrap());
    }

    #[test]
    fn undefined_field_is_an_error() {
        let s = scope(&[]);
        let cond = Condition::parse("missing == 1").unwrap();
        match cond.evaluate(&s) {
            Err(EvalError::UndefinedField(field)) => assert_eq!(field, "missing"),
            other => panic!("expected undefined-field error, got {:?}", other),
        }
    }

    #[test]
    fn mixed_kind_comparison_is_an_error() {
        let s = scope(&[("description", Value::Str("x".to_string()))]);
        let cond = Condition::parse("description < 3").unwrap();
        assert!(matches!(
            cond.evaluate(&s),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let s = scope(&[("description", Value::Str("x".to_string()))]);
        let cond = Condition::parse("description").unwrap();
        assert!(matches!(cond.evaluate(&s), Err(EvalError::NotBoolean(_))));
    }

    #[test]
    fn invalid_regex_fails_at_parse_time() {
        assert!(matches!(
            Condition::parse(r#"description =~ "[unclosed""#),
            Err(ParseError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn trailing_tokens_rejected() {
        assert!(matches!(
            Condition::parse("amount < 0 amount"),
            Err(ParseError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn quoted_strings_with_escapes() {
        let s = scope(&[("description", Value::Str("l'atelier".to_string()))]);
        let cond = Condition::parse(r#"description == 'l\'atelier'"#).unwrap();
        assert!(cond.evaluate(&s).unwrap());
    }
}
