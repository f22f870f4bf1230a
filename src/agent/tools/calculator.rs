//! Arithmetic for the `calculator` tool.
//!
//! Input is checked against a character allow-list and then evaluated by a
//! small recursive-descent parser that only knows numbers, parentheses and
//! `+ - * / % **`. There is no other evaluator behind it.
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '%') unary)*
//! unary := ('+' | '-') unary | power
//! power := atom ('**' unary)?
//! atom  := number | '(' expr ')'
//! ```

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, Tool, ToolContext, ToolError, ToolOutput};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,
    #[error("character {ch:?} at position {position} is not allowed in a calculation")]
    DisallowedCharacter { ch: char, position: usize },
    #[error("invalid expression: {0}")]
    Syntax(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_digit() || ch.is_whitespace() || matches!(ch, '(' | ')' | '+' | '-' | '*' | '/' | '%' | '.')
}

pub fn validate(expression: &str) -> Result<(), CalcError> {
    if let Some((position, ch)) = expression.chars().enumerate().find(|(_, c)| !is_allowed(*c)) {
        return Err(CalcError::DisallowedCharacter { ch, position });
    }
    if expression.trim().is_empty() {
        return Err(CalcError::Empty);
    }
    Ok(())
}

pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    validate(expression)?;
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let value = parser.expr()?;
    if let Some(tok) = parser.peek() {
        return Err(CalcError::Syntax(format!("unexpected {} after end of expression", tok.describe())));
    }
    if !value.is_finite() {
        return Err(CalcError::NonFinite);
    }
    Ok(value)
}

/// Decimal rendering of a result; integral values carry no fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", format_number(*n)),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Percent => "'%'".into(),
            Token::Power => "'**'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| CalcError::Syntax(format!("malformed number '{}'", literal)))?;
                tokens.push(Token::Number(value));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Power);
                i += 2;
            }
            _ => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    other => return Err(CalcError::DisallowedCharacter { ch: other, position: i }),
                });
                i += 1;
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.bump();
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::Percent)) = self.peek() {
            self.bump();
            let rhs = self.unary()?;
            value = match op {
                Token::Star => value * rhs,
                Token::Slash if rhs == 0.0 => return Err(CalcError::DivisionByZero),
                Token::Slash => value / rhs,
                Token::Percent if rhs == 0.0 => return Err(CalcError::ModuloByZero),
                // Floored modulo: the result takes the sign of the divisor.
                _ => value - rhs * (value / rhs).floor(),
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.bump();
                self.nested(|p| p.unary()).map(|v| -v)
            }
            Some(Token::Plus) => {
                self.bump();
                self.nested(|p| p.unary())
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Power) {
            self.bump();
            let exponent = self.nested(|p| p.unary())?;
            if base == 0.0 && exponent < 0.0 {
                return Err(CalcError::DivisionByZero);
            }
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, CalcError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.nested(|p| p.expr())?;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    Some(other) => Err(CalcError::Syntax(format!("expected ')' but found {}", other.describe()))),
                    None => Err(CalcError::Syntax("missing closing ')'".into())),
                }
            }
            Some(other) => Err(CalcError::Syntax(format!("unexpected {}", other.describe()))),
            None => Err(CalcError::Syntax("expression ends unexpectedly".into())),
        }
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<f64, CalcError>) -> Result<f64, CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::Syntax("expression nests too deeply".into()));
        }
        let out = f(self);
        self.depth -= 1;
        out
    }
}

/// Arguments accepted by the calculator tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculatorArgs {
    /// Arithmetic using digits, parentheses and + - * / % ** only, e.g. "22000 + 69300".
    pub expression: String,
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &'static str { "calculator" }

    fn description(&self) -> &'static str {
        "Evaluate an arithmetic expression and return the result as a decimal string."
    }

    fn parameters(&self) -> Value {
        schemars::schema_for!(CalculatorArgs).to_value()
    }

    async fn run(&self, _ctx: ToolContext<'_>, args: Value) -> Result<ToolOutput, ToolError> {
        let args: CalculatorArgs = parse_args(self.name(), args)?;
        let value = evaluate(&args.expression)?;
        let rendered = format_number(value);
        Ok(ToolOutput::text(rendered).with_data(json!({ "expression": args.expression, "result": value })))
    }
}
