//! Arithmetic calculator tool.

use async_trait::async_trait;
use tracing::debug;

use react_agent_core::{Tool, ToolArguments, ToolDefinition, ToolExecutionError, ToolParameter};

const ALLOWED_CHARS: &str = "0123456789+-*/.() ";

/// Deepest nesting of parentheses, signs and exponents accepted.
const MAX_DEPTH: usize = 64;

pub struct Calculator {
    definition: ToolDefinition,
}

impl Calculator {
    pub fn new() -> Self {
        Self {
            definition: ToolDefinition::function(
                "calculator",
                "Perform mathematical calculations. Input should be a valid math expression like '2 + 2' or '25 * 4'.",
            )
            .with_parameter(ToolParameter::required("expression", "Arithmetic expression to evaluate")),
        }
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for Calculator {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn call(&self, args: &ToolArguments) -> Result<String, ToolExecutionError> {
        let expression = args.get("expression").map(String::as_str).unwrap_or_default();
        debug!(expression = %expression, "Evaluating");
        let value = evaluate(expression)?;
        Ok(format_number(value))
    }
}

/// Evaluate `+ - * / // ** ( )` over decimal numbers.
pub fn evaluate(expression: &str) -> Result<f64, ToolExecutionError> {
    if let Some(c) = expression.chars().find(|c| !ALLOWED_CHARS.contains(*c)) {
        return Err(ToolExecutionError::InvalidInput(format!("invalid character '{c}' in expression")));
    }

    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(failed("unexpected trailing input"));
    }
    if !value.is_finite() {
        return Err(failed("result is not a finite number"));
    }
    Ok(value)
}

/// Integral results print without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn failed(message: &str) -> ToolExecutionError {
    ToolExecutionError::Failed(format!("Error evaluating expression: {message}"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Pow,
    Slash,
    FloorDiv,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ToolExecutionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let token = match c {
            ' ' => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| failed(&format!("invalid number '{literal}'")))?;
                tokens.push(Token::Num(value));
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if next == Some('*') => {
                i += 1;
                Token::Pow
            }
            '*' => Token::Star,
            '/' if next == Some('/') => {
                i += 1;
                Token::FloorDiv
            }
            '/' => Token::Slash,
            '(' => Token::Open,
            ')' => Token::Close,
            other => return Err(failed(&format!("unexpected '{other}'"))),
        };
        tokens.push(token);
        i += 1;
    }
    Ok(tokens)
}

/// Recursive-descent parser.
///
/// ```text
/// expr  := term (('+' | '-') term)*
/// term  := unary (('*' | '/' | '//') unary)*
/// unary := ('+' | '-') unary | power
/// power := atom ('**' unary)?
/// atom  := number | '(' expr ')'
/// ```
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<f64, ToolExecutionError> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ToolExecutionError> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::FloorDiv)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => value * rhs,
                _ if rhs == 0.0 => return Err(failed("division by zero")),
                Token::Slash => value / rhs,
                _ => (value / rhs).floor(),
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, ToolExecutionError> {
        if self.depth >= MAX_DEPTH {
            return Err(failed("expression nested too deeply"));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, ToolExecutionError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, ToolExecutionError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, ToolExecutionError> {
        match self.bump() {
            Some(Token::Num(value)) => Ok(value),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.bump() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(failed("missing closing parenthesis")),
                }
            }
            Some(_) => Err(failed("unexpected operator")),
            None => Err(failed("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(expression: &str) -> String {
        format_number(evaluate(expression).unwrap())
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(calc("12 * 7"), "84");
        assert_eq!(calc("2 + 2"), "4");
        assert_eq!(calc("25 * 4"), "100");
        assert_eq!(calc("2 + 3 * 4"), "14");
        assert_eq!(calc("(2 + 3) * 4"), "20");
        assert_eq!(calc("7 / 2"), "3.5");
        assert_eq!(calc("7 // 2"), "3");
        assert_eq!(calc("2 ** 10"), "1024");
        assert_eq!(calc("-2 ** 2"), "-4");
        assert_eq!(calc("10 - 4 - 3"), "3");
        assert_eq!(calc("-(3 - 5)"), "2");
        assert_eq!(calc("0.1 * 3"), (0.1f64 * 3.0).to_string());
    }

    #[test]
    fn test_rejects_invalid_characters() {
        let err = evaluate("__import__('os')").unwrap_err();
        assert!(matches!(err, ToolExecutionError::InvalidInput(_)));
        assert!(evaluate("2 % 3").is_err());
    }

    #[test]
    fn test_malformed_expressions() {
        for expression in ["", "2 +", "(1 + 2", "1 2", "1..2", "1 / 0", "*3"] {
            assert!(evaluate(expression).is_err(), "{expression} should fail");
        }
    }

    #[test]
    fn test_deep_nesting_rejected() {
        assert_eq!(calc(&format!("{}1{}", "(".repeat(20), ")".repeat(20))), "1");

        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let signs = format!("{}1", "-".repeat(200_000));
        let powers = vec!["2"; 200_000].join(" ** ");
        for expression in [parens, signs, powers] {
            match evaluate(&expression) {
                Err(ToolExecutionError::Failed(message)) => assert!(message.contains("nested too deeply")),
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_tool_call() {
        let args = ToolArguments::from([("expression".to_string(), "12 * 7".to_string())]);
        assert_eq!(Calculator::new().call(&args).await.unwrap(), "84");
    }
}
