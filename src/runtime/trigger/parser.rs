/// Recursive-descent parser producing the trigger expression tree.
///
/// ```text
/// or      := and ( "||" and )*
/// and     := compare ( "&&" compare )*
/// compare := unary ( ( ">" | "<" | ">=" | "<=" | "===" | "!==" ) unary )*
/// unary   := "!" unary | "-" unary | primary
/// primary := number | string | true | false | null | path | "(" or ")"
/// path    := "$input" ( "." name | "[" ( integer | string ) "]" )*
/// ```

use super::lexer::Token;
use crate::error::TriggerError;
use serde_json::Value;

/// Parentheses and unary operators nest at most this deep.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<PathSegment>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    StrictEq,
    StrictNe,
}

pub fn parse(expression: &str, tokens: &[Token]) -> Result<Expr, TriggerError> {
    if tokens.is_empty() {
        return Err(TriggerError::invalid(expression, "expression is empty"));
    }

    let mut parser = Parser {
        expression,
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;

    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected token {token:?}")));
    }
    Ok(expr)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, reason: impl Into<String>) -> TriggerError {
        TriggerError::invalid(self.expression, reason)
    }

    fn descend(&mut self) -> Result<(), TriggerError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nests too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, TriggerError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, TriggerError> {
        let mut left = self.parse_compare()?;
        while self.eat(&Token::And) {
            let right = self.parse_compare()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> Result<Expr, TriggerError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Ge) => CompareOp::Ge,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::StrictEq) => CompareOp::StrictEq,
                Some(Token::StrictNe) => CompareOp::StrictNe,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, TriggerError> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(operand)));
        }
        if self.eat(&Token::Minus) {
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Negate(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, TriggerError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(*n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s.clone()))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Input) => self.parse_path(),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                if !self.eat(&Token::RParen) {
                    return Err(self.error("missing closing parenthesis"));
                }
                Ok(inner)
            }
            Some(Token::Ident(name)) => Err(self.error(format!(
                "unknown identifier '{name}'; only $input is available"
            ))),
            Some(token) => Err(self.error(format!("unexpected token {token:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_path(&mut self) -> Result<Expr, TriggerError> {
        let mut segments = Vec::new();
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.next() {
                    Some(Token::Ident(name)) => name.clone(),
                    Some(Token::True) => "true".to_string(),
                    Some(Token::False) => "false".to_string(),
                    Some(Token::Null) => "null".to_string(),
                    _ => return Err(self.error("expected a property name after '.'")),
                };
                segments.push(PathSegment::Key(name));
            } else if self.eat(&Token::LBracket) {
                let segment = match self.next() {
                    Some(Token::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
                        PathSegment::Index(*n as usize)
                    }
                    Some(Token::Str(key)) => PathSegment::Key(key.clone()),
                    _ => return Err(self.error("expected an index or quoted key inside '[]'")),
                };
                if !self.eat(&Token::RBracket) {
                    return Err(self.error("missing closing bracket"));
                }
                segments.push(segment);
            } else {
                return Ok(Expr::Path(segments));
            }
        }
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_str(expression: &str) -> Result<Expr, TriggerError> {
        parse(expression, &tokenize(expression)?)
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_str("true || false && false").unwrap();
        assert!(matches!(expr, Expr::Or(_, right) if matches!(*right, Expr::And(_, _))));
    }

    #[test]
    fn parses_nested_paths() {
        let expr = parse_str("$input.sensor.value").unwrap();
        assert_eq!(
            expr,
            Expr::Path(vec![
                PathSegment::Key("sensor".into()),
                PathSegment::Key("value".into())
            ])
        );

        let expr = parse_str("$input.readings[2]['raw value']").unwrap();
        assert_eq!(
            expr,
            Expr::Path(vec![
                PathSegment::Key("readings".into()),
                PathSegment::Index(2),
                PathSegment::Key("raw value".into()),
            ])
        );
    }

    #[test]
    fn unknown_identifiers_are_rejected() {
        let err = parse_str("process.exit()").unwrap_err();
        assert!(err.to_string().contains("unknown identifier 'process'"));
    }

    #[test]
    fn calls_are_not_part_of_the_grammar() {
        assert!(parse_str("$input.fn()").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_str("").is_err());
        assert!(parse_str("(1 > 2").is_err());
        assert!(parse_str("1 >").is_err());
        assert!(parse_str("1 2").is_err());
        assert!(parse_str("$input.").is_err());
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let expression = format!("{}true{}", "(".repeat(100), ")".repeat(100));
        assert!(parse_str(&expression).is_err());
    }
}
