/// Tokenizer for trigger expressions.

use crate::error::TriggerError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    /// The `$input` root, the only bound name
    Input,
    Ident(String),
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Minus,
    Gt,
    Lt,
    Ge,
    Le,
    StrictEq,
    StrictNe,
    And,
    Or,
    Not,
}

pub fn tokenize(expression: &str) -> Result<Vec<Token>, TriggerError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let next = chars.get(pos + 1).copied();
        let after = chars.get(pos + 2).copied();

        match c {
            c if c.is_whitespace() => pos += 1,
            '(' => push(&mut tokens, &mut pos, Token::LParen, 1),
            ')' => push(&mut tokens, &mut pos, Token::RParen, 1),
            '[' => push(&mut tokens, &mut pos, Token::LBracket, 1),
            ']' => push(&mut tokens, &mut pos, Token::RBracket, 1),
            '.' => push(&mut tokens, &mut pos, Token::Dot, 1),
            '-' => push(&mut tokens, &mut pos, Token::Minus, 1),
            '>' if next == Some('=') => push(&mut tokens, &mut pos, Token::Ge, 2),
            '>' => push(&mut tokens, &mut pos, Token::Gt, 1),
            '<' if next == Some('=') => push(&mut tokens, &mut pos, Token::Le, 2),
            '<' => push(&mut tokens, &mut pos, Token::Lt, 1),
            // `==` and `!=` are accepted as strict comparisons
            '=' if next == Some('=') && after == Some('=') => {
                push(&mut tokens, &mut pos, Token::StrictEq, 3)
            }
            '=' if next == Some('=') => push(&mut tokens, &mut pos, Token::StrictEq, 2),
            '=' => return Err(TriggerError::invalid(expression, "assignment is not allowed")),
            '!' if next == Some('=') && after == Some('=') => {
                push(&mut tokens, &mut pos, Token::StrictNe, 3)
            }
            '!' if next == Some('=') => push(&mut tokens, &mut pos, Token::StrictNe, 2),
            '!' => push(&mut tokens, &mut pos, Token::Not, 1),
            '&' if next == Some('&') => push(&mut tokens, &mut pos, Token::And, 2),
            '|' if next == Some('|') => push(&mut tokens, &mut pos, Token::Or, 2),
            '"' | '\'' => {
                let (literal, consumed) = read_string(expression, &chars[pos..])?;
                tokens.push(Token::Str(literal));
                pos += consumed;
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                if pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit() {
                    pos += 1;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
                let text: String = chars[start..pos].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| TriggerError::invalid(expression, format!("bad number '{text}'")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_alphanumeric() || chars[pos] == '_' || chars[pos] == '$')
                {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(match word.as_str() {
                    "$input" => Token::Input,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(TriggerError::invalid(
                    expression,
                    format!("unexpected character '{other}' at position {pos}"),
                ))
            }
        }
    }

    Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, pos: &mut usize, token: Token, width: usize) {
    tokens.push(token);
    *pos += width;
}

/// Read a quoted literal starting at `chars[0]`; returns the text and chars consumed
fn read_string(expression: &str, chars: &[char]) -> Result<(String, usize), TriggerError> {
    let quote = chars[0];
    let mut literal = String::new();
    let mut pos = 1;

    while pos < chars.len() {
        match chars[pos] {
            '\\' => {
                let escaped = chars
                    .get(pos + 1)
                    .ok_or_else(|| TriggerError::invalid(expression, "unterminated escape"))?;
                literal.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                pos += 2;
            }
            c if c == quote => return Ok((literal, pos + 1)),
            c => {
                literal.push(c);
                pos += 1;
            }
        }
    }

    Err(TriggerError::invalid(expression, "unterminated string literal"))
}
