//! expression tokenizer
//!
//! Classification happens on the leading character of the remaining input:
//! - digit: numeric literal (`12`, `0.5`), no exponent form
//! - letter, `@` or `$`: identifier, optionally a `/` separated path
//! - `(` / `)`: brackets
//! - one of `|&+-!<>=*/`: operator, two characters where possible
//!
//! Whitespace in front of a token is skipped.

/// A single lexical element of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'s> {
    Identifier(&'s str),
    Value(f64),
    Operator(Operator),
    OpenParen,
    CloseParen,
}

/// Every operator symbol the tokenizer knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Or,
    And,
    Not,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    /// Binding strength of a binary operator, higher binds tighter
    ///
    /// `None` for operators that only exist in prefix form.
    pub fn precedence(self) -> Option<u8> {
        use Operator::*;
        match self {
            Or => Some(1),
            And => Some(2),
            Less | Greater | LessEqual | GreaterEqual | Equal | NotEqual => Some(3),
            Add | Subtract => Some(4),
            Multiply | Divide => Some(5),
            Not => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        use Operator::*;
        match self {
            Or => "||",
            And => "&&",
            Not => "!",
            Less => "<",
            Greater => ">",
            LessEqual => "<=",
            GreaterEqual => ">=",
            Equal => "==",
            NotEqual => "!=",
            Add => "+",
            Subtract => "-",
            Multiply => "*",
            Divide => "/",
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        use Operator::*;
        Some(match symbol {
            "||" => Or,
            "&&" => And,
            "!" => Not,
            "<" => Less,
            ">" => Greater,
            "<=" => LessEqual,
            ">=" => GreaterEqual,
            "==" => Equal,
            "!=" => NotEqual,
            "+" => Add,
            "-" => Subtract,
            "*" => Multiply,
            "/" => Divide,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

const OPERATOR_CHARS: &str = "|&+-!<>=*/";

fn is_boundary(c: char) -> bool {
    c.is_whitespace() || c == '(' || c == ')' || OPERATOR_CHARS.contains(c)
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Cursor over the remaining input of one expression
#[derive(Debug, Clone)]
pub struct Tokenizer<'s> {
    source: &'s str,
    position: usize,
}

impl<'s> Tokenizer<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn source(&self) -> &'s str {
        self.source
    }

    /// Number of bytes consumed so far
    pub fn consumed(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> &'s str {
        &self.source[self.position..]
    }

    /// Look at the next token without consuming it
    pub fn peek(&self) -> Result<Option<Token<'s>>, TokenError> {
        self.clone().next_token()
    }

    /// Consume and return the next token, `None` once the input is exhausted
    pub fn next_token(&mut self) -> Result<Option<Token<'s>>, TokenError> {
        let rest = self.remaining();
        let trimmed = rest.trim_start();
        self.position += rest.len() - trimmed.len();

        let Some(first) = trimmed.chars().next() else {
            return Ok(None);
        };

        let (token, length) = match first {
            '0'..='9' => self.number(trimmed)?,
            '(' => (Token::OpenParen, 1),
            ')' => (Token::CloseParen, 1),
            c if c.is_ascii_alphabetic() || c == '@' || c == '$' => {
                let length = identifier_length(trimmed);
                if length == 1 && !c.is_ascii_alphabetic() {
                    return Err(TokenError::EmptyIdentifier {
                        offset: self.position,
                    });
                }
                (Token::Identifier(&trimmed[..length]), length)
            }
            c if OPERATOR_CHARS.contains(c) => {
                let operator = trimmed
                    .get(..2)
                    .and_then(Operator::from_symbol)
                    .map(|op| (op, 2))
                    .or_else(|| trimmed.get(..1).and_then(Operator::from_symbol).map(|op| (op, 1)));
                match operator {
                    Some((op, length)) => (Token::Operator(op), length),
                    None => {
                        return Err(TokenError::UnexpectedCharacter {
                            character: c,
                            offset: self.position,
                        })
                    }
                }
            }
            c => {
                return Err(TokenError::UnexpectedCharacter {
                    character: c,
                    offset: self.position,
                })
            }
        };

        self.position += length;
        tracing::trace!(?token, "token");
        Ok(Some(token))
    }

    fn number(&self, input: &'s str) -> Result<(Token<'s>, usize), TokenError> {
        let length = input.find(is_boundary).unwrap_or(input.len());
        let literal = &input[..length];

        let well_formed = literal.chars().all(|c| c.is_ascii_digit() || c == '.')
            && literal.matches('.').count() <= 1
            && !literal.ends_with('.');

        match literal.parse::<f64>() {
            Ok(value) if well_formed => Ok((Token::Value(value), length)),
            _ => Err(TokenError::InvalidNumber {
                literal: literal.to_string(),
                offset: self.position,
            }),
        }
    }
}

/// Length of an identifier, including an optional `@`/`$` marker and `/` path separators
fn identifier_length(input: &str) -> usize {
    let is_path = input.starts_with('@');
    let mut chars = input.char_indices().peekable();
    let mut end = 0;

    if let Some((_, '@' | '$')) = chars.peek() {
        chars.next();
        end = 1;
    }

    for (index, c) in chars {
        let accepted = is_identifier_char(c) || (is_path && (c == '/' || c == '.'));
        if !accepted {
            break;
        }
        end = index + c.len_utf8();
    }

    end
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("unexpected character '{character}'")]
    UnexpectedCharacter { character: char, offset: usize },
    #[error("invalid numeric literal '{literal}'")]
    InvalidNumber { literal: String, offset: usize },
    #[error("identifier expected after marker")]
    EmptyIdentifier { offset: usize },
}

impl TokenError {
    /// Byte offset into the expression where the offending token starts
    pub fn offset(&self) -> usize {
        match self {
            TokenError::UnexpectedCharacter { offset, .. }
            | TokenError::InvalidNumber { offset, .. }
            | TokenError::EmptyIdentifier { offset } => *offset,
        }
    }
}
