//! precedence-climbing expression evaluator
//!
//! Parsing and evaluation are fused: every call walks the token stream once and produces a number. Nothing of the
//! parse is retained, an expression gets re-parsed whenever it is evaluated again.
//!
//! Booleans are `0.0` (false) and `1.0` (true). Any non-zero operand counts as true. Equality compares with a
//! tolerance of [EPSILON]. Division by zero is left to IEEE semantics and yields infinity or NaN.
use crate::data_node::LookupError;
use crate::token::{Operator, Token, TokenError, Tokenizer};

/// Tolerance used by `==` and `!=`
pub const EPSILON: f64 = 0.0001;

/// Brackets and prefix operators deeper than this are rejected
pub const MAX_DEPTH: usize = 64;

/// Source of identifier values during evaluation
pub trait Identifiers {
    fn lookup(&self, name: &str) -> Result<f64, LookupError>;
}

// blanket impl for Fn
impl<F> Identifiers for F
where
    F: Fn(&str) -> Result<f64, LookupError>,
{
    fn lookup(&self, name: &str) -> Result<f64, LookupError> {
        self(name)
    }
}

/// Stand-in for every identifier while only checking syntax
#[derive(Debug, Clone, Copy, Default)]
pub struct Placeholder;

impl Identifiers for Placeholder {
    fn lookup(&self, _name: &str) -> Result<f64, LookupError> {
        Ok(1.0)
    }
}

/// How identifiers are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Syntax check only. Identifiers evaluate to `1.0`, nothing is looked up.
    Validate,
    /// Identifiers are resolved for real
    Execute,
}

/// Check the syntax of an expression without touching any state
pub fn validate(expression: &str) -> Result<(), ExpressionError> {
    evaluate_with(expression, &Placeholder, Mode::Validate).map(|_| ())
}

/// Evaluate an expression, resolving identifiers through `identifiers`
pub fn evaluate(expression: &str, identifiers: &dyn Identifiers) -> Result<f64, ExpressionError> {
    evaluate_with(expression, identifiers, Mode::Execute)
}

pub fn evaluate_with(
    expression: &str,
    identifiers: &dyn Identifiers,
    mode: Mode,
) -> Result<f64, ExpressionError> {
    let mut parser = Parser {
        tokens: Tokenizer::new(expression),
        identifiers: match mode {
            Mode::Validate => &Placeholder,
            Mode::Execute => identifiers,
        },
        depth: 0,
    };

    let value = parser.statement(0)?;

    match parser.tokens.next_token().map_err(|e| parser.token_error(e))? {
        None => Ok(value),
        Some(token) => Err(parser.syntax(format!("unexpected {}", describe(&token)))),
    }
}

/// Parser state for a single evaluation
///
/// Every nested evaluation gets its own instance, there is no shared cursor.
struct Parser<'s, 'i> {
    tokens: Tokenizer<'s>,
    identifiers: &'i dyn Identifiers,
    /// Open brackets and pending prefix operators
    depth: usize,
}

impl<'s, 'i> Parser<'s, 'i> {
    /// Parse operands and binary operators binding at least as tight as `min_precedence`
    ///
    /// A closing bracket or the end of input is left in the token stream for the caller.
    fn statement(&mut self, min_precedence: u8) -> Result<f64, ExpressionError> {
        let mut lhs = self.simple_statement()?;

        loop {
            let next = self.tokens.peek().map_err(|e| self.token_error(e))?;
            let operator = match next {
                None | Some(Token::CloseParen) => break,
                Some(Token::Operator(op)) => op,
                Some(token) => {
                    let message = format!("expected operator, found {}", describe(&token));
                    return Err(self.syntax(message));
                }
            };

            let Some(precedence) = operator.precedence() else {
                return Err(self.syntax(format!("'{operator}' is not a binary operator")));
            };
            if precedence < min_precedence {
                break;
            }

            self.tokens.next_token().map_err(|e| self.token_error(e))?;
            let rhs = self.statement(precedence + 1)?;
            lhs = apply(operator, lhs, rhs);
        }

        Ok(lhs)
    }

    /// A bracketed sub-expression, a literal, a prefix operator or an identifier
    fn simple_statement(&mut self) -> Result<f64, ExpressionError> {
        let token = self.tokens.next_token().map_err(|e| self.token_error(e))?;

        match token {
            Some(Token::Value(value)) => Ok(value),
            Some(Token::OpenParen) => self.nested(|parser| {
                let value = parser.statement(0)?;
                match parser.tokens.next_token().map_err(|e| parser.token_error(e))? {
                    Some(Token::CloseParen) => Ok(value),
                    _ => Err(parser.syntax("expected ')'".into())),
                }
            }),
            Some(Token::Operator(Operator::Subtract)) => {
                self.nested(|parser| Ok(-parser.simple_statement()?))
            }
            Some(Token::Operator(Operator::Not)) => {
                self.nested(|parser| Ok(truth(parser.simple_statement()? == 0.0)))
            }
            Some(Token::Identifier("true")) => Ok(1.0),
            Some(Token::Identifier("false")) => Ok(0.0),
            Some(Token::Identifier(name)) => self
                .identifiers
                .lookup(name)
                .map_err(|source| ExpressionError::Lookup {
                    expression: self.tokens.source().to_string(),
                    source,
                }),
            Some(token) => Err(self.syntax(format!("unexpected {}", describe(&token)))),
            None => Err(self.syntax("unexpected end of expression".into())),
        }
    }

    /// Run `parse` one level deeper, failing instead of exhausting the stack
    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<f64, ExpressionError>,
    ) -> Result<f64, ExpressionError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.syntax("expression nested too deeply".into()));
        }

        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn syntax(&self, message: String) -> ExpressionError {
        ExpressionError::Syntax {
            expression: self.tokens.source().to_string(),
            offset: self.tokens.consumed(),
            message,
        }
    }

    fn token_error(&self, error: TokenError) -> ExpressionError {
        ExpressionError::Syntax {
            expression: self.tokens.source().to_string(),
            offset: error.offset(),
            message: error.to_string(),
        }
    }
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn apply(operator: Operator, lhs: f64, rhs: f64) -> f64 {
    use Operator::*;
    match operator {
        Or => truth(lhs != 0.0 || rhs != 0.0),
        And => truth(lhs != 0.0 && rhs != 0.0),
        Less => truth(lhs < rhs),
        Greater => truth(lhs > rhs),
        LessEqual => truth(lhs <= rhs),
        GreaterEqual => truth(lhs >= rhs),
        Equal => truth((lhs - rhs).abs() < EPSILON),
        NotEqual => truth((lhs - rhs).abs() >= EPSILON),
        Add => lhs + rhs,
        Subtract => lhs - rhs,
        Multiply => lhs * rhs,
        Divide => lhs / rhs,
        Not => unreachable!("prefix operator applied as binary"),
    }
}

fn describe(token: &Token<'_>) -> String {
    match token {
        Token::Identifier(name) => format!("identifier '{name}'"),
        Token::Value(value) => format!("value {value}"),
        Token::Operator(op) => format!("operator '{op}'"),
        Token::OpenParen => "'('".into(),
        Token::CloseParen => "')'".into(),
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// Malformed expression, rendered with a `*` marker below the position where parsing stopped
    #[error("{}", render_caret(.message, .expression, *.offset))]
    Syntax {
        expression: String,
        offset: usize,
        message: String,
    },
    #[error("in '{expression}': {source}")]
    Lookup {
        expression: String,
        #[source]
        source: LookupError,
    },
}

/// Message, the expression, and a `*` under the character where parsing stopped
fn render_caret(message: &str, expression: &str, offset: usize) -> String {
    let column = expression
        .get(..offset)
        .map(|consumed| consumed.chars().count())
        .unwrap_or(offset);
    format!("{message}\n  {expression}\n  {}*", " ".repeat(column))
}

impl ExpressionError {
    /// Lookup failure that interrupted evaluation, if any
    pub fn lookup_error(&self) -> Option<&LookupError> {
        match self {
            ExpressionError::Lookup { source, .. } => Some(source),
            ExpressionError::Syntax { .. } => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    fn eval(expression: &str) -> f64 {
        evaluate(expression, &Placeholder).expect("must evaluate")
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("1 || 0 && 0"), 1.0);
        assert_eq!(eval("1 + 2 < 2 * 2"), 1.0);
    }

    #[test]
    fn left_associative() {
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("16 / 4 / 2"), 2.0);
    }

    #[test]
    fn prefix_operators() {
        assert_eq!(eval("-2 * 3"), -6.0);
        assert_eq!(eval("--2"), 2.0);
        assert_eq!(eval("!0"), 1.0);
        assert_eq!(eval("!(1 && 1)"), 0.0);
        assert_eq!(eval("4 - -1"), 5.0);
    }

    #[test]
    fn epsilon_equality() {
        assert_eq!(eval("0.30000001 == 0.3"), 1.0);
        assert_eq!(eval("0.5 == 0.3"), 0.0);
        assert_eq!(eval("0.5 != 0.3"), 1.0);
    }

    #[test]
    fn division_by_zero_is_not_special() {
        assert_eq!(eval("1 / 0"), f64::INFINITY);
        assert!(eval("0 / 0").is_nan());
    }

    #[test]
    fn keywords() {
        assert_eq!(eval("true && !false"), 1.0);
    }

    #[test]
    fn identifiers_are_resolved() {
        let lookup = |name: &str| match name {
            "base" => Ok(10.0),
            "@orbit/altitude" => Ok(2.5),
            other => Err(LookupError::Unknown(other.to_string())),
        };
        assert_eq!(evaluate("base * @orbit/altitude", &lookup), Ok(25.0));
        assert_eq!(
            evaluate("base + nope", &lookup)
                .unwrap_err()
                .lookup_error()
                .cloned(),
            Some(LookupError::Unknown("nope".into()))
        );
    }

    #[test]
    fn validate_mode_never_looks_up() {
        let calls = Cell::new(0);
        let lookup = |_: &str| -> Result<f64, LookupError> {
            calls.set(calls.get() + 1);
            Ok(3.0)
        };

        for _ in 0..2 {
            assert_eq!(evaluate_with("a + b * c", &lookup, Mode::Validate), Ok(2.0));
            assert!(evaluate_with("a + * c", &lookup, Mode::Validate).is_err());
        }
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn syntax_errors() {
        for expression in ["", "1 +", "(1 + 2", "1 2", "1 + )", "a !b", "* 2"] {
            assert!(
                matches!(validate(expression), Err(ExpressionError::Syntax { .. })),
                "{expression:?} must fail"
            );
        }
    }

    #[test]
    fn caret_marks_failure_offset() {
        let error = validate("1 + # 2").unwrap_err();
        insta::assert_snapshot!(error.to_string(), @r"
        unexpected character '#'
          1 + # 2
              *
        ");
    }

    #[test]
    fn deep_nesting_fails_cleanly() {
        let shallow = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(validate(&shallow), Ok(()));

        let brackets = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let prefixes = format!("{}1", "-!".repeat(100_000));
        for expression in [brackets, prefixes] {
            let error = validate(&expression).unwrap_err();
            let ExpressionError::Syntax { message, .. } = error else {
                panic!("expected a syntax error, got {error:?}");
            };
            assert_eq!(message, "expression nested too deeply");
        }
    }

    #[test]
    fn caret_counts_characters() {
        assert_eq!(render_caret("oops", "\u{e4} + 1", 2), "oops\n  \u{e4} + 1\n   *");

        // non-breaking spaces are two bytes each
        let error = validate("\u{a0}\u{a0}#").unwrap_err();
        assert_eq!(error.to_string().lines().last(), Some("    *"));
    }

    #[test]
    fn caret_after_consumed_input() {
        let error = validate("(1 + 2").unwrap_err();
        insta::assert_snapshot!(error.to_string(), @r"
        expected ')'
          (1 + 2
                *
        ");
    }
}
