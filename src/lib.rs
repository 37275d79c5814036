//! lispp - a small lazy Lisp
//!
//! This crate provides a self-contained language engine: a reader, an
//! environment/closure model, a call-by-need evaluator, a printer and a
//! numeric tower with exact integers, exact rationals and
//! arbitrary-precision decimal floats.
//!
//! ```text
//! (let sq (fn (x) (* x x)))    ; constant binding
//! (sq 12)                      ; => 144
//! (/ 1 3)                      ; => 1/3
//! (if F (throw "boom") 1)      ; => 1, the untaken branch is never forced
//! '(a .b ,c)                   ; quote-family sugar survives a print/read round trip
//! ```
//!
//! ## Laziness
//!
//! Calling a function never evaluates its arguments up front. Each argument
//! is bound as an unforced thunk holding the argument expression and the
//! caller's environment; the first reference to the parameter forces it and
//! memoizes the result in place. Control flow (`if`, `&&`, `||`, `do`) is
//! therefore made of ordinary functions. Every built-in is annotated as
//! either *strict* (all arguments forced before the Rust body runs) or
//! *lazy* (the body receives the bound frame and decides what to force).
//!
//! ## Host interface
//!
//! A host constructs a root environment once with
//! [`evaluator::create_root_env`], may register extra native functions on
//! it, and then drives the engine with [`reader::read`],
//! [`evaluator::eval`] and [`printer::print`] / [`printer::show`].
//!
//! ## Modules
//!
//! - `number`: Integer/Rational/Float representations, promotion and normalization
//! - `ast`: the expression data model
//! - `reader`: source text to expressions
//! - `evaluator`: environments, bindings and the evaluation loop
//! - `builtinops`: the built-in operator registry
//! - `printer`: plain, display and colorized serialization

use std::fmt;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 256;

/// Default maximum evaluation depth before an `EvalError` is raised
/// instead of exhausting the native stack.
///
/// Each level of a user-defined recursive function costs several nested
/// evaluations (the call, the argument thunk, the body), so this default
/// allows roughly 100 levels of user recursion. It is sized for the 2 MB
/// stack of a spawned thread; hosts running the evaluator on a larger stack
/// should raise it with [`evaluator::set_max_eval_depth`], as the `lispp`
/// binary does.
pub const MAX_EVAL_DEPTH: usize = 512;

/// Significant decimal digits kept by Float arithmetic results
pub const FLOAT_PRECISION: u64 = 50;

/// Categorizes the different kinds of reader errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Token that cannot start or continue a form
    InvalidSyntax,
    /// Input ended before the form was complete (EOF, unterminated string, unclosed bracket)
    Incomplete,
    /// Closing bracket with no open form
    UnexpectedCloser,
    /// Closing bracket that does not match its opener
    MismatchedCloser,
    /// Quote-family sigil with nothing after it
    DanglingSigil,
    /// Nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
}

/// A structured error providing detailed information about a reader failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let prefix_chars = input
            .get(..error_offset.min(input.len()))
            .map_or(0, |prefix| prefix.chars().count());
        let context_start = prefix_chars.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Error type shared by the reader and the evaluator.
///
/// Every variant carries a human-readable message (see [`Error::message`]);
/// the evaluator never recovers from any of them internally.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed source text
    ParseError(ParseError),
    /// Symbol with no visible binding
    UnboundSymbol(String),
    /// Wrong number of arguments for a function
    ArityError {
        name: String,
        expected: usize,
        variadic: bool,
        got: usize,
    },
    /// Wrong expression kind passed to an operator
    TypeError(String),
    /// Index operator or sequence access out of range
    IndexError(String),
    /// Attempt to rebind or mutate a constant binding
    ConstantRebind(String),
    /// Raised explicitly by `throw`
    UserError(String),
    /// Host-level failure (I/O, evaluation depth limit)
    EvalError(String),
}

impl Error {
    /// Create an ArityError for a call to `name`
    pub fn arity_error(name: impl Into<String>, expected: usize, variadic: bool, got: usize) -> Self {
        Error::ArityError {
            name: name.into(),
            expected,
            variadic,
            got,
        }
    }

    /// Create a TypeError naming the offending type(s)
    pub fn invalid_types(lhs: &ast::Expr, rhs: &ast::Expr) -> Self {
        Error::TypeError(format!(
            "invalid types '{}' and '{}'",
            lhs.type_name(),
            rhs.type_name()
        ))
    }

    /// Create a TypeError naming a single offending type
    pub fn invalid_type(value: &ast::Expr) -> Self {
        Error::TypeError(format!("invalid type '{}'", value.type_name()))
    }

    /// The bare message, without kind prefix or parse context
    pub fn message(&self) -> String {
        match self {
            Error::ParseError(e) => e.message.clone(),
            Error::UnboundSymbol(name) => format!("unbound symbol '{name}'"),
            Error::ArityError {
                name,
                expected,
                variadic,
                got,
            } => {
                let plural = if *expected == 1 { "" } else { "s" };
                let at_least = if *variadic { "at least " } else { "" };
                format!("'{name}' expected {at_least}'{expected}' argument{plural}, got '{got}'")
            }
            Error::ConstantRebind(name) => format!("constant binding '{name}'"),
            Error::TypeError(msg)
            | Error::IndexError(msg)
            | Error::UserError(msg)
            | Error::EvalError(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "{}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            other => write!(f, "{}", other.message()),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod number;
pub mod printer;
pub mod reader;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let cases = vec![
            (Error::UnboundSymbol("y".into()), "unbound symbol 'y'"),
            (
                Error::arity_error("f", 2, false, 3),
                "'f' expected '2' arguments, got '3'",
            ),
            (
                Error::arity_error("g", 1, true, 0),
                "'g' expected at least '1' argument, got '0'",
            ),
            (Error::ConstantRebind("x".into()), "constant binding 'x'"),
            (Error::UserError("boom".into()), "boom"),
            (
                Error::ParseError(ParseError::from_message(
                    ParseErrorKind::Incomplete,
                    "unexpected 'EOF'",
                )),
                "unexpected 'EOF'",
            ),
        ];

        for (i, (err, expected)) in cases.iter().enumerate() {
            assert_eq!(err.message(), *expected, "case #{}", i + 1);
            assert_eq!(format!("{err}"), *expected, "case #{}", i + 1);
        }
    }

    #[test]
    fn test_parse_error_context() {
        let input = "(a b c d e f g h i j k l m n o p q r s t u v w x y z ]";
        let err = ParseError::with_context(
            ParseErrorKind::MismatchedCloser,
            "unexpected ']'",
            input,
            input.len() - 1,
            Some("]".into()),
        );
        let context = err.context.clone().unwrap_or_default();
        assert!(context.starts_with("[...]"), "context: {context}");
        assert!(context.ends_with(']'), "context: {context}");

        let shown = format!("{}", Error::ParseError(err));
        assert!(shown.contains("Found: ]"));
        assert!(shown.contains("Context: "));
    }
}
