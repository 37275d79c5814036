//! This module defines the expression data model shared by the reader, the
//! evaluator and the printer. The main enum, [`Expr`], is both the code and
//! the data of the language: lists double as calls and as values, and which
//! interpretation applies is only decided at evaluation time.
//!
//! Atoms (numbers, symbols, strings) are flattened into [`Expr`] directly;
//! [`Expr::is_atom`] recovers the category. Helper functions such as
//! [`val`], [`sym`] and [`nil`] keep AST construction short in code and
//! tests.

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::OperationFn;
use crate::number::Number;
use num_bigint::BigInt;
use std::rc::Rc;
use std::sync::Arc;

/// The reserved trailing parameter that captures surplus arguments
pub const REST_PARAM: &str = "@";

/// The distinguished false symbol
pub const FALSE: &str = "F";

/// The distinguished true symbol
pub const TRUE: &str = "T";

/// Reader sigils and the symbols they expand to
pub(crate) const QUOTE_SIGILS: [(char, &str); 4] = [
    ('\'', "quote"),
    ('`', "template"),
    ('.', "unquote"),
    (',', "unquote-splice"),
];

/// Sigil for a quote-family head symbol, if it is one
pub(crate) fn sigil_for(head: &str) -> Option<char> {
    QUOTE_SIGILS
        .iter()
        .find(|(_, name)| *name == head)
        .map(|(sigil, _)| *sigil)
}

/// Core expression type
///
/// To build an AST, use the helper functions:
/// - `val(42)` for numbers, `val("text")` for strings, `sym("name")` for symbols
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Expr {
    /// Integer, rational or float
    Number(Number),
    /// Identifier, also used as data (`T`, `F`, type names)
    Symbol(String),
    /// String literal, stored with its source escapes intact
    String(String),
    /// Ordered, possibly empty sequence
    List(Vec<Expr>),
    /// Callable value
    Function(Function),
}

/// Strict bodies receive every argument already forced, in parameter order.
pub type LazyFn = fn(&Environment) -> Result<Expr, Error>;

/// Closure bodies (`fn` values and host callbacks) receive the bound frame.
pub type NativeFn = dyn Fn(&Environment) -> Result<Expr, Error>;

/// How a function body gets at its arguments
#[derive(Clone)]
pub enum Body {
    /// Every parameter is forced left to right (rest arguments are evaluated
    /// in the caller's environment) before the operation runs.
    Strict(Arc<OperationFn>),
    /// The body receives the bound frame and forces only what it needs.
    Lazy(LazyFn),
    /// Like `Lazy`, for closures capturing state.
    Native(Rc<NativeFn>),
}

/// Whether a callable may assume its arguments are already forced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Strict,
    Lazy,
}

/// A callable value: parameter list, body and defining environment
///
/// Built-ins carry no defining environment; their frames are parented
/// directly on the caller.
#[derive(Clone)]
pub struct Function {
    pub(crate) params: Rc<[String]>,
    pub(crate) body: Body,
    pub(crate) env: Option<Environment>,
}

impl Function {
    pub(crate) fn new(params: Vec<String>, body: Body, env: Option<Environment>) -> Self {
        Function {
            params: params.into(),
            body,
            env,
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// True when the last parameter is the rest marker `@`
    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|p| p == REST_PARAM)
    }

    pub fn strictness(&self) -> Strictness {
        match self.body {
            Body::Strict(_) => Strictness::Strict,
            Body::Lazy(_) | Body::Native(_) => Strictness::Lazy,
        }
    }

    fn same_body(&self, other: &Function) -> bool {
        match (&self.body, &other.body) {
            (Body::Strict(a), Body::Strict(b)) => Arc::ptr_eq(a, b),
            (Body::Lazy(a), Body::Lazy(b)) => std::ptr::fn_addr_eq(*a, *b),
            (Body::Native(a), Body::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Function {
    /// Functions are equal only when they share the same body
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.same_body(other)
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.body {
            Body::Strict(_) => "strict",
            Body::Lazy(_) => "lazy",
            Body::Native(_) => "native",
        };
        write!(f, "Function({kind}, params={:?})", self.params)
    }
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "Number({n})"),
            Expr::Symbol(s) => write!(f, "Symbol({s})"),
            Expr::String(s) => write!(f, "String(\"{s}\")"),
            Expr::List(list) => {
                write!(f, "List(")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Expr::Function(func) => write!(f, "{func:?}"),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::Number(a), Expr::Number(b)) => a == b,
            (Expr::Symbol(a), Expr::Symbol(b)) | (Expr::String(a), Expr::String(b)) => a == b,
            (Expr::List(a), Expr::List(b)) => a == b,
            (Expr::Function(a), Expr::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", crate::printer::print(self))
    }
}

impl Expr {
    /// Type name as reported by `??` and used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Expr::Number(n) => n.type_name(),
            Expr::Symbol(_) => "Sym",
            Expr::String(_) => "Str",
            Expr::List(_) => "Lst",
            Expr::Function(_) => "Fun",
        }
    }

    pub fn is_atom(&self) -> bool {
        matches!(self, Expr::Number(_) | Expr::Symbol(_) | Expr::String(_))
    }

    /// Check if an expression is the empty list
    pub fn is_nil(&self) -> bool {
        matches!(self, Expr::List(list) if list.is_empty())
    }

    /// Check if an expression is the false symbol `F`
    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Symbol(s) if s == FALSE)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Expr::Number(n) => n.as_int(),
            _ => None,
        }
    }

    /// `T` or `F`
    pub fn boolean(value: bool) -> Expr {
        Expr::Symbol(if value { TRUE } else { FALSE }.to_owned())
    }
}

// From trait implementations for Expr - enables .into() conversion
impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::String(s.to_owned())
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::String(s)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::boolean(b)
    }
}

impl From<Number> for Expr {
    fn from(n: Number) -> Self {
        Expr::Number(n)
    }
}

impl From<BigInt> for Expr {
    fn from(n: BigInt) -> Self {
        Expr::Number(Number::Int(n))
    }
}

impl From<Function> for Expr {
    fn from(f: Function) -> Self {
        Expr::Function(f)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Expr {
            fn from(n: $int_type) -> Self {
                Expr::Number(Number::Int(BigInt::from(n)))
            }
        }
    };
}

impl_from_integer!(i32);
impl_from_integer!(i64);
impl_from_integer!(u32);
impl_from_integer!(usize);

impl<T: Into<Expr>> From<Vec<T>> for Expr {
    fn from(v: Vec<T>) -> Self {
        Expr::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Expr>, const N: usize> From<[T; N]> for Expr {
    fn from(arr: [T; N]) -> Self {
        Expr::List(arr.into_iter().map(Into::into).collect())
    }
}

///   Helper function for creating symbols - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Expr {
    Expr::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating expressions from Rust values
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Expr>>(value: T) -> Expr {
    value.into()
}

/// Helper function for creating the empty list
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Expr {
    Expr::List(vec![])
}

#[cfg(test)]
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        let test_cases = vec![
            (val(42), Expr::Number(Number::from(42))),
            (val(-17), Expr::Number(Number::from(-17))),
            (val(255u32), Expr::Number(Number::from(255))),
            (val(i64::MAX), Expr::Number(Number::from(i64::MAX))),
            (val("hello"), Expr::String("hello".to_owned())),
            (val(""), Expr::String(String::new())),
            (sym("foo-bar?"), Expr::Symbol("foo-bar?".to_owned())),
            (sym(String::from("@")), Expr::Symbol("@".to_owned())),
            (nil(), Expr::List(vec![])),
            (
                val([1, 2, 3]),
                Expr::List(vec![val(1), val(2), val(3)]),
            ),
            (
                val(vec![sym("op"), val(42), val("result")]),
                Expr::List(vec![
                    Expr::Symbol("op".to_owned()),
                    Expr::Number(Number::from(42)),
                    Expr::String("result".to_owned()),
                ]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_type_names_and_predicates() {
        let test_cases = vec![
            (val(1), "Int", true),
            (Expr::Number(Number::parse("1/2").unwrap_or(Number::from(0))), "Rat", true),
            (Expr::Number(Number::parse("1.5").unwrap_or(Number::from(0))), "Flo", true),
            (sym("x"), "Sym", true),
            (val("x"), "Str", true),
            (nil(), "Lst", false),
        ];

        for (i, (expr, type_name, atom)) in test_cases.iter().enumerate() {
            assert_eq!(expr.type_name(), *type_name, "case #{}", i + 1);
            assert_eq!(expr.is_atom(), *atom, "case #{}", i + 1);
        }

        assert!(nil().is_nil());
        assert!(!val([1]).is_nil());
        assert!(Expr::boolean(false).is_false());
        assert!(!Expr::boolean(true).is_false());
        assert!(!val("F").is_false());
    }

    #[test]
    fn test_quote_sigils() {
        assert_eq!(sigil_for("quote"), Some('\''));
        assert_eq!(sigil_for("template"), Some('`'));
        assert_eq!(sigil_for("unquote"), Some('.'));
        assert_eq!(sigil_for("unquote-splice"), Some(','));
        assert_eq!(sigil_for("list"), None);
    }

    #[test]
    fn test_function_equality_is_identity() {
        fn body(_: &Environment) -> Result<Expr, Error> {
            Ok(nil())
        }
        fn other(_: &Environment) -> Result<Expr, Error> {
            Ok(val(1))
        }
        let f = Function::new(vec!["a".into()], Body::Lazy(body), None);
        let g = Function::new(vec!["a".into()], Body::Lazy(other), None);
        assert_eq!(val(f.clone()), val(f.clone()));
        assert_ne!(val(f.clone()), val(g));
        assert_eq!(f.strictness(), Strictness::Lazy);
        assert!(!f.is_variadic());

        let rest = Function::new(vec!["a".into(), REST_PARAM.into()], Body::Lazy(body), None);
        assert!(rest.is_variadic());
    }
}
