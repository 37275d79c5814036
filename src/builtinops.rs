//! Built-in operations registry.
//!
//! Every built-in is declared once in [`BUILTIN_OPS`] with its parameter
//! list and an explicit strictness annotation:
//!
//! - **Strict** operations have every argument forced (left to right) before
//!   the typed Rust body runs; rest arguments arrive already evaluated. They
//!   are written as ordinary Rust functions and wired through the adapter
//!   layer in [`crate::evaluator::intooperation`].
//! - **Lazy** operations receive the bound call frame and decide what to
//!   force, and in which environment. Control flow (`if`, `&&`, `||`, `do`),
//!   binding forms (`let`, `var`, `set`) and the higher-order built-ins are
//!   lazy.
//!
//! ```text
//! (?? 1/2)                   ; => Rat
//! (+ "n=" 5)                 ; => "n=5"
//! (map (fn (x) (* x x)) '(1 2 3))
//! (fmt "~s + ~s" 1 2)        ; => "1 + 2"
//! ```
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function**: a typed Rust fn for strict operations, or
//!    `fn(&Environment) -> Result<Expr, Error>` for lazy ones
//! 2. **Add to BUILTIN_OPS** with its identifier and parameter names
//! 3. **Add tests** covering edge cases and error conditions

use crate::Error;
use crate::ast::{Body, Expr, FALSE, Function, LazyFn, Strictness, TRUE};
use crate::evaluator::intooperation::{ExprIter, IntoOperation, IntoVariadicOperation, OperationFn};
use crate::evaluator::{
    ANONYMOUS, Arity, Environment, apply_values, caller_of, eval, eval_and, eval_do, eval_fn,
    eval_get, eval_if, eval_let, eval_or, eval_pn, eval_quote, eval_set, eval_var,
};
use crate::number::Number;
use crate::printer::{cprint, escape, print, show, unescape};
use crate::reader::{read, read_all};
use log::debug;
use num_bigint::BigInt;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, LazyLock};

/// Symbols bound to symbols in every root environment
pub(crate) const ROOT_CONSTANTS: &[(&str, &str)] = &[
    ("Int", "Int"),
    ("Rat", "Rat"),
    ("Flo", "Flo"),
    ("Num", "Flo"),
    ("Sym", "Sym"),
    ("Str", "Str"),
    ("Atm", "Atm"),
    ("Fun", "Fun"),
    ("Lst", "Lst"),
    ("Xpr", "Xpr"),
    (TRUE, TRUE),
    (FALSE, FALSE),
];

/// Represents the implementation of a built-in
#[derive(Clone)]
pub enum OpKind {
    /// Typed body over already forced arguments
    Strict(Arc<OperationFn>),
    /// Body over the bound call frame
    Lazy(LazyFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Strict(_) => write!(f, "Strict(<fn>)"),
            OpKind::Lazy(_) => write!(f, "Lazy(<fn>)"),
        }
    }
}

impl PartialEq for OpKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OpKind::Strict(f1), OpKind::Strict(f2)) => Arc::ptr_eq(f1, f2),
            (OpKind::Lazy(f1), OpKind::Lazy(f2)) => std::ptr::fn_addr_eq(*f1, *f2),
            _ => false,
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The identifier bound in the root environment
    pub id: &'static str,
    /// Parameter names; a trailing `@` collects the remaining arguments
    pub params: &'static [&'static str],
    pub op_kind: OpKind,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    pub fn strictness(&self) -> Strictness {
        match self.op_kind {
            OpKind::Strict(_) => Strictness::Strict,
            OpKind::Lazy(_) => Strictness::Lazy,
        }
    }

    pub fn arity(&self) -> Arity {
        Arity::of(self.params)
    }

    /// Function value bound in the root environment
    pub(crate) fn to_function(&self) -> Function {
        let params = self.params.iter().map(|p| (*p).to_owned()).collect();
        let body = match &self.op_kind {
            OpKind::Strict(op) => Body::Strict(Arc::clone(op)),
            OpKind::Lazy(op) => Body::Lazy(*op),
        };
        Function::new(params, body, None)
    }
}

//
// Strict Builtin Implementations
//

fn builtin_type(value: Expr) -> Expr {
    Expr::Symbol(value.type_name().to_owned())
}

fn builtin_not(value: Expr) -> bool {
    value.is_false()
}

/// Shared ordering for the comparison operators: numbers across
/// representations, strings with strings, symbols with symbols
fn compare(lhs: &Expr, rhs: &Expr) -> Result<Ordering, Error> {
    match (lhs, rhs) {
        (Expr::Number(a), Expr::Number(b)) => Ok(a.compare(b)),
        (Expr::String(a), Expr::String(b)) | (Expr::Symbol(a), Expr::Symbol(b)) => Ok(a.cmp(b)),
        _ => Err(Error::TypeError(format!(
            "invalid comparison of types '{}' and '{}'",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

macro_rules! comparison {
    ($name:ident, $ordering:pat) => {
        fn $name(lhs: Expr, rhs: Expr) -> Result<bool, Error> {
            Ok(matches!(compare(&lhs, &rhs)?, $ordering))
        }
    };
}

comparison!(builtin_eq, Ordering::Equal);
comparison!(builtin_ne, Ordering::Less | Ordering::Greater);
comparison!(builtin_lt, Ordering::Less);
comparison!(builtin_le, Ordering::Less | Ordering::Equal);
comparison!(builtin_gt, Ordering::Greater);
comparison!(builtin_ge, Ordering::Greater | Ordering::Equal);

fn builtin_add(lhs: Expr, rhs: Expr) -> Result<Expr, Error> {
    match (lhs, rhs) {
        (Expr::Number(a), Expr::Number(b)) => Ok(a.add(&b).into()),
        (Expr::String(mut a), Expr::String(b)) => {
            a.push_str(&b);
            Ok(Expr::String(a))
        }
        (Expr::String(mut a), b @ (Expr::Number(_) | Expr::Symbol(_) | Expr::List(_))) => {
            a.push_str(&print(&b));
            Ok(Expr::String(a))
        }
        (Expr::List(mut a), Expr::List(b)) => {
            a.extend(b);
            Ok(Expr::List(a))
        }
        (Expr::List(mut a), b @ (Expr::Number(_) | Expr::Symbol(_) | Expr::String(_))) => {
            a.push(b);
            Ok(Expr::List(a))
        }
        (a, b) => Err(Error::invalid_types(&a, &b)),
    }
}

fn builtin_sub(lhs: Expr, rhs: Expr) -> Result<Expr, Error> {
    match (&lhs, &rhs) {
        (Expr::Number(a), Expr::Number(b)) => Ok(a.sub(b).into()),
        _ => Err(Error::invalid_types(&lhs, &rhs)),
    }
}

fn builtin_mul(lhs: Expr, rhs: Expr) -> Result<Expr, Error> {
    match (&lhs, &rhs) {
        (Expr::Number(a), Expr::Number(b)) => Ok(a.mul(b).into()),
        (Expr::String(s), Expr::Number(Number::Int(n))) => {
            let times = usize::try_from(n)
                .map_err(|_| Error::TypeError(format!("invalid repeat count '{n}'")))?;
            Ok(Expr::String(s.repeat(times)))
        }
        _ => Err(Error::invalid_types(&lhs, &rhs)),
    }
}

fn builtin_div(lhs: Expr, rhs: Expr) -> Result<Expr, Error> {
    match (&lhs, &rhs) {
        (Expr::Number(a), Expr::Number(b)) => Ok(a.div(b)?.into()),
        _ => Err(Error::invalid_types(&lhs, &rhs)),
    }
}

fn builtin_rem(lhs: BigInt, rhs: BigInt) -> Result<Number, Error> {
    Number::Int(lhs).rem(&Number::Int(rhs))
}

fn builtin_throw(value: Expr) -> Result<Expr, Error> {
    Err(Error::UserError(show(&value)))
}

fn builtin_len(value: Expr) -> Result<usize, Error> {
    match &value {
        Expr::List(items) => Ok(items.len()),
        Expr::String(s) => Ok(s.chars().count()),
        _ => Err(Error::invalid_type(&value)),
    }
}

fn empty_sequence(op: &str) -> Error {
    Error::IndexError(format!("'{op}' of an empty sequence"))
}

fn builtin_car(value: Expr) -> Result<Expr, Error> {
    match value {
        Expr::List(items) => items.into_iter().next().ok_or_else(|| empty_sequence("car")),
        Expr::String(s) => s
            .chars()
            .next()
            .map(|c| Expr::String(c.to_string()))
            .ok_or_else(|| empty_sequence("car")),
        other => Err(Error::invalid_type(&other)),
    }
}

fn builtin_cdr(value: Expr) -> Result<Expr, Error> {
    match value {
        Expr::List(mut items) => {
            if items.is_empty() {
                return Err(empty_sequence("cdr"));
            }
            items.remove(0);
            Ok(Expr::List(items))
        }
        Expr::String(s) => {
            let mut chars = s.chars();
            chars.next().ok_or_else(|| empty_sequence("cdr"))?;
            Ok(Expr::String(chars.as_str().to_owned()))
        }
        other => Err(Error::invalid_type(&other)),
    }
}

fn builtin_write(args: ExprIter<'_>) -> Result<Expr, Error> {
    let mut out = std::io::stdout().lock();
    for arg in args {
        write!(out, "{}", show(arg)).map_err(|e| Error::EvalError(e.to_string()))?;
    }
    out.flush().map_err(|e| Error::EvalError(e.to_string()))?;
    Ok(Expr::boolean(true))
}

/// First form of one line of standard input, `F` when there is none
fn builtin_read_line() -> Expr {
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => Expr::boolean(false),
        Ok(_) => match read(line.trim_end_matches(['\n', '\r'])) {
            Ok(Some(form)) => form,
            Ok(None) => Expr::boolean(false),
            Err(err) => {
                debug!("'>>' discarded unreadable input: {err}");
                Expr::boolean(false)
            }
        },
    }
}

fn builtin_sleep(seconds: BigInt) -> Result<Expr, Error> {
    let seconds = u64::try_from(&seconds)
        .map_err(|_| Error::TypeError(format!("invalid duration '{seconds}'")))?;
    std::thread::sleep(std::time::Duration::from_secs(seconds));
    Ok(Expr::boolean(true))
}

fn builtin_system(command: &str) -> Result<Expr, Error> {
    let command = unescape(command);
    debug!("running shell command: {command}");
    std::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status()
        .map_err(|e| Error::EvalError(format!("could not run '{command}': {e}")))?;
    Ok(Expr::boolean(true))
}

fn builtin_list(args: ExprIter<'_>) -> Expr {
    Expr::List(args.cloned().collect())
}

fn builtin_is_string(value: Expr) -> bool {
    matches!(value, Expr::String(_))
}

fn builtin_is_symbol(value: Expr) -> bool {
    matches!(value, Expr::Symbol(_))
}

fn builtin_is_number(value: Expr) -> bool {
    matches!(value, Expr::Number(_))
}

fn builtin_is_atom(value: Expr) -> bool {
    value.is_atom()
}

fn builtin_is_null(value: Expr) -> bool {
    match value {
        Expr::List(items) => items.is_empty(),
        Expr::String(s) => s.is_empty(),
        _ => false,
    }
}

/// `~s` takes the display form of the next argument, `~~` is a literal `~`
fn builtin_format(template: &str, mut args: ExprIter<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('~') => {
                chars.next();
                out.push('~');
            }
            Some('s') => match args.next() {
                Some(arg) => {
                    chars.next();
                    out.push_str(&show(arg));
                }
                None => out.push('~'),
            },
            _ => out.push('~'),
        }
    }
    out
}

//
// Lazy Builtin Implementations
//

fn expect_function(value: Expr) -> Result<Function, Error> {
    match value {
        Expr::Function(func) => Ok(func),
        other => Err(Error::TypeError(format!(
            "invalid type '{}', expected 'Fn'",
            other.type_name()
        ))),
    }
}

fn builtin_try(frame: &Environment) -> Result<Expr, Error> {
    match frame.force("a") {
        Ok(value) => Ok(value),
        Err(err) => {
            debug!("try caught: {err}");
            let handler = expect_function(frame.force("b")?)?;
            let message = Expr::String(escape(&err.message()));
            apply_values(&handler, ANONYMOUS, vec![message], &caller_of(frame))
        }
    }
}

fn builtin_eval(frame: &Environment) -> Result<Expr, Error> {
    let value = frame.force("a")?;
    eval(&value, &caller_of(frame))
}

fn builtin_apply(frame: &Environment) -> Result<Expr, Error> {
    match (frame.force("a")?, frame.force("b")?) {
        (Expr::Function(func), Expr::List(values)) => {
            apply_values(&func, ANONYMOUS, values, &caller_of(frame))
        }
        (a, b) => Err(Error::invalid_types(&a, &b)),
    }
}

/// Characters of a string as one-character strings
fn characters(s: &str) -> Vec<Expr> {
    s.chars().map(|c| Expr::String(c.to_string())).collect()
}

fn builtin_map(frame: &Environment) -> Result<Expr, Error> {
    let caller = caller_of(frame);
    match (frame.force("a")?, frame.force("b")?) {
        (Expr::Function(func), Expr::List(items)) => items
            .into_iter()
            .map(|item| apply_values(&func, ANONYMOUS, vec![item], &caller))
            .collect::<Result<Vec<_>, _>>()
            .map(Expr::List),
        (Expr::Function(func), Expr::String(s)) => {
            let mut mapped = String::with_capacity(s.len());
            for c in characters(&s) {
                match apply_values(&func, ANONYMOUS, vec![c], &caller)? {
                    Expr::String(part) => mapped.push_str(&part),
                    other => {
                        return Err(Error::TypeError(format!(
                            "invalid type '{}', expected 'Str'",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Expr::String(mapped))
        }
        (a, b) => Err(Error::invalid_types(&a, &b)),
    }
}

/// Predicate result for `filter`: `F` keeps the element, `T` drops it
fn keeps(func: &Function, item: &Expr, caller: &Environment) -> Result<bool, Error> {
    match apply_values(func, ANONYMOUS, vec![item.clone()], caller)? {
        Expr::Symbol(s) if s == FALSE => Ok(true),
        Expr::Symbol(s) if s == TRUE => Ok(false),
        Expr::Symbol(s) => Err(Error::TypeError(format!(
            "invalid value '{s}', expected 'T' or 'F'"
        ))),
        other => Err(Error::TypeError(format!(
            "invalid type '{}', expected 'Sym'",
            other.type_name()
        ))),
    }
}

fn builtin_filter(frame: &Environment) -> Result<Expr, Error> {
    let caller = caller_of(frame);
    match (frame.force("a")?, frame.force("b")?) {
        (Expr::Function(func), Expr::List(items)) => {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if keeps(&func, &item, &caller)? {
                    kept.push(item);
                }
            }
            Ok(Expr::List(kept))
        }
        (Expr::Function(func), Expr::String(s)) => {
            let mut kept = String::with_capacity(s.len());
            for c in s.chars() {
                if keeps(&func, &Expr::String(c.to_string()), &caller)? {
                    kept.push(c);
                }
            }
            Ok(Expr::String(kept))
        }
        (a, b) => Err(Error::invalid_types(&a, &b)),
    }
}

fn builtin_reduce(frame: &Environment) -> Result<Expr, Error> {
    let caller = caller_of(frame);
    let (func, items) = match (frame.force("a")?, frame.force("b")?) {
        (Expr::Function(func), Expr::List(items)) => (func, items),
        (Expr::Function(func), Expr::String(s)) => (func, characters(&s)),
        (a, b) => return Err(Error::invalid_types(&a, &b)),
    };

    let mut items = items.into_iter();
    let mut acc = items.next().ok_or_else(|| empty_sequence("reduce"))?;
    for item in items {
        acc = apply_values(&func, ANONYMOUS, vec![acc, item], &caller)?;
    }
    Ok(acc)
}

fn builtin_env(frame: &Environment) -> Result<Expr, Error> {
    let frames = caller_of(frame)
        .frames()
        .into_iter()
        .map(|bindings| {
            Expr::List(
                bindings
                    .into_iter()
                    .map(|(name, raw)| Expr::List(vec![Expr::Symbol(name), raw]))
                    .collect(),
            )
        })
        .collect();
    Ok(Expr::List(frames))
}

/// Evaluate every form of a file in the caller's environment
fn load_file(frame: &Environment, echo: bool) -> Result<Expr, Error> {
    let path = match frame.force("a")? {
        Expr::String(path) => unescape(&path),
        other => return Err(Error::invalid_type(&other)),
    };
    let source = std::fs::read_to_string(&path)
        .map_err(|e| Error::EvalError(format!("could not open file '{path}': {e}")))?;
    debug!("loading '{path}'");

    let caller = caller_of(frame);
    for form in read_all(&source)? {
        if echo {
            println!("< {}", cprint(&form));
        }
        let value = eval(&form, &caller)?;
        if echo {
            println!("> {}", cprint(&value));
        }
    }
    Ok(Expr::boolean(true))
}

fn builtin_load(frame: &Environment) -> Result<Expr, Error> {
    load_file(frame, false)
}

fn builtin_load_echo(frame: &Environment) -> Result<Expr, Error> {
    load_file(frame, true)
}

/// Global registry of all built-in operations.
///
/// Strict bodies are wired through the same adapter layer used for host
/// registration. This is done once at initialization time via a `LazyLock`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> OpKind
    where
        F: IntoOperation<Args>,
    {
        OpKind::Strict(<F as IntoOperation<Args>>::into_operation(f))
    }

    fn builtin_variadic<Args, F>(f: F) -> OpKind
    where
        F: IntoVariadicOperation<Args>,
    {
        OpKind::Strict(<F as IntoVariadicOperation<Args>>::into_variadic_operation(f))
    }

    const NONE: &[&str] = &[];
    const A: &[&str] = &["a"];
    const AB: &[&str] = &["a", "b"];
    const ABC: &[&str] = &["a", "b", "c"];
    const REST: &[&str] = &["@"];
    const A_REST: &[&str] = &["a", "@"];

    let op = |id, params, op_kind| BuiltinOp {
        id,
        params,
        op_kind,
    };

    vec![
        // Types and logic
        op("??", A, builtin_fixed::<(Expr,), _>(builtin_type)),
        op("!!", A, builtin_fixed::<(Expr,), _>(builtin_not)),
        op("&&", AB, OpKind::Lazy(eval_and)),
        op("||", AB, OpKind::Lazy(eval_or)),
        op("str?", A, builtin_fixed::<(Expr,), _>(builtin_is_string)),
        op("sym?", A, builtin_fixed::<(Expr,), _>(builtin_is_symbol)),
        op("num?", A, builtin_fixed::<(Expr,), _>(builtin_is_number)),
        op("atm?", A, builtin_fixed::<(Expr,), _>(builtin_is_atom)),
        op("nul?", A, builtin_fixed::<(Expr,), _>(builtin_is_null)),
        // Comparison
        op("==", AB, builtin_fixed::<(Expr, Expr), _>(builtin_eq)),
        op("!=", AB, builtin_fixed::<(Expr, Expr), _>(builtin_ne)),
        op("<", AB, builtin_fixed::<(Expr, Expr), _>(builtin_lt)),
        op("<=", AB, builtin_fixed::<(Expr, Expr), _>(builtin_le)),
        op(">", AB, builtin_fixed::<(Expr, Expr), _>(builtin_gt)),
        op(">=", AB, builtin_fixed::<(Expr, Expr), _>(builtin_ge)),
        // Arithmetic
        op("+", AB, builtin_fixed::<(Expr, Expr), _>(builtin_add)),
        op("-", AB, builtin_fixed::<(Expr, Expr), _>(builtin_sub)),
        op("*", AB, builtin_fixed::<(Expr, Expr), _>(builtin_mul)),
        op("/", AB, builtin_fixed::<(Expr, Expr), _>(builtin_div)),
        op("%", AB, builtin_fixed::<(BigInt, BigInt), _>(builtin_rem)),
        // Errors
        op("try", AB, OpKind::Lazy(builtin_try)),
        op("throw", A, builtin_fixed::<(Expr,), _>(builtin_throw)),
        // Evaluation and higher-order functions
        op("eval", A, OpKind::Lazy(builtin_eval)),
        op("apply", AB, OpKind::Lazy(builtin_apply)),
        op("map", AB, OpKind::Lazy(builtin_map)),
        op("filter", AB, OpKind::Lazy(builtin_filter)),
        op("reduce", AB, OpKind::Lazy(builtin_reduce)),
        // Sequences
        op("len", A, builtin_fixed::<(Expr,), _>(builtin_len)),
        op("car", A, builtin_fixed::<(Expr,), _>(builtin_car)),
        op("cdr", A, builtin_fixed::<(Expr,), _>(builtin_cdr)),
        op("lst", REST, builtin_variadic::<(ExprIter<'static>,), _>(builtin_list)),
        op("fmt", A_REST, builtin_variadic::<(&'static str, ExprIter<'static>), _>(builtin_format)),
        // Environment and binding
        op("env", NONE, OpKind::Lazy(builtin_env)),
        op("let", AB, OpKind::Lazy(eval_let)),
        op("var", AB, OpKind::Lazy(eval_var)),
        op("set", AB, OpKind::Lazy(eval_set)),
        op("get", A, OpKind::Lazy(eval_get)),
        op("quote", A, OpKind::Lazy(eval_quote)),
        op("fn", AB, OpKind::Lazy(eval_fn)),
        // Control flow
        op("if", ABC, OpKind::Lazy(eval_if)),
        op("do", A, OpKind::Lazy(eval_do)),
        op("pn", REST, OpKind::Lazy(eval_pn)),
        // Host interaction
        op("<<", REST, builtin_variadic::<(ExprIter<'static>,), _>(builtin_write)),
        op(">>", NONE, builtin_fixed::<(), _>(builtin_read_line)),
        op("slp", A, builtin_fixed::<(BigInt,), _>(builtin_sleep)),
        op("sys", A, builtin_fixed::<(&'static str,), _>(builtin_system)),
        op("ln", A, OpKind::Lazy(builtin_load)),
        op("ld", A, OpKind::Lazy(builtin_load_echo)),
    ]
});

/// Lazy static map from id to BuiltinOp (private - use find_op)
static BUILTIN_MAP: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its identifier
pub fn find_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_MAP.get(id).copied()
}
