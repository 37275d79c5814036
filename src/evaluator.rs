pub mod intooperation;

use crate::ast::{Body, Expr, Function, NativeFn, REST_PARAM};
use crate::builtinops::{ROOT_CONSTANTS, get_builtin_ops};
use crate::number::Number;
use crate::printer::print;
use crate::{Error, MAX_EVAL_DEPTH};
use intooperation::{IntoOperation, IntoVariadicOperation};
use log::{debug, trace};
use num_bigint::BigInt;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Name used in error messages for calls whose head is not a symbol
pub(crate) const ANONYMOUS: &str = "#<Fn>";

/// Expected number of arguments, derived from a parameter list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn of<S: AsRef<str>>(params: &[S]) -> Arity {
        match params.split_last() {
            Some((last, fixed)) if last.as_ref() == REST_PARAM => Arity::AtLeast(fixed.len()),
            _ => Arity::Exact(params.len()),
        }
    }

    pub(crate) fn validate(self, name: &str, got: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if got != n => Err(Error::arity_error(name, n, false, got)),
            Arity::AtLeast(n) if got < n => Err(Error::arity_error(name, n, true, got)),
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
enum Thunk {
    Unforced { expr: Expr, env: Environment },
    Forced(Expr),
}

/// A bound expression, possibly still unevaluated
///
/// An unforced binding remembers the environment its expression must be
/// evaluated in. Forcing replaces it in place with the value, so each
/// argument expression runs at most once.
#[derive(Clone)]
pub struct Binding {
    state: Thunk,
    constant: bool,
}

impl Binding {
    pub fn unforced(expr: Expr, env: Environment) -> Self {
        Binding {
            state: Thunk::Unforced { expr, env },
            constant: false,
        }
    }

    /// An already evaluated, reassignable binding
    pub fn value(expr: Expr) -> Self {
        Binding {
            state: Thunk::Forced(expr),
            constant: false,
        }
    }

    pub fn constant(expr: Expr) -> Self {
        Binding {
            state: Thunk::Forced(expr),
            constant: true,
        }
    }

    /// The stored expression: the value once forced, the source expression before
    pub fn raw(&self) -> &Expr {
        match &self.state {
            Thunk::Unforced { expr, .. } | Thunk::Forced(expr) => expr,
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self.state, Thunk::Forced(_))
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("raw", self.raw())
            .field("forced", &self.is_forced())
            .field("constant", &self.constant)
            .finish()
    }
}

struct Frame {
    bindings: BTreeMap<String, Binding>,
    /// Lexical parent: where free symbols resolve
    outer: Option<Environment>,
    /// Dynamic parent: the environment of the call site
    current: Option<Environment>,
}

/// Shared handle to one frame of bindings
///
/// Clones are cheap and alias the same frame, so a binding added through
/// one handle is visible through every closure that captured it.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Frame>>);

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let frame = self.0.borrow();
        f.debug_struct("Environment")
            .field("bindings", &frame.bindings.keys().collect::<Vec<_>>())
            .field("has_outer", &frame.outer.is_some())
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            bindings: BTreeMap::new(),
            outer: None,
            current: None,
        })))
    }

    pub(crate) fn child(outer: Option<Environment>, current: Environment) -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            bindings: BTreeMap::new(),
            outer,
            current: Some(current),
        })))
    }

    /// Add or replace a binding in this frame
    pub fn define(&self, name: impl Into<String>, binding: Binding) {
        self.0.borrow_mut().bindings.insert(name.into(), binding);
    }

    /// Binding held directly by this frame, ignoring parents
    pub fn local(&self, name: &str) -> Option<Binding> {
        self.0.borrow().bindings.get(name).cloned()
    }

    /// The frame on the lexical chain that holds `name`
    fn owner_of(&self, name: &str) -> Option<Environment> {
        let mut env = self.clone();
        loop {
            let next = {
                let frame = env.0.borrow();
                if frame.bindings.contains_key(name) {
                    return Some(env.clone());
                }
                frame.outer.clone()
            };
            env = next?;
        }
    }

    /// Nearest binding of `name` along the lexical chain
    pub fn get(&self, name: &str) -> Option<Binding> {
        self.owner_of(name)?.local(name)
    }

    pub fn outer(&self) -> Option<Environment> {
        self.0.borrow().outer.clone()
    }

    /// The caller's environment for a call frame, `None` for a root
    pub fn current(&self) -> Option<Environment> {
        self.0.borrow().current.clone()
    }

    /// Value of `name`, evaluating and memoizing its binding on first use
    pub fn force(&self, name: &str) -> Result<Expr, Error> {
        let owner = self
            .owner_of(name)
            .ok_or_else(|| Error::UnboundSymbol(name.to_owned()))?;
        let state = owner.0.borrow().bindings.get(name).map(|b| b.state.clone());
        match state {
            Some(Thunk::Forced(value)) => Ok(value),
            Some(Thunk::Unforced { expr, env }) => {
                trace!("forcing '{name}'");
                let value = eval(&expr, &env)?;
                if let Some(binding) = owner.0.borrow_mut().bindings.get_mut(name)
                    && !binding.is_forced()
                {
                    binding.state = Thunk::Forced(value.clone());
                }
                Ok(value)
            }
            None => Err(Error::UnboundSymbol(name.to_owned())),
        }
    }

    /// Replace the value of the nearest existing binding of `name`
    pub(crate) fn assign(&self, name: &str, value: Expr) -> Result<(), Error> {
        let owner = self
            .owner_of(name)
            .ok_or_else(|| Error::UnboundSymbol(name.to_owned()))?;
        let mut frame = owner.0.borrow_mut();
        match frame.bindings.get_mut(name) {
            Some(binding) if binding.constant => Err(Error::ConstantRebind(name.to_owned())),
            Some(binding) => {
                binding.state = Thunk::Forced(value);
                Ok(())
            }
            None => Err(Error::UnboundSymbol(name.to_owned())),
        }
    }

    /// Every frame of the lexical chain, innermost first, as `(name, raw)` pairs
    pub fn frames(&self) -> Vec<Vec<(String, Expr)>> {
        let mut frames = Vec::new();
        let mut env = Some(self.clone());
        while let Some(current) = env {
            let frame = current.0.borrow();
            frames.push(
                frame
                    .bindings
                    .iter()
                    .map(|(name, binding)| (name.clone(), binding.raw().clone()))
                    .collect(),
            );
            env = frame.outer.clone();
        }
        frames
    }

    /// Get all bindings visible from this environment
    /// Returns a Vec of (name, binding) pairs sorted by name; inner frames shadow outer ones
    pub fn get_all_bindings(&self) -> Vec<(String, Binding)> {
        let mut bindings = match self.outer() {
            Some(outer) => outer.get_all_bindings().into_iter().collect(),
            None => BTreeMap::new(),
        };
        for (name, binding) in &self.0.borrow().bindings {
            bindings.insert(name.clone(), binding.clone());
        }
        bindings.into_iter().collect()
    }

    /// Register a host closure as a lazy function.
    ///
    /// The closure receives the bound call frame: `force` a parameter to get
    /// its value, or read [`Binding::raw`] through [`Environment::local`] to
    /// see the unevaluated argument. A trailing `"@"` in `params` collects
    /// surplus arguments as a list of raw expressions.
    ///
    /// # Example
    /// ```
    /// use lispp::evaluator::{create_root_env, eval};
    /// use lispp::reader::read;
    /// use lispp::ast::Expr;
    ///
    /// let env = create_root_env(&[]);
    /// env.register_builtin_function("twice", &["x"], |frame| {
    ///     let x = frame.force("x")?;
    ///     Ok(Expr::List(vec![x.clone(), x]))
    /// });
    /// let expr = read("(twice 7)").unwrap().unwrap();
    /// assert_eq!(eval(&expr, &env).unwrap().to_string(), "(7 7)");
    /// ```
    pub fn register_builtin_function<F>(&self, name: &str, params: &[&str], func: F)
    where
        F: Fn(&Environment) -> Result<Expr, Error> + 'static,
    {
        let body: Rc<NativeFn> = Rc::new(func);
        self.define_function(name, params, Body::Native(body));
    }

    /// Register a strongly-typed Rust function as a strict builtin.
    ///
    /// Every argument is forced before `func` runs and converted through the
    /// adapter layer in [`intooperation`]:
    ///
    /// ```rust,ignore
    /// fn double(n: BigInt) -> BigInt { n * 2 }
    /// env.register_builtin_operation::<(BigInt,), _>("double", &["n"], double);
    /// ```
    ///
    /// Supported parameter types include `Expr`, `Number`, `BigInt`,
    /// `&str` and the list iterators (`ExprIter`, `NumIter`, `StringIter`).
    /// Return any `R: Into<Expr>` or `Result<R, Error>`.
    pub fn register_builtin_operation<Args, F>(&self, name: &str, params: &[&str], func: F)
    where
        F: IntoOperation<Args>,
    {
        self.define_function(name, params, Body::Strict(func.into_operation()));
    }

    /// Register a strict builtin whose last parameter is the rest marker.
    ///
    /// The rest arguments are evaluated in the caller's environment and
    /// handed to the iterator parameter at the end of `func`'s signature,
    /// e.g. `fn(NumIter<'_>) -> R` or `fn(&str, ExprIter<'_>) -> R`.
    pub fn register_variadic_builtin_operation<Args, F>(
        &self,
        name: &str,
        params: &[&str],
        func: F,
    ) where
        F: IntoVariadicOperation<Args>,
    {
        let mut params = params.to_vec();
        if params.last() != Some(&REST_PARAM) {
            params.push(REST_PARAM);
        }
        self.define_function(name, &params, Body::Strict(func.into_variadic_operation()));
    }

    fn define_function(&self, name: &str, params: &[&str], body: Body) {
        let params = params.iter().map(|p| (*p).to_owned()).collect();
        self.define(
            name,
            Binding::value(Expr::Function(Function::new(params, body, None))),
        );
    }
}

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
    static EVAL_DEPTH_LIMIT: Cell<usize> = const { Cell::new(MAX_EVAL_DEPTH) };
}

/// Override the evaluation depth limit for the current thread
///
/// Only raise it above [`MAX_EVAL_DEPTH`] when the evaluating thread has a
/// correspondingly larger stack.
pub fn set_max_eval_depth(limit: usize) {
    EVAL_DEPTH_LIMIT.with(|l| l.set(limit));
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<Self, Error> {
        let limit = EVAL_DEPTH_LIMIT.with(Cell::get);
        EVAL_DEPTH.with(|depth| {
            if depth.get() >= limit {
                return Err(Error::EvalError(format!(
                    "evaluation depth limit exceeded (max: {limit})"
                )));
            }
            depth.set(depth.get() + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Evaluate an expression in an environment (public API)
pub fn eval(expr: &Expr, env: &Environment) -> Result<Expr, Error> {
    let _depth = DepthGuard::enter()?;
    match expr {
        Expr::Number(_) | Expr::String(_) | Expr::Function(_) => Ok(expr.clone()),
        Expr::Symbol(name) => env.force(name),
        Expr::List(elements) => eval_list(elements, env),
    }
}

/// Evaluate a list expression: call, index or tail depending on the head
fn eval_list(elements: &[Expr], env: &Environment) -> Result<Expr, Error> {
    let Some((head, args)) = elements.split_first() else {
        return Ok(Expr::List(Vec::new()));
    };

    match head {
        Expr::List(_) => match eval(head, env)? {
            Expr::Function(func) => call(&func, ANONYMOUS, args, env),
            Expr::Number(Number::Int(index)) => eval_index(&index, args, env),
            other => Err(unknown_function(&other)),
        },
        Expr::Function(func) => call(func, ANONYMOUS, args, env),
        Expr::Number(Number::Int(index)) => eval_index(index, args, env),
        Expr::Symbol(name) if name == REST_PARAM => eval_tail(args, env),
        Expr::Symbol(name) => match env.force(name)? {
            Expr::Function(func) => call(&func, name, args, env),
            Expr::Number(Number::Int(index)) => eval_index(&index, args, env),
            _ => Err(unknown_function(head)),
        },
        other => Err(unknown_function(other)),
    }
}

fn unknown_function(head: &Expr) -> Error {
    Error::TypeError(format!("unknown 'Fn' '{}'", print(head)))
}

/// `(i seq)`: element `i` of a list or character `i` of a string
fn eval_index(index: &BigInt, args: &[Expr], env: &Environment) -> Result<Expr, Error> {
    let [target] = args else {
        return Err(Error::arity_error("int", 1, false, args.len()));
    };
    let out_of_range =
        |len: usize| Error::IndexError(format!("'int' is out of range '{index}' >= '{len}'"));
    let position = |len: usize| usize::try_from(index).ok().filter(|i| *i < len);

    match eval(target, env)? {
        Expr::List(items) => position(items.len())
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| out_of_range(items.len())),
        Expr::String(s) => {
            let len = s.chars().count();
            position(len)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Expr::String(c.to_string()))
                .ok_or_else(|| out_of_range(len))
        }
        other => Err(Error::TypeError(format!(
            "invalid type '{}', expected 'Lst' or 'Str'",
            other.type_name()
        ))),
    }
}

/// `(@ seq)`: everything after the first element
fn eval_tail(args: &[Expr], env: &Environment) -> Result<Expr, Error> {
    let [target] = args else {
        return Err(Error::arity_error(REST_PARAM, 1, false, args.len()));
    };
    match eval(target, env)? {
        Expr::List(items) if items.len() > 1 => Ok(Expr::List(items[1..].to_vec())),
        Expr::String(s) if s.chars().nth(1).is_some() => {
            let mut chars = s.chars();
            chars.next();
            Ok(Expr::String(chars.as_str().to_owned()))
        }
        Expr::List(_) | Expr::String(_) => Ok(Expr::List(Vec::new())),
        other => Err(Error::invalid_type(&other)),
    }
}

#[derive(Clone, Copy)]
enum RestArgs {
    /// Raw argument expressions, evaluated in the caller on demand
    Unevaluated,
    /// Values supplied by a host or higher-order builtin
    Evaluated,
}

fn fixed_params(func: &Function) -> &[String] {
    match func.params.split_last() {
        Some((last, fixed)) if last == REST_PARAM => fixed,
        _ => &func.params,
    }
}

/// Fresh call frame: lexically under the function's environment, dynamically under the caller
fn new_frame(
    func: &Function,
    name: &str,
    count: usize,
    caller: &Environment,
) -> Result<Environment, Error> {
    Arity::of(&func.params).validate(name, count)?;
    Ok(Environment::child(func.env.clone(), caller.clone()))
}

/// Call `func` with unevaluated argument expressions
///
/// Each fixed parameter is bound to an unforced thunk over the caller's
/// environment; a trailing `@` receives the list of surplus raw arguments.
pub(crate) fn call(
    func: &Function,
    name: &str,
    args: &[Expr],
    caller: &Environment,
) -> Result<Expr, Error> {
    trace!("call '{name}' with {} argument(s)", args.len());
    let frame = new_frame(func, name, args.len(), caller)?;
    let fixed = fixed_params(func);
    for (param, arg) in fixed.iter().zip(args) {
        frame.define(param.clone(), Binding::unforced(arg.clone(), caller.clone()));
    }
    if func.is_variadic() {
        let rest = args.get(fixed.len()..).unwrap_or_default().to_vec();
        frame.define(REST_PARAM, Binding::value(Expr::List(rest)));
    }
    run_body(func, &frame, RestArgs::Unevaluated)
}

/// Call `func` with already evaluated values, binding each one as forced
pub fn apply_values(
    func: &Function,
    name: &str,
    values: Vec<Expr>,
    caller: &Environment,
) -> Result<Expr, Error> {
    trace!("apply '{name}' to {} value(s)", values.len());
    let frame = new_frame(func, name, values.len(), caller)?;
    let mut values = values.into_iter();
    for (param, value) in fixed_params(func).iter().zip(values.by_ref()) {
        frame.define(param.clone(), Binding::value(value));
    }
    if func.is_variadic() {
        frame.define(REST_PARAM, Binding::value(Expr::List(values.collect())));
    }
    run_body(func, &frame, RestArgs::Evaluated)
}

fn run_body(func: &Function, frame: &Environment, rest: RestArgs) -> Result<Expr, Error> {
    match &func.body {
        Body::Strict(op) => {
            let mut args = Vec::with_capacity(func.params.len());
            for param in func.params.iter() {
                if param != REST_PARAM {
                    args.push(frame.force(param)?);
                    continue;
                }
                let Some(Expr::List(items)) = frame.local(REST_PARAM).map(|b| b.raw().clone())
                else {
                    continue;
                };
                match rest {
                    RestArgs::Evaluated => args.extend(items),
                    RestArgs::Unevaluated => {
                        let caller = caller_of(frame);
                        for item in &items {
                            args.push(eval(item, &caller)?);
                        }
                    }
                }
            }
            op(args)
        }
        Body::Lazy(body) => body(frame),
        Body::Native(body) => body(frame),
    }
}

/// The environment a call frame was entered from
pub(crate) fn caller_of(frame: &Environment) -> Environment {
    frame.current().unwrap_or_else(|| frame.clone())
}

/// Unevaluated argument bound to parameter `name` in a call frame
pub(crate) fn raw_arg(frame: &Environment, name: &str) -> Result<Expr, Error> {
    frame
        .local(name)
        .map(|b| b.raw().clone())
        .ok_or_else(|| Error::UnboundSymbol(name.to_owned()))
}

fn symbol_arg(frame: &Environment, name: &str) -> Result<String, Error> {
    match raw_arg(frame, name)? {
        Expr::Symbol(s) => Ok(s),
        other => Err(Error::TypeError(format!(
            "invalid type '{}', expected 'Sym'",
            other.type_name()
        ))),
    }
}

/// Evaluate quote: the argument exactly as written
pub(crate) fn eval_quote(frame: &Environment) -> Result<Expr, Error> {
    raw_arg(frame, "a")
}

/// Evaluate if: `F` and the empty list select the else branch
pub(crate) fn eval_if(frame: &Environment) -> Result<Expr, Error> {
    let condition = frame.force("a")?;
    if condition.is_false() || condition.is_nil() {
        frame.force("c")
    } else {
        frame.force("b")
    }
}

pub(crate) fn eval_and(frame: &Environment) -> Result<Expr, Error> {
    let lhs = frame.force("a")?;
    if lhs.is_false() {
        return Ok(lhs);
    }
    frame.force("b")
}

pub(crate) fn eval_or(frame: &Environment) -> Result<Expr, Error> {
    let lhs = frame.force("a")?;
    if !lhs.is_false() {
        return Ok(lhs);
    }
    frame.force("b")
}

fn define_in_caller(frame: &Environment, constant: bool) -> Result<Expr, Error> {
    let name = symbol_arg(frame, "a")?;
    let caller = caller_of(frame);
    if caller.local(&name).is_some_and(|b| b.is_constant()) {
        return Err(Error::ConstantRebind(name));
    }
    let value = frame.force("b")?;
    let binding = if constant {
        Binding::constant(value)
    } else {
        Binding::value(value)
    };
    caller.define(name.clone(), binding);
    Ok(Expr::Symbol(name))
}

/// Evaluate let: constant binding in the caller's own frame
pub(crate) fn eval_let(frame: &Environment) -> Result<Expr, Error> {
    define_in_caller(frame, true)
}

/// Evaluate var: reassignable binding in the caller's own frame
pub(crate) fn eval_var(frame: &Environment) -> Result<Expr, Error> {
    define_in_caller(frame, false)
}

/// Evaluate set: mutate the nearest binding visible from the caller
pub(crate) fn eval_set(frame: &Environment) -> Result<Expr, Error> {
    let name = symbol_arg(frame, "a")?;
    let caller = caller_of(frame);
    match caller.get(&name) {
        None => return Err(Error::UnboundSymbol(name)),
        Some(binding) if binding.is_constant() => return Err(Error::ConstantRebind(name)),
        Some(_) => {}
    }
    let value = frame.force("b")?;
    caller.assign(&name, value)?;
    Ok(Expr::Symbol(name))
}

/// Evaluate get: the stored expression of a binding, without forcing it
pub(crate) fn eval_get(frame: &Environment) -> Result<Expr, Error> {
    let name = symbol_arg(frame, "a")?;
    caller_of(frame)
        .get(&name)
        .map(|b| b.raw().clone())
        .ok_or(Error::UnboundSymbol(name))
}

/// Evaluate do: repeat the raw body in the caller until it yields `F`
pub(crate) fn eval_do(frame: &Environment) -> Result<Expr, Error> {
    let body = raw_arg(frame, "a")?;
    let caller = caller_of(frame);
    loop {
        let result = eval(&body, &caller)?;
        if result.is_false() {
            return Ok(result);
        }
    }
}

/// Evaluate pn: each argument in order, the last value wins
pub(crate) fn eval_pn(frame: &Environment) -> Result<Expr, Error> {
    let Expr::List(forms) = raw_arg(frame, REST_PARAM)? else {
        return Ok(Expr::boolean(false));
    };
    let caller = caller_of(frame);
    let mut last = Expr::boolean(false);
    for form in &forms {
        last = eval(form, &caller)?;
    }
    Ok(last)
}

/// Evaluate fn: close over the caller's environment
pub(crate) fn eval_fn(frame: &Environment) -> Result<Expr, Error> {
    let params = match raw_arg(frame, "a")? {
        Expr::List(items) => items
            .into_iter()
            .map(|param| match param {
                Expr::Symbol(name) => Ok(name),
                other => Err(Error::TypeError(format!(
                    "invalid parameter type '{}', expected 'Sym'",
                    other.type_name()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(Error::TypeError(format!(
                "invalid type '{}', expected 'Lst'",
                other.type_name()
            )));
        }
    };
    if let Some(pos) = params.iter().position(|p| p == REST_PARAM)
        && pos + 1 != params.len()
    {
        return Err(Error::TypeError(format!(
            "'{REST_PARAM}' must be the last parameter"
        )));
    }

    let body = raw_arg(frame, "b")?;
    let closure: Rc<NativeFn> = Rc::new(move |env: &Environment| eval(&body, env));
    Ok(Expr::Function(Function::new(
        params,
        Body::Native(closure),
        Some(caller_of(frame)),
    )))
}

/// Create a root environment with every builtin and constant bound
///
/// `argv` becomes the `@` list of strings.
pub fn create_root_env(argv: &[String]) -> Environment {
    let env = Environment::new();

    for (name, value) in ROOT_CONSTANTS {
        env.define(*name, Binding::value(Expr::Symbol((*value).to_owned())));
    }
    env.define(
        REST_PARAM,
        Binding::value(Expr::List(argv.iter().cloned().map(Expr::String).collect())),
    );

    for builtin_op in get_builtin_ops() {
        env.define(builtin_op.id, Binding::value(builtin_op.to_function().into()));
    }

    debug!(
        "root environment created with {} bindings",
        env.0.borrow().bindings.len()
    );
    env
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::Error;
    use crate::ast::{nil, sym, val};
    use crate::reader::read;

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Expr),            // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Expr>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    fn num(token: &str) -> Number {
        Number::parse(token).unwrap()
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_root_env(&[]);
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let expr = match read(input) {
            Ok(Some(expr)) => expr,
            other => panic!("{test_id}: unexpected read result for '{input}': {other:?}"),
        };

        match (eval(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(actual, *expected_val, "{test_id}: '{input}'");
            }
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id}: expected error for '{input}', got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: expected {expected_val:?} for '{input}', got error {err:?}");
            }
        }
    }

    /// Simplified test runner with specific error message support
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_root_env(&[]);
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    fn test_arity_of_params() {
        let params = |names: &[&str]| names.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
        assert_eq!(Arity::of(&params(&["a", "b"])), Arity::Exact(2));
        assert_eq!(Arity::of(&params(&["a", "@"])), Arity::AtLeast(1));
        assert_eq!(Arity::of(&params(&[])), Arity::Exact(0));

        assert!(Arity::Exact(2).validate("f", 2).is_ok());
        let err = Arity::Exact(2).validate("f", 3).unwrap_err();
        assert_eq!(err.message(), "'f' expected '2' arguments, got '3'");
        assert!(Arity::AtLeast(1).validate("g", 5).is_ok());
        assert!(Arity::AtLeast(1).validate("g", 0).is_err());
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-7", success(-7)),
            ("1/3", success(num("1/3"))),
            ("4/2", success(2)),
            ("2.5", success(num("2.5"))),
            ("\"hello\"", success("hello")),
            ("()", EvalResult(nil())),
            // === ROOT CONSTANTS ===
            ("T", EvalResult(sym("T"))),
            ("F", EvalResult(sym("F"))),
            ("Int", EvalResult(sym("Int"))),
            ("Num", EvalResult(sym("Flo"))),
            ("@", EvalResult(nil())),
            // === SYMBOL RESOLUTION ===
            ("undefined", SpecificError("unbound symbol 'undefined'")),
            // === QUOTING ===
            ("(quote (a b))", success(vec![sym("a"), sym("b")])),
            ("'x", EvalResult(sym("x"))),
            ("'(1 .x)", success(vec![val(1), val(vec![sym("unquote"), sym("x")])])),
            // === CALLS TO fn VALUES ===
            ("((fn (x y) (+ x y)) 1 2)", success(3)),
            ("((fn () 7))", success(7)),
            ("((fn (x y) x) 1)", SpecificError("'#<Fn>' expected '2' arguments")),
            ("((fn (a @) @) 1 2 3)", success([2, 3])),
            ("((fn (@) @))", EvalResult(nil())),
            (
                "((fn (a @) @) 1 (+ 1 1))",
                success(vec![val(vec![sym("+"), val(1), val(1)])]),
            ),
            ("((fn (a @) a))", SpecificError("expected at least '1' argument")),
            ("(fn (1) 2)", SpecificError("expected 'Sym'")),
            ("(fn (@ a) 2)", SpecificError("must be the last parameter")),
            ("(fn x 2)", SpecificError("expected 'Lst'")),
            // Arguments that are never referenced are never evaluated
            ("((fn (x) 1) (throw \"boom\"))", success(1)),
            // === HEAD DISPATCH ===
            ("(1 '(a b c))", EvalResult(sym("b"))),
            ("(0 \"xyz\")", success("x")),
            ("((+ 1 1) '(a b c))", EvalResult(sym("c"))),
            ("(5 '(1 2 3))", SpecificError("'int' is out of range '5' >= '3'")),
            ("(-1 '(1 2 3))", SpecificError("out of range")),
            ("(0 '(1) '(2))", SpecificError("'int' expected '1' argument")),
            ("(0 5)", SpecificError("expected 'Lst' or 'Str'")),
            ("(@ '(1 2 3))", success([2, 3])),
            ("(@ '(1))", EvalResult(nil())),
            ("(@ \"abc\")", success("bc")),
            ("(@ \"a\")", EvalResult(nil())),
            ("(\"str\" 1)", SpecificError("unknown 'Fn' '\"str\"'")),
            ("(F 1)", SpecificError("unknown 'Fn' 'F'")),
            ("(1/2 '(1 2))", SpecificError("unknown 'Fn'")),
            (
                "(nope 1)",
                SpecificError("unbound symbol 'nope'"),
            ),
            // === CONTROL FLOW ===
            ("(if F (throw \"boom\") 1)", success(1)),
            ("(if T 1 (throw \"boom\"))", success(1)),
            ("(if '() 1 2)", success(2)),
            ("(if 0 1 2)", success(1)),
            ("(if \"\" 1 2)", success(1)),
            ("(&& T 1)", success(1)),
            ("(&& F (throw \"x\"))", EvalResult(sym("F"))),
            ("(&& 1 F)", EvalResult(sym("F"))),
            ("(|| F 2)", success(2)),
            ("(|| 1 (throw \"x\"))", success(1)),
            ("(|| F F)", EvalResult(sym("F"))),
            ("(pn 1 2 3)", success(3)),
            ("(pn)", EvalResult(sym("F"))),
            ("(do F)", EvalResult(sym("F"))),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_environment_operations() {
        let environment_test_cases = vec![
            TestEnvironment(vec![
                ("(var x 5)", EvalResult(sym("x"))),
                ("(set x 6)", EvalResult(sym("x"))),
                ("x", success(6)),
                ("(set y 1)", SpecificError("unbound symbol 'y'")),
            ]),
            TestEnvironment(vec![
                ("(let x 5)", EvalResult(sym("x"))),
                ("(set x 6)", SpecificError("constant binding 'x'")),
                ("(let x 7)", SpecificError("constant binding 'x'")),
                ("(var x 7)", SpecificError("constant binding 'x'")),
                ("x", success(5)),
            ]),
            TestEnvironment(vec![
                // let and var bind in the caller's frame, so a function body can
                // shadow a constant from an outer frame
                ("(let k 1)", EvalResult(sym("k"))),
                ("((fn () (pn (let k 2) k)))", success(2)),
                ("k", success(1)),
                // set reaches through to the nearest visible binding
                ("(var n 0)", EvalResult(sym("n"))),
                ("((fn () (set n 10)))", EvalResult(sym("n"))),
                ("n", success(10)),
            ]),
            TestEnvironment(vec![
                ("(let sq (fn (x) (* x x)))", EvalResult(sym("sq"))),
                ("(sq 12)", success(144)),
                (
                    "(let fact (fn (n) (if (== n 0) 1 (* n (fact (- n 1))))))",
                    EvalResult(sym("fact")),
                ),
                ("(fact 10)", success(3_628_800)),
                // closures capture their defining environment
                ("(let adder (fn (n) (fn (x) (+ x n))))", EvalResult(sym("adder"))),
                ("((adder 3) 4)", success(7)),
                ("(let add5 (adder 5))", EvalResult(sym("add5"))),
                ("(add5 10)", success(15)),
            ]),
            TestEnvironment(vec![
                ("(var i 0)", EvalResult(sym("i"))),
                ("(var acc '())", EvalResult(sym("acc"))),
                (
                    "(do (if (< i 3) (pn (set acc (+ acc i)) (set i (+ i 1))) F))",
                    EvalResult(sym("F")),
                ),
                ("acc", success([0, 1, 2])),
                ("i", success(3)),
            ]),
            TestEnvironment(vec![
                ("(var e '(+ 1 2))", EvalResult(sym("e"))),
                ("(get e)", success(vec![sym("+"), val(1), val(2)])),
                ("(get nope)", SpecificError("unbound symbol 'nope'")),
                ("(let 1 2)", SpecificError("expected 'Sym'")),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }

    #[test]
    fn test_arguments_are_forced_once() {
        let env = create_root_env(&[]);
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        env.register_builtin_function("tick", &[], move |_| {
            counter.set(counter.get() + 1);
            Ok(val(1))
        });

        let expr = read("((fn (x) (+ x (+ x x))) (tick))").unwrap().unwrap();
        assert_eq!(eval(&expr, &env).unwrap(), val(3));
        assert_eq!(hits.get(), 1);

        let expr = read("((fn (x) 0) (tick))").unwrap().unwrap();
        assert_eq!(eval(&expr, &env).unwrap(), val(0));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_host_registration() {
        fn double(n: BigInt) -> BigInt {
            n * 2
        }
        fn join(sep: &str, parts: intooperation::StringIter<'_>) -> String {
            parts.collect::<Vec<_>>().join(sep)
        }

        let env = create_root_env(&["prog".to_owned(), "arg".to_owned()]);
        env.register_builtin_operation::<(BigInt,), _>("double", &["n"], double);
        env.register_variadic_builtin_operation::<(&str, intooperation::StringIter<'static>), _>(
            "join",
            &["sep"],
            join,
        );
        env.register_builtin_function("raw", &["a"], |frame| raw_arg(frame, "a"));

        let cases = vec![
            ("(double 21)", val(42)),
            ("(double (+ 1 1))", val(4)),
            ("(join \"-\" \"a\" \"b\" \"c\")", val("a-b-c")),
            ("(raw (+ 1 2))", val(vec![sym("+"), val(1), val(2)])),
            ("@", val(["prog", "arg"])),
        ];
        for (input, expected) in cases {
            let expr = read(input).unwrap().unwrap();
            assert_eq!(eval(&expr, &env).unwrap(), expected, "{input}");
        }

        let expr = read("(double \"x\")").unwrap().unwrap();
        assert!(matches!(eval(&expr, &env), Err(Error::TypeError(_))));

        let all = env.get_all_bindings();
        assert!(all.iter().any(|(name, _)| name == "double"));
        assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_binding_states() {
        let env = create_root_env(&[]);
        let frame = Environment::child(None, env.clone());
        frame.define("x", Binding::unforced(read("(+ 1 2)").unwrap().unwrap(), env.clone()));

        let before = frame.local("x").unwrap();
        assert!(!before.is_forced());
        assert_eq!(before.raw(), &val(vec![sym("+"), val(1), val(2)]));

        assert_eq!(frame.force("x").unwrap(), val(3));
        let after = frame.local("x").unwrap();
        assert!(after.is_forced());
        assert_eq!(after.raw(), &val(3));

        assert_eq!(frame.current(), Some(env));
        assert!(frame.outer().is_none());
        assert!(matches!(frame.force("y"), Err(Error::UnboundSymbol(_))));
    }

    #[test]
    fn test_evaluation_depth_limit() {
        let worker = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let depth_test_environments = vec![TestEnvironment(vec![
                    (
                        "(let deep (fn (n) (if (== n 0) 42 (+ 1 (deep (- n 1))))))",
                        EvalResult(sym("deep")),
                    ),
                    ("(deep 10)", success(52)),
                    ("(deep 100000)", SpecificError("depth")),
                    // the guard unwinds cleanly, so evaluation still works afterwards
                    ("(deep 5)", success(47)),
                    ("(try (deep 100000) (fn (e) \"caught\"))", success("caught")),
                ])];
                run_tests_in_environment(depth_test_environments);
            })
            .unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_default_depth_limit_allows_moderate_recursion() {
        let worker = std::thread::Builder::new()
            .stack_size(16 * 1024 * 1024)
            .spawn(|| {
                run_tests_in_environment(vec![TestEnvironment(vec![
                    (
                        "(let deep (fn (n) (if (== n 0) 42 (+ 1 (deep (- n 1))))))",
                        EvalResult(sym("deep")),
                    ),
                    ("(deep 100)", success(142)),
                    ("(deep 1000)", SpecificError("evaluation depth limit exceeded (max: 512)")),
                ])]);
            })
            .unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_custom_depth_limit() {
        let worker = std::thread::Builder::new()
            .spawn(|| {
                set_max_eval_depth(3);
                let env = create_root_env(&[]);
                let expr = read("(+ 1 (+ 2 (+ 3 4)))").unwrap().unwrap();
                let err = eval(&expr, &env).unwrap_err();
                assert_eq!(err.message(), "evaluation depth limit exceeded (max: 3)");
            })
            .unwrap();
        worker.join().unwrap();
    }
}
