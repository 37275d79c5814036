use crate::Error;
use crate::ast::Expr;
use crate::number::Number;
use num_bigint::BigInt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

// NOTE: This module is internal plumbing for the evaluator.
// It defines the adapter layer that turns strongly-typed Rust
// functions into the erased `OperationFn` stored in strict
// function bodies.
//
// By the time an `OperationFn` runs, the evaluator has already
// forced every parameter of the bound frame (and evaluated every
// rest argument), so adapters only ever see values, never thunks.

/// Canonical erased strict body type used by the evaluator.
///
/// Operations receive ownership of their forced argument vector,
/// enabling implementations that consume or rearrange arguments.
pub type OperationFn = dyn Fn(Vec<Expr>) -> Result<Expr, Error> + Send + Sync;

// =====================================================================
// Internal machinery for fixed-arity argument conversion
// =====================================================================

/// Core trait used by the fixed-arity adapters to turn forced `Expr`
/// values into strongly-typed parameters.
///
/// The associated `Param<'a>` type is the parameter type as seen by
/// the operation for a given lifetime of the local `Expr` slots used
/// during argument conversion.
pub trait FromParam {
    type Param<'a>;

    /// Convert a single argument into this parameter type, either by
    /// borrowing from the slot (`&str`, iterators) or by moving out of it.
    fn from_arg<'a>(value: &'a mut Expr) -> Result<Self::Param<'a>, Error>;
}

impl FromParam for Expr {
    type Param<'a> = Expr;

    fn from_arg<'a>(value: &'a mut Expr) -> Result<Self::Param<'a>, Error> {
        Ok(std::mem::replace(value, Expr::List(Vec::new())))
    }
}

// Blanket implementation for by-value parameters obtainable through
// `TryFrom<Expr>` (see the impls at the bottom of this module).
impl<T> FromParam for T
where
    Expr: std::convert::TryInto<T, Error = Error>,
{
    type Param<'a> = T;

    fn from_arg<'a>(value: &'a mut Expr) -> Result<Self::Param<'a>, Error> {
        let owned = std::mem::replace(value, Expr::List(Vec::new()));
        <Expr as std::convert::TryInto<T>>::try_into(owned)
    }
}

impl FromParam for &str {
    type Param<'a> = &'a str;

    fn from_arg<'a>(value: &'a mut Expr) -> Result<Self::Param<'a>, Error> {
        if let Expr::String(s) = value {
            Ok(s.as_str())
        } else {
            Err(Error::TypeError(format!(
                "invalid type '{}', expected 'Str'",
                value.type_name()
            )))
        }
    }
}

impl<'b, K> FromParam for TypedExprIter<'b, K>
where
    K: ExprElementKind,
{
    type Param<'a> = TypedExprIter<'a, K>;

    fn from_arg<'a>(value: &'a mut Expr) -> Result<Self::Param<'a>, Error> {
        if let Expr::List(items) = value {
            TypedExprIter::<K>::new(items.as_slice())
        } else {
            Err(Error::TypeError(format!(
                "invalid type '{}', expected 'Lst'",
                value.type_name()
            )))
        }
    }
}

// =====================================================================
// Generic typed iterator built on top of the standard slice iterator
// =====================================================================

/// Marker trait describing how to view an `Expr` slice as a typed
/// iterator. Implementations validate the whole slice up front and
/// then project each element.
#[doc(hidden)]
pub trait ExprElementKind {
    type Item<'a>;

    fn precheck(slice: &[Expr]) -> Result<(), Error>;
    fn project<'a>(v: &'a Expr) -> Option<Self::Item<'a>>;
}

/// Iterator over a list of `Expr`s, parameterized by an
/// [`ExprElementKind`] that determines the element type.
#[doc(hidden)]
pub struct TypedExprIter<'a, K: ExprElementKind> {
    inner: std::slice::Iter<'a, Expr>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedExprIter<'a, K>
where
    K: ExprElementKind,
{
    pub(crate) fn new(values: &'a [Expr]) -> Result<Self, Error> {
        K::precheck(values)?;
        Ok(TypedExprIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }
}

impl<'a, K> Iterator for TypedExprIter<'a, K>
where
    K: ExprElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // precheck guarantees every element projects
        self.inner.by_ref().find_map(K::project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> ExactSizeIterator for TypedExprIter<'_, K> where K: ExprElementKind {}
impl<K> FusedIterator for TypedExprIter<'_, K> where K: ExprElementKind {}

/// Element kind that yields each `Expr` as a borrowed reference
#[doc(hidden)]
pub struct AnyKind;

impl ExprElementKind for AnyKind {
    type Item<'a> = &'a Expr;

    fn precheck(_slice: &[Expr]) -> Result<(), Error> {
        Ok(())
    }

    fn project<'a>(v: &'a Expr) -> Option<Self::Item<'a>> {
        Some(v)
    }
}

#[doc(hidden)]
pub struct NumberKind;

impl ExprElementKind for NumberKind {
    type Item<'a> = &'a Number;

    fn precheck(slice: &[Expr]) -> Result<(), Error> {
        match slice.iter().find(|v| !matches!(v, Expr::Number(_))) {
            Some(bad) => Err(Error::TypeError(format!(
                "invalid type '{}', expected 'Num'",
                bad.type_name()
            ))),
            None => Ok(()),
        }
    }

    fn project<'a>(v: &'a Expr) -> Option<Self::Item<'a>> {
        match v {
            Expr::Number(n) => Some(n),
            _ => None,
        }
    }
}

#[doc(hidden)]
pub struct StringKind;

impl ExprElementKind for StringKind {
    type Item<'a> = &'a str;

    fn precheck(slice: &[Expr]) -> Result<(), Error> {
        match slice.iter().find(|v| !matches!(v, Expr::String(_))) {
            Some(bad) => Err(Error::TypeError(format!(
                "invalid type '{}', expected 'Str'",
                bad.type_name()
            ))),
            None => Ok(()),
        }
    }

    fn project<'a>(v: &'a Expr) -> Option<Self::Item<'a>> {
        match v {
            Expr::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Borrowed iterator over a sequence of `Expr` references.
pub type ExprIter<'a> = TypedExprIter<'a, AnyKind>;

/// Borrowed iterator over numeric arguments, type-checked up front.
pub type NumIter<'a> = TypedExprIter<'a, NumberKind>;

/// Borrowed iterator over string arguments, type-checked up front.
pub type StringIter<'a> = TypedExprIter<'a, StringKind>;

// =====================================================================
// Rest-parameter support for variadic operations
// =====================================================================

/// Core trait used to construct rest-parameter values from the tail of
/// the forced argument vector.
pub trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(slice: &'a [Expr]) -> Result<Self::Param<'a>, Error>;
}

impl<K> FromRest for TypedExprIter<'static, K>
where
    K: ExprElementKind,
{
    type Param<'a> = TypedExprIter<'a, K>;

    fn from_rest<'a>(slice: &'a [Expr]) -> Result<Self::Param<'a>, Error> {
        TypedExprIter::<K>::new(slice)
    }
}

// =====================================================================
// Return-type adaptation
// =====================================================================

/// Normalizes operation return types to `Result<Expr, Error>`.
pub trait IntoExprResult {
    fn into_expr_result(self) -> Result<Expr, Error>;
}

impl<T> IntoExprResult for Result<T, Error>
where
    T: Into<Expr>,
{
    fn into_expr_result(self) -> Result<Expr, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoExprResult for T
where
    T: Into<Expr>,
{
    fn into_expr_result(self) -> Result<Expr, Error> {
        Ok(self.into())
    }
}

/// Converts a strongly-typed Rust function or closure into the erased
/// [`OperationFn`], parameterized by an argument tuple type.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// Like [`IntoOperation`] for signatures ending in a rest parameter
/// expressed with one of the iterator types of this module
/// (`ExprIter<'a>`, `NumIter<'a>`, `StringIter<'a>`), optionally after a
/// fixed prefix of `FromParam` parameters.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

// =====================================================================
// Variadic adapters
// =====================================================================

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + Send + Sync + 'static,
    R: IntoExprResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Expr>| {
            let rest_param: <I as FromRest>::Param<'_> = <I as FromRest>::from_rest(&args[..])?;
            let result: R = (self)(rest_param);
            result.into_expr_result()
        })
    }
}

macro_rules! impl_into_variadic_operation_for_prefix_and_rest {
    ($prefix:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, )> for F
        where
            I: FromRest,
            $( $A: FromParam, )+
            F: for<'a> Fn(
                    $( <$A as FromParam>::Param<'a> ),+,
                    <I as FromRest>::Param<'a>,
                ) -> R
                + Send
                + Sync
                + 'static,
            R: IntoExprResult,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Expr>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+, ref mut rest @ .. ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let rest_param: <I as FromRest>::Param<'_> =
                                <I as FromRest>::from_rest(&*rest)?;

                            let result: R = (self)( $( $p ),+, rest_param );
                            result.into_expr_result()
                        }
                        _ => Err(Error::arity_error("#<Fn>", $prefix, true, len)),
                    }
                })
            }
        }
    };
}

impl_into_variadic_operation_for_prefix_and_rest!(1, v0, p0: A1);

// =====================================================================
// Fixed-arity adapters
// =====================================================================

macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> R
                + Send
                + Sync
                + 'static,
            $( $A: FromParam, )+
            R: IntoExprResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Expr>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+ ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let result: R = (self)( $( $p ),+ );
                            result.into_expr_result()
                        }
                        _ => Err(Error::arity_error("#<Fn>", $arity, false, len)),
                    }
                })
            }
        }
    };
}

// 0-arg functions / closures
impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoExprResult,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Expr>| {
            if !args.is_empty() {
                return Err(Error::arity_error("#<Fn>", 0, false, args.len()));
            }

            let result: R = (self)();
            result.into_expr_result()
        })
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);

// =====================================================================
// Scalar conversions used by the blanket `FromParam` impl
// =====================================================================

impl TryFrom<Expr> for Number {
    type Error = Error;

    fn try_from(value: Expr) -> Result<Number, Error> {
        match value {
            Expr::Number(n) => Ok(n),
            other => Err(Error::invalid_type(&other)),
        }
    }
}

impl TryFrom<Expr> for BigInt {
    type Error = Error;

    fn try_from(value: Expr) -> Result<BigInt, Error> {
        match value {
            Expr::Number(Number::Int(n)) => Ok(n),
            other => Err(Error::invalid_type(&other)),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    fn sum(nums: NumIter<'_>) -> Number {
        nums.fold(Number::from(0), |acc, n| acc.add(n))
    }

    fn scale(factor: BigInt, nums: NumIter<'_>) -> Expr {
        Expr::List(
            nums.map(|n| val(Number::Int(factor.clone()).mul(n)))
                .collect(),
        )
    }

    fn greet(name: &str, times: BigInt) -> String {
        let times = usize::try_from(&times).unwrap_or(0);
        format!("hi {name}").repeat(times)
    }

    fn count(args: ExprIter<'_>) -> usize {
        args.count()
    }

    #[test]
    fn test_fixed_arity_adapters() {
        let op = IntoOperation::<(&str, BigInt)>::into_operation(greet);
        assert_eq!(op(vec![val("x"), val(2)]).unwrap(), val("hi xhi x"));

        // wrong argument type surfaces as TypeError naming the type
        let err = op(vec![val("x"), val("y")]).unwrap_err();
        assert_eq!(err.message(), "invalid type 'Str'");

        // wrong count surfaces as ArityError
        let err = op(vec![val("x")]).unwrap_err();
        assert!(matches!(err, Error::ArityError { expected: 2, .. }), "{err:?}");

        let zero = IntoOperation::<()>::into_operation(|| sym("T"));
        assert_eq!(zero(vec![]).unwrap(), sym("T"));
        assert!(zero(vec![val(1)]).is_err());
    }

    #[test]
    fn test_variadic_adapters() {
        let op = IntoVariadicOperation::<(NumIter<'static>,)>::into_variadic_operation(sum);
        assert_eq!(op(vec![val(1), val(2), val(3)]).unwrap(), val(6));
        assert_eq!(op(vec![]).unwrap(), val(0));
        let err = op(vec![val(1), val("two")]).unwrap_err();
        assert_eq!(err.message(), "invalid type 'Str', expected 'Num'");

        let op = IntoVariadicOperation::<(BigInt, NumIter<'static>)>::into_variadic_operation(scale);
        assert_eq!(op(vec![val(3), val(1), val(2)]).unwrap(), val([3, 6]));
        assert!(op(vec![]).is_err());

        let op = IntoVariadicOperation::<(ExprIter<'static>,)>::into_variadic_operation(count);
        assert_eq!(op(vec![val(1), sym("a"), val("s")]).unwrap(), val(3usize));
    }

    #[test]
    fn test_list_parameter() {
        fn first_string(mut items: StringIter<'_>) -> String {
            items.next().unwrap_or_default().to_owned()
        }
        let op = IntoOperation::<(StringIter<'static>,)>::into_operation(first_string);
        assert_eq!(op(vec![val(["a", "b"])]).unwrap(), val("a"));
        assert!(op(vec![val("not a list")]).is_err());
        assert!(op(vec![val([1, 2])]).is_err());
    }
}
