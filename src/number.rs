//! Numeric tower: exact integers, exact rationals and arbitrary-precision
//! decimal floats.
//!
//! Binary operations promote both operands to the wider representation
//! (`Int < Rat < Flo`), operate there and renormalize the result: a
//! rational with denominator 1 and a float without fractional digits both
//! collapse back to `Int`. Division of two integers is exact.

use crate::{Error, FLOAT_PRECISION};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A number in one of the three representations
///
/// A `Rat` produced by this module is always reduced and never has
/// denominator 1.
#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Int(BigInt),
    Rat(BigRational),
    Flo(BigDecimal),
}

/// Both operands of a binary operation lifted to a common representation
enum Promoted {
    Ints(BigInt, BigInt),
    Rats(BigRational, BigRational),
    Flos(BigDecimal, BigDecimal),
}

fn is_integer_literal(token: &str) -> bool {
    let digits = token
        .strip_prefix('-')
        .or_else(|| token.strip_prefix('+'))
        .unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// `[+-]digits.digits`, at least one digit overall and no exponent
fn parse_float_literal(token: &str) -> Option<BigDecimal> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let (int_part, frac_part) = body.split_once('.')?;
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut mantissa = BigInt::from_str(&format!("0{int_part}{frac_part}")).ok()?;
    if negative {
        mantissa = -mantissa;
    }
    let scale = i64::try_from(frac_part.len()).ok()?;
    Some(BigDecimal::new(mantissa, scale))
}

fn pow10(exp: u64) -> BigInt {
    num_traits::pow(BigInt::from(10u8), exp as usize)
}

fn decimal_to_rational(value: &BigDecimal) -> BigRational {
    let (mantissa, scale) = value.as_bigint_and_exponent();
    if scale >= 0 {
        BigRational::new(mantissa, pow10(scale.unsigned_abs()))
    } else {
        BigRational::from_integer(mantissa * pow10(scale.unsigned_abs()))
    }
}

fn rational_to_decimal(value: &BigRational) -> BigDecimal {
    let numer = BigDecimal::new(value.numer().clone(), 0);
    let denom = BigDecimal::new(value.denom().clone(), 0);
    (numer / denom).with_prec(FLOAT_PRECISION)
}

impl Number {
    /// Classify a bare token under the numeric grammar.
    ///
    /// A token containing `.` is a Float (plain decimal digits, no exponent),
    /// one containing `/` is a Rational (canonicalized), anything else must
    /// be a signed decimal integer.
    /// Returns `None` for tokens that are not numbers (they read as symbols).
    pub fn parse(token: &str) -> Option<Number> {
        if token.contains('.') {
            return parse_float_literal(token).map(Number::Flo);
        }

        if let Some((numer, denom)) = token.split_once('/') {
            if !is_integer_literal(numer) || !is_integer_literal(denom) {
                return None;
            }
            let numer = BigInt::from_str(numer).ok()?;
            let denom = BigInt::from_str(denom).ok()?;
            if denom.is_zero() {
                return None;
            }
            return Some(Number::Rat(BigRational::new(numer, denom)).normalize());
        }

        if !is_integer_literal(token) {
            return None;
        }
        BigInt::from_str(token).ok().map(Number::Int)
    }

    /// Type name as reported by `??`
    pub fn type_name(&self) -> &'static str {
        match self {
            Number::Int(_) => "Int",
            Number::Rat(_) => "Rat",
            Number::Flo(_) => "Flo",
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Number::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Int(n) => n.is_zero(),
            Number::Rat(r) => r.is_zero(),
            Number::Flo(f) => f.is_zero(),
        }
    }

    /// Collapse to the narrowest representation that holds the value exactly
    pub fn normalize(self) -> Number {
        match self {
            Number::Rat(r) if r.is_integer() => Number::Int(r.to_integer()),
            Number::Flo(f) if f.is_integer() => {
                let (int, _) = f.with_scale(0).into_bigint_and_exponent();
                Number::Int(int)
            }
            other => other,
        }
    }

    fn promote(&self, rhs: &Number) -> Promoted {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => Promoted::Ints(a.clone(), b.clone()),
            (Number::Flo(a), Number::Flo(b)) => Promoted::Flos(a.clone(), b.clone()),
            (Number::Flo(a), other) => Promoted::Flos(a.clone(), other.to_decimal()),
            (other, Number::Flo(b)) => Promoted::Flos(other.to_decimal(), b.clone()),
            (a, b) => Promoted::Rats(a.to_rational(), b.to_rational()),
        }
    }

    /// Exact rational value of any representation
    fn to_rational(&self) -> BigRational {
        match self {
            Number::Int(n) => BigRational::from_integer(n.clone()),
            Number::Rat(r) => r.clone(),
            Number::Flo(f) => decimal_to_rational(f),
        }
    }

    fn to_decimal(&self) -> BigDecimal {
        match self {
            Number::Int(n) => BigDecimal::new(n.clone(), 0),
            Number::Rat(r) => rational_to_decimal(r),
            Number::Flo(f) => f.clone(),
        }
    }

    fn float_result(value: BigDecimal) -> Number {
        Number::Flo(value.with_prec(FLOAT_PRECISION).normalized()).normalize()
    }

    pub fn add(&self, rhs: &Number) -> Number {
        match self.promote(rhs) {
            Promoted::Ints(a, b) => Number::Int(a + b),
            Promoted::Rats(a, b) => Number::Rat(a + b).normalize(),
            Promoted::Flos(a, b) => Self::float_result(a + b),
        }
    }

    pub fn sub(&self, rhs: &Number) -> Number {
        match self.promote(rhs) {
            Promoted::Ints(a, b) => Number::Int(a - b),
            Promoted::Rats(a, b) => Number::Rat(a - b).normalize(),
            Promoted::Flos(a, b) => Self::float_result(a - b),
        }
    }

    pub fn mul(&self, rhs: &Number) -> Number {
        match self.promote(rhs) {
            Promoted::Ints(a, b) => Number::Int(a * b),
            Promoted::Rats(a, b) => Number::Rat(a * b).normalize(),
            Promoted::Flos(a, b) => Self::float_result(a * b),
        }
    }

    /// Division; two integers divide exactly into a rational
    pub fn div(&self, rhs: &Number) -> Result<Number, Error> {
        if rhs.is_zero() {
            return Err(Error::TypeError("division by zero".into()));
        }
        Ok(match self.promote(rhs) {
            Promoted::Ints(a, b) => Number::Rat(BigRational::new(a, b)).normalize(),
            Promoted::Rats(a, b) => Number::Rat(a / b).normalize(),
            Promoted::Flos(a, b) => Self::float_result(a / b),
        })
    }

    /// Integer remainder; the sign follows the dividend
    pub fn rem(&self, rhs: &Number) -> Result<Number, Error> {
        let (Number::Int(a), Number::Int(b)) = (self, rhs) else {
            let bad = if matches!(self, Number::Int(_)) { rhs } else { self };
            return Err(Error::TypeError(format!("invalid type '{}'", bad.type_name())));
        };
        if b.is_zero() {
            return Err(Error::TypeError("division by zero".into()));
        }
        Ok(Number::Int(a % b))
    }

    /// Total numeric ordering across representations
    ///
    /// Floats are compared through their exact rational value.
    pub fn compare(&self, rhs: &Number) -> Ordering {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => a.cmp(b),
            (Number::Flo(a), Number::Flo(b)) => a.cmp(b),
            (a, b) => a.to_rational().cmp(&b.to_rational()),
        }
    }
}

impl From<BigInt> for Number {
    fn from(n: BigInt) -> Self {
        Number::Int(n)
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Number::Int(BigInt::from(n))
    }
}

impl From<BigRational> for Number {
    fn from(r: BigRational) -> Self {
        Number::Rat(r).normalize()
    }
}

/// Plain decimal notation that always contains a `.`
fn write_decimal(f: &mut fmt::Formatter<'_>, value: &BigDecimal) -> fmt::Result {
    let (mantissa, scale) = value.as_bigint_and_exponent();
    let sign = if mantissa.is_negative() { "-" } else { "" };
    let digits = mantissa.abs().to_string();

    if scale <= 0 {
        let zeros = "0".repeat(scale.unsigned_abs() as usize);
        return write!(f, "{sign}{digits}{zeros}.0");
    }

    let scale = scale.unsigned_abs() as usize;
    let padded = if digits.len() <= scale {
        format!("{}{digits}", "0".repeat(scale - digits.len() + 1))
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    let frac_part = frac_part.trim_end_matches('0');
    let frac_part = if frac_part.is_empty() { "0" } else { frac_part };
    write!(f, "{sign}{int_part}.{frac_part}")
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{n}"),
            Number::Rat(r) if r.denom().is_one() => write!(f, "{}", r.numer()),
            Number::Rat(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Number::Flo(d) => write_decimal(f, d),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    fn num(token: &str) -> Number {
        Number::parse(token).unwrap()
    }

    #[test]
    fn test_parse_token_grammar() {
        let test_cases: Vec<(&str, Option<&str>, Option<&str>)> = vec![
            // (token, expected type, expected printed form)
            ("42", Some("Int"), Some("42")),
            ("-17", Some("Int"), Some("-17")),
            ("+5", Some("Int"), Some("5")),
            ("123456789012345678901234567890", Some("Int"), Some("123456789012345678901234567890")),
            ("1/3", Some("Rat"), Some("1/3")),
            ("2/6", Some("Rat"), Some("1/3")),
            ("-4/6", Some("Rat"), Some("-2/3")),
            ("4/2", Some("Int"), Some("2")),
            ("1.5", Some("Flo"), Some("1.5")),
            ("-0.125", Some("Flo"), Some("-0.125")),
            ("2.0", Some("Flo"), Some("2.0")),
            ("-.5", Some("Flo"), Some("-0.5")),
            ("+.25", Some("Flo"), Some("0.25")),
            ("3.", Some("Flo"), Some("3.0")),
            ("0.000", Some("Flo"), Some("0.0")),
            // Not numbers: read as symbols
            ("+", None, None),
            ("-", None, None),
            ("/", None, None),
            ("1/0", None, None),
            ("a/b", None, None),
            ("1/2/3", None, None),
            ("a.b", None, None),
            ("1.2.3", None, None),
            ("12abc", None, None),
            ("1_000", None, None),
            (".", None, None),
            ("-.", None, None),
            ("1.-5", None, None),
            // exponent notation is not part of the grammar
            ("1e5", None, None),
            ("1.5e3", None, None),
            ("1.5E3", None, None),
            ("1.5e-20000000", None, None),
            ("2.0e+9", None, None),
        ];

        for (i, (token, expected_type, expected_print)) in test_cases.iter().enumerate() {
            let parsed = Number::parse(token);
            assert_eq!(
                parsed.as_ref().map(Number::type_name),
                *expected_type,
                "case #{} ({token}): wrong classification",
                i + 1
            );
            if let (Some(n), Some(printed)) = (parsed, expected_print) {
                assert_eq!(n.to_string(), *printed, "case #{} ({token})", i + 1);
            }
        }
    }

    #[test]
    fn test_arithmetic_promotion_and_normalization() {
        type BinOp = fn(&Number, &Number) -> Result<Number, Error>;
        let add: BinOp = |a, b| Ok(a.add(b));
        let sub: BinOp = |a, b| Ok(a.sub(b));
        let mul: BinOp = |a, b| Ok(a.mul(b));
        let div: BinOp = Number::div;
        let rem: BinOp = Number::rem;

        let test_cases: Vec<(BinOp, &str, &str, &str)> = vec![
            (add, "1", "2", "3"),
            (add, "1/2", "1/2", "1"),
            (add, "1/3", "1", "4/3"),
            (add, "1.5", "1", "2.5"),
            (add, "0.5", "0.5", "1"),
            (add, "1/2", "0.25", "0.75"),
            (sub, "10", "3", "7"),
            (sub, "1/2", "1/3", "1/6"),
            (sub, "2.5", "0.5", "2"),
            (mul, "6", "7", "42"),
            (mul, "2/3", "3/2", "1"),
            (mul, "1.5", "2", "3"),
            (mul, "99999999999999999999", "99999999999999999999", "9999999999999999999800000000000000000001"),
            (div, "4", "2", "2"),
            (div, "1", "3", "1/3"),
            (div, "-6", "4", "-3/2"),
            (div, "1/2", "1/4", "2"),
            (div, "1.0", "4", "0.25"),
            (rem, "7", "3", "1"),
            (rem, "-7", "3", "-1"),
        ];

        for (i, (op, lhs, rhs, expected)) in test_cases.iter().enumerate() {
            let result = op(&num(lhs), &num(rhs)).unwrap();
            assert_eq!(result.to_string(), *expected, "case #{}: {lhs} op {rhs}", i + 1);
        }
    }

    #[test]
    fn test_rational_results_are_canonical() {
        let third = num("1").div(&num("3")).unwrap();
        let Number::Rat(r) = &third else {
            panic!("expected Rat, got {third:?}");
        };
        assert_eq!(r.denom(), &BigInt::from(3));

        let whole = num("2/3").add(&num("1/3"));
        assert!(matches!(whole, Number::Int(_)), "got {whole:?}");
    }

    #[test]
    fn test_division_errors() {
        assert!(num("1").div(&num("0")).is_err());
        assert!(num("1.5").div(&num("0.0")).is_err());
        assert!(num("1").rem(&num("0")).is_err());

        let err = num("1.5").rem(&num("2")).unwrap_err();
        assert_eq!(err.message(), "invalid type 'Flo'");
        let err = num("2").rem(&num("1/2")).unwrap_err();
        assert_eq!(err.message(), "invalid type 'Rat'");
    }

    #[test]
    fn test_compare_across_representations() {
        let test_cases = vec![
            ("1", "2", Ordering::Less),
            ("2", "2", Ordering::Equal),
            ("1/2", "0.5", Ordering::Equal),
            ("1/3", "0.3333", Ordering::Greater),
            ("3", "5/2", Ordering::Greater),
            ("-1.5", "-1", Ordering::Less),
            ("2.0", "2", Ordering::Equal),
        ];

        for (i, (lhs, rhs, expected)) in test_cases.iter().enumerate() {
            assert_eq!(num(lhs).compare(&num(rhs)), *expected, "case #{}", i + 1);
        }
    }

    #[test]
    fn test_float_precision_is_bounded() {
        let third = num("1.0").div(&num("3")).unwrap();
        let printed = third.to_string();
        assert!(printed.starts_with("0.3333"), "got {printed}");
        let digits = printed.trim_start_matches("0.").len();
        assert!(digits <= FLOAT_PRECISION as usize, "got {digits} digits");
    }
}
