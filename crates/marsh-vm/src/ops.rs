//! Sémantique des opérateurs : arithmétique vérifiée, comparaisons, `not`.

use std::cmp::Ordering;

use marsh_core::bytecode::{BinOp, UnOp};

use crate::{Value, VmError, VmResult};

/// Plus longue chaîne que `str * int` a le droit de produire (en octets).
pub const MAX_REPEAT_LEN: usize = 1 << 28;

/// Vue numérique d’une valeur (`bool` compte pour 0/1).
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(v: &Value) -> Option<Self> {
        match v {
            Value::Bool(b) => Some(Self::Int(i64::from(*b))),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    const fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

fn unsupported(op: BinOp, lhs: &Value, rhs: &Value) -> VmError {
    VmError::Type(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn overflow(op: BinOp) -> VmError { VmError::Overflow(format!("integer overflow in `{}`", op.symbol())) }

/// Applique `lhs op rhs`.
pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(equals(lhs, rhs))),
        BinOp::Ne => return Ok(Value::Bool(!equals(lhs, rhs))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = compare(op, lhs, rhs)?;
            let hit = ord.is_some_and(|o| match op {
                BinOp::Lt => o == Ordering::Less,
                BinOp::Le => o != Ordering::Greater,
                BinOp::Gt => o == Ordering::Greater,
                _ => o != Ordering::Less,
            });
            return Ok(Value::Bool(hit));
        }
        _ => {}
    }

    // Chaînes
    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            return Ok(Value::Str(s));
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if !matches!(n, Value::Str(_)) => {
            return match Num::of(n) {
                Some(Num::Int(times)) => repeat(s, times),
                _ => Err(unsupported(op, lhs, rhs)),
            };
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (Num::of(lhs), Num::of(rhs)) else {
        return Err(unsupported(op, lhs, rhs));
    };

    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_binary(op, a, b),
        (a, b) => float_binary(op, a.as_f64(), b.as_f64()),
    }
}

fn repeat(s: &str, times: i64) -> VmResult<Value> {
    let Ok(times) = usize::try_from(times) else { return Ok(Value::Str(String::new())) };
    match s.len().checked_mul(times) {
        Some(len) if len <= MAX_REPEAT_LEN => Ok(Value::Str(s.repeat(times))),
        _ => Err(VmError::Overflow(format!("repeated string too long ({} × {times})", s.len()))),
    }
}

fn not_arithmetic(op: BinOp) -> VmError { VmError::Type(format!("`{}` is not an arithmetic operator", op.symbol())) }

#[allow(clippy::cast_precision_loss)]
fn int_binary(op: BinOp, a: i64, b: i64) -> VmResult<Value> {
    let v = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(|| overflow(op))?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(|| overflow(op))?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(|| overflow(op))?,
        BinOp::Div => {
            if b == 0 {
                return Err(VmError::ZeroDivision("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(VmError::ZeroDivision("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(|| overflow(op))?;
            if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(VmError::ZeroDivision("integer division or modulo by zero"));
            }
            // i64::MIN % -1 déborde en Rust, vaut 0
            let r = a.checked_rem(b).unwrap_or(0);
            if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
        }
        _ => return Err(not_arithmetic(op)),
    };
    Ok(Value::Int(v))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> VmResult<Value> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(VmError::ZeroDivision("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(VmError::ZeroDivision("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(VmError::ZeroDivision("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        _ => return Err(not_arithmetic(op)),
    };
    Ok(Value::Float(v))
}

/// Égalité « à la Python » : `1 == 1.0 == True`, types disjoints jamais égaux.
pub fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        _ => match (Num::of(lhs), Num::of(rhs)) {
            (Some(a), Some(b)) => num_cmp(a, b) == Some(Ordering::Equal),
            _ => false,
        },
    }
}

/// Ordre exact entre deux nombres (sans passer l’entier par `f64`) ; `None` si NaN.
fn num_cmp(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (Num::Float(x), Num::Float(y)) => x.partial_cmp(&y),
        (Num::Int(i), Num::Float(f)) => int_float_cmp(i, f),
        (Num::Float(f), Num::Int(i)) => int_float_cmp(i, f).map(Ordering::reverse),
    }
}

/// 2^63, premier flottant au-delà de `i64::MAX`.
const I64_END: f64 = 9_223_372_036_854_775_808.0;

#[allow(clippy::cast_possible_truncation)]
fn int_float_cmp(i: i64, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f >= I64_END {
        return Some(Ordering::Less);
    }
    if f < -I64_END {
        return Some(Ordering::Greater);
    }
    // ici `trunc(f)` tient exactement dans un i64
    let whole = f.trunc();
    let frac = f - whole;
    Some(i.cmp(&(whole as i64)).then_with(|| 0.0_f64.partial_cmp(&frac).unwrap_or(Ordering::Equal)))
}

/// Ordre entre deux valeurs comparables ; `None` si NaN est impliqué.
fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> VmResult<Option<Ordering>> {
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        return Ok(Some(a.cmp(b)));
    }
    match (Num::of(lhs), Num::of(rhs)) {
        (Some(a), Some(b)) => Ok(num_cmp(a, b)),
        _ => Err(VmError::Type(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

/// Applique `op operand`.
pub fn unary(op: UnOp, v: &Value) -> VmResult<Value> {
    let bad = |sym: &str| VmError::Type(format!("bad operand type for unary {sym}: '{}'", v.type_name()));
    match op {
        UnOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnOp::Neg => match Num::of(v) {
            Some(Num::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| VmError::Overflow("integer overflow in unary `-`".into())),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(bad("-")),
        },
        UnOp::Pos => match Num::of(v) {
            Some(Num::Int(i)) => Ok(Value::Int(i)),
            Some(Num::Float(f)) => Ok(Value::Float(f)),
            None => Err(bad("+")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn bin(op: BinOp, a: impl Into<Value>, b: impl Into<Value>) -> VmResult<Value> { binary(op, &a.into(), &b.into()) }

    #[test]
    fn division_family_follows_floor_semantics() {
        assert_eq!(bin(BinOp::Div, 7, 2).unwrap(), Value::Float(3.5));
        assert_eq!(bin(BinOp::FloorDiv, -7, 2).unwrap(), Value::Int(-4));
        assert_eq!(bin(BinOp::Mod, -7, 2).unwrap(), Value::Int(1));
        assert_eq!(bin(BinOp::Mod, 7, -2).unwrap(), Value::Int(-1));
        assert_eq!(bin(BinOp::FloorDiv, 7.5, 2).unwrap(), Value::Float(3.0));
        assert_eq!(bin(BinOp::Mod, -1.0, 3).unwrap(), Value::Float(2.0));
        assert_eq!(bin(BinOp::Mod, i64::MIN, -1).unwrap(), Value::Int(0));
    }

    #[test]
    fn zero_division_and_overflow_are_errors() {
        assert!(matches!(bin(BinOp::Div, 1, 0), Err(VmError::ZeroDivision(_))));
        assert!(matches!(bin(BinOp::Mod, 1.0, 0.0), Err(VmError::ZeroDivision(_))));
        assert!(matches!(bin(BinOp::FloorDiv, 1, false), Err(VmError::ZeroDivision(_))));
        assert!(matches!(bin(BinOp::Add, i64::MAX, 1), Err(VmError::Overflow(_))));
        assert!(matches!(bin(BinOp::FloorDiv, i64::MIN, -1), Err(VmError::Overflow(_))));
        assert!(matches!(unary(UnOp::Neg, &Value::Int(i64::MIN)), Err(VmError::Overflow(_))));
    }

    #[test]
    fn strings_concatenate_and_repeat() {
        assert_eq!(bin(BinOp::Add, "ab", "cd").unwrap(), Value::from("abcd"));
        assert_eq!(bin(BinOp::Mul, "ab", 3).unwrap(), Value::from("ababab"));
        assert_eq!(bin(BinOp::Mul, 2, "x").unwrap(), Value::from("xx"));
        assert_eq!(bin(BinOp::Mul, "x", -1).unwrap(), Value::from(""));
        assert_eq!(bin(BinOp::Mul, "x", true).unwrap(), Value::from("x"));
        assert!(matches!(bin(BinOp::Mul, "x", 1.5), Err(VmError::Type(_))));
        assert!(matches!(bin(BinOp::Add, "x", 1), Err(VmError::Type(_))));
        assert!(matches!(bin(BinOp::Mul, "x", i64::MAX), Err(VmError::Overflow(_))));
    }

    #[test]
    fn comparisons() {
        assert_eq!(bin(BinOp::Eq, 1, 1.0).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Eq, true, 1).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Eq, "1", 1).unwrap(), Value::Bool(false));
        assert_eq!(bin(BinOp::Ne, Value::None, 0).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Lt, "abc", "abd").unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Ge, 2, 2.5).unwrap(), Value::Bool(false));
        assert_eq!(bin(BinOp::Lt, f64::NAN, 1).unwrap(), Value::Bool(false));
        assert_eq!(bin(BinOp::Lt, -3, -2.5).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Gt, 1, f64::NEG_INFINITY).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Eq, 1, f64::INFINITY).unwrap(), Value::Bool(false));
        let err = bin(BinOp::Lt, "a", 1).unwrap_err();
        assert_eq!(err.to_string(), "type error: '<' not supported between instances of 'str' and 'int'");
    }

    #[test]
    fn large_ints_compare_exactly_with_floats() {
        let big = 9_007_199_254_740_993_i64;
        assert_eq!(bin(BinOp::Eq, big, 9_007_199_254_740_992.0).unwrap(), Value::Bool(false));
        assert_eq!(bin(BinOp::Gt, big, 9_007_199_254_740_992.0).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Lt, 9_007_199_254_740_992.0, big).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Eq, big - 1, 9_007_199_254_740_992.0).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Eq, i64::MAX, I64_END).unwrap(), Value::Bool(false));
        assert_eq!(bin(BinOp::Lt, i64::MAX, I64_END).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinOp::Eq, i64::MIN, -I64_END).unwrap(), Value::Bool(true));
    }

    #[test]
    fn unary_ops() {
        assert_eq!(unary(UnOp::Neg, &Value::Bool(true)).unwrap(), Value::Int(-1));
        assert_eq!(unary(UnOp::Pos, &Value::Float(2.0)).unwrap(), Value::Float(2.0));
        assert_eq!(unary(UnOp::Not, &Value::from("")).unwrap(), Value::Bool(true));
        assert!(matches!(unary(UnOp::Neg, &Value::from("x")), Err(VmError::Type(_))));
    }

    proptest! {
        #[test]
        fn floor_div_and_mod_recompose(a in any::<i64>(), b in any::<i64>().prop_filter("non-zero", |b| *b != 0)) {
            prop_assume!(!(a == i64::MIN && b == -1));
            let Value::Int(q) = bin(BinOp::FloorDiv, a, b).unwrap() else { unreachable!() };
            let Value::Int(r) = bin(BinOp::Mod, a, b).unwrap() else { unreachable!() };
            prop_assert_eq!(i128::from(q) * i128::from(b) + i128::from(r), i128::from(a));
            prop_assert!(r == 0 || (r < 0) == (b < 0));
            prop_assert!(r.unsigned_abs() < b.unsigned_abs());
        }

        #[test]
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        fn int_float_equality_is_exact(i in any::<i64>()) {
            let f = i as f64;
            let exact = f < I64_END && f as i128 == i128::from(i);
            prop_assert_eq!(equals(&Value::Int(i), &Value::Float(f)), exact);
            prop_assert_eq!(equals(&Value::Float(f), &Value::Int(i)), exact);
        }

        #[test]
        fn checked_add_matches_i128(a in any::<i64>(), b in any::<i64>()) {
            let wide = i128::from(a) + i128::from(b);
            match bin(BinOp::Add, a, b) {
                Ok(Value::Int(v)) => prop_assert_eq!(i128::from(v), wide),
                Err(VmError::Overflow(_)) => prop_assert!(i64::try_from(wide).is_err()),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
