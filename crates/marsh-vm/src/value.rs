//! Valeurs dynamiques manipulées par la VM, et leurs deux rendus texte
//! (`str()` via [`fmt::Display`], `repr()` via [`Value::repr`]).

use std::fmt::{self, Write as _};

use marsh_core::bytecode::ConstValue;

use crate::builtins::Builtin;

/// Valeur dynamique sur la pile / dans les globals.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// `None`.
    None,
    /// Booléen (compte pour 0/1 en arithmétique).
    Bool(bool),
    /// Entier 64 bits signé ; les débordements sont des erreurs.
    Int(i64),
    /// Flottant 64 bits.
    Float(f64),
    /// Chaîne UTF-8 possédée.
    Str(String),
    /// Fonction native.
    Builtin(Builtin),
}

impl Value {
    /// Nom du type, tel qu’affiché dans les messages d’erreur.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Builtin(_) => "builtin_function_or_method",
        }
    }

    /// Faux pour `None`, `False`, `0`, `0.0` et `''`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Builtin(_) => true,
        }
    }

    /// Représentation « source » (`'abc'` pour une chaîne, le reste comme `str()`).
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => quote(s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Str(s) => f.write_str(s),
            Self::Builtin(b) => write!(f, "<built-in function {}>", b.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) if s.chars().count() > 64 => {
                let head: String = s.chars().take(64).collect();
                write!(f, "Str({head:?}…)")
            }
            Self::Builtin(b) => write!(f, "Builtin({})", b.name),
            other => f.write_str(&other.repr()),
        }
    }
}

impl From<&ConstValue> for Value {
    fn from(c: &ConstValue) -> Self {
        match c {
            ConstValue::None => Self::None,
            ConstValue::Bool(b) => Self::Bool(*b),
            ConstValue::Int(v) => Self::Int(*v),
            ConstValue::Float(v) => Self::Float(*v),
            ConstValue::Str(s) => Self::Str(s.clone()),
        }
    }
}

/* Conversions pratiques */
impl From<()> for Value { fn from((): ()) -> Self { Self::None } }
impl From<bool> for Value { fn from(v: bool) -> Self { Self::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Self::Int(i64::from(v)) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Self::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Self::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Self::Str(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Self::Str(v.to_owned()) } }

/* ─────────────────────────── Rendu texte ─────────────────────────── */

/// Rendu d’un flottant façon Python : `1.0`, `0.1`, `1e+16`, `1.5e-07`, `inf`, `nan`.
///
/// Les chiffres viennent de `{:e}` (plus courte écriture qui relit la même valeur),
/// la mise en forme bascule en notation scientifique hors de `[1e-4, 1e16)`.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0.0".into() } else { "0.0".into() };
    }

    let sci = format!("{v:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else { return format!("{v}") };
    let Ok(exp) = exp.parse::<i32>() else { return format!("{v}") };
    let (sign, mantissa) = mantissa.strip_prefix('-').map_or(("", mantissa), |m| ("-", m));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let mut out = String::from(sign);
    if (-4..16).contains(&exp) {
        if exp < 0 {
            out.push_str("0.");
            out.push_str(&"0".repeat(exp.unsigned_abs() as usize - 1));
            out.push_str(&digits);
        } else {
            let point = exp.unsigned_abs() as usize + 1;
            if digits.len() <= point {
                out.push_str(&digits);
                out.push_str(&"0".repeat(point - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..point]);
                out.push('.');
                out.push_str(&digits[point..]);
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let _ = write!(out, "e{}{:02}", if exp < 0 { '-' } else { '+' }, exp.unsigned_abs());
    }
    out
}

/// Chaîne entre quotes, `'` par défaut, `"` si seule `'` apparaît.
fn quote(s: &str) -> String {
    let q = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push(q);
    out
}
