//! Registre des fonctions natives et jeu par défaut
//! (`print`, `len`, `str`, `int`, `float`, `abs`, `repr`).

use std::{collections::HashMap, fmt};

use log::trace;

use crate::{Value, VmCtx, VmError, VmResult};

/// Fonction native : reçoit les arguments positionnels et le contexte mutable.
pub type NativeFn = fn(&[Value], &mut VmCtx) -> VmResult<Value>;

/// Fonction native nommée, appelable depuis le bytecode.
#[derive(Clone, Copy)]
pub struct Builtin {
    /// Nom sous lequel `LoadName` la trouve.
    pub name: &'static str,
    /// Arité fixe ; `None` pour variadique.
    pub arity: Option<usize>,
    /// Pointeur de fonction.
    pub func: NativeFn,
}

impl Builtin {
    /// Vérifie l’arité puis appelle.
    pub fn call(&self, args: &[Value], ctx: &mut VmCtx) -> VmResult<Value> {
        if let Some(expected) = self.arity {
            if args.len() != expected {
                return Err(VmError::Arity { name: self.name, expected, got: args.len() });
            }
        }
        trace!("call {}({} args)", self.name, args.len());
        (self.func)(args, ctx)
    }
}

// Deux natives sont la même si elles portent le même nom dans le registre.
impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool { self.name == other.name }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).field("arity", &self.arity).finish_non_exhaustive()
    }
}

/* ─────────────────────────── Registre ─────────────────────────── */

/// Table nom → native.
#[derive(Debug, Clone, Default)]
pub struct Builtins {
    table: HashMap<&'static str, Builtin>,
}

impl Builtins {
    /// Registre vide.
    pub fn new() -> Self { Self::default() }

    /// Registre préchargé avec les natives par défaut.
    pub fn with_defaults() -> Self {
        let mut b = Self::new();
        b.register_all(&[
            ("print", None, native_print as NativeFn),
            ("len", Some(1), native_len as NativeFn),
            ("str", Some(1), native_str as NativeFn),
            ("repr", Some(1), native_repr as NativeFn),
            ("int", Some(1), native_int as NativeFn),
            ("float", Some(1), native_float as NativeFn),
            ("abs", Some(1), native_abs as NativeFn),
        ]);
        b
    }

    /// Enregistre (ou remplace) une native.
    pub fn register_fn(&mut self, name: &'static str, arity: Option<usize>, func: NativeFn) {
        self.table.insert(name, Builtin { name, arity, func });
    }

    /// Enregistre un lot.
    pub fn register_all(&mut self, entries: &[(&'static str, Option<usize>, NativeFn)]) {
        for (name, arity, func) in entries {
            self.register_fn(name, *arity, *func);
        }
    }

    /// Cherche une native par nom.
    pub fn get(&self, name: &str) -> Option<Builtin> { self.table.get(name).copied() }

    /// Nombre de natives enregistrées.
    pub fn len(&self) -> usize { self.table.len() }

    /// Registre vide ?
    pub fn is_empty(&self) -> bool { self.table.is_empty() }
}

/* ─────────────────────────── Natives par défaut ─────────────────────────── */

fn native_print(args: &[Value], ctx: &mut VmCtx) -> VmResult<Value> {
    let line = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
    ctx.writeln_str(&line)?;
    Ok(Value::None)
}

fn native_len(args: &[Value], _ctx: &mut VmCtx) -> VmResult<Value> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX))),
        other => Err(VmError::Type(format!("object of type '{}' has no len()", other.type_name()))),
    }
}

fn native_str(args: &[Value], _ctx: &mut VmCtx) -> VmResult<Value> { Ok(Value::Str(args[0].to_string())) }

fn native_repr(args: &[Value], _ctx: &mut VmCtx) -> VmResult<Value> { Ok(Value::Str(args[0].repr())) }

// Bornes exactes de i64 en f64 : [-2^63, 2^63).
const I64_MIN_F: f64 = -9_223_372_036_854_775_808.0;
const I64_END_F: f64 = 9_223_372_036_854_775_808.0;

#[allow(clippy::cast_possible_truncation)]
fn native_int(args: &[Value], _ctx: &mut VmCtx) -> VmResult<Value> {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) if f.is_nan() => Err(VmError::InvalidValue("cannot convert float NaN to integer".into())),
        Value::Float(f) => {
            let t = f.trunc();
            if (I64_MIN_F..I64_END_F).contains(&t) {
                Ok(Value::Int(t as i64))
            } else {
                Err(VmError::Overflow(format!("float {} does not fit in an integer", Value::Float(*f))))
            }
        }
        Value::Str(s) => s.trim().replace('_', "").parse::<i64>().map(Value::Int).map_err(|e| {
            use std::num::IntErrorKind;
            match e.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                    VmError::Overflow(format!("integer literal {} out of range", Value::Str(s.clone()).repr()))
                }
                _ => VmError::InvalidValue(format!(
                    "invalid literal for int() with base 10: {}",
                    Value::Str(s.clone()).repr()
                )),
            }
        }),
        other => Err(VmError::Type(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn native_float(args: &[Value], _ctx: &mut VmCtx) -> VmResult<Value> {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Float(f64::from(u8::from(*b)))),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            VmError::InvalidValue(format!("could not convert string to float: {}", Value::Str(s.clone()).repr()))
        }),
        other => Err(VmError::Type(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn native_abs(args: &[Value], _ctx: &mut VmCtx) -> VmResult<Value> {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| VmError::Overflow("integer overflow in abs()".into())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(VmError::Type(format!("bad operand type for abs(): '{}'", other.type_name()))),
    }
}
