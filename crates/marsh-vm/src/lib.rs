//! marsh-vm — interpréteur à pile pour [`CodeUnit`]
//!
//! - [`Value`]    : valeur dynamique (None/Bool/Int/Float/Str/Builtin)
//! - [`Vm`]       : globals + registre de natives + sortie, options [`VmOptions`]
//! - [`VmCtx`]    : contexte passé aux natives (sortie standard, capturable)
//! - [`Builtins`] : registre `nom → native`, `register_fn` / `with_defaults()`
//! - [`Captured`] : writer qui garde la sortie en mémoire (tests, démo)
//!
//! Le résultat d’une exécution est la valeur dépilée par `Return` : la valeur
//! de l’expression en mode `eval`, `None` en mode `exec`.
//!
//! La VM ne fait pas confiance au bytecode : index de constantes/noms et cibles
//! de saut sont revérifiés, la pile est bornée par [`VmOptions::max_stack`].

#![deny(missing_docs)]

use std::{
    collections::HashMap,
    io::{self, Write},
    sync::Arc,
};

use log::{debug, trace};
use marsh_core::bytecode::{CodeUnit, Op};
use parking_lot::Mutex;
use smallvec::SmallVec;
use thiserror::Error;

pub mod builtins;
pub mod ops;
pub mod value;

pub use builtins::{Builtin, Builtins, NativeFn};
pub use value::Value;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs d’exécution.
#[derive(Debug, Error)]
pub enum VmError {
    /// Nom absent des globals et des natives.
    #[error("name '{0}' is not defined")]
    UndefinedName(String),
    /// Opérande(s) de type incompatible.
    #[error("type error: {0}")]
    Type(String),
    /// Valeur du bon type mais inacceptable (`int('abc')`).
    #[error("value error: {0}")]
    InvalidValue(String),
    /// Division ou modulo par zéro.
    #[error("zero division: {0}")]
    ZeroDivision(&'static str),
    /// Débordement d’entier (ou résultat trop grand).
    #[error("overflow: {0}")]
    Overflow(String),
    /// Appel d’une valeur non appelable.
    #[error("'{0}' object is not callable")]
    NotCallable(&'static str),
    /// Mauvais nombre d’arguments pour une native.
    #[error("{name}() takes {expected} argument(s) ({got} given)")]
    Arity {
        /// Nom de la native.
        name: &'static str,
        /// Arguments attendus.
        expected: usize,
        /// Arguments reçus.
        got: usize,
    },
    /// Dépilement sur pile vide.
    #[error("stack underflow at pc {pc}")]
    StackUnderflow {
        /// Instruction fautive.
        pc: usize,
    },
    /// Pile pleine.
    #[error("stack overflow (limit {limit})")]
    StackOverflow {
        /// Limite configurée.
        limit: usize,
    },
    /// Opérande hors bornes (constante, nom, cible de saut) ou fin de code sans `Return`.
    #[error("invalid operand at pc {pc}: {what}")]
    InvalidOperand {
        /// Instruction fautive.
        pc: usize,
        /// Description.
        what: String,
    },
    /// Écriture sur la sortie impossible.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Résultat de la VM.
pub type VmResult<T> = Result<T, VmError>;

/* ─────────────────────────── Contexte & sortie ─────────────────────────── */

/// Contexte passé aux natives.
pub struct VmCtx {
    /// Sortie vers laquelle `print` écrit.
    pub out: Box<dyn Write + Send>,
}

impl VmCtx {
    /// Contexte écrivant dans `w`.
    pub fn new<W: Write + Send + 'static>(w: W) -> Self { Self { out: Box::new(w) } }

    /// Contexte sur le vrai stdout.
    pub fn stdout() -> Self { Self::new(io::stdout()) }

    /// Contexte dont la sortie est capturée.
    pub fn captured() -> (Self, Captured) {
        let cap = Captured::default();
        (Self::new(cap.clone()), cap)
    }

    /// Écrit un texte brut.
    pub fn write_str(&mut self, s: &str) -> io::Result<()> { self.out.write_all(s.as_bytes()) }

    /// Écrit une ligne terminée par `\n`.
    pub fn writeln_str(&mut self, s: &str) -> io::Result<()> {
        self.out.write_all(s.as_bytes())?;
        self.out.write_all(b"\n")
    }
}

/// Writer qui **capture** la sortie en mémoire ; les clones partagent le tampon.
#[derive(Default, Clone)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    /// Copie du tampon (UTF-8 « lossy »).
    pub fn get(&self) -> String { String::from_utf8_lossy(&self.0.lock()).into_owned() }
    /// Vide le tampon.
    pub fn clear(&self) { self.0.lock().clear(); }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

/* ─────────────────────────── VM ─────────────────────────── */

/// Options d’exécution.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    /// Profondeur maximale de la pile d’opérandes.
    pub max_stack: usize,
}

impl Default for VmOptions {
    fn default() -> Self { Self { max_stack: 1024 } }
}

type Stack = SmallVec<[Value; 16]>;

/// Machine virtuelle : globals persistants entre deux [`Vm::run`].
pub struct Vm {
    opts: VmOptions,
    globals: HashMap<String, Value>,
    builtins: Builtins,
    ctx: VmCtx,
}

impl Default for Vm {
    fn default() -> Self { Self::new(VmOptions::default()) }
}

impl Vm {
    /// VM sur le vrai stdout, natives par défaut.
    pub fn new(opts: VmOptions) -> Self {
        Self { opts, globals: HashMap::new(), builtins: Builtins::with_defaults(), ctx: VmCtx::stdout() }
    }

    /// Variante utile pour tests : sortie capturée.
    pub fn with_captured_stdout(opts: VmOptions) -> (Self, Captured) {
        let (ctx, cap) = VmCtx::captured();
        (Self { ctx, ..Self::new(opts) }, cap)
    }

    /// Variables globales.
    pub const fn globals(&self) -> &HashMap<String, Value> { &self.globals }

    /// Enregistre une native supplémentaire.
    pub fn register_fn(&mut self, name: &'static str, arity: Option<usize>, func: NativeFn) {
        self.builtins.register_fn(name, arity, func);
    }

    /// Exécute `unit` jusqu’à `Return` et renvoie la valeur dépilée.
    pub fn run(&mut self, unit: &CodeUnit) -> VmResult<Value> {
        debug!("run `{}` ({}, {} ops)", unit.name, unit.mode, unit.ops.len());
        let mut stack = Stack::new();
        let mut pc = 0usize;
        let mut steps = 0u64;

        let result = loop {
            let Some(&op) = unit.ops.get(pc) else {
                break Err(VmError::InvalidOperand { pc, what: "ran past the last op without `Return`".into() });
            };
            trace!("{pc:04} {op:?} (depth {})", stack.len());
            steps += 1;
            match self.step(unit, op, pc, &mut stack) {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(target)) => pc = target,
                Ok(Flow::Return(v)) => break Ok(v),
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(v) => debug!("`{}` returned {v:?} after {steps} ops", unit.name),
            Err(e) => {
                let line = u32::try_from(pc).ok().and_then(|pc| unit.line_for_pc(pc));
                match line {
                    Some(line) => debug!("`{}` failed at pc {pc} (line {line}): {e}", unit.name),
                    None => debug!("`{}` failed at pc {pc}: {e}", unit.name),
                }
            }
        }
        self.ctx.out.flush()?;
        result
    }

    fn step(&mut self, unit: &CodeUnit, op: Op, pc: usize, stack: &mut Stack) -> VmResult<Flow> {
        match op {
            Op::LoadConst(ix) => {
                let c = unit.consts.get(ix).ok_or_else(|| bad_index(pc, "constant", ix))?;
                self.push(stack, Value::from(c))?;
            }
            Op::LoadName(ix) => {
                let name = unit.names.get(ix).ok_or_else(|| bad_index(pc, "name", ix))?;
                let v = match self.globals.get(name) {
                    Some(v) => v.clone(),
                    None => self
                        .builtins
                        .get(name)
                        .map(Value::Builtin)
                        .ok_or_else(|| VmError::UndefinedName(name.to_owned()))?,
                };
                self.push(stack, v)?;
            }
            Op::StoreName(ix) => {
                let name = unit.names.get(ix).ok_or_else(|| bad_index(pc, "name", ix))?;
                let v = pop(stack, pc)?;
                self.globals.insert(name.to_owned(), v);
            }
            Op::Pop => {
                pop(stack, pc)?;
            }
            Op::Binary(bin) => {
                let rhs = pop(stack, pc)?;
                let lhs = pop(stack, pc)?;
                self.push(stack, ops::binary(bin, &lhs, &rhs)?)?;
            }
            Op::Unary(un) => {
                let v = pop(stack, pc)?;
                self.push(stack, ops::unary(un, &v)?)?;
            }
            Op::Jump(t) => return Ok(Flow::Jump(target(unit, pc, t)?)),
            Op::PopJumpIfFalse(t) => {
                let t = target(unit, pc, t)?;
                if !pop(stack, pc)?.is_truthy() {
                    return Ok(Flow::Jump(t));
                }
            }
            Op::JumpIfFalseOrPop(t) | Op::JumpIfTrueOrPop(t) => {
                let t = target(unit, pc, t)?;
                let top = stack.last().ok_or(VmError::StackUnderflow { pc })?;
                if top.is_truthy() == matches!(op, Op::JumpIfTrueOrPop(_)) {
                    return Ok(Flow::Jump(t));
                }
                stack.pop();
            }
            Op::Call(argc) => {
                let argc = usize::from(argc);
                if stack.len() < argc + 1 {
                    return Err(VmError::StackUnderflow { pc });
                }
                let args: SmallVec<[Value; 8]> = stack.drain(stack.len() - argc..).collect();
                let result = match pop(stack, pc)? {
                    Value::Builtin(f) => f.call(&args, &mut self.ctx)?,
                    other => return Err(VmError::NotCallable(other.type_name())),
                };
                self.push(stack, result)?;
            }
            Op::Return => return Ok(Flow::Return(pop(stack, pc)?)),
        }
        Ok(Flow::Next)
    }

    fn push(&self, stack: &mut Stack, v: Value) -> VmResult<()> {
        if stack.len() >= self.opts.max_stack {
            return Err(VmError::StackOverflow { limit: self.opts.max_stack });
        }
        stack.push(v);
        Ok(())
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(Value),
}

fn pop(stack: &mut Stack, pc: usize) -> VmResult<Value> { stack.pop().ok_or(VmError::StackUnderflow { pc }) }

fn bad_index(pc: usize, table: &str, ix: u32) -> VmError {
    VmError::InvalidOperand { pc, what: format!("{table} index {ix} out of range") }
}

fn target(unit: &CodeUnit, pc: usize, t: u32) -> VmResult<usize> {
    let t = t as usize;
    if t < unit.ops.len() {
        Ok(t)
    } else {
        Err(VmError::InvalidOperand { pc, what: format!("jump target {t} out of range") })
    }
}

/// Exécute `unit` sur le vrai stdout avec les options par défaut.
pub fn execute(unit: &CodeUnit) -> VmResult<Value> { Vm::default().run(unit) }

/* ─────────────────────────── Prelude ─────────────────────────── */

/// Prelude pratique pour importer d’un coup.
pub mod prelude {
    pub use crate::{execute, Builtin, Builtins, Captured, NativeFn, Value, Vm, VmCtx, VmError, VmOptions, VmResult};
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use marsh_core::bytecode::{BinOp, ConstValue, Mode};
    use pretty_assertions::assert_eq;

    fn eval(src: &str) -> VmResult<Value> {
        let unit = marsh_compiler::compile(src, "t", "eval").unwrap();
        Vm::with_captured_stdout(VmOptions::default()).0.run(&unit)
    }

    fn exec(src: &str) -> (VmResult<Value>, String) {
        let unit = marsh_compiler::compile(src, "t", "exec").unwrap();
        let (mut vm, cap) = Vm::with_captured_stdout(VmOptions::default());
        let r = vm.run(&unit);
        (r, cap.get())
    }

    #[test]
    fn sample_prints_one_line() {
        let (r, out) = exec("print('Marshalled code')");
        assert_eq!(r.unwrap(), Value::None);
        assert_eq!(out, "Marshalled code\n");
    }

    #[test]
    fn eval_returns_the_expression_value() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(eval("7 / 2").unwrap(), Value::Float(3.5));
        assert_eq!(eval("'ab' * 2 + 'c'").unwrap(), Value::from("ababc"));
        assert_eq!(eval("len('abc') == 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("'yes' if 0 else 'no'").unwrap(), Value::from("no"));
    }

    #[test]
    fn short_circuit_keeps_the_deciding_operand() {
        assert_eq!(eval("0 or 'x'").unwrap(), Value::from("x"));
        assert_eq!(eval("'' and undefined_name").unwrap(), Value::from(""));
        assert_eq!(eval("1 and 2").unwrap(), Value::Int(2));
        assert_eq!(eval("not None").unwrap(), Value::Bool(true));
    }

    #[test]
    fn globals_then_builtins() {
        let (r, out) = exec("x = 2\ny = x * 21\nprint('y =', y)\nlen = 5\nprint(len)");
        r.unwrap();
        assert_eq!(out, "y = 42\n5\n");
    }

    #[test]
    fn globals_persist_across_runs() {
        let (mut vm, cap) = Vm::with_captured_stdout(VmOptions::default());
        vm.run(&marsh_compiler::compile("n = 40", "a", "exec").unwrap()).unwrap();
        vm.run(&marsh_compiler::compile("print(n + 2)", "b", "exec").unwrap()).unwrap();
        assert_eq!(cap.get(), "42\n");
        assert_eq!(vm.globals().get("n"), Some(&Value::Int(40)));
    }

    #[test]
    fn runtime_faults() {
        assert!(matches!(eval("nope"), Err(VmError::UndefinedName(n)) if n == "nope"));
        assert!(matches!(eval("1 // 0"), Err(VmError::ZeroDivision(_))));
        assert!(matches!(eval("9223372036854775807 + 1"), Err(VmError::Overflow(_))));
        assert!(matches!(eval("'a' < 1"), Err(VmError::Type(_))));
        assert!(matches!(eval("(1)(2)"), Err(VmError::NotCallable("int"))));
        assert!(matches!(eval("abs(1, 2)"), Err(VmError::Arity { name: "abs", .. })));
    }

    #[test]
    fn output_written_before_a_fault_is_kept() {
        let (r, out) = exec("print('before')\nprint(1 / 0)\nprint('after')");
        assert!(matches!(r, Err(VmError::ZeroDivision(_))));
        assert_eq!(out, "before\n");
    }

    #[test]
    fn stack_limit_is_enforced() {
        let unit = marsh_compiler::compile("1 + (2 + (3 + 4))", "deep", "eval").unwrap();
        let (mut vm, _) = Vm::with_captured_stdout(VmOptions { max_stack: 2 });
        assert!(matches!(vm.run(&unit), Err(VmError::StackOverflow { limit: 2 })));
    }

    #[test]
    fn untrusted_bytecode_is_rechecked() {
        let mut unit = CodeUnit::new("bad", Mode::Eval);
        unit.ops = vec![Op::Binary(BinOp::Add), Op::Return];
        assert!(matches!(execute(&unit), Err(VmError::StackUnderflow { pc: 0 })));

        let mut unit = CodeUnit::new("bad", Mode::Eval);
        unit.ops = vec![Op::LoadConst(3), Op::Return];
        assert!(matches!(execute(&unit), Err(VmError::InvalidOperand { pc: 0, .. })));

        let mut unit = CodeUnit::new("bad", Mode::Eval);
        unit.add_const(ConstValue::Int(1));
        unit.ops = vec![Op::LoadConst(0), Op::Pop];
        assert!(matches!(execute(&unit), Err(VmError::InvalidOperand { pc: 2, .. })));
    }

    #[test]
    fn custom_native() {
        let (mut vm, cap) = Vm::with_captured_stdout(VmOptions::default());
        vm.register_fn("shout", Some(1), |args, ctx| {
            ctx.write_str(&args[0].to_string().to_uppercase())?;
            Ok(Value::None)
        });
        vm.run(&marsh_compiler::compile("shout('hey')", "c", "exec").unwrap()).unwrap();
        assert_eq!(cap.get(), "HEY");
    }
}
