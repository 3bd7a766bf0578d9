//! marsh — aller-retour d’une unité exécutable
//!
//! Les quatre étapes, chacune portée par son crate :
//!
//! 1. [`compile`]     — source → [`CodeUnit`] (`marsh-compiler`)
//! 2. [`serialize`]   — [`CodeUnit`] → octets (`marsh-marshal`)
//! 3. [`deserialize`] — octets → [`CodeUnit`] équivalente
//! 4. [`execute`]     — exécution sur la VM (`marsh-vm`), sortie sur stdout
//!
//! [`Session`] regroupe les contextes (compilateur, marshaller, VM) pour
//! enchaîner les étapes sans état global :
//!
//! ```
//! use marsh::{Session, SessionOptions, Value};
//!
//! let (mut session, out) = Session::with_captured_stdout(SessionOptions::default());
//! let v = session.round_trip("print('Marshalled code')", "sample", "exec").unwrap();
//! assert_eq!(v, Value::None);
//! assert_eq!(out.get(), "Marshalled code\n");
//! ```

#![deny(missing_docs)]

use log::debug;
use thiserror::Error;

pub use marsh_compiler::{CompileError, Compiler, CompilerOptions, Diagnostic, Severity};
pub use marsh_core::bytecode::{disasm, CodeUnit, Mode};
pub use marsh_marshal::{DeserializeError, MarshalOptions, Marshaller, SerializeError};
pub use marsh_vm::{Captured, Value, Vm, VmError, VmOptions};

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Échec d’une des quatre étapes.
#[derive(Debug, Error)]
pub enum Error {
    /// Source invalide ou mode inconnu.
    #[error("compile: {0}")]
    Compile(#[from] CompileError),
    /// Unité non sérialisable.
    #[error("serialize: {0}")]
    Serialize(#[from] SerializeError),
    /// Octets tronqués, corrompus ou d’une autre version.
    #[error("deserialize: {0}")]
    Deserialize(#[from] DeserializeError),
    /// Faute à l’exécution.
    #[error("execute: {0}")]
    Execute(#[from] VmError),
}

/// Résultat de la façade.
pub type Result<T> = std::result::Result<T, Error>;

/* ─────────────────────────── Étapes isolées ─────────────────────────── */

/// Compile `source` (mode `"exec"` ou `"eval"`) avec les options par défaut.
pub fn compile(source: &str, name: &str, mode: &str) -> std::result::Result<CodeUnit, CompileError> {
    marsh_compiler::compile(source, name, mode)
}

/// Sérialise `unit` (format marsh v1).
pub fn serialize(unit: &CodeUnit) -> std::result::Result<Vec<u8>, SerializeError> { marsh_marshal::dumps(unit) }

/// Reconstruit une unité à partir d’octets produits par [`serialize`].
pub fn deserialize(bytes: &[u8]) -> std::result::Result<CodeUnit, DeserializeError> { marsh_marshal::loads(bytes) }

/// Exécute `unit` sur le vrai stdout.
pub fn execute(unit: &CodeUnit) -> std::result::Result<Value, VmError> { marsh_vm::execute(unit) }

/* ─────────────────────────── Session ─────────────────────────── */

/// Options des trois contextes d’une [`Session`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Compilateur.
    pub compiler: CompilerOptions,
    /// Encodage.
    pub marshal: MarshalOptions,
    /// VM.
    pub vm: VmOptions,
}

/// Compilateur + marshaller + VM ; les globals de la VM persistent d’un appel à l’autre.
pub struct Session {
    compiler: Compiler,
    marshaller: Marshaller,
    vm: Vm,
}

impl Default for Session {
    fn default() -> Self { Self::new(SessionOptions::default()) }
}

impl Session {
    /// Session écrivant sur le vrai stdout.
    pub fn new(opts: SessionOptions) -> Self {
        Self { compiler: Compiler::new(opts.compiler), marshaller: Marshaller::new(opts.marshal), vm: Vm::new(opts.vm) }
    }

    /// Session dont la sortie est capturée.
    pub fn with_captured_stdout(opts: SessionOptions) -> (Self, Captured) {
        let (vm, cap) = Vm::with_captured_stdout(opts.vm);
        (Self { vm, ..Self::new(opts) }, cap)
    }

    /// Compile ; les warnings restent consultables via [`Session::take_diagnostics`].
    pub fn compile(&mut self, source: &str, name: &str, mode: &str) -> Result<CodeUnit> {
        Ok(self.compiler.compile(source, name, mode)?)
    }

    /// Sérialise avec les options de la session.
    pub fn serialize(&self, unit: &CodeUnit) -> Result<Vec<u8>> { Ok(self.marshaller.dumps(unit)?) }

    /// Désérialise.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<CodeUnit> { Ok(self.marshaller.loads(bytes)?) }

    /// Exécute sur la VM de la session.
    pub fn execute(&mut self, unit: &CodeUnit) -> Result<Value> { Ok(self.vm.run(unit)?) }

    /// Les quatre étapes à la suite ; renvoie la valeur de `Return`.
    pub fn round_trip(&mut self, source: &str, name: &str, mode: &str) -> Result<Value> {
        let unit = self.compile(source, name, mode)?;
        let bytes = self.serialize(&unit)?;
        debug!("round trip `{name}`: {} ops → {} bytes", unit.ops.len(), bytes.len());
        let loaded = self.deserialize(&bytes)?;
        self.execute(&loaded)
    }

    /// Diagnostics accumulés par le compilateur (vidés).
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> { self.compiler.take_diagnostics() }
}
