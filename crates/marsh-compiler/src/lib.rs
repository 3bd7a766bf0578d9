//! marsh-compiler — source → `CodeUnit`
//!
//! - Entrée : texte source + nom d’unité + mode (`exec` / `eval`)
//! - Sortie : [`CodeUnit`] validée (consts, noms, ops, lignes)
//! - Diagnostics : warnings collectés avec localisation
//! - Passes (trait [`Pass`]) + backend (trait [`Emitter`])
//!
//! API principale :
//! ```
//! use marsh_compiler::{Compiler, CompilerOptions};
//!
//! let mut c = Compiler::new(CompilerOptions::default());
//! let unit = c.compile("print('hi')", "sample", "exec").unwrap();
//! assert_eq!(unit.name, "sample");
//! ```

#![deny(missing_docs)]

use std::fmt;

use log::{debug, warn};
use marsh_ast as ast;
use marsh_core::{
    bytecode::{helpers::validate_unit, CodeUnit, Mode, UnitFlags},
    CoreError, SourceId,
};
use marsh_lexer::LexerOptions;
use marsh_parser::{ParseError, Parser};
use thiserror::Error;

mod emit;
mod passes;

pub use emit::{Emitter, UnitEmitter};
pub use passes::{ConstFold, Lint};

/// Nombre maximal d’arguments d’un appel (opérande `u8` de `Call`).
pub const MAX_CALL_ARGS: usize = u8::MAX as usize;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Options du compilateur
#[derive(Debug, Clone, Copy)]
pub struct CompilerOptions {
    /// Replier les constantes littérales (marque l’unité `OPTIMIZED`)
    pub optimize: bool,
    /// Émettre la table des lignes (sinon l’unité est `STRIPPED`)
    pub emit_lines: bool,
    /// Warnings → erreurs
    pub deny_warnings: bool,
    /// Options transmises au lexer
    pub lexer: LexerOptions,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { optimize: false, emit_lines: true, deny_warnings: false, lexer: LexerOptions::default() }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Diagnostics */
// ─────────────────────────────────────────────────────────────────────────────

/// Gravité d’un diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Alerte
    Warning,
    /// Erreur bloquante
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Un diagnostic (message, gravité, localisation optionnelle)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Gravité
    pub severity: Severity,
    /// Message humain
    pub message: String,
    /// Localisation
    pub loc: Option<ast::Loc>,
}

impl Diagnostic {
    /// Construit un warning
    pub fn warn(msg: impl Into<String>, loc: Option<ast::Loc>) -> Self {
        Self { severity: Severity::Warning, message: msg.into(), loc }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}:{}: {}: {}", loc.line, loc.column, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Erreurs */
// ─────────────────────────────────────────────────────────────────────────────

/// Erreur de compilation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Source lexicalement ou syntaxiquement invalide.
    #[error("syntax error: {message} (line {line}, column {column})")]
    Syntax {
        /// Message humain.
        message: String,
        /// Ligne (1-based).
        line: u32,
        /// Colonne (1-based).
        column: u32,
    },
    /// Mode inconnu (ni `exec` ni `eval`).
    #[error("invalid compile mode `{0}` (expected `exec` or `eval`)")]
    InvalidMode(String),
    /// Diagnostics bloquants (erreurs, ou warnings avec `deny_warnings`).
    #[error("compilation rejected: {}", first_message(.diagnostics))]
    Rejected {
        /// Diagnostics accumulés.
        diagnostics: Vec<Diagnostic>,
    },
    /// Limite du format dépassée.
    #[error("{what} exceeds the limit of {limit} (line {line})")]
    Limit {
        /// Ce qui déborde.
        what: &'static str,
        /// Limite autorisée.
        limit: usize,
        /// Ligne fautive.
        line: u32,
    },
    /// Unité émise incohérente.
    #[error("internal compiler error: {0}")]
    Internal(#[from] CoreError),
}

fn first_message(diags: &[Diagnostic]) -> String {
    match diags {
        [] => "no diagnostics".to_owned(),
        [one] => one.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self { Self::Syntax { message: e.message, line: e.line, column: e.column } }
}

/// Alias résultat du compilateur.
pub type CompileResult<T> = Result<T, CompileError>;

// ─────────────────────────────────────────────────────────────────────────────
/* Arbre & Passes */
// ─────────────────────────────────────────────────────────────────────────────

/// Résultat du parsing, selon le mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// Suite d’instructions.
    Exec(ast::Program),
    /// Expression unique.
    Eval(ast::Expr),
}

/// Contexte mut partagé entre passes
pub struct Ctx<'a> {
    /// Options
    pub opts: &'a CompilerOptions,
    /// Diagnostics accumulés
    pub diags: &'a mut Vec<Diagnostic>,
}

/// Trait générique d’une passe de compilation
pub trait Pass {
    /// Nom court (logs).
    fn name(&self) -> &'static str;
    /// Exécuter la passe sur l’arbre (peut le réécrire)
    fn run(&mut self, ctx: &mut Ctx<'_>, tree: &mut Parsed) -> CompileResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
/* Compiler façade */
// ─────────────────────────────────────────────────────────────────────────────

/// Le compilateur : parse, orchestre les passes, puis le backend
pub struct Compiler {
    /// Options
    pub options: CompilerOptions,
    diags: Vec<Diagnostic>,
}

impl Compiler {
    /// Crée un compilateur
    pub const fn new(options: CompilerOptions) -> Self { Self { options, diags: Vec::new() } }

    /// Compile `source` ; `mode` vaut `"exec"` ou `"eval"`.
    pub fn compile(&mut self, source: &str, name: &str, mode: &str) -> CompileResult<CodeUnit> {
        let mode = mode.parse::<Mode>().map_err(|e| match e {
            CoreError::UnknownMode(m) => CompileError::InvalidMode(m),
            other => CompileError::Internal(other),
        })?;
        self.compile_mode(source, name, mode)
    }

    /// Compile `source` avec un [`Mode`] déjà résolu.
    pub fn compile_mode(&mut self, source: &str, name: &str, mode: Mode) -> CompileResult<CodeUnit> {
        self.diags.clear();

        // 1) Parsing
        let mut parser = Parser::with_options(source, SourceId(0), self.options.lexer)?;
        let mut tree = match mode {
            Mode::Exec => Parsed::Exec(parser.parse_program()?),
            Mode::Eval => Parsed::Eval(parser.parse_expression()?),
        };

        // 2) Passes
        let mut passes: Vec<Box<dyn Pass>> = vec![Box::new(Lint)];
        if self.options.optimize {
            passes.push(Box::new(ConstFold::default()));
        }
        for pass in &mut passes {
            let mut ctx = Ctx { opts: &self.options, diags: &mut self.diags };
            pass.run(&mut ctx, &mut tree)?;
            debug!("pass `{}` done ({} diagnostics so far)", pass.name(), self.diags.len());
        }

        // Vérif diagnostics (`deny_warnings` : warnings promus en erreurs)
        for d in &mut self.diags {
            if self.options.deny_warnings && d.severity == Severity::Warning {
                d.severity = Severity::Error;
            }
            warn!("{name}: {d}");
        }
        if self.diags.iter().any(|d| d.severity == Severity::Error) {
            return Err(CompileError::Rejected { diagnostics: std::mem::take(&mut self.diags) });
        }

        // 3) Backend
        let mut emitter = UnitEmitter::new(name, mode);
        if !self.options.emit_lines {
            emitter.strip_lines();
        }
        let mut unit = emitter.emit(&tree)?;
        if self.options.optimize {
            unit.set_flags(unit.flags() | UnitFlags::OPTIMIZED);
        }

        // 4) Cohérence
        validate_unit(&unit)?;
        debug!(
            "compiled `{}` ({}): {} ops, {} consts, {} names",
            unit.name,
            unit.mode,
            unit.ops.len(),
            unit.consts.len(),
            unit.names.len()
        );
        Ok(unit)
    }

    /// Diagnostics de la dernière compilation
    pub fn diagnostics(&self) -> &[Diagnostic] { &self.diags }

    /// Récupère et vide les diagnostics accumulés
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> { std::mem::take(&mut self.diags) }
}

impl Default for Compiler {
    fn default() -> Self { Self::new(CompilerOptions::default()) }
}

/// Raccourci : compile avec les options par défaut.
pub fn compile(source: &str, name: &str, mode: &str) -> CompileResult<CodeUnit> {
    Compiler::default().compile(source, name, mode)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use marsh_core::bytecode::{BinOp, ConstValue, Op};
    use pretty_assertions::assert_eq;

    #[test]
    fn sample_exec_unit() {
        let unit = compile("print('Marshalled code')", "sample", "exec").unwrap();
        assert_eq!(unit.name, "sample");
        assert_eq!(unit.mode, Mode::Exec);
        assert_eq!(
            unit.ops,
            vec![Op::LoadName(0), Op::LoadConst(0), Op::Call(1), Op::Pop, Op::LoadConst(1), Op::Return]
        );
        assert_eq!(unit.consts.get(0), Some(&ConstValue::Str("Marshalled code".into())));
        assert_eq!(unit.consts.get(1), Some(&ConstValue::None));
        assert_eq!(unit.names.get(0), Some("print"));
        assert_eq!(unit.lines.len(), unit.ops.len());
    }

    #[test]
    fn eval_unit_returns_expression() {
        let unit = compile("1 + 2", "e", "eval").unwrap();
        assert_eq!(unit.ops, vec![Op::LoadConst(0), Op::LoadConst(1), Op::Binary(BinOp::Add), Op::Return]);
    }

    #[test]
    fn invalid_mode() {
        let e = compile("1", "x", "single").unwrap_err();
        assert_eq!(e, CompileError::InvalidMode("single".into()));
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let e = compile("print('unterminated", "sample", "exec").unwrap_err();
        assert!(matches!(e, CompileError::Syntax { line: 1, column: 7, .. }), "{e:?}");
    }

    #[test]
    fn eval_rejects_statements() {
        assert!(matches!(compile("x = 1", "e", "eval"), Err(CompileError::Syntax { .. })));
    }

    #[test]
    fn lint_warning_is_kept_or_denied() {
        let mut c = Compiler::default();
        assert!(c.compile("42\nprint(1)", "w", "exec").is_ok());
        assert_eq!(c.diagnostics().len(), 1);
        assert_eq!(c.diagnostics()[0].to_string(), "1:1: warning: statement has no effect");

        let mut strict = Compiler::new(CompilerOptions { deny_warnings: true, ..CompilerOptions::default() });
        let e = strict.compile("42", "w", "exec").unwrap_err();
        assert!(matches!(&e, CompileError::Rejected { diagnostics } if diagnostics[0].severity == Severity::Error));
        assert_eq!(e.to_string(), "compilation rejected: 1:1: error: statement has no effect");
    }

    #[test]
    fn stripped_and_optimized_flags() {
        let opts = CompilerOptions { optimize: true, emit_lines: false, ..CompilerOptions::default() };
        let unit = Compiler::new(opts).compile("x = 2 * 3", "f", "exec").unwrap();
        assert!(unit.is_stripped());
        assert!(unit.lines.is_empty());
        assert!(unit.flags().contains(UnitFlags::OPTIMIZED));
        assert_eq!(unit.ops[0], Op::LoadConst(0));
        assert_eq!(unit.consts.get(0), Some(&ConstValue::Int(6)));
    }

    #[test]
    fn too_many_arguments() {
        let args = vec!["1"; MAX_CALL_ARGS + 1].join(", ");
        let e = compile(&format!("print({args})"), "big", "exec").unwrap_err();
        assert!(matches!(e, CompileError::Limit { limit: 255, line: 1, .. }), "{e:?}");

        let args = vec!["1"; MAX_CALL_ARGS].join(", ");
        assert!(compile(&format!("print({args})"), "ok", "exec").is_ok());
    }

    #[test]
    fn deep_expressions_are_syntax_errors() {
        let src = format!("{}1", "not ".repeat(100_000));
        let e = compile(&src, "deep", "eval").unwrap_err();
        assert!(matches!(&e, CompileError::Syntax { message, .. } if message == "expression nested too deeply"), "{e:?}");

        let src = format!("x = 1{}", " * 2".repeat(10_000));
        let opts = CompilerOptions { optimize: true, ..CompilerOptions::default() };
        assert!(matches!(Compiler::new(opts).compile(&src, "wide", "exec"), Err(CompileError::Syntax { .. })));

        let src = format!("x = 1{}", " * 2".repeat(100));
        assert!(Compiler::new(opts).compile(&src, "ok", "exec").is_ok());
    }

    #[test]
    fn line_numbers_follow_statements() {
        let unit = compile("a = 1\n\nprint(a)", "l", "exec").unwrap();
        assert_eq!(unit.line_for_pc(0), Some(1));
        assert_eq!(unit.line_for_pc(2), Some(3));
    }
}
