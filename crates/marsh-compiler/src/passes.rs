//! Passes sur l’arbre : lint puis repliement de constantes.

use log::trace;
use marsh_ast as ast;

use crate::{CompileResult, Ctx, Diagnostic, Parsed, Pass};

/* ─────────────────────────── Lint ─────────────────────────── */

/// Signale les instructions sans effet (littéral nu en mode `exec`).
pub struct Lint;

impl Pass for Lint {
    fn name(&self) -> &'static str { "lint" }

    fn run(&mut self, ctx: &mut Ctx<'_>, tree: &mut Parsed) -> CompileResult<()> {
        let Parsed::Exec(program) = tree else { return Ok(()) };
        for stmt in &program.stmts {
            match stmt {
                ast::Stmt::Expr(e) if e.is_literal() => {
                    ctx.diags.push(Diagnostic::warn("statement has no effect", Some(e.loc)));
                }
                ast::Stmt::Assign { name, value, loc } => {
                    if matches!(&value.kind, ast::ExprKind::Name(n) if n == name) {
                        ctx.diags.push(Diagnostic::warn(format!("`{name}` is assigned to itself"), Some(*loc)));
                    }
                }
                ast::Stmt::Expr(_) => {}
            }
        }
        Ok(())
    }
}

/* ─────────────────────────── ConstFold ─────────────────────────── */

/// Replie `int (+|-|*) int` (sans débordement), `str + str` et `-nombre`.
///
/// La division n’est jamais repliée : ses erreurs restent des erreurs d’exécution.
#[derive(Default)]
pub struct ConstFold {
    folded: usize,
}

impl ConstFold {
    /// Nombre de nœuds repliés lors du dernier passage.
    pub const fn folded(&self) -> usize { self.folded }

    fn fold(&mut self, e: &mut ast::Expr) {
        match &mut e.kind {
            ast::ExprKind::Literal(_) | ast::ExprKind::Name(_) => return,
            ast::ExprKind::Call { func, args } => {
                self.fold(func);
                args.iter_mut().for_each(|a| self.fold(a));
                return;
            }
            ast::ExprKind::Binary { left, right, .. } | ast::ExprKind::Logical { left, right, .. } => {
                self.fold(left);
                self.fold(right);
            }
            ast::ExprKind::Unary { expr, .. } => self.fold(expr),
            ast::ExprKind::IfElse { cond, then, otherwise } => {
                self.fold(cond);
                self.fold(then);
                self.fold(otherwise);
                return;
            }
        }

        if let Some(lit) = fold_node(&e.kind) {
            trace!("folded node at line {} into {lit:?}", e.loc.line);
            e.kind = ast::ExprKind::Literal(lit);
            self.folded += 1;
        }
    }
}

fn fold_node(kind: &ast::ExprKind) -> Option<ast::Literal> {
    use ast::{BinaryOp as B, Literal as L};
    match kind {
        ast::ExprKind::Binary { left, op, right } => match (&left.kind, &right.kind) {
            (ast::ExprKind::Literal(L::Int(a)), ast::ExprKind::Literal(L::Int(b))) => match op {
                B::Add => a.checked_add(*b).map(L::Int),
                B::Sub => a.checked_sub(*b).map(L::Int),
                B::Mul => a.checked_mul(*b).map(L::Int),
                _ => None,
            },
            (ast::ExprKind::Literal(L::Str(a)), ast::ExprKind::Literal(L::Str(b))) if *op == B::Add => {
                Some(L::Str(format!("{a}{b}")))
            }
            _ => None,
        },
        ast::ExprKind::Unary { op: ast::UnaryOp::Neg, expr } => match &expr.kind {
            ast::ExprKind::Literal(L::Int(v)) => v.checked_neg().map(L::Int),
            ast::ExprKind::Literal(L::Float(v)) => Some(L::Float(-v)),
            _ => None,
        },
        _ => None,
    }
}

impl Pass for ConstFold {
    fn name(&self) -> &'static str { "const-fold" }

    fn run(&mut self, _ctx: &mut Ctx<'_>, tree: &mut Parsed) -> CompileResult<()> {
        self.folded = 0;
        match tree {
            Parsed::Exec(program) => {
                for stmt in &mut program.stmts {
                    match stmt {
                        ast::Stmt::Assign { value, .. } => self.fold(value),
                        ast::Stmt::Expr(e) => self.fold(e),
                    }
                }
            }
            Parsed::Eval(e) => self.fold(e),
        }
        trace!("const-fold: {} nodes folded", self.folded);
        Ok(())
    }
}
