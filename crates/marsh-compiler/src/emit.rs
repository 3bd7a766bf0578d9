//! Backend : arbre → `CodeUnit`.

use marsh_ast as ast;
use marsh_core::bytecode::{BinOp, CodeUnit, ConstValue, Mode, Op, UnOp};

use crate::{CompileError, CompileResult, Parsed, MAX_CALL_ARGS};

/// Trait d’émission backend
pub trait Emitter {
    /// Émet l’unité à partir de l’arbre (consomme l’émetteur).
    fn emit(self, tree: &Parsed) -> CompileResult<CodeUnit>;
}

/// Émetteur par défaut : code à pile linéaire, sauts absolus.
pub struct UnitEmitter {
    unit: CodeUnit,
}

impl UnitEmitter {
    /// Nouvel émetteur pour une unité vide.
    pub fn new(name: &str, mode: Mode) -> Self { Self { unit: CodeUnit::new(name, mode) } }

    /// N’enregistre aucune ligne (unité `STRIPPED`).
    pub fn strip_lines(&mut self) { self.unit.strip(); }

    fn push(&mut self, op: Op, line: u32) -> u32 { self.unit.push_op(op, line) }

    fn patch_here(&mut self, jump_pc: u32) -> CompileResult<()> {
        let target = self.unit.next_pc();
        self.unit.patch_jump(jump_pc, target)?;
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &ast::Stmt) -> CompileResult<()> {
        match stmt {
            ast::Stmt::Assign { name, value, loc } => {
                self.emit_expr(value)?;
                let ix = self.unit.add_name(name);
                self.push(Op::StoreName(ix), loc.line);
            }
            ast::Stmt::Expr(e) => {
                self.emit_expr(e)?;
                self.push(Op::Pop, e.loc.line);
            }
        }
        Ok(())
    }

    fn emit_expr(&mut self, e: &ast::Expr) -> CompileResult<()> {
        let line = e.loc.line;
        match &e.kind {
            ast::ExprKind::Literal(lit) => {
                let ix = self.unit.add_const(const_of(lit));
                self.push(Op::LoadConst(ix), line);
            }
            ast::ExprKind::Name(name) => {
                let ix = self.unit.add_name(name);
                self.push(Op::LoadName(ix), line);
            }
            ast::ExprKind::Call { func, args } => {
                let argc = u8::try_from(args.len()).map_err(|_| CompileError::Limit {
                    what: "call arguments",
                    limit: MAX_CALL_ARGS,
                    line,
                })?;
                self.emit_expr(func)?;
                for a in args {
                    self.emit_expr(a)?;
                }
                self.push(Op::Call(argc), line);
            }
            ast::ExprKind::Binary { left, op, right } => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.push(Op::Binary(binop_of(*op)), line);
            }
            ast::ExprKind::Unary { op, expr } => {
                self.emit_expr(expr)?;
                let op = match op {
                    ast::UnaryOp::Neg => UnOp::Neg,
                    ast::UnaryOp::Pos => UnOp::Pos,
                    ast::UnaryOp::Not => UnOp::Not,
                };
                self.push(Op::Unary(op), line);
            }
            ast::ExprKind::Logical { left, op, right } => {
                self.emit_expr(left)?;
                let jump = match op {
                    ast::LogicalOp::And => Op::JumpIfFalseOrPop(0),
                    ast::LogicalOp::Or => Op::JumpIfTrueOrPop(0),
                };
                let j = self.push(jump, line);
                self.emit_expr(right)?;
                self.patch_here(j)?;
            }
            ast::ExprKind::IfElse { cond, then, otherwise } => {
                self.emit_expr(cond)?;
                let j_else = self.push(Op::PopJumpIfFalse(0), line);
                self.emit_expr(then)?;
                let j_end = self.push(Op::Jump(0), line);
                self.patch_here(j_else)?;
                self.emit_expr(otherwise)?;
                self.patch_here(j_end)?;
            }
        }
        Ok(())
    }
}

impl Emitter for UnitEmitter {
    fn emit(mut self, tree: &Parsed) -> CompileResult<CodeUnit> {
        match tree {
            Parsed::Exec(program) => {
                for stmt in &program.stmts {
                    self.emit_stmt(stmt)?;
                }
                let line = program.stmts.last().map_or(1, |s| s.loc().line);
                let none = self.unit.add_const(ConstValue::None);
                self.push(Op::LoadConst(none), line);
                self.push(Op::Return, line);
            }
            Parsed::Eval(expr) => {
                self.emit_expr(expr)?;
                self.push(Op::Return, expr.loc.line);
            }
        }
        Ok(self.unit)
    }
}

fn const_of(lit: &ast::Literal) -> ConstValue {
    match lit {
        ast::Literal::Int(v) => ConstValue::Int(*v),
        ast::Literal::Float(v) => ConstValue::Float(*v),
        ast::Literal::Bool(b) => ConstValue::Bool(*b),
        ast::Literal::Str(s) => ConstValue::Str(s.clone()),
        ast::Literal::None => ConstValue::None,
    }
}

const fn binop_of(op: ast::BinaryOp) -> BinOp {
    match op {
        ast::BinaryOp::Add => BinOp::Add,
        ast::BinaryOp::Sub => BinOp::Sub,
        ast::BinaryOp::Mul => BinOp::Mul,
        ast::BinaryOp::Div => BinOp::Div,
        ast::BinaryOp::FloorDiv => BinOp::FloorDiv,
        ast::BinaryOp::Mod => BinOp::Mod,
        ast::BinaryOp::Eq => BinOp::Eq,
        ast::BinaryOp::Ne => BinOp::Ne,
        ast::BinaryOp::Lt => BinOp::Lt,
        ast::BinaryOp::Le => BinOp::Le,
        ast::BinaryOp::Gt => BinOp::Gt,
        ast::BinaryOp::Ge => BinOp::Ge,
    }
}
