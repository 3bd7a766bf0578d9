//! marsh AST
//!
//! Structures produites par `marsh-parser` et consommées par `marsh-compiler`.
//! Un programme `exec` est une suite d’instructions ; une source `eval` est une
//! unique [`Expr`].
//!
//! # Exemple
//! ```rust
//! use marsh_ast::{Expr, ExprKind, Literal, Loc};
//!
//! let lit = Expr::new(ExprKind::Literal(Literal::Int(42)), Loc::new(1, 1, 0));
//! assert!(lit.is_literal());
//! ```

#![deny(missing_docs)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Localisation dans le code source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Loc {
    /// Ligne de début (1-based).
    pub line: u32,
    /// Colonne de début (1-based).
    pub column: u32,
    /// Offset en bytes depuis le début de la source.
    pub offset: u32,
}

impl Loc {
    /// Construit une localisation.
    pub const fn new(line: u32, column: u32, offset: u32) -> Self { Self { line, column, offset } }
}

/// Un programme (mode `exec`).
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Program {
    /// Instructions, dans l’ordre source.
    pub stmts: Vec<Stmt>,
}

/// Une instruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Stmt {
    /// `name = value`
    Assign {
        /// Nom lié.
        name: String,
        /// Valeur affectée.
        value: Expr,
        /// Localisation du nom.
        loc: Loc,
    },
    /// Expression évaluée pour ses effets (résultat ignoré).
    Expr(Expr),
}

impl Stmt {
    /// Localisation de l’instruction.
    pub const fn loc(&self) -> Loc {
        match self {
            Self::Assign { loc, .. } => *loc,
            Self::Expr(e) => e.loc,
        }
    }
}

/// Une expression localisée.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Expr {
    /// Forme de l’expression.
    pub kind: ExprKind,
    /// Localisation du premier jeton.
    pub loc: Loc,
}

impl Expr {
    /// Construit une expression.
    pub const fn new(kind: ExprKind, loc: Loc) -> Self { Self { kind, loc } }

    /// Vrai pour un littéral nu.
    pub const fn is_literal(&self) -> bool { matches!(self.kind, ExprKind::Literal(_)) }

    /// Sous-expressions directes, de gauche à droite.
    pub fn children(&self) -> Vec<&Self> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Name(_) => Vec::new(),
            ExprKind::Call { func, args } => std::iter::once(func.as_ref()).chain(args.iter()).collect(),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            ExprKind::Unary { expr, .. } => vec![expr.as_ref()],
            ExprKind::IfElse { cond, then, otherwise } => vec![then.as_ref(), cond.as_ref(), otherwise.as_ref()],
        }
    }
}

/// Formes d’expression.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExprKind {
    /// Valeur littérale.
    Literal(Literal),
    /// Référence à un nom.
    Name(String),
    /// Appel `func(args…)`.
    Call {
        /// Expression appelée.
        func: Box<Expr>,
        /// Arguments positionnels.
        args: Vec<Expr>,
    },
    /// Opération binaire.
    Binary {
        /// Opérande gauche.
        left: Box<Expr>,
        /// Opérateur.
        op: BinaryOp,
        /// Opérande droite.
        right: Box<Expr>,
    },
    /// Opération unaire.
    Unary {
        /// Opérateur.
        op: UnaryOp,
        /// Opérande.
        expr: Box<Expr>,
    },
    /// `and` / `or` (court-circuit, renvoie l’opérande décisif).
    Logical {
        /// Opérande gauche.
        left: Box<Expr>,
        /// Opérateur.
        op: LogicalOp,
        /// Opérande droite.
        right: Box<Expr>,
    },
    /// `then if cond else otherwise`
    IfElse {
        /// Condition.
        cond: Box<Expr>,
        /// Valeur si vraie.
        then: Box<Expr>,
        /// Valeur sinon.
        otherwise: Box<Expr>,
    },
}

/// Valeurs littérales.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Literal {
    /// Entier signé 64 bits.
    Int(i64),
    /// Flottant 64 bits.
    Float(f64),
    /// Booléen.
    Bool(bool),
    /// Chaîne UTF-8.
    Str(String),
    /// `None`.
    None,
}

/// Opérateurs binaires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Opérateurs unaires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
    /// `not x`
    Not,
}

/// Opérateurs logiques à court-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogicalOp {
    /// `and`
    And,
    /// `or`
    Or,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lit(v: i64) -> Expr { Expr::new(ExprKind::Literal(Literal::Int(v)), Loc::new(1, 1, 0)) }

    #[test]
    fn children_follow_evaluation_order() {
        let call = Expr::new(
            ExprKind::Call {
                func: Box::new(Expr::new(ExprKind::Name("f".into()), Loc::new(1, 1, 0))),
                args: vec![lit(1), lit(2)],
            },
            Loc::new(1, 1, 0),
        );
        let kids = call.children();
        assert_eq!(kids.len(), 3);
        assert_eq!(kids[0].kind, ExprKind::Name("f".into()));
        assert!(kids[1].is_literal());
    }

    #[test]
    fn stmt_loc() {
        let s = Stmt::Assign { name: "x".into(), value: lit(1), loc: Loc::new(3, 1, 10) };
        assert_eq!(s.loc().line, 3);
        assert_eq!(Stmt::Expr(lit(0)).loc(), Loc::new(1, 1, 0));
    }
}
