//! marsh-parser — parseur du langage source marsh
//!
//! Branches :
//! - `marsh-lexer` pour la tokenisation
//! - `marsh-core` pour `Span/Spanned`
//! - `marsh-ast` pour l’AST cible
//!
//! Grammaire :
//! ```text
//! program     := sep* (stmt (sep+ stmt)*)? sep* EOF
//! expression  := NEWLINE* expr NEWLINE* EOF
//! sep         := NEWLINE | ";"
//! stmt        := NAME "=" expr | expr
//! expr        := or_expr ("if" or_expr "else" expr)?
//! or_expr     := and_expr ("or" and_expr)*
//! and_expr    := not_expr ("and" not_expr)*
//! not_expr    := "not" not_expr | comparison
//! comparison  := arith (("=="|"!="|"<"|"<="|">"|">=") arith)?
//! arith       := term (("+"|"-") term)*
//! term        := unary (("*"|"/"|"//"|"%") unary)*
//! unary       := ("-"|"+") unary | postfix
//! postfix     := primary ("(" (expr ("," expr)* ","?)? ")")*
//! primary     := INT | FLOAT | STRING | "True" | "False" | "None" | NAME | "(" expr ")"
//! ```
//!
//! Les niveaux `or_expr` à `term` sont analysés par un parseur de Pratt.

#![deny(missing_docs)]

use log::debug;
use marsh_ast as ast;
use marsh_core::{Pos, SourceId, Span, Spanned};
use marsh_lexer::{Keyword, LexError, Lexer, LexerOptions, LineMap, Token, TokenKind};
use thiserror::Error;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreur de parsing (lexicale ou syntaxique) avec localisation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    /// Localisation en bytes.
    pub span: Span,
    /// Ligne (1-based).
    pub line: u32,
    /// Colonne (1-based).
    pub column: u32,
    /// Message humain.
    pub message: String,
}

impl ParseError {
    fn at(lines: &LineMap<'_>, span: Span, message: impl Into<String>) -> Self {
        let (line, column) = lines.line_col(span.start);
        Self { span, line, column, message: message.into() }
    }

    fn from_lex(lines: &LineMap<'_>, e: &LexError) -> Self { Self::at(lines, e.span, e.kind.to_string()) }
}

type PResult<T> = Result<T, ParseError>;

/// Expression et hauteur de son arbre.
type Sub = (ast::Expr, usize);

const TOO_DEEP: &str = "expression nested too deeply";

/* ─────────────────────────── Parser ─────────────────────────── */

/// Parser marsh (travaille sur la suite complète des jetons).
pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    eof: Token<'a>,
    lines: LineMap<'a>,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    /// Crée un parser depuis une source.
    pub fn new(src: &'a str, source: SourceId) -> PResult<Self> {
        Self::with_options(src, source, LexerOptions::default())
    }

    /// Crée avec options de lexer ; une erreur lexicale est remontée ici.
    pub fn with_options(src: &'a str, source: SourceId, opts: LexerOptions) -> PResult<Self> {
        let lexer = Lexer::with_options(src, source, opts);
        let lines = lexer.lines.clone();
        let tokens = lexer.tokenize().map_err(|e| ParseError::from_lex(&lines, &e))?;
        let end = Pos(src.len() as u32);
        let eof = Spanned::new(TokenKind::Eof, Span::new(source, end, end));
        Ok(Self { tokens, pos: 0, eof, lines, depth: 0, max_depth: opts.max_depth as usize })
    }

    /// Parse un programme complet (mode `exec`).
    pub fn parse_program(&mut self) -> PResult<ast::Program> {
        let mut stmts = Vec::new();
        self.skip_separators();
        while !self.at(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Newline | TokenKind::Semi => self.skip_separators(),
                TokenKind::Assign => return Err(self.error_here("cannot assign to expression")),
                other => return Err(self.error_here(format!("expected newline or `;`, found {other}"))),
            }
        }
        debug!("parsed {} statements", stmts.len());
        Ok(ast::Program { stmts })
    }

    /// Parse une unique expression (mode `eval`).
    pub fn parse_expression(&mut self) -> PResult<ast::Expr> {
        self.skip_newlines();
        let e = self.parse_expr()?;
        self.skip_newlines();
        match self.peek() {
            TokenKind::Eof => Ok(e),
            other => Err(self.error_here(format!("expected end of input, found {other}"))),
        }
    }

    /* ─────────── Instructions ─────────── */

    fn parse_stmt(&mut self) -> PResult<ast::Stmt> {
        let target = match (self.peek(), self.peek_nth(1)) {
            (TokenKind::Name(name), TokenKind::Assign) => Some((*name).to_owned()),
            _ => None,
        };
        if let Some(name) = target {
            let loc = self.loc_here();
            self.bump();
            self.bump();
            let value = self.parse_expr()?;
            return Ok(ast::Stmt::Assign { name, value, loc });
        }
        Ok(ast::Stmt::Expr(self.parse_expr()?))
    }

    /* ─────────── Expressions ─────────── */

    // Chaque sous-arbre remonte avec sa hauteur (bornée par `max_depth`, comme la récursion).

    fn parse_expr(&mut self) -> PResult<ast::Expr> { self.parse_if_else().map(|(e, _)| e) }

    fn parse_if_else(&mut self) -> PResult<Sub> {
        self.enter()?;
        let (then, then_h) = self.parse_prec(0)?;
        let out = if self.eat_kw(Keyword::If) {
            let (cond, cond_h) = self.parse_prec(0)?;
            self.expect_kw(Keyword::Else)?;
            let (otherwise, else_h) = self.parse_if_else()?;
            let height = self.grow(then_h.max(cond_h).max(else_h))?;
            let loc = then.loc;
            let kind =
                ast::ExprKind::IfElse { cond: Box::new(cond), then: Box::new(then), otherwise: Box::new(otherwise) };
            (ast::Expr::new(kind, loc), height)
        } else {
            (then, then_h)
        };
        self.leave();
        Ok(out)
    }

    // Pratt : `not` préfixe puis opérateurs infixes par binding power.
    fn parse_prec(&mut self, min_bp: u8) -> PResult<Sub> {
        let (mut lhs, mut lhs_h) = if self.at_kw(Keyword::Not) {
            if min_bp > NOT_BP {
                return Err(self.error_here("expected expression, found `not`"));
            }
            let loc = self.loc_here();
            self.bump();
            self.enter()?;
            let (operand, h) = self.parse_prec(NOT_BP)?;
            self.leave();
            let kind = ast::ExprKind::Unary { op: ast::UnaryOp::Not, expr: Box::new(operand) };
            (ast::Expr::new(kind, loc), self.grow(h)?)
        } else {
            self.parse_unary()?
        };

        let mut after_cmp = false;
        loop {
            let Some(op) = infix_of(self.peek()) else { break };
            let (lbp, rbp) = precedence(op);
            if lbp < min_bp {
                break;
            }
            if op.is_comparison() {
                if after_cmp {
                    return Err(self.error_here("comparison chaining is not supported"));
                }
                after_cmp = true;
            } else {
                after_cmp = false;
            }
            self.bump();

            let (rhs, rhs_h) = self.parse_prec(rbp)?;
            lhs_h = self.grow(lhs_h.max(rhs_h))?;
            let loc = lhs.loc;
            let kind = match op {
                Infix::Logical(op) => ast::ExprKind::Logical { left: Box::new(lhs), op, right: Box::new(rhs) },
                Infix::Binary(op) => ast::ExprKind::Binary { left: Box::new(lhs), op, right: Box::new(rhs) },
            };
            lhs = ast::Expr::new(kind, loc);
        }

        Ok((lhs, lhs_h))
    }

    fn parse_unary(&mut self) -> PResult<Sub> {
        let op = match self.peek() {
            TokenKind::Minus => Some(ast::UnaryOp::Neg),
            TokenKind::Plus => Some(ast::UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            let loc = self.loc_here();
            self.bump();
            self.enter()?;
            let (e, h) = self.parse_unary()?;
            self.leave();
            let height = self.grow(h)?;
            return Ok((ast::Expr::new(ast::ExprKind::Unary { op, expr: Box::new(e) }, loc), height));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Sub> {
        let (mut e, mut h) = self.parse_primary()?;
        while self.at(&TokenKind::LParen) {
            self.bump();
            let mut args = Vec::new();
            let mut args_h = 0;
            while !self.at(&TokenKind::RParen) {
                let (arg, arg_h) = self.parse_if_else()?;
                args.push(arg);
                args_h = args_h.max(arg_h);
                if !self.at(&TokenKind::Comma) {
                    break;
                }
                self.bump();
            }
            self.expect(&TokenKind::RParen, "`)`")?;
            h = self.grow(h.max(args_h))?;
            let loc = e.loc;
            e = ast::Expr::new(ast::ExprKind::Call { func: Box::new(e), args }, loc);
        }
        Ok((e, h))
    }

    fn parse_primary(&mut self) -> PResult<Sub> {
        let loc = self.loc_here();
        let kind = match self.peek() {
            TokenKind::Int(v) => ast::ExprKind::Literal(ast::Literal::Int(*v)),
            TokenKind::Float(v) => ast::ExprKind::Literal(ast::Literal::Float(*v)),
            TokenKind::Str(s) => ast::ExprKind::Literal(ast::Literal::Str(s.clone())),
            TokenKind::Kw(Keyword::True) => ast::ExprKind::Literal(ast::Literal::Bool(true)),
            TokenKind::Kw(Keyword::False) => ast::ExprKind::Literal(ast::Literal::Bool(false)),
            TokenKind::Kw(Keyword::None) => ast::ExprKind::Literal(ast::Literal::None),
            TokenKind::Name(n) => ast::ExprKind::Name((*n).to_owned()),
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_if_else()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                return Ok(inner);
            }
            other => return Err(self.error_here(format!("expected expression, found {other}"))),
        };
        self.bump();
        Ok((ast::Expr::new(kind, loc), 1))
    }

    /* ─────────── Profondeur ─────────── */

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.error_here(TOO_DEEP));
        }
        Ok(())
    }

    // Pas de `leave` sur erreur : le parse est abandonné.
    fn leave(&mut self) { self.depth -= 1; }

    fn grow(&self, child: usize) -> PResult<usize> {
        let height = child + 1;
        if height > self.max_depth {
            return Err(self.error_here(TOO_DEEP));
        }
        Ok(height)
    }

    /* ─────────── Utilitaires ─────────── */

    fn peek_tok(&self) -> &Token<'a> { self.tokens.get(self.pos).unwrap_or(&self.eof) }

    fn peek(&self) -> &TokenKind<'a> { &self.peek_tok().value }

    fn peek_nth(&self, n: usize) -> &TokenKind<'a> {
        self.tokens.get(self.pos + n).map_or(&self.eof.value, |t| &t.value)
    }

    fn bump(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn at(&self, kind: &TokenKind<'_>) -> bool { std::mem::discriminant(self.peek()) == std::mem::discriminant(kind) }

    fn at_kw(&self, kw: Keyword) -> bool { matches!(self.peek(), TokenKind::Kw(k) if *k == kw) }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        let hit = self.at_kw(kw);
        if hit {
            self.bump();
        }
        hit
    }

    fn expect(&mut self, kind: &TokenKind<'_>, what: &str) -> PResult<()> {
        if self.at(kind) {
            self.bump();
            return Ok(());
        }
        Err(self.error_here(format!("expected {what}, found {}", self.peek())))
    }

    fn expect_kw(&mut self, kw: Keyword) -> PResult<()> {
        if self.eat_kw(kw) {
            return Ok(());
        }
        Err(self.error_here(format!("expected `{}`, found {}", kw.as_str(), self.peek())))
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semi) {
            self.bump();
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(&TokenKind::Newline) {
            self.bump();
        }
    }

    fn loc_here(&self) -> ast::Loc {
        let start = self.peek_tok().span.start;
        let (line, column) = self.lines.line_col(start);
        ast::Loc::new(line, column, start.0)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::at(&self.lines, self.peek_tok().span, message)
    }
}

/* ─────────────────────────── Raccourcis ─────────────────────────── */

/// Parse `src` comme programme (mode `exec`).
pub fn parse_program(src: &str) -> PResult<ast::Program> { Parser::new(src, SourceId(0))?.parse_program() }

/// Parse `src` comme expression unique (mode `eval`).
pub fn parse_expression(src: &str) -> PResult<ast::Expr> { Parser::new(src, SourceId(0))?.parse_expression() }

/* ─────────────────────────── Opérateurs ─────────────────────────── */

const NOT_BP: u8 = 5;

#[derive(Debug, Clone, Copy)]
enum Infix {
    Logical(ast::LogicalOp),
    Binary(ast::BinaryOp),
}

impl Infix {
    const fn is_comparison(self) -> bool {
        use ast::BinaryOp::{Eq, Ge, Gt, Le, Lt, Ne};
        matches!(self, Self::Binary(Eq | Ne | Lt | Le | Gt | Ge))
    }
}

fn infix_of(kind: &TokenKind<'_>) -> Option<Infix> {
    use ast::BinaryOp as B;
    Some(match kind {
        TokenKind::Kw(Keyword::Or) => Infix::Logical(ast::LogicalOp::Or),
        TokenKind::Kw(Keyword::And) => Infix::Logical(ast::LogicalOp::And),
        TokenKind::EqEq => Infix::Binary(B::Eq),
        TokenKind::Ne => Infix::Binary(B::Ne),
        TokenKind::Lt => Infix::Binary(B::Lt),
        TokenKind::Le => Infix::Binary(B::Le),
        TokenKind::Gt => Infix::Binary(B::Gt),
        TokenKind::Ge => Infix::Binary(B::Ge),
        TokenKind::Plus => Infix::Binary(B::Add),
        TokenKind::Minus => Infix::Binary(B::Sub),
        TokenKind::Star => Infix::Binary(B::Mul),
        TokenKind::Slash => Infix::Binary(B::Div),
        TokenKind::SlashSlash => Infix::Binary(B::FloorDiv),
        TokenKind::Percent => Infix::Binary(B::Mod),
        _ => return None,
    })
}

const fn precedence(op: Infix) -> (u8, u8) {
    use ast::BinaryOp as B;
    // binding power (gauche-associatif) ; `not` se place entre `and` et les comparaisons
    match op {
        Infix::Logical(ast::LogicalOp::Or) => (1, 2),
        Infix::Logical(ast::LogicalOp::And) => (3, 4),
        Infix::Binary(B::Eq | B::Ne | B::Lt | B::Le | B::Gt | B::Ge) => (7, 8),
        Infix::Binary(B::Add | B::Sub) => (9, 10),
        Infix::Binary(B::Mul | B::Div | B::FloorDiv | B::Mod) => (11, 12),
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use ast::{BinaryOp, Expr, ExprKind, Literal, LogicalOp, Stmt, UnaryOp};
    use pretty_assertions::assert_eq;

    fn expr(src: &str) -> Expr { parse_expression(src).expect("parse ok") }

    /// Rendu parenthésé, pratique pour vérifier les priorités.
    fn sexp(e: &Expr) -> String {
        match &e.kind {
            ExprKind::Literal(Literal::Int(v)) => v.to_string(),
            ExprKind::Literal(Literal::Float(v)) => format!("{v:?}"),
            ExprKind::Literal(Literal::Str(s)) => format!("{s:?}"),
            ExprKind::Literal(Literal::Bool(b)) => b.to_string(),
            ExprKind::Literal(Literal::None) => "None".into(),
            ExprKind::Name(n) => n.clone(),
            ExprKind::Call { func, args } => {
                let args: Vec<_> = args.iter().map(sexp).collect();
                format!("(call {} {})", sexp(func), args.join(" "))
            }
            ExprKind::Binary { left, op, right } => format!("({op:?} {} {})", sexp(left), sexp(right)),
            ExprKind::Logical { left, op, right } => format!("({op:?} {} {})", sexp(left), sexp(right)),
            ExprKind::Unary { op, expr } => format!("({op:?} {})", sexp(expr)),
            ExprKind::IfElse { cond, then, otherwise } => {
                format!("(if {} {} {})", sexp(cond), sexp(then), sexp(otherwise))
            }
        }
    }

    #[test]
    fn sample_program() {
        let prg = parse_program("print('Marshalled code')").expect("parse ok");
        assert_eq!(prg.stmts.len(), 1);
        let Stmt::Expr(e) = &prg.stmts[0] else { panic!("expected expression statement") };
        assert_eq!(sexp(e), r#"(call print "Marshalled code")"#);
    }

    #[test]
    fn statements_and_separators() {
        let prg = parse_program("\n\nx = 1; y = x + 2\n\nprint(x, y,)\n").expect("parse ok");
        assert_eq!(prg.stmts.len(), 3);
        assert!(matches!(&prg.stmts[0], Stmt::Assign { name, .. } if name == "x"));
        assert_eq!(prg.stmts[1].loc().line, 3);
        assert_eq!(prg.stmts[2].loc().line, 5);
        assert!(parse_program("").expect("empty ok").stmts.is_empty());
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(sexp(&expr("1 + 2 * 3 - 4")), "(Sub (Add 1 (Mul 2 3)) 4)");
        assert_eq!(sexp(&expr("-2 * 3 // 4 % 5")), "(Mod (FloorDiv (Mul (Neg 2) 3) 4) 5)");
        assert_eq!(sexp(&expr("(1 + 2) * +3")), "(Mul (Add 1 2) (Pos 3))");
    }

    #[test]
    fn logical_precedence() {
        assert_eq!(sexp(&expr("a or b and not c == d")), "(Or a (And b (Not (Eq c d))))");
        assert_eq!(sexp(&expr("not not x")), "(Not (Not x))");
        assert_eq!(sexp(&expr("1 if x < 2 else 3 if y else 4")), "(if (Lt x 2) 1 (if y 3 4))");
    }

    #[test]
    fn operator_enums_are_mapped() {
        let e = expr("a and b");
        assert!(matches!(e.kind, ExprKind::Logical { op: LogicalOp::And, .. }));
        let e = expr("a // b");
        assert!(matches!(e.kind, ExprKind::Binary { op: BinaryOp::FloorDiv, .. }));
        let e = expr("-a");
        assert!(matches!(e.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn chained_calls_and_multiline_args() {
        assert_eq!(sexp(&expr("f(1)(2,\n 3)")), "(call (call f 1) 2 3)");
        assert_eq!(sexp(&expr("f()")), "(call f )");
    }

    #[test]
    fn comparison_chaining_is_rejected() {
        let e = parse_expression("1 < 2 < 3").unwrap_err();
        assert!(e.message.contains("chaining"));
        assert!(parse_expression("(1 < 2) < 3").is_ok());
        assert!(parse_expression("1 < 2 and 2 < 3").is_ok());
    }

    #[test]
    fn not_binds_looser_than_comparison_only() {
        assert!(parse_expression("1 == not 2").is_err());
    }

    #[test]
    fn eval_mode_accepts_a_single_expression() {
        assert!(parse_expression("\n1 + 1\n").is_ok());
        assert!(parse_expression("x = 1").is_err());
        assert!(parse_expression("1; 2").is_err());
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn syntax_errors_are_located() {
        let e = parse_program("x = 1\ny = )").unwrap_err();
        assert_eq!((e.line, e.column), (2, 5));
        assert_eq!(e.to_string(), "expected expression, found `)` (line 2, column 5)");

        let e = parse_program("1 = 2").unwrap_err();
        assert_eq!(e.message, "cannot assign to expression");

        let e = parse_program("print(1").unwrap_err();
        assert!(e.message.starts_with("expected `)`"));

        let e = parse_program("a b").unwrap_err();
        assert!(e.message.starts_with("expected newline or `;`"));
    }

    #[test]
    fn lexical_errors_become_parse_errors() {
        let e = parse_program("print('unterminated").unwrap_err();
        assert_eq!(e.message, "unterminated string literal");
        assert_eq!((e.line, e.column), (1, 7));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        for src in [
            format!("{}1", "not ".repeat(100_000)),
            format!("print({}1)", "-".repeat(200_000)),
            format!("{}0", "1 if x else ".repeat(50_000)),
            format!("1{}", " + 1".repeat(50_000)),
            format!("f{}", "(1)".repeat(50_000)),
        ] {
            let e = parse_program(&src).unwrap_err();
            assert_eq!(e.message, "expression nested too deeply");
            assert_eq!(e.line, 1);
        }
    }

    #[test]
    fn depth_limit_is_configurable() {
        let src = "not not not x";
        let opts = LexerOptions { max_depth: 3, ..LexerOptions::default() };
        assert!(Parser::with_options(src, SourceId(0), opts).unwrap().parse_expression().is_err());
        let opts = LexerOptions { max_depth: 5, ..LexerOptions::default() };
        assert!(Parser::with_options(src, SourceId(0), opts).unwrap().parse_expression().is_ok());
        assert!(parse_expression(&format!("{}1", "- ".repeat(150))).is_ok());
    }

    #[test]
    fn columns_count_characters() {
        let e = parse_program("x = 'é' )").unwrap_err();
        assert_eq!((e.line, e.column), (1, 9));
    }

    proptest::proptest! {
        #[test]
        fn parser_never_panics(src in "[a-z0-9 ()+*/%<>=,;'\n-]{0,40}") {
            let _ = parse_program(&src);
            let _ = parse_expression(&src);
        }
    }
}
