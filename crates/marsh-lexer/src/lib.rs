//! marsh-lexer — analyse lexicale du langage source marsh
//!
//! Faits saillants :
//! - `Lexer` + `LexerOptions` : commentaires `#`, noms/mots-clés (`True`, `and`, `if`…),
//!   nombres (2/8/10/16, `_`, floats + exposant), chaînes `'..'` / `".."` avec échappements
//! - Les fins de ligne sont significatives (`NEWLINE`) sauf entre parenthèses
//! - `Span`/`Spanned`/`SourceId` + **LineMap** pour `(ligne, colonne)`
//!
//! Exemple éclair :
//! ```
//! use marsh_core::SourceId;
//! use marsh_lexer::{Lexer, TokenKind};
//!
//! let toks = Lexer::new("print('hi')", SourceId(0)).tokenize().unwrap();
//! assert!(matches!(toks[0].value, TokenKind::Name("print")));
//! assert!(matches!(toks.last().map(|t| &t.value), Some(TokenKind::Eof)));
//! ```

#![deny(missing_docs)]

use std::fmt;

use log::{debug, trace};
use marsh_core::{Pos, SourceId, Span, Spanned};
use thiserror::Error;

/* ─────────────────────────── Options & LineMap ─────────────────────────── */

/// Options du lexer.
#[derive(Debug, Clone, Copy)]
pub struct LexerOptions {
    /// Profondeur maximale de parenthèses imbriquées (anti-DoS).
    pub max_nesting: u32,
    /// Longueur maximale d’un littéral chaîne décodé, en octets.
    pub max_string_len: usize,
    /// Profondeur maximale d’une expression, vérifiée par le parser.
    pub max_depth: u32,
}

impl Default for LexerOptions {
    fn default() -> Self { Self { max_nesting: 200, max_string_len: 1 << 20, max_depth: 200 } }
}

/// Table des lignes pour (byte offset) → (ligne, colonne).
#[derive(Debug, Clone)]
pub struct LineMap<'a> {
    src: &'a str,
    /// Offsets des débuts de lignes (toujours contient 0).
    pub line_starts: Vec<u32>,
}

impl<'a> LineMap<'a> {
    /// Construit la table à partir d’un `&str`.
    pub fn new(src: &'a str) -> Self {
        let mut ls = Vec::with_capacity(16);
        ls.push(0);
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                ls.push((i as u32) + 1);
            }
        }
        Self { src, line_starts: ls }
    }

    /// Convertit un `Pos` en (ligne, colonne), 1-based ; la colonne compte des caractères.
    pub fn line_col(&self, pos: Pos) -> (u32, u32) {
        let off = pos.0;
        let idx = match self.line_starts.binary_search(&off) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts.get(idx).copied().unwrap_or(0);
        let column = self
            .src
            .get(line_start as usize..off as usize)
            .map_or_else(|| off.saturating_sub(line_start), |text| text.chars().count() as u32);
        ((idx as u32) + 1, column + 1)
    }
}

/* ─────────────────────────── Tokens ─────────────────────────── */

/// Mots-clés reconnus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `True`
    True,
    /// `False`
    False,
    /// `None`
    None,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// `if`
    If,
    /// `else`
    Else,
}

impl Keyword {
    /// Texte source du mot-clé.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::None => "None",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::If => "if",
            Self::Else => "else",
        }
    }
}

/// Genre de jeton lexical.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    /// Fin de fichier.
    Eof,
    /// Fin de ligne logique (hors parenthèses).
    Newline,
    /// Identifiant.
    Name(&'a str),
    /// Mot-clé.
    Kw(Keyword),
    /// Littéral entier (i64).
    Int(i64),
    /// Littéral flottant (f64).
    Float(f64),
    /// Littéral chaîne (décodée).
    Str(String),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `;`
    Semi,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `//`
    SlashSlash,
    /// `%`
    Percent,
    /// `=`
    Assign,
    /// `==`
    EqEq,
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

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => f.write_str("end of input"),
            Self::Newline => f.write_str("newline"),
            Self::Name(n) => write!(f, "name `{n}`"),
            Self::Kw(k) => write!(f, "`{}`", k.as_str()),
            Self::Int(v) => write!(f, "integer {v}"),
            Self::Float(v) => write!(f, "float {v}"),
            Self::Str(_) => f.write_str("string literal"),
            other => write!(f, "`{}`", punct_str(other)),
        }
    }
}

const fn punct_str(kind: &TokenKind<'_>) -> &'static str {
    match kind {
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::Comma => ",",
        TokenKind::Semi => ";",
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::SlashSlash => "//",
        TokenKind::Percent => "%",
        TokenKind::Assign => "=",
        TokenKind::EqEq => "==",
        TokenKind::Ne => "!=",
        TokenKind::Lt => "<",
        TokenKind::Le => "<=",
        TokenKind::Gt => ">",
        TokenKind::Ge => ">=",
        _ => "?",
    }
}

/// Jeton avec span.
pub type Token<'a> = Spanned<TokenKind<'a>>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Genre d’erreur lexicale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexErrorKind {
    /// Caractère inattendu.
    #[error("unexpected character: {0:?}")]
    UnexpectedChar(char),
    /// Chaîne non terminée (EOF ou fin de ligne).
    #[error("unterminated string literal")]
    UnterminatedString,
    /// Séquence d’échappement invalide.
    #[error("invalid escape sequence")]
    InvalidEscape,
    /// Littéral numérique invalide.
    #[error("invalid number literal")]
    InvalidNumber,
    /// Dépassement entier i64.
    #[error("integer literal overflows i64")]
    IntOverflow,
    /// Chaîne trop longue.
    #[error("string literal exceeds {0} bytes")]
    StringTooLong(usize),
    /// Parenthèses trop imbriquées.
    #[error("parentheses nested deeper than {0}")]
    TooDeep(u32),
}

/// Erreur lexicale avec localisation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct LexError {
    /// Localisation.
    pub span: Span,
    /// Genre d’erreur.
    pub kind: LexErrorKind,
}

/* ─────────────────────────── Lexer ─────────────────────────── */

/// Analyseur lexical (itératif).
pub struct Lexer<'a> {
    src: &'a str,
    off: usize,
    source: SourceId,
    opts: LexerOptions,
    depth: u32,
    /// Le dernier jeton émis était-il une fin de ligne (ou rien encore) ?
    at_line_start: bool,
    /// Table des lignes (exposée pour diagnostics).
    pub lines: LineMap<'a>,
}

impl<'a> Lexer<'a> {
    /// Crée un lexer avec options par défaut.
    pub fn new(src: &'a str, source: SourceId) -> Self { Self::with_options(src, source, LexerOptions::default()) }

    /// Crée un lexer avec `LexerOptions`.
    pub fn with_options(src: &'a str, source: SourceId, opts: LexerOptions) -> Self {
        Self { src, off: 0, source, opts, depth: 0, at_line_start: true, lines: LineMap::new(src) }
    }

    /// Prochain jeton ; émet `Eof` en boucle une fois la source épuisée.
    pub fn next_token(&mut self) -> Result<Token<'a>, LexError> {
        loop {
            self.skip_blanks_and_comments();
            let start = self.off;
            let Some(c) = self.bump() else {
                return Ok(Spanned::new(TokenKind::Eof, self.span_from(start)));
            };

            let kind = match c {
                '\n' if self.depth > 0 => continue,
                '\n' => {
                    // lignes vides consécutives : un seul NEWLINE
                    if self.at_line_start {
                        continue;
                    }
                    TokenKind::Newline
                }
                ch if is_name_start(ch) => {
                    self.consume_while(is_name_continue);
                    let s = &self.src[start..self.off];
                    keyword_of(s).map_or(TokenKind::Name(s), TokenKind::Kw)
                }
                ch if ch.is_ascii_digit() => self.lex_number(start, ch)?,
                '.' if self.peek().is_some_and(|d| d.is_ascii_digit()) => self.lex_number(start, '.')?,
                '\'' | '"' => TokenKind::Str(self.lex_string(start, c)?),

                '(' => {
                    self.depth += 1;
                    if self.depth > self.opts.max_nesting {
                        return Err(self.err_from(start, LexErrorKind::TooDeep(self.opts.max_nesting)));
                    }
                    TokenKind::LParen
                }
                ')' => {
                    self.depth = self.depth.saturating_sub(1);
                    TokenKind::RParen
                }
                '/' => if self.eat('/') { TokenKind::SlashSlash } else { TokenKind::Slash },
                '=' => if self.eat('=') { TokenKind::EqEq } else { TokenKind::Assign },
                '!' => if self.eat('=') { TokenKind::Ne } else { return Err(self.err_from(start, LexErrorKind::UnexpectedChar('!'))) },
                '<' => if self.eat('=') { TokenKind::Le } else { TokenKind::Lt },
                '>' => if self.eat('=') { TokenKind::Ge } else { TokenKind::Gt },
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '%' => TokenKind::Percent,
                ',' => TokenKind::Comma,
                ';' => TokenKind::Semi,

                other => return Err(self.err_from(start, LexErrorKind::UnexpectedChar(other))),
            };

            self.at_line_start = matches!(kind, TokenKind::Newline);
            let tok = Spanned::new(kind, self.span_from(start));
            trace!("token {:?} @ {}..{}", tok.value, tok.span.start.0, tok.span.end.0);
            return Ok(tok);
        }
    }

    /// Tokenise toute la source (ajoute `Eof` final).
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut out = Vec::new();
        loop {
            let t = self.next_token()?;
            let is_eof = matches!(t.value, TokenKind::Eof);
            out.push(t);
            if is_eof {
                break;
            }
        }
        debug!("lexed {} tokens from {} bytes", out.len(), self.src.len());
        Ok(out)
    }

    /* ────────── Primitives internes ────────── */

    fn peek(&self) -> Option<char> { self.src[self.off..].chars().next() }

    fn peek2(&self) -> Option<char> {
        let mut it = self.src[self.off..].chars();
        it.next();
        it.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.off += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.off += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn consume_while(&mut self, mut p: impl FnMut(char) -> bool) {
        while let Some(c) = self.peek() {
            if !p(c) {
                break;
            }
            self.off += c.len_utf8();
        }
    }

    fn skip_blanks_and_comments(&mut self) {
        loop {
            self.consume_while(|c| c != '\n' && c.is_whitespace());
            if self.peek() == Some('#') {
                self.consume_while(|c| c != '\n');
                continue;
            }
            break;
        }
    }

    fn lex_string(&mut self, start_quote: usize, quote: char) -> Result<String, LexError> {
        let mut out = String::new();
        loop {
            let c = match self.bump() {
                None | Some('\n') => return Err(self.err_from(start_quote, LexErrorKind::UnterminatedString)),
                Some(c) => c,
            };
            if c == quote {
                break;
            }
            if c == '\\' {
                let esc_start = self.off - 1;
                let esc = self.bump().ok_or_else(|| self.err_from(start_quote, LexErrorKind::UnterminatedString))?;
                match esc {
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    '0' => out.push('\0'),
                    'x' => out.push(self.read_hex_escape(esc_start, 2)?),
                    'u' => out.push(self.read_hex_escape(esc_start, 4)?),
                    '\n' => return Err(self.err_from(start_quote, LexErrorKind::UnterminatedString)),
                    _ => return Err(self.err_from(esc_start, LexErrorKind::InvalidEscape)),
                }
            } else {
                out.push(c);
            }
            if out.len() > self.opts.max_string_len {
                return Err(self.err_from(start_quote, LexErrorKind::StringTooLong(self.opts.max_string_len)));
            }
        }
        Ok(out)
    }

    /// Lit exactement `digits` chiffres hexadécimaux (après `\x` ou `\u`).
    fn read_hex_escape(&mut self, esc_start: usize, digits: usize) -> Result<char, LexError> {
        let mut v: u32 = 0;
        for _ in 0..digits {
            let d = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.err_from(esc_start, LexErrorKind::InvalidEscape))?;
            self.off += 1;
            v = (v << 4) | d;
        }
        char::from_u32(v).ok_or_else(|| self.err_from(esc_start, LexErrorKind::InvalidEscape))
    }

    fn lex_number(&mut self, start: usize, first: char) -> Result<TokenKind<'a>, LexError> {
        if first == '0' {
            let radix = match self.peek() {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.off += 1;
                self.consume_while(|c| c.is_digit(radix) || c == '_');
                if self.peek().is_some_and(is_name_continue) {
                    return Err(self.err_from(start, LexErrorKind::InvalidNumber));
                }
                let raw = self.src[start + 2..self.off].replace('_', "");
                if raw.is_empty() {
                    return Err(self.err_from(start, LexErrorKind::InvalidNumber));
                }
                return i64::from_str_radix(&raw, radix)
                    .map(TokenKind::Int)
                    .map_err(|_| self.err_from(start, LexErrorKind::IntOverflow));
            }
        }

        // Décimal / flottant
        let mut is_float = first == '.';
        self.consume_while(|c| c.is_ascii_digit() || c == '_');
        if !is_float && self.peek() == Some('.') && self.peek2().is_some_and(|d| d.is_ascii_digit()) {
            is_float = true;
            self.off += 1;
            self.consume_while(|c| c.is_ascii_digit() || c == '_');
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            self.off += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.off += 1;
            }
            self.consume_while(|c| c.is_ascii_digit() || c == '_');
        }
        if self.peek().is_some_and(is_name_continue) {
            return Err(self.err_from(start, LexErrorKind::InvalidNumber));
        }

        let raw = self.src[start..self.off].replace('_', "");
        if is_float {
            raw.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.err_from(start, LexErrorKind::InvalidNumber))
        } else {
            raw.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.err_from(start, LexErrorKind::IntOverflow))
        }
    }

    /* ────────── Spans / erreurs ────────── */

    fn span_from(&self, start: usize) -> Span {
        Span::new(self.source, Pos(start as u32), Pos(self.off as u32))
    }

    fn err_from(&self, start: usize, kind: LexErrorKind) -> LexError { LexError { span: self.span_from(start), kind } }
}

/* ─────────────────────────── Helpers ─────────────────────────── */

fn is_name_start(c: char) -> bool { c == '_' || c.is_alphabetic() }

fn is_name_continue(c: char) -> bool { c == '_' || c.is_alphanumeric() }

fn keyword_of(s: &str) -> Option<Keyword> {
    Some(match s {
        "True" => Keyword::True,
        "False" => Keyword::False,
        "None" => Keyword::None,
        "and" => Keyword::And,
        "or" => Keyword::Or,
        "not" => Keyword::Not,
        "if" => Keyword::If,
        "else" => Keyword::Else,
        _ => return None,
    })
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn toks(src: &str) -> Vec<TokenKind<'_>> {
        Lexer::new(src, SourceId(0)).tokenize().unwrap().into_iter().map(|t| t.value).collect()
    }

    fn err(src: &str) -> LexErrorKind { Lexer::new(src, SourceId(0)).tokenize().unwrap_err().kind }

    #[test]
    fn sample_call() {
        use TokenKind::*;
        assert_eq!(
            toks("print('Marshalled code')"),
            vec![Name("print"), LParen, Str("Marshalled code".into()), RParen, Eof]
        );
    }

    #[test]
    fn names_and_keywords() {
        use Keyword as K;
        use TokenKind::*;
        let v = toks("True False None and or not if else x _y été");
        assert_eq!(
            v,
            vec![
                Kw(K::True),
                Kw(K::False),
                Kw(K::None),
                Kw(K::And),
                Kw(K::Or),
                Kw(K::Not),
                Kw(K::If),
                Kw(K::Else),
                Name("x"),
                Name("_y"),
                Name("été"),
                Eof
            ]
        );
    }

    #[test]
    fn numbers_and_floats() {
        use TokenKind::*;
        let v = toks("0xFF 0o77 0b1010 123 1_234 12.5 1e3 2.5e-2 .5");
        assert_eq!(v[..5], [Int(255), Int(63), Int(10), Int(123), Int(1234)]);
        assert_eq!(v[5], Float(12.5));
        assert_eq!(v[6], Float(1000.0));
        assert_eq!(v[7], Float(0.025));
        assert_eq!(v[8], Float(0.5));
    }

    #[test]
    fn bad_numbers() {
        assert_eq!(err("9223372036854775808"), LexErrorKind::IntOverflow);
        assert_eq!(err("0x"), LexErrorKind::InvalidNumber);
        assert_eq!(err("12abc"), LexErrorKind::InvalidNumber);
        assert_eq!(err("1e"), LexErrorKind::InvalidNumber);
    }

    #[test]
    fn string_escapes() {
        use TokenKind::*;
        let v = toks(r#"'a\'b' "q\"" '\n\t\\' '\x41' 'é' "it's""#);
        assert_eq!(v[0], Str("a'b".into()));
        assert_eq!(v[1], Str("q\"".into()));
        assert_eq!(v[2], Str("\n\t\\".into()));
        assert_eq!(v[3], Str("A".into()));
        assert_eq!(v[4], Str("é".into()));
        assert_eq!(v[5], Str("it's".into()));
    }

    #[test]
    fn unterminated_strings() {
        assert_eq!(err("print('unterminated"), LexErrorKind::UnterminatedString);
        assert_eq!(err("'abc\n'"), LexErrorKind::UnterminatedString);
        assert_eq!(err(r"'\q'"), LexErrorKind::InvalidEscape);
        assert_eq!(err(r"'\x4'"), LexErrorKind::InvalidEscape);
    }

    #[test]
    fn newlines_are_significant_outside_parens() {
        use TokenKind::*;
        let v = toks("a = 1\n\n\nb = (1 +\n 2) # trailing\n");
        assert_eq!(
            v,
            vec![Name("a"), Assign, Int(1), Newline, Name("b"), Assign, LParen, Int(1), Plus, Int(2), RParen, Newline, Eof]
        );
    }

    #[test]
    fn leading_blank_lines_and_comments_are_skipped() {
        use TokenKind::*;
        assert_eq!(toks("\n# only a comment\n\n1"), vec![Int(1), Eof]);
    }

    #[test]
    fn operators() {
        use TokenKind::*;
        let v = toks("+ - * / // % = == != < <= > >= , ;");
        assert_eq!(
            v,
            vec![Plus, Minus, Star, Slash, SlashSlash, Percent, Assign, EqEq, Ne, Lt, Le, Gt, Ge, Comma, Semi, Eof]
        );
        assert_eq!(err("a ! b"), LexErrorKind::UnexpectedChar('!'));
        assert_eq!(err("@"), LexErrorKind::UnexpectedChar('@'));
    }

    #[test]
    fn nesting_limit() {
        let opts = LexerOptions { max_nesting: 2, ..LexerOptions::default() };
        let e = Lexer::with_options("(((1)))", SourceId(0), opts).tokenize().unwrap_err();
        assert_eq!(e.kind, LexErrorKind::TooDeep(2));
        assert_eq!(e.span.start, Pos(2));
    }

    #[test]
    fn error_spans_point_at_the_literal() {
        let e = Lexer::new("x = 'abc", SourceId(0)).tokenize().unwrap_err();
        assert_eq!((e.span.start, e.span.end), (Pos(4), Pos(8)));
        assert_eq!(e.to_string(), "unterminated string literal");
    }

    #[test]
    fn linemap_basic() {
        let lm = LineMap::new("a\nbb\nccc");
        assert_eq!(lm.line_col(Pos(0)), (1, 1));
        assert_eq!(lm.line_col(Pos(2)), (2, 1));
        assert_eq!(lm.line_col(Pos(4)), (2, 3));
        assert_eq!(lm.line_col(Pos(7)), (3, 3));
    }

    #[test]
    fn linemap_counts_characters() {
        let lm = LineMap::new("ab\n'é' é");
        assert_eq!(lm.line_col(Pos(8)), (2, 5));
        assert_eq!(lm.line_col(Pos(10)), (2, 6));
    }

    proptest::proptest! {
        #[test]
        fn lexer_never_panics(src in "\\PC{0,64}") {
            let _ = Lexer::new(&src, SourceId(0)).tokenize();
        }

        #[test]
        fn decimal_ints_roundtrip(v in 0i64..=i64::MAX) {
            let text = v.to_string();
            proptest::prop_assert_eq!(toks(&text), vec![TokenKind::Int(v), TokenKind::Eof]);
        }
    }
}
