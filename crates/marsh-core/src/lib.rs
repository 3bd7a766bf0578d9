//! marsh-core — primitives partagées
//!
//! Fournit :
//! - `SourceId`, `Pos`, `Span`, `Spanned<T>`
//! - Constantes du format marshal (`MAGIC_MARSH`, `MARSH_VERSION`)
//! - IO mémoire (little-endian) : `ByteWriter`, `ByteReader`
//! - `crc32_ieee` (via `crc32fast`)
//! - Erreurs `CoreError` + alias `CoreResult<T>`
//! - [`bytecode`] : l'unité exécutable (`CodeUnit`), validation, désassemblage
//!
//! Features :
//! - `serde` : derive (dé)sérialisation sur les structures utiles

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::borrow::Cow;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Unité exécutable (consts, noms, ops, lignes) + helpers.
pub mod bytecode;

/// Ré-exporte le désassembleur textuel.
pub use bytecode::disasm;
/// Ré-exporte les helpers de validation.
pub use bytecode::helpers;

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = Result<T, CoreError>;

/* ─────────────────────────── Spans / Positions ─────────────────────────── */

/// Identifiant de source (fichier, buffer, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceId(pub u32);

/// Position (offset byte) depuis le début de la source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pos(pub u32);

impl Pos {
    /// Position nulle.
    pub const ZERO: Self = Self(0);
}

/// Plage (demi-ouverte) `[start, end)` dans une source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Source d’où provient l’item.
    pub source: SourceId,
    /// Début inclus.
    pub start: Pos,
    /// Fin exclue.
    pub end: Pos,
}

impl Span {
    /// Crée un span.
    pub const fn new(source: SourceId, start: Pos, end: Pos) -> Self { Self { source, start, end } }
    /// Longueur en bytes.
    pub const fn len(&self) -> u32 { self.end.0.saturating_sub(self.start.0) }
    /// Vrai si le span est vide.
    pub const fn is_empty(&self) -> bool { self.start.0 >= self.end.0 }
}

/// Wrapper utilitaire « valeur + span ».
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spanned<T> {
    /// La valeur.
    pub value: T,
    /// La localisation.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Construit un `Spanned<T>`.
    pub const fn new(value: T, span: Span) -> Self { Self { value, span } }
}

/* ─────────────────────────── Format marshal — constantes ─────────────────────────── */

/// Magic d’un flux marshal : `b"MRSH"`.
pub const MAGIC_MARSH: &[u8; 4] = b"MRSH";

/// Version actuelle du format marshal.
pub const MARSH_VERSION: u16 = 1;

/* ─────────────────────────── CRC32 IEEE ─────────────────────────── */

/// CRC32 (IEEE 802.3).
pub fn crc32_ieee(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/* ─────────────────────────── Byte Writer (LE) ─────────────────────────── */

/// Buffer d’écriture (croît automatiquement).
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Crée un writer vide.
    pub const fn new() -> Self { Self { buf: Vec::new() } }
    /// Accès en lecture au contenu.
    pub fn as_slice(&self) -> &[u8] { &self.buf }
    /// Taille courante.
    pub fn len(&self) -> usize { self.buf.len() }
    /// Vrai si rien n’a été écrit.
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }
    /// Récupère le buffer (consomme).
    pub fn into_vec(self) -> Vec<u8> { self.buf }
    /// Ajoute des octets bruts.
    pub fn write_bytes(&mut self, bytes: &[u8]) { self.buf.extend_from_slice(bytes); }
    /// Écrit un octet.
    pub fn write_u8(&mut self, v: u8) { self.buf.push(v); }
    /// Écrit un u16 little-endian.
    pub fn write_u16_le(&mut self, v: u16) { self.put::<2>(|b| LittleEndian::write_u16(b, v)); }
    /// Écrit un u32 little-endian.
    pub fn write_u32_le(&mut self, v: u32) { self.put::<4>(|b| LittleEndian::write_u32(b, v)); }
    /// Écrit un u64 little-endian.
    pub fn write_u64_le(&mut self, v: u64) { self.put::<8>(|b| LittleEndian::write_u64(b, v)); }
    /// Écrit un i64 little-endian.
    pub fn write_i64_le(&mut self, v: i64) { self.put::<8>(|b| LittleEndian::write_i64(b, v)); }
    /// Écrit un f64 little-endian (bits IEEE conservés, NaN compris).
    pub fn write_f64_le(&mut self, v: f64) { self.write_u64_le(v.to_bits()); }

    /// Remplace un u32 déjà écrit à `at` (back-patching d’une longueur).
    pub fn patch_u32_le(&mut self, at: usize, v: u32) -> CoreResult<()> {
        let end = at.checked_add(4).filter(|&e| e <= self.buf.len()).ok_or(CoreError::UnexpectedEof {
            needed: 4,
            at: at as u64,
        })?;
        LittleEndian::write_u32(&mut self.buf[at..end], v);
        Ok(())
    }

    fn put<const N: usize>(&mut self, f: impl FnOnce(&mut [u8])) {
        let mut tmp = [0u8; N];
        f(&mut tmp);
        self.buf.extend_from_slice(&tmp);
    }
}

/* ─────────────────────────── Byte Reader (LE) ─────────────────────────── */

/// Lecteur séquentiel sur un slice d’octets (helpers LE).
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> ByteReader<'a> {
    /// Construit un lecteur.
    pub const fn new(data: &'a [u8]) -> Self { Self { data, off: 0 } }
    /// Offset courant.
    pub const fn offset(&self) -> usize { self.off }
    /// Taille restante.
    pub const fn remaining(&self) -> usize { self.data.len().saturating_sub(self.off) }

    /// Lit `n` octets (ou erreur si EOF).
    pub fn read_bytes(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::UnexpectedEof { needed: n as u64, at: self.off as u64 });
        }
        let start = self.off;
        self.off += n;
        Ok(&self.data[start..self.off])
    }

    /// Lit un octet.
    pub fn read_u8(&mut self) -> CoreResult<u8> { Ok(self.read_bytes(1)?[0]) }
    /// Lit un u16 LE.
    pub fn read_u16_le(&mut self) -> CoreResult<u16> { Ok(LittleEndian::read_u16(self.read_bytes(2)?)) }
    /// Lit un u32 LE.
    pub fn read_u32_le(&mut self) -> CoreResult<u32> { Ok(LittleEndian::read_u32(self.read_bytes(4)?)) }
    /// Lit un u64 LE.
    pub fn read_u64_le(&mut self) -> CoreResult<u64> { Ok(LittleEndian::read_u64(self.read_bytes(8)?)) }
    /// Lit un i64 LE.
    pub fn read_i64_le(&mut self) -> CoreResult<i64> { Ok(LittleEndian::read_i64(self.read_bytes(8)?)) }
    /// Lit un f64 LE.
    pub fn read_f64_le(&mut self) -> CoreResult<f64> { Ok(f64::from_bits(self.read_u64_le()?)) }

    /// Lit une chaîne `len:u32 + bytes` en UTF-8.
    pub fn read_str(&mut self) -> CoreResult<&'a str> {
        let len = self.read_u32_le()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| CoreError::InvalidUtf8 { at: (self.off - len) as u64 })
    }
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs de bas niveau communes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Fin de buffer inattendue.
    #[error("unexpected EOF: need {needed} bytes at {at}")]
    UnexpectedEof {
        /// Nombre d’octets manquants.
        needed: u64,
        /// Offset où l’erreur s’est produite.
        at: u64,
    },
    /// Mode de compilation inconnu (ni `exec` ni `eval`).
    #[error("unknown mode `{0}` (expected `exec` or `eval`)")]
    UnknownMode(String),
    /// UTF-8 invalide.
    #[error("invalid utf-8 at {at}")]
    InvalidUtf8 {
        /// Offset du début de la chaîne.
        at: u64,
    },
    /// Données incohérentes (index hors bornes, table mal formée…).
    #[error("corrupted: {0}")]
    Corrupted(Cow<'static, str>),
}

impl CoreError {
    /// Construit une erreur « corrompu ».
    pub fn corrupted(msg: impl Into<Cow<'static, str>>) -> Self { Self::Corrupted(msg.into()) }
}

/* ─────────────────────────── Prélude ─────────────────────────── */

/// Prélude pratique pour importer les types/funcs clés du crate.
pub mod prelude {
    pub use super::bytecode::{BinOp, CodeUnit, ConstPool, ConstValue, LineTable, Mode, NamePool, Op, UnOp, UnitFlags};
    pub use super::{
        crc32_ieee, ByteReader, ByteWriter, CoreError, CoreResult, Pos, SourceId, Span, Spanned, MAGIC_MARSH,
        MARSH_VERSION,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */
