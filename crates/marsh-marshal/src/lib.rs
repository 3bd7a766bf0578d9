//! marsh-marshal — format binaire d’une [`CodeUnit`]
//!
//! Format (version 1, entiers little-endian) :
//! ```text
//! header  := "MRSH" | version:u16 | flags:u8 | reserved:u8 (=0) | body_len:u32
//! body    := mode:u8 | name:str | consts | names | ops | lines
//! str     := len:u32 | utf8 bytes
//! consts  := count:u32 | (tag:u8 payload)*
//! names   := count:u32 | str*
//! ops     := count:u32 | (opcode:u8 operand?)*
//! lines   := count:u32 | u32*
//! trailer := crc32(header ‖ body):u32
//! ```
//!
//! La longueur totale est fixée par `body_len` : toute troncature ou extension
//! est rejetée avant même la vérification du CRC32, qui détecte ensuite toute
//! corruption d’un octet.
//!
//! API :
//! - [`Marshaller`] + [`MarshalOptions`]
//! - raccourcis [`dumps`] / [`loads`]

#![deny(missing_docs)]

use std::borrow::Cow;

use marsh_core::bytecode::CodeUnit;

mod decode;
mod encode;
mod error;

pub use error::{DeserializeError, SerializeError};

/* ─────────────────────────── Constantes du format ─────────────────────────── */

/// Taille de l’en-tête fixe.
pub const HEADER_LEN: usize = 12;
/// Taille du trailer (CRC32).
pub const TRAILER_LEN: usize = 4;

pub(crate) mod tags {
    pub const CONST_NONE: u8 = 0;
    pub const CONST_BOOL: u8 = 1;
    pub const CONST_INT: u8 = 2;
    pub const CONST_FLOAT: u8 = 3;
    pub const CONST_STR: u8 = 4;

    pub const OP_LOAD_CONST: u8 = 0x01;
    pub const OP_LOAD_NAME: u8 = 0x02;
    pub const OP_STORE_NAME: u8 = 0x03;
    pub const OP_POP: u8 = 0x04;
    pub const OP_BINARY: u8 = 0x05;
    pub const OP_UNARY: u8 = 0x06;
    pub const OP_JUMP: u8 = 0x07;
    pub const OP_POP_JUMP_IF_FALSE: u8 = 0x08;
    pub const OP_JUMP_IF_FALSE_OR_POP: u8 = 0x09;
    pub const OP_JUMP_IF_TRUE_OR_POP: u8 = 0x0A;
    pub const OP_CALL: u8 = 0x0B;
    pub const OP_RETURN: u8 = 0x0C;
}

/* ─────────────────────────── Marshaller ─────────────────────────── */

/// Options d’encodage.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarshalOptions {
    /// Retirer la table des lignes avant d’encoder (unité `STRIPPED`).
    pub strip_lines: bool,
}

/// Encodeur/décodeur du format marsh, sans état global.
#[derive(Debug, Clone, Copy, Default)]
pub struct Marshaller {
    opts: MarshalOptions,
}

impl Marshaller {
    /// Crée un marshaller.
    pub const fn new(opts: MarshalOptions) -> Self { Self { opts } }

    /// Options courantes.
    pub const fn options(&self) -> MarshalOptions { self.opts }

    /// Sérialise une unité ; le résultat est déterministe.
    pub fn dumps(&self, unit: &CodeUnit) -> Result<Vec<u8>, SerializeError> {
        let unit = if self.opts.strip_lines && !unit.is_stripped() {
            let mut owned = unit.clone();
            owned.strip();
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(unit)
        };
        encode::encode_unit(&unit)
    }

    /// Reconstruit une unité à partir d’octets produits par [`Marshaller::dumps`].
    pub fn loads(&self, bytes: &[u8]) -> Result<CodeUnit, DeserializeError> { decode::decode_unit(bytes) }
}

/// Sérialise avec les options par défaut.
pub fn dumps(unit: &CodeUnit) -> Result<Vec<u8>, SerializeError> { Marshaller::default().dumps(unit) }

/// Désérialise avec les options par défaut.
pub fn loads(bytes: &[u8]) -> Result<CodeUnit, DeserializeError> { Marshaller::default().loads(bytes) }

/* ─────────────────────────── Tests ─────────────────────────── */
