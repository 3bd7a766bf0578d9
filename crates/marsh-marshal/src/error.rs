//! Erreurs d’encodage / décodage.

use marsh_core::CoreError;
use thiserror::Error;

/// Échec de [`crate::Marshaller::dumps`] : l’unité n’est pas représentable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    /// Unité structurellement invalide (index hors bornes, pas de `Return`…).
    #[error("unit cannot be serialized: {0}")]
    InvalidUnit(#[source] CoreError),
    /// Table trop grande pour un compteur `u32`.
    #[error("{section} too large for the format ({len} entries)")]
    TooLarge {
        /// Table concernée.
        section: &'static str,
        /// Taille réelle.
        len: usize,
    },
    /// Erreur d’écriture interne.
    #[error("encoding failed: {0}")]
    Encoding(#[from] CoreError),
}

/// Échec de [`crate::Marshaller::loads`] : octets tronqués, corrompus ou incompatibles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeserializeError {
    /// Moins d’octets que l’en-tête + trailer.
    #[error("input too short: {len} bytes (minimum {min})")]
    TooShort {
        /// Taille reçue.
        len: usize,
        /// Taille minimale.
        min: usize,
    },
    /// Magic absent.
    #[error("bad magic {found:02x?} (not a marsh stream)")]
    BadMagic {
        /// Les 4 premiers octets lus.
        found: [u8; 4],
    },
    /// Produit par un encodeur d’une autre version.
    #[error("unsupported format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version lue.
        found: u16,
        /// Version supportée.
        expected: u16,
    },
    /// Taille totale ≠ en-tête + `body_len` + trailer (troncature / ajout).
    #[error("length mismatch: header announces {expected} bytes, got {found}")]
    LengthMismatch {
        /// Taille annoncée.
        expected: u64,
        /// Taille reçue.
        found: u64,
    },
    /// CRC32 invalide.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC stocké dans le trailer.
        stored: u32,
        /// CRC recalculé.
        computed: u32,
    },
    /// Bits de drapeaux inconnus.
    #[error("unknown flag bits {0:#04x}")]
    UnknownFlags(u8),
    /// Mode inconnu.
    #[error("unknown mode byte {0}")]
    UnknownMode(u8),
    /// Tag de constante inconnu.
    #[error("unknown constant tag {tag} at offset {at}")]
    UnknownConstTag {
        /// Tag lu.
        tag: u8,
        /// Offset dans le flux.
        at: u64,
    },
    /// Opcode inconnu.
    #[error("unknown opcode {opcode:#04x} at offset {at}")]
    UnknownOpcode {
        /// Opcode lu.
        opcode: u8,
        /// Offset dans le flux.
        at: u64,
    },
    /// Code d’opérateur inconnu (opérande de `Binary` / `Unary`).
    #[error("unknown operator code {code} at offset {at}")]
    UnknownOperator {
        /// Code lu.
        code: u8,
        /// Offset dans le flux.
        at: u64,
    },
    /// Octets restants après la table des lignes.
    #[error("{0} trailing bytes inside body")]
    TrailingBytes(usize),
    /// Corps mal formé (EOF interne, UTF-8 invalide…).
    #[error("malformed body: {0}")]
    Malformed(#[from] CoreError),
    /// Unité décodée structurellement invalide.
    #[error("decoded unit is invalid: {0}")]
    InvalidUnit(#[source] CoreError),
}
