//! Bytecode helpers (code unit structure, validation, disassembly).
//!
//! The binary encoding of a [`CodeUnit`] lives in `marsh-marshal`; this module
//! only owns the in-memory representation and the checks both sides share.

/// Code unit representation (constants, names, ops, line table).
pub mod unit;
pub mod helpers;
pub mod disasm;

pub use unit::{BinOp, CodeUnit, ConstPool, ConstValue, LineTable, Mode, NamePool, Op, UnOp, UnitFlags};
