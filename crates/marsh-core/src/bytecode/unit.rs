//! Core code-unit structures: the executable unit produced by the compiler,
//! encoded by the marshaller and run by the VM.

use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    mem,
    ops::Range,
    slice,
    str::FromStr,
};

use bitflags::bitflags;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

/* ─────────────────────────── Mode ─────────────────────────── */

/// Compilation mode of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Mode {
    /// A sequence of statements; execution yields `None`.
    #[default]
    Exec,
    /// A single expression; execution yields its value.
    Eval,
}

impl Mode {
    /// Stable wire code.
    pub const fn code(self) -> u8 {
        match self {
            Self::Exec => 0,
            Self::Eval => 1,
        }
    }

    /// Inverse of [`Mode::code`].
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Exec),
            1 => Some(Self::Eval),
            _ => None,
        }
    }

    /// Mode name as accepted by [`FromStr`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Eval => "eval",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exec" => Ok(Self::Exec),
            "eval" => Ok(Self::Eval),
            other => Err(CoreError::UnknownMode(other.to_owned())),
        }
    }
}

/* ─────────────────────────── Flags ─────────────────────────── */

bitflags! {
    /// Flags stored alongside a unit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct UnitFlags: u8 {
        /// The line table has been dropped.
        const STRIPPED  = 0b0000_0001;
        /// Constant folding ran during compilation.
        const OPTIMIZED = 0b0000_0010;
    }
}

/* ─────────────────────────── Constants ─────────────────────────── */

/// Values that can live in the constant pool.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstValue {
    /// `None` literal.
    None,
    /// Boolean literal.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// UTF-8 string constant.
    Str(String),
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Self::None => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
        }
    }
}

/// Constant pool with stable, deduplicated indices (0-based).
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Vec<ConstValue>", into = "Vec<ConstValue>"))]
pub struct ConstPool {
    values: Vec<ConstValue>,
    index: HashMap<ConstValue, u32>,
}

impl ConstPool {
    /// Create an empty pool.
    pub fn new() -> Self { Self::default() }

    /// Number of stored constants.
    pub fn len(&self) -> usize { self.values.len() }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Iterate as `(index, &ConstValue)`.
    pub fn iter(&self) -> ConstIter<'_> { ConstIter { inner: self.values.iter().enumerate() } }

    /// Returns the index of `value`, inserting it if absent.
    pub fn add(&mut self, value: ConstValue) -> u32 {
        if let Some(&idx) = self.index.get(&value) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.index.insert(value.clone(), idx);
        self.values.push(value);
        idx
    }

    /// Appends without deduplication (decoders must keep indices verbatim).
    pub fn push_raw(&mut self, value: ConstValue) -> u32 {
        let idx = self.values.len() as u32;
        self.index.entry(value.clone()).or_insert(idx);
        self.values.push(value);
        idx
    }

    /// Lookup a constant by index.
    pub fn get(&self, idx: u32) -> Option<&ConstValue> { self.values.get(idx as usize) }

    /// Slice view, in index order.
    pub fn as_slice(&self) -> &[ConstValue] { &self.values }
}

impl PartialEq for ConstPool {
    fn eq(&self, other: &Self) -> bool { self.values == other.values }
}

impl From<Vec<ConstValue>> for ConstPool {
    fn from(values: Vec<ConstValue>) -> Self {
        let mut pool = Self::new();
        for v in values {
            pool.push_raw(v);
        }
        pool
    }
}

impl From<ConstPool> for Vec<ConstValue> {
    fn from(pool: ConstPool) -> Self { pool.values }
}

/// Iterator returned by [`ConstPool::iter`].
pub struct ConstIter<'a> {
    inner: std::iter::Enumerate<slice::Iter<'a, ConstValue>>,
}

impl<'a> Iterator for ConstIter<'a> {
    type Item = (u32, &'a ConstValue);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(idx, value)| (idx as u32, value))
    }
}

impl<'a> IntoIterator for &'a ConstPool {
    type Item = (u32, &'a ConstValue);
    type IntoIter = ConstIter<'a>;

    fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/* ─────────────────────────── Names ─────────────────────────── */

/// Symbolic names referenced by `LoadName` / `StoreName`.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Vec<String>", into = "Vec<String>"))]
pub struct NamePool {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl NamePool {
    /// Create an empty pool.
    pub fn new() -> Self { Self::default() }
    /// Number of names.
    pub fn len(&self) -> usize { self.names.len() }
    /// Whether no name is recorded.
    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    /// Returns the index of `name`, inserting it if absent.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.names.len() as u32;
        self.index.insert(name.to_owned(), idx);
        self.names.push(name.to_owned());
        idx
    }

    /// Appends without deduplication.
    pub fn push_raw(&mut self, name: String) -> u32 {
        let idx = self.names.len() as u32;
        self.index.entry(name.clone()).or_insert(idx);
        self.names.push(name);
        idx
    }

    /// Lookup by index.
    pub fn get(&self, idx: u32) -> Option<&str> { self.names.get(idx as usize).map(String::as_str) }
    /// Iterate in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> { self.names.iter().map(String::as_str) }
}

impl PartialEq for NamePool {
    fn eq(&self, other: &Self) -> bool { self.names == other.names }
}

impl From<Vec<String>> for NamePool {
    fn from(names: Vec<String>) -> Self {
        let mut pool = Self::new();
        for n in names {
            pool.push_raw(n);
        }
        pool
    }
}

impl From<NamePool> for Vec<String> {
    fn from(pool: NamePool) -> Self { pool.names }
}

/* ─────────────────────────── Line table ─────────────────────────── */

/// Line table (pc → source line) with contiguous range iteration helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineTable {
    lines: Vec<u32>,
}

impl LineTable {
    /// Create an empty line table.
    pub const fn new() -> Self { Self { lines: Vec::new() } }
    /// Append a mapping for the next program counter.
    pub fn push(&mut self, line: u32) { self.lines.push(line); }
    /// Number of stored line entries.
    pub fn len(&self) -> usize { self.lines.len() }
    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    /// Resolve the source line associated with a program counter.
    pub fn line_for_pc(&self, pc: u32) -> Option<u32> { self.lines.get(pc as usize).copied() }
    /// Iterate over contiguous ranges of the same line number.
    pub fn iter_ranges(&self) -> LineRangeIter<'_> { LineRangeIter { lines: &self.lines, index: 0 } }
    /// Remove all recorded mappings.
    pub fn clear(&mut self) { self.lines.clear(); }
    /// Raw view.
    pub fn as_slice(&self) -> &[u32] { &self.lines }
}

/// Iterator yielding contiguous line ranges `(start..end, line)`.
pub struct LineRangeIter<'a> {
    lines: &'a [u32],
    index: usize,
}

impl Iterator for LineRangeIter<'_> {
    type Item = (Range<u32>, u32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.lines.len() {
            return None;
        }
        let start = self.index;
        let line = self.lines[start];
        self.index += 1;
        while self.index < self.lines.len() && self.lines[self.index] == line {
            self.index += 1;
        }
        Some((start as u32..self.index as u32, line))
    }
}

/* ─────────────────────────── Operations ─────────────────────────── */

/// Binary operators carried by [`Op::Binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/` (true division)
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

impl BinOp {
    const ALL: [Self; 12] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::FloorDiv,
        Self::Mod,
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Le,
        Self::Gt,
        Self::Ge,
    ];

    /// Stable wire code.
    pub const fn code(self) -> u8 { self as u8 }

    /// Inverse of [`BinOp::code`].
    pub fn from_code(code: u8) -> Option<Self> { Self::ALL.get(code as usize).copied() }

    /// Source-level symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Unary operators carried by [`Op::Unary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnOp {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
    /// `not x`
    Not,
}

impl UnOp {
    /// Stable wire code.
    pub const fn code(self) -> u8 { self as u8 }

    /// Inverse of [`UnOp::code`].
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Neg),
            1 => Some(Self::Pos),
            2 => Some(Self::Not),
            _ => None,
        }
    }
}

/// Tagged instruction set of the stack VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Op {
    /// Push constant `u32` onto the stack.
    LoadConst(u32),
    /// Push the value bound to name `u32` (globals, then builtins).
    LoadName(u32),
    /// Pop and bind to name `u32`.
    StoreName(u32),
    /// Discard the top of stack.
    Pop,
    /// Pop rhs then lhs, push `lhs op rhs`.
    Binary(BinOp),
    /// Pop operand, push `op operand`.
    Unary(UnOp),
    /// Unconditional jump to absolute pc.
    Jump(u32),
    /// Pop; jump if falsy.
    PopJumpIfFalse(u32),
    /// If top is falsy jump (keeping it), else pop.
    JumpIfFalseOrPop(u32),
    /// If top is truthy jump (keeping it), else pop.
    JumpIfTrueOrPop(u32),
    /// Call with `u8` positional arguments; callee sits below them.
    Call(u8),
    /// Pop and return the top of stack.
    Return,
}

impl Op {
    /// Jump target, if this is a jump.
    pub const fn jump_target(self) -> Option<u32> {
        match self {
            Self::Jump(t) | Self::PopJumpIfFalse(t) | Self::JumpIfFalseOrPop(t) | Self::JumpIfTrueOrPop(t) => Some(t),
            _ => None,
        }
    }

    /// Copy of this jump with a new target (non-jumps are returned as-is).
    #[must_use]
    pub const fn with_target(self, target: u32) -> Self {
        match self {
            Self::Jump(_) => Self::Jump(target),
            Self::PopJumpIfFalse(_) => Self::PopJumpIfFalse(target),
            Self::JumpIfFalseOrPop(_) => Self::JumpIfFalseOrPop(target),
            Self::JumpIfTrueOrPop(_) => Self::JumpIfTrueOrPop(target),
            other => other,
        }
    }
}

/* ─────────────────────────── CodeUnit ─────────────────────────── */

/// Executable unit with constants, names, ops and a line table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CodeUnit {
    /// Unit name given at compile time (e.g. `"sample"`).
    pub name: String,
    /// Statements or single expression.
    pub mode: Mode,
    flags: UnitFlags,
    /// Constant pool.
    pub consts: ConstPool,
    /// Name table.
    pub names: NamePool,
    /// Linear list of operations.
    pub ops: Vec<Op>,
    /// Mapping between program counters and source lines.
    pub lines: LineTable,
}

impl CodeUnit {
    /// Create an empty unit.
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            flags: UnitFlags::empty(),
            consts: ConstPool::new(),
            names: NamePool::new(),
            ops: Vec::new(),
            lines: LineTable::new(),
        }
    }

    /// Flags (read-only).
    pub const fn flags(&self) -> UnitFlags { self.flags }

    /// Replace the flags.
    pub fn set_flags(&mut self, flags: UnitFlags) { self.flags = flags; }

    /// Whether the line table is absent.
    pub const fn is_stripped(&self) -> bool { self.flags.contains(UnitFlags::STRIPPED) }

    /// Append a constant and return its index.
    pub fn add_const(&mut self, value: ConstValue) -> u32 { self.consts.add(value) }

    /// Intern a name and return its index.
    pub fn add_name(&mut self, name: &str) -> u32 { self.names.intern(name) }

    /// Push an op while recording its source line; returns its pc.
    pub fn push_op(&mut self, op: Op, line: u32) -> u32 {
        let pc = self.ops.len() as u32;
        self.ops.push(op);
        if !self.is_stripped() {
            self.lines.push(line);
        }
        pc
    }

    /// Pc of the next op to be pushed.
    pub fn next_pc(&self) -> u32 { self.ops.len() as u32 }

    /// Point the jump at `pc` to `target`.
    pub fn patch_jump(&mut self, pc: u32, target: u32) -> CoreResult<()> {
        let slot = self
            .ops
            .get_mut(pc as usize)
            .ok_or_else(|| CoreError::corrupted(format!("patch_jump: no op at pc {pc}")))?;
        if slot.jump_target().is_none() {
            return Err(CoreError::corrupted(format!("patch_jump: op at pc {pc} is not a jump")));
        }
        *slot = slot.with_target(target);
        Ok(())
    }

    /// Drop the line table and mark the unit stripped.
    pub fn strip(&mut self) {
        self.lines.clear();
        self.flags.insert(UnitFlags::STRIPPED);
    }

    /// Source line of `pc`, when known.
    pub fn line_for_pc(&self, pc: u32) -> Option<u32> { self.lines.line_for_pc(pc) }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn consts_are_deduplicated() {
        let mut pool = ConstPool::new();
        let a = pool.add(ConstValue::Str("x".into()));
        let b = pool.add(ConstValue::Int(1));
        let c = pool.add(ConstValue::Str("x".into()));
        let d = pool.add(ConstValue::Bool(true));
        assert_eq!((a, b, c, d), (0, 1, 0, 2));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn float_consts_compare_by_bits() {
        assert_ne!(ConstValue::Float(0.0), ConstValue::Float(-0.0));
        assert_eq!(ConstValue::Float(f64::NAN), ConstValue::Float(f64::NAN));
    }

    #[test]
    fn names_are_interned() {
        let mut names = NamePool::new();
        assert_eq!(names.intern("print"), 0);
        assert_eq!(names.intern("x"), 1);
        assert_eq!(names.intern("print"), 0);
        assert_eq!(names.get(1), Some("x"));
        assert_eq!(names.get(2), None);
    }

    #[test]
    fn patching_jumps() -> CoreResult<()> {
        let mut unit = CodeUnit::new("t", Mode::Eval);
        let j = unit.push_op(Op::PopJumpIfFalse(0), 1);
        unit.push_op(Op::Pop, 1);
        let target = unit.next_pc();
        unit.patch_jump(j, target)?;
        assert_eq!(unit.ops[0], Op::PopJumpIfFalse(2));
        assert!(unit.patch_jump(1, 0).is_err());
        assert!(unit.patch_jump(9, 0).is_err());
        Ok(())
    }

    #[test]
    fn stripped_units_skip_lines() {
        let mut unit = CodeUnit::new("t", Mode::Exec);
        unit.push_op(Op::Pop, 3);
        unit.strip();
        unit.push_op(Op::Return, 4);
        assert!(unit.lines.is_empty());
        assert!(unit.is_stripped());
    }

    #[test]
    fn line_ranges() {
        let mut lines = LineTable::new();
        for l in [1, 1, 2, 2, 2, 5] {
            lines.push(l);
        }
        let ranges: Vec<_> = lines.iter_ranges().collect();
        assert_eq!(ranges, vec![(0..2, 1), (2..5, 2), (5..6, 5)]);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("exec".parse::<Mode>().ok(), Some(Mode::Exec));
        assert_eq!("eval".parse::<Mode>().ok(), Some(Mode::Eval));
        assert_eq!("single".parse::<Mode>(), Err(CoreError::UnknownMode("single".into())));
        assert_eq!(Mode::from_code(Mode::Eval.code()), Some(Mode::Eval));
    }

    #[test]
    fn binop_codes_roundtrip() {
        for op in BinOp::ALL {
            assert_eq!(BinOp::from_code(op.code()), Some(op));
        }
        assert_eq!(BinOp::from_code(12), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_dump_keeps_pool_order() {
        let mut unit = CodeUnit::new("s", Mode::Exec);
        let c = unit.add_const(ConstValue::Str("hi".into()));
        unit.push_op(Op::LoadConst(c), 1);
        unit.push_op(Op::Return, 1);
        let json = serde_json::to_string(&unit).expect("serialize");
        let back: CodeUnit = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, unit);
    }
}
