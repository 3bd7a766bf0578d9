//! Textual disassembly of a [`CodeUnit`], used for debug logging.

use std::fmt::Write;

use crate::bytecode::unit::{CodeUnit, ConstValue, Op};

const PREVIEW_CHARS: usize = 64;

/// Multi-line, human readable disassembly with metadata.
pub fn disassemble_full(unit: &CodeUnit, title: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {title} == (name={}, mode={}, stripped={}, optimized={}, consts={}, names={}, ops={})",
        unit.name,
        unit.mode,
        unit.is_stripped(),
        unit.flags().contains(crate::bytecode::UnitFlags::OPTIMIZED),
        unit.consts.len(),
        unit.names.len(),
        unit.ops.len()
    );

    if !unit.consts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, ";; constants");
        for (idx, value) in &unit.consts {
            let _ = writeln!(out, "const[{idx:04}] = {}", show_const(value));
        }
    }

    if !unit.names.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, ";; names");
        for (idx, name) in unit.names.iter().enumerate() {
            let _ = writeln!(out, "name[{idx:04}] = {name}");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, ";; ops");
    for (pc, op) in unit.ops.iter().enumerate() {
        let line = unit.line_for_pc(pc as u32).map_or_else(|| "-".to_owned(), |l| l.to_string());
        match preview(unit, *op) {
            Some(p) => {
                let _ = writeln!(out, "{pc:04} | {line:>4} | {op:?} ;; {p}");
            }
            None => {
                let _ = writeln!(out, "{pc:04} | {line:>4} | {op:?}");
            }
        }
    }

    if !unit.lines.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, ";; lines");
        for (pcs, line) in unit.lines.iter_ranges() {
            let _ = writeln!(out, "{:04}..{:04} -> {line}", pcs.start, pcs.end);
        }
    }

    out
}

fn preview(unit: &CodeUnit, op: Op) -> Option<String> {
    match op {
        Op::LoadConst(ix) => unit.consts.get(ix).map(show_const),
        Op::LoadName(ix) | Op::StoreName(ix) => unit.names.get(ix).map(str::to_owned),
        Op::Binary(b) => Some(b.symbol().to_owned()),
        _ => None,
    }
}

fn show_const(value: &ConstValue) -> String {
    match value {
        ConstValue::None => "None".into(),
        ConstValue::Bool(true) => "True".into(),
        ConstValue::Bool(false) => "False".into(),
        ConstValue::Int(i) => i.to_string(),
        ConstValue::Float(f) => format!("{f:?}"),
        ConstValue::Str(s) => {
            if s.chars().count() <= PREVIEW_CHARS {
                format!("{s:?}")
            } else {
                let head: String = s.chars().take(PREVIEW_CHARS).collect();
                format!("{head:?}…")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::unit::Mode;

    #[test]
    fn full_listing_mentions_consts_and_names() {
        let mut unit = CodeUnit::new("sample", Mode::Exec);
        let p = unit.add_name("print");
        let c = unit.add_const(ConstValue::Str("Marshalled code".into()));
        unit.push_op(Op::LoadName(p), 1);
        unit.push_op(Op::LoadConst(c), 1);
        unit.push_op(Op::Call(1), 1);
        unit.push_op(Op::Return, 1);

        let text = disassemble_full(&unit, "sample");
        assert!(text.starts_with("== sample == (name=sample, mode=exec"));
        assert!(text.contains("const[0000] = \"Marshalled code\""));
        assert!(text.contains("name[0000] = print"));
        assert!(text.contains("0002 |    1 | Call(1)"));
    }

    #[test]
    fn line_ranges_are_listed_unless_stripped() {
        let mut unit = CodeUnit::new("e", Mode::Exec);
        let c = unit.add_const(ConstValue::Float(1.5));
        unit.push_op(Op::LoadConst(c), 1);
        unit.push_op(Op::Pop, 1);
        unit.push_op(Op::LoadConst(c), 3);
        unit.push_op(Op::Return, 3);

        let text = disassemble_full(&unit, "e");
        assert!(text.contains("const[0000] = 1.5"));
        assert!(text.ends_with(";; lines\n0000..0002 -> 1\n0002..0004 -> 3\n"), "{text}");

        unit.strip();
        let text = disassemble_full(&unit, "e");
        assert!(!text.contains(";; lines"));
        assert!(text.contains("0003 |    - | Return"));
    }

    #[test]
    fn long_strings_are_truncated() {
        let long = "x".repeat(100);
        let shown = show_const(&ConstValue::Str(long));
        assert!(shown.ends_with('…'));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }
}
