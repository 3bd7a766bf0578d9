//! Structural checks shared by the compiler, the encoder and the decoder.

use crate::{
    bytecode::unit::{CodeUnit, Op},
    CoreError, CoreResult,
};

/// Structural validation of a unit.
///
/// Checks stay lightweight: constant, name and jump indices must be in range,
/// the line table is either empty (stripped) or one entry per op, and the
/// op list must be non-empty and end with `Return`.
pub fn validate_unit(unit: &CodeUnit) -> CoreResult<()> {
    let op_count = unit.ops.len();

    if unit.is_stripped() {
        if !unit.lines.is_empty() {
            return Err(CoreError::corrupted(format!(
                "stripped unit carries {} line entries",
                unit.lines.len()
            )));
        }
    } else if unit.lines.len() != op_count {
        return Err(CoreError::corrupted(format!(
            "line/op length mismatch ({} lines, {op_count} ops)",
            unit.lines.len()
        )));
    }

    match unit.ops.last() {
        None => return Err(CoreError::corrupted("unit has no ops")),
        Some(Op::Return) => {}
        Some(other) => {
            return Err(CoreError::corrupted(format!("unit must end with Return, found {other:?}")));
        }
    }

    let const_count = unit.consts.len() as u64;
    let name_count = unit.names.len() as u64;
    for (pc, op) in unit.ops.iter().enumerate() {
        match *op {
            Op::LoadConst(ix) if u64::from(ix) >= const_count => {
                return Err(CoreError::corrupted(format!(
                    "op {pc} references const {ix} but pool size is {const_count}"
                )));
            }
            Op::LoadName(ix) | Op::StoreName(ix) if u64::from(ix) >= name_count => {
                return Err(CoreError::corrupted(format!(
                    "op {pc} references name {ix} but name table size is {name_count}"
                )));
            }
            _ => {}
        }
        if let Some(target) = op.jump_target() {
            if target as usize >= op_count {
                return Err(CoreError::corrupted(format!("op {pc} jumps to invalid pc {target}")));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::unit::{ConstValue, Mode};

    fn hello() -> CodeUnit {
        let mut unit = CodeUnit::new("sample", Mode::Exec);
        let print = unit.add_name("print");
        let text = unit.add_const(ConstValue::Str("hi".into()));
        let none = unit.add_const(ConstValue::None);
        unit.push_op(Op::LoadName(print), 1);
        unit.push_op(Op::LoadConst(text), 1);
        unit.push_op(Op::Call(1), 1);
        unit.push_op(Op::Pop, 1);
        unit.push_op(Op::LoadConst(none), 1);
        unit.push_op(Op::Return, 1);
        unit
    }

    #[test]
    fn well_formed_unit_passes() {
        assert!(validate_unit(&hello()).is_ok());
    }

    #[test]
    fn stripped_unit_passes() {
        let mut unit = hello();
        unit.strip();
        assert!(validate_unit(&unit).is_ok());
    }

    #[test]
    fn const_out_of_range() {
        let mut unit = hello();
        unit.ops[1] = Op::LoadConst(9);
        assert!(validate_unit(&unit).is_err());
    }

    #[test]
    fn name_out_of_range() {
        let mut unit = hello();
        unit.ops[0] = Op::StoreName(3);
        assert!(validate_unit(&unit).is_err());
    }

    #[test]
    fn jump_out_of_range() {
        let mut unit = hello();
        unit.ops[3] = Op::Jump(6);
        assert!(validate_unit(&unit).is_err());
    }

    #[test]
    fn missing_return() {
        let mut unit = hello();
        unit.ops.pop();
        unit.lines = Default::default();
        for _ in 0..unit.ops.len() {
            unit.lines.push(1);
        }
        assert!(validate_unit(&unit).is_err());

        let empty = CodeUnit::new("e", Mode::Exec);
        assert!(validate_unit(&empty).is_err());
    }

    #[test]
    fn line_table_mismatch() {
        let mut unit = hello();
        unit.lines.push(2);
        assert!(validate_unit(&unit).is_err());
    }
}
