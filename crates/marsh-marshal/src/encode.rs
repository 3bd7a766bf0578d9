//! `CodeUnit` → octets.

use log::debug;
use marsh_core::{
    bytecode::{helpers::validate_unit, CodeUnit, ConstValue, Op},
    crc32_ieee, ByteWriter, MAGIC_MARSH, MARSH_VERSION,
};

use crate::{tags, SerializeError};

fn count(section: &'static str, len: usize) -> Result<u32, SerializeError> {
    u32::try_from(len).map_err(|_| SerializeError::TooLarge { section, len })
}

fn write_str(w: &mut ByteWriter, section: &'static str, s: &str) -> Result<(), SerializeError> {
    w.write_u32_le(count(section, s.len())?);
    w.write_bytes(s.as_bytes());
    Ok(())
}

pub(crate) fn encode_unit(unit: &CodeUnit) -> Result<Vec<u8>, SerializeError> {
    validate_unit(unit).map_err(SerializeError::InvalidUnit)?;

    let mut w = ByteWriter::new();

    // En-tête ; body_len est patché à la fin
    w.write_bytes(MAGIC_MARSH);
    w.write_u16_le(MARSH_VERSION);
    w.write_u8(unit.flags().bits());
    w.write_u8(0);
    let len_at = w.len();
    w.write_u32_le(0);
    let body_start = w.len();

    w.write_u8(unit.mode.code());
    write_str(&mut w, "unit name", &unit.name)?;

    w.write_u32_le(count("constant pool", unit.consts.len())?);
    for (_, value) in &unit.consts {
        match value {
            ConstValue::None => w.write_u8(tags::CONST_NONE),
            ConstValue::Bool(b) => {
                w.write_u8(tags::CONST_BOOL);
                w.write_u8(u8::from(*b));
            }
            ConstValue::Int(v) => {
                w.write_u8(tags::CONST_INT);
                w.write_i64_le(*v);
            }
            ConstValue::Float(v) => {
                w.write_u8(tags::CONST_FLOAT);
                w.write_f64_le(*v);
            }
            ConstValue::Str(s) => {
                w.write_u8(tags::CONST_STR);
                write_str(&mut w, "string constant", s)?;
            }
        }
    }

    w.write_u32_le(count("name table", unit.names.len())?);
    for name in unit.names.iter() {
        write_str(&mut w, "name", name)?;
    }

    w.write_u32_le(count("op list", unit.ops.len())?);
    for op in &unit.ops {
        match *op {
            Op::LoadConst(ix) => {
                w.write_u8(tags::OP_LOAD_CONST);
                w.write_u32_le(ix);
            }
            Op::LoadName(ix) => {
                w.write_u8(tags::OP_LOAD_NAME);
                w.write_u32_le(ix);
            }
            Op::StoreName(ix) => {
                w.write_u8(tags::OP_STORE_NAME);
                w.write_u32_le(ix);
            }
            Op::Pop => w.write_u8(tags::OP_POP),
            Op::Binary(b) => {
                w.write_u8(tags::OP_BINARY);
                w.write_u8(b.code());
            }
            Op::Unary(u) => {
                w.write_u8(tags::OP_UNARY);
                w.write_u8(u.code());
            }
            Op::Jump(t) => {
                w.write_u8(tags::OP_JUMP);
                w.write_u32_le(t);
            }
            Op::PopJumpIfFalse(t) => {
                w.write_u8(tags::OP_POP_JUMP_IF_FALSE);
                w.write_u32_le(t);
            }
            Op::JumpIfFalseOrPop(t) => {
                w.write_u8(tags::OP_JUMP_IF_FALSE_OR_POP);
                w.write_u32_le(t);
            }
            Op::JumpIfTrueOrPop(t) => {
                w.write_u8(tags::OP_JUMP_IF_TRUE_OR_POP);
                w.write_u32_le(t);
            }
            Op::Call(argc) => {
                w.write_u8(tags::OP_CALL);
                w.write_u8(argc);
            }
            Op::Return => w.write_u8(tags::OP_RETURN),
        }
    }

    w.write_u32_le(count("line table", unit.lines.len())?);
    for line in unit.lines.as_slice() {
        w.write_u32_le(*line);
    }

    let body_len = count("body", w.len() - body_start)?;
    w.patch_u32_le(len_at, body_len)?;

    // CRC32 sur en-tête + corps
    let crc = crc32_ieee(w.as_slice());
    w.write_u32_le(crc);

    debug!(
        "marshalled `{}`: {} bytes ({} ops, {} consts, crc {crc:#010x})",
        unit.name,
        w.len(),
        unit.ops.len(),
        unit.consts.len()
    );
    Ok(w.into_vec())
}
