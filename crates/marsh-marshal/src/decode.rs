//! Octets → `CodeUnit`.

use log::{debug, trace};
use marsh_core::{
    bytecode::{helpers::validate_unit, BinOp, CodeUnit, ConstValue, Mode, Op, UnOp, UnitFlags},
    crc32_ieee, ByteReader, CoreError, MAGIC_MARSH, MARSH_VERSION,
};

use crate::{tags, DeserializeError, HEADER_LEN, TRAILER_LEN};

pub(crate) fn decode_unit(bytes: &[u8]) -> Result<CodeUnit, DeserializeError> {
    let min = HEADER_LEN + TRAILER_LEN;
    if bytes.len() < min {
        return Err(DeserializeError::TooShort { len: bytes.len(), min });
    }

    // En-tête
    let mut r = ByteReader::new(bytes);
    let magic = r.read_bytes(MAGIC_MARSH.len())?;
    if magic != MAGIC_MARSH {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(DeserializeError::BadMagic { found });
    }
    let version = r.read_u16_le()?;
    if version != MARSH_VERSION {
        return Err(DeserializeError::UnsupportedVersion { found: version, expected: MARSH_VERSION });
    }
    let raw_flags = r.read_u8()?;
    let reserved = r.read_u8()?;
    let body_len = r.read_u32_le()?;

    // Longueur totale, puis CRC
    let expected = (HEADER_LEN + TRAILER_LEN) as u64 + u64::from(body_len);
    if bytes.len() as u64 != expected {
        return Err(DeserializeError::LengthMismatch { expected, found: bytes.len() as u64 });
    }
    let crc_at = bytes.len() - TRAILER_LEN;
    let stored = ByteReader::new(&bytes[crc_at..]).read_u32_le()?;
    let computed = crc32_ieee(&bytes[..crc_at]);
    if stored != computed {
        return Err(DeserializeError::ChecksumMismatch { stored, computed });
    }

    let flags = UnitFlags::from_bits(raw_flags).ok_or(DeserializeError::UnknownFlags(raw_flags))?;
    if reserved != 0 {
        return Err(CoreError::corrupted(format!("reserved header byte is {reserved}, expected 0")).into());
    }

    // Corps
    let mut body = BodyReader { r: ByteReader::new(&bytes[HEADER_LEN..crc_at]) };
    let unit = body.read_unit(flags)?;
    if body.r.remaining() > 0 {
        return Err(DeserializeError::TrailingBytes(body.r.remaining()));
    }

    validate_unit(&unit).map_err(DeserializeError::InvalidUnit)?;
    debug!("unmarshalled `{}`: {} ops from {} bytes", unit.name, unit.ops.len(), bytes.len());
    Ok(unit)
}

struct BodyReader<'a> {
    r: ByteReader<'a>,
}

impl BodyReader<'_> {
    /// Offset absolu dans le flux (pour les messages d’erreur).
    fn at(&self) -> u64 { (HEADER_LEN + self.r.offset()) as u64 }

    fn read_count(&mut self) -> Result<usize, DeserializeError> { Ok(self.r.read_u32_le()? as usize) }

    /// Pré-allocation bornée par les octets restants (un compteur corrompu ne doit pas allouer).
    fn capacity_for(&self, n: usize) -> usize { n.min(self.r.remaining()) }

    fn read_unit(&mut self, flags: UnitFlags) -> Result<CodeUnit, DeserializeError> {
        let mode_byte = self.r.read_u8()?;
        let mode = Mode::from_code(mode_byte).ok_or(DeserializeError::UnknownMode(mode_byte))?;
        let name = self.r.read_str()?;

        let mut unit = CodeUnit::new(name, mode);
        unit.set_flags(flags);

        let n = self.read_count()?;
        for _ in 0..n {
            let value = self.read_const()?;
            unit.consts.push_raw(value);
        }

        let n = self.read_count()?;
        for _ in 0..n {
            let name = self.r.read_str()?;
            unit.names.push_raw(name.to_owned());
        }

        let n = self.read_count()?;
        unit.ops.reserve(self.capacity_for(n));
        for _ in 0..n {
            let op = self.read_op()?;
            unit.ops.push(op);
        }

        let n = self.read_count()?;
        for _ in 0..n {
            unit.lines.push(self.r.read_u32_le()?);
        }

        trace!(
            "body: {} consts, {} names, {} ops, {} lines",
            unit.consts.len(),
            unit.names.len(),
            unit.ops.len(),
            unit.lines.len()
        );
        Ok(unit)
    }

    fn read_const(&mut self) -> Result<ConstValue, DeserializeError> {
        let at = self.at();
        let tag = self.r.read_u8()?;
        Ok(match tag {
            tags::CONST_NONE => ConstValue::None,
            tags::CONST_BOOL => match self.r.read_u8()? {
                0 => ConstValue::Bool(false),
                1 => ConstValue::Bool(true),
                other => return Err(CoreError::corrupted(format!("invalid bool byte {other} at {}", at + 1)).into()),
            },
            tags::CONST_INT => ConstValue::Int(self.r.read_i64_le()?),
            tags::CONST_FLOAT => ConstValue::Float(self.r.read_f64_le()?),
            tags::CONST_STR => ConstValue::Str(self.r.read_str()?.to_owned()),
            _ => return Err(DeserializeError::UnknownConstTag { tag, at }),
        })
    }

    fn read_op(&mut self) -> Result<Op, DeserializeError> {
        let at = self.at();
        let opcode = self.r.read_u8()?;
        Ok(match opcode {
            tags::OP_LOAD_CONST => Op::LoadConst(self.r.read_u32_le()?),
            tags::OP_LOAD_NAME => Op::LoadName(self.r.read_u32_le()?),
            tags::OP_STORE_NAME => Op::StoreName(self.r.read_u32_le()?),
            tags::OP_POP => Op::Pop,
            tags::OP_BINARY => {
                let code = self.r.read_u8()?;
                Op::Binary(BinOp::from_code(code).ok_or(DeserializeError::UnknownOperator { code, at: at + 1 })?)
            }
            tags::OP_UNARY => {
                let code = self.r.read_u8()?;
                Op::Unary(UnOp::from_code(code).ok_or(DeserializeError::UnknownOperator { code, at: at + 1 })?)
            }
            tags::OP_JUMP => Op::Jump(self.r.read_u32_le()?),
            tags::OP_POP_JUMP_IF_FALSE => Op::PopJumpIfFalse(self.r.read_u32_le()?),
            tags::OP_JUMP_IF_FALSE_OR_POP => Op::JumpIfFalseOrPop(self.r.read_u32_le()?),
            tags::OP_JUMP_IF_TRUE_OR_POP => Op::JumpIfTrueOrPop(self.r.read_u32_le()?),
            tags::OP_CALL => Op::Call(self.r.read_u8()?),
            tags::OP_RETURN => Op::Return,
            _ => return Err(DeserializeError::UnknownOpcode { opcode, at }),
        })
    }
}
