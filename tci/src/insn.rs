//! Checked instruction decoder.
//!
//! The slow-path counterpart of [`crate::codec`]: decodes one
//! instruction into an [`Insn`] and reports malformed input as a
//! [`BytecodeError`] instead of panicking. Used by the disassembler and
//! the validating pass, never by the dispatch loop.

use tcg_core::{Cond, Type};

use crate::code_buffer::{CodeBuffer, CODE_HEADER_SIZE};
use crate::config::TargetLong;
use crate::error::{BytecodeError, TciError};
use crate::memory::MemOpIdx;
use crate::opcode::{Arg, Opcode};
use crate::regs::{TCG_CONST, TCG_TARGET_NB_REGS};

/// A decoded operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(u8),
    /// Inline constant of a register-or-constant operand.
    Const(u64),
    /// Immediate (`movi`, `exit_tb`).
    Imm(u64),
    /// Host load/store offset.
    Offset(i32),
    Cond(Cond),
    Label(u64),
    /// `goto_tb` displacement, relative to the end of the field.
    Disp(i32),
    U8(u8),
    MemIdx(MemOpIdx),
}

/// One decoded instruction. Register pairs appear as two entries with
/// the same [`Arg`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    pub offset: usize,
    pub opc: Opcode,
    pub ty: Type,
    pub size: usize,
    pub args: Vec<(Arg, Operand)>,
}

impl Insn {
    /// Offset just past this instruction.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    pub fn name(&self) -> String {
        self.opc.full_name(self.ty)
    }

    /// Absolute target of a `goto_tb` (its displacement applied).
    pub fn goto_tb_target(&self) -> Option<i64> {
        self.args.iter().find_map(|&(_, op)| match op {
            Operand::Disp(d) => Some(self.end() as i64 + d as i64),
            _ => None,
        })
    }
}

/// Decoding parameters taken from the code buffer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeConfig {
    pub host_bits: u32,
    pub target_long: TargetLong,
}

impl DecodeConfig {
    pub const fn new(host_bits: u32, target_long: TargetLong) -> Self {
        Self {
            host_bits,
            target_long,
        }
    }

    /// Read the parameters from a code buffer header.
    pub fn from_code(code: &[u8]) -> Result<Self, TciError> {
        let header = code.get(..CODE_HEADER_SIZE).unwrap_or(code);
        let buf = CodeBuffer::from_bytes(header.to_vec())?;
        Ok(Self::new(buf.host_bits(), buf.target_long()))
    }
}

struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
    start: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], BytecodeError> {
        let bytes = self
            .code
            .get(self.pos..self.pos + N)
            .ok_or(BytecodeError::Truncated { at: self.start })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos += N;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, BytecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, BytecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> Result<u64, BytecodeError> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn sized(&mut self, bits: u32) -> Result<u64, BytecodeError> {
        if bits == 32 {
            Ok(self.u32()? as u64)
        } else {
            self.u64()
        }
    }

    fn reg(&mut self) -> Result<u8, BytecodeError> {
        let r = self.u8()?;
        if r as usize >= TCG_TARGET_NB_REGS {
            return Err(BytecodeError::BadRegister { at: self.start, reg: r });
        }
        Ok(r)
    }

    /// Register, or `TCG_CONST` followed by a `bits`-wide constant.
    fn reg_or_const(&mut self, bits: u32) -> Result<Operand, BytecodeError> {
        let r = self.u8()?;
        if r == TCG_CONST {
            return Ok(Operand::Const(self.sized(bits)?));
        }
        if r as usize >= TCG_TARGET_NB_REGS {
            return Err(BytecodeError::BadRegister { at: self.start, reg: r });
        }
        Ok(Operand::Reg(r))
    }
}

/// Decode the instruction at `at`.
pub fn decode_insn(
    code: &[u8],
    at: usize,
    cfg: DecodeConfig,
) -> Result<Insn, BytecodeError> {
    let mut rd = Reader {
        code,
        pos: at,
        start: at,
    };
    let byte = rd.u8()?;
    let declared = rd.u8()? as usize;
    let (opc, ty) =
        Opcode::decode(byte).ok_or(BytecodeError::UnknownOpcode { at, byte })?;
    if !opc.is_available(ty, cfg.host_bits) {
        return Err(BytecodeError::Unsupported {
            at,
            name: opc.full_name(ty),
            bits: cfg.host_bits,
        });
    }

    let r64_regs = if cfg.host_bits == 32 { 2 } else { 1 };
    let addr_regs = if cfg.host_bits == 32 && cfg.target_long == TargetLong::Bits64 {
        2
    } else {
        1
    };

    let mut args = Vec::with_capacity(opc.def().nb_args());
    for &arg in opc.def().args {
        match arg {
            Arg::Out | Arg::In | Arg::Base => args.push((arg, Operand::Reg(rd.reg()?))),
            Arg::Ri => args.push((arg, rd.reg_or_const(ty.size_bits())?)),
            Arg::Func => args.push((arg, rd.reg_or_const(cfg.host_bits)?)),
            Arg::Out64 | Arg::In64 => {
                for _ in 0..r64_regs {
                    args.push((arg, Operand::Reg(rd.reg()?)));
                }
            }
            Arg::Addr => {
                for _ in 0..addr_regs {
                    args.push((arg, Operand::Reg(rd.reg()?)));
                }
            }
            Arg::Ofs => args.push((arg, Operand::Offset(rd.u32()? as i32))),
            Arg::Imm => args.push((arg, Operand::Imm(rd.sized(ty.size_bits())?))),
            Arg::Native => args.push((arg, Operand::Imm(rd.sized(cfg.host_bits)?))),
            Arg::Cond => {
                let val = rd.u8()?;
                match Cond::from_u8(val) {
                    Some(c) if c != Cond::Never && c != Cond::Always => {
                        args.push((arg, Operand::Cond(c)))
                    }
                    _ => return Err(BytecodeError::BadCond { at, val }),
                }
            }
            Arg::Label => {
                let l = rd.sized(cfg.host_bits)?;
                if l == 0 {
                    return Err(BytecodeError::ZeroLabel { at });
                }
                args.push((arg, Operand::Label(l)));
            }
            Arg::Disp => args.push((arg, Operand::Disp(rd.u32()? as i32))),
            Arg::U8 => args.push((arg, Operand::U8(rd.u8()?))),
            Arg::MemIdx => args.push((arg, Operand::MemIdx(MemOpIdx::from_raw(rd.u32()?)))),
        }
    }

    let actual = rd.pos - at;
    let size = if opc == Opcode::Nop && declared >= actual {
        if at + declared > code.len() {
            return Err(BytecodeError::Truncated { at });
        }
        declared
    } else if declared != actual {
        return Err(BytecodeError::SizeMismatch {
            at,
            name: opc.full_name(ty),
            declared,
            actual,
        });
    } else {
        actual
    };

    Ok(Insn {
        offset: at,
        opc,
        ty,
        size,
        args,
    })
}

/// Decode every instruction in `code[start..end]`.
pub fn decode_range(
    code: &[u8],
    start: usize,
    end: usize,
    cfg: DecodeConfig,
) -> Result<Vec<Insn>, BytecodeError> {
    let mut out = Vec::new();
    let mut at = start;
    while at < end {
        let insn = decode_insn(code, at, cfg)?;
        at = insn.end();
        out.push(insn);
    }
    Ok(out)
}
