//! Validating pass over finished translation blocks.
//!
//! The dispatch loop trusts its input. This pass, compiled in with the
//! `verify` feature, walks a block once after it has been generated and
//! checks everything the loop assumes: opcode availability, operand
//! shapes and size bytes, register ranges, that no instruction writes a
//! reserved register, valid conditions, and that every label and
//! `goto_tb` lands on an instruction boundary.

use std::collections::HashSet;

use crate::error::BytecodeError;
use crate::insn::{decode_range, DecodeConfig, Insn, Operand};
use crate::opcode::{Arg, Opcode};
use crate::regs::is_reserved;

/// Verify the single block `code[start..end]`.
pub fn verify_block(
    code: &[u8],
    start: usize,
    end: usize,
    cfg: DecodeConfig,
) -> Result<(), BytecodeError> {
    verify_blocks(code, &[(start, end)], cfg)
}

/// Verify several blocks of one buffer.
///
/// Labels must stay inside their own block; a `goto_tb` may also land
/// on the start of any listed block, which is what chaining produces.
pub fn verify_blocks(
    code: &[u8],
    blocks: &[(usize, usize)],
    cfg: DecodeConfig,
) -> Result<(), BytecodeError> {
    let mut decoded = Vec::with_capacity(blocks.len());
    for &(start, end) in blocks {
        let insns = decode_range(code, start, end, cfg)?;
        decoded.push(insns);
    }
    let entries: HashSet<usize> = blocks.iter().map(|&(s, _)| s).collect();

    for insns in &decoded {
        let bounds: HashSet<usize> = insns.iter().map(|i| i.offset).collect();
        for insn in insns {
            check_outputs(insn)?;
            check_targets(insn, &bounds, &entries)?;
        }
        if let Some(last) = insns.last() {
            if !matches!(last.opc, Opcode::ExitTb | Opcode::Br) {
                return Err(BytecodeError::FallsThrough { at: last.offset });
            }
        }
    }
    Ok(())
}

fn check_outputs(insn: &Insn) -> Result<(), BytecodeError> {
    for &(arg, op) in &insn.args {
        if let (Arg::Out | Arg::Out64, Operand::Reg(r)) = (arg, op) {
            if is_reserved(r) {
                return Err(BytecodeError::ReservedWrite {
                    at: insn.offset,
                    reg: r,
                });
            }
        }
    }
    Ok(())
}

fn check_targets(
    insn: &Insn,
    bounds: &HashSet<usize>,
    entries: &HashSet<usize>,
) -> Result<(), BytecodeError> {
    for &(_, op) in &insn.args {
        match op {
            Operand::Label(l) if !bounds.contains(&(l as usize)) => {
                return Err(BytecodeError::BadTarget {
                    at: insn.offset,
                    target: l,
                });
            }
            Operand::Disp(_) => {
                let target = insn.goto_tb_target().unwrap_or(-1);
                let ok = target >= 0
                    && (bounds.contains(&(target as usize))
                        || entries.contains(&(target as usize)));
                if !ok {
                    return Err(BytecodeError::BadTarget {
                        at: insn.offset,
                        target: target as u64,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}
