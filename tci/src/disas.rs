//! Bytecode disassembler: human-readable text for TCI instructions.
//!
//! Output looks like
//!
//! ```text
//! 0x0008: movi_i32 r0, $0x5
//! 0x000e: add_i32 r0, r0, $0x7
//! 0x0016: brcond_i32 r0, $0x0, gt, @0x2a
//! ```

use std::fmt::Write;

use crate::error::BytecodeError;
use crate::insn::{decode_insn, DecodeConfig, Insn, Operand};

fn fmt_operand(insn: &Insn, op: Operand, buf: &mut String) {
    // Writing into a String cannot fail.
    let _ = match op {
        Operand::Reg(r) => write!(buf, "r{r}"),
        Operand::Const(v) | Operand::Imm(v) => write!(buf, "$0x{v:x}"),
        Operand::Offset(o) if o < 0 => write!(buf, "-0x{:x}", o.unsigned_abs()),
        Operand::Offset(o) => write!(buf, "0x{o:x}"),
        Operand::Cond(c) => write!(buf, "{}", c.name()),
        Operand::Label(l) => write!(buf, "@0x{l:x}"),
        Operand::Disp(d) => {
            let target = insn.end() as i64 + d as i64;
            write!(buf, "{d:+} (-> 0x{target:x})")
        }
        Operand::U8(v) => write!(buf, "{v}"),
        Operand::MemIdx(oi) => write!(buf, "oi=0x{:x}", oi.raw()),
    };
}

/// Format one instruction without its offset.
pub fn format_insn(insn: &Insn) -> String {
    let mut buf = insn.name();
    for (i, &(_, op)) in insn.args.iter().enumerate() {
        buf.push_str(if i == 0 { " " } else { ", " });
        fmt_operand(insn, op, &mut buf);
    }
    buf
}

/// Disassemble `code[start..end]`, one instruction per line.
pub fn disassemble(
    code: &[u8],
    start: usize,
    end: usize,
    cfg: DecodeConfig,
) -> Result<String, BytecodeError> {
    let mut out = String::new();
    let mut at = start;
    while at < end {
        let insn = decode_insn(code, at, cfg)?;
        let _ = writeln!(out, "0x{at:04x}: {}", format_insn(&insn));
        at = insn.end();
    }
    Ok(out)
}
