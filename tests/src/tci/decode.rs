use tcg_core::{Cond, MemOp, Type};
use tcg_tci::codec::Decoder;
use tcg_tci::disas::{disassemble, format_insn};
use tcg_tci::emit::Src;
use tcg_tci::insn::{decode_insn, decode_range, Operand};
use tcg_tci::opcode::{Arg, OPC_I64_BIT};
use tcg_tci::regs::{TCG_AREG0, TCG_CONST};
use tcg_tci::verify::{verify_block, verify_blocks};
use tcg_tci::{
    BytecodeError, CodeBuffer, DecodeConfig, Emitter, Host32, Host64, MemOpIdx, Opcode,
    RegisterFile, TargetLong,
};

use super::build;

const CFG64: DecodeConfig = DecodeConfig::new(64, TargetLong::Bits64);
const CFG32: DecodeConfig = DecodeConfig::new(32, TargetLong::Bits32);

#[test]
fn opcode_byte_round_trip() {
    assert_eq!(Opcode::Add.encode(Type::I64), Opcode::Add as u8 | OPC_I64_BIT);
    assert_eq!(Opcode::Add.encode(Type::I32), Opcode::Add as u8);
    assert_eq!(
        Opcode::decode(Opcode::Add.encode(Type::I64)),
        Some((Opcode::Add, Type::I64))
    );
    // Fixed-width ops ignore the requested type and reject the width bit.
    assert_eq!(Opcode::Ld32U.encode(Type::I64), Opcode::Ld32U as u8);
    assert_eq!(
        Opcode::decode(Opcode::Ld32U as u8),
        Some((Opcode::Ld32U, Type::I64))
    );
    assert_eq!(Opcode::decode(Opcode::Br as u8 | OPC_I64_BIT), None);
    assert_eq!(Opcode::decode(Opcode::Count as u8), None);
}

#[test]
fn opcode_numbers_are_dense() {
    for v in 0..Opcode::Count as u8 {
        let opc = Opcode::from_u8(v).unwrap();
        assert_eq!(opc as u8, v);
    }
    assert_eq!(Opcode::from_u8(Opcode::QemuSt64 as u8), Some(Opcode::QemuSt64));
    assert_eq!(Opcode::from_u8(Opcode::Count as u8), None);
    assert_eq!(Opcode::from_u8(0x7f), None);
}

#[test]
fn opcode_availability_by_host() {
    assert!(Opcode::Add.is_available(Type::I64, 64));
    assert!(!Opcode::Add.is_available(Type::I64, 32));
    assert!(Opcode::Add2I32.is_available(Type::I32, 32));
    assert!(!Opcode::Add2I32.is_available(Type::I32, 64));
    assert!(!Opcode::Bswap64.is_available(Type::I64, 32));
    assert!(Opcode::QemuLd64.is_available(Type::I32, 32));
    assert_eq!(Opcode::Sub.full_name(Type::I64), "sub_i64");
    assert_eq!(Opcode::GotoTb.full_name(Type::I32), "goto_tb");
    assert_eq!(Opcode::QemuLd16S.mem_op(), Some(MemOp::sw()));
    assert_eq!(Opcode::Add.mem_op(), None);
}

#[test]
fn fast_decoder_reads_reg_or_const() {
    let mut code = vec![3u8, TCG_CONST];
    code.extend_from_slice(&0x1234_5678u32.to_le_bytes());
    code.push(TCG_CONST);
    code.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
    code.push(TCG_CONST);
    code.extend_from_slice(&0xdead_beefu32.to_le_bytes());

    let mut regs = RegisterFile::<Host64>::new(0, 0);
    regs.write(tcg_tci::GeneralReg::new(3), 0xaaaa_bbbb_cccc_dddd);

    let mut dec = Decoder::new(&code, 0);
    assert_eq!(dec.read_ri32(&regs), 0xcccc_dddd);
    assert_eq!(dec.read_ri32(&regs), 0x1234_5678);
    assert_eq!(dec.read_ri64(&regs), 0x0102_0304_0506_0708);
    let mut regs32 = RegisterFile::<Host32>::new(0, 0);
    regs32.write(tcg_tci::GeneralReg::new(0), 1);
    assert_eq!(dec.read_rn(&regs32), 0xdead_beef);
    assert_eq!(dec.pos(), code.len());
}

#[test]
fn decode_block_operands() {
    let oi = MemOpIdx::new(MemOp::ul(), 2);
    let (code, start) = build::<Host64>(TargetLong::Bits64, |e| {
        e.gen_movi(Type::I64, 0, 0x1_0000_0000);
        e.gen_add(Type::I32, 1, 0, Src::Const(7));
        e.gen_ld(Type::I64, 2, TCG_AREG0, -8);
        e.gen_qemu_ld(Opcode::QemuLd32U, &[3], &[1], oi);
        e.gen_exit_tb(5);
    });
    let insns = decode_range(&code, start, code.len(), CFG64).unwrap();
    let names: Vec<_> = insns.iter().map(|i| i.name()).collect();
    assert_eq!(
        names,
        ["movi_i64", "add_i32", "ld_i64", "qemu_ld32u", "exit_tb"]
    );
    assert_eq!(insns[0].args, vec![(Arg::Out, Operand::Reg(0)), (Arg::Imm, Operand::Imm(0x1_0000_0000))]);
    assert_eq!(insns[1].args[2], (Arg::Ri, Operand::Const(7)));
    assert_eq!(insns[2].args[2], (Arg::Ofs, Operand::Offset(-8)));
    assert_eq!(insns[3].args[2], (Arg::MemIdx, Operand::MemIdx(oi)));
    for pair in insns.windows(2) {
        assert_eq!(pair[0].end(), pair[1].offset);
    }
    assert_eq!(insns[4].end(), code.len());
}

#[test]
fn decode_host32_pairs() {
    let oi = MemOpIdx::new(MemOp::uq(), 0);
    let (code, start) = build::<Host32>(TargetLong::Bits64, |e| {
        e.gen_qemu_ld(Opcode::QemuLd64, &[0, 1], &[2, 3], oi);
        e.gen_exit_tb(0);
    });
    let cfg = DecodeConfig::new(32, TargetLong::Bits64);
    let insn = decode_insn(&code, start, cfg).unwrap();
    assert_eq!(insn.args.len(), 5);
    assert_eq!(insn.args[1], (Arg::Out64, Operand::Reg(1)));
    assert_eq!(insn.args[3], (Arg::Addr, Operand::Reg(3)));
    assert_eq!(DecodeConfig::from_code(&code).unwrap(), cfg);
}

#[test]
fn disassembly_text() {
    let (code, start) = build::<Host64>(TargetLong::Bits64, |e| {
        let out = e.new_label();
        e.gen_movi(Type::I32, 0, 5);
        e.gen_add(Type::I32, 0, 0, Src::Const(7));
        e.gen_brcond(Type::I32, Cond::Gt, 0, Src::Const(0), out);
        e.gen_ld(Type::I64, 1, TCG_AREG0, -16);
        e.set_label(out);
        e.gen_exit_tb(0);
    });
    assert_eq!(start, 8);
    let text = disassemble(&code, start, code.len(), CFG64).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "0x0008: movi_i32 r0, $0x5");
    assert_eq!(lines[1], "0x000f: add_i32 r0, r0, $0x7");
    let exit_at = decode_range(&code, start, code.len(), CFG64).unwrap()[4].offset;
    assert_eq!(
        lines[2],
        format!("0x0018: brcond_i32 r0, $0x0, gt, @0x{exit_at:x}")
    );
    assert!(lines[3].ends_with("ld_i64 r1, r14, -0x10"));
    assert!(lines[4].ends_with("exit_tb $0x0"));
}

#[test]
fn disassembly_of_goto_tb() {
    let mut buf = CodeBuffer::new(4096, 64, TargetLong::Bits64);
    let mut e = Emitter::<Host64>::new(&mut buf, 0);
    e.gen_goto_tb(0);
    e.gen_exit_tb(0);
    let tb = e.finish();
    let insn = decode_insn(buf.as_slice(), tb.offset, CFG64).unwrap();
    assert_eq!(insn.goto_tb_target(), Some(insn.end() as i64));
    assert_eq!(format_insn(&insn), format!("goto_tb +0 (-> 0x{:x})", insn.end()));
}

#[test]
fn nop_padding_is_skipped() {
    let (code, start) = build::<Host64>(TargetLong::Bits64, |e| {
        e.gen_nop(6);
        e.gen_exit_tb(0);
    });
    let insns = decode_range(&code, start, code.len(), CFG64).unwrap();
    assert_eq!(insns[0].size, 8);
    assert_eq!(insns[1].opc, Opcode::ExitTb);
}

macro_rules! decode_error_cases {
    ($($name:ident: $cfg:expr, $bytes:expr => $err:expr;)*) => {
        $(
            #[test]
            fn $name() {
                let code: Vec<u8> = $bytes;
                assert_eq!(decode_insn(&code, 0, $cfg), Err($err));
            }
        )*
    };
}

decode_error_cases! {
    reject_unknown_opcode: CFG64, vec![0x7f, 2]
        => BytecodeError::UnknownOpcode { at: 0, byte: 0x7f };
    reject_truncated_immediate: CFG64, vec![Opcode::MovI as u8, 7, 0, 1]
        => BytecodeError::Truncated { at: 0 };
    reject_size_mismatch: CFG64, vec![Opcode::Mov as u8, 5, 0, 1]
        => BytecodeError::SizeMismatch {
            at: 0,
            name: "mov_i32".to_string(),
            declared: 5,
            actual: 4,
        };
    reject_register_out_of_range: CFG64, vec![Opcode::Mov as u8, 4, 16, 1]
        => BytecodeError::BadRegister { at: 0, reg: 16 };
    reject_always_condition: CFG64, vec![Opcode::SetCond as u8, 6, 0, 1, 2, Cond::Always as u8]
        => BytecodeError::BadCond { at: 0, val: 1 };
    reject_zero_label: CFG64, vec![Opcode::Br as u8, 10, 0, 0, 0, 0, 0, 0, 0, 0]
        => BytecodeError::ZeroLabel { at: 0 };
    reject_i64_op_on_32_bit_host: CFG32, vec![Opcode::Add as u8 | OPC_I64_BIT, 5, 0, 1, 2]
        => BytecodeError::Unsupported {
            at: 0,
            name: "add_i64".to_string(),
            bits: 32,
        };
    reject_pair_op_on_64_bit_host: CFG64, vec![Opcode::MulU2I32 as u8, 6, 0, 1, 2, 3]
        => BytecodeError::Unsupported {
            at: 0,
            name: "mulu2_i32".to_string(),
            bits: 64,
        };
}

#[test]
fn verify_accepts_well_formed_block() {
    let (code, start) = build::<Host64>(TargetLong::Bits64, |e| {
        let top = e.new_label();
        e.gen_movi(Type::I64, 0, 3);
        e.set_label(top);
        e.gen_sub(Type::I64, 0, 0, Src::Const(1));
        e.gen_brcond(Type::I64, Cond::Ne, 0, Src::Const(0), top);
        e.gen_goto_tb(0);
        e.gen_exit_tb(0);
    });
    verify_block(&code, start, code.len(), CFG64).unwrap();
}

#[test]
fn verify_rejects_fall_through() {
    let (code, start) = build::<Host64>(TargetLong::Bits64, |e| {
        e.gen_movi(Type::I64, 0, 3);
    });
    assert_eq!(
        verify_block(&code, start, code.len(), CFG64),
        Err(BytecodeError::FallsThrough { at: start })
    );
}

#[test]
fn verify_rejects_reserved_write() {
    let (code, start) = build::<Host64>(TargetLong::Bits64, |e| {
        e.gen_movi(Type::I64, TCG_AREG0, 0);
        e.gen_exit_tb(0);
    });
    assert_eq!(
        verify_block(&code, start, code.len(), CFG64),
        Err(BytecodeError::ReservedWrite {
            at: start,
            reg: TCG_AREG0
        })
    );
}

#[test]
fn verify_rejects_label_inside_instruction() {
    let (mut code, start) = build::<Host64>(TargetLong::Bits64, |e| {
        let out = e.new_label();
        e.gen_br(out);
        e.set_label(out);
        e.gen_exit_tb(0);
    });
    // Point the br one byte into exit_tb.
    let target = start as u64 + 11;
    code[start + 2..start + 10].copy_from_slice(&target.to_le_bytes());
    assert_eq!(
        verify_block(&code, start, code.len(), CFG64),
        Err(BytecodeError::BadTarget { at: start, target })
    );
}

#[test]
fn verify_goto_tb_may_enter_another_block() {
    let mut buf = CodeBuffer::new(4096, 64, TargetLong::Bits64);
    let mut e = Emitter::<Host64>::new(&mut buf, 0);
    e.gen_goto_tb(0);
    e.gen_exit_tb_chain(0);
    let a = e.finish();
    let mut e = Emitter::<Host64>::new(&mut buf, 1);
    e.gen_exit_tb_requested();
    let b = e.finish();

    let (jmp, _) = a.goto_tb[0].unwrap();
    buf.patch_goto_tb(jmp as usize, b.offset);
    let blocks = [(a.offset, a.offset + a.size), (b.offset, b.offset + b.size)];
    verify_blocks(buf.as_slice(), &blocks, CFG64).unwrap();

    // On its own, the first block now jumps out of bounds.
    assert!(matches!(
        verify_block(buf.as_slice(), a.offset, a.offset + a.size, CFG64),
        Err(BytecodeError::BadTarget { .. })
    ));
}
