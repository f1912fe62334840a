use tcg_core::{Cond, MemOp, Type};
use tcg_tci::emit::Src;
use tcg_tci::host::{assemble64, split64};
use tcg_tci::regs::{TCG_AREG0, TCG_REG_CALL_STACK};
use tcg_tci::{Host32, MemOpIdx, Opcode, TargetLong};

use super::{exec32, exec_on, TestEnv};

#[test]
fn assemble_split_round_trip() {
    for v in [0u64, 1, u64::MAX, 0x8000_0000, 0x1_0000_0000, 0xdead_beef_cafe_f00d] {
        let (lo, hi) = split64(v);
        assert_eq!(assemble64(lo, hi), v);
        assert_eq!(assemble64(lo, hi), ((hi as u64) << 32) | lo as u64);
        assert_eq!(split64(assemble64(lo, hi)), (lo, hi));
    }
}

#[test]
fn add2_carries_into_high_word() {
    let run = exec32(|e| {
        e.gen_movi(Type::I32, 0, 0xffff_ffff);
        e.gen_movi(Type::I32, 1, 0);
        e.gen_movi(Type::I32, 2, 1);
        e.gen_movi(Type::I32, 3, 0);
        e.gen_add2_i32(5, 6, 0, 1, 2, 3);
        e.gen_sub2_i32(7, 8, 5, 6, 2, 3);
        e.gen_exit_tb(0);
    });
    assert_eq!((run.r(5), run.r(6)), (0, 1));
    assert_eq!((run.r(7), run.r(8)), (0xffff_ffff, 0));
}

#[test]
fn sub2_borrows() {
    let run = exec32(|e| {
        e.gen_movi(Type::I32, 0, 0);
        e.gen_movi(Type::I32, 1, 0);
        e.gen_movi(Type::I32, 2, 1);
        e.gen_movi(Type::I32, 3, 0);
        e.gen_sub2_i32(5, 6, 0, 1, 2, 3);
        e.gen_exit_tb(0);
    });
    assert_eq!((run.r(5), run.r(6)), (0xffff_ffff, 0xffff_ffff));
}

#[test]
fn mulu2_full_product() {
    let run = exec32(|e| {
        e.gen_movi(Type::I32, 0, 0xffff_ffff);
        e.gen_movi(Type::I32, 1, 0xffff_ffff);
        e.gen_mulu2_i32(2, 3, 0, 1);
        e.gen_exit_tb(0);
    });
    let (lo, hi) = split64(0xffff_ffffu64 * 0xffff_ffff);
    assert_eq!((run.r(2), run.r(3)), (lo as u64, hi as u64));
}

#[test]
fn setcond2_and_brcond2_compare_pairs() {
    let run = exec32(|e| {
        let taken = e.new_label();
        // (hi=1, lo=0) vs (hi=0, lo=0xffffffff)
        e.gen_movi(Type::I32, 0, 0);
        e.gen_movi(Type::I32, 1, 1);
        e.gen_setcond2_i32(Cond::Gtu, 2, 0, 1, Src::Const(0xffff_ffff), Src::Const(0));
        e.gen_setcond2_i32(Cond::Lt, 3, 0, 1, Src::Const(0xffff_ffff), Src::Const(0));
        e.gen_movi(Type::I32, 5, 0xffff_ffff);
        e.gen_setcond2_i32(Cond::Lt, 6, 5, 5, Src::Const(0), Src::Const(0));
        e.gen_brcond2_i32(Cond::Eq, 0, 1, Src::Const(0), Src::Const(1), taken);
        e.gen_movi(Type::I32, 7, 0xbad);
        e.set_label(taken);
        e.gen_exit_tb(0);
    });
    assert_eq!(run.r(2), 1);
    assert_eq!(run.r(3), 0);
    // -1 < 0 when the pair is read as signed 64 bits.
    assert_eq!(run.r(6), 1);
    assert_eq!(run.r(7), 0);
}

#[test]
fn writes_truncate_to_host_word() {
    let run = exec32(|e| {
        e.gen_movi(Type::I32, 0, 0x8000_0000);
        e.gen_add(Type::I32, 1, 0, 0);
        e.gen_unop(Opcode::Ext16S, Type::I32, 2, 0);
        e.gen_exit_tb(u64::MAX);
    });
    assert_eq!(run.r(1), 0);
    assert_eq!(run.r(2), 0);
    // exit_tb carries a native-width (32-bit) immediate.
    assert_eq!(run.exit_value(), 0xffff_ffff);
}

#[test]
fn window_access_on_32_bit_host() {
    let mut env = TestEnv::new();
    env.state[4..8].copy_from_slice(&0x1234_5678u32.to_ne_bytes());
    let run = exec_on::<Host32>(env, TargetLong::Bits32, |e| {
        e.gen_ld(Type::I32, 0, TCG_AREG0, 4);
        e.gen_st(Type::I32, 0, TCG_REG_CALL_STACK, 0);
        e.gen_ld(Type::I32, 1, TCG_REG_CALL_STACK, 0);
        e.gen_st16(Type::I32, 1, TCG_AREG0, 12);
        e.gen_exit_tb(0);
    });
    assert_eq!(run.r(0), 0x1234_5678);
    assert_eq!(run.r(1), 0x1234_5678);
    assert_eq!(run.env.state[12..14], 0x5678u16.to_ne_bytes());
}

#[test]
fn qemu_ld64_into_register_pair() {
    let mut env = TestEnv::new();
    env.mem.helpers.bytes[0x40..0x48].copy_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
    let oi = MemOpIdx::new(MemOp::uq(), 1);
    let run = exec_on::<Host32>(env, TargetLong::Bits32, |e| {
        e.gen_movi(Type::I32, 0, 0x40);
        e.gen_qemu_ld(Opcode::QemuLd64, &[1, 2], &[0], oi);
        e.gen_qemu_st(Opcode::QemuSt64, &[2, 1], &[0], oi);
        e.gen_exit_tb(0);
    });
    assert_eq!(run.r(1), 0x0506_0708);
    assert_eq!(run.r(2), 0x0102_0304);
    // Stored back with the halves swapped.
    assert_eq!(
        run.env.mem.helpers.bytes[0x40..0x48],
        0x0506_0708_0102_0304u64.to_le_bytes()
    );
}

#[test]
fn guest_address_pair_for_64_bit_guest() {
    let mut env = TestEnv::new();
    env.mem.helpers.bytes[0x10] = 0x9c;
    let oi = MemOpIdx::new(MemOp::sb(), 0);
    let run = exec_on::<Host32>(env, TargetLong::Bits64, |e| {
        e.gen_movi(Type::I32, 0, 0x10);
        e.gen_movi(Type::I32, 1, 0);
        e.gen_qemu_ld(Opcode::QemuLd8S, &[2], &[0, 1], oi);
        e.gen_movi(Type::I32, 1, 1);
        e.gen_qemu_ld(Opcode::QemuLd8U, &[3], &[0, 1], oi);
        e.gen_exit_tb(0);
    });
    // Signed loads fill the host word.
    assert_eq!(run.r(2), 0xffff_ff9c);
    // hi:lo = 0x1_0000_0010 lies outside the flat memory.
    assert!(matches!(
        run.exit,
        Err(tcg_tci::TbAbort::MemFault { addr: 0x1_0000_0010, .. })
    ));
    assert_eq!(run.env.mem.helpers.log.len(), 2);
}
