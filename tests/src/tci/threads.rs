use std::thread;

use tcg_core::{Cond, MemOp, Type};
use tcg_tci::emit::Src;
use tcg_tci::regs::TCG_AREG0;
use tcg_tci::{Host64, MemOpIdx, Opcode, RegisterFile, TargetLong, Tci, TciConfig};

use super::{build, TestEnv};

/// Each thread sums 1..=n, with n read from its own CPU state, and
/// stores the total to its own guest memory.
#[test]
fn threads_share_one_code_buffer() {
    let oi = MemOpIdx::new(MemOp::uq(), 0);
    let (code, start) = build::<Host64>(TargetLong::Bits64, |e| {
        let top = e.new_label();
        let done = e.new_label();
        e.gen_ld(Type::I64, 0, TCG_AREG0, 0);
        e.gen_movi(Type::I64, 1, 0);
        e.gen_brcond(Type::I64, Cond::Eq, 0, Src::Const(0), done);
        e.set_label(top);
        e.gen_add(Type::I64, 1, 1, 0);
        e.gen_sub(Type::I64, 0, 0, Src::Const(1));
        e.gen_brcond(Type::I64, Cond::Ne, 0, Src::Const(0), top);
        e.set_label(done);
        e.gen_movi(Type::I64, 2, 0x80);
        e.gen_qemu_st(Opcode::QemuSt64, &[1], &[2], oi);
        e.gen_exit_tb(0);
    });
    let tci = Tci::<Host64>::new(TciConfig::new(TargetLong::Bits64));

    let results: Vec<(u64, u64)> = thread::scope(|s| {
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let code = &code;
                s.spawn(move || {
                    let n = 100 * t + 7;
                    let mut env = TestEnv::new();
                    env.set_state_u64(0, n);
                    let mut regs = RegisterFile::<Host64>::new(0, 0);
                    for _ in 0..50 {
                        tci.tb_exec_with(&mut env, &mut regs, code, start).unwrap();
                    }
                    let mut b = [0u8; 8];
                    b.copy_from_slice(&env.mem.helpers.bytes[0x80..0x88]);
                    (n, u64::from_le_bytes(b))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (n, sum) in results {
        assert_eq!(sum, n * (n + 1) / 2);
    }
}
