use tcg_core::{MemOp, Type};
use tcg_tci::memory::{page_size, DirectMapped, Endian, GuestSpace, Prot};
use tcg_tci::{
    CodeBuffer, CpuEnv, Emitter, GuestMemory, Host64, MemAccess, MemOpIdx, Opcode,
    RegisterFile, TargetLong, TbAbort, Tci, TciConfig,
};

use super::{exec64, exec_on, TestEnv};

#[test]
fn scenario_store_then_load() {
    let oi = MemOpIdx::new(MemOp::ul(), 0);
    let run = exec64(|e| {
        e.gen_movi(Type::I64, 0, 0x100);
        e.gen_movi(Type::I32, 1, 0xaabb_ccdd);
        e.gen_qemu_st(Opcode::QemuSt32, &[1], &[0], oi);
        e.gen_qemu_ld(Opcode::QemuLd32U, &[2], &[0], oi);
        e.gen_exit_tb(0);
    });
    assert_eq!(run.r(2), 0xaabb_ccdd);
    assert_eq!(run.env.mem.helpers.bytes[0x100..0x104], [0xdd, 0xcc, 0xbb, 0xaa]);
    assert_eq!(
        run.env.mem.helpers.log,
        vec![(true, 0x100, oi.raw()), (false, 0x100, oi.raw())]
    );
}

#[test]
fn signed_loads_extend_to_host_word() {
    let mut env = TestEnv::new();
    env.mem.helpers.bytes[0x20..0x28]
        .copy_from_slice(&0x8000_0000_8000_8080u64.to_le_bytes());
    let oi = MemOpIdx::new(MemOp::ub(), 3);
    let run = exec_on::<Host64>(env, TargetLong::Bits64, |e| {
        e.gen_movi(Type::I64, 0, 0x20);
        e.gen_qemu_ld(Opcode::QemuLd8U, &[1], &[0], oi);
        e.gen_qemu_ld(Opcode::QemuLd8S, &[2], &[0], oi);
        e.gen_qemu_ld(Opcode::QemuLd16U, &[3], &[0], oi);
        e.gen_qemu_ld(Opcode::QemuLd16S, &[5], &[0], oi);
        e.gen_qemu_ld(Opcode::QemuLd32S, &[6], &[0], oi);
        e.gen_qemu_ld(Opcode::QemuLd64, &[7], &[0], oi);
        e.gen_exit_tb(0);
    });
    assert_eq!(run.r(1), 0x80);
    assert_eq!(run.r(2), 0xffff_ffff_ffff_ff80);
    assert_eq!(run.r(3), 0x8080);
    assert_eq!(run.r(5), 0xffff_ffff_ffff_8080);
    assert_eq!(run.r(6), 0xffff_ffff_8000_8080);
    assert_eq!(run.r(7), 0x8000_0000_8000_8080);
}

#[test]
fn narrow_stores_write_low_bytes() {
    let oi = MemOpIdx::new(MemOp::ub(), 0);
    let run = exec64(|e| {
        e.gen_movi(Type::I64, 0, 0x200);
        e.gen_movi(Type::I64, 1, 0x1122_3344_5566_7788);
        e.gen_qemu_st(Opcode::QemuSt8, &[1], &[0], oi);
        e.gen_movi(Type::I64, 0, 0x210);
        e.gen_qemu_st(Opcode::QemuSt16, &[1], &[0], oi);
        e.gen_movi(Type::I64, 0, 0x220);
        e.gen_qemu_st(Opcode::QemuSt64, &[1], &[0], oi);
        e.gen_exit_tb(0);
    });
    let mem = &run.env.mem.helpers.bytes;
    assert_eq!(mem[0x200..0x202], [0x88, 0x00]);
    assert_eq!(mem[0x210..0x213], [0x88, 0x77, 0x00]);
    assert_eq!(mem[0x220..0x228], 0x1122_3344_5566_7788u64.to_le_bytes());
}

#[test]
fn fault_abandons_block() {
    let oi = MemOpIdx::new(MemOp::ul(), 0);
    let run = exec64(|e| {
        e.gen_movi(Type::I64, 0, 0x10_0000);
        e.gen_movi(Type::I64, 1, 5);
        e.gen_qemu_st(Opcode::QemuSt32, &[1], &[0], oi);
        e.gen_movi(Type::I64, 2, 1);
        e.gen_exit_tb(0);
    });
    assert_eq!(
        run.exit,
        Err(TbAbort::MemFault {
            addr: 0x10_0000,
            access: MemAccess::Write
        })
    );
    assert_eq!(run.r(1), 5);
    assert_eq!(run.r(2), 0);
}

#[test]
fn narrow_guest_addresses_are_masked() {
    let mut env = TestEnv::new();
    env.mem.helpers.bytes[0x30] = 0x5a;
    let oi = MemOpIdx::new(MemOp::ub(), 0);
    let run = exec_on::<Host64>(env, TargetLong::Bits32, |e| {
        e.gen_movi(Type::I64, 0, 0xffff_ffff_0000_0030);
        e.gen_qemu_ld(Opcode::QemuLd8U, &[1], &[0], oi);
        e.gen_exit_tb(0);
    });
    assert_eq!(run.r(1), 0x5a);
    assert_eq!(run.env.mem.helpers.log[0].1, 0x30);
}

#[test]
fn memop_index_packing() {
    let oi = MemOpIdx::new(MemOp::sw().with_align(), 5);
    assert_eq!(oi.mmu_idx(), 5);
    assert_eq!(oi.memop(), MemOp::sw().with_align());
    assert!(oi.memop().requires_align());
    assert_eq!(MemOpIdx::from_raw(oi.raw()), oi);
}

/// CPU whose guest memory is a directly mapped guest space.
struct DirectEnv {
    state: Vec<u8>,
    mem: DirectMapped,
}

impl DirectEnv {
    fn new(endian: Endian) -> Self {
        let ps = page_size();
        let mut space = GuestSpace::with_size(4 * ps).unwrap();
        space.mmap_fixed(0, ps, Prot::RW).unwrap();
        space.mmap_fixed(ps as u64, ps, Prot::READ).unwrap();
        Self {
            state: vec![0; 64],
            mem: DirectMapped::new(space, endian),
        }
    }
}

impl CpuEnv for DirectEnv {
    type Mem = DirectMapped;

    fn state(&mut self) -> &mut [u8] {
        &mut self.state
    }

    fn memory(&mut self) -> &mut DirectMapped {
        &mut self.mem
    }

    fn call_helper(&mut self, func: u64, _args: &[u64]) -> Result<u64, TbAbort> {
        panic!("no helpers registered (token {func:#x})")
    }
}

fn run_direct(
    env: &mut DirectEnv,
    f: impl FnOnce(&mut Emitter<'_, Host64>),
) -> (RegisterFile<Host64>, Result<u64, TbAbort>) {
    let mut buf = CodeBuffer::new(4096, 64, TargetLong::Bits64);
    let mut e = Emitter::<Host64>::new(&mut buf, 0);
    f(&mut e);
    let tb = e.finish();
    let tci = Tci::<Host64>::new(TciConfig::new(TargetLong::Bits64));
    let mut regs = RegisterFile::new(0, 0);
    let exit = tci.tb_exec_with(env, &mut regs, buf.as_slice(), tb.offset);
    (regs, exit)
}

fn reg(regs: &RegisterFile<Host64>, idx: u8) -> u64 {
    regs.read(tcg_tci::Reg::new(idx))
}

#[test]
fn direct_mapped_target_byte_order() {
    for (endian, expect) in [
        (Endian::Little, 0x1122_3344u32.to_le_bytes()),
        (Endian::Big, 0x1122_3344u32.to_be_bytes()),
    ] {
        let mut env = DirectEnv::new(endian);
        let oi = MemOpIdx::new(MemOp::ul(), 0);
        let (regs, exit) = run_direct(&mut env, |e| {
            e.gen_movi(Type::I64, 0, 0x40);
            e.gen_movi(Type::I64, 1, 0x1122_3344);
            e.gen_qemu_st(Opcode::QemuSt32, &[1], &[0], oi);
            e.gen_qemu_ld(Opcode::QemuLd32U, &[2], &[0], oi);
            e.gen_qemu_ld(Opcode::QemuLd8U, &[3], &[0], oi);
            e.gen_exit_tb(0);
        });
        exit.unwrap();
        assert_eq!(reg(&regs, 2), 0x1122_3344);
        assert_eq!(reg(&regs, 3), expect[0] as u64);
        let mut raw = [0u8; 4];
        env.mem.space.read(0x40, &mut raw).unwrap();
        assert_eq!(raw, expect);
    }
}

#[test]
fn direct_mapped_big_endian_signed_load() {
    let mut env = DirectEnv::new(Endian::Big);
    env.mem.space.write(0x10, &[0xff, 0xfe]).unwrap();
    let oi = MemOpIdx::new(MemOp::sw(), 0);
    let (regs, exit) = run_direct(&mut env, |e| {
        e.gen_movi(Type::I64, 0, 0x10);
        e.gen_qemu_ld(Opcode::QemuLd16S, &[1], &[0], oi);
        e.gen_exit_tb(0);
    });
    exit.unwrap();
    assert_eq!(reg(&regs, 1), (-2i64) as u64);
}

#[test]
fn direct_mapped_faults() {
    let ps = page_size() as u64;
    let oi = MemOpIdx::new(MemOp::ub(), 0);

    let mut env = DirectEnv::new(Endian::Little);
    let (_, exit) = run_direct(&mut env, |e| {
        e.gen_movi(Type::I64, 0, 3 * ps);
        e.gen_qemu_ld(Opcode::QemuLd8U, &[1], &[0], oi);
        e.gen_exit_tb(0);
    });
    assert_eq!(
        exit,
        Err(TbAbort::MemFault {
            addr: 3 * ps,
            access: MemAccess::Read
        })
    );

    // The second page is read-only.
    let (regs, exit) = run_direct(&mut env, |e| {
        e.gen_movi(Type::I64, 0, ps);
        e.gen_qemu_ld(Opcode::QemuLd8U, &[1], &[0], oi);
        e.gen_qemu_st(Opcode::QemuSt8, &[1], &[0], oi);
        e.gen_exit_tb(0);
    });
    assert_eq!(reg(&regs, 1), 0);
    assert_eq!(
        exit,
        Err(TbAbort::MemFault {
            addr: ps,
            access: MemAccess::Write
        })
    );

    // A word straddling the end of the readable range.
    let (_, exit) = run_direct(&mut env, |e| {
        e.gen_movi(Type::I64, 0, 2 * ps - 2);
        e.gen_qemu_ld(Opcode::QemuLd32U, &[1], &[0], oi);
        e.gen_exit_tb(0);
    });
    assert!(matches!(exit, Err(TbAbort::MemFault { .. })));
}

#[test]
fn direct_mapped_alignment_from_token() {
    let mut env = DirectEnv::new(Endian::Little);
    let aligned = MemOpIdx::new(MemOp::ul().with_align(), 0);
    let (_, exit) = run_direct(&mut env, |e| {
        e.gen_movi(Type::I64, 0, 0x42);
        e.gen_qemu_ld(Opcode::QemuLd32U, &[1], &[0], aligned);
        e.gen_exit_tb(0);
    });
    assert_eq!(exit, Err(TbAbort::Unaligned { addr: 0x42, size: 4 }));

    // Without the alignment bit the same access succeeds.
    let plain = MemOpIdx::new(MemOp::ul(), 0);
    let (_, exit) = run_direct(&mut env, |e| {
        e.gen_movi(Type::I64, 0, 0x42);
        e.gen_qemu_ld(Opcode::QemuLd32U, &[1], &[0], plain);
        e.gen_exit_tb(0);
    });
    assert_eq!(exit, Ok(0));
}

#[test]
fn guest_memory_trait_direct_use() {
    let mut env = DirectEnv::new(Endian::Big);
    let oi = MemOpIdx::new(MemOp::uq(), 0);
    let mem = env.memory();
    mem.store(0x80, 0x0102_0304_0506_0708, MemOp::uq(), oi).unwrap();
    assert_eq!(mem.load(0x80, MemOp::ub(), oi), Ok(0x01));
    assert_eq!(mem.load(0x87, MemOp::ub(), oi), Ok(0x08));
    assert_eq!(mem.load(0x80, MemOp::uq(), oi), Ok(0x0102_0304_0506_0708));
}

#[test]
fn guest_space_protection_changes() {
    let ps = page_size();
    let mut space = GuestSpace::with_size(2 * ps).unwrap();
    assert!(!space.is_mapped(0, 1, Prot::READ));
    space.mmap_fixed(0, ps, Prot::RW).unwrap();
    space.write(0, &[7]).unwrap();
    space.mprotect(0, ps, Prot::READ).unwrap();
    assert!(space.write(0, &[8]).is_err());
    let mut b = [0u8; 1];
    space.read(0, &mut b).unwrap();
    assert_eq!(b, [7]);
    space.munmap(0, ps).unwrap();
    assert!(space.read(0, &mut b).is_err());
    // Unaligned or out-of-range requests are host errors.
    assert!(space.mmap_fixed(1, ps, Prot::RW).is_err());
    assert!(space.mmap_fixed(0, 4 * ps, Prot::RW).is_err());
}
