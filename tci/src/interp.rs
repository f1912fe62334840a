//! Dispatch loop and execution entry point.

use std::marker::PhantomData;

use tcg_core::{MemOp, Type};
use tracing::{debug, trace};

use crate::alu::{IntWidth, W32, W64};
use crate::codec::Decoder;
use crate::cond::compare64;
use crate::config::TciConfig;
use crate::error::TbAbort;
use crate::host::{assemble64, split64, HostWord, NativeHost, MAX_CALL_IARGS};
use crate::memory::{GuestMemory, MemOpIdx};
use crate::opcode::Opcode;
use crate::regs::{Reg, RegisterFile};
use crate::window::{self, ENV_BASE, FRAME_BASE, TCG_FRAME_SIZE};

/// What the interpreter needs from the CPU it runs code for.
pub trait CpuEnv {
    type Mem: GuestMemory;

    /// CPU state bytes, addressed by host loads/stores through
    /// `TCG_AREG0`.
    fn state(&mut self) -> &mut [u8];

    /// Guest memory for `qemu_ld*`/`qemu_st*`.
    fn memory(&mut self) -> &mut Self::Mem;

    /// Run the helper behind `func` with the argument registers.
    fn call_helper(&mut self, func: u64, args: &[u64]) -> Result<u64, TbAbort>;
}

/// The Tiny Code Interpreter.
///
/// Stateless between calls: every [`Tci::tb_exec`] runs on its own
/// register file and TCG frame, so one instance may serve any number
/// of threads, each executing with its own `CpuEnv`.
#[derive(Debug, Clone, Copy)]
pub struct Tci<H: HostWord = NativeHost> {
    config: TciConfig,
    _host: PhantomData<H>,
}

impl<H: HostWord> Tci<H> {
    pub fn new(config: TciConfig) -> Self {
        Self {
            config,
            _host: PhantomData,
        }
    }

    pub fn config(&self) -> TciConfig {
        self.config
    }

    /// Execute the translation block at `tb_offset` in `code`.
    ///
    /// Returns the value of the `exit_tb` that ended execution, or the
    /// reason the block was abandoned.
    pub fn tb_exec<C: CpuEnv>(
        &self,
        env: &mut C,
        code: &[u8],
        tb_offset: usize,
    ) -> Result<u64, TbAbort> {
        let mut regs = RegisterFile::new(ENV_BASE, FRAME_BASE);
        self.tb_exec_with(env, &mut regs, code, tb_offset)
    }

    /// Like [`Tci::tb_exec`], but on a caller-provided register file.
    ///
    /// The reserved slots are re-seeded; the others keep their values
    /// and hold the final state on return.
    pub fn tb_exec_with<C: CpuEnv>(
        &self,
        env: &mut C,
        regs: &mut RegisterFile<H>,
        code: &[u8],
        tb_offset: usize,
    ) -> Result<u64, TbAbort> {
        regs.seed(ENV_BASE, FRAME_BASE);
        let mut frame = [0u8; TCG_FRAME_SIZE];
        trace!(tb_offset, "tci: enter tb");
        let ret = self.run(env, regs, &mut frame, code, tb_offset);
        match &ret {
            Ok(v) => trace!(tb_offset, exit = *v, "tci: exit tb"),
            Err(e) => debug!(tb_offset, reason = %e, "tci: tb abandoned"),
        }
        ret
    }

    fn run<C: CpuEnv>(
        &self,
        env: &mut C,
        regs: &mut RegisterFile<H>,
        frame: &mut [u8],
        code: &[u8],
        tb_offset: usize,
    ) -> Result<u64, TbAbort> {
        let mut dec = Decoder::new(code, tb_offset);

        loop {
            let start = dec.pos();
            let byte = dec.read_u8();
            let size = dec.read_u8() as usize;
            let Some((opc, ty)) = Opcode::decode(byte) else {
                panic!("tci: unknown opcode {byte:#04x} at {start:#x}");
            };
            if !opc.is_available(ty, H::BITS) {
                panic!(
                    "tci: {} is not available on a {}-bit host (at {start:#x})",
                    opc.full_name(ty),
                    H::BITS
                );
            }

            match opc {
                Opcode::End | Opcode::Discard => {}
                Opcode::Nop => dec.set_pos(start + size),

                // -- Control flow --
                Opcode::Call => {
                    let func = dec.read_rn(regs);
                    let nargs = H::CALL_IARG_REGS.len();
                    let mut args = [0u64; MAX_CALL_IARGS];
                    for (a, &r) in args.iter_mut().zip(H::CALL_IARG_REGS) {
                        *a = regs.read(Reg::new(r));
                    }
                    let ret = env.call_helper(func, &args[..nargs])?;
                    H::set_call_result(regs, ret);
                }
                Opcode::Br => {
                    let label = dec.read_label::<H>();
                    check_size(&dec, start, size, opc, ty);
                    dec.set_pos(label);
                    continue;
                }
                Opcode::BrCond => {
                    let taken = match ty {
                        Type::I32 => cond_operands::<W32, H>(&mut dec, regs),
                        Type::I64 => cond_operands::<W64, H>(&mut dec, regs),
                    };
                    let label = dec.read_label::<H>();
                    check_size(&dec, start, size, opc, ty);
                    if taken {
                        dec.set_pos(label);
                    }
                    continue;
                }
                Opcode::BrCond2I32 => {
                    let taken = cond2_operands(&mut dec, regs);
                    let label = dec.read_label::<H>();
                    check_size(&dec, start, size, opc, ty);
                    if taken {
                        dec.set_pos(label);
                    }
                    continue;
                }
                Opcode::SetCond2I32 => {
                    let d = dec.read_out();
                    let r = cond2_operands(&mut dec, regs);
                    regs.write32(d, r as u32);
                }
                Opcode::GotoTb => {
                    let disp = dec.read_i32();
                    check_size(&dec, start, size, opc, ty);
                    let target = dec.pos() as i64 + disp as i64;
                    dec.set_pos(target as usize);
                    continue;
                }
                Opcode::ExitTb => {
                    let val = dec.read_native::<H>();
                    check_size(&dec, start, size, opc, ty);
                    return Ok(val);
                }

                // -- Double-word arithmetic on register pairs --
                Opcode::Add2I32 | Opcode::Sub2I32 => {
                    let lo = dec.read_out();
                    let hi = dec.read_out();
                    let a = H::read_r64(&mut dec, regs);
                    let b = H::read_r64(&mut dec, regs);
                    let r = if opc == Opcode::Add2I32 {
                        a.wrapping_add(b)
                    } else {
                        a.wrapping_sub(b)
                    };
                    let (l, h) = split64(r);
                    regs.write32(lo, l);
                    regs.write32(hi, h);
                }
                Opcode::MulU2I32 => {
                    let lo = dec.read_out();
                    let hi = dec.read_out();
                    let a = regs.read32(dec.read_reg()) as u64;
                    let b = regs.read32(dec.read_reg()) as u64;
                    let (l, h) = split64(a * b);
                    regs.write32(lo, l);
                    regs.write32(hi, h);
                }

                // -- Guest memory --
                Opcode::QemuLd8U
                | Opcode::QemuLd8S
                | Opcode::QemuLd16U
                | Opcode::QemuLd16S
                | Opcode::QemuLd32U
                | Opcode::QemuLd32S => {
                    let d = dec.read_out();
                    let addr = H::read_guest_addr(&mut dec, regs, self.config.target_long);
                    let oi = MemOpIdx::from_raw(dec.read_u32());
                    let v = env.memory().load(addr, guest_mem_op(opc), oi)?;
                    regs.write(d, v);
                }
                Opcode::QemuLd64 => {
                    let d = H::read_out64(&mut dec);
                    let addr = H::read_guest_addr(&mut dec, regs, self.config.target_long);
                    let oi = MemOpIdx::from_raw(dec.read_u32());
                    let v = env.memory().load(addr, MemOp::uq(), oi)?;
                    H::write_r64(regs, d, v);
                }
                Opcode::QemuSt8 | Opcode::QemuSt16 | Opcode::QemuSt32 => {
                    let v = regs.read(dec.read_reg());
                    let addr = H::read_guest_addr(&mut dec, regs, self.config.target_long);
                    let oi = MemOpIdx::from_raw(dec.read_u32());
                    env.memory().store(addr, v, guest_mem_op(opc), oi)?;
                }
                Opcode::QemuSt64 => {
                    let v = H::read_r64(&mut dec, regs);
                    let addr = H::read_guest_addr(&mut dec, regs, self.config.target_long);
                    let oi = MemOpIdx::from_raw(dec.read_u32());
                    env.memory().store(addr, v, MemOp::uq(), oi)?;
                }

                Opcode::Count => {
                    panic!("tci: unknown opcode {byte:#04x} at {start:#x}")
                }

                // -- Typed integer ops --
                _ => match ty {
                    Type::I32 => exec_typed::<W32, H, C>(opc, &mut dec, regs, env, frame),
                    Type::I64 => exec_typed::<W64, H, C>(opc, &mut dec, regs, env, frame),
                },
            }

            check_size(&dec, start, size, opc, ty);
        }
    }
}

impl<H: HostWord> Default for Tci<H> {
    fn default() -> Self {
        Self::new(TciConfig::default())
    }
}

#[inline]
fn check_size(dec: &Decoder<'_>, start: usize, size: usize, opc: Opcode, ty: Type) {
    debug_assert_eq!(
        dec.pos() - start,
        size,
        "tci: {} at {start:#x} declares {size} bytes",
        opc.full_name(ty)
    );
}

fn guest_mem_op(opc: Opcode) -> MemOp {
    match opc.mem_op() {
        Some(op) => op,
        None => panic!("tci: {} is not a guest access", opc.def().name),
    }
}

/// Decode `a, b, cond` and evaluate the comparison at width `W`.
#[inline]
fn cond_operands<W: IntWidth, H: HostWord>(
    dec: &mut Decoder<'_>,
    regs: &RegisterFile<H>,
) -> bool {
    let a = W::read(regs, dec.read_reg());
    let b = W::read_ri(dec, regs);
    W::compare(a, b, dec.read_cond())
}

/// Decode `al, ah, bl, bh, cond` and compare the assembled pairs.
#[inline]
fn cond2_operands<H: HostWord>(dec: &mut Decoder<'_>, regs: &RegisterFile<H>) -> bool {
    let al = regs.read32(dec.read_reg());
    let ah = regs.read32(dec.read_reg());
    let bl = dec.read_ri32(regs);
    let bh = dec.read_ri32(regs);
    compare64(assemble64(al, ah), assemble64(bl, bh), dec.read_cond())
}

/// Execute one typed integer instruction at width `W`.
#[inline]
fn exec_typed<W: IntWidth, H: HostWord, C: CpuEnv>(
    opc: Opcode,
    dec: &mut Decoder<'_>,
    regs: &mut RegisterFile<H>,
    env: &mut C,
    frame: &mut [u8],
) {
    match opc {
        Opcode::Mov => {
            let d = dec.read_out();
            let v = W::read(regs, dec.read_reg());
            regs.write(d, v);
        }
        Opcode::MovI => {
            let d = dec.read_out();
            let v = if W::BITS == 32 {
                dec.read_u32() as u64
            } else {
                dec.read_u64()
            };
            regs.write(d, v);
        }
        Opcode::SetCond => {
            let d = dec.read_out();
            let r = cond_operands::<W, H>(dec, regs);
            regs.write(d, r as u64);
        }

        // -- Host memory --
        Opcode::Ld8U
        | Opcode::Ld8S
        | Opcode::Ld16U
        | Opcode::Ld16S
        | Opcode::Ld32U
        | Opcode::Ld32S
        | Opcode::Ld => {
            let d = dec.read_out();
            let addr = host_addr::<H>(dec, regs);
            let state = env.state();
            let v = match opc {
                Opcode::Ld8U => window::load::<1>(state, frame, addr)[0] as u64,
                Opcode::Ld8S => W::zext(window::load::<1>(state, frame, addr)[0] as i8 as u64),
                Opcode::Ld16U => u16::from_ne_bytes(window::load(state, frame, addr)) as u64,
                Opcode::Ld16S => {
                    W::zext(i16::from_ne_bytes(window::load(state, frame, addr)) as u64)
                }
                Opcode::Ld32U => u32::from_ne_bytes(window::load(state, frame, addr)) as u64,
                Opcode::Ld32S => i32::from_ne_bytes(window::load(state, frame, addr)) as u64,
                _ if W::BITS == 32 => {
                    u32::from_ne_bytes(window::load(state, frame, addr)) as u64
                }
                _ => u64::from_ne_bytes(window::load(state, frame, addr)),
            };
            regs.write(d, v);
        }
        Opcode::St8 | Opcode::St16 | Opcode::St32 | Opcode::St => {
            let v = regs.read(dec.read_reg());
            let addr = host_addr::<H>(dec, regs);
            let state = env.state();
            match opc {
                Opcode::St8 => window::store(state, frame, addr, &[v as u8]),
                Opcode::St16 => window::store(state, frame, addr, &(v as u16).to_ne_bytes()),
                Opcode::St32 => window::store(state, frame, addr, &(v as u32).to_ne_bytes()),
                _ if W::BITS == 32 => {
                    window::store(state, frame, addr, &(v as u32).to_ne_bytes())
                }
                _ => window::store(state, frame, addr, &v.to_ne_bytes()),
            }
        }

        // -- Arithmetic / logic --
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::DivS
        | Opcode::DivU
        | Opcode::RemS
        | Opcode::RemU
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Sar
        | Opcode::RotL
        | Opcode::RotR => {
            let d = dec.read_out();
            let a = W::read_ri(dec, regs);
            let b = W::read_ri(dec, regs);
            regs.write(d, W::binop(opc, a, b));
        }
        Opcode::Deposit => {
            let d = dec.read_out();
            let a = W::read(regs, dec.read_reg());
            let b = W::read(regs, dec.read_reg());
            let pos = dec.read_u8() as u32;
            let len = dec.read_u8() as u32;
            regs.write(d, W::deposit(a, b, pos, len));
        }
        Opcode::Not
        | Opcode::Neg
        | Opcode::Ext8S
        | Opcode::Ext8U
        | Opcode::Ext16S
        | Opcode::Ext16U
        | Opcode::Ext32S
        | Opcode::Ext32U
        | Opcode::ExtI32I64
        | Opcode::ExtUI32I64
        | Opcode::Bswap16
        | Opcode::Bswap32
        | Opcode::Bswap64 => {
            let d = dec.read_out();
            let a = W::read(regs, dec.read_reg());
            regs.write(d, W::unop(opc, a));
        }
        _ => panic!("tci: {} has no {}-bit form", opc.def().name, W::BITS),
    }
}

/// Decode `base, offset` into a host address.
#[inline]
fn host_addr<H: HostWord>(dec: &mut Decoder<'_>, regs: &RegisterFile<H>) -> u64 {
    let base = regs.read(dec.read_reg());
    let ofs = dec.read_i32();
    H::truncate(base.wrapping_add(ofs as i64 as u64))
}
