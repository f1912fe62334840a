//! Host-word strategies.
//!
//! The interpreter's behaviour differs structurally between 32-bit and
//! 64-bit hosts: how 64-bit values occupy registers, how guest
//! addresses are assembled, which registers carry helper arguments and
//! which opcodes exist. Each difference is a member of [`HostWord`], so
//! the dispatch loop never branches on the host width itself.
//!
//! Both strategies are always compiled; [`NativeHost`] picks the one
//! matching the build target.

use std::fmt;

use crate::codec::Decoder;
use crate::config::TargetLong;
use crate::regs::{GeneralReg, RegisterFile};

/// Largest number of helper argument registers of any strategy.
pub const MAX_CALL_IARGS: usize = 10;

/// Combine two 32-bit halves, low part first.
#[inline]
pub const fn assemble64(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// Split a 64-bit value into `(lo, hi)`.
#[inline]
pub const fn split64(v: u64) -> (u32, u32) {
    (v as u32, (v >> 32) as u32)
}

pub trait HostWord: Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// Register width in bits.
    const BITS: u32;
    /// Registers read, in order, as helper arguments by `call`.
    const CALL_IARG_REGS: &'static [u8];
    /// Decoded destination of a 64-bit value.
    type Dest64: Copy + fmt::Debug;

    /// Reduce a value to what one register can hold.
    fn truncate(v: u64) -> u64;

    /// Read a 64-bit source operand.
    fn read_r64(dec: &mut Decoder<'_>, regs: &RegisterFile<Self>) -> u64;

    /// Decode a 64-bit destination operand.
    fn read_out64(dec: &mut Decoder<'_>) -> Self::Dest64;

    /// Store a 64-bit value into a decoded destination.
    fn write_r64(regs: &mut RegisterFile<Self>, dst: Self::Dest64, v: u64);

    /// Read a guest address operand.
    fn read_guest_addr(
        dec: &mut Decoder<'_>,
        regs: &RegisterFile<Self>,
        target_long: TargetLong,
    ) -> u64;

    /// Deliver a helper's 64-bit return value.
    fn set_call_result(regs: &mut RegisterFile<Self>, v: u64);

    /// Number of registers a guest address operand occupies.
    fn addr_regs(target_long: TargetLong) -> usize;

    /// Number of registers a 64-bit value occupies.
    fn r64_regs() -> usize {
        (64 / Self::BITS) as usize
    }
}

/// 64-bit host: one register per value, five helper argument registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Host64;

impl HostWord for Host64 {
    const BITS: u32 = 64;
    const CALL_IARG_REGS: &'static [u8] = &[0, 1, 2, 3, 5];
    type Dest64 = GeneralReg;

    #[inline]
    fn truncate(v: u64) -> u64 {
        v
    }

    #[inline]
    fn read_r64(dec: &mut Decoder<'_>, regs: &RegisterFile<Self>) -> u64 {
        regs.read(dec.read_reg())
    }

    #[inline]
    fn read_out64(dec: &mut Decoder<'_>) -> GeneralReg {
        dec.read_out()
    }

    #[inline]
    fn write_r64(regs: &mut RegisterFile<Self>, dst: GeneralReg, v: u64) {
        regs.write(dst, v);
    }

    #[inline]
    fn read_guest_addr(
        dec: &mut Decoder<'_>,
        regs: &RegisterFile<Self>,
        target_long: TargetLong,
    ) -> u64 {
        target_long.mask(regs.read(dec.read_reg()))
    }

    #[inline]
    fn set_call_result(regs: &mut RegisterFile<Self>, v: u64) {
        regs.write(GeneralReg::new(0), v);
    }

    fn addr_regs(_target_long: TargetLong) -> usize {
        1
    }
}

/// 32-bit host: 64-bit values live in low/high register pairs and
/// helpers take up to ten argument registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Host32;

impl HostWord for Host32 {
    const BITS: u32 = 32;
    const CALL_IARG_REGS: &'static [u8] = &[0, 1, 2, 3, 5, 6, 7, 8, 9, 10];
    type Dest64 = (GeneralReg, GeneralReg);

    #[inline]
    fn truncate(v: u64) -> u64 {
        v & 0xffff_ffff
    }

    #[inline]
    fn read_r64(dec: &mut Decoder<'_>, regs: &RegisterFile<Self>) -> u64 {
        let lo = regs.read32(dec.read_reg());
        let hi = regs.read32(dec.read_reg());
        assemble64(lo, hi)
    }

    #[inline]
    fn read_out64(dec: &mut Decoder<'_>) -> (GeneralReg, GeneralReg) {
        let lo = dec.read_out();
        let hi = dec.read_out();
        (lo, hi)
    }

    #[inline]
    fn write_r64(
        regs: &mut RegisterFile<Self>,
        (lo, hi): (GeneralReg, GeneralReg),
        v: u64,
    ) {
        let (l, h) = split64(v);
        regs.write32(lo, l);
        regs.write32(hi, h);
    }

    #[inline]
    fn read_guest_addr(
        dec: &mut Decoder<'_>,
        regs: &RegisterFile<Self>,
        target_long: TargetLong,
    ) -> u64 {
        match target_long {
            TargetLong::Bits32 => regs.read(dec.read_reg()),
            TargetLong::Bits64 => Self::read_r64(dec, regs),
        }
    }

    #[inline]
    fn set_call_result(regs: &mut RegisterFile<Self>, v: u64) {
        Self::write_r64(regs, (GeneralReg::new(0), GeneralReg::new(1)), v);
    }

    fn addr_regs(target_long: TargetLong) -> usize {
        match target_long {
            TargetLong::Bits32 => 1,
            TargetLong::Bits64 => 2,
        }
    }
}

/// Strategy matching the build target's pointer width.
#[cfg(target_pointer_width = "64")]
pub type NativeHost = Host64;

/// Strategy matching the build target's pointer width.
#[cfg(not(target_pointer_width = "64"))]
pub type NativeHost = Host32;
