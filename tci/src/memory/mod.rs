//! Memory access bridge: guest loads and stores issued by the
//! `qemu_ld*`/`qemu_st*` opcodes.
//!
//! Two configurations implement [`GuestMemory`]:
//!
//! - [`SoftMmu`] forwards every access, with its memory-op token, to a
//!   set of `helper_{ld,st}{b,w,l,q}_mmu` routines that own address
//!   translation, faults and byte order.
//! - [`DirectMapped`] resolves guest addresses as offsets into a
//!   [`GuestSpace`] and converts from the target's fixed byte order.

mod direct;
mod guest_space;
mod softmmu;

pub use direct::{DirectMapped, Endian};
pub use guest_space::{
    page_align_down, page_align_up, page_size, GuestSpace, Prot,
    GUEST_SPACE_SIZE,
};
pub use softmmu::{SoftMmu, SoftMmuHelpers};

use std::fmt;

use tcg_core::MemOp;

use crate::error::TbAbort;

/// Opaque per-access token carried in the bytecode: a [`MemOp`] and an
/// MMU index.
///
/// Maps to QEMU's `MemOpIdx`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOpIdx(u32);

impl MemOpIdx {
    pub const fn new(op: MemOp, mmu_idx: u32) -> Self {
        Self(((op.bits() as u32) << 4) | (mmu_idx & 0xf))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn memop(self) -> MemOp {
        MemOp::new((self.0 >> 4) as u16)
    }

    pub const fn mmu_idx(self) -> u32 {
        self.0 & 0xf
    }
}

impl fmt::Debug for MemOpIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemOpIdx({:#x}, mmu {})", self.0 >> 4, self.mmu_idx())
    }
}

/// Guest memory as seen by the interpreter.
///
/// `op` comes from the opcode and fixes size and signedness; `oi` is
/// the token the producer attached to the access. A fault abandons
/// the current block: the error is returned and never retried.
pub trait GuestMemory {
    /// Load `op.size_bytes()` bytes and return them sign- or
    /// zero-extended to 64 bits according to `op`.
    fn load(&mut self, addr: u64, op: MemOp, oi: MemOpIdx) -> Result<u64, TbAbort>;

    /// Store the low `op.size_bytes()` bytes of `val`.
    fn store(
        &mut self,
        addr: u64,
        val: u64,
        op: MemOp,
        oi: MemOpIdx,
    ) -> Result<(), TbAbort>;
}

impl<M: GuestMemory + ?Sized> GuestMemory for &mut M {
    fn load(&mut self, addr: u64, op: MemOp, oi: MemOpIdx) -> Result<u64, TbAbort> {
        (**self).load(addr, op, oi)
    }

    fn store(
        &mut self,
        addr: u64,
        val: u64,
        op: MemOp,
        oi: MemOpIdx,
    ) -> Result<(), TbAbort> {
        (**self).store(addr, val, op, oi)
    }
}
