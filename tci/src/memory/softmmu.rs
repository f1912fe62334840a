use tcg_core::MemOp;

use super::{GuestMemory, MemOpIdx};
use crate::error::TbAbort;

/// The soft-MMU helper contract.
///
/// Each helper translates `addr`, raises guest faults, and returns or
/// accepts the value in host order. Loads return the raw unsigned
/// value; [`SoftMmu`] applies sign extension.
pub trait SoftMmuHelpers {
    fn helper_ldb_mmu(&mut self, addr: u64, oi: MemOpIdx) -> Result<u8, TbAbort>;
    fn helper_ldw_mmu(&mut self, addr: u64, oi: MemOpIdx) -> Result<u16, TbAbort>;
    fn helper_ldl_mmu(&mut self, addr: u64, oi: MemOpIdx) -> Result<u32, TbAbort>;
    fn helper_ldq_mmu(&mut self, addr: u64, oi: MemOpIdx) -> Result<u64, TbAbort>;

    fn helper_stb_mmu(&mut self, addr: u64, val: u8, oi: MemOpIdx) -> Result<(), TbAbort>;
    fn helper_stw_mmu(&mut self, addr: u64, val: u16, oi: MemOpIdx) -> Result<(), TbAbort>;
    fn helper_stl_mmu(&mut self, addr: u64, val: u32, oi: MemOpIdx) -> Result<(), TbAbort>;
    fn helper_stq_mmu(&mut self, addr: u64, val: u64, oi: MemOpIdx) -> Result<(), TbAbort>;
}

/// Managed configuration: every access goes through the helpers.
#[derive(Debug, Default)]
pub struct SoftMmu<T> {
    pub helpers: T,
}

impl<T: SoftMmuHelpers> SoftMmu<T> {
    pub fn new(helpers: T) -> Self {
        Self { helpers }
    }
}

impl<T: SoftMmuHelpers> GuestMemory for SoftMmu<T> {
    fn load(&mut self, addr: u64, op: MemOp, oi: MemOpIdx) -> Result<u64, TbAbort> {
        let h = &mut self.helpers;
        let raw = match op.size() {
            MemOp::SIZE_8 => h.helper_ldb_mmu(addr, oi)? as u64,
            MemOp::SIZE_16 => h.helper_ldw_mmu(addr, oi)? as u64,
            MemOp::SIZE_32 => h.helper_ldl_mmu(addr, oi)? as u64,
            _ => h.helper_ldq_mmu(addr, oi)?,
        };
        Ok(op.extend(raw))
    }

    fn store(
        &mut self,
        addr: u64,
        val: u64,
        op: MemOp,
        oi: MemOpIdx,
    ) -> Result<(), TbAbort> {
        let h = &mut self.helpers;
        match op.size() {
            MemOp::SIZE_8 => h.helper_stb_mmu(addr, val as u8, oi),
            MemOp::SIZE_16 => h.helper_stw_mmu(addr, val as u16, oi),
            MemOp::SIZE_32 => h.helper_stl_mmu(addr, val as u32, oi),
            _ => h.helper_stq_mmu(addr, val, oi),
        }
    }
}
