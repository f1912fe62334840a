use tcg_core::MemOp;

use super::{GuestMemory, GuestSpace, MemOpIdx};
use crate::error::TbAbort;

/// Byte order of the guest's memory image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Unmanaged configuration: guest addresses are offsets from a fixed
/// guest base.
///
/// The guest's in-memory representation always uses the target byte
/// order, so every multi-byte access is converted to and from host
/// order here.
pub struct DirectMapped {
    pub space: GuestSpace,
    pub endian: Endian,
}

impl DirectMapped {
    pub fn new(space: GuestSpace, endian: Endian) -> Self {
        Self { space, endian }
    }

    fn check_align(addr: u64, op: MemOp, oi: MemOpIdx) -> Result<(), TbAbort> {
        let size = op.size_bytes();
        if (op.requires_align() || oi.memop().requires_align())
            && addr % size as u64 != 0
        {
            return Err(TbAbort::Unaligned { addr, size });
        }
        Ok(())
    }
}

impl GuestMemory for DirectMapped {
    fn load(&mut self, addr: u64, op: MemOp, oi: MemOpIdx) -> Result<u64, TbAbort> {
        Self::check_align(addr, op, oi)?;
        let n = op.size_bytes() as usize;
        let mut bytes = [0u8; 8];
        match self.endian {
            Endian::Little => {
                self.space.read(addr, &mut bytes[..n])?;
                Ok(op.extend(u64::from_le_bytes(bytes)))
            }
            Endian::Big => {
                self.space.read(addr, &mut bytes[8 - n..])?;
                Ok(op.extend(u64::from_be_bytes(bytes)))
            }
        }
    }

    fn store(
        &mut self,
        addr: u64,
        val: u64,
        op: MemOp,
        oi: MemOpIdx,
    ) -> Result<(), TbAbort> {
        Self::check_align(addr, op, oi)?;
        let n = op.size_bytes() as usize;
        match self.endian {
            Endian::Little => self.space.write(addr, &val.to_le_bytes()[..n]),
            Endian::Big => self.space.write(addr, &val.to_be_bytes()[8 - n..]),
        }
    }
}
