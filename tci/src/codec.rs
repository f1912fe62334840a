//! Operand codec: the fast-path reader the dispatch loop uses.
//!
//! Reads are unchecked against the operand layout: the producer
//! guarantees well-formed instructions. Running off the end of the
//! buffer, a zero label, an out-of-range register or an unknown
//! condition are contract violations and panic.

use tcg_core::Cond;

use crate::host::HostWord;
use crate::regs::{GeneralReg, Reg, RegisterFile, TCG_CONST};

/// Cursor over a bytecode buffer.
pub struct Decoder<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(code: &'a [u8], pos: usize) -> Self {
        Self { code, pos }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn take<const N: usize>(&mut self) -> [u8; N] {
        let end = self.pos + N;
        let Some(bytes) = self.code.get(self.pos..end) else {
            panic!("tci: truncated bytecode at {:#x}", self.pos);
        };
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        out
    }

    #[inline]
    pub fn read_u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    #[inline]
    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    #[inline]
    pub fn read_i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    #[inline]
    pub fn read_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    /// Source register.
    #[inline]
    pub fn read_reg(&mut self) -> Reg {
        Reg::new(self.read_u8())
    }

    /// Destination register.
    #[inline]
    pub fn read_out(&mut self) -> GeneralReg {
        GeneralReg::new(self.read_u8())
    }

    /// Register-or-constant source with a 32-bit inline constant.
    #[inline]
    pub fn read_ri32<H: HostWord>(&mut self, regs: &RegisterFile<H>) -> u32 {
        match self.read_u8() {
            TCG_CONST => self.read_u32(),
            r => regs.read32(Reg::new(r)),
        }
    }

    /// Register-or-constant source with a 64-bit inline constant.
    #[inline]
    pub fn read_ri64<H: HostWord>(&mut self, regs: &RegisterFile<H>) -> u64 {
        match self.read_u8() {
            TCG_CONST => self.read_u64(),
            r => regs.read(Reg::new(r)),
        }
    }

    /// Host-native-width immediate.
    #[inline]
    pub fn read_native<H: HostWord>(&mut self) -> u64 {
        if H::BITS == 32 {
            self.read_u32() as u64
        } else {
            self.read_u64()
        }
    }

    /// Register-or-constant source with a native-width inline constant.
    #[inline]
    pub fn read_rn<H: HostWord>(&mut self, regs: &RegisterFile<H>) -> u64 {
        match self.read_u8() {
            TCG_CONST => self.read_native::<H>(),
            r => regs.read(Reg::new(r)),
        }
    }

    /// Absolute branch target. Zero is never a valid label.
    #[inline]
    pub fn read_label<H: HostWord>(&mut self) -> usize {
        let at = self.pos;
        let label = self.read_native::<H>();
        assert!(label != 0, "tci: zero label at {at:#x}");
        label as usize
    }

    /// One of the ten relational predicates.
    #[inline]
    pub fn read_cond(&mut self) -> Cond {
        let at = self.pos;
        let v = self.read_u8();
        match Cond::from_u8(v) {
            Some(c) if c != Cond::Never && c != Cond::Always => c,
            _ => panic!("tci: invalid condition {v} at {at:#x}"),
        }
    }
}
