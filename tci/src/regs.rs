use std::fmt;
use std::marker::PhantomData;

use crate::host::HostWord;

/// Number of interpreter registers.
pub const TCG_TARGET_NB_REGS: usize = 16;

/// Register holding the CPU environment pointer.
pub const TCG_AREG0: u8 = 14;

/// Register holding the TCG frame (call stack) pointer.
pub const TCG_REG_CALL_STACK: u8 = 4;

/// Register byte announcing an inline constant instead of a register.
pub const TCG_CONST: u8 = 0xff;

/// Whether `idx` names one of the two slots seeded by the entry point.
pub const fn is_reserved(idx: u8) -> bool {
    idx == TCG_AREG0 || idx == TCG_REG_CALL_STACK
}

/// A register that may be read: any of the 16 slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(u8);

impl Reg {
    pub const ENV: Reg = Reg(TCG_AREG0);
    pub const CALL_STACK: Reg = Reg(TCG_REG_CALL_STACK);

    pub fn new(idx: u8) -> Self {
        assert!(
            (idx as usize) < TCG_TARGET_NB_REGS,
            "tci: register r{idx} out of range"
        );
        Self(idx)
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A register an opcode handler may write.
///
/// Cannot name `TCG_AREG0` or `TCG_REG_CALL_STACK`: only the entry
/// point seeds those two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeneralReg(u8);

impl GeneralReg {
    pub fn new(idx: u8) -> Self {
        let reg = Reg::new(idx);
        assert!(!is_reserved(idx), "tci: write to reserved register r{idx}");
        Self(reg.0)
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    pub const fn as_reg(self) -> Reg {
        Reg(self.0)
    }
}

/// The interpreter's register file.
///
/// Slots are stored as `u64` and every write is truncated to the host
/// word, so a `Host32` file never holds bits above 31.
pub struct RegisterFile<H: HostWord> {
    regs: [u64; TCG_TARGET_NB_REGS],
    _host: PhantomData<H>,
}

impl<H: HostWord> RegisterFile<H> {
    /// Create a zeroed file with the reserved slots seeded.
    pub fn new(env: u64, call_stack: u64) -> Self {
        let mut file = Self {
            regs: [0; TCG_TARGET_NB_REGS],
            _host: PhantomData,
        };
        file.seed(env, call_stack);
        file
    }

    /// Re-seed the reserved slots, leaving the others untouched.
    pub fn seed(&mut self, env: u64, call_stack: u64) {
        self.regs[TCG_AREG0 as usize] = H::truncate(env);
        self.regs[TCG_REG_CALL_STACK as usize] = H::truncate(call_stack);
    }

    #[inline]
    pub fn read(&self, r: Reg) -> u64 {
        self.regs[r.0 as usize]
    }

    #[inline]
    pub fn read32(&self, r: Reg) -> u32 {
        self.regs[r.0 as usize] as u32
    }

    #[inline]
    pub fn write(&mut self, r: GeneralReg, val: u64) {
        self.regs[r.0 as usize] = H::truncate(val);
    }

    /// Store a 32-bit result, zero-extended into the slot.
    #[inline]
    pub fn write32(&mut self, r: GeneralReg, val: u32) {
        self.regs[r.0 as usize] = val as u64;
    }

    #[inline]
    pub fn write8s(&mut self, r: GeneralReg, val: u8) {
        self.write(r, val as i8 as i64 as u64);
    }

    #[inline]
    pub fn write16s(&mut self, r: GeneralReg, val: u16) {
        self.write(r, val as i16 as i64 as u64);
    }

    #[inline]
    pub fn write32s(&mut self, r: GeneralReg, val: u32) {
        self.write(r, val as i32 as i64 as u64);
    }

    pub fn env(&self) -> u64 {
        self.read(Reg::ENV)
    }

    pub fn call_stack(&self) -> u64 {
        self.read(Reg::CALL_STACK)
    }

    /// Snapshot of every slot.
    pub fn snapshot(&self) -> [u64; TCG_TARGET_NB_REGS] {
        self.regs
    }
}

impl<H: HostWord> fmt::Debug for RegisterFile<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterFile")
            .field("host_bits", &H::BITS)
            .field("regs", &self.regs)
            .finish()
    }
}
