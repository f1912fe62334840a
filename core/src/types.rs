/// Operand width of a type-polymorphic TCI opcode.
///
/// Maps to QEMU's `TCGType` restricted to the integer types the
/// interpreter executes. The 64-bit form is only available when the
/// host word is 64 bits wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Type {
    I32 = 0,
    I64 = 1,
}

impl Type {
    pub const fn size_bits(self) -> u32 {
        match self {
            Type::I32 => 32,
            Type::I64 => 64,
        }
    }

    pub const fn size_bytes(self) -> u32 {
        self.size_bits() / 8
    }

    /// Suffix used in opcode names (`add_i32`, `add_i64`).
    pub const fn suffix(self) -> &'static str {
        match self {
            Type::I32 => "_i32",
            Type::I64 => "_i64",
        }
    }
}

/// Comparison conditions for brcond/setcond.
///
/// Maps to QEMU's `TCGCond`. `Never`/`Always` exist so producers can
/// fold constant branches; the interpreter never accepts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Never = 0,
    Always = 1,
    Eq = 8,
    Ne = 9,
    // Signed
    Lt = 10,
    Ge = 11,
    Le = 12,
    Gt = 13,
    // Unsigned
    Ltu = 14,
    Geu = 15,
    Leu = 16,
    Gtu = 17,
}

impl Cond {
    /// The ten relational predicates the interpreter evaluates.
    pub const PREDICATES: [Cond; 10] = [
        Cond::Eq,
        Cond::Ne,
        Cond::Lt,
        Cond::Ge,
        Cond::Le,
        Cond::Gt,
        Cond::Ltu,
        Cond::Geu,
        Cond::Leu,
        Cond::Gtu,
    ];

    /// Decode a condition byte from the bytecode stream.
    pub const fn from_u8(v: u8) -> Option<Cond> {
        Some(match v {
            0 => Cond::Never,
            1 => Cond::Always,
            8 => Cond::Eq,
            9 => Cond::Ne,
            10 => Cond::Lt,
            11 => Cond::Ge,
            12 => Cond::Le,
            13 => Cond::Gt,
            14 => Cond::Ltu,
            15 => Cond::Geu,
            16 => Cond::Leu,
            17 => Cond::Gtu,
            _ => return None,
        })
    }

    /// Return the inverted condition.
    pub const fn invert(self) -> Cond {
        match self {
            Cond::Never => Cond::Always,
            Cond::Always => Cond::Never,
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ltu => Cond::Geu,
            Cond::Geu => Cond::Ltu,
            Cond::Leu => Cond::Gtu,
            Cond::Gtu => Cond::Leu,
        }
    }

    /// Swap operand order (e.g. Lt becomes Gt).
    pub const fn swap(self) -> Cond {
        match self {
            Cond::Eq | Cond::Ne | Cond::Never | Cond::Always => self,
            Cond::Lt => Cond::Gt,
            Cond::Ge => Cond::Le,
            Cond::Le => Cond::Ge,
            Cond::Gt => Cond::Lt,
            Cond::Ltu => Cond::Gtu,
            Cond::Geu => Cond::Leu,
            Cond::Leu => Cond::Geu,
            Cond::Gtu => Cond::Ltu,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Cond::Lt | Cond::Ge | Cond::Le | Cond::Gt)
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(self, Cond::Ltu | Cond::Geu | Cond::Leu | Cond::Gtu)
    }

    /// Short lowercase name, as printed by the disassembler.
    pub const fn name(self) -> &'static str {
        match self {
            Cond::Never => "never",
            Cond::Always => "always",
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Ge => "ge",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ltu => "ltu",
            Cond::Geu => "geu",
            Cond::Leu => "leu",
            Cond::Gtu => "gtu",
        }
    }
}

/// Memory operation descriptor: size and signedness of a guest access.
///
/// Maps to QEMU's `MemOp`. The interpreter derives one from each
/// `qemu_ld`/`qemu_st` opcode and hands it to the memory bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOp(u16);

impl MemOp {
    pub const SIZE_8: u16 = 0;
    pub const SIZE_16: u16 = 1;
    pub const SIZE_32: u16 = 2;
    pub const SIZE_64: u16 = 3;

    pub const SIGN: u16 = 1 << 2;
    /// The access must be naturally aligned.
    pub const ALIGN: u16 = 1 << 4;

    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn ub() -> Self {
        Self(Self::SIZE_8)
    }
    pub const fn sb() -> Self {
        Self(Self::SIZE_8 | Self::SIGN)
    }
    pub const fn uw() -> Self {
        Self(Self::SIZE_16)
    }
    pub const fn sw() -> Self {
        Self(Self::SIZE_16 | Self::SIGN)
    }
    pub const fn ul() -> Self {
        Self(Self::SIZE_32)
    }
    pub const fn sl() -> Self {
        Self(Self::SIZE_32 | Self::SIGN)
    }
    pub const fn uq() -> Self {
        Self(Self::SIZE_64)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }
    pub const fn size(self) -> u16 {
        self.0 & 0x3
    }
    pub const fn is_signed(self) -> bool {
        self.0 & Self::SIGN != 0
    }
    pub const fn size_bytes(self) -> u32 {
        1 << self.size()
    }
    pub const fn requires_align(self) -> bool {
        self.0 & Self::ALIGN != 0
    }
    pub const fn with_align(self) -> Self {
        Self(self.0 | Self::ALIGN)
    }

    /// Sign- or zero-extend a raw value of this access size to 64 bits.
    pub const fn extend(self, raw: u64) -> u64 {
        let bits = self.size_bytes() * 8;
        if bits == 64 {
            return raw;
        }
        let shift = 64 - bits;
        if self.is_signed() {
            (((raw << shift) as i64) >> shift) as u64
        } else {
            (raw << shift) >> shift
        }
    }
}
