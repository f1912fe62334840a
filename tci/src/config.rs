/// Width of the guest's `target_ulong`, i.e. of guest virtual addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetLong {
    Bits32,
    Bits64,
}

impl TargetLong {
    pub const fn bits(self) -> u32 {
        match self {
            TargetLong::Bits32 => 32,
            TargetLong::Bits64 => 64,
        }
    }

    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            32 => Some(TargetLong::Bits32),
            64 => Some(TargetLong::Bits64),
            _ => None,
        }
    }

    /// Truncate `addr` to the guest address width.
    pub const fn mask(self, addr: u64) -> u64 {
        match self {
            TargetLong::Bits32 => addr & 0xffff_ffff,
            TargetLong::Bits64 => addr,
        }
    }
}

/// Build-time configuration of an interpreter instance.
///
/// The host word is chosen separately, by the `HostWord` type parameter
/// of [`crate::Tci`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TciConfig {
    pub target_long: TargetLong,
}

impl TciConfig {
    pub const fn new(target_long: TargetLong) -> Self {
        Self { target_long }
    }
}

impl Default for TciConfig {
    fn default() -> Self {
        Self::new(TargetLong::Bits64)
    }
}
