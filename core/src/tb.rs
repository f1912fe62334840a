/// A cached translated block of bytecode.
///
/// Maps to QEMU's `TranslationBlock`. Describes the mapping from a
/// guest code region to the interpreter bytecode generated for it.
#[derive(Debug)]
pub struct TranslationBlock {
    /// Guest virtual PC where this TB starts.
    pub pc: u64,
    /// CPU state flags that affect translation.
    pub flags: u32,
    /// Compile flags (instruction count limit, single-step, etc.).
    pub cflags: u32,
    /// Size of guest code covered by this TB, in bytes.
    pub size: u32,

    /// Offset of the TB's first instruction in the bytecode buffer.
    pub tc_offset: usize,
    /// Size of the TB's bytecode in bytes.
    pub tc_size: usize,

    /// Offset of the displacement field of each `goto_tb` (up to 2).
    /// Chaining rewrites this field; `None` means the slot is unused.
    pub jmp_insn_offset: [Option<u32>; 2],
    /// Buffer offset the displacement targets when the slot is
    /// unlinked (the instruction right after the `goto_tb`).
    pub jmp_reset_offset: [Option<u32>; 2],

    /// Outgoing chain for each slot.
    pub jmp_dest: [Option<usize>; 2],
    /// Incoming chains: `(source tb, slot)`.
    pub jmp_list: Vec<(usize, usize)>,

    /// Index of the next TB in the same hash bucket, or `None`.
    pub hash_next: Option<usize>,

    /// Whether this TB has been invalidated.
    pub invalid: bool,
}

/// Compile flags for TranslationBlock.cflags.
pub mod cflags {
    /// Mask for the instruction count limit (0 = no limit).
    pub const CF_COUNT_MASK: u32 = 0x0000_FFFF;
    /// TB is being single-stepped.
    pub const CF_SINGLE_STEP: u32 = 0x0002_0000;
}

impl TranslationBlock {
    pub fn new(pc: u64, flags: u32, cflags: u32) -> Self {
        Self {
            pc,
            flags,
            cflags,
            size: 0,
            tc_offset: 0,
            tc_size: 0,
            jmp_insn_offset: [None; 2],
            jmp_reset_offset: [None; 2],
            jmp_dest: [None; 2],
            jmp_list: Vec::new(),
            hash_next: None,
            invalid: false,
        }
    }

    /// Compute hash bucket index for TB lookup.
    pub fn hash(pc: u64, flags: u32) -> usize {
        let h = pc.wrapping_mul(0x9e3779b97f4a7c15) ^ (flags as u64);
        (h as usize) & (TB_HASH_SIZE - 1)
    }

    /// Record the `goto_tb` displacement field and its reset target for
    /// exit slot `n`.
    pub fn set_jmp_offsets(&mut self, n: usize, insn: u32, reset: u32) {
        assert!(n < 2);
        self.jmp_insn_offset[n] = Some(insn);
        self.jmp_reset_offset[n] = Some(reset);
    }

    /// Maximum number of guest instructions per TB.
    pub fn max_insns(cflags: u32) -> u32 {
        if cflags & cflags::CF_SINGLE_STEP != 0 {
            return 1;
        }
        let count = cflags & cflags::CF_COUNT_MASK;
        if count == 0 {
            512
        } else {
            count
        }
    }
}

/// Number of buckets in the TB hash table.
pub const TB_HASH_SIZE: usize = 1 << 15; // 32768

/// Number of entries in the per-CPU jump cache.
pub const TB_JMP_CACHE_SIZE: usize = 1 << 12; // 4096

// -- exit_tb value encoding --
//
// 0                       no chaining, look the next TB up by pc
// (tb + 1) << 2 | slot    chain tb's goto_tb slot 0/1 to the next TB
// (tb + 1) << 2 | 3       exit requested, return to the caller

/// Low bits of an exit value that carry the slot.
pub const TB_EXIT_MASK: u64 = 3;
pub const TB_EXIT_IDX0: u64 = 0;
pub const TB_EXIT_IDX1: u64 = 1;
pub const TB_EXIT_REQUESTED: u64 = 3;

/// What an `exit_tb` value asks the execution loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbExit {
    /// No chaining; find the next TB from the CPU's pc.
    NoChain,
    /// Link `tb`'s `goto_tb` slot to whatever TB runs next.
    Chain { tb: usize, slot: usize },
    /// Leave the execution loop (interrupt, exit request).
    Requested { tb: usize },
}

/// Build the `exit_tb` value for `tb_idx` leaving through `slot`.
pub const fn encode_tb_exit(tb_idx: usize, slot: u64) -> u64 {
    (((tb_idx as u64) + 1) << 2) | (slot & TB_EXIT_MASK)
}

/// Decode a value returned by the interpreter's entry point.
///
/// Panics on values `encode_tb_exit` never produces: 1..=3 (no TB
/// index) and slot 2.
pub fn decode_tb_exit(raw: u64) -> TbExit {
    if raw == 0 {
        return TbExit::NoChain;
    }
    let Some(tb) = (raw >> 2).checked_sub(1) else {
        panic!("tci: malformed exit value {raw:#x}");
    };
    let tb = tb as usize;
    match raw & TB_EXIT_MASK {
        TB_EXIT_REQUESTED => TbExit::Requested { tb },
        slot @ (TB_EXIT_IDX0 | TB_EXIT_IDX1) => TbExit::Chain {
            tb,
            slot: slot as usize,
        },
        _ => panic!("tci: malformed exit value {raw:#x}"),
    }
}

/// Per-CPU direct-mapped TB jump cache.
///
/// Indexed by `(pc >> 2) & (TB_JMP_CACHE_SIZE - 1)`.
pub struct JumpCache {
    entries: Box<[Option<usize>; TB_JMP_CACHE_SIZE]>,
}

impl JumpCache {
    pub fn new() -> Self {
        Self {
            entries: Box::new([None; TB_JMP_CACHE_SIZE]),
        }
    }

    fn index(pc: u64) -> usize {
        (pc as usize >> 2) & (TB_JMP_CACHE_SIZE - 1)
    }

    pub fn lookup(&self, pc: u64) -> Option<usize> {
        self.entries[Self::index(pc)]
    }

    pub fn insert(&mut self, pc: u64, tb_idx: usize) {
        self.entries[Self::index(pc)] = Some(tb_idx);
    }

    pub fn remove(&mut self, pc: u64) {
        self.entries[Self::index(pc)] = None;
    }

    pub fn invalidate(&mut self) {
        self.entries.fill(None);
    }
}

impl Default for JumpCache {
    fn default() -> Self {
        Self::new()
    }
}
