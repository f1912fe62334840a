use tcg_core::tb::{TranslationBlock, TB_HASH_SIZE};
use tcg_tci::CodeBuffer;
use tracing::debug;

const MAX_TBS: usize = 65536;

/// Storage and hash-table lookup for TBs.
///
/// TBs are addressed by index; the index is what `exit_tb` values
/// carry back to the execution loop.
pub struct TbStore {
    tbs: Vec<TranslationBlock>,
    hash: Vec<Option<usize>>,
}

impl TbStore {
    pub fn new() -> Self {
        Self {
            tbs: Vec::new(),
            hash: vec![None; TB_HASH_SIZE],
        }
    }

    /// Allocate a new TB.
    pub fn alloc(&mut self, pc: u64, flags: u32, cflags: u32) -> usize {
        let idx = self.tbs.len();
        assert!(idx < MAX_TBS, "TB store full");
        self.tbs.push(TranslationBlock::new(pc, flags, cflags));
        idx
    }

    /// Drop the most recently allocated TB before it was inserted.
    pub fn discard(&mut self, tb_idx: usize) {
        assert_eq!(tb_idx + 1, self.tbs.len(), "only the last TB can be discarded");
        self.tbs.pop();
    }

    pub fn get(&self, idx: usize) -> &TranslationBlock {
        &self.tbs[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut TranslationBlock {
        &mut self.tbs[idx]
    }

    /// Lookup a valid TB by (pc, flags) in the hash table.
    pub fn lookup(&self, pc: u64, flags: u32) -> Option<usize> {
        let bucket = TranslationBlock::hash(pc, flags);
        let mut cur = self.hash[bucket];
        while let Some(idx) = cur {
            let tb = &self.tbs[idx];
            if !tb.invalid && tb.pc == pc && tb.flags == flags {
                return Some(idx);
            }
            cur = tb.hash_next;
        }
        None
    }

    /// Insert a TB into the hash table (prepend to bucket).
    pub fn insert(&mut self, tb_idx: usize) {
        let tb = &self.tbs[tb_idx];
        let bucket = TranslationBlock::hash(tb.pc, tb.flags);
        self.tbs[tb_idx].hash_next = self.hash[bucket];
        self.hash[bucket] = Some(tb_idx);
    }

    /// Mark a TB as invalid, unlink all chained jumps, and
    /// remove it from the hash chain.
    pub fn invalidate(&mut self, tb_idx: usize, code_buf: &mut CodeBuffer) {
        self.tbs[tb_idx].invalid = true;

        // 1. Unlink incoming edges.
        let jmp_list = std::mem::take(&mut self.tbs[tb_idx].jmp_list);
        for (src, slot) in jmp_list {
            Self::reset_jump(&self.tbs[src], code_buf, slot);
            self.tbs[src].jmp_dest[slot] = None;
            debug!(src, slot, dst = tb_idx, "exec: unlinked jump");
        }

        // 2. Unlink outgoing edges.
        for slot in 0..2 {
            if let Some(dst) = self.tbs[tb_idx].jmp_dest[slot].take() {
                Self::reset_jump(&self.tbs[tb_idx], code_buf, slot);
                self.tbs[dst]
                    .jmp_list
                    .retain(|&(s, n)| !(s == tb_idx && n == slot));
            }
        }

        // 3. Remove from hash chain.
        let tb = &self.tbs[tb_idx];
        let bucket = TranslationBlock::hash(tb.pc, tb.flags);
        let mut prev: Option<usize> = None;
        let mut cur = self.hash[bucket];
        while let Some(idx) = cur {
            let next = self.tbs[idx].hash_next;
            if idx == tb_idx {
                match prev {
                    Some(p) => self.tbs[p].hash_next = next,
                    None => self.hash[bucket] = next,
                }
                self.tbs[idx].hash_next = None;
                return;
            }
            prev = cur;
            cur = next;
        }
    }

    /// Reset a goto_tb jump back to its fall-through target.
    fn reset_jump(tb: &TranslationBlock, code_buf: &mut CodeBuffer, slot: usize) {
        if let (Some(jmp_off), Some(reset_off)) =
            (tb.jmp_insn_offset[slot], tb.jmp_reset_offset[slot])
        {
            code_buf.patch_goto_tb(jmp_off as usize, reset_off as usize);
        }
    }

    /// Flush all TBs and reset the hash table.
    pub fn flush(&mut self) {
        self.tbs.clear();
        self.hash.fill(None);
    }

    pub fn len(&self) -> usize {
        self.tbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tbs.is_empty()
    }
}

impl Default for TbStore {
    fn default() -> Self {
        Self::new()
    }
}
