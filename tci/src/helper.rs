use std::fmt;

use crate::error::TbAbort;

/// A helper routine reachable through the `call` opcode.
///
/// Receives the CPU and the raw argument registers; returns the 64-bit
/// result, or abandons the block.
pub type HelperFn<C> = fn(&mut C, &[u64]) -> Result<u64, TbAbort>;

/// Registry of helper routines.
///
/// Bytecode cannot hold Rust function pointers portably, so `call`
/// carries a token handed out by [`HelperTable::register`]. Tokens are
/// non-zero and fit in 32 bits.
pub struct HelperTable<C> {
    entries: Vec<(&'static str, HelperFn<C>)>,
}

impl<C> HelperTable<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `func` and return its call token.
    pub fn register(&mut self, name: &'static str, func: HelperFn<C>) -> u64 {
        self.entries.push((name, func));
        Self::token(self.entries.len() - 1)
    }

    fn token(idx: usize) -> u64 {
        ((idx as u64) + 1) << 4
    }

    fn index(token: u64) -> Option<usize> {
        if token == 0 || token & 0xf != 0 {
            return None;
        }
        Some((token >> 4) as usize - 1)
    }

    /// Look up the routine behind `token`.
    ///
    /// Panics on a token this table never handed out.
    pub fn lookup(&self, token: u64) -> HelperFn<C> {
        match Self::index(token).and_then(|i| self.entries.get(i)) {
            Some(&(_, f)) => f,
            None => panic!("tci: call to unknown helper {token:#x}"),
        }
    }

    pub fn name(&self, token: u64) -> Option<&'static str> {
        Self::index(token)
            .and_then(|i| self.entries.get(i))
            .map(|&(n, _)| n)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for HelperTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for HelperTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(n, _)| n))
            .finish()
    }
}
