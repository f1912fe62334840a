//! TCG execution engine: TB cache and CPU execution loop.
//!
//! Provides the execution loop that drives the
//! lookup → translate → interpret cycle, with TB caching via
//! a hash table and per-CPU jump cache, and `goto_tb` chaining
//! between interpreted blocks.
//!
//! Reference: `~/qemu/accel/tcg/cpu-exec.c`,
//! `~/qemu/accel/tcg/translate-all.c`.

pub mod exec_loop;
pub mod tb_store;

pub use exec_loop::{cpu_exec_loop, ExitReason};
pub use tb_store::TbStore;

use tcg_core::tb::JumpCache;
use tcg_tci::{CodeBuffer, CpuEnv, Emitter, HostWord, NativeHost, Tci, TciConfig};

/// Trait for guest CPU state used by the execution loop.
///
/// Each guest architecture implements this to provide PC/flags
/// access and frontend translation; the [`CpuEnv`] supertrait gives
/// the interpreter the CPU state, guest memory and helpers.
pub trait GuestCpu<H: HostWord = NativeHost>: CpuEnv {
    /// Return the current guest program counter.
    fn get_pc(&self) -> u64;

    /// Return CPU flags that affect translation.
    fn get_flags(&self) -> u32;

    /// Translate guest code starting at `pc` into bytecode.
    ///
    /// Returns the number of guest bytes translated. Called only on
    /// TB cache miss.
    fn gen_code(&mut self, e: &mut Emitter<'_, H>, pc: u64, max_insns: u32) -> u32;
}

/// Execution environment holding all shared translation state.
pub struct ExecEnv<H: HostWord = NativeHost> {
    pub tb_store: TbStore,
    pub jump_cache: JumpCache,
    pub code_buf: CodeBuffer,
    pub tci: Tci<H>,
}

/// Minimum remaining bytes in code buffer before refusing
/// to translate a new TB.
pub const MIN_CODE_BUF_REMAINING: usize = 4096;

impl<H: HostWord> ExecEnv<H> {
    /// Create an execution environment with a 16 MiB code buffer.
    pub fn new(config: TciConfig) -> Self {
        Self::with_code_buf(CodeBuffer::with_default_size(H::BITS, config.target_long), config)
    }

    /// Create an execution environment around an existing code buffer.
    pub fn with_code_buf(code_buf: CodeBuffer, config: TciConfig) -> Self {
        assert_eq!(code_buf.host_bits(), H::BITS, "code buffer host word mismatch");
        assert_eq!(
            code_buf.target_long(),
            config.target_long,
            "code buffer guest address width mismatch"
        );
        Self {
            tb_store: TbStore::new(),
            jump_cache: JumpCache::new(),
            code_buf,
            tci: Tci::new(config),
        }
    }

    /// Invalidate one TB: unlink its chains and drop it from the caches.
    pub fn invalidate(&mut self, tb_idx: usize) {
        let pc = self.tb_store.get(tb_idx).pc;
        self.tb_store.invalidate(tb_idx, &mut self.code_buf);
        if self.jump_cache.lookup(pc) == Some(tb_idx) {
            self.jump_cache.remove(pc);
        }
    }

    /// Drop every TB and all generated bytecode.
    pub fn flush(&mut self) {
        self.tb_store.flush();
        self.jump_cache.invalidate();
        self.code_buf.reset();
    }
}
