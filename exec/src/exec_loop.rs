use crate::{ExecEnv, GuestCpu, TbStore, MIN_CODE_BUF_REMAINING};
use tcg_core::tb::{decode_tb_exit, TbExit, TranslationBlock};
use tcg_tci::{HostWord, TbAbort};
use tracing::{debug, trace};

/// Reason the execution loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A TB was abandoned; the CPU state holds whatever the
    /// helper that raised it stored before unwinding.
    Exception(TbAbort),
    /// A TB exited with the request marker.
    Requested,
    /// Code buffer is full; caller should flush and retry.
    BufferFull,
}

/// Main CPU execution loop.
///
/// Repeatedly looks up or translates TBs and interprets them
/// until a TB requests an exit, a TB is abandoned, or the code
/// buffer is exhausted.
pub fn cpu_exec_loop<H, C>(env: &mut ExecEnv<H>, cpu: &mut C) -> ExitReason
where
    H: HostWord,
    C: GuestCpu<H>,
{
    let mut next_tb_hint: Option<usize> = None;

    loop {
        let tb_idx = match next_tb_hint.take() {
            Some(idx) => idx,
            None => {
                let pc = cpu.get_pc();
                let flags = cpu.get_flags();
                match tb_find(env, cpu, pc, flags) {
                    Some(idx) => idx,
                    None => return ExitReason::BufferFull,
                }
            }
        };

        let raw_exit = match cpu_tb_exec(env, cpu, tb_idx) {
            Ok(v) => v,
            Err(abort) => {
                debug!(tb_idx, reason = %abort, "exec: tb abandoned");
                return ExitReason::Exception(abort);
            }
        };

        // After chaining, the TB that exited may differ from the one
        // we entered; the exit value names it.
        match decode_tb_exit(raw_exit) {
            TbExit::NoChain => {}
            TbExit::Chain { tb: src, slot } => {
                check_exit_tb(&env.tb_store, src, raw_exit);
                let pc = cpu.get_pc();
                let flags = cpu.get_flags();
                let dst = match tb_find(env, cpu, pc, flags) {
                    Some(idx) => idx,
                    None => return ExitReason::BufferFull,
                };
                // Don't chain if src is reachable from dst: the
                // resulting cycle would never leave the interpreter.
                if !chain_reachable(&env.tb_store, dst, src) {
                    tb_add_jump(env, src, slot, dst);
                }
                next_tb_hint = Some(dst);
            }
            TbExit::Requested { tb } => {
                check_exit_tb(&env.tb_store, tb, raw_exit);
                trace!(tb, "exec: exit requested");
                return ExitReason::Requested;
            }
        }
    }
}

/// An exit value must name a TB of this store.
fn check_exit_tb(tb_store: &TbStore, tb: usize, raw: u64) {
    assert!(
        tb < tb_store.len(),
        "tci: exit value {raw:#x} names unknown TB {tb}"
    );
}

/// Find a TB for the given (pc, flags), translating if needed.
///
/// Returns `None` if the code buffer is too full to translate.
fn tb_find<H, C>(env: &mut ExecEnv<H>, cpu: &mut C, pc: u64, flags: u32) -> Option<usize>
where
    H: HostWord,
    C: GuestCpu<H>,
{
    // Fast path: jump cache
    if let Some(idx) = env.jump_cache.lookup(pc) {
        let tb = env.tb_store.get(idx);
        if !tb.invalid && tb.pc == pc && tb.flags == flags {
            return Some(idx);
        }
    }

    // Slow path: hash table
    if let Some(idx) = env.tb_store.lookup(pc, flags) {
        env.jump_cache.insert(pc, idx);
        return Some(idx);
    }

    tb_gen_code(env, cpu, pc, flags)
}

/// Translate guest code at `pc` into a new TB.
///
/// Returns `None` if the code buffer has insufficient space, either
/// before translation starts or because the block did not fit; a
/// block that did not fit is rolled back.
fn tb_gen_code<H, C>(env: &mut ExecEnv<H>, cpu: &mut C, pc: u64, flags: u32) -> Option<usize>
where
    H: HostWord,
    C: GuestCpu<H>,
{
    if env.code_buf.remaining() < MIN_CODE_BUF_REMAINING {
        return None;
    }

    let tb_idx = env.tb_store.alloc(pc, flags, 0);

    let mut e = tcg_tci::Emitter::<H>::new(&mut env.code_buf, tb_idx);
    let guest_size = cpu.gen_code(&mut e, pc, TranslationBlock::max_insns(0));
    let out = e.finish();

    if env.code_buf.overflowed() {
        env.code_buf.truncate(out.offset);
        env.tb_store.discard(tb_idx);
        debug!(pc, size = out.size, "exec: code buffer overflow");
        return None;
    }

    #[cfg(feature = "verify")]
    {
        let cfg = tcg_tci::DecodeConfig::new(H::BITS, env.tci.config().target_long);
        let code = env.code_buf.as_slice();
        if let Err(err) = tcg_tci::verify::verify_block(code, out.offset, out.offset + out.size, cfg)
        {
            panic!("tci: invalid bytecode generated for pc {pc:#x}: {err}");
        }
    }

    let tb = env.tb_store.get_mut(tb_idx);
    tb.size = guest_size;
    tb.tc_offset = out.offset;
    tb.tc_size = out.size;
    for (slot, g) in out.goto_tb.iter().enumerate() {
        if let Some((jmp, reset)) = *g {
            tb.set_jmp_offsets(slot, jmp, reset);
        }
    }

    env.tb_store.insert(tb_idx);
    env.jump_cache.insert(pc, tb_idx);
    debug!(pc, tb_idx, offset = out.offset, size = out.size, "exec: translated tb");

    Some(tb_idx)
}

/// Interpret a single TB and return its exit value.
fn cpu_tb_exec<H, C>(env: &mut ExecEnv<H>, cpu: &mut C, tb_idx: usize) -> Result<u64, TbAbort>
where
    H: HostWord,
    C: GuestCpu<H>,
{
    let offset = env.tb_store.get(tb_idx).tc_offset;
    env.tci.tb_exec(cpu, env.code_buf.as_slice(), offset)
}

/// Check if `target` is reachable from `from` by following
/// existing direct chains.
fn chain_reachable(tb_store: &TbStore, from: usize, target: usize) -> bool {
    fn walk(tb_store: &TbStore, cur: usize, target: usize, depth: usize) -> bool {
        if cur == target {
            return true;
        }
        if depth == 0 {
            return false;
        }
        let tb = tb_store.get(cur);
        tb.jmp_dest
            .iter()
            .flatten()
            .any(|&next| walk(tb_store, next, target, depth - 1))
    }
    walk(tb_store, from, target, 32)
}

/// Patch a goto_tb displacement to chain `src` → `dst`.
///
/// Later executions of `src` continue straight into `dst` without
/// returning to the loop. The reverse link lets `dst` unlink on
/// invalidation.
fn tb_add_jump<H: HostWord>(env: &mut ExecEnv<H>, src: usize, slot: usize, dst: usize) {
    let jmp_off = match env.tb_store.get(src).jmp_insn_offset[slot] {
        Some(off) => off as usize,
        None => return,
    };

    if env.tb_store.get(dst).invalid {
        return;
    }

    match env.tb_store.get(src).jmp_dest[slot] {
        Some(old) if old == dst => return,
        Some(old) => env
            .tb_store
            .get_mut(old)
            .jmp_list
            .retain(|&(s, n)| !(s == src && n == slot)),
        None => {}
    }

    let dst_offset = env.tb_store.get(dst).tc_offset;
    env.code_buf.patch_goto_tb(jmp_off, dst_offset);

    env.tb_store.get_mut(src).jmp_dest[slot] = Some(dst);
    env.tb_store.get_mut(dst).jmp_list.push((src, slot));
    debug!(src, slot, dst, "exec: chained");
}
