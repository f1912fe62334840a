//! Host address windows.
//!
//! Host loads and stores (`ld*`/`st*`) address memory through a base
//! register. The only host memory bytecode may touch is the CPU state
//! (through `TCG_AREG0`) and the per-call TCG frame (through
//! `TCG_REG_CALL_STACK`), so the entry point seeds those registers with
//! the base of a fixed window each and every access is resolved
//! against the two windows.

/// Address `TCG_AREG0` points at: byte 0 of the CPU state.
pub const ENV_BASE: u64 = 0x1000_0000;

/// Address `TCG_REG_CALL_STACK` points at: byte 0 of the TCG frame.
pub const FRAME_BASE: u64 = 0x7000_0000;

/// Number of longs in the TCG frame.
pub const CPU_TEMP_BUF_NLONGS: usize = 128;

/// Size of the TCG frame in bytes.
pub const TCG_FRAME_SIZE: usize = CPU_TEMP_BUF_NLONGS * 8;

fn slot(window: &mut [u8], base: u64, addr: u64, len: usize) -> Option<&mut [u8]> {
    let off = addr.checked_sub(base)? as usize;
    window.get_mut(off..off.checked_add(len)?)
}

/// Resolve `len` bytes at host address `addr`.
///
/// Panics when the range is not entirely inside one window.
pub fn resolve<'a>(
    env: &'a mut [u8],
    frame: &'a mut [u8],
    addr: u64,
    len: usize,
) -> &'a mut [u8] {
    if addr >= FRAME_BASE {
        if let Some(s) = slot(frame, FRAME_BASE, addr, len) {
            return s;
        }
    } else if let Some(s) = slot(env, ENV_BASE, addr, len) {
        return s;
    }
    panic!("tci: host access {addr:#x}+{len} outside the env and frame windows")
}

/// Load `N` host-order bytes.
#[inline]
pub fn load<const N: usize>(env: &mut [u8], frame: &mut [u8], addr: u64) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(resolve(env, frame, addr, N));
    out
}

/// Store host-order bytes.
#[inline]
pub fn store(env: &mut [u8], frame: &mut [u8], addr: u64, bytes: &[u8]) {
    resolve(env, frame, addr, bytes.len()).copy_from_slice(bytes);
}
