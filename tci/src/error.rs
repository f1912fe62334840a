//! Error types.
//!
//! Two families live here and they never mix:
//!
//! - [`TbAbort`] is the guest-level "abandon the current block" signal.
//!   Helpers and the memory bridge raise it, the dispatch loop forwards it
//!   with `?` and the execution loop delivers it to the guest.
//! - [`TciError`] / [`BytecodeError`] report problems found while loading
//!   or validating bytecode outside of execution.
//!
//! Producer/consumer contract violations found *during* execution are not
//! errors at all: the interpreter panics with a `tci:` message.

use std::fmt;
use std::io;

use thiserror::Error;

/// Direction of a guest memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    Read,
    Write,
}

impl fmt::Display for MemAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemAccess::Read => f.write_str("read"),
            MemAccess::Write => f.write_str("write"),
        }
    }
}

/// Reason the current translation block was abandoned.
///
/// Control never returns to the interrupted block; the caller decides
/// how to deliver the condition to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TbAbort {
    /// A helper raised a guest exception.
    #[error("guest exception {0:#x}")]
    Exception(u32),
    /// The guest touched memory it may not access.
    #[error("guest {access} fault at {addr:#x}")]
    MemFault { addr: u64, access: MemAccess },
    /// The target requires alignment the access did not have.
    #[error("unaligned {size}-byte access at {addr:#x}")]
    Unaligned { addr: u64, size: u32 },
}

/// Malformed bytecode, reported by the decoder used for disassembly and
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    #[error("unknown opcode {byte:#04x} at {at:#x}")]
    UnknownOpcode { at: usize, byte: u8 },
    #[error("{name} is not available on a {bits}-bit host (at {at:#x})")]
    Unsupported {
        at: usize,
        name: String,
        bits: u32,
    },
    #[error("truncated instruction at {at:#x}")]
    Truncated { at: usize },
    #[error("{name} at {at:#x} declares {declared} bytes but encodes {actual}")]
    SizeMismatch {
        at: usize,
        name: String,
        declared: usize,
        actual: usize,
    },
    #[error("register r{reg} out of range at {at:#x}")]
    BadRegister { at: usize, reg: u8 },
    #[error("write to reserved register r{reg} at {at:#x}")]
    ReservedWrite { at: usize, reg: u8 },
    #[error("invalid condition {val} at {at:#x}")]
    BadCond { at: usize, val: u8 },
    #[error("zero label at {at:#x}")]
    ZeroLabel { at: usize },
    #[error("branch at {at:#x} targets {target:#x}, not an instruction")]
    BadTarget { at: usize, target: u64 },
    #[error("block ending at {at:#x} falls through")]
    FallsThrough { at: usize },
}

/// Errors from loading bytecode images and validating buffers.
#[derive(Debug, Error)]
pub enum TciError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad image magic")]
    BadMagic,
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u16),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

pub type Result<T> = std::result::Result<T, TciError>;
