//! Tiny Code Interpreter: a portable bytecode VM for translation blocks.
//!
//! Used where no native-code backend exists for the host: the code
//! generator emits TCI bytecode and [`Tci::tb_exec`] runs it, one
//! translation block per call.
//!
//! Reference: `~/qemu/tcg/tci.c`, `~/qemu/tcg/tci/tcg-target.c.inc`.

pub mod alu;
pub mod code_buffer;
pub mod codec;
pub mod cond;
pub mod config;
pub mod disas;
pub mod emit;
pub mod error;
pub mod helper;
pub mod host;
pub mod image;
pub mod insn;
pub mod interp;
pub mod memory;
pub mod opcode;
pub mod regs;
#[cfg(feature = "verify")]
pub mod verify;
pub mod window;

pub use code_buffer::CodeBuffer;
pub use config::{TargetLong, TciConfig};
pub use emit::{EmittedTb, Emitter, Src};
pub use error::{BytecodeError, MemAccess, TbAbort, TciError};
pub use helper::{HelperFn, HelperTable};
pub use host::{Host32, Host64, HostWord, NativeHost};
pub use image::{ImageTb, TbImage};
pub use insn::DecodeConfig;
pub use interp::{CpuEnv, Tci};
pub use memory::{GuestMemory, MemOpIdx};
pub use opcode::Opcode;
pub use regs::{GeneralReg, Reg, RegisterFile};
