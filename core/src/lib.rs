pub mod label;
pub mod tb;
pub mod types;

pub use label::{Label, LabelUse, RelocKind};
pub use tb::{
    decode_tb_exit, encode_tb_exit, JumpCache, TbExit, TranslationBlock,
    TB_HASH_SIZE, TB_JMP_CACHE_SIZE,
};
pub use types::{Cond, MemOp, Type};
