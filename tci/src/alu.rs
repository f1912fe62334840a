//! Width-generic integer semantics.
//!
//! Every type-polymorphic opcode has one body, instantiated for
//! [`W32`] and [`W64`]. Values cross this interface as `u64` holding
//! the zero-extended bit pattern of the operation width.

use tcg_core::Cond;

use crate::codec::Decoder;
use crate::cond::{compare32, compare64};
use crate::host::HostWord;
use crate::opcode::Opcode;
use crate::regs::{Reg, RegisterFile};

pub trait IntWidth {
    const BITS: u32;

    /// Reduce `v` to the operation width.
    fn zext(v: u64) -> u64;

    /// Read a register at the operation width.
    fn read<H: HostWord>(regs: &RegisterFile<H>, r: Reg) -> u64 {
        Self::zext(regs.read(r))
    }

    /// Read a register-or-constant source at the operation width.
    fn read_ri<H: HostWord>(dec: &mut Decoder<'_>, regs: &RegisterFile<H>) -> u64;

    /// Apply a two-source arithmetic/logic/shift opcode.
    fn binop(opc: Opcode, a: u64, b: u64) -> u64;

    /// Apply a one-source opcode (not, neg, extensions, byte swaps).
    fn unop(opc: Opcode, a: u64) -> u64;

    /// Replace `len` bits of `a` at `pos` with the low bits of `b`.
    fn deposit(a: u64, b: u64, pos: u32, len: u32) -> u64;

    fn compare(a: u64, b: u64, cond: Cond) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct W32;

#[derive(Debug, Clone, Copy)]
pub struct W64;

#[inline]
fn divisor<T: PartialEq + Default>(d: T, opc: Opcode) -> T {
    assert!(d != T::default(), "tci: {} by zero", opc.def().name);
    d
}

macro_rules! int_width {
    ($w:ident, $u:ty, $s:ty, $cmp:ident, $ri:ident) => {
        impl IntWidth for $w {
            const BITS: u32 = <$u>::BITS;

            #[inline]
            fn zext(v: u64) -> u64 {
                v as $u as u64
            }

            #[inline]
            fn read_ri<H: HostWord>(
                dec: &mut Decoder<'_>,
                regs: &RegisterFile<H>,
            ) -> u64 {
                Self::zext(dec.$ri(regs) as u64)
            }

            #[inline]
            fn binop(opc: Opcode, a: u64, b: u64) -> u64 {
                let (x, y) = (a as $u, b as $u);
                let sh = y as u32;
                let r: $u = match opc {
                    Opcode::Add => x.wrapping_add(y),
                    Opcode::Sub => x.wrapping_sub(y),
                    Opcode::Mul => x.wrapping_mul(y),
                    Opcode::DivS => {
                        (x as $s).wrapping_div(divisor(y as $s, opc)) as $u
                    }
                    Opcode::DivU => x / divisor(y, opc),
                    Opcode::RemS => {
                        (x as $s).wrapping_rem(divisor(y as $s, opc)) as $u
                    }
                    Opcode::RemU => x % divisor(y, opc),
                    Opcode::And => x & y,
                    Opcode::Or => x | y,
                    Opcode::Xor => x ^ y,
                    Opcode::Shl => x.wrapping_shl(sh),
                    Opcode::Shr => x.wrapping_shr(sh),
                    Opcode::Sar => (x as $s).wrapping_shr(sh) as $u,
                    Opcode::RotL => x.rotate_left(sh % Self::BITS),
                    Opcode::RotR => x.rotate_right(sh % Self::BITS),
                    _ => panic!("tci: {} is not a binary op", opc.def().name),
                };
                r as u64
            }

            #[inline]
            fn unop(opc: Opcode, a: u64) -> u64 {
                let x = a as $u;
                let r: $u = match opc {
                    Opcode::Not => !x,
                    Opcode::Neg => x.wrapping_neg(),
                    Opcode::Ext8S => x as i8 as $s as $u,
                    Opcode::Ext8U => x as u8 as $u,
                    Opcode::Ext16S => x as i16 as $s as $u,
                    Opcode::Ext16U => x as u16 as $u,
                    Opcode::Ext32S | Opcode::ExtI32I64 => x as i32 as $s as $u,
                    Opcode::Ext32U | Opcode::ExtUI32I64 => x as u32 as $u,
                    Opcode::Bswap16 => (x as u16).swap_bytes() as $u,
                    Opcode::Bswap32 => (x as u32).swap_bytes() as $u,
                    Opcode::Bswap64 => a.swap_bytes() as $u,
                    _ => panic!("tci: {} is not a unary op", opc.def().name),
                };
                r as u64
            }

            #[inline]
            fn deposit(a: u64, b: u64, pos: u32, len: u32) -> u64 {
                assert!(
                    len >= 1 && pos + len <= Self::BITS,
                    "tci: deposit field {pos}+{len} exceeds {} bits",
                    Self::BITS
                );
                let field: $u = <$u>::MAX >> (Self::BITS - len);
                let mask = field << pos;
                let r = ((a as $u) & !mask) | (((b as $u) << pos) & mask);
                r as u64
            }

            #[inline]
            fn compare(a: u64, b: u64, cond: Cond) -> bool {
                $cmp(a as $u, b as $u, cond)
            }
        }
    };
}

int_width!(W32, u32, i32, compare32, read_ri32);
int_width!(W64, u64, i64, compare64, read_ri64);
