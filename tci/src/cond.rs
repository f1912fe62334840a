use tcg_core::Cond;

/// Evaluate `cond` given the operands viewed unsigned (`u0`, `u1`) and
/// signed (`s0`, `s1`) at the same width.
#[inline]
fn test<U: Ord, S: Ord>(cond: Cond, u0: U, u1: U, s0: S, s1: S) -> bool {
    match cond {
        Cond::Eq => u0 == u1,
        Cond::Ne => u0 != u1,
        Cond::Lt => s0 < s1,
        Cond::Ge => s0 >= s1,
        Cond::Le => s0 <= s1,
        Cond::Gt => s0 > s1,
        Cond::Ltu => u0 < u1,
        Cond::Geu => u0 >= u1,
        Cond::Leu => u0 <= u1,
        Cond::Gtu => u0 > u1,
        Cond::Never | Cond::Always => {
            panic!("tci: condition {} is not a predicate", cond.name())
        }
    }
}

/// Compare two 32-bit values.
#[inline]
pub fn compare32(a: u32, b: u32, cond: Cond) -> bool {
    test(cond, a, b, a as i32, b as i32)
}

/// Compare two 64-bit values.
#[inline]
pub fn compare64(a: u64, b: u64, cond: Cond) -> bool {
    test(cond, a, b, a as i64, b as i64)
}
