//! Sequence-number comparisons under modular arithmetic.
//!
//! Sequence numbers wrap, so ordinary integer comparison is wrong once a
//! connection crosses the 2^32 boundary. These helpers are correct as long as
//! the two numbers are within 2^31 of each other, which the window rules
//! guarantee.

/// a < b under modular arithmetic
pub fn mod_le(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

/// a <= b under modular arithmetic
pub fn mod_leq(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) >= 0
}

/// a > b under modular arithmetic
pub fn mod_ge(a: u32, b: u32) -> bool {
    mod_le(b, a)
}

/// a >= b under modular arithmetic
pub fn mod_geq(a: u32, b: u32) -> bool {
    mod_leq(b, a)
}

/// Is `b` between `a` and `c` when accounting for modular arithmetic?
pub fn mod_bounded(a: u32, ab_cmp: ModCmp, b: u32, bc_cmp: ModCmp, c: u32) -> bool {
    let lower = match ab_cmp {
        Le => mod_le(a, b),
        Leq => mod_leq(a, b),
    };
    let upper = match bc_cmp {
        Le => mod_le(b, c),
        Leq => mod_leq(b, c),
    };
    lower && upper
}

pub use ModCmp::*;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModCmp {
    Le,
    Leq,
}
