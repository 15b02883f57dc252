//! Soft-float intrinsics
//!
//! Compiler runtime routines (`__adddf3`, `__fixdfsi`, ...) some guests
//! import instead of using native float instructions. Single and double
//! precision only: `long double` routines take 128-bit values split over
//! integer words and are left unresolved.

/// Shape of an intrinsic, which decides the import signature
#[derive(Clone, Copy)]
pub enum Intrinsic {
    /// `(a, b) -> float`
    Binary(fn(f64, f64) -> f64),
    /// `a -> float`
    Unary(fn(f64) -> f64),
    /// `(a, b) -> int` three-way comparison
    Compare(fn(f64, f64) -> i32),
    /// `a -> i32`
    ToI32(fn(f64) -> i32),
    /// `a -> i64`
    ToI64(fn(f64) -> i64),
    /// `i32 -> float`
    FromI32(fn(i32) -> f64),
    /// `i64 -> float`
    FromI64(fn(i64) -> f64),
}

impl std::fmt::Debug for Intrinsic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Self::Binary(_) => "Binary",
            Self::Unary(_) => "Unary",
            Self::Compare(_) => "Compare",
            Self::ToI32(_) => "ToI32",
            Self::ToI64(_) => "ToI64",
            Self::FromI32(_) => "FromI32",
            Self::FromI64(_) => "FromI64",
        };
        f.write_str(shape)
    }
}

pub fn add(a: f64, b: f64) -> f64 {
    a + b
}

pub fn sub(a: f64, b: f64) -> f64 {
    a - b
}

pub fn mul(a: f64, b: f64) -> f64 {
    a * b
}

pub fn div(a: f64, b: f64) -> f64 {
    a / b
}

pub fn neg(a: f64) -> f64 {
    -a
}

/// Precision changes happen in the import signature; the value passes through
pub fn identity(a: f64) -> f64 {
    a
}

/// Truncate toward zero, saturating; NaN becomes 0
pub fn fix_i32(a: f64) -> i32 {
    a as i32
}

pub fn fix_i64(a: f64) -> i64 {
    a as i64
}

/// Unsigned conversion: negative inputs clamp to 0. The result is
/// returned in the signed word of the same width.
pub fn fixuns_i32(a: f64) -> i32 {
    a as u32 as i32
}

pub fn fixuns_i64(a: f64) -> i64 {
    a as u64 as i64
}

pub fn float_i32(a: i32) -> f64 {
    a as f64
}

pub fn float_i64(a: i64) -> f64 {
    a as f64
}

pub fn float_u32(a: i32) -> f64 {
    a as u32 as f64
}

/// Nonzero when either operand is NaN
pub fn unord(a: f64, b: f64) -> i32 {
    (a.is_nan() || b.is_nan()) as i32
}

/// `cmp`, `eq`, `ne`, `lt`, `le`: unordered compares as greater
pub fn cmp(a: f64, b: f64) -> i32 {
    match a.partial_cmp(&b) {
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) | None => 1,
    }
}

/// `ge`, `gt`: unordered compares as less
pub fn cmp_ge(a: f64, b: f64) -> i32 {
    match a.partial_cmp(&b) {
        Some(std::cmp::Ordering::Less) | None => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
    }
}

use Intrinsic::*;

/// Every intrinsic the bridge provides, by import name
pub const INTRINSICS: &[(&str, Intrinsic)] = &[
    ("__addsf3", Binary(add)),
    ("__adddf3", Binary(add)),
    ("__subsf3", Binary(sub)),
    ("__subdf3", Binary(sub)),
    ("__mulsf3", Binary(mul)),
    ("__muldf3", Binary(mul)),
    ("__divsf3", Binary(div)),
    ("__divdf3", Binary(div)),
    ("__negsf2", Unary(neg)),
    ("__negdf2", Unary(neg)),
    ("__extendsfdf2", Unary(identity)),
    ("__truncdfsf2", Unary(identity)),
    ("__fixsfsi", ToI32(fix_i32)),
    ("__fixdfsi", ToI32(fix_i32)),
    ("__fixsfdi", ToI64(fix_i64)),
    ("__fixdfdi", ToI64(fix_i64)),
    ("__fixunssfsi", ToI32(fixuns_i32)),
    ("__fixunsdfsi", ToI32(fixuns_i32)),
    ("__fixunssfdi", ToI64(fixuns_i64)),
    ("__fixunsdfdi", ToI64(fixuns_i64)),
    ("__floatsisf", FromI32(float_i32)),
    ("__floatsidf", FromI32(float_i32)),
    ("__floatunsisf", FromI32(float_u32)),
    ("__floatunsidf", FromI32(float_u32)),
    ("__floatdisf", FromI64(float_i64)),
    ("__floatdidf", FromI64(float_i64)),
    ("__cmpsf2", Compare(cmp)),
    ("__cmpdf2", Compare(cmp)),
    ("__unordsf2", Compare(unord)),
    ("__unorddf2", Compare(unord)),
    ("__eqsf2", Compare(cmp)),
    ("__eqdf2", Compare(cmp)),
    ("__nesf2", Compare(cmp)),
    ("__nedf2", Compare(cmp)),
    ("__ltsf2", Compare(cmp)),
    ("__ltdf2", Compare(cmp)),
    ("__lesf2", Compare(cmp)),
    ("__ledf2", Compare(cmp)),
    ("__gesf2", Compare(cmp_ge)),
    ("__gedf2", Compare(cmp_ge)),
    ("__gtsf2", Compare(cmp_ge)),
    ("__gtdf2", Compare(cmp_ge)),
];

pub fn lookup(name: &str) -> Option<Intrinsic> {
    INTRINSICS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, intrinsic)| *intrinsic)
}
