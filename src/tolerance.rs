//! Utilities to approximate equality of floating point values and arrays.
//!
//! Comparisons follow the usual mixed test `|a - b| <= atol + rtol * |b|`,
//! where `b` is the reference value. Graded comparisons report how close two
//! values are rather than a plain yes or no.

use crate::tensors::Ten64;

/// Relative and absolute tolerance for one comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Allowed error proportional to the reference magnitude.
    pub rtol: f64,
    /// Allowed error independent of magnitude.
    pub atol: f64,
}

impl Tolerance {
    #[must_use]
    pub const fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    /// Largest error still accepted against `reference`.
    #[must_use]
    pub fn allowed(&self, reference: f64) -> f64 {
        self.atol + self.rtol * reference.abs()
    }
}

impl Default for Tolerance {
    /// Tolerances suited to central finite differences on `f64`.
    fn default() -> Self {
        Self::new(1e-4, 1e-6)
    }
}

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApproxEquality {
    /// Within a hundredth of the tolerance.
    #[default]
    Precise = 0,

    /// Within a tenth of the tolerance.
    Partial = 1,

    /// Within the tolerance.
    Relative = 2,

    /// Outside the tolerance, or not comparable at all.
    Scarce = 3,
}

impl ApproxEquality {
    /// Whether the comparison passed at all.
    #[must_use]
    pub fn is_close(self) -> bool {
        self != Self::Scarce
    }
}

/// Graded closeness against a reference value.
pub trait RelativeEq<Rhs: ?Sized = Self> {
    /// Rates how close `self` is to `reference` under `tol`.
    fn approx_eq(&self, reference: &Rhs, tol: Tolerance) -> ApproxEquality;
}

impl RelativeEq for f64 {
    fn approx_eq(&self, reference: &Self, tol: Tolerance) -> ApproxEquality {
        let dif = (self - reference).abs();
        let allowed = tol.allowed(*reference);

        // NaN compares false everywhere and falls through
        if dif <= allowed * 1e-2 {
            ApproxEquality::Precise
        } else if dif <= allowed * 1e-1 {
            ApproxEquality::Partial
        } else if dif <= allowed {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl RelativeEq for Ten64 {
    /// The worst rating over all elements. Arrays of different shapes are
    /// never close.
    fn approx_eq(&self, reference: &Self, tol: Tolerance) -> ApproxEquality {
        if self.shape() != reference.shape() {
            return ApproxEquality::Scarce;
        }
        let mut eq = ApproxEquality::Precise;
        for (a, b) in self.iter().zip(reference.iter()) {
            eq = eq.max(a.approx_eq(b, tol));
            if eq == ApproxEquality::Scarce {
                break;
            }
        }
        eq
    }
}

/// Approximates equality under `tol`.
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B, tol: Tolerance) -> bool {
    a.approx_eq(b, tol).is_close()
}
