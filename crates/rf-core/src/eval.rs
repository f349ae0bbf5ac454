//! Forward-mode derivative values.
//!
//! An [`Eval`] carries a value and its partial derivatives with respect to a
//! fixed set of unknowns. Slots `0..MAX_EQ` hold the primary variables of the
//! reservoir cell the value belongs to; slots `WELL_OFFSET..` hold the primary
//! variables of the well being assembled. Cell quantities therefore enter well
//! computations without re-layout.

use crate::numeric::Real;
use core::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};
use nalgebra::SVector;

/// Maximum number of reservoir equations (water, oil, gas, solvent, polymer).
pub const MAX_EQ: usize = 5;
/// First derivative slot belonging to well unknowns.
pub const WELL_OFFSET: usize = MAX_EQ;
/// Length of the derivative vector.
pub const NUM_DERIVATIVES: usize = 2 * MAX_EQ;

type Derivatives = SVector<Real, NUM_DERIVATIVES>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Eval {
    value: Real,
    derivatives: Derivatives,
}

impl Default for Eval {
    fn default() -> Self {
        Self::constant(0.0)
    }
}

impl From<Real> for Eval {
    fn from(value: Real) -> Self {
        Self::constant(value)
    }
}

impl Eval {
    pub fn constant(value: Real) -> Self {
        Self {
            value,
            derivatives: Derivatives::zeros(),
        }
    }

    /// Independent variable: unit derivative in `slot`.
    pub fn variable(value: Real, slot: usize) -> Self {
        let mut e = Self::constant(value);
        if slot < NUM_DERIVATIVES {
            e.derivatives[slot] = 1.0;
        }
        e
    }

    pub fn value(&self) -> Real {
        self.value
    }

    pub fn set_value(&mut self, value: Real) {
        self.value = value;
    }

    pub fn derivative(&self, slot: usize) -> Real {
        self.derivatives.get(slot).copied().unwrap_or(0.0)
    }

    pub fn set_derivative(&mut self, slot: usize, d: Real) {
        if slot < NUM_DERIVATIVES {
            self.derivatives[slot] = d;
        }
    }

    /// Derivative with respect to well unknown `idx`.
    pub fn well_derivative(&self, idx: usize) -> Real {
        self.derivative(WELL_OFFSET + idx)
    }

    /// Same value, all derivatives dropped.
    pub fn detached(&self) -> Self {
        Self::constant(self.value)
    }

    /// Keep only the derivatives with respect to reservoir unknowns.
    pub fn reservoir_only(&self) -> Self {
        let mut e = *self;
        for slot in WELL_OFFSET..NUM_DERIVATIVES {
            e.derivatives[slot] = 0.0;
        }
        e
    }

    pub fn abs(self) -> Self {
        if self.value < 0.0 { -self } else { self }
    }

    /// Pointwise maximum against a constant; derivatives vanish when the
    /// constant wins.
    pub fn max_const(self, c: Real) -> Self {
        if self.value >= c { self } else { Self::constant(c) }
    }

    pub fn min_const(self, c: Real) -> Self {
        if self.value <= c { self } else { Self::constant(c) }
    }

    pub fn max(self, other: Self) -> Self {
        if self.value >= other.value { self } else { other }
    }

    pub fn min(self, other: Self) -> Self {
        if self.value <= other.value { self } else { other }
    }

    pub fn powi(self, n: i32) -> Self {
        let v = self.value.powi(n);
        let dv = if n == 0 {
            0.0
        } else {
            n as Real * self.value.powi(n - 1)
        };
        Self {
            value: v,
            derivatives: self.derivatives * dv,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.derivatives.iter().all(|d| d.is_finite())
    }
}

impl Neg for Eval {
    type Output = Eval;
    fn neg(self) -> Eval {
        Eval {
            value: -self.value,
            derivatives: -self.derivatives,
        }
    }
}

impl Add for Eval {
    type Output = Eval;
    fn add(self, rhs: Eval) -> Eval {
        Eval {
            value: self.value + rhs.value,
            derivatives: self.derivatives + rhs.derivatives,
        }
    }
}

impl Sub for Eval {
    type Output = Eval;
    fn sub(self, rhs: Eval) -> Eval {
        Eval {
            value: self.value - rhs.value,
            derivatives: self.derivatives - rhs.derivatives,
        }
    }
}

impl Mul for Eval {
    type Output = Eval;
    fn mul(self, rhs: Eval) -> Eval {
        Eval {
            value: self.value * rhs.value,
            derivatives: self.derivatives * rhs.value + rhs.derivatives * self.value,
        }
    }
}

impl Div for Eval {
    type Output = Eval;
    fn div(self, rhs: Eval) -> Eval {
        let inv = 1.0 / rhs.value;
        Eval {
            value: self.value * inv,
            derivatives: (self.derivatives - rhs.derivatives * (self.value * inv)) * inv,
        }
    }
}

impl Add<Real> for Eval {
    type Output = Eval;
    fn add(mut self, rhs: Real) -> Eval {
        self.value += rhs;
        self
    }
}

impl Sub<Real> for Eval {
    type Output = Eval;
    fn sub(mut self, rhs: Real) -> Eval {
        self.value -= rhs;
        self
    }
}

impl Mul<Real> for Eval {
    type Output = Eval;
    fn mul(self, rhs: Real) -> Eval {
        Eval {
            value: self.value * rhs,
            derivatives: self.derivatives * rhs,
        }
    }
}

impl Div<Real> for Eval {
    type Output = Eval;
    fn div(self, rhs: Real) -> Eval {
        self * (1.0 / rhs)
    }
}

impl Add<Eval> for Real {
    type Output = Eval;
    fn add(self, rhs: Eval) -> Eval {
        rhs + self
    }
}

impl Sub<Eval> for Real {
    type Output = Eval;
    fn sub(self, rhs: Eval) -> Eval {
        -rhs + self
    }
}

impl Mul<Eval> for Real {
    type Output = Eval;
    fn mul(self, rhs: Eval) -> Eval {
        rhs * self
    }
}

impl Div<Eval> for Real {
    type Output = Eval;
    fn div(self, rhs: Eval) -> Eval {
        Eval::constant(self) / rhs
    }
}

impl AddAssign for Eval {
    fn add_assign(&mut self, rhs: Eval) {
        *self = *self + rhs;
    }
}

impl SubAssign for Eval {
    fn sub_assign(&mut self, rhs: Eval) {
        *self = *self - rhs;
    }
}

impl MulAssign for Eval {
    fn mul_assign(&mut self, rhs: Eval) {
        *self = *self * rhs;
    }
}

impl DivAssign for Eval {
    fn div_assign(&mut self, rhs: Eval) {
        *self = *self / rhs;
    }
}

impl AddAssign<Real> for Eval {
    fn add_assign(&mut self, rhs: Real) {
        self.value += rhs;
    }
}

impl SubAssign<Real> for Eval {
    fn sub_assign(&mut self, rhs: Real) {
        self.value -= rhs;
    }
}

impl MulAssign<Real> for Eval {
    fn mul_assign(&mut self, rhs: Real) {
        *self = *self * rhs;
    }
}

impl DivAssign<Real> for Eval {
    fn div_assign(&mut self, rhs: Real) {
        *self = *self / rhs;
    }
}

impl core::iter::Sum for Eval {
    fn sum<I: Iterator<Item = Eval>>(iter: I) -> Eval {
        iter.fold(Eval::constant(0.0), |acc, e| acc + e)
    }
}
