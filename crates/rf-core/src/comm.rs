//! Global reduction primitives.
//!
//! Values computed over a partition of the cells are combined with these
//! before being compared against tolerances. A serial run uses
//! [`SerialCommunicator`], for which every reduction is the identity.

use crate::numeric::Real;

pub trait Communicator: Send + Sync {
    fn size(&self) -> usize;
    fn rank(&self) -> usize;

    /// Elementwise global sum, in place.
    fn sum(&self, values: &mut [Real]);

    /// Elementwise global maximum, in place.
    fn max(&self, values: &mut [Real]);

    fn sum_scalar(&self, value: Real) -> Real {
        let mut v = [value];
        self.sum(&mut v);
        v[0]
    }

    fn max_scalar(&self, value: Real) -> Real {
        let mut v = [value];
        self.max(&mut v);
        v[0]
    }

    fn is_io_rank(&self) -> bool {
        self.rank() == 0
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn sum(&self, _values: &mut [Real]) {}

    fn max(&self, _values: &mut [Real]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_reductions_are_identity() {
        let comm = SerialCommunicator;
        let mut v = [1.0, -2.0];
        comm.sum(&mut v);
        comm.max(&mut v);
        assert_eq!(v, [1.0, -2.0]);
        assert_eq!(comm.sum_scalar(3.5), 3.5);
        assert!(comm.is_io_rank());
    }
}
