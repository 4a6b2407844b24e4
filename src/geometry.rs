//! Simulation box: lengths, periodic flags and minimum-image arithmetic.

use crate::error::{DpdError, Result};
use crate::{Real, Vector};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxGeometry {
    lengths: [Real; 3],
    half_lengths: [Real; 3],
    periodic: [bool; 3],
}

impl BoxGeometry {
    pub fn new(lengths: [Real; 3], periodic: [bool; 3]) -> Result<Self> {
        for (axis, &len) in lengths.iter().enumerate() {
            if !(len.is_finite() && len > 0.0) {
                return Err(DpdError::config(format!(
                    "box length along axis {} must be positive and finite, got {}",
                    axis, len
                )));
            }
        }
        Ok(Self {
            lengths,
            half_lengths: [lengths[0] * 0.5, lengths[1] * 0.5, lengths[2] * 0.5],
            periodic,
        })
    }

    /// Fully periodic cube.
    pub fn cubic(length: Real) -> Result<Self> {
        Self::new([length; 3], [true; 3])
    }

    pub fn lengths(&self) -> [Real; 3] {
        self.lengths
    }

    pub fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    pub fn volume(&self) -> Real {
        self.lengths[0] * self.lengths[1] * self.lengths[2]
    }

    /// Checks the minimum-image requirement `cutoff <= L/2` on periodic axes.
    pub fn check_cutoff(&self, cutoff: Real) -> Result<()> {
        if !(cutoff.is_finite() && cutoff > 0.0) {
            return Err(DpdError::config(format!(
                "cutoff length must be positive and finite, got {}",
                cutoff
            )));
        }
        for axis in 0..3 {
            if self.periodic[axis] && cutoff > self.half_lengths[axis] {
                return Err(DpdError::config(format!(
                    "cutoff length {} exceeds half the periodic box length {} along axis {}",
                    cutoff, self.lengths[axis], axis
                )));
            }
        }
        Ok(())
    }

    /// Minimum-image correction of one raw coordinate difference.
    #[inline(always)]
    pub fn correct(&self, axis: usize, raw: Real) -> Real {
        let mut corrected = raw;
        if self.periodic[axis] {
            if corrected > self.half_lengths[axis] {
                corrected -= self.lengths[axis];
            } else if corrected < -self.half_lengths[axis] {
                corrected += self.lengths[axis];
            }
        }
        corrected
    }

    /// Minimum-image displacement `a - b`.
    #[inline]
    pub fn displacement(&self, a: Vector, b: Vector) -> Vector {
        Vector::new(
            self.correct(0, a.x - b.x),
            self.correct(1, a.y - b.y),
            self.correct(2, a.z - b.z),
        )
    }

    /// Brings a moved particle back into the box: wraps periodic axes and
    /// reflects at the walls of non-periodic axes, flipping the velocity.
    pub fn confine(&self, pos: &mut Vector, vel: &mut Vector) {
        confine_axis(&mut pos.x, &mut vel.x, self.lengths[0], self.periodic[0]);
        confine_axis(&mut pos.y, &mut vel.y, self.lengths[1], self.periodic[1]);
        confine_axis(&mut pos.z, &mut vel.z, self.lengths[2], self.periodic[2]);
    }

    /// Wraps a coordinate on a periodic axis into `[0, L)`; leaves others untouched.
    pub fn wrap(&self, pos: Vector) -> Vector {
        let mut p = pos;
        let mut dummy = Vector::zero();
        if self.periodic[0] {
            confine_axis(&mut p.x, &mut dummy.x, self.lengths[0], true);
        }
        if self.periodic[1] {
            confine_axis(&mut p.y, &mut dummy.y, self.lengths[1], true);
        }
        if self.periodic[2] {
            confine_axis(&mut p.z, &mut dummy.z, self.lengths[2], true);
        }
        p
    }
}

fn confine_axis(x: &mut Real, v: &mut Real, len: Real, periodic: bool) {
    if periodic {
        if *x < 0.0 || *x >= len {
            *x = x.rem_euclid(len);
            // rem_euclid can round up to len for tiny negative inputs
            if *x >= len {
                *x = 0.0;
            }
        }
    } else if *x < 0.0 {
        *x = -*x;
        *v = -*v;
    } else if *x > len {
        *x = 2.0 * len - *x;
        *v = -*v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn minimum_image_on_periodic_axis() {
        let g = BoxGeometry::cubic(10.0).unwrap();
        assert_abs_diff_eq!(g.correct(0, 9.0), -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.correct(1, -9.5), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(g.correct(2, 4.0), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn non_periodic_axis_keeps_raw_difference() {
        let g = BoxGeometry::new([10.0, 10.0, 10.0], [true, false, true]).unwrap();
        assert_abs_diff_eq!(g.correct(1, 9.0), 9.0, epsilon = 1e-12);
    }

    #[test]
    fn cutoff_above_half_box_is_rejected() {
        let g = BoxGeometry::new([10.0, 1.5, 10.0], [true, true, true]).unwrap();
        assert!(matches!(g.check_cutoff(1.0), Err(DpdError::Config(_))));
        let open = BoxGeometry::new([10.0, 1.5, 10.0], [true, false, true]).unwrap();
        assert!(open.check_cutoff(1.0).is_ok());
    }

    #[test]
    fn confine_wraps_and_reflects() {
        let g = BoxGeometry::new([10.0, 10.0, 10.0], [true, false, true]).unwrap();
        let mut p = Vector::new(10.5, -0.25, -1.0);
        let mut v = Vector::new(1.0, -2.0, 3.0);
        g.confine(&mut p, &mut v);
        assert_abs_diff_eq!(p.x, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(p.z, 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v.y, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn invalid_lengths_are_rejected() {
        assert!(BoxGeometry::new([0.0, 1.0, 1.0], [true; 3]).is_err());
        assert!(BoxGeometry::new([1.0, Real::NAN, 1.0], [true; 3]).is_err());
    }
}
