//! Structure-of-arrays particle state.

use crate::error::{DpdError, Result};
use crate::parallel::SharedSlice;
use crate::{Real, Vector};
use serde::{Deserialize, Serialize};

/// Parallel per-particle arrays; index `i` is the same particle in every array.
///
/// Positions are only reachable mutably through [`ParticleState::positions_mut`],
/// which advances the snapshot epoch so that stale cell lists and pair caches
/// are detected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticleState {
    positions: Vec<Vector>,
    pub positions_old: Vec<Vector>,
    pub velocities: Vec<Vector>,
    /// Predicted velocities used by semi-implicit dissipative coupling.
    pub velocities_new: Vec<Vector>,
    /// Force accumulator 1 (`F`).
    pub force: Vec<Vector>,
    /// Force accumulator 2 (`Ftwo`), dissipative part of two-stage schemes.
    pub force_two: Vec<Vector>,
    pub types: Vec<usize>,
    pub molecules: Vec<usize>,
    pub charges: Vec<Real>,
    pub masses: Vec<Real>,
    pub molar_masses: Vec<Real>,
    #[serde(skip)]
    epoch: u64,
}

/// Per-particle constants supplied when a particle is added.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleKind {
    pub type_index: usize,
    pub molecule: usize,
    pub charge: Real,
    pub mass: Real,
    pub molar_mass: Real,
}

impl ParticleState {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            positions: Vec::with_capacity(n),
            positions_old: Vec::with_capacity(n),
            velocities: Vec::with_capacity(n),
            velocities_new: Vec::with_capacity(n),
            force: Vec::with_capacity(n),
            force_two: Vec::with_capacity(n),
            types: Vec::with_capacity(n),
            molecules: Vec::with_capacity(n),
            charges: Vec::with_capacity(n),
            masses: Vec::with_capacity(n),
            molar_masses: Vec::with_capacity(n),
            epoch: 0,
        }
    }

    /// Appends one particle. Used while the system is assembled, before
    /// any engine is sized from the particle count.
    pub fn push(&mut self, pos: Vector, vel: Vector, kind: ParticleKind) {
        self.positions.push(pos);
        self.positions_old.push(pos);
        self.velocities.push(vel);
        self.velocities_new.push(vel);
        self.force.push(Vector::zero());
        self.force_two.push(Vector::zero());
        self.types.push(kind.type_index);
        self.molecules.push(kind.molecule);
        self.charges.push(kind.charge);
        self.masses.push(kind.mass);
        self.molar_masses.push(kind.molar_mass);
        self.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vector] {
        &self.positions
    }

    /// Mutable positions; starts a new snapshot epoch.
    pub fn positions_mut(&mut self) -> &mut [Vector] {
        self.epoch += 1;
        &mut self.positions
    }

    /// Snapshot identifier, advanced on every position mutation.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Checks that every array has the same length.
    pub fn validate(&self) -> Result<()> {
        let n = self.positions.len();
        let lens = [
            ("positions_old", self.positions_old.len()),
            ("velocities", self.velocities.len()),
            ("velocities_new", self.velocities_new.len()),
            ("force", self.force.len()),
            ("force_two", self.force_two.len()),
            ("types", self.types.len()),
            ("molecules", self.molecules.len()),
            ("charges", self.charges.len()),
            ("masses", self.masses.len()),
            ("molar_masses", self.molar_masses.len()),
        ];
        for (name, len) in lens {
            if len != n {
                return Err(DpdError::invariant(format!(
                    "particle array {} has length {}, expected {}",
                    name, len, n
                )));
            }
        }
        if let Some(i) = self.masses.iter().position(|&m| !(m > 0.0)) {
            return Err(DpdError::invariant(format!(
                "particle {} has non-positive mass {}",
                i, self.masses[i]
            )));
        }
        Ok(())
    }

    /// Read-only positions plus lock-free shared views of the mutable arrays.
    pub fn view(&mut self) -> ParticleView<'_> {
        // SAFETY: the returned view is handed only to the pair engine, the
        // bond calculator and the integrators, which split work so that
        // concurrent tasks write disjoint particle indices.
        unsafe {
            ParticleView {
                epoch: self.epoch,
                positions: &self.positions,
                velocities: SharedSlice::new(&mut self.velocities),
                velocities_new: SharedSlice::new(&mut self.velocities_new),
                force: SharedSlice::new(&mut self.force),
                force_two: SharedSlice::new(&mut self.force_two),
                types: &self.types,
                charges: &self.charges,
                masses: &self.masses,
            }
        }
    }

    /// Disjoint mutable borrows for the per-particle integration updates.
    /// Starts a new snapshot epoch since positions are handed out mutably.
    pub fn motion(&mut self) -> Motion<'_> {
        self.epoch += 1;
        Motion {
            positions: &mut self.positions,
            positions_old: &mut self.positions_old,
            velocities: &mut self.velocities,
            velocities_new: &mut self.velocities_new,
            force: &self.force,
            force_two: &self.force_two,
            masses: &self.masses,
        }
    }

    /// Velocity arrays with read-only forces. Positions stay untouched, so the
    /// snapshot epoch (and any pair cache recorded for it) survives.
    pub fn kinetics(&mut self) -> Kinetics<'_> {
        Kinetics {
            velocities: &mut self.velocities,
            velocities_new: &mut self.velocities_new,
            force: &self.force,
            force_two: &self.force_two,
            masses: &self.masses,
        }
    }

    /// Total momentum, sum of `m v`.
    pub fn momentum(&self) -> Vector {
        self.velocities
            .iter()
            .zip(&self.masses)
            .fold(Vector::zero(), |acc, (&v, &m)| acc + v * m)
    }
}

pub struct Motion<'a> {
    pub positions: &'a mut [Vector],
    pub positions_old: &'a mut [Vector],
    pub velocities: &'a mut [Vector],
    pub velocities_new: &'a mut [Vector],
    pub force: &'a [Vector],
    pub force_two: &'a [Vector],
    pub masses: &'a [Real],
}

pub struct Kinetics<'a> {
    pub velocities: &'a mut [Vector],
    pub velocities_new: &'a mut [Vector],
    pub force: &'a [Vector],
    pub force_two: &'a [Vector],
    pub masses: &'a [Real],
}

/// What a pair calculator sees of the particles during one pass.
pub struct ParticleView<'a> {
    pub epoch: u64,
    pub positions: &'a [Vector],
    pub velocities: SharedSlice<'a, Vector>,
    pub velocities_new: SharedSlice<'a, Vector>,
    pub force: SharedSlice<'a, Vector>,
    pub force_two: SharedSlice<'a, Vector>,
    pub types: &'a [usize],
    pub charges: &'a [Real],
    pub masses: &'a [Real],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(mass: Real) -> ParticleKind {
        ParticleKind {
            type_index: 0,
            molecule: 0,
            charge: 0.0,
            mass,
            molar_mass: 18.0,
        }
    }

    #[test]
    fn position_mutation_advances_epoch() {
        let mut state = ParticleState::with_capacity(2);
        state.push(Vector::zero(), Vector::zero(), kind(1.0));
        let e = state.epoch();
        let _ = state.positions();
        assert_eq!(state.epoch(), e);
        state.positions_mut()[0].x = 1.0;
        assert_eq!(state.epoch(), e + 1);
    }

    #[test]
    fn motion_starts_a_new_snapshot() {
        let mut state = ParticleState::with_capacity(1);
        state.push(Vector::zero(), Vector::new(1.0, 0.0, 0.0), kind(1.0));
        let e = state.epoch();
        let motion = state.motion();
        motion.positions[0] += motion.velocities[0];
        assert_eq!(state.epoch(), e + 1);
        assert_eq!(state.positions()[0].x, 1.0);
    }

    #[test]
    fn mismatched_arrays_are_an_invariant_error() {
        let mut state = ParticleState::with_capacity(2);
        state.push(Vector::zero(), Vector::zero(), kind(1.0));
        state.validate().unwrap();
        state.charges.push(1.0);
        assert!(matches!(state.validate(), Err(DpdError::Invariant(_))));
    }

    #[test]
    fn zero_mass_is_rejected() {
        let mut state = ParticleState::with_capacity(1);
        state.push(Vector::zero(), Vector::zero(), kind(0.0));
        assert!(state.validate().is_err());
    }

    #[test]
    fn view_writes_reach_the_arrays() {
        let mut state = ParticleState::with_capacity(2);
        state.push(Vector::zero(), Vector::new(1.0, 0.0, 0.0), kind(2.0));
        state.push(Vector::zero(), Vector::new(-1.0, 0.0, 0.0), kind(2.0));
        {
            let view = state.view();
            view.force.update(1, |f| f.y += 3.0);
        }
        assert_eq!(state.force[1].y, 3.0);
        assert_eq!(state.momentum().x, 0.0);
    }
}
