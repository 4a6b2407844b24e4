//! Pairwise force and property calculators and the force field that
//! orchestrates them.
//!
//! - [`dpd`]: conservative, random, dissipative and combined DPD forces, the
//!   Shardlow and Nose-Hoover-Langevin pair updates
//! - [`bonds`]: harmonic bonds, chunked for lock-free parallel evaluation
//! - [`electrostatics`]: smeared-charge Coulomb over the charged subset

pub mod bonds;
pub mod dpd;
pub mod electrostatics;

use crate::error::Result;
use crate::interactions::{InteractionEngine, Mode, PairCalculator, PassTotals, Targets};
use crate::parallel::{SharedSlice, WorkerPool};
use crate::particles::{ParticleState, ParticleView};
use crate::profile_scope;
use crate::{Real, Vector};
use bonds::BondSet;
use electrostatics::Electrostatics;
use rayon::prelude::*;
use std::sync::Arc;

/// Fewest particles per task for the per-particle array updates.
pub const MIN_PARTICLES_PER_TASK: usize = 1024;

/// DPD weight `w(r) = 1 - r/rc`.
#[inline(always)]
pub fn weight(r: Real, cutoff: Real) -> Real {
    1.0 - r / cutoff
}

/// `(1/r - 1/rc)`; multiplied by the displacement `d` it equals `w(r) * e`.
#[inline(always)]
pub fn displacement_factor(r: Real, cutoff: Real) -> Real {
    1.0 / r - 1.0 / cutoff
}

/// Force accumulator a calculator writes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accumulator {
    Force,
    ForceTwo,
}

impl Accumulator {
    pub fn targets(self) -> Targets {
        match self {
            Accumulator::Force => Targets::FORCE,
            Accumulator::ForceTwo => Targets::FORCE_TWO,
        }
    }

    #[inline(always)]
    pub fn slice<'v, 'a>(self, view: &'v ParticleView<'a>) -> &'v SharedSlice<'a, Vector> {
        match self {
            Accumulator::Force => &view.force,
            Accumulator::ForceTwo => &view.force_two,
        }
    }
}

/// Totals of one force evaluation, split by contribution.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ForceReport {
    pub dpd: PassTotals,
    pub bonds: PassTotals,
    pub electrostatics: PassTotals,
    /// Interaction engine passes spent (full and cached).
    pub passes: usize,
}

impl ForceReport {
    pub fn potential(&self) -> Real {
        self.dpd.potential + self.bonds.potential + self.electrostatics.potential
    }

    pub fn virial(&self) -> [Real; 3] {
        let mut w = [0.0; 3];
        for totals in [&self.dpd, &self.bonds, &self.electrostatics] {
            for (axis, value) in w.iter_mut().enumerate() {
                *value += totals.pressure[axis];
            }
        }
        w
    }
}

/// DPD pair engine plus the optional bonded and electrostatic contributions,
/// sharing one worker pool.
pub struct ForceField {
    engine: InteractionEngine,
    bonds: Option<BondSet>,
    electrostatics: Option<Electrostatics>,
    pool: Arc<WorkerPool>,
}

impl ForceField {
    pub fn new(
        engine: InteractionEngine,
        bonds: Option<BondSet>,
        electrostatics: Option<Electrostatics>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            engine,
            bonds: bonds.filter(|b| !b.is_empty()),
            electrostatics,
            pool,
        }
    }

    pub fn engine(&self) -> &InteractionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut InteractionEngine {
        &mut self.engine
    }

    pub fn bonds(&self) -> Option<&BondSet> {
        self.bonds.as_ref()
    }

    pub fn electrostatics(&self) -> Option<&Electrostatics> {
        self.electrostatics.as_ref()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn extra_targets(&self) -> Targets {
        if self.bonds.is_some() || self.electrostatics.is_some() {
            Targets::FORCE
        } else {
            Targets::NONE
        }
    }

    /// Zeroes the accumulators `calc`, the bonds and the electrostatics write,
    /// then runs them all on the current positions with a fresh cell assignment.
    pub fn full_pass<C>(&mut self, state: &mut ParticleState, calc: &C, record: bool) -> Result<ForceReport>
    where
        C: for<'a> PairCalculator<ParticleView<'a>>,
    {
        profile_scope!("full_pass");
        zero_targets(&self.pool, state, calc.targets().union(self.extra_targets()))?;
        let mut report = ForceReport {
            dpd: self.engine.compute(&state.view(), calc, Mode::WithCellAssignment, record)?,
            passes: 1,
            ..ForceReport::default()
        };
        if let Some(bonds) = self.bonds.as_mut() {
            report.bonds = bonds.compute(&state.view())?;
        }
        if let Some(electrostatics) = self.electrostatics.as_mut() {
            report.electrostatics = electrostatics.compute(state)?;
        }
        Ok(report)
    }

    /// Zeroes what `calc` writes and replays the recorded pair cache through it.
    pub fn cached_pass<C>(&mut self, state: &mut ParticleState, calc: &C) -> Result<PassTotals>
    where
        C: for<'a> PairCalculator<ParticleView<'a>>,
    {
        profile_scope!("cached_pass");
        zero_targets(&self.pool, state, calc.targets())?;
        self.engine.compute(&state.view(), calc, Mode::WithCache, false)
    }

    /// A DPD pair pass that leaves the accumulators as they are, for
    /// calculators that update velocities in place or only measure.
    pub fn pair_pass<C>(&mut self, state: &mut ParticleState, calc: &C, mode: Mode, record: bool) -> Result<PassTotals>
    where
        C: for<'a> PairCalculator<ParticleView<'a>>,
    {
        self.engine.compute(&state.view(), calc, mode, record)
    }

    /// The best pass mode for positions that have not moved since `epoch`'s
    /// last pass: cache replay, then the existing cell list, then a rebuild.
    pub fn reuse_mode(&self, epoch: u64) -> Mode {
        if self.engine.cache_valid_for(epoch) {
            Mode::WithCache
        } else if self.engine.is_brute_force() || self.engine.cell_list().epoch() == Some(epoch) {
            Mode::WithoutCellAssignment
        } else {
            Mode::WithCellAssignment
        }
    }

    /// Bond and electrostatics totals for the current positions, without
    /// touching the force arrays.
    pub fn measure_extras(&mut self, state: &mut ParticleState) -> Result<(PassTotals, PassTotals)> {
        let bonds = match self.bonds.as_ref() {
            Some(bonds) => bonds.measure(state.positions()),
            None => PassTotals::default(),
        };
        let electrostatics = match self.electrostatics.as_mut() {
            Some(electrostatics) => electrostatics.measure(state)?,
            None => PassTotals::default(),
        };
        Ok((bonds, electrostatics))
    }

    /// Drops every handle on the worker pool and stops its threads.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();
        if let Some(bonds) = self.bonds.as_mut() {
            bonds.shutdown();
        }
        if let Some(electrostatics) = self.electrostatics.as_mut() {
            electrostatics.shutdown();
        }
        if let Some(pool) = Arc::get_mut(&mut self.pool) {
            pool.shutdown();
        }
    }
}

/// Zeroes the force accumulators named in `targets`. Velocities are never
/// zeroed.
pub fn zero_targets(pool: &WorkerPool, state: &mut ParticleState, targets: Targets) -> Result<()> {
    let ParticleState { force, force_two, .. } = state;
    pool.install(|| {
        if targets.force {
            force
                .par_iter_mut()
                .with_min_len(MIN_PARTICLES_PER_TASK)
                .for_each(|f| *f = Vector::zero());
        }
        if targets.force_two {
            force_two
                .par_iter_mut()
                .with_min_len(MIN_PARTICLES_PER_TASK)
                .for_each(|f| *f = Vector::zero());
        }
    })
}

#[cfg(test)]
mod tests;
