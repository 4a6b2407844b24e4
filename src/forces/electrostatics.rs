//! Real-space electrostatics between Slater-smeared charges.
//!
//! Only particles with a nonzero charge take part. Their positions are
//! gathered from the master arrays before every pass, paired by a dedicated
//! interaction engine with its own cutoff and scattered back as forces.

use crate::error::{DpdError, Result};
use crate::geometry::BoxGeometry;
use crate::interactions::{EngineSettings, InteractionEngine, Mode, Pair, PairCalculator, PairSource, PassTotals, TaskScratch, Targets};
use crate::parallel::{SharedSlice, WorkerPool};
use crate::particles::ParticleState;
use crate::random::SeedSequence;
use crate::{Real, Vector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElectrostaticsParameters {
    /// Coupling constant `Gamma = e^2 / (kBT eps_0 eps_r rc)` in reduced units.
    pub coupling: Real,
    /// Smearing decay length `lambda`; `beta = 5 / (4 lambda)`.
    pub decay_length: Real,
    pub cutoff: Real,
}

impl ElectrostaticsParameters {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("electrostatics coupling", self.coupling),
            ("electrostatics decay length", self.decay_length),
            ("electrostatics cutoff", self.cutoff),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DpdError::config(format!("{} must be positive, got {}", name, value)));
            }
        }
        Ok(())
    }

    pub fn beta(&self) -> Real {
        1.25 / self.decay_length
    }
}

/// Pair force magnitude and potential of two unit charges at distance `r`,
/// before the `Gamma q_i q_j / 4 pi` prefactor.
#[inline]
pub fn slater(beta: Real, r: Real) -> (Real, Real) {
    let br = beta * r;
    let decay = (-2.0 * br).exp();
    let force = (1.0 - (1.0 + 2.0 * br * (1.0 + br)) * decay) / (r * r);
    let potential = (1.0 - (1.0 + br) * decay) / r;
    (force, potential)
}

/// Gathered charged subset seen by the electrostatics engine.
pub struct ChargedView<'a> {
    pub epoch: u64,
    pub positions: &'a [Vector],
    pub charges: &'a [Real],
    pub force: SharedSlice<'a, Vector>,
}

impl PairSource for ChargedView<'_> {
    fn positions(&self) -> &[Vector] {
        self.positions
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}

struct SlaterCoulomb {
    prefactor: Real,
    beta: Real,
}

impl PairCalculator<ChargedView<'_>> for SlaterCoulomb {
    fn name(&self) -> &'static str {
        "slater coulomb"
    }

    fn targets(&self) -> Targets {
        Targets::FORCE
    }

    fn pair(&self, view: &ChargedView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let qq = self.prefactor * view.charges[pair.i] * view.charges[pair.j];
        let (force, potential) = slater(self.beta, pair.r);
        let f = pair.d * (qq * force / pair.r);
        view.force.update(pair.i, |acc| *acc += f);
        view.force.update(pair.j, |acc| *acc -= f);
        scratch.adders.potential += qq * potential;
        scratch.adders.add_virial(pair.d, f);
        Ok(())
    }
}

/// Calculator that only sums the potential and virial.
struct SlaterEnergy(SlaterCoulomb);

impl PairCalculator<ChargedView<'_>> for SlaterEnergy {
    fn name(&self) -> &'static str {
        "slater coulomb energy"
    }

    fn targets(&self) -> Targets {
        Targets::NONE
    }

    fn pair(&self, view: &ChargedView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let qq = self.0.prefactor * view.charges[pair.i] * view.charges[pair.j];
        let (force, potential) = slater(self.0.beta, pair.r);
        scratch.adders.potential += qq * potential;
        scratch.adders.add_virial(pair.d, pair.d * (qq * force / pair.r));
        Ok(())
    }
}

pub struct Electrostatics {
    params: ElectrostaticsParameters,
    indices: Vec<usize>,
    positions: Vec<Vector>,
    charges: Vec<Real>,
    force: Vec<Vector>,
    engine: InteractionEngine,
}

impl Electrostatics {
    /// Returns `None` when no particle carries a charge.
    pub fn new(
        params: ElectrostaticsParameters,
        geometry: BoxGeometry,
        state: &ParticleState,
        min_cells_per_axis: usize,
        min_cells_per_task: usize,
        pool: Arc<WorkerPool>,
        seeds: &SeedSequence,
    ) -> Result<Option<Self>> {
        params.validate()?;
        let indices: Vec<usize> = state
            .charges
            .iter()
            .enumerate()
            .filter(|(_, q)| **q != 0.0)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            log::info!("electrostatics configured but no particle is charged; skipped");
            return Ok(None);
        }
        let settings = EngineSettings {
            cutoff: params.cutoff,
            min_cells_per_axis,
            min_cells_per_task,
            cache: false,
        };
        let engine = InteractionEngine::new("electrostatics", geometry, settings, indices.len(), pool, seeds)?;
        let charges = indices.iter().map(|&i| state.charges[i]).collect();
        log::debug!("electrostatics over {} charged particles", indices.len());
        Ok(Some(Self {
            params,
            positions: vec![Vector::zero(); indices.len()],
            force: vec![Vector::zero(); indices.len()],
            charges,
            indices,
            engine,
        }))
    }

    pub fn params(&self) -> &ElectrostaticsParameters {
        &self.params
    }

    pub fn charged_count(&self) -> usize {
        self.indices.len()
    }

    fn gather(&mut self, state: &ParticleState) {
        let positions = state.positions();
        for (local, &global) in self.positions.iter_mut().zip(&self.indices) {
            *local = positions[global];
        }
        for f in self.force.iter_mut() {
            *f = Vector::zero();
        }
    }

    fn calculator(&self) -> SlaterCoulomb {
        SlaterCoulomb {
            prefactor: self.params.coupling / (4.0 * std::f64::consts::PI as Real),
            beta: self.params.beta(),
        }
    }

    fn run<C>(&mut self, epoch: u64, calc: &C) -> Result<PassTotals>
    where
        C: for<'a> PairCalculator<ChargedView<'a>>,
    {
        let Self {
            positions,
            charges,
            force,
            engine,
            ..
        } = self;
        // SAFETY: the engine pairs cells chunk by chunk, so concurrent tasks
        // touch disjoint local indices.
        let view = ChargedView {
            epoch,
            positions: positions.as_slice(),
            charges: charges.as_slice(),
            force: unsafe { SharedSlice::new(force) },
        };
        engine.compute(&view, calc, Mode::WithCellAssignment, false)
    }

    /// Adds the electrostatic forces into `state.force`.
    pub fn compute(&mut self, state: &mut ParticleState) -> Result<PassTotals> {
        crate::profile_scope!("electrostatics");
        self.gather(state);
        let calc = self.calculator();
        let totals = self.run(state.epoch(), &calc)?;
        for (&global, &f) in self.indices.iter().zip(&self.force) {
            state.force[global] += f;
        }
        Ok(totals)
    }

    /// Potential and virial at the current positions; forces untouched.
    pub fn measure(&mut self, state: &ParticleState) -> Result<PassTotals> {
        self.gather(state);
        let calc = SlaterEnergy(self.calculator());
        self.run(state.epoch(), &calc)
    }

    pub fn shutdown(&mut self) {
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::ParticleKind;
    use approx::assert_abs_diff_eq;

    fn kind(charge: Real) -> ParticleKind {
        ParticleKind {
            type_index: 0,
            molecule: 0,
            charge,
            mass: 1.0,
            molar_mass: 18.0,
        }
    }

    fn params() -> ElectrostaticsParameters {
        ElectrostaticsParameters {
            coupling: 13.87,
            decay_length: 0.2,
            cutoff: 3.0,
        }
    }

    #[test]
    fn slater_tends_to_coulomb_far_away() {
        let (f, u) = slater(6.25, 2.5);
        assert_abs_diff_eq!(f, 1.0 / 6.25, epsilon = 1e-9);
        assert_abs_diff_eq!(u, 1.0 / 2.5, epsilon = 1e-9);
        // finite at contact: U(0) = beta
        let (_, u0) = slater(6.25, 1e-8);
        assert_abs_diff_eq!(u0, 6.25, epsilon = 1e-5);
    }

    #[test]
    fn only_charged_particles_take_part() {
        let geometry = BoxGeometry::cubic(10.0).unwrap();
        let mut state = ParticleState::with_capacity(3);
        state.push(Vector::new(1.0, 1.0, 1.0), Vector::zero(), kind(1.0));
        state.push(Vector::new(1.5, 1.0, 1.0), Vector::zero(), kind(0.0));
        state.push(Vector::new(2.0, 1.0, 1.0), Vector::zero(), kind(-1.0));
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let seeds = SeedSequence::new(1);
        let mut es = Electrostatics::new(params(), geometry, &state, 3, 1, pool, &seeds)
            .unwrap()
            .unwrap();
        assert_eq!(es.charged_count(), 2);

        let totals = es.compute(&mut state).unwrap();
        let p = params();
        let (f, u) = slater(p.beta(), 1.0);
        let prefactor = p.coupling / (4.0 * std::f64::consts::PI as Real);
        // opposite charges attract
        assert_abs_diff_eq!(state.force[0].x, prefactor * f, epsilon = 1e-9);
        assert_abs_diff_eq!(state.force[2].x, -prefactor * f, epsilon = 1e-9);
        assert_eq!(state.force[1], Vector::zero());
        assert_abs_diff_eq!(totals.potential, -prefactor * u, epsilon = 1e-9);

        let measured = es.measure(&state).unwrap();
        assert_abs_diff_eq!(measured.potential, totals.potential, epsilon = 1e-12);
    }

    #[test]
    fn uncharged_system_needs_no_electrostatics() {
        let geometry = BoxGeometry::cubic(10.0).unwrap();
        let mut state = ParticleState::with_capacity(1);
        state.push(Vector::zero(), Vector::zero(), kind(0.0));
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let es = Electrostatics::new(params(), geometry, &state, 3, 1, pool, &SeedSequence::new(0)).unwrap();
        assert!(es.is_none());
    }

    #[test]
    fn bad_parameters_are_config_errors() {
        let mut p = params();
        p.decay_length = 0.0;
        assert!(matches!(p.validate(), Err(DpdError::Config(_))));
    }
}
