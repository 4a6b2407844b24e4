//! DPD pair calculators.
//!
//! All of them work on the generalized weight `w = 1 - r/rc`:
//! - conservative force `a_ij * w * e`
//! - random force `sigma / sqrt(dt) * zeta * w * e`
//! - dissipative force `-gamma * w^2 * (v_ij . e) * e`
//!
//! where `e = d / r` is the unit displacement from `j` to `i`.

use super::{weight, Accumulator};
use crate::error::{DpdError, Result};
use crate::interactions::{Pair, PairCalculator, TaskScratch, Targets};
use crate::parallel::SharedSlice;
use crate::particles::ParticleView;
use crate::random::RandomDistribution;
use crate::{Real, Vector};
use serde::{Deserialize, Serialize};

/// Symmetric table of repulsion parameters `a_ij` per particle type pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepulsionMatrix {
    types: usize,
    values: Vec<Real>,
}

impl RepulsionMatrix {
    pub fn new(types: usize, default: Real) -> Self {
        Self {
            types,
            values: vec![default; types * types],
        }
    }

    pub fn types(&self) -> usize {
        self.types
    }

    pub fn set(&mut self, a: usize, b: usize, value: Real) -> Result<()> {
        if a >= self.types || b >= self.types {
            return Err(DpdError::config(format!(
                "repulsion pair ({}, {}) outside of {} particle types",
                a, b, self.types
            )));
        }
        self.values[a * self.types + b] = value;
        self.values[b * self.types + a] = value;
        Ok(())
    }

    #[inline(always)]
    pub fn get(&self, a: usize, b: usize) -> Real {
        self.values[a * self.types + b]
    }
}

/// Run-wide DPD constants.
#[derive(Clone, Debug)]
pub struct DpdParameters {
    pub cutoff: Real,
    pub dt: Real,
    pub kbt: Real,
    pub gamma: Real,
    pub sigma: Real,
    pub distribution: RandomDistribution,
    pub repulsion: RepulsionMatrix,
}

impl DpdParameters {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("cutoff", self.cutoff),
            ("time step", self.dt),
            ("kBT", self.kbt),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DpdError::config(format!("{} must be positive, got {}", name, value)));
            }
        }
        if !(self.gamma >= 0.0 && self.sigma >= 0.0) {
            return Err(DpdError::config(format!(
                "gamma and sigma must be non-negative, got {} and {}",
                self.gamma, self.sigma
            )));
        }
        Ok(())
    }

    /// `sigma / sqrt(dt)`, the random force prefactor.
    pub fn random_prefactor(&self) -> Real {
        self.sigma / self.dt.sqrt()
    }
}

/// Which velocity array the dissipative term reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VelocitySource {
    /// `velocities`, explicit coupling.
    Current,
    /// `velocities_new`, the scheme's velocity prediction.
    Predicted,
}

impl VelocitySource {
    #[inline(always)]
    fn slice<'v, 'a>(self, view: &'v ParticleView<'a>) -> &'v SharedSlice<'a, Vector> {
        match self {
            VelocitySource::Current => &view.velocities,
            VelocitySource::Predicted => &view.velocities_new,
        }
    }
}

#[inline(always)]
fn apply(target: &SharedSlice<'_, Vector>, pair: &Pair, f: Vector) {
    target.update(pair.i, |acc| *acc += f);
    target.update(pair.j, |acc| *acc -= f);
}

/// Conservative force plus its potential `a/2 * rc * w^2` and virial.
#[inline(always)]
fn conservative(params: &DpdParameters, view: &ParticleView<'_>, scratch: &mut TaskScratch, pair: &Pair, w: Real, e: Vector) -> Vector {
    let a = params.repulsion.get(view.types[pair.i], view.types[pair.j]);
    let f = e * (a * w);
    scratch.adders.potential += 0.5 * a * params.cutoff * w * w;
    scratch.adders.add_virial(pair.d, f);
    f
}

#[inline(always)]
fn random(params: &DpdParameters, prefactor: Real, scratch: &mut TaskScratch, w: Real, e: Vector) -> Vector {
    let zeta = params.distribution.draw(&mut scratch.rng);
    e * (prefactor * zeta * w)
}

#[inline(always)]
fn dissipative(gamma: Real, velocities: &SharedSlice<'_, Vector>, pair: &Pair, w: Real, e: Vector) -> Vector {
    let v_ij = velocities.get(pair.i) - velocities.get(pair.j);
    e * (-gamma * w * w * v_ij.dot(e))
}

pub struct ConservativeForce<'p> {
    pub params: &'p DpdParameters,
    pub target: Accumulator,
}

impl PairCalculator<ParticleView<'_>> for ConservativeForce<'_> {
    fn name(&self) -> &'static str {
        "conservative force"
    }

    fn targets(&self) -> Targets {
        self.target.targets()
    }

    fn pair(&self, view: &ParticleView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let w = weight(pair.r, self.params.cutoff);
        let e = pair.d / pair.r;
        let f = conservative(self.params, view, scratch, pair, w, e);
        apply(self.target.slice(view), pair, f);
        Ok(())
    }
}

pub struct RandomForce<'p> {
    pub params: &'p DpdParameters,
    pub target: Accumulator,
}

impl PairCalculator<ParticleView<'_>> for RandomForce<'_> {
    fn name(&self) -> &'static str {
        "random force"
    }

    fn targets(&self) -> Targets {
        self.target.targets()
    }

    fn pair(&self, view: &ParticleView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let w = weight(pair.r, self.params.cutoff);
        let e = pair.d / pair.r;
        let f = random(self.params, self.params.random_prefactor(), scratch, w, e);
        scratch.adders.add_virial(pair.d, f);
        apply(self.target.slice(view), pair, f);
        Ok(())
    }
}

pub struct DissipativeForce<'p> {
    pub params: &'p DpdParameters,
    pub source: VelocitySource,
    pub target: Accumulator,
}

impl PairCalculator<ParticleView<'_>> for DissipativeForce<'_> {
    fn name(&self) -> &'static str {
        "dissipative force"
    }

    fn targets(&self) -> Targets {
        self.target.targets()
    }

    fn pair(&self, view: &ParticleView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let w = weight(pair.r, self.params.cutoff);
        let e = pair.d / pair.r;
        let f = dissipative(self.params.gamma, self.source.slice(view), pair, w, e);
        scratch.adders.add_virial(pair.d, f);
        apply(self.target.slice(view), pair, f);
        Ok(())
    }
}

/// Conservative, random and (optionally) dissipative force in one pass.
///
/// Conservative and random terms always go to `force`. The dissipative term
/// goes to `dissipative` when set: `Accumulator::Force` for single-stage
/// schemes, `Accumulator::ForceTwo` for schemes that iterate it separately.
pub struct DpdForce<'p> {
    pub params: &'p DpdParameters,
    pub source: VelocitySource,
    pub dissipative: Option<Accumulator>,
}

impl PairCalculator<ParticleView<'_>> for DpdForce<'_> {
    fn name(&self) -> &'static str {
        "dpd force"
    }

    fn targets(&self) -> Targets {
        match self.dissipative {
            Some(target) => Targets::FORCE.union(target.targets()),
            None => Targets::FORCE,
        }
    }

    fn pair(&self, view: &ParticleView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let w = weight(pair.r, self.params.cutoff);
        let e = pair.d / pair.r;
        let fc = conservative(self.params, view, scratch, pair, w, e);
        let fr = random(self.params, self.params.random_prefactor(), scratch, w, e);
        scratch.adders.add_virial(pair.d, fr);
        match self.dissipative {
            Some(Accumulator::Force) => {
                let fd = dissipative(self.params.gamma, self.source.slice(view), pair, w, e);
                scratch.adders.add_virial(pair.d, fd);
                apply(&view.force, pair, fc + fr + fd);
            }
            Some(Accumulator::ForceTwo) => {
                let fd = dissipative(self.params.gamma, self.source.slice(view), pair, w, e);
                scratch.adders.add_virial(pair.d, fd);
                apply(&view.force, pair, fc + fr);
                apply(&view.force_two, pair, fd);
            }
            None => apply(&view.force, pair, fc + fr),
        }
        Ok(())
    }
}

/// Conservative potential energy and virial only; writes no force.
pub struct ConservativePotential<'p> {
    pub params: &'p DpdParameters,
}

impl PairCalculator<ParticleView<'_>> for ConservativePotential<'_> {
    fn name(&self) -> &'static str {
        "conservative potential"
    }

    fn targets(&self) -> Targets {
        Targets::NONE
    }

    fn pair(&self, view: &ParticleView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let w = weight(pair.r, self.params.cutoff);
        conservative(self.params, view, scratch, pair, w, pair.d / pair.r);
        Ok(())
    }
}

/// Shardlow S1 splitting of the random and dissipative coupling.
///
/// Each pair gets an exact two-half update of its relative velocity along
/// `e`: an explicit half followed by an implicit half solved in closed form,
/// both with the same random number.
pub struct ShardlowUpdate<'p> {
    pub params: &'p DpdParameters,
}

impl PairCalculator<ParticleView<'_>> for ShardlowUpdate<'_> {
    fn name(&self) -> &'static str {
        "shardlow update"
    }

    fn targets(&self) -> Targets {
        Targets::VELOCITIES
    }

    fn pair(&self, view: &ParticleView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let p = self.params;
        let w = weight(pair.r, p.cutoff);
        let e = pair.d / pair.r;
        let inv_mi = 1.0 / view.masses[pair.i];
        let inv_mj = 1.0 / view.masses[pair.j];
        let inv_mu = inv_mi + inv_mj;
        let zeta = p.distribution.draw(&mut scratch.rng);
        let noise = 0.5 * p.sigma * w * zeta * p.dt.sqrt();
        let damp = 0.5 * p.dt * p.gamma * w * w;
        let v = &view.velocities;

        let u1 = (v.get(pair.i) - v.get(pair.j)).dot(e);
        let s1 = noise - damp * u1;
        v.update(pair.i, |vi| *vi += e * (s1 * inv_mi));
        v.update(pair.j, |vj| *vj -= e * (s1 * inv_mj));

        let u1 = (v.get(pair.i) - v.get(pair.j)).dot(e);
        let u2 = (u1 + noise * inv_mu) / (1.0 + damp * inv_mu);
        let s2 = noise - damp * u2;
        v.update(pair.i, |vi| *vi += e * (s2 * inv_mi));
        v.update(pair.j, |vj| *vj -= e * (s2 * inv_mj));
        Ok(())
    }
}

/// Conservative force plus the pairwise Nose-Hoover-Langevin damping.
///
/// The relative velocity along `e` decays as `u' = u * exp(-xi * w^2 * dt / mu)`
/// with the reduced mass `mu`; the momentum change goes straight into the
/// velocities. With `accumulate_g` the thermostat feedback
/// `G = sum w^2 (mu u'^2 - kBT)` is summed into the `extra` adder.
pub struct PnhlnForce<'p> {
    pub params: &'p DpdParameters,
    pub xi: Real,
    pub accumulate_g: bool,
}

impl PairCalculator<ParticleView<'_>> for PnhlnForce<'_> {
    fn name(&self) -> &'static str {
        "pnhln force"
    }

    fn targets(&self) -> Targets {
        Targets::FORCE.union(Targets::VELOCITIES)
    }

    fn pair(&self, view: &ParticleView<'_>, scratch: &mut TaskScratch, pair: &Pair) -> Result<()> {
        let p = self.params;
        let w = weight(pair.r, p.cutoff);
        let e = pair.d / pair.r;
        let fc = conservative(p, view, scratch, pair, w, e);
        apply(&view.force, pair, fc);

        let mi = view.masses[pair.i];
        let mj = view.masses[pair.j];
        let mu = mi * mj / (mi + mj);
        let w_sq = w * w;
        let v = &view.velocities;
        let u = (v.get(pair.i) - v.get(pair.j)).dot(e);
        let u_new = u * (-self.xi * w_sq * p.dt / mu).exp();
        let impulse = mu * (u_new - u);
        v.update(pair.i, |vi| *vi += e * (impulse / mi));
        v.update(pair.j, |vj| *vj -= e * (impulse / mj));
        if self.accumulate_g {
            scratch.adders.extra += w_sq * (mu * u_new * u_new - p.kbt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::{ParticleKind, ParticleState};
    use crate::random::SeedSequence;
    use approx::assert_abs_diff_eq;

    fn params(a: Real) -> DpdParameters {
        DpdParameters {
            cutoff: 1.0,
            dt: 0.04,
            kbt: 1.0,
            gamma: 4.5,
            sigma: 3.0,
            distribution: RandomDistribution::Gaussian,
            repulsion: RepulsionMatrix::new(1, a),
        }
    }

    fn two_particles(d: Vector, vi: Vector) -> ParticleState {
        let kind = ParticleKind {
            type_index: 0,
            molecule: 0,
            charge: 0.0,
            mass: 1.0,
            molar_mass: 18.0,
        };
        let mut state = ParticleState::with_capacity(2);
        state.push(Vector::new(2.0, 2.0, 2.0) + d, vi, kind);
        state.push(Vector::new(2.0, 2.0, 2.0), Vector::zero(), kind);
        state
    }

    fn pair_of(d: Vector) -> Pair {
        Pair {
            i: 0,
            j: 1,
            d,
            r_sq: d.mag_sq(),
            r: d.mag(),
        }
    }

    fn scratch() -> TaskScratch {
        TaskScratch::new(SeedSequence::new(3).next_stream())
    }

    #[test]
    fn conservative_force_is_soft_repulsion() {
        let params = params(25.0);
        let d = Vector::new(0.5, 0.0, 0.0);
        let mut state = two_particles(d, Vector::zero());
        let mut scratch = scratch();
        let calc = ConservativeForce {
            params: &params,
            target: Accumulator::Force,
        };
        calc.pair(&state.view(), &mut scratch, &pair_of(d)).unwrap();
        assert_abs_diff_eq!(state.force[0].x, 12.5, epsilon = 1e-12);
        assert_abs_diff_eq!(state.force[1].x, -12.5, epsilon = 1e-12);
        assert_abs_diff_eq!(scratch.adders.potential, 0.5 * 25.0 * 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(scratch.adders.pressure[0], 0.5 * 12.5, epsilon = 1e-12);
    }

    #[test]
    fn dissipative_force_uses_the_requested_velocity() {
        let params = params(0.0);
        let d = Vector::new(0.0, 0.5, 0.0);
        let mut state = two_particles(d, Vector::new(0.0, -1.0, 0.0));
        state.velocities_new[0] = Vector::new(0.0, -2.0, 0.0);
        for (source, expected) in [(VelocitySource::Current, 4.5 * 0.25), (VelocitySource::Predicted, 2.0 * 4.5 * 0.25)] {
            state.force_two.iter_mut().for_each(|f| *f = Vector::zero());
            let calc = DissipativeForce {
                params: &params,
                source,
                target: Accumulator::ForceTwo,
            };
            calc.pair(&state.view(), &mut scratch(), &pair_of(d)).unwrap();
            // approaching pair is pushed apart
            assert_abs_diff_eq!(state.force_two[0].y, expected, epsilon = 1e-12);
            assert_abs_diff_eq!(state.force_two[1].y, -expected, epsilon = 1e-12);
            assert_eq!(state.force[0], Vector::zero());
        }
    }

    #[test]
    fn random_force_repeats_with_the_same_stream() {
        let params = params(0.0);
        let d = Vector::new(0.3, 0.3, 0.0);
        let calc = RandomForce {
            params: &params,
            target: Accumulator::Force,
        };
        let run = || {
            let mut state = two_particles(d, Vector::zero());
            let mut scratch = scratch();
            for _ in 0..5 {
                calc.pair(&state.view(), &mut scratch, &pair_of(d)).unwrap();
            }
            state.force[0]
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first.mag() > 0.0);
        // force along the pair axis only
        assert_abs_diff_eq!(first.x, first.y, epsilon = 1e-12);
    }

    #[test]
    fn split_dpd_force_routes_dissipation_to_force_two() {
        let params = params(10.0);
        let d = Vector::new(0.0, 0.0, 0.6);
        let mut state = two_particles(d, Vector::new(0.0, 0.0, -1.0));
        let calc = DpdForce {
            params: &params,
            source: VelocitySource::Current,
            dissipative: Some(Accumulator::ForceTwo),
        };
        assert_eq!(calc.targets(), Targets::FORCE.union(Targets::FORCE_TWO));
        calc.pair(&state.view(), &mut scratch(), &pair_of(d)).unwrap();
        let w: Real = 0.4;
        assert_abs_diff_eq!(state.force_two[0].z, 4.5 * w * w, epsilon = 1e-12);
        assert!(state.force[0].z != 0.0);
    }

    #[test]
    fn shardlow_update_conserves_momentum_and_damps() {
        let mut params = params(0.0);
        params.sigma = 0.0;
        let d = Vector::new(0.5, 0.0, 0.0);
        let mut state = two_particles(d, Vector::new(-1.0, 0.0, 0.0));
        ShardlowUpdate { params: &params }
            .pair(&state.view(), &mut scratch(), &pair_of(d))
            .unwrap();
        assert_abs_diff_eq!(state.momentum().x, -1.0, epsilon = 1e-12);
        let u = state.velocities[0].x - state.velocities[1].x;
        assert!(u > -1.0 && u < 0.0, "relative velocity {}", u);
    }

    #[test]
    fn pnhln_damping_matches_exponential_decay() {
        let params = params(0.0);
        let d = Vector::new(0.5, 0.0, 0.0);
        let mut state = two_particles(d, Vector::new(-1.0, 0.0, 0.0));
        let mut scratch = scratch();
        let calc = PnhlnForce {
            params: &params,
            xi: 2.0,
            accumulate_g: true,
        };
        calc.pair(&state.view(), &mut scratch, &pair_of(d)).unwrap();
        let expected = -(-2.0 * 0.25 * 0.04 / 0.5 as Real).exp();
        let u = state.velocities[0].x - state.velocities[1].x;
        assert_abs_diff_eq!(u, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(state.momentum().x, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scratch.adders.extra, 0.25 * (0.5 * expected * expected - 1.0), epsilon = 1e-12);
    }

    #[test]
    fn repulsion_matrix_is_symmetric() {
        let mut m = RepulsionMatrix::new(3, 25.0);
        m.set(0, 2, 40.0).unwrap();
        assert_eq!(m.get(2, 0), 40.0);
        assert_eq!(m.get(1, 1), 25.0);
        assert!(m.set(3, 0, 1.0).is_err());
    }
}
