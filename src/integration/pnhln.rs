use super::{drift, kick, Forces, StepContext};
use crate::error::Result;
use crate::forces::dpd::{ConservativeForce, PnhlnForce};
use crate::forces::{Accumulator, ForceReport};
use crate::particles::ParticleState;
use crate::random::RandomDistribution;
use crate::Real;
use rand::rngs::StdRng;

/// Velocity-Verlet with a pairwise Nose-Hoover-Langevin thermostat.
///
/// Each pair's relative velocity is damped by `exp(-xi w^2 dt / mu)` inside
/// the force pass. With `accumulate_g` the thermostat variable follows
/// `dxi = G / Q dt`, optionally with an Ornstein-Uhlenbeck noise of
/// friction `xi_friction` on top.
pub struct Pnhln {
    pub xi: Real,
    pub thermostat_mass: Real,
    pub accumulate_g: bool,
    pub xi_friction: Real,
    rng: StdRng,
}

impl Pnhln {
    pub fn new(xi: Real, thermostat_mass: Real, accumulate_g: bool, xi_friction: Real, rng: StdRng) -> Self {
        Self {
            xi,
            thermostat_mass,
            accumulate_g,
            xi_friction,
            rng,
        }
    }

    pub fn prime(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        let calc = ConservativeForce {
            params: ctx.params,
            target: Accumulator::Force,
        };
        ctx.field.full_pass(state, &calc, false)
    }

    pub fn step(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        let dt = ctx.params.dt;
        kick(ctx.field.pool(), state, 0.5 * dt, Forces::One)?;
        drift(ctx.field.pool(), ctx.geometry, state, dt, None)?;
        let calc = PnhlnForce {
            params: ctx.params,
            xi: self.xi,
            accumulate_g: self.accumulate_g,
        };
        let report = ctx.field.full_pass(state, &calc, false)?;
        kick(ctx.field.pool(), state, 0.5 * dt, Forces::One)?;
        if self.accumulate_g {
            self.update_xi(report.dpd.extra, dt, ctx.params.kbt);
        }
        Ok(report)
    }

    fn update_xi(&mut self, g: Real, dt: Real, kbt: Real) {
        self.xi += dt * g / self.thermostat_mass;
        if self.xi_friction > 0.0 {
            let decay = (-self.xi_friction * dt).exp();
            let spread = (kbt / self.thermostat_mass * (1.0 - decay * decay)).sqrt();
            self.xi = self.xi * decay + spread * RandomDistribution::Gaussian.draw(&mut self.rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeedSequence;

    #[test]
    fn xi_follows_the_feedback_without_noise() {
        let mut p = Pnhln::new(1.0, 10.0, true, 0.0, SeedSequence::new(0).next_stream());
        p.update_xi(5.0, 0.04, 1.0);
        approx::assert_abs_diff_eq!(p.xi, 1.02, epsilon = 1e-12);
        p.update_xi(-5.0, 0.04, 1.0);
        approx::assert_abs_diff_eq!(p.xi, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn xi_noise_relaxes_towards_equilibrium_spread() {
        let mut p = Pnhln::new(0.0, 2.0, true, 1.0, SeedSequence::new(1).next_stream());
        let n = 20_000;
        let mut sum_sq = 0.0;
        for _ in 0..n {
            p.update_xi(0.0, 0.1, 1.0);
            sum_sq += p.xi * p.xi;
        }
        // stationary variance kBT / Q
        let var = sum_sq / n as Real;
        assert!((var - 0.5).abs() < 0.05, "variance {}", var);
    }
}
