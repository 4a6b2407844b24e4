use super::{copy_velocities, drift, kick, predict, Forces, StepContext};
use crate::error::Result;
use crate::forces::dpd::{DissipativeForce, DpdForce, DpdParameters, VelocitySource};
use crate::forces::{Accumulator, ForceReport};
use crate::particles::ParticleState;

/// Self-consistent modified Velocity-Verlet.
///
/// Conservative and random forces (plus bonds and electrostatics) go to
/// `force` in one recorded pass. The dissipative force in `force_two` is then
/// iterated `iterations` times against the velocity estimate by replaying the
/// recorded pair cache, since positions do not move within the step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scmvv {
    pub iterations: usize,
}

fn dissipative(params: &DpdParameters) -> DissipativeForce<'_> {
    DissipativeForce {
        params,
        source: VelocitySource::Predicted,
        target: Accumulator::ForceTwo,
    }
}

impl Scmvv {
    pub fn prime(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        let calc = DpdForce {
            params: ctx.params,
            source: VelocitySource::Current,
            dissipative: Some(Accumulator::ForceTwo),
        };
        ctx.field.full_pass(state, &calc, false)
    }

    pub fn step(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        let dt = ctx.params.dt;
        drift(ctx.field.pool(), ctx.geometry, state, dt, Some(Forces::Both))?;
        kick(ctx.field.pool(), state, 0.5 * dt, Forces::Both)?;

        let conservative_random = DpdForce {
            params: ctx.params,
            source: VelocitySource::Current,
            dissipative: None,
        };
        let mut report = ctx.field.full_pass(state, &conservative_random, true)?;
        predict(ctx.field.pool(), state, 0.5 * dt, Forces::One)?;

        let calc = dissipative(ctx.params);
        for iteration in 0..self.iterations {
            let totals = ctx.field.cached_pass(state, &calc)?;
            predict(ctx.field.pool(), state, 0.5 * dt, Forces::Both)?;
            report.passes += 1;
            if iteration + 1 == self.iterations {
                report.dpd.merge(&totals);
            }
        }
        copy_velocities(state, true);
        Ok(report)
    }
}
