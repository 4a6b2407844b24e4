use super::{drift, kick, predict, copy_velocities, Forces, StepContext};
use crate::error::Result;
use crate::forces::dpd::{DpdForce, DpdParameters, VelocitySource};
use crate::forces::{Accumulator, ForceReport};
use crate::particles::ParticleState;
use crate::Real;

/// Groot-Warren modified Velocity-Verlet.
///
/// The dissipative force of the single pass is evaluated with the predicted
/// velocity `v + lambda dt F/m`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gwmvv {
    pub lambda: Real,
}

fn calculator(params: &DpdParameters) -> DpdForce<'_> {
    DpdForce {
        params,
        source: VelocitySource::Predicted,
        dissipative: Some(Accumulator::Force),
    }
}

impl Gwmvv {
    pub fn prime(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        copy_velocities(state, false);
        ctx.field.full_pass(state, &calculator(ctx.params), false)
    }

    pub fn step(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        let dt = ctx.params.dt;
        drift(ctx.field.pool(), ctx.geometry, state, dt, Some(Forces::One))?;
        predict(ctx.field.pool(), state, self.lambda * dt, Forces::One)?;
        kick(ctx.field.pool(), state, 0.5 * dt, Forces::One)?;
        let report = ctx.field.full_pass(state, &calculator(ctx.params), false)?;
        kick(ctx.field.pool(), state, 0.5 * dt, Forces::One)?;
        Ok(report)
    }
}
