use super::{drift, kick, Forces, StepContext};
use crate::error::Result;
use crate::forces::dpd::{ConservativeForce, ShardlowUpdate};
use crate::forces::{Accumulator, ForceReport};
use crate::interactions::Mode;
use crate::particles::ParticleState;

/// Shardlow S1 splitting: a pairwise sweep solves the random and dissipative
/// coupling exactly, then Velocity-Verlet integrates the conservative part.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct S1mvv;

impl S1mvv {
    pub fn prime(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        let record = ctx.field.engine().cache_enabled();
        let calc = ConservativeForce {
            params: ctx.params,
            target: Accumulator::Force,
        };
        ctx.field.full_pass(state, &calc, record)
    }

    pub fn step(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        let dt = ctx.params.dt;
        // the pairs recorded at the end of the previous step are still valid
        let mode = if ctx.field.engine().cache_valid_for(state.epoch()) {
            Mode::WithCache
        } else {
            Mode::WithCellAssignment
        };
        ctx.field
            .pair_pass(state, &ShardlowUpdate { params: ctx.params }, mode, false)?;

        kick(ctx.field.pool(), state, 0.5 * dt, Forces::One)?;
        drift(ctx.field.pool(), ctx.geometry, state, dt, None)?;
        let record = ctx.field.engine().cache_enabled();
        let calc = ConservativeForce {
            params: ctx.params,
            target: Accumulator::Force,
        };
        let mut report = ctx.field.full_pass(state, &calc, record)?;
        kick(ctx.field.pool(), state, 0.5 * dt, Forces::One)?;
        report.passes += 1;
        Ok(report)
    }
}
