//! Time integration schemes.
//!
//! Every scheme advances positions and velocities by one time step through an
//! ordered sequence of force field passes:
//! - [`Gwmvv`]: Groot-Warren modified Velocity-Verlet, one pass
//! - [`Scmvv`]: self-consistent MVV, one full pass plus `K` cached passes
//! - [`S1mvv`]: Shardlow splitting followed by Velocity-Verlet
//! - [`Pnhln`]: pairwise Nose-Hoover-Langevin thermostatted Velocity-Verlet
//!
//! A failed pass aborts the step; nothing is rolled back.

mod gwmvv;
mod pnhln;
mod s1mvv;
mod scmvv;


pub use gwmvv::Gwmvv;
pub use pnhln::Pnhln;
pub use s1mvv::S1mvv;
pub use scmvv::Scmvv;

use crate::config::{DEFAULT_GWMVV_LAMBDA, DEFAULT_PNHLN_THERMOSTAT_MASS, DEFAULT_SCMVV_ITERATIONS};
use crate::error::{DpdError, Result};
use crate::forces::dpd::DpdParameters;
use crate::forces::{ForceField, ForceReport, MIN_PARTICLES_PER_TASK};
use crate::geometry::BoxGeometry;
use crate::parallel::WorkerPool;
use crate::particles::{Kinetics, Motion, ParticleState};
use crate::random::SeedSequence;
use crate::{Real, Vector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

fn default_lambda() -> Real {
    DEFAULT_GWMVV_LAMBDA
}

fn default_iterations() -> usize {
    DEFAULT_SCMVV_ITERATIONS
}

fn default_thermostat_mass() -> Real {
    DEFAULT_PNHLN_THERMOSTAT_MASS
}

/// Integration scheme and its parameters as read from the configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Scheme {
    Gwmvv {
        #[serde(default = "default_lambda")]
        lambda: Real,
    },
    Scmvv {
        #[serde(default = "default_iterations")]
        iterations: usize,
    },
    S1mvv,
    Pnhln {
        /// Initial thermostat variable.
        #[serde(default)]
        xi: Real,
        #[serde(default = "default_thermostat_mass")]
        thermostat_mass: Real,
        /// Sum the `G` feedback and let `xi` evolve.
        #[serde(default)]
        accumulate_g: bool,
        /// Langevin friction on `xi`; zero turns the noise off.
        #[serde(default)]
        xi_friction: Real,
    },
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::Gwmvv {
            lambda: DEFAULT_GWMVV_LAMBDA,
        }
    }
}

impl Scheme {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Scheme::Gwmvv { lambda } => {
                if !(lambda.is_finite() && lambda >= 0.0) {
                    return Err(DpdError::config(format!("GWMVV lambda must be non-negative, got {}", lambda)));
                }
            }
            Scheme::Scmvv { iterations } => {
                if iterations == 0 {
                    return Err(DpdError::config("SCMVV needs at least one self-consistency iteration"));
                }
            }
            Scheme::S1mvv => {}
            Scheme::Pnhln {
                xi,
                thermostat_mass,
                xi_friction,
                ..
            } => {
                if !(thermostat_mass.is_finite() && thermostat_mass > 0.0) {
                    return Err(DpdError::config(format!(
                        "PNHLN thermostat mass must be positive, got {}",
                        thermostat_mass
                    )));
                }
                if !(xi.is_finite() && xi_friction.is_finite() && xi_friction >= 0.0) {
                    return Err(DpdError::config(format!(
                        "PNHLN xi {} and friction {} must be finite, friction non-negative",
                        xi, xi_friction
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether the scheme replays the pair cache inside a step.
    pub fn requires_cache(&self) -> bool {
        matches!(self, Scheme::Scmvv { .. })
    }
}

/// Immutable run constants plus the force field a step drives.
pub struct StepContext<'a> {
    pub params: &'a DpdParameters,
    pub geometry: &'a BoxGeometry,
    pub field: &'a mut ForceField,
}

pub enum Integrator {
    Gwmvv(Gwmvv),
    Scmvv(Scmvv),
    S1mvv(S1mvv),
    Pnhln(Pnhln),
}

impl Integrator {
    pub fn new(scheme: &Scheme, seeds: &SeedSequence) -> Result<Self> {
        scheme.validate()?;
        Ok(match *scheme {
            Scheme::Gwmvv { lambda } => Integrator::Gwmvv(Gwmvv { lambda }),
            Scheme::Scmvv { iterations } => Integrator::Scmvv(Scmvv { iterations }),
            Scheme::S1mvv => Integrator::S1mvv(S1mvv),
            Scheme::Pnhln {
                xi,
                thermostat_mass,
                accumulate_g,
                xi_friction,
            } => Integrator::Pnhln(Pnhln::new(xi, thermostat_mass, accumulate_g, xi_friction, seeds.next_stream())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Integrator::Gwmvv(_) => "GWMVV",
            Integrator::Scmvv(_) => "SCMVV",
            Integrator::S1mvv(_) => "S1MVV",
            Integrator::Pnhln(_) => "PNHLN",
        }
    }

    /// Thermostat variable of schemes that carry one.
    pub fn xi(&self) -> Option<Real> {
        match self {
            Integrator::Pnhln(p) => Some(p.xi),
            _ => None,
        }
    }

    /// Restores the thermostat variable, e.g. from a snapshot. Ignored by
    /// schemes without one.
    pub fn set_xi(&mut self, xi: Real) {
        if let Integrator::Pnhln(p) = self {
            p.xi = xi;
        }
    }

    /// Computes the forces of the initial configuration.
    pub fn prime(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        match self {
            Integrator::Gwmvv(s) => s.prime(ctx, state),
            Integrator::Scmvv(s) => s.prime(ctx, state),
            Integrator::S1mvv(s) => s.prime(ctx, state),
            Integrator::Pnhln(s) => s.prime(ctx, state),
        }
    }

    pub fn step(&mut self, ctx: &mut StepContext<'_>, state: &mut ParticleState) -> Result<ForceReport> {
        crate::profile_scope!("integration_step");
        let report = match self {
            Integrator::Gwmvv(s) => s.step(ctx, state),
            Integrator::Scmvv(s) => s.step(ctx, state),
            Integrator::S1mvv(s) => s.step(ctx, state),
            Integrator::Pnhln(s) => s.step(ctx, state),
        }?;
        check_finite(ctx.field.pool(), state, self.name())?;
        Ok(report)
    }
}

/// Which force accumulators an update adds up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Forces {
    /// `force` only.
    One,
    /// `force + force_two`.
    Both,
}

impl Forces {
    #[inline(always)]
    fn total(self, force: &[Vector], force_two: &[Vector], i: usize) -> Vector {
        match self {
            Forces::One => force[i],
            Forces::Both => force[i] + force_two[i],
        }
    }
}

/// `r_old = r; r += dt v (+ dt^2/2 F/m)`, then wrap or reflect into the box.
pub(crate) fn drift(
    pool: &WorkerPool,
    geometry: &BoxGeometry,
    state: &mut ParticleState,
    dt: Real,
    acceleration: Option<Forces>,
) -> Result<()> {
    let Motion {
        positions,
        positions_old,
        velocities,
        force,
        force_two,
        masses,
        ..
    } = state.motion();
    let half_dt_sq = 0.5 * dt * dt;
    pool.install(|| {
        positions
            .par_iter_mut()
            .zip(positions_old.par_iter_mut())
            .zip(velocities.par_iter_mut())
            .enumerate()
            .with_min_len(MIN_PARTICLES_PER_TASK)
            .for_each(|(i, ((r, old), v))| {
                *old = *r;
                let mut dr = *v * dt;
                if let Some(forces) = acceleration {
                    dr += forces.total(force, force_two, i) * (half_dt_sq / masses[i]);
                }
                *r += dr;
                geometry.confine(r, v);
            })
    })
}

/// `v += factor * F / m`.
pub(crate) fn kick(pool: &WorkerPool, state: &mut ParticleState, factor: Real, forces: Forces) -> Result<()> {
    let Kinetics {
        velocities,
        force,
        force_two,
        masses,
        ..
    } = state.kinetics();
    pool.install(|| {
        velocities
            .par_iter_mut()
            .enumerate()
            .with_min_len(MIN_PARTICLES_PER_TASK)
            .for_each(|(i, v)| *v += forces.total(force, force_two, i) * (factor / masses[i]))
    })
}

/// `v_new = v + factor * F / m`.
pub(crate) fn predict(pool: &WorkerPool, state: &mut ParticleState, factor: Real, forces: Forces) -> Result<()> {
    let Kinetics {
        velocities,
        velocities_new,
        force,
        force_two,
        masses,
    } = state.kinetics();
    let velocities: &[Vector] = velocities;
    pool.install(|| {
        velocities_new
            .par_iter_mut()
            .enumerate()
            .with_min_len(MIN_PARTICLES_PER_TASK)
            .for_each(|(i, v_new)| *v_new = velocities[i] + forces.total(force, force_two, i) * (factor / masses[i]))
    })
}

/// `v_new = v`, or the other way round with `reverse`.
pub(crate) fn copy_velocities(state: &mut ParticleState, reverse: bool) {
    let Kinetics {
        velocities,
        velocities_new,
        ..
    } = state.kinetics();
    if reverse {
        velocities.copy_from_slice(velocities_new);
    } else {
        velocities_new.copy_from_slice(velocities);
    }
}

fn check_finite(pool: &WorkerPool, state: &ParticleState, scheme: &'static str) -> Result<()> {
    let bad = pool.install(|| {
        state
            .velocities
            .par_iter()
            .zip(state.positions().par_iter())
            .position_any(|(v, r)| !(v.x.is_finite() && v.y.is_finite() && v.z.is_finite() && r.x.is_finite() && r.y.is_finite() && r.z.is_finite()))
    })?;
    match bad {
        Some(i) => {
            let err = DpdError::computation(scheme, format!("non-finite position or velocity of particle {}", i));
            log::error!("{}", err);
            Err(err)
        }
        None => Ok(()),
    }
}
