// simulation/simulation.rs
// Contains the Simulation struct: assembly from a config or snapshot, stepping and measurement

use super::thermal;
use crate::config::SimConfig;
use crate::error::{DpdError, Result};
use crate::forces::bonds::{BondSet, HarmonicBond};
use crate::forces::dpd::{ConservativePotential, DpdParameters};
use crate::forces::electrostatics::Electrostatics;
use crate::forces::{ForceField, ForceReport};
use crate::geometry::BoxGeometry;
use crate::integration::{Integrator, StepContext};
use crate::interactions::InteractionEngine;
use crate::io::Snapshot;
use crate::parallel::WorkerPool;
use crate::particles::ParticleState;
use crate::profile_scope;
use crate::random::SeedSequence;
use crate::Real;
use serde::Serialize;
use std::sync::Arc;

/// Potential energy split by contribution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PotentialEnergy {
    pub dpd: Real,
    pub bonds: Real,
    pub electrostatics: Real,
}

impl PotentialEnergy {
    pub fn total(&self) -> Real {
        self.dpd + self.bonds + self.electrostatics
    }
}

/// Instantaneous properties of the current state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Properties {
    pub step: u64,
    pub time: Real,
    pub kinetic_energy: Real,
    /// Per-axis temperature in units of kBT.
    pub temperature: [Real; 3],
    pub potential: PotentialEnergy,
    /// Diagonal of the pressure tensor, `(sum m v_a^2 + W_aa) / V`.
    pub pressure: [Real; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xi: Option<Real>,
}

/// A DPD system together with the force field and the integrator that move it.
pub struct Simulation {
    pub config: SimConfig,
    pub state: ParticleState,
    geometry: BoxGeometry,
    params: DpdParameters,
    field: ForceField,
    integrator: Integrator,
    step: u64,
    primed: bool,
}

impl Simulation {
    /// Builds the configured molecules and draws thermal velocities.
    pub fn from_config(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let (mut state, bonds) = crate::utils::build_system(&config)?;
        let seeds = SeedSequence::new(config.run.seed);
        thermal::assign_maxwell_boltzmann(&mut state, config.dpd.kbt, &mut seeds.next_stream());
        Self::assemble(config, state, bonds, 0, seeds)
    }

    /// Continues from a snapshot; the config supplies everything but the particles.
    pub fn from_snapshot(config: SimConfig, snapshot: Snapshot) -> Result<Self> {
        config.validate()?;
        let Snapshot {
            step, xi, state, bonds, ..
        } = snapshot;
        if let Some(&t) = state.types.iter().max() {
            if t >= config.species.len() {
                return Err(DpdError::config(format!(
                    "snapshot uses particle type {} but only {} species are configured",
                    t,
                    config.species.len()
                )));
            }
        }
        // a restored run continues on a different random stream
        let seeds = SeedSequence::new(config.run.seed ^ step);
        let mut sim = Self::assemble(config, state, bonds, step, seeds)?;
        if let Some(xi) = xi {
            sim.integrator.set_xi(xi);
        }
        Ok(sim)
    }

    fn assemble(
        config: SimConfig,
        state: ParticleState,
        bonds: Vec<HarmonicBond>,
        step: u64,
        seeds: SeedSequence,
    ) -> Result<Self> {
        state.validate()?;
        let geometry = config.box_geometry()?;
        let params = config.dpd_parameters()?;
        let n = state.len();

        let pool = Arc::new(WorkerPool::new(config.tasks())?);
        log::info!(
            "{} particles, {} bonds, box {:?}, {} worker tasks",
            n,
            bonds.len(),
            geometry.lengths(),
            pool.tasks()
        );
        let engine = InteractionEngine::new("dpd", geometry, config.engine_settings(), n, pool.clone(), &seeds)?;
        let bond_set = if bonds.is_empty() {
            None
        } else {
            Some(BondSet::new(
                geometry,
                bonds,
                n,
                pool.clone(),
                config.parallel.min_bonds_per_task,
            )?)
        };
        let electrostatics = match config.electrostatics_parameters() {
            Some(p) => Electrostatics::new(
                p,
                geometry,
                &state,
                config.parallel.min_cells_per_axis,
                config.parallel.min_cells_per_task,
                pool.clone(),
                &seeds,
            )?,
            None => None,
        };
        let field = ForceField::new(engine, bond_set, electrostatics, pool);
        let integrator = Integrator::new(&config.integration, &seeds)?;
        log::info!("integrating with {}, dt = {}", integrator.name(), params.dt);

        Ok(Self {
            config,
            state,
            geometry,
            params,
            field,
            integrator,
            step,
            primed: false,
        })
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn time(&self) -> Real {
        self.step as Real * self.params.dt
    }

    pub fn geometry(&self) -> &BoxGeometry {
        &self.geometry
    }

    pub fn params(&self) -> &DpdParameters {
        &self.params
    }

    pub fn field(&self) -> &ForceField {
        &self.field
    }

    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    /// Computes the forces of the current configuration. Runs once before
    /// the first step, automatically if not called.
    pub fn prime(&mut self) -> Result<ForceReport> {
        let Self {
            state,
            geometry,
            params,
            field,
            integrator,
            ..
        } = self;
        let mut ctx = StepContext {
            params,
            geometry,
            field,
        };
        let report = integrator.prime(&mut ctx, state)?;
        self.primed = true;
        Ok(report)
    }

    pub fn step(&mut self) -> Result<ForceReport> {
        profile_scope!("simulation_step");
        if !self.primed {
            self.prime()?;
        }
        let next = self.step + 1;
        let Self {
            state,
            geometry,
            params,
            field,
            integrator,
            ..
        } = self;
        let mut ctx = StepContext {
            params,
            geometry,
            field,
        };
        let report = integrator.step(&mut ctx, state).map_err(|err| {
            log::error!("step {} failed: {}", next, err);
            err
        })?;
        self.step += 1;
        Ok(report)
    }

    /// Advances `steps` steps, logging progress every `run.report_interval`,
    /// and returns the properties of the final state.
    pub fn run(&mut self, steps: u64) -> Result<Properties> {
        let interval = self.config.run.report_interval;
        for _ in 0..steps {
            let report = self.step()?;
            if interval > 0 && self.step % interval == 0 {
                log::info!(
                    "step {:>8}  t = {:.3}  T = {:.4}  U = {:.4}  passes = {}",
                    self.step,
                    self.time(),
                    thermal::mean_temperature(&self.state),
                    report.potential(),
                    report.passes
                );
            }
        }
        self.measure()
    }

    /// Measures the current state without disturbing the forces, the cell
    /// list or the pair cache the integrator relies on.
    pub fn measure(&mut self) -> Result<Properties> {
        profile_scope!("measure");
        let mode = self.field.reuse_mode(self.state.epoch());
        let calc = ConservativePotential { params: &self.params };
        let dpd = self.field.pair_pass(&mut self.state, &calc, mode, false)?;
        let (bonds, electrostatics) = self.field.measure_extras(&mut self.state)?;

        let kinetic = thermal::kinetic_tensor(&self.state);
        let volume = self.geometry.volume();
        let mut pressure = [0.0; 3];
        for (axis, p) in pressure.iter_mut().enumerate() {
            let virial = dpd.pressure[axis] + bonds.pressure[axis] + electrostatics.pressure[axis];
            *p = (kinetic[axis] + virial) / volume;
        }

        Ok(Properties {
            step: self.step,
            time: self.time(),
            kinetic_energy: 0.5 * (kinetic[0] + kinetic[1] + kinetic[2]),
            temperature: thermal::temperature(&self.state),
            potential: PotentialEnergy {
                dpd: dpd.potential,
                bonds: bonds.potential,
                electrostatics: electrostatics.potential,
            },
            pressure,
            xi: self.integrator.xi(),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            step: self.step,
            time: self.time(),
            xi: self.integrator.xi(),
            state: self.state.clone(),
            bonds: self
                .field
                .bonds()
                .map(|b| b.bonds().to_vec())
                .unwrap_or_default(),
        }
    }

    /// Stops the worker pool. Later steps fail.
    pub fn shutdown(&mut self) {
        self.field.shutdown();
    }
}
