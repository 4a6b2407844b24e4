// thermal.rs
// Kinetic energy, temperature and thermal velocity initialization

use crate::particles::ParticleState;
use crate::random::RandomDistribution;
use crate::{Real, Vector};
use rand::Rng;

/// Total kinetic energy `sum m v^2 / 2`.
pub fn kinetic_energy(state: &ParticleState) -> Real {
    state
        .velocities
        .iter()
        .zip(&state.masses)
        .map(|(v, &m)| 0.5 * m * v.mag_sq())
        .sum()
}

/// Per-axis kinetic sums `sum m v_a^2`, the kinetic part of the pressure tensor.
pub fn kinetic_tensor(state: &ParticleState) -> [Real; 3] {
    let mut t = [0.0; 3];
    for (v, &m) in state.velocities.iter().zip(&state.masses) {
        t[0] += m * v.x * v.x;
        t[1] += m * v.y * v.y;
        t[2] += m * v.z * v.z;
    }
    t
}

/// Per-axis temperature in units of kBT. One degree of freedom per axis is
/// taken by the conserved total momentum.
pub fn temperature(state: &ParticleState) -> [Real; 3] {
    let dof = state.len().saturating_sub(1).max(1) as Real;
    let t = kinetic_tensor(state);
    [t[0] / dof, t[1] / dof, t[2] / dof]
}

pub fn mean_temperature(state: &ParticleState) -> Real {
    let t = temperature(state);
    (t[0] + t[1] + t[2]) / 3.0
}

/// Subtracts the center-of-mass velocity.
pub fn remove_drift(state: &mut ParticleState) {
    let total_mass: Real = state.masses.iter().sum();
    if total_mass <= 0.0 {
        return;
    }
    let drift = state.momentum() / total_mass;
    for v in state.velocities.iter_mut() {
        *v -= drift;
    }
}

/// Draws Maxwell-Boltzmann velocities at `kbt`, removes the center-of-mass
/// motion and rescales to hit `kbt` exactly.
pub fn assign_maxwell_boltzmann<R: Rng>(state: &mut ParticleState, kbt: Real, rng: &mut R) {
    if state.is_empty() {
        return;
    }
    let ParticleState {
        velocities, masses, ..
    } = state;
    for (v, &m) in velocities.iter_mut().zip(masses.iter()) {
        let spread = (kbt / m).sqrt();
        *v = Vector::new(
            RandomDistribution::Gaussian.draw(rng),
            RandomDistribution::Gaussian.draw(rng),
            RandomDistribution::Gaussian.draw(rng),
        ) * spread;
    }
    remove_drift(state);
    let current = mean_temperature(state);
    if current > 0.0 && state.len() > 1 {
        let scale = (kbt / current).sqrt();
        for v in state.velocities.iter_mut() {
            *v *= scale;
        }
    }
    state.velocities_new.copy_from_slice(&state.velocities);
}
