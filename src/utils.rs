use crate::config::SimConfig;
use crate::error::Result;
use crate::forces::bonds::HarmonicBond;
use crate::geometry::BoxGeometry;
use crate::particles::{ParticleKind, ParticleState};
use crate::{Real, Vector};

/// Places every configured molecule at a uniformly random head position and
/// grows the remaining beads as a random walk with the bond rest length as
/// step. Velocities are left at zero.
pub fn build_system(config: &SimConfig) -> Result<(ParticleState, Vec<HarmonicBond>)> {
    let geometry = config.box_geometry()?;
    let species = config.species_indices()?;
    let mut rng = fastrand::Rng::with_seed(config.run.seed);

    let mut state = ParticleState::with_capacity(config.particle_count());
    let mut bonds = Vec::with_capacity(
        config
            .molecules
            .iter()
            .map(|m| m.count * m.bonds_per_molecule())
            .sum(),
    );
    let mut molecule_id = 0;

    for molecule in &config.molecules {
        let step = match molecule.bond {
            Some(bond) if bond.rest_length > 0.0 => bond.rest_length,
            _ => 0.5 * config.dpd.cutoff,
        };
        for _ in 0..molecule.count {
            let mut pos = uniform_point(&mut rng, &geometry);
            for (k, bead) in molecule.beads.iter().enumerate() {
                if k > 0 {
                    pos = place_near(&mut rng, &geometry, pos, step);
                    if let Some(bond) = molecule.bond {
                        let j = state.len();
                        bonds.push(HarmonicBond {
                            i: j - 1,
                            j,
                            rest_length: bond.rest_length,
                            force_constant: bond.force_constant,
                            behavior: bond.behavior,
                        });
                    }
                }
                // validated: every bead names a declared species
                let type_index = species.get(bead.as_str()).copied().unwrap_or_default();
                let species_config = &config.species[type_index];
                state.push(
                    pos,
                    Vector::zero(),
                    ParticleKind {
                        type_index,
                        molecule: molecule_id,
                        charge: species_config.charge,
                        mass: species_config.mass,
                        molar_mass: species_config.molar_mass,
                    },
                );
            }
            molecule_id += 1;
        }
    }

    log::info!(
        "built {} particles in {} molecules with {} bonds",
        state.len(),
        molecule_id,
        bonds.len()
    );
    Ok((state, bonds))
}

fn uniform_point(rng: &mut fastrand::Rng, geometry: &BoxGeometry) -> Vector {
    let l = geometry.lengths();
    Vector::new(
        rng.f64() as Real * l[0],
        rng.f64() as Real * l[1],
        rng.f64() as Real * l[2],
    )
}

fn place_near(rng: &mut fastrand::Rng, geometry: &BoxGeometry, from: Vector, step: Real) -> Vector {
    // uniform direction on the sphere
    let z = 2.0 * rng.f64() as Real - 1.0;
    let phi = rng.f64() as Real * 2.0 * std::f64::consts::PI as Real;
    let s = (1.0 - z * z).max(0.0).sqrt();
    let mut pos = from + Vector::new(s * phi.cos(), s * phi.sin(), z) * step;
    let mut unused = Vector::zero();
    geometry.confine(&mut pos, &mut unused);
    pos
}
