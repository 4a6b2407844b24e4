//! Harmonic bonds.
//!
//! Bonds are reordered into chunks in which no particle appears twice
//! (greedy edge coloring), so every bond of a chunk can be evaluated
//! concurrently while writing straight into the shared force array.

use crate::error::{DpdError, Result};
use crate::geometry::BoxGeometry;
use crate::interactions::{AdderGroup, PassTotals};
use crate::parallel::{guarded, split_ranges, WorkerPool};
use crate::particles::ParticleView;
use crate::profile_scope;
use crate::{Real, Vector};
use crossbeam::utils::CachePadded;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::ops::Range;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BondBehavior {
    /// Always active.
    #[default]
    Default,
    /// Only pulls a stretched bond back, `r > r0`.
    Attractive,
    /// Only pushes a compressed bond apart, `r < r0`.
    Repulsive,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarmonicBond {
    pub i: usize,
    pub j: usize,
    pub rest_length: Real,
    /// Includes the usual factor 1/2: `U = k (r - r0)^2`.
    pub force_constant: Real,
    #[serde(default)]
    pub behavior: BondBehavior,
}

impl HarmonicBond {
    /// Force on `i` and potential for the minimum-image displacement
    /// `d = r_i - r_j`, or `None` when the bond is inactive.
    #[inline]
    pub fn evaluate(&self, d: Vector) -> Option<(Vector, Real)> {
        let r = d.mag();
        if r <= 0.0 {
            return None;
        }
        let deviation = r - self.rest_length;
        let active = match self.behavior {
            BondBehavior::Default => true,
            BondBehavior::Attractive => deviation > 0.0,
            BondBehavior::Repulsive => deviation < 0.0,
        };
        if !active {
            return None;
        }
        let force = d * (-self.force_constant * deviation / r);
        Some((force, self.force_constant * deviation * deviation))
    }
}

/// Bond topology with its parallel evaluation plan.
pub struct BondSet {
    geometry: BoxGeometry,
    bonds: Vec<HarmonicBond>,
    chunks: Vec<Range<usize>>,
    plan: Vec<Vec<Range<usize>>>,
    scratch: Vec<CachePadded<AdderGroup>>,
    pool: Option<Arc<WorkerPool>>,
}

impl BondSet {
    pub fn new(
        geometry: BoxGeometry,
        bonds: Vec<HarmonicBond>,
        particle_count: usize,
        pool: Arc<WorkerPool>,
        min_bonds_per_task: usize,
    ) -> Result<Self> {
        for (n, bond) in bonds.iter().enumerate() {
            if bond.i >= particle_count || bond.j >= particle_count || bond.i == bond.j {
                return Err(DpdError::config(format!(
                    "bond {} joins particles {} and {} of {}",
                    n, bond.i, bond.j, particle_count
                )));
            }
            if !(bond.force_constant >= 0.0 && bond.rest_length >= 0.0) {
                return Err(DpdError::config(format!(
                    "bond {} needs non-negative force constant and rest length, got {} and {}",
                    n, bond.force_constant, bond.rest_length
                )));
            }
        }

        let colors = color_bonds(&bonds, particle_count);
        let color_count = colors.iter().max().map_or(0, |&c| c + 1);
        let mut grouped: Vec<Vec<HarmonicBond>> = vec![Vec::new(); color_count];
        for (bond, &color) in bonds.iter().zip(&colors) {
            grouped[color].push(*bond);
        }
        let mut ordered = Vec::with_capacity(bonds.len());
        let mut chunks = Vec::with_capacity(color_count);
        for group in grouped {
            let start = ordered.len();
            ordered.extend(group);
            chunks.push(start..ordered.len());
        }
        let plan: Vec<Vec<Range<usize>>> = chunks
            .iter()
            .map(|chunk| {
                split_ranges(chunk.len(), pool.tasks(), min_bonds_per_task)
                    .into_iter()
                    .map(|r| chunk.start + r.start..chunk.start + r.end)
                    .collect()
            })
            .collect();
        let slots = plan.iter().map(Vec::len).max().unwrap_or(1).max(1);
        log::debug!(
            "{} bonds in {} conflict-free chunks, up to {} tasks per chunk",
            ordered.len(),
            chunks.len(),
            slots
        );

        Ok(Self {
            geometry,
            bonds: ordered,
            chunks,
            plan,
            scratch: (0..slots).map(|_| CachePadded::new(AdderGroup::default())).collect(),
            pool: Some(pool),
        })
    }

    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }

    /// Bonds in evaluation order, chunk by chunk.
    pub fn bonds(&self) -> &[HarmonicBond] {
        &self.bonds
    }

    pub fn chunks(&self) -> impl Iterator<Item = &[HarmonicBond]> + '_ {
        self.chunks.iter().map(|c| &self.bonds[c.clone()])
    }

    /// Adds every active bond force into `view.force`.
    pub fn compute(&mut self, view: &ParticleView<'_>) -> Result<PassTotals> {
        profile_scope!("bonds");
        let Self {
            geometry,
            bonds,
            plan,
            scratch,
            pool,
            ..
        } = self;
        let pool = pool
            .as_deref()
            .ok_or_else(|| DpdError::computation("bonds", "bond set has been shut down"))?;
        let geometry: &BoxGeometry = geometry;
        let bonds: &[HarmonicBond] = bonds;
        for slot in scratch.iter_mut() {
            slot.reset();
        }

        let apply = |range: &Range<usize>, adders: &mut AdderGroup| -> Result<()> {
            for bond in &bonds[range.clone()] {
                let positions = view.positions;
                let d = geometry.displacement(positions[bond.i], positions[bond.j]);
                if let Some((f, potential)) = bond.evaluate(d) {
                    if !(f.x.is_finite() && f.y.is_finite() && f.z.is_finite()) {
                        return Err(DpdError::computation(
                            "bonds",
                            format!("non-finite force on bond {}-{}", bond.i, bond.j),
                        ));
                    }
                    view.force.update(bond.i, |acc| *acc += f);
                    view.force.update(bond.j, |acc| *acc -= f);
                    adders.potential += potential;
                    adders.add_virial(d, f);
                }
            }
            Ok(())
        };

        guarded("bond pass", || {
            for ranges in plan.iter() {
                if ranges.len() == 1 {
                    apply(&ranges[0], &mut *scratch[0])?;
                    continue;
                }
                let slots = &mut scratch[..ranges.len()];
                pool.install(|| {
                    slots
                        .par_iter_mut()
                        .zip(ranges.par_iter())
                        .try_for_each(|(slot, range)| apply(range, &mut **slot))
                })??;
            }
            Ok(())
        })?;

        let mut totals = PassTotals::default();
        for slot in scratch.iter() {
            totals.merge(slot);
        }
        Ok(totals)
    }

    /// Bond potential and virial for `positions`; sequential, writes nothing.
    pub fn measure(&self, positions: &[Vector]) -> PassTotals {
        let mut totals = PassTotals::default();
        for bond in &self.bonds {
            let d = self.geometry.displacement(positions[bond.i], positions[bond.j]);
            if let Some((f, potential)) = bond.evaluate(d) {
                totals.potential += potential;
                totals.add_virial(d, f);
            }
        }
        totals
    }

    pub fn shutdown(&mut self) {
        self.pool = None;
    }
}

/// Greedy edge coloring: each bond gets the lowest color not yet used by
/// either of its particles.
fn color_bonds(bonds: &[HarmonicBond], particle_count: usize) -> Vec<usize> {
    let mut used: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); particle_count];
    bonds
        .iter()
        .map(|bond| {
            let mut color = 0;
            while used[bond.i].contains(&color) || used[bond.j].contains(&color) {
                color += 1;
            }
            used[bond.i].push(color);
            used[bond.j].push(color);
            color
        })
        .collect()
}
