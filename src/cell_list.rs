//! Spatial cell grid and cell linked list.
//!
//! [`CellBox`] partitions the box into cells at least one cutoff wide,
//! precomputes each cell's neighbors and groups cells into
//! parallelization-safe chunks. [`CellLinkedList`] maps the current particle
//! positions onto those cells with the classic head/next arrays.

use crate::error::{DpdError, Result};
use crate::geometry::BoxGeometry;
use crate::{Real, Vector};
use smallvec::SmallVec;

/// End-of-chain marker in [`CellLinkedList`].
pub const NONE: usize = usize::MAX;

/// Fewest cells a periodic axis may have before falling back to brute force.
/// Below three cells a cell becomes its own neighbor through the wrap.
pub const MIN_PERIODIC_CELLS: usize = 3;

pub type NeighborList = SmallVec<[usize; 26]>;

pub struct CellBox {
    counts: [usize; 3],
    cell_len: [Real; 3],
    /// All adjacent cells, symmetric relation, never containing the cell itself.
    neighbors: Vec<NeighborList>,
    /// Subset of `neighbors` with a higher index; each cell pair is walked once.
    forward: Vec<NeighborList>,
    chunks: Vec<Vec<usize>>,
}

impl CellBox {
    /// Builds the grid, or returns `None` when some periodic axis can hold
    /// fewer than `min_cells_per_axis` cells (the caller then pairs brute-force).
    pub fn new(
        geometry: &BoxGeometry,
        cutoff: Real,
        min_cells_per_axis: usize,
    ) -> Result<Option<Self>> {
        geometry.check_cutoff(cutoff)?;
        if min_cells_per_axis < MIN_PERIODIC_CELLS {
            return Err(DpdError::config(format!(
                "min_cells_per_axis must be at least {}, got {}",
                MIN_PERIODIC_CELLS, min_cells_per_axis
            )));
        }
        let lengths = geometry.lengths();
        let periodic = geometry.periodic();
        let mut counts = [1usize; 3];
        let mut cell_len = [0.0 as Real; 3];
        for axis in 0..3 {
            let n = ((lengths[axis] / cutoff).floor() as usize).max(1);
            if periodic[axis] && n < min_cells_per_axis {
                log::warn!(
                    "axis {} holds only {} cells of width >= {} (need {}), using brute-force pairing",
                    axis,
                    n,
                    cutoff,
                    min_cells_per_axis
                );
                return Ok(None);
            }
            counts[axis] = n;
            cell_len[axis] = lengths[axis] / n as Real;
        }

        let total = counts[0] * counts[1] * counts[2];
        let mut neighbors = Vec::with_capacity(total);
        for cell in 0..total {
            neighbors.push(Self::adjacent(cell, counts, periodic));
        }
        let forward = neighbors
            .iter()
            .enumerate()
            .map(|(cell, list)| list.iter().copied().filter(|&n| n > cell).collect())
            .collect();
        let chunks = Self::color(&neighbors);
        log::debug!(
            "cell grid {}x{}x{} ({} cells) split into {} safe chunks",
            counts[0],
            counts[1],
            counts[2],
            total,
            chunks.len()
        );
        Ok(Some(Self {
            counts,
            cell_len,
            neighbors,
            forward,
            chunks,
        }))
    }

    fn adjacent(cell: usize, counts: [usize; 3], periodic: [bool; 3]) -> NeighborList {
        let (x, y, z) = (
            cell % counts[0],
            (cell / counts[0]) % counts[1],
            cell / (counts[0] * counts[1]),
        );
        let coord = [x as isize, y as isize, z as isize];
        let mut list = NeighborList::new();
        for dz in -1isize..=1 {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let shifted = [coord[0] + dx, coord[1] + dy, coord[2] + dz];
                    let mut wrapped = [0usize; 3];
                    let mut inside = true;
                    for axis in 0..3 {
                        let n = counts[axis] as isize;
                        let c = shifted[axis];
                        if c >= 0 && c < n {
                            wrapped[axis] = c as usize;
                        } else if periodic[axis] {
                            wrapped[axis] = c.rem_euclid(n) as usize;
                        } else {
                            inside = false;
                            break;
                        }
                    }
                    if !inside {
                        continue;
                    }
                    let index = wrapped[0] + counts[0] * (wrapped[1] + counts[1] * wrapped[2]);
                    if index != cell && !list.contains(&index) {
                        list.push(index);
                    }
                }
            }
        }
        list
    }

    /// Greedy coloring where two cells conflict when their closed
    /// neighborhoods intersect. Cells of one color therefore write to
    /// disjoint particle sets while walking themselves and their neighbors.
    fn color(neighbors: &[NeighborList]) -> Vec<Vec<usize>> {
        let total = neighbors.len();
        let mut color_of = vec![NONE; total];
        let mut chunks: Vec<Vec<usize>> = Vec::new();
        let mut used: Vec<bool> = Vec::new();
        let mut touched: Vec<usize> = Vec::new();
        for cell in 0..total {
            for flag in used.iter_mut() {
                *flag = false;
            }
            touched.clear();
            touched.push(cell);
            touched.extend(neighbors[cell].iter().copied());
            for &n in neighbors[cell].iter() {
                touched.extend(neighbors[n].iter().copied());
            }
            for &other in &touched {
                let c = color_of[other];
                if c != NONE {
                    used[c] = true;
                }
            }
            let c = match used.iter().position(|&u| !u) {
                Some(c) => c,
                None => {
                    used.push(false);
                    chunks.push(Vec::new());
                    chunks.len() - 1
                }
            };
            color_of[cell] = c;
            chunks[c].push(cell);
        }
        chunks
    }

    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    pub fn cell_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn neighbors(&self, cell: usize) -> &[usize] {
        &self.neighbors[cell]
    }

    pub fn forward_neighbors(&self, cell: usize) -> &[usize] {
        &self.forward[cell]
    }

    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    /// Cell index of a position, clamped into the grid.
    #[inline]
    pub fn cell_of(&self, pos: Vector) -> usize {
        let c = [pos.x, pos.y, pos.z];
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let raw = (c[axis] / self.cell_len[axis]).floor();
            idx[axis] = if raw <= 0.0 {
                0
            } else {
                (raw as usize).min(self.counts[axis] - 1)
            };
        }
        idx[0] + self.counts[0] * (idx[1] + self.counts[1] * idx[2])
    }
}

/// Head/next chains of particles per cell for one position snapshot.
#[derive(Clone, Debug, Default)]
pub struct CellLinkedList {
    head: Vec<usize>,
    next: Vec<usize>,
    epoch: Option<u64>,
}

impl CellLinkedList {
    pub fn new(cell_count: usize, particle_count: usize) -> Self {
        Self {
            head: vec![NONE; cell_count],
            next: vec![NONE; particle_count],
            epoch: None,
        }
    }

    /// O(N) rebuild from positions tagged with the snapshot `epoch`.
    pub fn assign(&mut self, grid: &CellBox, positions: &[Vector], epoch: u64) {
        self.head.clear();
        self.head.resize(grid.cell_count(), NONE);
        self.next.clear();
        self.next.resize(positions.len(), NONE);
        for (i, &pos) in positions.iter().enumerate() {
            let cell = grid.cell_of(pos);
            self.next[i] = self.head[cell];
            self.head[cell] = i;
        }
        self.epoch = Some(epoch);
    }

    pub fn invalidate(&mut self) {
        self.epoch = None;
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn cell_count(&self) -> usize {
        self.head.len()
    }

    pub fn particle_count(&self) -> usize {
        self.next.len()
    }

    #[inline(always)]
    pub fn head(&self, cell: usize) -> usize {
        self.head[cell]
    }

    #[inline(always)]
    pub fn next(&self, particle: usize) -> usize {
        self.next[particle]
    }

    /// Particles of one cell, in chain order.
    pub fn members(&self, cell: usize) -> CellMembers<'_> {
        CellMembers {
            list: self,
            current: self.head[cell],
        }
    }
}

pub struct CellMembers<'a> {
    list: &'a CellLinkedList,
    current: usize,
}

impl Iterator for CellMembers<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.current == NONE {
            return None;
        }
        let out = self.current;
        self.current = self.list.next[out];
        Some(out)
    }
}
