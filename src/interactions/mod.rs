//! Particle-pair interaction engine.
//!
//! Discovers every particle pair closer than the cutoff, either through the
//! cell grid (`O(N)`) or by brute force when the box is too small for cells,
//! and hands each accepted pair to a [`PairCalculator`]. Work is split chunk
//! by chunk: chunks run one after another, the cells of one chunk are spread
//! over the worker tasks. Since no two cells of a chunk share a neighbor,
//! the tasks write disjoint particles and need no locks.

pub mod adders;
pub mod cache;


pub use adders::{AdderGroup, PassTotals, TaskScratch};
pub use cache::{Pair, PairCache, PairCacheGrid};

use crate::cell_list::{CellBox, CellLinkedList, NONE};
use crate::error::{DpdError, Result};
use crate::geometry::BoxGeometry;
use crate::parallel::{guarded, split_ranges, WorkerPool};
use crate::particles::ParticleView;
use crate::profile_scope;
use crate::random::SeedSequence;
use crate::{Real, Vector};
use crossbeam::utils::CachePadded;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;

/// Rough number of accepted pairs per particle used to pre-size the cache.
pub const CACHE_PAIRS_PER_PARTICLE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Rebuild the cell linked list from the current positions, then pair.
    WithCellAssignment,
    /// Pair using the linked list already built for these positions.
    WithoutCellAssignment,
    /// Skip neighbor search and replay the cached pairs.
    WithCache,
}

/// Shared accumulators a calculator writes during a pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Targets {
    pub force: bool,
    pub force_two: bool,
    pub velocities: bool,
}

impl Targets {
    pub const NONE: Targets = Targets {
        force: false,
        force_two: false,
        velocities: false,
    };
    pub const FORCE: Targets = Targets {
        force: true,
        force_two: false,
        velocities: false,
    };
    pub const FORCE_TWO: Targets = Targets {
        force: false,
        force_two: true,
        velocities: false,
    };
    pub const VELOCITIES: Targets = Targets {
        force: false,
        force_two: false,
        velocities: true,
    };

    pub fn union(self, other: Targets) -> Targets {
        Targets {
            force: self.force || other.force,
            force_two: self.force_two || other.force_two,
            velocities: self.velocities || other.velocities,
        }
    }
}

/// Position snapshot the engine pairs over.
pub trait PairSource: Sync {
    fn positions(&self) -> &[Vector];
    fn epoch(&self) -> u64;
}

impl PairSource for ParticleView<'_> {
    fn positions(&self) -> &[Vector] {
        self.positions
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Per-pair routine. Implementations may only write the accumulator slots
/// of `pair.i` and `pair.j`; that is what makes the chunked parallel walk
/// collision free.
pub trait PairCalculator<V: ?Sized>: Sync {
    fn name(&self) -> &'static str;

    fn targets(&self) -> Targets;

    fn pair(&self, view: &V, scratch: &mut TaskScratch, pair: &Pair) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineSettings {
    pub cutoff: Real,
    /// Fewest cells along a periodic axis before falling back to brute force.
    pub min_cells_per_axis: usize,
    /// Fewest cells a task gets inside one chunk.
    pub min_cells_per_task: usize,
    pub cache: bool,
}

pub struct InteractionEngine {
    name: &'static str,
    geometry: BoxGeometry,
    cutoff_sq: Real,
    particle_count: usize,
    grid: Option<CellBox>,
    cells: CellLinkedList,
    /// Per chunk, the cell ranges handed to the task slots.
    plan: Vec<Vec<Range<usize>>>,
    pool: Option<Arc<WorkerPool>>,
    scratch: Vec<CachePadded<TaskScratch>>,
    cache: PairCacheGrid,
    cache_enabled: bool,
    cache_epoch: Option<u64>,
}

impl InteractionEngine {
    pub fn new(
        name: &'static str,
        geometry: BoxGeometry,
        settings: EngineSettings,
        particle_count: usize,
        pool: Arc<WorkerPool>,
        seeds: &SeedSequence,
    ) -> Result<Self> {
        if settings.min_cells_per_task == 0 {
            return Err(DpdError::config("min_cells_per_task must be at least 1"));
        }
        let grid = CellBox::new(&geometry, settings.cutoff, settings.min_cells_per_axis)?;
        let tasks = pool.tasks();
        let plan: Vec<Vec<Range<usize>>> = match &grid {
            Some(grid) => grid
                .chunks()
                .iter()
                .map(|chunk| split_ranges(chunk.len(), tasks, settings.min_cells_per_task))
                .collect(),
            None => vec![vec![0..particle_count]],
        };
        let slots = plan.iter().map(Vec::len).max().unwrap_or(1).max(1);
        let scratch = (0..slots)
            .map(|_| CachePadded::new(TaskScratch::new(seeds.next_stream())))
            .collect();

        let shape: Vec<usize> = plan.iter().map(Vec::len).collect();
        let capacity = if settings.cache {
            let total_slots: usize = shape.iter().sum::<usize>().max(1);
            (particle_count * CACHE_PAIRS_PER_PARTICLE).div_ceil(total_slots)
        } else {
            0
        };
        let cache = PairCacheGrid::new(&shape, capacity);

        let cells = match &grid {
            Some(grid) => CellLinkedList::new(grid.cell_count(), particle_count),
            None => CellLinkedList::default(),
        };
        match &grid {
            Some(grid) => log::debug!(
                "{}: {} particles, {} chunks over {} cells, up to {} tasks per chunk",
                name,
                particle_count,
                grid.chunks().len(),
                grid.cell_count(),
                slots
            ),
            None => log::debug!(
                "{}: {} particles, brute-force pairing on a single task",
                name,
                particle_count
            ),
        }

        Ok(Self {
            name,
            geometry,
            cutoff_sq: settings.cutoff * settings.cutoff,
            particle_count,
            grid,
            cells,
            plan,
            pool: Some(pool),
            scratch,
            cache,
            cache_enabled: settings.cache,
            cache_epoch: None,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_brute_force(&self) -> bool {
        self.grid.is_none()
    }

    pub fn grid(&self) -> Option<&CellBox> {
        self.grid.as_ref()
    }

    pub fn geometry(&self) -> &BoxGeometry {
        &self.geometry
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    /// Number of task slots (per-task scratch instances).
    pub fn task_slots(&self) -> usize {
        self.scratch.len()
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// Whether the cache describes the snapshot `epoch`.
    pub fn cache_valid_for(&self, epoch: u64) -> bool {
        self.cache_enabled && self.cache_epoch == Some(epoch)
    }

    pub fn cached_pairs(&self) -> impl Iterator<Item = Pair> + '_ {
        self.cache.pairs()
    }

    pub fn cell_list(&self) -> &CellLinkedList {
        &self.cells
    }

    /// Drops cache and linked list validity, e.g. after external edits.
    pub fn invalidate(&mut self) {
        self.cache_epoch = None;
        self.cells.invalidate();
    }

    /// Builds the linked list for the view's snapshot without pairing.
    pub fn assign_cells<V: PairSource + ?Sized>(&mut self, view: &V) -> Result<()> {
        self.check_count(view.positions().len())?;
        if let Some(grid) = &self.grid {
            self.cells.assign(grid, view.positions(), view.epoch());
        }
        Ok(())
    }

    /// Takes over a linked list built elsewhere on the same grid.
    pub fn adopt_cell_list(&mut self, list: &CellLinkedList) -> Result<()> {
        let cell_count = self.grid.as_ref().map_or(0, CellBox::cell_count);
        if list.cell_count() != cell_count || list.particle_count() != self.particle_count {
            return Err(DpdError::invariant(format!(
                "{}: cell list shape {}x{} does not match {}x{}",
                self.name,
                list.cell_count(),
                list.particle_count(),
                cell_count,
                self.particle_count
            )));
        }
        self.cells.clone_from(list);
        Ok(())
    }

    /// Moves the recorded pair cache of `other` into this engine. Both must
    /// share the same grid and task layout.
    pub fn transplant_cache_from(&mut self, other: &mut InteractionEngine) -> Result<()> {
        if !self.cache_enabled || !other.cache_enabled {
            return Err(DpdError::CacheInactive);
        }
        if self.cache.shape() != other.cache.shape() || self.particle_count != other.particle_count {
            return Err(DpdError::config(format!(
                "cannot transplant pair cache from {} to {}: different cell or task layout",
                other.name, self.name
            )));
        }
        std::mem::swap(&mut self.cache, &mut other.cache);
        self.cache_epoch = other.cache_epoch.take();
        Ok(())
    }

    /// Releases this engine's handle on the worker pool. Further passes fail.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            if let Some(pool) = Arc::get_mut(&mut pool) {
                pool.shutdown();
            }
        }
    }

    fn check_count(&self, n: usize) -> Result<()> {
        if n != self.particle_count {
            return Err(DpdError::invariant(format!(
                "{} was built for {} particles, got {}",
                self.name, self.particle_count, n
            )));
        }
        Ok(())
    }

    /// One pass of `calc` over all pairs within the cutoff.
    ///
    /// With `record` set the accepted pairs are also written to the pair
    /// cache, which then stays valid until the positions change.
    pub fn compute<V, C>(&mut self, view: &V, calc: &C, mode: Mode, record: bool) -> Result<PassTotals>
    where
        V: PairSource + ?Sized,
        C: PairCalculator<V> + ?Sized,
    {
        profile_scope!("pair_pass");
        let positions = view.positions();
        let epoch = view.epoch();
        self.check_count(positions.len())?;
        if (record || mode == Mode::WithCache) && !self.cache_enabled {
            return Err(DpdError::CacheInactive);
        }
        match mode {
            Mode::WithCache => {
                if record {
                    return Err(DpdError::invariant("a cache replay cannot record the cache"));
                }
                if self.cache_epoch != Some(epoch) {
                    return Err(DpdError::CacheStale {
                        cached: self.cache_epoch,
                        current: epoch,
                    });
                }
            }
            Mode::WithoutCellAssignment => {
                if self.grid.is_some() && self.cells.epoch() != Some(epoch) {
                    return Err(DpdError::CellListStale {
                        built: self.cells.epoch(),
                        current: epoch,
                    });
                }
            }
            Mode::WithCellAssignment => {
                if let Some(grid) = &self.grid {
                    self.cells.assign(grid, positions, epoch);
                }
            }
        }

        for slot in self.scratch.iter_mut() {
            slot.adders.reset();
        }
        if record {
            self.cache_epoch = None;
            self.cache.reset();
        }

        let context = format!("{} pass ({})", self.name, calc.name());
        guarded(&context, || self.dispatch(view, calc, mode, record))?;
        if record {
            self.cache_epoch = Some(epoch);
        }
        Ok(adders::combine(&self.scratch))
    }

    fn dispatch<V, C>(&mut self, view: &V, calc: &C, mode: Mode, record: bool) -> Result<()>
    where
        V: PairSource + ?Sized,
        C: PairCalculator<V> + ?Sized,
    {
        let Self {
            name,
            geometry,
            cutoff_sq,
            grid,
            cells,
            plan,
            pool,
            scratch,
            cache,
            ..
        } = self;
        let pool = pool
            .as_deref()
            .ok_or_else(|| DpdError::computation(*name, "engine has been shut down"))?;
        let grid: Option<&CellBox> = grid.as_ref();
        let cells: &CellLinkedList = cells;
        let walker = Walker {
            geometry,
            cutoff_sq: *cutoff_sq,
            positions: view.positions(),
            view,
            calc,
        };

        if mode == Mode::WithCache {
            return replay(pool, view, calc, scratch, cache);
        }
        match grid {
            None => {
                let slot: &mut TaskScratch = &mut scratch[0];
                let sink = &mut cache.row_mut(0)[0];
                let n = walker.positions.len();
                for i in 0..n {
                    for j in (i + 1)..n {
                        walker.visit(i, j, slot, sink, record)?;
                    }
                }
                Ok(())
            }
            Some(grid) => {
                for (c, chunk) in grid.chunks().iter().enumerate() {
                    let ranges = &plan[c];
                    let row = cache.row_mut(c);
                    if ranges.len() == 1 {
                        walker.walk_cells(grid, cells, &chunk[ranges[0].clone()], &mut scratch[0], &mut row[0], record)?;
                        continue;
                    }
                    let slots = &mut scratch[..ranges.len()];
                    let walker = &walker;
                    pool.install(|| {
                        slots
                            .par_iter_mut()
                            .zip(row.par_iter_mut())
                            .zip(ranges.par_iter())
                            .try_for_each(|((slot, sink), range)| {
                                walker.walk_cells(grid, cells, &chunk[range.clone()], slot, sink, record)
                            })
                    })??;
                }
                Ok(())
            }
        }
    }
}

fn replay<V, C>(
    pool: &WorkerPool,
    view: &V,
    calc: &C,
    scratch: &mut [CachePadded<TaskScratch>],
    cache: &PairCacheGrid,
) -> Result<()>
where
    V: PairSource + ?Sized,
    C: PairCalculator<V> + ?Sized,
{
    for c in 0..cache.chunk_count() {
        let row = cache.row(c);
        if row.len() == 1 {
            let slot: &mut TaskScratch = &mut scratch[0];
            row[0].replay(|pair| calc.pair(view, slot, pair))?;
            continue;
        }
        let slots = &mut scratch[..row.len()];
        pool.install(|| {
            slots
                .par_iter_mut()
                .zip(row.par_iter())
                .try_for_each(|(slot, segment)| {
                    let slot: &mut TaskScratch = slot;
                    segment.replay(|pair| calc.pair(view, slot, pair))
                })
        })??;
    }
    Ok(())
}

struct Walker<'a, V: ?Sized, C: ?Sized> {
    geometry: &'a BoxGeometry,
    cutoff_sq: Real,
    positions: &'a [Vector],
    view: &'a V,
    calc: &'a C,
}

impl<V, C> Walker<'_, V, C>
where
    V: PairSource + ?Sized,
    C: PairCalculator<V> + ?Sized,
{
    /// Cutoff test with per-axis early exit; strict `<` on the squared cutoff.
    #[inline(always)]
    fn visit(&self, i: usize, j: usize, slot: &mut TaskScratch, sink: &mut PairCache, record: bool) -> Result<()> {
        let pi = self.positions[i];
        let pj = self.positions[j];
        let dx = self.geometry.correct(0, pi.x - pj.x);
        let mut r_sq = dx * dx;
        if r_sq >= self.cutoff_sq {
            return Ok(());
        }
        let dy = self.geometry.correct(1, pi.y - pj.y);
        r_sq += dy * dy;
        if r_sq >= self.cutoff_sq {
            return Ok(());
        }
        let dz = self.geometry.correct(2, pi.z - pj.z);
        r_sq += dz * dz;
        // coincident particles have no pair direction
        if r_sq >= self.cutoff_sq || r_sq <= 0.0 {
            return Ok(());
        }
        let pair = Pair {
            i,
            j,
            d: Vector::new(dx, dy, dz),
            r_sq,
            r: r_sq.sqrt(),
        };
        if record {
            sink.add(&pair);
        }
        self.calc.pair(self.view, slot, &pair)
    }

    fn walk_cells(
        &self,
        grid: &CellBox,
        cells: &CellLinkedList,
        slice: &[usize],
        slot: &mut TaskScratch,
        sink: &mut PairCache,
        record: bool,
    ) -> Result<()> {
        for &cell in slice {
            let mut i = cells.head(cell);
            while i != NONE {
                let mut j = cells.next(i);
                while j != NONE {
                    self.visit(i, j, slot, sink, record)?;
                    j = cells.next(j);
                }
                for &neighbor in grid.forward_neighbors(cell) {
                    let mut j = cells.head(neighbor);
                    while j != NONE {
                        self.visit(i, j, slot, sink, record)?;
                        j = cells.next(j);
                    }
                }
                i = cells.next(i);
            }
        }
        Ok(())
    }
}
