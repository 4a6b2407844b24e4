//! Interaction-pair cache.
//!
//! A faithful side channel of a cell-based pass: the accepted pairs with
//! their corrected displacement and distances, stored as parallel arrays per
//! (safe chunk, task slot) so a replay keeps the write-disjointness of the
//! pass that recorded it.

use crate::error::Result;
use crate::{Real, Vector};

/// One accepted pair: `d` is the minimum-image displacement `r_i - r_j`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pair {
    pub i: usize,
    pub j: usize,
    pub d: Vector,
    pub r_sq: Real,
    pub r: Real,
}

#[derive(Clone, Debug, Default)]
pub struct PairCache {
    i: Vec<usize>,
    j: Vec<usize>,
    d: Vec<Vector>,
    r_sq: Vec<Real>,
    r: Vec<Real>,
}

impl PairCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            i: Vec::with_capacity(capacity),
            j: Vec::with_capacity(capacity),
            d: Vec::with_capacity(capacity),
            r_sq: Vec::with_capacity(capacity),
            r: Vec::with_capacity(capacity),
        }
    }

    /// Zeroes the fill cursor, keeping the allocation.
    pub fn reset(&mut self) {
        self.i.clear();
        self.j.clear();
        self.d.clear();
        self.r_sq.clear();
        self.r.clear();
    }

    #[inline]
    pub fn add(&mut self, pair: &Pair) {
        self.i.push(pair.i);
        self.j.push(pair.j);
        self.d.push(pair.d);
        self.r_sq.push(pair.r_sq);
        self.r.push(pair.r);
    }

    pub fn len(&self) -> usize {
        self.i.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Pair> + '_ {
        (0..self.len()).map(move |k| Pair {
            i: self.i[k],
            j: self.j[k],
            d: self.d[k],
            r_sq: self.r_sq[k],
            r: self.r[k],
        })
    }

    /// Feeds every cached pair to `consumer`, stopping at the first error.
    pub fn replay<F>(&self, mut consumer: F) -> Result<()>
    where
        F: FnMut(&Pair) -> Result<()>,
    {
        for pair in self.iter() {
            consumer(&pair)?;
        }
        Ok(())
    }
}

/// Cache containers indexed by `[chunk][task]`.
#[derive(Clone, Debug, Default)]
pub struct PairCacheGrid {
    rows: Vec<Vec<PairCache>>,
}

impl PairCacheGrid {
    /// `tasks_per_chunk[c]` slots for chunk `c`, each pre-sized to `capacity`.
    pub fn new(tasks_per_chunk: &[usize], capacity: usize) -> Self {
        Self {
            rows: tasks_per_chunk
                .iter()
                .map(|&t| (0..t).map(|_| PairCache::with_capacity(capacity)).collect())
                .collect(),
        }
    }

    pub fn row_mut(&mut self, chunk: usize) -> &mut [PairCache] {
        &mut self.rows[chunk]
    }

    pub fn row(&self, chunk: usize) -> &[PairCache] {
        &self.rows[chunk]
    }

    pub fn chunk_count(&self) -> usize {
        self.rows.len()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.rows.iter().map(Vec::len).collect()
    }

    pub fn reset(&mut self) {
        self.rows.iter_mut().flatten().for_each(PairCache::reset);
    }

    pub fn len(&self) -> usize {
        self.rows.iter().flatten().map(PairCache::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pairs(&self) -> impl Iterator<Item = Pair> + '_ {
        self.rows.iter().flatten().flat_map(PairCache::iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(i: usize, j: usize) -> Pair {
        Pair {
            i,
            j,
            d: Vector::new(0.5, 0.0, 0.0),
            r_sq: 0.25,
            r: 0.5,
        }
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut cache = PairCache::with_capacity(4);
        for k in 0..10 {
            cache.add(&pair(k, k + 1));
        }
        assert_eq!(cache.len(), 10);
        let cap = cache.i.capacity();
        cache.reset();
        assert!(cache.is_empty());
        assert_eq!(cache.i.capacity(), cap);
    }

    #[test]
    fn replay_visits_in_order_and_stops_on_error() {
        let mut cache = PairCache::default();
        cache.add(&pair(0, 1));
        cache.add(&pair(2, 3));
        cache.add(&pair(4, 5));
        let mut seen = Vec::new();
        cache
            .replay(|p| {
                seen.push((p.i, p.j));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(0, 1), (2, 3), (4, 5)]);

        let mut count = 0;
        let res = cache.replay(|p| {
            count += 1;
            if p.i == 2 {
                Err(crate::DpdError::computation("test", "stop"))
            } else {
                Ok(())
            }
        });
        assert!(res.is_err());
        assert_eq!(count, 2);
    }

    #[test]
    fn grid_shape_follows_tasks_per_chunk() {
        let mut grid = PairCacheGrid::new(&[2, 1, 3], 8);
        assert_eq!(grid.shape(), vec![2, 1, 3]);
        grid.row_mut(2)[1].add(&pair(7, 9));
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.pairs().next().unwrap().j, 9);
        grid.reset();
        assert!(grid.is_empty());
    }
}
