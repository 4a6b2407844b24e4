//! Per-task scalar accumulators.

use crate::Real;
use crossbeam::utils::CachePadded;
use rand::rngs::StdRng;

/// Scalars one task accumulates during a pass. Owned by exactly one task
/// slot; combined only after every task has finished.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AdderGroup {
    pub potential: Real,
    /// Diagonal virial terms `sum d_a * f_a` per axis.
    pub pressure: [Real; 3],
    /// Scheme specific scalar (the PNHLN `G` sum).
    pub extra: Real,
}

impl AdderGroup {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn add_virial(&mut self, d: crate::Vector, f: crate::Vector) {
        self.pressure[0] += d.x * f.x;
        self.pressure[1] += d.y * f.y;
        self.pressure[2] += d.z * f.z;
    }

    pub fn merge(&mut self, other: &AdderGroup) {
        self.potential += other.potential;
        self.pressure[0] += other.pressure[0];
        self.pressure[1] += other.pressure[1];
        self.pressure[2] += other.pressure[2];
        self.extra += other.extra;
    }
}

/// Totals of one pass, valid only after it returned `Ok`.
pub type PassTotals = AdderGroup;

/// Scratch owned by one task slot for the lifetime of an engine.
pub struct TaskScratch {
    pub adders: AdderGroup,
    pub rng: StdRng,
}

impl TaskScratch {
    pub fn new(rng: StdRng) -> Self {
        Self {
            adders: AdderGroup::default(),
            rng,
        }
    }
}

/// Sums the adders of every slot.
pub fn combine(slots: &[CachePadded<TaskScratch>]) -> PassTotals {
    let mut total = PassTotals::default();
    for slot in slots {
        total.merge(&slot.adders);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeedSequence;
    use crate::Vector;

    #[test]
    fn combine_sums_every_slot() {
        let seeds = SeedSequence::new(0);
        let mut slots: Vec<CachePadded<TaskScratch>> = (0..3)
            .map(|_| CachePadded::new(TaskScratch::new(seeds.next_stream())))
            .collect();
        for (k, slot) in slots.iter_mut().enumerate() {
            slot.adders.potential = k as Real;
            slot.adders.add_virial(Vector::new(1.0, 2.0, 3.0), Vector::new(1.0, 1.0, 1.0));
        }
        let total = combine(&slots);
        assert_eq!(total.potential, 3.0);
        assert_eq!(total.pressure, [3.0, 6.0, 9.0]);
        slots[0].adders.reset();
        assert_eq!(slots[0].adders, AdderGroup::default());
    }
}
