use super::bonds::{BondBehavior, BondSet, HarmonicBond};
use super::dpd::{ConservativeForce, ConservativePotential, DissipativeForce, DpdParameters, RepulsionMatrix, VelocitySource};
use super::*;
use crate::geometry::BoxGeometry;
use crate::interactions::EngineSettings;
use crate::particles::ParticleKind;
use crate::random::{RandomDistribution, SeedSequence};
use approx::assert_abs_diff_eq;

const KIND: ParticleKind = ParticleKind {
    type_index: 0,
    molecule: 0,
    charge: 0.0,
    mass: 1.0,
    molar_mass: 18.0,
};

fn params(a: Real) -> DpdParameters {
    DpdParameters {
        cutoff: 1.0,
        dt: 0.04,
        kbt: 1.0,
        gamma: 4.5,
        sigma: 3.0,
        distribution: RandomDistribution::Gaussian,
        repulsion: RepulsionMatrix::new(1, a),
    }
}

fn random_state(n: usize, length: Real, seed: u64) -> ParticleState {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut state = ParticleState::with_capacity(n);
    for _ in 0..n {
        let p = Vector::new(rng.f64() as Real, rng.f64() as Real, rng.f64() as Real) * length;
        let v = Vector::new(rng.f64() as Real - 0.5, rng.f64() as Real - 0.5, rng.f64() as Real - 0.5);
        state.push(p, v, KIND);
    }
    state
}

fn field(geometry: BoxGeometry, n: usize, tasks: usize, bonds: Vec<HarmonicBond>) -> ForceField {
    let pool = Arc::new(WorkerPool::new(tasks).unwrap());
    let settings = EngineSettings {
        cutoff: 1.0,
        min_cells_per_axis: 3,
        min_cells_per_task: 2,
        cache: true,
    };
    let engine = InteractionEngine::new("dpd", geometry, settings, n, pool.clone(), &SeedSequence::new(17)).unwrap();
    let bonds = BondSet::new(geometry, bonds, n, pool.clone(), 4).unwrap();
    ForceField::new(engine, Some(bonds), None, pool)
}

#[test]
fn weight_and_displacement_factor_agree() {
    let r = 0.37;
    assert_abs_diff_eq!(displacement_factor(r, 1.0) * r, weight(r, 1.0), epsilon = 1e-12);
    assert_abs_diff_eq!(weight(0.5, 2.0), 0.75, epsilon = 1e-12);
}

#[test]
fn conservative_forces_cancel_in_a_dense_box() {
    let geometry = BoxGeometry::cubic(20.0).unwrap();
    let mut state = random_state(24_000, 20.0, 1);
    let mut field = field(geometry, 24_000, 4, Vec::new());
    let params = params(23.03);
    let report = field
        .full_pass(
            &mut state,
            &ConservativeForce {
                params: &params,
                target: Accumulator::Force,
            },
            false,
        )
        .unwrap();
    assert_eq!(report.passes, 1);
    assert!(report.dpd.potential > 0.0);
    let net = state.force.iter().fold(Vector::zero(), |acc, &f| acc + f);
    assert_abs_diff_eq!(net.x, 0.0, epsilon = 1e-8);
    assert_abs_diff_eq!(net.y, 0.0, epsilon = 1e-8);
    assert_abs_diff_eq!(net.z, 0.0, epsilon = 1e-8);
}

#[test]
fn passes_zero_only_what_they_write() {
    let geometry = BoxGeometry::cubic(6.0).unwrap();
    let mut state = random_state(600, 6.0, 2);
    let mut field = field(geometry, 600, 2, Vec::new());
    let params = params(25.0);
    for f in state.force_two.iter_mut() {
        *f = Vector::new(1.0, 1.0, 1.0);
    }
    field
        .full_pass(
            &mut state,
            &ConservativeForce {
                params: &params,
                target: Accumulator::Force,
            },
            true,
        )
        .unwrap();
    assert!(state.force_two.iter().all(|f| *f == Vector::new(1.0, 1.0, 1.0)));
    let conservative = state.force.clone();

    // replaying into force_two leaves force untouched and overwrites force_two
    field
        .cached_pass(
            &mut state,
            &DissipativeForce {
                params: &params,
                source: VelocitySource::Current,
                target: Accumulator::ForceTwo,
            },
        )
        .unwrap();
    assert_eq!(state.force, conservative);
    let net = state.force_two.iter().fold(Vector::zero(), |acc, &f| acc + f);
    assert!(net.mag() < 1e-9);

    // a repeated full pass starts again from zero
    field
        .full_pass(
            &mut state,
            &ConservativeForce {
                params: &params,
                target: Accumulator::Force,
            },
            false,
        )
        .unwrap();
    for (a, b) in state.force.iter().zip(&conservative) {
        assert!((*a - *b).mag() < 1e-12);
    }
}

#[test]
fn bonds_join_the_full_pass() {
    let geometry = BoxGeometry::cubic(8.0).unwrap();
    let mut state = ParticleState::with_capacity(2);
    state.push(Vector::new(1.0, 1.0, 1.0), Vector::zero(), KIND);
    state.push(Vector::new(1.0, 2.5, 1.0), Vector::zero(), KIND);
    let bond = HarmonicBond {
        i: 0,
        j: 1,
        rest_length: 1.0,
        force_constant: 4.0,
        behavior: BondBehavior::Default,
    };
    let mut field = field(geometry, 2, 1, vec![bond]);
    let params = params(25.0);
    let report = field
        .full_pass(&mut state, &ConservativePotential { params: &params }, false)
        .unwrap();
    // out of DPD range: only the bond acts
    assert_eq!(report.dpd.potential, 0.0);
    assert_abs_diff_eq!(report.bonds.potential, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(state.force[0].y, 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(report.potential(), 1.0, epsilon = 1e-12);

    let (bonds, electrostatics) = field.measure_extras(&mut state).unwrap();
    assert_abs_diff_eq!(bonds.potential, 1.0, epsilon = 1e-12);
    assert_eq!(electrostatics, PassTotals::default());
}

#[test]
fn reuse_mode_prefers_the_cache() {
    let geometry = BoxGeometry::cubic(6.0).unwrap();
    let mut state = random_state(300, 6.0, 3);
    let mut field = field(geometry, 300, 2, Vec::new());
    let params = params(25.0);
    assert_eq!(field.reuse_mode(state.epoch()), Mode::WithCellAssignment);
    let calc = ConservativePotential { params: &params };
    field.pair_pass(&mut state, &calc, Mode::WithCellAssignment, false).unwrap();
    assert_eq!(field.reuse_mode(state.epoch()), Mode::WithoutCellAssignment);
    let recorded = field.pair_pass(&mut state, &calc, Mode::WithoutCellAssignment, true).unwrap();
    assert_eq!(field.reuse_mode(state.epoch()), Mode::WithCache);
    let replayed = field.pair_pass(&mut state, &calc, Mode::WithCache, false).unwrap();
    approx::assert_relative_eq!(recorded.potential, replayed.potential, max_relative = 1e-12);
    state.positions_mut();
    assert_eq!(field.reuse_mode(state.epoch()), Mode::WithCellAssignment);
}

#[test]
fn shutdown_is_idempotent() {
    let geometry = BoxGeometry::cubic(6.0).unwrap();
    let mut state = random_state(50, 6.0, 4);
    let mut field = field(geometry, 50, 2, Vec::new());
    field.shutdown();
    field.shutdown();
    let params = params(25.0);
    assert!(field
        .full_pass(&mut state, &ConservativePotential { params: &params }, false)
        .is_err());
}
