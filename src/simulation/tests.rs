use super::thermal::mean_temperature;
use super::*;
use crate::config::SimConfig;
use crate::error::DpdError;
use crate::interactions::Mode;
use crate::Real;
use approx::assert_abs_diff_eq;

const WATER: &str = r#"
    [box]
    lengths = [5.0, 5.0, 5.0]

    [[species]]
    name = "W"

    [[molecules]]
    name = "water"
    beads = ["W"]
    count = 375

    [parallel]
    tasks = 2
    min_cells_per_task = 2

    [run]
    seed = 11
    report_interval = 10
"#;

const CHARGED_CHAINS: &str = r#"
    [box]
    lengths = [7.0, 7.0, 7.0]
    periodic = [true, true, false]

    [dpd]
    dt = 0.02

    [[species]]
    name = "W"

    [[species]]
    name = "P"
    charge = 1.0

    [[species]]
    name = "N"
    charge = -1.0

    [[molecules]]
    name = "water"
    beads = ["W"]
    count = 900

    [[molecules]]
    name = "dimer"
    beads = ["P", "N"]
    count = 40
    bond = { rest_length = 0.5, force_constant = 50.0 }

    [integration]
    scheme = "s1mvv"

    [parallel]
    tasks = 3
    min_cells_per_task = 2
    min_bonds_per_task = 8

    [electrostatics]
    cutoff = 2.0
"#;

fn water(scheme: &str) -> SimConfig {
    let text = format!("{}\n[integration]\n{}", WATER, scheme);
    SimConfig::from_toml_str(&text).unwrap()
}

#[test]
fn water_stays_thermalized() {
    let mut sim = Simulation::from_config(water("scheme = \"gwmvv\"")).unwrap();
    assert_abs_diff_eq!(mean_temperature(&sim.state), 1.0, epsilon = 1e-10);
    let props = sim.run(100).unwrap();
    assert_eq!(props.step, 100);
    assert_abs_diff_eq!(props.time, 4.0, epsilon = 1e-9);
    let t = props.temperature.iter().sum::<Real>() / 3.0;
    assert!((t - 1.0).abs() < 0.2, "temperature {}", t);
    assert!(sim.state.momentum().mag() < 1e-8);
    // a = 25 water at density 3 sits near p = 23.7
    for p in props.pressure {
        assert!(p > 15.0 && p < 35.0, "pressure {}", p);
    }
    assert!(props.potential.dpd > 0.0);
    assert_eq!(props.potential.bonds, 0.0);
    assert_eq!(props.xi, None);
}

#[test]
fn measure_keeps_the_pair_cache() {
    let mut sim = Simulation::from_config(water("scheme = \"s1mvv\"")).unwrap();
    sim.run(3).unwrap();
    let epoch = sim.state.epoch();
    assert_eq!(sim.field().reuse_mode(epoch), Mode::WithCache);
    let first = sim.measure().unwrap();
    assert_eq!(sim.field().reuse_mode(epoch), Mode::WithCache);
    let second = sim.measure().unwrap();
    assert_eq!(first, second);
    sim.step().unwrap();
}

#[test]
fn measured_potential_matches_the_step_report() {
    let mut sim = Simulation::from_config(water("scheme = \"s1mvv\"")).unwrap();
    let report = sim.step().unwrap();
    let props = sim.measure().unwrap();
    approx::assert_relative_eq!(props.potential.dpd, report.dpd.potential, max_relative = 1e-10);
}

#[test]
fn snapshot_resumes_the_run() {
    let config = water("scheme = \"pnhln\"\nxi = 1.0\naccumulate_g = true\nthermostat_mass = 20.0");
    let mut sim = Simulation::from_config(config.clone()).unwrap();
    sim.run(5).unwrap();
    let snapshot = sim.snapshot();
    assert_eq!(snapshot.step, 5);
    let xi = sim.integrator().xi();
    assert!(xi.is_some());

    let path = std::env::temp_dir()
        .join(format!("dpd_sim_sim_{}", std::process::id()))
        .join("resume.bin.gz");
    crate::io::save_snapshot(&path, &snapshot).unwrap();
    let restored = crate::io::load_snapshot(&path).unwrap();

    let mut resumed = Simulation::from_snapshot(config, restored).unwrap();
    assert_eq!(resumed.step_count(), 5);
    assert_eq!(resumed.integrator().xi(), xi);
    assert_eq!(resumed.state.positions(), sim.state.positions());
    let props = resumed.run(2).unwrap();
    assert_eq!(props.step, 7);
    assert!(props.temperature.iter().all(|t| t.is_finite()));
}

#[test]
fn snapshot_with_unknown_types_is_rejected() {
    let config = water("scheme = \"gwmvv\"");
    let sim = Simulation::from_config(config.clone()).unwrap();
    let mut snapshot = sim.snapshot();
    snapshot.state.types[3] = 4;
    assert!(matches!(
        Simulation::from_snapshot(config, snapshot),
        Err(DpdError::Config(_))
    ));
}

#[test]
fn charged_chains_feel_every_contribution() {
    let config = SimConfig::from_toml_str(CHARGED_CHAINS).unwrap();
    let mut sim = Simulation::from_config(config).unwrap();
    assert_eq!(sim.field().bonds().map(|b| b.len()), Some(40));
    assert_eq!(sim.field().electrostatics().map(|e| e.charged_count()), Some(80));
    let props = sim.run(20).unwrap();
    assert!(props.potential.bonds > 0.0);
    assert!(props.potential.electrostatics.is_finite());
    assert!(props.potential.electrostatics != 0.0);
    // closed z walls keep every particle inside
    assert!(sim.state.positions().iter().all(|p| p.z >= 0.0 && p.z <= 7.0));
    let snapshot = sim.snapshot();
    assert_eq!(snapshot.bonds.len(), 40);
}

#[test]
fn shut_down_simulation_refuses_to_step() {
    let mut sim = Simulation::from_config(water("scheme = \"scmvv\"")).unwrap();
    sim.step().unwrap();
    sim.shutdown();
    assert!(sim.step().is_err());
    assert_eq!(sim.step_count(), 1);
}
