// Centralized configuration for DPD simulation parameters

use crate::error::{DpdError, Result};
use crate::forces::dpd::{DpdParameters, RepulsionMatrix};
use crate::forces::electrostatics::ElectrostaticsParameters;
use crate::geometry::BoxGeometry;
use crate::init_config::{MoleculeConfig, SpeciesConfig};
use crate::interactions::EngineSettings;
use crate::random::RandomDistribution;
use crate::Real;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub use crate::integration::Scheme;

// ====================
// Box and DPD Parameters
// ====================
pub const DEFAULT_BOX_LENGTH: Real = 10.0;
pub const DEFAULT_CUTOFF: Real = 1.0;
pub const DEFAULT_DT: Real = 0.04;
pub const DEFAULT_KBT: Real = 1.0;
pub const DEFAULT_GAMMA: Real = 4.5;
pub const DEFAULT_REPULSION: Real = 25.0; // a_ii of water at density 3

// ====================
// Integration Schemes
// ====================
pub const DEFAULT_GWMVV_LAMBDA: Real = 0.65;
pub const DEFAULT_SCMVV_ITERATIONS: usize = 2;
pub const DEFAULT_PNHLN_THERMOSTAT_MASS: Real = 10.0;

// ====================
// Electrostatics
// ====================
pub const DEFAULT_ELECTROSTATICS_COUPLING: Real = 13.87;
pub const DEFAULT_ELECTROSTATICS_DECAY_LENGTH: Real = 0.2;
pub const DEFAULT_ELECTROSTATICS_CUTOFF: Real = 3.0;

// ====================
// Parallelization
// ====================
/// Worker tasks; 0 picks one per available core.
pub const DEFAULT_TASKS: usize = 0;
pub const DEFAULT_MIN_CELLS_PER_TASK: usize = 8;
pub const DEFAULT_MIN_BONDS_PER_TASK: usize = 256;
pub const DEFAULT_MIN_CELLS_PER_AXIS: usize = crate::cell_list::MIN_PERIODIC_CELLS;

// ====================
// Run Control
// ====================
pub const DEFAULT_STEPS: u64 = 1000;
pub const DEFAULT_SEED: u64 = 1;
pub const DEFAULT_REPORT_INTERVAL: u64 = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxConfig {
    pub lengths: [Real; 3],
    #[serde(default = "default_periodic")]
    pub periodic: [bool; 3],
}

fn default_periodic() -> [bool; 3] {
    [true; 3]
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            lengths: [DEFAULT_BOX_LENGTH; 3],
            periodic: default_periodic(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpdConfig {
    pub cutoff: Real,
    pub dt: Real,
    pub kbt: Real,
    pub gamma: Real,
    /// Random force amplitude; `sqrt(2 gamma kBT)` when omitted.
    pub sigma: Option<Real>,
    pub distribution: RandomDistribution,
}

impl Default for DpdConfig {
    fn default() -> Self {
        Self {
            cutoff: DEFAULT_CUTOFF,
            dt: DEFAULT_DT,
            kbt: DEFAULT_KBT,
            gamma: DEFAULT_GAMMA,
            sigma: None,
            distribution: RandomDistribution::default(),
        }
    }
}

impl DpdConfig {
    pub fn sigma(&self) -> Real {
        self.sigma.unwrap_or_else(|| (2.0 * self.gamma * self.kbt).sqrt())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepulsionOverride {
    pub a: String,
    pub b: String,
    pub value: Real,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionsConfig {
    /// `a_ij` for every species pair without an override.
    pub default: Real,
    pub pairs: Vec<RepulsionOverride>,
}

impl Default for InteractionsConfig {
    fn default() -> Self {
        Self {
            default: DEFAULT_REPULSION,
            pairs: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub tasks: usize,
    /// Fewest cells of one chunk handed to a task; below that the chunk runs on fewer tasks.
    pub min_cells_per_task: usize,
    pub min_bonds_per_task: usize,
    /// Fewest cells along a periodic axis before pairing falls back to brute force.
    pub min_cells_per_axis: usize,
    pub pair_cache: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            tasks: DEFAULT_TASKS,
            min_cells_per_task: DEFAULT_MIN_CELLS_PER_TASK,
            min_bonds_per_task: DEFAULT_MIN_BONDS_PER_TASK,
            min_cells_per_axis: DEFAULT_MIN_CELLS_PER_AXIS,
            pair_cache: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectrostaticsConfig {
    pub coupling: Real,
    pub decay_length: Real,
    pub cutoff: Real,
}

impl Default for ElectrostaticsConfig {
    fn default() -> Self {
        Self {
            coupling: DEFAULT_ELECTROSTATICS_COUPLING,
            decay_length: DEFAULT_ELECTROSTATICS_DECAY_LENGTH,
            cutoff: DEFAULT_ELECTROSTATICS_CUTOFF,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub steps: u64,
    pub seed: u64,
    /// Steps between progress log lines; 0 disables them.
    pub report_interval: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            seed: DEFAULT_SEED,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(rename = "box", default)]
    pub geometry: BoxConfig,
    #[serde(default)]
    pub dpd: DpdConfig,
    #[serde(default)]
    pub species: Vec<SpeciesConfig>,
    #[serde(default)]
    pub molecules: Vec<MoleculeConfig>,
    #[serde(default)]
    pub interactions: InteractionsConfig,
    #[serde(default)]
    pub integration: Scheme,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub electrostatics: Option<ElectrostaticsConfig>,
    #[serde(default)]
    pub run: RunConfig,
}

impl SimConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every argument eagerly; the first problem is reported by name.
    pub fn validate(&self) -> Result<()> {
        let geometry = self.box_geometry()?;
        geometry.check_cutoff(self.dpd.cutoff)?;
        self.dpd_parameters()?.validate()?;
        self.integration.validate()?;

        if self.integration.requires_cache() && !self.parallel.pair_cache {
            return Err(DpdError::config(
                "the SCMVV scheme replays the pair cache; set parallel.pair_cache = true",
            ));
        }
        if self.parallel.min_cells_per_task == 0 || self.parallel.min_bonds_per_task == 0 {
            return Err(DpdError::config(
                "parallel.min_cells_per_task and parallel.min_bonds_per_task must be at least 1",
            ));
        }
        if self.parallel.min_cells_per_axis < crate::cell_list::MIN_PERIODIC_CELLS {
            return Err(DpdError::config(format!(
                "parallel.min_cells_per_axis must be at least {}, got {}",
                crate::cell_list::MIN_PERIODIC_CELLS,
                self.parallel.min_cells_per_axis
            )));
        }
        if let Some(params) = self.electrostatics_parameters() {
            params.validate()?;
            geometry.check_cutoff(params.cutoff)?;
        }

        if self.species.is_empty() {
            return Err(DpdError::config("at least one [[species]] entry is required"));
        }
        let names = self.species_indices()?;
        for species in &self.species {
            species.validate()?;
        }
        if self.molecules.iter().all(|m| m.count == 0) {
            return Err(DpdError::config("at least one [[molecules]] entry with count > 0 is required"));
        }
        for molecule in &self.molecules {
            molecule.validate(&names)?;
        }
        for pair in &self.interactions.pairs {
            for name in [&pair.a, &pair.b] {
                if !names.contains_key(name.as_str()) {
                    return Err(DpdError::config(format!(
                        "interaction override names unknown species '{}'",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn box_geometry(&self) -> Result<BoxGeometry> {
        BoxGeometry::new(self.geometry.lengths, self.geometry.periodic)
    }

    /// Species name to type index, in declaration order.
    pub fn species_indices(&self) -> Result<HashMap<&str, usize>> {
        let mut names = HashMap::with_capacity(self.species.len());
        for (i, species) in self.species.iter().enumerate() {
            if names.insert(species.name.as_str(), i).is_some() {
                return Err(DpdError::config(format!("species '{}' declared twice", species.name)));
            }
        }
        Ok(names)
    }

    pub fn dpd_parameters(&self) -> Result<DpdParameters> {
        let names = self.species_indices()?;
        let mut repulsion = RepulsionMatrix::new(self.species.len().max(1), self.interactions.default);
        for pair in &self.interactions.pairs {
            if let (Some(&a), Some(&b)) = (names.get(pair.a.as_str()), names.get(pair.b.as_str())) {
                repulsion.set(a, b, pair.value)?;
            }
        }
        Ok(DpdParameters {
            cutoff: self.dpd.cutoff,
            dt: self.dpd.dt,
            kbt: self.dpd.kbt,
            gamma: self.dpd.gamma,
            sigma: self.dpd.sigma(),
            distribution: self.dpd.distribution,
            repulsion,
        })
    }

    pub fn electrostatics_parameters(&self) -> Option<ElectrostaticsParameters> {
        self.electrostatics.as_ref().map(|e| ElectrostaticsParameters {
            coupling: e.coupling,
            decay_length: e.decay_length,
            cutoff: e.cutoff,
        })
    }

    /// Worker task count with 0 resolved to the available cores.
    pub fn tasks(&self) -> usize {
        if self.parallel.tasks == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.parallel.tasks
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cutoff: self.dpd.cutoff,
            min_cells_per_axis: self.parallel.min_cells_per_axis,
            min_cells_per_task: self.parallel.min_cells_per_task,
            cache: self.parallel.pair_cache,
        }
    }

    /// Total particle count implied by the molecule list.
    pub fn particle_count(&self) -> usize {
        self.molecules.iter().map(|m| m.count * m.beads.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forces::bonds::BondBehavior;

    const WATER_AND_CHAINS: &str = r#"
        [box]
        lengths = [8.0, 8.0, 8.0]

        [dpd]
        gamma = 4.5
        kbt = 1.0
        distribution = "uniform"

        [[species]]
        name = "W"

        [[species]]
        name = "T"
        mass = 2.0

        [[molecules]]
        name = "water"
        beads = ["W"]
        count = 1200

        [[molecules]]
        name = "chain"
        beads = ["T", "T", "T", "T"]
        count = 30
        bond = { rest_length = 0.5, force_constant = 4.0 }

        [interactions]
        default = 25.0
        pairs = [{ a = "W", b = "T", value = 40.0 }]

        [integration]
        scheme = "scmvv"
        iterations = 3

        [parallel]
        tasks = 2

        [run]
        steps = 50
        seed = 7
    "#;

    #[test]
    fn full_config_parses_and_validates() {
        let config = SimConfig::from_toml_str(WATER_AND_CHAINS).unwrap();
        assert_eq!(config.particle_count(), 1200 + 120);
        assert_eq!(config.integration, Scheme::Scmvv { iterations: 3 });
        assert_eq!(config.tasks(), 2);
        assert_eq!(config.run.report_interval, DEFAULT_REPORT_INTERVAL);
        assert_eq!(config.molecules[1].bond.map(|b| b.behavior), Some(BondBehavior::Default));

        let params = config.dpd_parameters().unwrap();
        assert_eq!(params.repulsion.get(0, 1), 40.0);
        assert_eq!(params.repulsion.get(1, 1), 25.0);
        assert_eq!(params.distribution, RandomDistribution::Uniform);
        approx::assert_abs_diff_eq!(params.sigma, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn cutoff_must_fit_the_periodic_box() {
        let text = WATER_AND_CHAINS.replace("lengths = [8.0, 8.0, 8.0]", "lengths = [8.0, 1.5, 8.0]");
        match SimConfig::from_toml_str(&text) {
            Err(DpdError::Config(msg)) => assert!(msg.contains("cutoff")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn scmvv_requires_the_pair_cache() {
        let text = WATER_AND_CHAINS.replace("tasks = 2", "tasks = 2\npair_cache = false");
        assert!(matches!(SimConfig::from_toml_str(&text), Err(DpdError::Config(_))));
    }

    #[test]
    fn unknown_species_are_rejected() {
        let text = WATER_AND_CHAINS.replace("beads = [\"W\"]", "beads = [\"X\"]");
        assert!(matches!(SimConfig::from_toml_str(&text), Err(DpdError::Config(_))));
        let text = WATER_AND_CHAINS.replace("b = \"T\"", "b = \"Q\"");
        assert!(SimConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(SimConfig::from_toml_str("[box\nlengths = 3"), Err(DpdError::Toml(_))));
    }

    #[test]
    fn small_brute_force_threshold_is_rejected() {
        let text = WATER_AND_CHAINS.replace("tasks = 2", "tasks = 2\nmin_cells_per_axis = 2");
        assert!(SimConfig::from_toml_str(&text).is_err());
    }
}
