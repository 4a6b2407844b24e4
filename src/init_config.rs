// init_config.rs
// Species and molecule definitions that describe the initial system

use crate::error::{DpdError, Result};
use crate::forces::bonds::BondBehavior;
use crate::Real;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_mass() -> Real {
    1.0
}

fn default_molar_mass() -> Real {
    18.0 // water bead
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SpeciesConfig {
    pub name: String,
    #[serde(default = "default_mass")]
    pub mass: Real,
    /// Only carried through to snapshots; the dynamics use `mass`.
    #[serde(default = "default_molar_mass")]
    pub molar_mass: Real,
    #[serde(default)]
    pub charge: Real,
}

impl SpeciesConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(DpdError::config(format!(
                "species '{}' mass must be positive, got {}",
                self.name, self.mass
            )));
        }
        if !self.charge.is_finite() || !self.molar_mass.is_finite() {
            return Err(DpdError::config(format!(
                "species '{}' has a non-finite charge or molar mass",
                self.name
            )));
        }
        Ok(())
    }
}

/// Harmonic spring joining consecutive beads of a molecule.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct BondConfig {
    pub rest_length: Real,
    pub force_constant: Real,
    #[serde(default)]
    pub behavior: BondBehavior,
}

/// A linear molecule: `beads` lists species names from head to tail.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MoleculeConfig {
    pub name: String,
    pub beads: Vec<String>,
    pub count: usize,
    #[serde(default)]
    pub bond: Option<BondConfig>,
}

impl MoleculeConfig {
    pub fn validate(&self, species: &HashMap<&str, usize>) -> Result<()> {
        if self.beads.is_empty() {
            return Err(DpdError::config(format!("molecule '{}' has no beads", self.name)));
        }
        if let Some(unknown) = self.beads.iter().find(|b| !species.contains_key(b.as_str())) {
            return Err(DpdError::config(format!(
                "molecule '{}' uses unknown species '{}'",
                self.name, unknown
            )));
        }
        if let Some(bond) = self.bond {
            if !(bond.rest_length.is_finite() && bond.rest_length >= 0.0) {
                return Err(DpdError::config(format!(
                    "molecule '{}' bond rest length must be non-negative, got {}",
                    self.name, bond.rest_length
                )));
            }
            if !(bond.force_constant.is_finite() && bond.force_constant >= 0.0) {
                return Err(DpdError::config(format!(
                    "molecule '{}' bond force constant must be non-negative, got {}",
                    self.name, bond.force_constant
                )));
            }
        }
        Ok(())
    }

    /// Bonds per molecule; a bond needs two beads.
    pub fn bonds_per_molecule(&self) -> usize {
        match self.bond {
            Some(_) => self.beads.len().saturating_sub(1),
            None => 0,
        }
    }
}
