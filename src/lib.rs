//! Dissipative Particle Dynamics engine.
//!
//! Cell-list pair discovery with lock-free parallel force accumulation, a
//! replayable pair cache, the DPD/bond/electrostatics calculators and four
//! stochastic Velocity-Verlet style integration schemes.

pub mod cell_list;
pub mod config;
pub mod error;
pub mod forces;
pub mod geometry;
pub mod init_config;
pub mod integration;
pub mod interactions;
pub mod io;
pub mod parallel;
pub mod particles;
pub mod profiler;
pub mod random;
pub mod simulation;
pub mod utils;

pub use error::{DpdError, Result};

/// Floating point type of the whole engine.
#[cfg(not(feature = "single_precision"))]
pub type Real = f64;
#[cfg(feature = "single_precision")]
pub type Real = f32;

/// 3-vector matching [`Real`].
#[cfg(not(feature = "single_precision"))]
pub type Vector = ultraviolet::DVec3;
#[cfg(feature = "single_precision")]
pub type Vector = ultraviolet::Vec3;

#[cfg(feature = "profiling")]
use once_cell::sync::Lazy;
#[cfg(feature = "profiling")]
use parking_lot::Mutex;

#[cfg(feature = "profiling")]
pub static PROFILER: Lazy<Mutex<profiler::Profiler>> =
    Lazy::new(|| Mutex::new(profiler::Profiler::new()));
