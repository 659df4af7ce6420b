// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for halo crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`recording`] - Fabric wrapper that logs every queued operation per batch
//! - [`workers`] - Scoped-thread runner over an in-process mesh
//! - [`lattice`] - Deterministic lattices and site values

pub mod lattice;
pub mod recording;
pub mod workers;

// Re-export commonly used items at crate root for convenience
pub use lattice::{
    four_cube_lattice, seeded_distributions, seeded_lattice, seeded_site, FOUR_CUBE,
};
pub use recording::{check_pairwise, Op, RecordingFabric};
pub use workers::{run_recorded, run_workers};
