// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! halo-core: ghost-site coordination for statically partitioned lattices.
//!
//! Every worker owns a contiguous slice of a 3-D lattice and mirrors a sparse
//! set of *ghost* sites owned by its peers. This crate provides the three
//! pieces that make that mirroring work:
//!
//! - [`NeedRegistry`] accumulates the ordered, duplicate-free set of remote
//!   sites the kernel asked for.
//! - [`negotiate`] turns that set into, for every peer, the exact ordered list
//!   of local sites the peer needs, using one scalar all-to-all plus sparse
//!   point-to-point traffic.
//! - [`transfer`] runs the static (geometry) and dynamic (distribution)
//!   exchanges over the negotiated tables.
//!
//! [`HaloExchange`] bundles them into the per-worker component the kernel and
//! driver share by reference.
//!
//! # Positional matching
//!
//! No message carries a site identifier. A receive queued at position `k` for
//! peer `B` pairs with the send `B` queued at position `k` for this worker,
//! because both sides walk their lists in the order fixed at negotiation time.
//! Any divergence surfaces as a [`FabricError`] from the transport.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod error;
mod exchange;
/// Communication fabric port: batched queue-then-dispatch transport.
pub mod fabric;
mod ghost;
mod ident;
mod lattice;
/// Needs negotiation: who needs which of my sites.
pub mod negotiate;
mod partition;
mod registry;
/// Static and dynamic halo transfer protocols.
pub mod transfer;

/// Errors surfaced by negotiation and transfer.
pub use error::HaloError;
/// Per-worker halo component and its negotiation latch.
pub use exchange::{HaloExchange, NegotiationState};
/// Transport port, receive tickets and delivered buffers.
pub use fabric::{Delivery, Fabric, FabricError, FabricExt, Ticket};
/// Mirrored remote sites.
pub use ghost::{GhostSiteRecord, GhostStore};
/// Identifier newtypes.
pub use ident::{GlobalSiteId, LocalSiteId, WorkerId};
/// Lattice descriptors and the local lattice store.
pub use lattice::{LatticeModel, LatticeSite, LatticeStore, LocalLattice, SiteData, SiteGeometry};
/// Negotiated per-peer send tables.
pub use negotiate::NeedsFromMe;
/// Site ownership lookup.
pub use partition::{LatticeDims, PartitionDirectory, PartitionError, SlabPartition, WorkerView};
/// Ordered need set and per-site requirement flags.
pub use registry::{NeedRegistry, SiteRequirement};
/// Queued-but-not-yet-applied ghost receives.
pub use transfer::PendingGhostReceives;
