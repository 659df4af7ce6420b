// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier newtypes for sites and workers.
use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Process-wide site identifier, independent of how the lattice is partitioned.
///
/// Global ids are the linearised lattice coordinate (see
/// [`LatticeDims::id_of`](crate::LatticeDims::id_of)). The type is `Pod` so
/// need lists travel over the fabric as raw `u64` words.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GlobalSiteId(pub u64);

impl GlobalSiteId {
    /// Returns the raw identifier.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GlobalSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site#{}", self.0)
    }
}

impl From<u64> for GlobalSiteId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Contiguous index into the owning worker's site storage.
///
/// Only meaningful on the worker that owns the site.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct LocalSiteId(pub usize);

impl LocalSiteId {
    /// Returns the index into local storage.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Rank of a worker in `[0, P)`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Returns the rank as an index into per-worker tables.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// Iterates every rank of a communicator of `size` workers, in rank order.
    pub fn all(size: usize) -> impl Iterator<Item = WorkerId> {
        (0..size).map(WorkerId)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}
