// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Static slab partitioning of a 3-D lattice.
//!
//! Global ids linearise `(x, y, z)` with `x` fastest, so a contiguous id range
//! is a stack of whole or partial z-planes. Each worker owns exactly one such
//! range; ownership is resolved by binary search over the sorted range starts.

use crate::ident::{GlobalSiteId, LocalSiteId, WorkerId};
use std::ops::Range;
use thiserror::Error;

/// Errors from ownership and local-index lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The id lies outside the lattice.
    #[error("{site} is outside a lattice of {site_count} sites")]
    SiteOutOfRange {
        /// Offending id.
        site: GlobalSiteId,
        /// Number of sites in the lattice.
        site_count: u64,
    },
    /// A local index was requested for a site owned elsewhere.
    #[error("{site} is owned by {owner}, not {rank}")]
    NotLocal {
        /// Requested site.
        site: GlobalSiteId,
        /// Actual owner.
        owner: WorkerId,
        /// Worker that asked.
        rank: WorkerId,
    },
    /// A partition needs at least one worker and one site.
    #[error("cannot partition {site_count} sites over {workers} workers")]
    EmptyPartition {
        /// Number of sites in the lattice.
        site_count: u64,
        /// Requested worker count.
        workers: usize,
    },
    /// Explicit per-worker counts do not add up to the lattice size.
    #[error("worker site counts sum to {sum}, lattice has {site_count} sites")]
    CountSumMismatch {
        /// Sum of the supplied counts.
        sum: u64,
        /// Number of sites in the lattice.
        site_count: u64,
    },
    /// The site count of the lattice does not fit a `u64`.
    #[error(
        "lattice {}x{}x{} has more sites than a u64 can count",
        .dims.nx,
        .dims.ny,
        .dims.nz
    )]
    TooLarge {
        /// Requested dimensions.
        dims: LatticeDims,
    },
}

/// Resolves global site ids to owners and local storage indices.
pub trait PartitionDirectory {
    /// Worker owning `site`.
    fn owner_of(&self, site: GlobalSiteId) -> Result<WorkerId, PartitionError>;

    /// Local index of `site`; only valid on the owning worker.
    fn global_to_local(&self, site: GlobalSiteId) -> Result<LocalSiteId, PartitionError>;
}

/// Extent of the lattice along each axis.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LatticeDims {
    /// Sites along x (fastest-varying).
    pub nx: u64,
    /// Sites along y.
    pub ny: u64,
    /// Sites along z (slowest-varying).
    pub nz: u64,
}

impl LatticeDims {
    /// Creates dimensions `nx × ny × nz`.
    pub fn new(nx: u64, ny: u64, nz: u64) -> Self {
        Self { nx, ny, nz }
    }

    /// A cube with `n` sites per side.
    pub fn cube(n: u64) -> Self {
        Self::new(n, n, n)
    }

    /// Total number of sites, or `None` when it overflows a `u64`.
    pub fn site_count(&self) -> Option<u64> {
        self.nx.checked_mul(self.ny)?.checked_mul(self.nz)
    }

    /// Total number of sites; [`PartitionError::TooLarge`] on overflow.
    pub fn try_site_count(&self) -> Result<u64, PartitionError> {
        self.site_count().ok_or(PartitionError::TooLarge { dims: *self })
    }

    /// Global id of `(x, y, z)`, or `None` outside the lattice.
    pub fn id_of(&self, x: u64, y: u64, z: u64) -> Option<GlobalSiteId> {
        if x >= self.nx || y >= self.ny || z >= self.nz {
            return None;
        }
        // Once the site count fits, every in-bounds id fits too.
        self.site_count()?;
        Some(GlobalSiteId(x + self.nx * (y + self.ny * z)))
    }

    /// Coordinates of `site`, or `None` outside the lattice.
    pub fn coords_of(&self, site: GlobalSiteId) -> Option<[u64; 3]> {
        if site.0 >= self.site_count()? {
            return None;
        }
        let plane = self.nx * self.ny;
        let z = site.0 / plane;
        let rem = site.0 % plane;
        Some([rem % self.nx, rem / self.nx, z])
    }

    /// Site reached from `site` by a lattice velocity `offset`, if still inside.
    pub fn neighbour(&self, site: GlobalSiteId, offset: [i64; 3]) -> Option<GlobalSiteId> {
        let [x, y, z] = self.coords_of(site)?;
        self.id_of(
            x.checked_add_signed(offset[0])?,
            y.checked_add_signed(offset[1])?,
            z.checked_add_signed(offset[2])?,
        )
    }
}

/// Contiguous global-id ranges, one per worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlabPartition {
    dims: LatticeDims,
    // starts[w]..starts[w + 1] is worker w's range; last entry is the site count.
    starts: Vec<u64>,
}

impl SlabPartition {
    /// Splits the lattice as evenly as possible; the first `count % workers`
    /// workers take one extra site.
    pub fn even(dims: LatticeDims, workers: usize) -> Result<Self, PartitionError> {
        let site_count = dims.try_site_count()?;
        let workers_u64 = u64::try_from(workers).unwrap_or(u64::MAX);
        if workers == 0 || site_count == 0 {
            return Err(PartitionError::EmptyPartition {
                site_count,
                workers,
            });
        }
        let base = site_count / workers_u64;
        let extra = site_count % workers_u64;
        let counts: Vec<u64> = (0..workers_u64)
            .map(|w| base + u64::from(w < extra))
            .collect();
        Self::from_counts(dims, &counts)
    }

    /// Builds a partition from explicit per-worker site counts (zero allowed).
    pub fn from_counts(dims: LatticeDims, counts: &[u64]) -> Result<Self, PartitionError> {
        let site_count = dims.try_site_count()?;
        if counts.is_empty() || site_count == 0 {
            return Err(PartitionError::EmptyPartition {
                site_count,
                workers: counts.len(),
            });
        }
        let mut starts = Vec::with_capacity(counts.len() + 1);
        let mut cursor = 0u64;
        for &count in counts {
            starts.push(cursor);
            cursor = cursor.saturating_add(count);
        }
        if cursor != site_count {
            return Err(PartitionError::CountSumMismatch {
                sum: cursor,
                site_count,
            });
        }
        starts.push(cursor);
        Ok(Self { dims, starts })
    }

    /// Lattice dimensions.
    pub fn dims(&self) -> LatticeDims {
        self.dims
    }

    /// Number of sites in the lattice.
    pub fn site_count(&self) -> u64 {
        self.starts.last().copied().unwrap_or_default()
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.starts.len() - 1
    }

    /// Global id range owned by `worker` (empty for out-of-range workers).
    pub fn range_of(&self, worker: WorkerId) -> Range<u64> {
        match (self.starts.get(worker.0), self.starts.get(worker.0 + 1)) {
            (Some(&start), Some(&end)) => start..end,
            _ => 0..0,
        }
    }

    /// Owner of `site`.
    pub fn owner_of(&self, site: GlobalSiteId) -> Result<WorkerId, PartitionError> {
        let site_count = self.site_count();
        if site.0 >= site_count {
            return Err(PartitionError::SiteOutOfRange { site, site_count });
        }
        // Last worker whose start is <= site; empty ranges share a start with
        // their successor and are skipped by taking the last match.
        let after = self.starts.partition_point(|&start| start <= site.0);
        Ok(WorkerId(after - 1))
    }

    /// Local index of `site` within `rank`'s range.
    pub fn local_index(
        &self,
        rank: WorkerId,
        site: GlobalSiteId,
    ) -> Result<LocalSiteId, PartitionError> {
        let owner = self.owner_of(site)?;
        if owner != rank {
            return Err(PartitionError::NotLocal { site, owner, rank });
        }
        let offset = site.0 - self.range_of(rank).start;
        usize::try_from(offset)
            .map(LocalSiteId)
            .map_err(|_| PartitionError::SiteOutOfRange {
                site,
                site_count: self.site_count(),
            })
    }

    /// Directory view for `rank`: ownership plus `rank`'s local indices.
    pub fn view(&self, rank: WorkerId) -> WorkerView<'_> {
        WorkerView {
            partition: self,
            rank,
        }
    }
}

/// A [`SlabPartition`] seen from one worker.
#[derive(Clone, Copy, Debug)]
pub struct WorkerView<'a> {
    partition: &'a SlabPartition,
    rank: WorkerId,
}

impl WorkerView<'_> {
    /// Worker this view resolves local indices for.
    pub fn rank(&self) -> WorkerId {
        self.rank
    }
}

impl PartitionDirectory for WorkerView<'_> {
    fn owner_of(&self, site: GlobalSiteId) -> Result<WorkerId, PartitionError> {
        self.partition.owner_of(site)
    }

    fn global_to_local(&self, site: GlobalSiteId) -> Result<LocalSiteId, PartitionError> {
        self.partition.local_index(self.rank, site)
    }
}
