// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lattice descriptors and per-worker site storage.

use crate::ident::{GlobalSiteId, LocalSiteId, WorkerId};
use crate::partition::{PartitionDirectory, PartitionError, SlabPartition};
use bytemuck::{Pod, Zeroable};

const REST: [i64; 3] = [0, 0, 0];
const FACES: [[i64; 3]; 6] = [
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
];
const EDGES: [[i64; 3]; 12] = [
    [1, 1, 0],
    [-1, -1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 0, 1],
    [-1, 0, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [0, 1, 1],
    [0, -1, -1],
    [0, 1, -1],
    [0, -1, 1],
];
const CORNERS: [[i64; 3]; 8] = [
    [1, 1, 1],
    [-1, -1, -1],
    [1, 1, -1],
    [-1, -1, 1],
    [1, -1, 1],
    [-1, 1, -1],
    [1, -1, -1],
    [-1, 1, 1],
];

/// Discrete velocity set of the lattice-Boltzmann model.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LatticeModel {
    /// Rest, 6 faces, 8 corners.
    #[default]
    D3Q15,
    /// Rest, 6 faces, 12 edges.
    D3Q19,
    /// The full 3×3×3 stencil.
    D3Q27,
}

impl LatticeModel {
    /// Number of lattice directions (length of the distribution vector).
    pub fn directions(self) -> usize {
        match self {
            Self::D3Q15 => 15,
            Self::D3Q19 => 19,
            Self::D3Q27 => 27,
        }
    }

    /// Length of the wall-distance vector: one entry per non-rest direction.
    pub fn wall_distance_len(self) -> usize {
        self.directions() - 1
    }

    /// Velocity vectors, rest direction first.
    pub fn velocities(self) -> Vec<[i64; 3]> {
        let mut out = Vec::with_capacity(self.directions());
        out.push(REST);
        out.extend_from_slice(&FACES);
        match self {
            Self::D3Q15 => out.extend_from_slice(&CORNERS),
            Self::D3Q19 => out.extend_from_slice(&EDGES),
            Self::D3Q27 => {
                out.extend_from_slice(&EDGES);
                out.extend_from_slice(&CORNERS);
            }
        }
        out
    }
}

/// Packed geometry words of a site: wall/inlet/outlet intersection flags and
/// the auxiliary raw field (site type, boundary ids).
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Pod, Zeroable)]
pub struct SiteData {
    /// Per-direction intersection bits.
    pub intersection_data: u32,
    /// Site type and boundary identifiers.
    pub other_raw_data: u32,
}

/// Time-invariant attributes of a site.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SiteGeometry {
    /// Packed geometry words.
    pub site_data: SiteData,
    /// Distance to the wall along each non-rest direction.
    pub wall_distances: Vec<f64>,
    /// Outward wall normal (zero away from walls).
    pub wall_normal: [f64; 3],
}

/// A lattice site: geometry plus the current distribution function.
///
/// Local sites and ghost records share this shape.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct LatticeSite {
    /// Time-invariant attributes.
    pub geometry: SiteGeometry,
    /// Distribution values, one per lattice direction.
    pub distributions: Vec<f64>,
}

impl LatticeSite {
    /// A zeroed site sized for `model`.
    pub fn zeroed(model: LatticeModel) -> Self {
        Self {
            geometry: SiteGeometry {
                site_data: SiteData::default(),
                wall_distances: vec![0.0; model.wall_distance_len()],
                wall_normal: [0.0; 3],
            },
            distributions: vec![0.0; model.directions()],
        }
    }

    /// `true` when vector lengths match `model`.
    pub fn fits(&self, model: LatticeModel) -> bool {
        self.geometry.wall_distances.len() == model.wall_distance_len()
            && self.distributions.len() == model.directions()
    }
}

/// Read access to the sites a worker owns, plus ownership lookup.
pub trait LatticeStore: PartitionDirectory {
    /// Velocity set shared by every site.
    fn model(&self) -> LatticeModel;

    /// Site at `local`, if stored.
    fn site(&self, local: LocalSiteId) -> Option<&LatticeSite>;
}

/// One worker's contiguous slice of the lattice.
#[derive(Clone, Debug)]
pub struct LocalLattice {
    rank: WorkerId,
    model: LatticeModel,
    partition: SlabPartition,
    sites: Vec<LatticeSite>,
}

impl LocalLattice {
    /// Zero-initialised storage for `rank`'s range of `partition`.
    pub fn new(rank: WorkerId, model: LatticeModel, partition: SlabPartition) -> Self {
        Self::with_sites(rank, model, partition, |_| LatticeSite::zeroed(model))
    }

    /// Storage for `rank`'s range with each site built by `init` from its global id.
    ///
    /// Sites whose vectors do not fit `model` are replaced with zeroed ones.
    pub fn with_sites<F>(
        rank: WorkerId,
        model: LatticeModel,
        partition: SlabPartition,
        mut init: F,
    ) -> Self
    where
        F: FnMut(GlobalSiteId) -> LatticeSite,
    {
        let sites = partition
            .range_of(rank)
            .map(|id| {
                let site = init(GlobalSiteId(id));
                if site.fits(model) {
                    site
                } else {
                    LatticeSite::zeroed(model)
                }
            })
            .collect();
        Self {
            rank,
            model,
            partition,
            sites,
        }
    }

    /// Owning worker.
    pub fn rank(&self) -> WorkerId {
        self.rank
    }

    /// Partition shared by every worker.
    pub fn partition(&self) -> &SlabPartition {
        &self.partition
    }

    /// Number of locally owned sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// `true` when this worker owns no sites.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Global ids of every owned site, in local order.
    pub fn global_ids(&self) -> impl Iterator<Item = GlobalSiteId> {
        self.partition.range_of(self.rank).map(GlobalSiteId)
    }

    /// Mutable access to an owned site.
    pub fn site_mut(&mut self, local: LocalSiteId) -> Option<&mut LatticeSite> {
        self.sites.get_mut(local.0)
    }

    /// Mutable access by global id; `None` for sites owned elsewhere.
    pub fn site_by_global_mut(&mut self, site: GlobalSiteId) -> Option<&mut LatticeSite> {
        let local = self.partition.local_index(self.rank, site).ok()?;
        self.sites.get_mut(local.0)
    }
}

impl PartitionDirectory for LocalLattice {
    fn owner_of(&self, site: GlobalSiteId) -> Result<WorkerId, PartitionError> {
        self.partition.view(self.rank).owner_of(site)
    }

    fn global_to_local(&self, site: GlobalSiteId) -> Result<LocalSiteId, PartitionError> {
        self.partition.view(self.rank).global_to_local(site)
    }
}

impl LatticeStore for LocalLattice {
    fn model(&self) -> LatticeModel {
        self.model
    }

    fn site(&self, local: LocalSiteId) -> Option<&LatticeSite> {
        self.sites.get(local.0)
    }
}
