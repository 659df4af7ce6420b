// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic lattices whose site values any worker can recompute.

use halo_core::{
    GlobalSiteId, LatticeDims, LatticeModel, LatticeSite, LocalLattice, PartitionError, SiteData,
    SiteGeometry, SlabPartition, WorkerId,
};

/// Edge length of the [`four_cube_lattice`] fixture.
pub const FOUR_CUBE: u64 = 4;

fn scalar(site: GlobalSiteId) -> f64 {
    f64::from(u32::try_from(site.0 % 1_000_000).unwrap_or_default())
}

/// Distribution vector of `site` at `step`.
pub fn seeded_distributions(model: LatticeModel, site: GlobalSiteId, step: u32) -> Vec<f64> {
    let base = scalar(site) + f64::from(step) * 0.5;
    (0..model.directions())
        .map(|q| base + f64::from(u32::try_from(q).unwrap_or_default()) / 64.0)
        .collect()
}

/// Site values derived from the global id alone (distributions at step 0).
pub fn seeded_site(model: LatticeModel, site: GlobalSiteId) -> LatticeSite {
    let s = scalar(site);
    let word = u32::try_from(site.0 & 0xffff_ffff).unwrap_or_default();
    LatticeSite {
        geometry: SiteGeometry {
            site_data: SiteData {
                intersection_data: word ^ 0xa5a5,
                other_raw_data: word.wrapping_mul(3).wrapping_add(1),
            },
            wall_distances: (0..model.wall_distance_len())
                .map(|i| s + f64::from(u32::try_from(i).unwrap_or_default()) / 100.0)
                .collect(),
            wall_normal: [s, -s, 0.5],
        },
        distributions: seeded_distributions(model, site, 0),
    }
}

/// `rank`'s slice of `partition`, filled with [`seeded_site`] values.
pub fn seeded_lattice(
    rank: WorkerId,
    partition: SlabPartition,
    model: LatticeModel,
) -> LocalLattice {
    LocalLattice::with_sites(rank, model, partition, |site| seeded_site(model, site))
}

/// `rank`'s slice of a 4×4×4 lattice split evenly over `workers`.
pub fn four_cube_lattice(
    rank: WorkerId,
    workers: usize,
    model: LatticeModel,
) -> Result<LocalLattice, PartitionError> {
    let partition = SlabPartition::even(LatticeDims::cube(FOUR_CUBE), workers)?;
    Ok(seeded_lattice(rank, partition, model))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use halo_core::{LatticeStore, PartitionDirectory};

    #[test]
    fn seeded_sites_fit_every_model() {
        for model in [LatticeModel::D3Q15, LatticeModel::D3Q19, LatticeModel::D3Q27] {
            assert!(seeded_site(model, GlobalSiteId(42)).fits(model));
        }
    }

    #[test]
    fn four_cube_lattice_holds_seeded_values() {
        let lattice = four_cube_lattice(WorkerId(1), 2, LatticeModel::D3Q19).unwrap();
        assert_eq!(lattice.len(), 32);
        let local = lattice.global_to_local(GlobalSiteId(40)).unwrap();
        assert_eq!(
            lattice.site(local),
            Some(&seeded_site(LatticeModel::D3Q19, GlobalSiteId(40)))
        );
    }
}
