// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Threaded driver: one worker per thread over a local mesh.

use crate::config::HaloRunConfig;
use anyhow::{anyhow, Context, Result};
use halo_core::{
    transfer, Fabric, GhostStore, GlobalSiteId, HaloError, HaloExchange, LatticeDims,
    LatticeModel, LatticeSite, LocalLattice, NeedsFromMe, PartitionDirectory, SiteData,
    SiteGeometry, SiteRequirement, SlabPartition, WorkerId,
};
use halo_fabric_local::LocalFabric;
use serde::Serialize;
use tracing::{debug, info, instrument};

/// What one worker did during a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Worker rank.
    pub rank: usize,
    /// Sites owned.
    pub owned: usize,
    /// Distinct ghost sites registered.
    pub needs: usize,
    /// Peers ghost data came from.
    pub sources: Vec<usize>,
    /// Sites sent to peers per exchange.
    pub sent_per_exchange: usize,
    /// Ghost records held at the end.
    pub ghosts: usize,
    /// Ghost values that differed from the owner's.
    pub mismatches: usize,
    /// Batches dispatched.
    pub batches: usize,
}

fn scalar(value: u64) -> f64 {
    f64::from(u32::try_from(value % 1_000_000).unwrap_or_default())
}

fn index_scalar(index: usize) -> f64 {
    scalar(u64::try_from(index).unwrap_or_default())
}

fn geometry_of(model: LatticeModel, dims: LatticeDims, site: GlobalSiteId) -> SiteGeometry {
    let [x, y, z] = dims.coords_of(site).unwrap_or_default();
    let word = u32::try_from(site.0 & 0xffff_ffff).unwrap_or_default();
    SiteGeometry {
        site_data: SiteData {
            intersection_data: word.rotate_left(7),
            other_raw_data: word ^ 0x5a5a_5a5a,
        },
        wall_distances: (0..model.wall_distance_len())
            .map(|i| scalar(site.0) + index_scalar(i) * 1.0e-3)
            .collect(),
        wall_normal: [scalar(x), scalar(y), scalar(z)],
    }
}

fn distributions_at(model: LatticeModel, site: GlobalSiteId, step: u32) -> Vec<f64> {
    let base = scalar(site.0) * 0.25 + f64::from(step);
    (0..model.directions())
        .map(|q| base + index_scalar(q) / 32.0)
        .collect()
}

/// Sites within `width` steps along any lattice velocity that `rank` does not own.
fn halo_sites(
    lattice: &LocalLattice,
    dims: LatticeDims,
    model: LatticeModel,
    width: u32,
) -> Result<Vec<GlobalSiteId>, HaloError> {
    let rank = lattice.rank();
    let velocities = model.velocities();
    let mut out = Vec::new();
    for site in lattice.global_ids() {
        for velocity in &velocities {
            for reach in 1..=i64::from(width) {
                let offset = velocity.map(|c| c * reach);
                if let Some(neighbour) = dims.neighbour(site, offset) {
                    if lattice.owner_of(neighbour)? != rank {
                        out.push(neighbour);
                    }
                }
            }
        }
    }
    Ok(out)
}

#[instrument(skip_all, fields(rank = %fabric.rank()))]
fn run_worker(
    config: &HaloRunConfig,
    partition: SlabPartition,
    mut fabric: LocalFabric,
) -> Result<WorkerReport, HaloError> {
    let rank = fabric.rank();
    let HaloRunConfig {
        dims,
        model,
        steps,
        halo_width,
        ..
    } = *config;

    let mut lattice = LocalLattice::with_sites(rank, model, partition, |site| LatticeSite {
        geometry: geometry_of(model, dims, site),
        distributions: distributions_at(model, site, 0),
    });
    let mut ghosts = GhostStore::new(model);
    let mut halo = HaloExchange::new();

    for site in halo_sites(&lattice, dims, model, halo_width)? {
        halo.register_need(site, SiteRequirement::EVERYTHING);
    }
    debug!(owned = lattice.len(), needs = halo.needs().len(), "needs registered");

    halo.transfer_static(&lattice, &mut ghosts, &mut fabric)?;
    let mut mismatches = ghosts
        .iter_unordered()
        .filter(|(site, record)| record.geometry != geometry_of(model, dims, *site))
        .count();

    for step in 1..=steps {
        let owned: Vec<GlobalSiteId> = lattice.global_ids().collect();
        for site in owned {
            if let Some(local) = lattice.site_by_global_mut(site) {
                local.distributions = distributions_at(model, site, step);
            }
        }
        halo.transfer_dynamic(&lattice, &mut ghosts, &mut fabric)?;
        mismatches += ghosts
            .iter_unordered()
            .filter(|(site, record)| record.distributions != distributions_at(model, *site, step))
            .count();
    }

    let sources = transfer::sources(halo.negotiated_needs(), &lattice)?;

    Ok(WorkerReport {
        rank: rank.index(),
        owned: lattice.len(),
        needs: halo.needs().len(),
        sources: sources.into_iter().map(WorkerId::index).collect(),
        sent_per_exchange: halo.needs_from_me().map_or(0, NeedsFromMe::total),
        ghosts: ghosts.len(),
        mismatches,
        batches: fabric.batches(),
    })
}

/// Runs `config` to completion and returns one report per worker, in rank order.
pub fn run(config: &HaloRunConfig) -> Result<Vec<WorkerReport>> {
    config.validate()?;
    let partition = SlabPartition::even(config.dims, config.workers)
        .context("cannot partition the lattice")?;
    info!(
        workers = config.workers,
        sites = partition.site_count(),
        model = ?config.model,
        steps = config.steps,
        "starting halo run"
    );

    let results: Vec<Result<WorkerReport>> = std::thread::scope(|s| {
        let handles: Vec<_> = LocalFabric::mesh(config.workers)
            .into_iter()
            .map(|fabric| {
                let partition = partition.clone();
                s.spawn(move || run_worker(config, partition, fabric))
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| match h.join() {
                Ok(report) => report.with_context(|| format!("worker {rank} failed")),
                Err(_) => Err(anyhow!("worker {rank} panicked")),
            })
            .collect()
    });

    let reports = results.into_iter().collect::<Result<Vec<_>>>()?;
    info!(
        ghosts = reports.iter().map(|r| r.ghosts).sum::<usize>(),
        "halo run finished"
    );
    Ok(reports)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn two_slabs_exchange_one_plane_each() {
        let config = HaloRunConfig {
            dims: LatticeDims::cube(4),
            model: LatticeModel::D3Q19,
            workers: 2,
            steps: 3,
            halo_width: 1,
        };
        let reports = run(&config).unwrap();
        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert_eq!(report.owned, 32);
            // The neighbouring z-plane.
            assert_eq!(report.needs, 16);
            assert_eq!(report.ghosts, 16);
            assert_eq!(report.sent_per_exchange, 16);
            assert_eq!(report.mismatches, 0);
            // Counts, lists, static, then one per step.
            assert_eq!(report.batches, 2 + 1 + 3);
        }
        assert_eq!(reports[0].sources, vec![1]);
        assert_eq!(reports[1].sources, vec![0]);
    }

    #[test]
    fn single_worker_has_no_ghosts() {
        let config = HaloRunConfig {
            dims: LatticeDims::new(3, 3, 3),
            workers: 1,
            steps: 2,
            ..HaloRunConfig::default()
        };
        let reports = run(&config).unwrap();
        assert_eq!(reports[0].needs, 0);
        assert_eq!(reports[0].ghosts, 0);
        assert!(reports[0].sources.is_empty());
    }

    #[test]
    fn wider_halo_reaches_further_planes() {
        let config = HaloRunConfig {
            dims: LatticeDims::new(2, 2, 8),
            model: LatticeModel::D3Q15,
            workers: 2,
            steps: 1,
            halo_width: 2,
        };
        let reports = run(&config).unwrap();
        for report in reports {
            assert_eq!(report.needs, 8);
            assert_eq!(report.mismatches, 0);
        }
    }

    #[test]
    fn zero_workers_is_an_error() {
        let config = HaloRunConfig {
            workers: 0,
            ..HaloRunConfig::default()
        };
        assert!(run(&config).is_err());
    }
}
