// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end halo exchanges over an in-process mesh.
//!
//! - Two-worker geometry and distribution exchange
//! - Positional integrity of several sites from one owner
//! - Registration after negotiation
//! - Split request/dispatch for the dynamic exchange
//! - Shape mismatches surfacing as fabric errors

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]

use halo_core::{
    transfer, Fabric, FabricError, FabricExt, GhostStore, GlobalSiteId, HaloError, HaloExchange,
    LatticeDims, LatticeModel, LocalLattice, NegotiationState, SiteRequirement, SlabPartition,
    WorkerId,
};
use halo_dry_tests::{
    check_pairwise, four_cube_lattice, run_recorded, run_workers, seeded_distributions,
    seeded_lattice, seeded_site, Op,
};

const MODEL: LatticeModel = LatticeModel::D3Q15;

/// 200 sites over two workers: 0..100 on worker 0, 100..200 on worker 1.
fn line_lattice(rank: WorkerId, model: LatticeModel) -> LocalLattice {
    let partition = SlabPartition::even(LatticeDims::new(200, 1, 1), 2).unwrap();
    seeded_lattice(rank, partition, model)
}

fn register_all(halo: &mut HaloExchange, sites: &[u64]) {
    for &site in sites {
        halo.register_need(GlobalSiteId(site), SiteRequirement::EVERYTHING);
    }
}

#[test]
fn two_workers_mirror_each_others_sites() {
    let results = run_workers(2, |mut fabric| {
        let rank = fabric.rank();
        let lattice = line_lattice(rank, MODEL);
        let mut ghosts = GhostStore::new(MODEL);
        let mut halo = HaloExchange::new();
        let wanted = if rank == WorkerId(0) { 100 } else { 5 };
        register_all(&mut halo, &[wanted]);

        let written = halo
            .transfer_static(&lattice, &mut ghosts, &mut fabric)
            .unwrap();
        assert_eq!(written, 1);
        let other = WorkerId(1 - rank.0);
        let table = halo.needs_from_me().unwrap().for_worker(other).to_vec();
        (GlobalSiteId(wanted), table, ghosts)
    });

    assert_eq!(results[0].1, vec![GlobalSiteId(5)]);
    assert_eq!(results[1].1, vec![GlobalSiteId(100)]);
    for (wanted, _, ghosts) in &results {
        assert_eq!(ghosts.len(), 1);
        let record = ghosts.get(*wanted).unwrap();
        assert_eq!(record.geometry, seeded_site(MODEL, *wanted).geometry);
    }
}

#[test]
fn sites_from_one_owner_land_in_their_own_records() {
    let needs = [3u64, 1, 2];
    let results = run_workers(2, |mut fabric| {
        let rank = fabric.rank();
        let lattice = four_cube_lattice(rank, 2, MODEL).unwrap();
        let mut ghosts = GhostStore::new(MODEL);
        let mut halo = HaloExchange::new();
        if rank == WorkerId(1) {
            register_all(&mut halo, &needs);
        }
        halo.transfer_static(&lattice, &mut ghosts, &mut fabric).unwrap();
        halo.transfer_dynamic(&lattice, &mut ghosts, &mut fabric).unwrap();
        let table = halo
            .needs_from_me()
            .unwrap()
            .for_worker(WorkerId(1))
            .to_vec();
        (table, ghosts)
    });

    let (owner_table, owner_ghosts) = &results[0];
    assert_eq!(owner_table, &needs.map(GlobalSiteId).to_vec());
    assert!(owner_ghosts.is_empty());

    let (_, ghosts) = &results[1];
    for site in needs.map(GlobalSiteId) {
        assert_eq!(ghosts.get(site), Some(&seeded_site(MODEL, site)));
    }
}

#[test]
fn distributions_follow_the_owner_every_step() {
    const STEPS: u32 = 4;
    let results = run_workers(3, |mut fabric| {
        let rank = fabric.rank();
        let mut lattice = four_cube_lattice(rank, 3, LatticeModel::D3Q27).unwrap();
        let mut ghosts = GhostStore::new(LatticeModel::D3Q27);
        let mut halo = HaloExchange::new();
        // The first site of each other worker's range.
        let firsts: Vec<u64> = WorkerId::all(3)
            .filter(|&w| w != rank)
            .map(|w| lattice.partition().range_of(w).start)
            .collect();
        register_all(&mut halo, &firsts);
        halo.transfer_static(&lattice, &mut ghosts, &mut fabric).unwrap();

        let mut history = Vec::new();
        for step in 1..=STEPS {
            let owned: Vec<GlobalSiteId> = lattice.global_ids().collect();
            for site in owned {
                lattice.site_by_global_mut(site).unwrap().distributions =
                    seeded_distributions(LatticeModel::D3Q27, site, step);
            }
            halo.transfer_dynamic(&lattice, &mut ghosts, &mut fabric).unwrap();
            let snapshot: Vec<_> = ghosts
                .iter()
                .map(|(site, record)| (site, record.distributions.clone()))
                .collect();
            history.push(snapshot);
        }
        history
    });

    for history in results {
        for (step, snapshot) in (1..=STEPS).zip(history) {
            assert_eq!(snapshot.len(), 2);
            for (site, values) in snapshot {
                assert_eq!(
                    values,
                    seeded_distributions(LatticeModel::D3Q27, site, step)
                );
            }
        }
    }
}

#[test]
fn late_registration_is_kept_locally_but_never_exchanged() {
    let results = run_workers(2, |mut fabric| {
        let rank = fabric.rank();
        let lattice = line_lattice(rank, MODEL);
        let mut ghosts = GhostStore::new(MODEL);
        let mut halo = HaloExchange::new();
        if rank == WorkerId(0) {
            register_all(&mut halo, &[150]);
        }
        halo.transfer_static(&lattice, &mut ghosts, &mut fabric).unwrap();
        if rank == WorkerId(0) {
            register_all(&mut halo, &[199]);
        }
        halo.transfer_dynamic(&lattice, &mut ghosts, &mut fabric).unwrap();
        let table = halo
            .needs_from_me()
            .unwrap()
            .for_worker(WorkerId(0))
            .to_vec();
        (
            halo.needs().to_vec(),
            halo.negotiated_needs().to_vec(),
            table,
            ghosts,
        )
    });

    let (needs, negotiated, _, ghosts) = &results[0];
    assert_eq!(needs, &vec![GlobalSiteId(150), GlobalSiteId(199)]);
    assert_eq!(negotiated, &vec![GlobalSiteId(150)]);
    assert!(ghosts.contains(GlobalSiteId(150)));
    assert!(!ghosts.contains(GlobalSiteId(199)));

    let (_, _, owner_table, _) = &results[1];
    assert_eq!(owner_table, &vec![GlobalSiteId(150)]);
}

#[test]
fn full_session_pairs_up_batch_by_batch() {
    let results = run_recorded(4, |fabric| {
        let rank = fabric.rank();
        let lattice = four_cube_lattice(rank, 4, LatticeModel::D3Q19).unwrap();
        let mut ghosts = GhostStore::new(LatticeModel::D3Q19);
        let mut halo = HaloExchange::new();
        // Every worker wants the last site of the next worker's range and the
        // first site of the previous one.
        let next = WorkerId((rank.0 + 1) % 4);
        let prev = WorkerId((rank.0 + 3) % 4);
        let partition = lattice.partition().clone();
        register_all(
            &mut halo,
            &[partition.range_of(next).end - 1, partition.range_of(prev).start],
        );
        halo.transfer_static(&lattice, &mut ghosts, fabric).unwrap();
        halo.transfer_dynamic(&lattice, &mut ghosts, fabric).unwrap();
        fabric.dispatch_count()
    });

    let logs: Vec<_> = results.iter().map(|(_, log)| log.clone()).collect();
    check_pairwise(&logs).unwrap();
    for (dispatches, _) in results {
        // Count exchange, list exchange, static batch, dynamic batch.
        assert_eq!(dispatches, 4);
    }
}

#[test]
fn message_counts_scale_with_sites() {
    let results = run_recorded(2, |fabric| {
        let rank = fabric.rank();
        let lattice = line_lattice(rank, MODEL);
        let mut ghosts = GhostStore::new(MODEL);
        let mut halo = HaloExchange::new();
        let wanted: &[u64] = if rank == WorkerId(0) {
            &[100, 101, 102]
        } else {
            &[7]
        };
        register_all(&mut halo, wanted);
        halo.transfer_static(&lattice, &mut ghosts, fabric).unwrap();
        halo.transfer_dynamic(&lattice, &mut ghosts, fabric).unwrap();
    });

    let count = |batch: &[Op], receive: bool| {
        batch
            .iter()
            .filter(|op| matches!(op, Op::Receive { .. }) == receive && op.is_point_to_point())
            .count()
    };
    // Batches: counts, lists, static, dynamic.
    let (_, worker0) = &results[0];
    assert_eq!(
        count(&worker0[2], true),
        3 * transfer::STATIC_MESSAGES_PER_SITE
    );
    assert_eq!(count(&worker0[2], false), transfer::STATIC_MESSAGES_PER_SITE);
    assert_eq!(
        count(&worker0[3], true),
        3 * transfer::DYNAMIC_MESSAGES_PER_SITE
    );
    assert_eq!(count(&worker0[3], false), transfer::DYNAMIC_MESSAGES_PER_SITE);
}

#[test]
fn empty_need_sets_move_no_site_data() {
    let results = run_recorded(3, |fabric| {
        let rank = fabric.rank();
        let lattice = four_cube_lattice(rank, 3, MODEL).unwrap();
        let mut ghosts = GhostStore::new(MODEL);
        let mut halo = HaloExchange::new();
        let written = halo.transfer_static(&lattice, &mut ghosts, fabric).unwrap()
            + halo.transfer_dynamic(&lattice, &mut ghosts, fabric).unwrap();
        (written, ghosts.len(), fabric.point_to_point_count())
    });

    for ((written, ghosts, point_to_point), batches) in results {
        assert_eq!((written, ghosts, point_to_point), (0, 0, 0));
        assert_eq!(batches.len(), 4);
        assert!(batches[1..].iter().all(Vec::is_empty));
    }
}

#[test]
fn dynamic_request_folds_into_a_caller_batch() {
    let results = run_workers(2, |mut fabric| {
        let rank = fabric.rank();
        let peer = WorkerId(1 - rank.0);
        let lattice = line_lattice(rank, MODEL);
        let mut ghosts = GhostStore::new(MODEL);
        let mut halo = HaloExchange::new();
        let wanted = if rank == WorkerId(0) { 120 } else { 80 };
        register_all(&mut halo, &[wanted]);

        let pending = halo.request_dynamic(&lattice, &mut fabric).unwrap();
        assert_eq!(halo.state(), NegotiationState::Shared);
        assert_eq!(pending.sites().collect::<Vec<_>>(), vec![GlobalSiteId(wanted)]);

        // Unrelated traffic in the same batch.
        let token = fabric.queue_receive_slice::<u64>(peer, 1).unwrap();
        let tag = 7 + u64::try_from(rank.0).unwrap();
        fabric.queue_send_slice(peer, &[tag]).unwrap();

        let mut delivery = fabric.dispatch().unwrap();
        let written = pending.apply(&mut delivery, &mut ghosts).unwrap();
        let extra = delivery.take_slice::<u64>(token).unwrap();
        (written, extra, ghosts.get(GlobalSiteId(wanted)).cloned())
    });

    assert_eq!(results[0].1, vec![8]);
    assert_eq!(results[1].1, vec![7]);
    for (written, _, record) in results {
        assert_eq!(written, 1);
        let record = record.unwrap();
        assert_eq!(record.distributions.len(), MODEL.directions());
        // Geometry was never exchanged, so it stays zeroed.
        assert_eq!(record.geometry.wall_normal, [0.0; 3]);
    }
}

#[test]
fn mismatched_models_fail_with_a_length_error() {
    let results = run_workers(2, |mut fabric| {
        let rank = fabric.rank();
        let model = if rank == WorkerId(0) {
            LatticeModel::D3Q15
        } else {
            LatticeModel::D3Q19
        };
        let lattice = line_lattice(rank, model);
        let mut ghosts = GhostStore::new(model);
        let mut halo = HaloExchange::new();
        register_all(&mut halo, &[if rank == WorkerId(0) { 150 } else { 50 }]);
        halo.transfer_static(&lattice, &mut ghosts, &mut fabric)
    });

    for result in results {
        let err = result.unwrap_err();
        assert!(
            matches!(
                err,
                HaloError::Fabric(FabricError::LengthMismatch { .. })
            ),
            "unexpected error: {err}"
        );
    }
}
