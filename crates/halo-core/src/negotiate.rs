// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Count-then-data needs negotiation.
//!
//! 1. Split the need set by owner, keeping need-set order within each list.
//! 2. One scalar all-to-all: publish `|needs from w|` to every `w`, learn how
//!    many of my sites each `w` needs.
//! 3. One batch of variable-length point-to-point messages carrying the lists.
//!
//! Peers with a zero count exchange nothing; both sides know the count, so the
//! skip is symmetric. The result on worker `B` for peer `A` is exactly `A`'s
//! ordered sub-list of needs owned by `B`.

use crate::error::HaloError;
use crate::fabric::{Fabric, FabricExt, Ticket};
use crate::ident::{GlobalSiteId, WorkerId};
use crate::partition::PartitionDirectory;
use tracing::{debug, instrument, trace};

/// For every peer, the ordered list of this worker's sites that peer mirrors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeedsFromMe {
    per_worker: Vec<Vec<GlobalSiteId>>,
}

impl NeedsFromMe {
    /// No peer needs anything.
    pub fn empty(workers: usize) -> Self {
        Self {
            per_worker: vec![Vec::new(); workers],
        }
    }

    /// Tables from explicit per-worker lists, indexed by rank.
    pub fn from_lists(per_worker: Vec<Vec<GlobalSiteId>>) -> Self {
        Self { per_worker }
    }

    /// Number of workers covered.
    pub fn workers(&self) -> usize {
        self.per_worker.len()
    }

    /// Sites `worker` needs from me, in its need-set order.
    pub fn for_worker(&self, worker: WorkerId) -> &[GlobalSiteId] {
        self.per_worker.get(worker.0).map_or(&[], Vec::as_slice)
    }

    /// `(peer, sites)` pairs in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, &[GlobalSiteId])> {
        self.per_worker
            .iter()
            .enumerate()
            .map(|(w, list)| (WorkerId(w), list.as_slice()))
    }

    /// Total number of sites sent per exchange.
    pub fn total(&self) -> usize {
        self.per_worker.iter().map(Vec::len).sum()
    }
}

/// Splits `needs` by owning worker, preserving order within each list.
pub fn partition_by_owner<D>(
    needs: &[GlobalSiteId],
    directory: &D,
    workers: usize,
) -> Result<Vec<Vec<GlobalSiteId>>, HaloError>
where
    D: PartitionDirectory + ?Sized,
{
    let mut by_owner = vec![Vec::new(); workers];
    for &site in needs {
        let owner = directory.owner_of(site)?;
        trace!(%site, %owner, "need registered");
        by_owner
            .get_mut(owner.0)
            .ok_or(HaloError::OwnerOutOfRange {
                site,
                owner,
                workers,
            })?
            .push(site);
    }
    Ok(by_owner)
}

/// Runs the negotiation for `needs` and returns what every peer needs from me.
///
/// Exactly two dispatches: the count all-to-all and the list exchange.
#[instrument(skip_all, fields(rank = %fabric.rank(), needs = needs.len()))]
pub fn share_needs<F, D>(
    needs: &[GlobalSiteId],
    directory: &D,
    fabric: &mut F,
) -> Result<NeedsFromMe, HaloError>
where
    F: Fabric + ?Sized,
    D: PartitionDirectory + ?Sized,
{
    let workers = fabric.size();
    let needs_i_have_from = partition_by_owner(needs, directory, workers)?;

    let counts = needs_i_have_from
        .iter()
        .enumerate()
        .map(|(w, list)| {
            u32::try_from(list.len()).map_err(|_| HaloError::CountOverflow {
                peer: WorkerId(w),
                count: list.len(),
            })
        })
        .collect::<Result<Vec<u32>, _>>()?;

    fabric.queue_all_to_all_send(&counts)?;
    let counts_ticket = fabric.queue_all_to_all_receive();
    let counts_from = fabric.dispatch()?.take_slice::<u32>(counts_ticket)?;
    if counts_from.len() != workers {
        return Err(HaloError::CountVectorLength {
            expected: workers,
            actual: counts_from.len(),
        });
    }

    let mut tickets: Vec<Option<Ticket>> = Vec::with_capacity(workers);
    for (peer, outgoing) in WorkerId::all(workers).zip(&needs_i_have_from) {
        if !outgoing.is_empty() {
            fabric.queue_send_variable_slice(peer, outgoing)?;
        }
        let incoming = counts_from[peer.0] as usize;
        let ticket = if incoming > 0 {
            Some(fabric.queue_receive_variable_slice::<GlobalSiteId>(peer, incoming)?)
        } else {
            None
        };
        if !outgoing.is_empty() || incoming > 0 {
            debug!(%peer, outgoing = outgoing.len(), incoming, "exchanging need lists");
        }
        tickets.push(ticket);
    }

    let mut delivery = fabric.dispatch()?;
    let per_worker = tickets
        .into_iter()
        .map(|ticket| match ticket {
            Some(t) => delivery.take_slice::<GlobalSiteId>(t),
            None => Ok(Vec::new()),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NeedsFromMe { per_worker })
}
