// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Static and dynamic halo exchanges over negotiated tables.
//!
//! Both protocols queue every receive (walking the need set) and then every
//! send (walking [`NeedsFromMe`] peer by peer), so that the k-th receive this
//! worker queues from `B` lines up with the k-th send `B` queues for it.
//!
//! Static payload per site, in order: intersection word, auxiliary raw word,
//! wall distances (`directions − 1` values), wall normal (3 values).
//! Dynamic payload per site: the distribution vector (`directions` values).

use crate::error::HaloError;
use crate::fabric::{Delivery, Fabric, FabricError, FabricExt, Ticket};
use crate::ghost::GhostStore;
use crate::ident::{GlobalSiteId, WorkerId};
use crate::lattice::{LatticeSite, LatticeStore, SiteData};
use crate::negotiate::NeedsFromMe;
use tracing::{debug, instrument};

#[derive(Debug)]
enum SlotTickets {
    Geometry {
        intersection: Ticket,
        raw: Ticket,
        wall_distances: Ticket,
        wall_normal: Ticket,
    },
    Distributions(Ticket),
}

/// Receives queued for ghost sites, waiting for the batch to be dispatched.
///
/// Produced by [`request_static`] or [`request_dynamic`]; consume it with
/// [`apply`](Self::apply) once the caller has dispatched the fabric.
#[derive(Debug)]
#[must_use = "queued ghost receives are lost unless applied"]
pub struct PendingGhostReceives {
    slots: Vec<(GlobalSiteId, SlotTickets)>,
}

impl PendingGhostReceives {
    /// Number of ghost sites awaiting data.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` when nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ghost sites in the order their receives were queued.
    pub fn sites(&self) -> impl Iterator<Item = GlobalSiteId> + '_ {
        self.slots.iter().map(|(site, _)| *site)
    }

    /// Copies the delivered buffers into `ghosts`. Returns the number of
    /// records written.
    pub fn apply(
        self,
        delivery: &mut Delivery,
        ghosts: &mut GhostStore,
    ) -> Result<usize, HaloError> {
        let written = self.slots.len();
        for (site, tickets) in self.slots {
            match tickets {
                SlotTickets::Geometry {
                    intersection,
                    raw,
                    wall_distances,
                    wall_normal,
                } => {
                    let intersection_data =
                        first_word(&delivery.take_slice::<u32>(intersection)?)?;
                    let other_raw_data = first_word(&delivery.take_slice::<u32>(raw)?)?;
                    let distances = delivery.take_slice::<f64>(wall_distances)?;
                    let normal = delivery.take_slice::<f64>(wall_normal)?;

                    let record = ghosts.get_or_create(site);
                    record.geometry.site_data = SiteData {
                        intersection_data,
                        other_raw_data,
                    };
                    record.geometry.wall_distances = distances;
                    for (dst, src) in record.geometry.wall_normal.iter_mut().zip(&normal) {
                        *dst = *src;
                    }
                }
                SlotTickets::Distributions(ticket) => {
                    let values = delivery.take_slice::<f64>(ticket)?;
                    ghosts.get_or_create(site).distributions = values;
                }
            }
        }
        Ok(written)
    }
}

// Fabrics are not required to check lengths, so an empty word is an error here.
fn first_word(words: &[u32]) -> Result<u32, FabricError> {
    words.first().copied().ok_or(FabricError::Truncated {
        needed: 1,
        actual: words.len(),
    })
}

fn local_site<L>(lattice: &L, site: GlobalSiteId) -> Result<&LatticeSite, HaloError>
where
    L: LatticeStore + ?Sized,
{
    let local = lattice.global_to_local(site)?;
    lattice
        .site(local)
        .ok_or(HaloError::MissingLocalSite { site })
}

fn log_outgoing(needs_from_me: &NeedsFromMe) {
    for (peer, sites) in needs_from_me.iter() {
        if !sites.is_empty() {
            debug!(%peer, count = sites.len(), "peer needs sites from me");
        }
    }
}

/// Queues the one-time geometry exchange: receives for `needs`, then sends
/// for every entry of `needs_from_me`.
#[instrument(skip_all, fields(rank = %fabric.rank(), needs = needs.len()))]
pub fn request_static<F, L>(
    needs: &[GlobalSiteId],
    needs_from_me: &NeedsFromMe,
    lattice: &L,
    fabric: &mut F,
) -> Result<PendingGhostReceives, HaloError>
where
    F: Fabric + ?Sized,
    L: LatticeStore + ?Sized,
{
    let model = lattice.model();
    let mut slots = Vec::with_capacity(needs.len());
    for &site in needs {
        let source = lattice.owner_of(site)?;
        let intersection = fabric.queue_receive_slice::<u32>(source, 1)?;
        let raw = fabric.queue_receive_slice::<u32>(source, 1)?;
        let wall_distances =
            fabric.queue_receive_slice::<f64>(source, model.wall_distance_len())?;
        let wall_normal = fabric.queue_receive_slice::<f64>(source, 3)?;
        slots.push((
            site,
            SlotTickets::Geometry {
                intersection,
                raw,
                wall_distances,
                wall_normal,
            },
        ));
    }

    log_outgoing(needs_from_me);
    for (peer, sites) in needs_from_me.iter() {
        for &site in sites {
            let geometry = &local_site(lattice, site)?.geometry;
            fabric.queue_send_slice(peer, &[geometry.site_data.intersection_data])?;
            fabric.queue_send_slice(peer, &[geometry.site_data.other_raw_data])?;
            fabric.queue_send_slice(peer, &geometry.wall_distances)?;
            fabric.queue_send_slice(peer, &geometry.wall_normal)?;
        }
    }

    Ok(PendingGhostReceives { slots })
}

/// Queues one step's distribution exchange: receives for `needs`, then sends
/// for every entry of `needs_from_me`.
#[instrument(skip_all, fields(rank = %fabric.rank(), needs = needs.len()))]
pub fn request_dynamic<F, L>(
    needs: &[GlobalSiteId],
    needs_from_me: &NeedsFromMe,
    lattice: &L,
    fabric: &mut F,
) -> Result<PendingGhostReceives, HaloError>
where
    F: Fabric + ?Sized,
    L: LatticeStore + ?Sized,
{
    let directions = lattice.model().directions();
    debug!(needs = needs.len(), "requesting ghost distributions");
    let mut slots = Vec::with_capacity(needs.len());
    for &site in needs {
        let source = lattice.owner_of(site)?;
        let ticket = fabric.queue_receive_slice::<f64>(source, directions)?;
        slots.push((site, SlotTickets::Distributions(ticket)));
    }

    log_outgoing(needs_from_me);
    for (peer, sites) in needs_from_me.iter() {
        for &site in sites {
            let local = local_site(lattice, site)?;
            fabric.queue_send_slice(peer, &local.distributions)?;
        }
    }

    Ok(PendingGhostReceives { slots })
}

/// Dispatches the fabric and applies `pending` to `ghosts`.
pub fn complete<F>(
    pending: PendingGhostReceives,
    fabric: &mut F,
    ghosts: &mut GhostStore,
) -> Result<usize, HaloError>
where
    F: Fabric + ?Sized,
{
    let mut delivery = fabric.dispatch()?;
    pending.apply(&mut delivery, ghosts)
}

/// Number of point-to-point messages one static exchange queues per site.
pub const STATIC_MESSAGES_PER_SITE: usize = 4;

/// Number of point-to-point messages one dynamic exchange queues per site.
pub const DYNAMIC_MESSAGES_PER_SITE: usize = 1;

/// Peers this worker will receive from, given its need set, in rank order.
pub fn sources<L>(needs: &[GlobalSiteId], lattice: &L) -> Result<Vec<WorkerId>, HaloError>
where
    L: LatticeStore + ?Sized,
{
    let mut owners = needs
        .iter()
        .map(|&site| lattice.owner_of(site))
        .collect::<Result<Vec<_>, _>>()?;
    owners.sort_unstable();
    owners.dedup();
    Ok(owners)
}
