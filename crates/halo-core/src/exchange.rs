// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-worker halo component shared by the kernel and the driver.

use crate::error::HaloError;
use crate::fabric::Fabric;
use crate::ghost::GhostStore;
use crate::ident::{GlobalSiteId, WorkerId};
use crate::lattice::LatticeStore;
use crate::negotiate::{self, NeedsFromMe};
use crate::partition::{PartitionDirectory, PartitionError};
use crate::registry::{NeedRegistry, SiteRequirement};
use crate::transfer::{self, PendingGhostReceives};
use tracing::{debug, warn};

/// One-way negotiation latch.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NegotiationState {
    /// Needs have not been exchanged yet.
    NotShared,
    /// Needs were exchanged; the send tables are frozen.
    Shared,
}

/// Ghost-site coordination state for one worker.
///
/// Lifecycle: the kernel calls [`register_need`](Self::register_need) during
/// setup; the first transfer negotiates; then [`transfer_static`](Self::transfer_static)
/// runs once and [`transfer_dynamic`](Self::transfer_dynamic) once per step.
///
/// Needs registered after negotiation stay in the local need set but are
/// never communicated: transfers walk only the prefix that was negotiated.
#[derive(Clone, Debug)]
pub struct HaloExchange {
    registry: NeedRegistry,
    state: NegotiationState,
    needs_from_me: NeedsFromMe,
    // Length of the need set when the latch closed.
    negotiated_len: usize,
}

impl Default for HaloExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl HaloExchange {
    /// Fresh component with an empty need set.
    pub fn new() -> Self {
        Self {
            registry: NeedRegistry::new(),
            state: NegotiationState::NotShared,
            needs_from_me: NeedsFromMe::default(),
            negotiated_len: 0,
        }
    }

    /// Declares that the kernel needs `site` mirrored locally.
    ///
    /// Idempotent. `requirement` is recorded on first registration only;
    /// every need receives all attributes.
    pub fn register_need(&mut self, site: GlobalSiteId, requirement: SiteRequirement) {
        let added = self.registry.register(site, requirement);
        if added && self.state == NegotiationState::Shared {
            warn!(%site, "need registered after negotiation; it will not be communicated");
        }
    }

    /// Owner of `site`, via `directory`.
    pub fn owner_of<D>(
        &self,
        directory: &D,
        site: GlobalSiteId,
    ) -> Result<WorkerId, PartitionError>
    where
        D: PartitionDirectory + ?Sized,
    {
        directory.owner_of(site)
    }

    /// Every registered need, in first-seen order, including late ones.
    pub fn needs(&self) -> &[GlobalSiteId] {
        self.registry.needs()
    }

    /// Needs that take part in transfers.
    pub fn negotiated_needs(&self) -> &[GlobalSiteId] {
        let needs = self.registry.needs();
        &needs[..self.negotiated_len.min(needs.len())]
    }

    /// Underlying registry.
    pub fn registry(&self) -> &NeedRegistry {
        &self.registry
    }

    /// Current latch position.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Negotiated send tables, once shared.
    pub fn needs_from_me(&self) -> Option<&NeedsFromMe> {
        match self.state {
            NegotiationState::Shared => Some(&self.needs_from_me),
            NegotiationState::NotShared => None,
        }
    }

    /// Negotiates needs with every peer. No-op once shared.
    pub fn share_needs<F, D>(&mut self, directory: &D, fabric: &mut F) -> Result<(), HaloError>
    where
        F: Fabric + ?Sized,
        D: PartitionDirectory + ?Sized,
    {
        if self.state == NegotiationState::Shared {
            return Ok(());
        }
        debug!(rank = %fabric.rank(), "sharing needs now");
        let needs = self.registry.needs();
        self.needs_from_me = negotiate::share_needs(needs, directory, fabric)?;
        self.negotiated_len = needs.len();
        self.state = NegotiationState::Shared;
        debug!(
            rank = %fabric.rank(),
            outgoing = self.needs_from_me.total(),
            "needs have been shared"
        );
        Ok(())
    }

    /// One-time geometry exchange: request, dispatch, apply.
    pub fn transfer_static<F, L>(
        &mut self,
        lattice: &L,
        ghosts: &mut GhostStore,
        fabric: &mut F,
    ) -> Result<usize, HaloError>
    where
        F: Fabric + ?Sized,
        L: LatticeStore + ?Sized,
    {
        self.share_needs(lattice, fabric)?;
        let pending = transfer::request_static(
            self.negotiated_needs(),
            &self.needs_from_me,
            lattice,
            fabric,
        )?;
        transfer::complete(pending, fabric, ghosts)
    }

    /// Queues this step's distribution exchange without dispatching, so the
    /// caller can fold it into a larger batch.
    pub fn request_dynamic<F, L>(
        &mut self,
        lattice: &L,
        fabric: &mut F,
    ) -> Result<PendingGhostReceives, HaloError>
    where
        F: Fabric + ?Sized,
        L: LatticeStore + ?Sized,
    {
        self.share_needs(lattice, fabric)?;
        transfer::request_dynamic(
            self.negotiated_needs(),
            &self.needs_from_me,
            lattice,
            fabric,
        )
    }

    /// Per-step distribution exchange: request, dispatch, apply.
    pub fn transfer_dynamic<F, L>(
        &mut self,
        lattice: &L,
        ghosts: &mut GhostStore,
        fabric: &mut F,
    ) -> Result<usize, HaloError>
    where
        F: Fabric + ?Sized,
        L: LatticeStore + ?Sized,
    {
        let pending = self.request_dynamic(lattice, fabric)?;
        transfer::complete(pending, fabric, ghosts)
    }
}
