// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Storage for sites mirrored from other workers.

use crate::ident::GlobalSiteId;
use crate::lattice::{LatticeModel, LatticeSite};
use rustc_hash::FxHashMap;

/// A mirrored site. Same shape as a locally owned [`LatticeSite`].
pub type GhostSiteRecord = LatticeSite;

/// Ghost records keyed by global id, created zeroed on first access.
#[derive(Clone, Debug)]
pub struct GhostStore {
    model: LatticeModel,
    records: FxHashMap<GlobalSiteId, GhostSiteRecord>,
}

impl GhostStore {
    /// Empty store whose records are sized for `model`.
    pub fn new(model: LatticeModel) -> Self {
        Self {
            model,
            records: FxHashMap::default(),
        }
    }

    /// Velocity set the records are sized for.
    pub fn model(&self) -> LatticeModel {
        self.model
    }

    /// Record for `site`, creating a zeroed one if absent.
    pub fn get_or_create(&mut self, site: GlobalSiteId) -> &mut GhostSiteRecord {
        let model = self.model;
        self.records
            .entry(site)
            .or_insert_with(|| LatticeSite::zeroed(model))
    }

    /// Record for `site`, if one exists.
    pub fn get(&self, site: GlobalSiteId) -> Option<&GhostSiteRecord> {
        self.records.get(&site)
    }

    /// `true` when a record for `site` exists.
    pub fn contains(&self, site: GlobalSiteId) -> bool {
        self.records.contains_key(&site)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when no record exists.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in no particular order, without allocating.
    pub fn iter_unordered(&self) -> impl Iterator<Item = (GlobalSiteId, &GhostSiteRecord)> {
        self.records.iter().map(|(id, rec)| (*id, rec))
    }

    /// Records sorted by global id. Collects and sorts on every call; use
    /// [`iter_unordered`](Self::iter_unordered) when order does not matter.
    pub fn iter(&self) -> impl Iterator<Item = (GlobalSiteId, &GhostSiteRecord)> {
        let mut entries: Vec<_> = self.records.iter().map(|(id, rec)| (*id, rec)).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries.into_iter()
    }
}
