// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordered, duplicate-free set of remote sites this worker mirrors.

use crate::ident::GlobalSiteId;
use rustc_hash::FxHashMap;
use std::ops::BitOr;

/// Which attributes of a ghost site the kernel asked for.
///
/// Recorded but not acted on: every registered site receives all attributes,
/// and a second registration with a different mask does not widen the first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SiteRequirement(u8);

impl SiteRequirement {
    /// Intersection metadata and auxiliary raw field.
    pub const SITE_DATA: Self = Self(1 << 0);
    /// Wall-distance vector.
    pub const WALL_DISTANCES: Self = Self(1 << 1);
    /// Wall normal.
    pub const WALL_NORMAL: Self = Self(1 << 2);
    /// Distribution values.
    pub const DISTRIBUTIONS: Self = Self(1 << 3);
    /// Every attribute.
    pub const EVERYTHING: Self = Self(0b1111);

    /// `true` when every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw mask.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Default for SiteRequirement {
    fn default() -> Self {
        Self::EVERYTHING
    }
}

impl BitOr for SiteRequirement {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Remote sites in first-registration order.
#[derive(Clone, Debug, Default)]
pub struct NeedRegistry {
    needs: Vec<GlobalSiteId>,
    requirements: FxHashMap<GlobalSiteId, SiteRequirement>,
}

impl NeedRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `site` unless already present. Returns `true` when appended.
    ///
    /// A repeat registration keeps the first requirement unchanged.
    pub fn register(&mut self, site: GlobalSiteId, requirement: SiteRequirement) -> bool {
        if self.requirements.contains_key(&site) {
            return false;
        }
        self.requirements.insert(site, requirement);
        self.needs.push(site);
        true
    }

    /// Registered sites in first-seen order.
    pub fn needs(&self) -> &[GlobalSiteId] {
        &self.needs
    }

    /// Requirement recorded at first registration of `site`.
    pub fn requirement(&self, site: GlobalSiteId) -> Option<SiteRequirement> {
        self.requirements.get(&site).copied()
    }

    /// `true` when `site` has been registered.
    pub fn contains(&self, site: GlobalSiteId) -> bool {
        self.requirements.contains_key(&site)
    }

    /// Number of distinct sites.
    pub fn len(&self) -> usize {
        self.needs.len()
    }

    /// `true` when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.needs.is_empty()
    }
}
