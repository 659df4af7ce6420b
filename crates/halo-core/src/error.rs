// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error type for negotiation and transfer.

use crate::fabric::FabricError;
use crate::ident::{GlobalSiteId, WorkerId};
use crate::partition::PartitionError;
use thiserror::Error;

/// Failure during needs negotiation or a halo transfer.
///
/// Any error aborts the worker's participation in the run; nothing here is
/// retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HaloError {
    /// Ownership or local-index lookup failed.
    #[error(transparent)]
    Partition(#[from] PartitionError),
    /// The transport reported a failure.
    #[error(transparent)]
    Fabric(#[from] FabricError),
    /// The directory named an owner outside the communicator.
    #[error("{site} is owned by {owner}, but the communicator has {workers} workers")]
    OwnerOutOfRange {
        /// Site being resolved.
        site: GlobalSiteId,
        /// Owner reported by the directory.
        owner: WorkerId,
        /// Communicator size.
        workers: usize,
    },
    /// A peer requested a site this worker resolves but does not store.
    #[error("{site} resolves locally but has no stored site")]
    MissingLocalSite {
        /// Requested site.
        site: GlobalSiteId,
    },
    /// A need count does not fit the all-to-all's `u32` counts.
    #[error("{count} needs from {peer} exceed the all-to-all count width")]
    CountOverflow {
        /// Peer the needs are owned by.
        peer: WorkerId,
        /// Number of needs.
        count: usize,
    },
    /// The all-to-all delivered the wrong number of counts.
    #[error("all-to-all delivered {actual} counts for {expected} workers")]
    CountVectorLength {
        /// Communicator size.
        expected: usize,
        /// Counts delivered.
        actual: usize,
    },
}
