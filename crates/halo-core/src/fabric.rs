// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Batched queue-then-dispatch transport.
//!
//! Queue operations never block; they accumulate into the current batch.
//! [`Fabric::dispatch`] executes the batch and blocks until every queued
//! receive on this worker has been filled. Messages between an ordered pair of
//! workers are matched by queue position only: the k-th send `A → B` fills the
//! k-th receive `B ← A` of the same batch.
//!
//! The port is byte-level. [`FabricExt`] adds typed helpers for `Pod` slices.

use crate::ident::WorkerId;
use bytemuck::{AnyBitPattern, NoUninit};
use bytes::Bytes;
use thiserror::Error;

/// Errors raised at the transport boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FabricError {
    /// A peer rank outside `[0, size)` was addressed.
    #[error("peer {peer} out of range for a communicator of {size}")]
    PeerOutOfRange {
        /// Addressed peer.
        peer: WorkerId,
        /// Communicator size.
        size: usize,
    },
    /// The all-to-all publish did not carry exactly one count per worker.
    #[error("all-to-all expects {expected} counts, got {actual}")]
    CountMismatch {
        /// Communicator size.
        expected: usize,
        /// Counts supplied.
        actual: usize,
    },
    /// A received message had a different byte length than the receive asked for.
    #[error("message from {peer} is {actual} bytes, receive expected {expected}")]
    LengthMismatch {
        /// Sending peer.
        peer: WorkerId,
        /// Bytes the receive was sized for.
        expected: usize,
        /// Bytes that arrived.
        actual: usize,
    },
    /// A received message was queued with a different operation kind.
    #[error("message from {peer} was a {actual} send, receive expected {expected}")]
    KindMismatch {
        /// Sending peer.
        peer: WorkerId,
        /// Kind the receive was queued as.
        expected: &'static str,
        /// Kind the sender used.
        actual: &'static str,
    },
    /// The peer's endpoint went away before its message arrived.
    #[error("peer {peer} disconnected")]
    Disconnected {
        /// Peer that went away.
        peer: WorkerId,
    },
    /// The ticket does not belong to this delivery or was already taken.
    #[error("ticket {0} not present in delivery")]
    UnknownTicket(usize),
    /// A delivered buffer held fewer elements than the payload layout needs.
    #[error("delivered {actual} elements where {needed} were needed")]
    Truncated {
        /// Elements required.
        needed: usize,
        /// Elements delivered.
        actual: usize,
    },
    /// The buffer length is not a multiple of the element size.
    #[error("{len} bytes cannot hold whole elements of {elem} bytes")]
    Misaligned {
        /// Buffer length.
        len: usize,
        /// Element size.
        elem: usize,
    },
}

/// Handle to one queued receive; redeem it against the batch's [`Delivery`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Ticket(usize);

impl Ticket {
    /// Ticket for the `index`-th receive queued in a batch.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the receive within its batch.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Buffers received by one dispatched batch, indexed by [`Ticket`].
#[derive(Debug, Default)]
pub struct Delivery {
    buffers: Vec<Option<Bytes>>,
}

impl Delivery {
    /// Wraps buffers in receive-queue order.
    pub fn new(buffers: Vec<Bytes>) -> Self {
        Self {
            buffers: buffers.into_iter().map(Some).collect(),
        }
    }

    /// Number of receives the batch carried.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// `true` when the batch carried no receives.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Removes and returns the buffer for `ticket`.
    pub fn take(&mut self, ticket: Ticket) -> Result<Bytes, FabricError> {
        self.buffers
            .get_mut(ticket.0)
            .and_then(Option::take)
            .ok_or(FabricError::UnknownTicket(ticket.0))
    }

    /// Removes the buffer for `ticket` and reinterprets it as `T` elements.
    pub fn take_slice<T>(&mut self, ticket: Ticket) -> Result<Vec<T>, FabricError>
    where
        T: NoUninit + AnyBitPattern,
    {
        let bytes = self.take(ticket)?;
        let elem = std::mem::size_of::<T>();
        if elem == 0 || bytes.len() % elem != 0 {
            return Err(FabricError::Misaligned {
                len: bytes.len(),
                elem,
            });
        }
        Ok(bytemuck::pod_collect_to_vec::<u8, T>(&bytes))
    }
}

/// Transport port: scalar all-to-all, fixed-length and variable-length
/// point-to-point operations, and one blocking dispatch per batch.
pub trait Fabric {
    /// This worker's rank.
    fn rank(&self) -> WorkerId;

    /// Number of workers `P` in the communicator.
    fn size(&self) -> usize;

    /// Publishes one count per worker (`counts.len() == size()`).
    fn queue_all_to_all_send(&mut self, counts: &[u32]) -> Result<(), FabricError>;

    /// Receives one count from every worker, in rank order, as `size()` `u32`s.
    fn queue_all_to_all_receive(&mut self) -> Ticket;

    /// Queues a fixed-length send of `payload` to `to`.
    fn queue_send(&mut self, to: WorkerId, payload: Bytes) -> Result<(), FabricError>;

    /// Queues a fixed-length receive of `len` bytes from `from`.
    fn queue_receive(&mut self, from: WorkerId, len: usize) -> Result<Ticket, FabricError>;

    /// Queues a variable-length send whose size the peer learned out of band.
    fn queue_send_variable(&mut self, to: WorkerId, payload: Bytes) -> Result<(), FabricError>;

    /// Queues a variable-length receive of `len` bytes from `from`.
    fn queue_receive_variable(
        &mut self,
        from: WorkerId,
        len: usize,
    ) -> Result<Ticket, FabricError>;

    /// Executes the current batch and blocks until its receives are filled.
    fn dispatch(&mut self) -> Result<Delivery, FabricError>;
}

impl<F: Fabric + ?Sized> Fabric for &mut F {
    fn rank(&self) -> WorkerId {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn queue_all_to_all_send(&mut self, counts: &[u32]) -> Result<(), FabricError> {
        (**self).queue_all_to_all_send(counts)
    }

    fn queue_all_to_all_receive(&mut self) -> Ticket {
        (**self).queue_all_to_all_receive()
    }

    fn queue_send(&mut self, to: WorkerId, payload: Bytes) -> Result<(), FabricError> {
        (**self).queue_send(to, payload)
    }

    fn queue_receive(&mut self, from: WorkerId, len: usize) -> Result<Ticket, FabricError> {
        (**self).queue_receive(from, len)
    }

    fn queue_send_variable(&mut self, to: WorkerId, payload: Bytes) -> Result<(), FabricError> {
        (**self).queue_send_variable(to, payload)
    }

    fn queue_receive_variable(
        &mut self,
        from: WorkerId,
        len: usize,
    ) -> Result<Ticket, FabricError> {
        (**self).queue_receive_variable(from, len)
    }

    fn dispatch(&mut self) -> Result<Delivery, FabricError> {
        (**self).dispatch()
    }
}

/// Typed helpers over [`Fabric`] for plain-old-data slices.
pub trait FabricExt: Fabric {
    /// Fixed-length send of `data`.
    fn queue_send_slice<T: NoUninit>(
        &mut self,
        to: WorkerId,
        data: &[T],
    ) -> Result<(), FabricError> {
        self.queue_send(to, Bytes::copy_from_slice(bytemuck::cast_slice(data)))
    }

    /// Fixed-length receive of `count` elements of `T`.
    fn queue_receive_slice<T>(
        &mut self,
        from: WorkerId,
        count: usize,
    ) -> Result<Ticket, FabricError> {
        self.queue_receive(from, count * std::mem::size_of::<T>())
    }

    /// Variable-length send of `data`.
    fn queue_send_variable_slice<T: NoUninit>(
        &mut self,
        to: WorkerId,
        data: &[T],
    ) -> Result<(), FabricError> {
        self.queue_send_variable(to, Bytes::copy_from_slice(bytemuck::cast_slice(data)))
    }

    /// Variable-length receive of `count` elements of `T`.
    fn queue_receive_variable_slice<T>(
        &mut self,
        from: WorkerId,
        count: usize,
    ) -> Result<Ticket, FabricError> {
        self.queue_receive_variable(from, count * std::mem::size_of::<T>())
    }
}

impl<F: Fabric + ?Sized> FabricExt for F {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tickets_redeem_once() {
        let mut delivery = Delivery::new(vec![Bytes::from_static(b"ab"), Bytes::new()]);
        assert_eq!(delivery.len(), 2);
        assert_eq!(delivery.take(Ticket::new(0)).unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(
            delivery.take(Ticket::new(0)),
            Err(FabricError::UnknownTicket(0))
        );
        assert_eq!(
            delivery.take(Ticket::new(5)),
            Err(FabricError::UnknownTicket(5))
        );
    }

    #[test]
    fn take_slice_reinterprets_pod_elements() {
        let words = [1.5f64, -2.0];
        let bytes = Bytes::copy_from_slice(bytemuck::cast_slice(&words));
        let mut delivery = Delivery::new(vec![bytes]);
        let got: Vec<f64> = delivery.take_slice(Ticket::new(0)).unwrap();
        assert_eq!(got, words.to_vec());
    }

    #[test]
    fn take_slice_rejects_partial_elements() {
        let mut delivery = Delivery::new(vec![Bytes::from_static(&[0u8; 6])]);
        assert_eq!(
            delivery.take_slice::<u32>(Ticket::new(0)),
            Err(FabricError::Misaligned { len: 6, elem: 4 })
        );
    }
}
