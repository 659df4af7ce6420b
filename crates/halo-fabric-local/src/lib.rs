// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process [`Fabric`] built from one FIFO channel per ordered worker pair.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions
)]

use bytes::{Bytes, BytesMut};
use halo_core::{Delivery, Fabric, FabricError, Ticket, WorkerId};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::trace;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MessageKind {
    Fixed,
    Variable,
    Count,
}

impl MessageKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Variable => "variable",
            Self::Count => "all-to-all",
        }
    }
}

#[derive(Debug)]
struct Envelope {
    kind: MessageKind,
    payload: Bytes,
}

#[derive(Debug)]
enum PendingReceive {
    Point {
        from: WorkerId,
        len: usize,
        kind: MessageKind,
    },
    AllToAll,
}

const COUNT_BYTES: usize = std::mem::size_of::<u32>();

/// One worker's endpoint of a local mesh.
///
/// Endpoints are `Send`; move each onto its own thread. Sends are buffered
/// without bound, so `dispatch` never blocks on a send, only on receives.
#[derive(Debug)]
pub struct LocalFabric {
    rank: WorkerId,
    // Indexed by destination rank.
    senders: Vec<Sender<Envelope>>,
    // Indexed by source rank.
    receivers: Vec<Receiver<Envelope>>,
    outbox: Vec<(WorkerId, Envelope)>,
    pending: Vec<PendingReceive>,
    batches: usize,
}

impl LocalFabric {
    /// Builds a fully connected mesh of `size` endpoints, in rank order.
    pub fn mesh(size: usize) -> Vec<Self> {
        let mut senders: Vec<Vec<Sender<Envelope>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<Envelope>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for from in &mut senders {
            for into in &mut receivers {
                let (tx, rx) = mpsc::channel();
                from.push(tx);
                into.push(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| Self {
                rank: WorkerId(rank),
                senders,
                receivers,
                outbox: Vec::new(),
                pending: Vec::new(),
                batches: 0,
            })
            .collect()
    }

    /// Number of batches this endpoint has dispatched.
    pub fn batches(&self) -> usize {
        self.batches
    }

    fn check_peer(&self, peer: WorkerId) -> Result<(), FabricError> {
        if peer.0 < self.senders.len() {
            Ok(())
        } else {
            Err(FabricError::PeerOutOfRange {
                peer,
                size: self.senders.len(),
            })
        }
    }

    fn queue_point_send(
        &mut self,
        to: WorkerId,
        kind: MessageKind,
        payload: Bytes,
    ) -> Result<(), FabricError> {
        self.check_peer(to)?;
        self.outbox.push((to, Envelope { kind, payload }));
        Ok(())
    }

    fn queue_point_receive(
        &mut self,
        from: WorkerId,
        len: usize,
        kind: MessageKind,
    ) -> Result<Ticket, FabricError> {
        self.check_peer(from)?;
        Ok(self.push_pending(PendingReceive::Point { from, len, kind }))
    }

    fn push_pending(&mut self, receive: PendingReceive) -> Ticket {
        let ticket = Ticket::new(self.pending.len());
        self.pending.push(receive);
        ticket
    }

    fn receive_from(
        &self,
        from: WorkerId,
        len: usize,
        kind: MessageKind,
    ) -> Result<Bytes, FabricError> {
        let envelope = self
            .receivers
            .get(from.0)
            .ok_or(FabricError::PeerOutOfRange {
                peer: from,
                size: self.receivers.len(),
            })?
            .recv()
            .map_err(|_| FabricError::Disconnected { peer: from })?;
        if envelope.kind != kind {
            return Err(FabricError::KindMismatch {
                peer: from,
                expected: kind.name(),
                actual: envelope.kind.name(),
            });
        }
        if envelope.payload.len() != len {
            return Err(FabricError::LengthMismatch {
                peer: from,
                expected: len,
                actual: envelope.payload.len(),
            });
        }
        Ok(envelope.payload)
    }
}

impl Fabric for LocalFabric {
    fn rank(&self) -> WorkerId {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn queue_all_to_all_send(&mut self, counts: &[u32]) -> Result<(), FabricError> {
        if counts.len() != self.size() {
            return Err(FabricError::CountMismatch {
                expected: self.size(),
                actual: counts.len(),
            });
        }
        for (to, count) in WorkerId::all(counts.len()).zip(counts) {
            let payload = Bytes::copy_from_slice(&count.to_ne_bytes());
            self.outbox.push((
                to,
                Envelope {
                    kind: MessageKind::Count,
                    payload,
                },
            ));
        }
        Ok(())
    }

    fn queue_all_to_all_receive(&mut self) -> Ticket {
        self.push_pending(PendingReceive::AllToAll)
    }

    fn queue_send(&mut self, to: WorkerId, payload: Bytes) -> Result<(), FabricError> {
        self.queue_point_send(to, MessageKind::Fixed, payload)
    }

    fn queue_receive(&mut self, from: WorkerId, len: usize) -> Result<Ticket, FabricError> {
        self.queue_point_receive(from, len, MessageKind::Fixed)
    }

    fn queue_send_variable(&mut self, to: WorkerId, payload: Bytes) -> Result<(), FabricError> {
        self.queue_point_send(to, MessageKind::Variable, payload)
    }

    fn queue_receive_variable(
        &mut self,
        from: WorkerId,
        len: usize,
    ) -> Result<Ticket, FabricError> {
        self.queue_point_receive(from, len, MessageKind::Variable)
    }

    fn dispatch(&mut self) -> Result<Delivery, FabricError> {
        let outbox = std::mem::take(&mut self.outbox);
        let pending = std::mem::take(&mut self.pending);
        self.batches += 1;
        trace!(
            rank = %self.rank,
            sends = outbox.len(),
            receives = pending.len(),
            "dispatching batch"
        );

        for (to, envelope) in outbox {
            self.senders
                .get(to.0)
                .ok_or(FabricError::PeerOutOfRange {
                    peer: to,
                    size: self.senders.len(),
                })?
                .send(envelope)
                .map_err(|_| FabricError::Disconnected { peer: to })?;
        }

        let mut buffers = Vec::with_capacity(pending.len());
        for receive in pending {
            let buffer = match receive {
                PendingReceive::Point { from, len, kind } => self.receive_from(from, len, kind)?,
                PendingReceive::AllToAll => {
                    let mut gathered = BytesMut::with_capacity(self.size() * COUNT_BYTES);
                    for from in WorkerId::all(self.size()) {
                        let count = self.receive_from(from, COUNT_BYTES, MessageKind::Count)?;
                        gathered.extend_from_slice(&count);
                    }
                    gathered.freeze()
                }
            };
            buffers.push(buffer);
        }
        Ok(Delivery::new(buffers))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn mesh_assigns_ranks_in_order() {
        let mesh = LocalFabric::mesh(3);
        let ranks: Vec<_> = mesh.iter().map(Fabric::rank).collect();
        assert_eq!(ranks, vec![WorkerId(0), WorkerId(1), WorkerId(2)]);
        assert!(mesh.iter().all(|f| f.size() == 3));
    }

    #[test]
    fn self_sends_complete_on_one_thread() {
        let mut fabric = LocalFabric::mesh(1).pop().unwrap();
        let ticket = fabric.queue_receive(WorkerId(0), 3).unwrap();
        fabric
            .queue_send(WorkerId(0), Bytes::from_static(b"abc"))
            .unwrap();
        let mut delivery = fabric.dispatch().unwrap();
        assert_eq!(delivery.take(ticket).unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(fabric.batches(), 1);
    }

    #[test]
    fn out_of_range_peers_are_rejected_at_queue_time() {
        let mut fabric = LocalFabric::mesh(2).pop().unwrap();
        assert_eq!(
            fabric.queue_send(WorkerId(2), Bytes::new()),
            Err(FabricError::PeerOutOfRange {
                peer: WorkerId(2),
                size: 2
            })
        );
        assert!(fabric.queue_receive_variable(WorkerId(5), 0).is_err());
        assert_eq!(
            fabric.queue_all_to_all_send(&[1]),
            Err(FabricError::CountMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn kind_and_length_are_checked_on_receipt() {
        let mut fabric = LocalFabric::mesh(1).pop().unwrap();
        fabric.queue_receive(WorkerId(0), 2).unwrap();
        fabric
            .queue_send_variable(WorkerId(0), Bytes::from_static(b"xy"))
            .unwrap();
        assert_eq!(
            fabric.dispatch().unwrap_err(),
            FabricError::KindMismatch {
                peer: WorkerId(0),
                expected: "fixed",
                actual: "variable"
            }
        );

        let mut fabric = LocalFabric::mesh(1).pop().unwrap();
        fabric.queue_receive(WorkerId(0), 8).unwrap();
        fabric
            .queue_send(WorkerId(0), Bytes::from_static(b"four"))
            .unwrap();
        assert_eq!(
            fabric.dispatch().unwrap_err(),
            FabricError::LengthMismatch {
                peer: WorkerId(0),
                expected: 8,
                actual: 4
            }
        );
    }

    #[test]
    fn dropped_peer_reports_disconnect() {
        let mut mesh = LocalFabric::mesh(2);
        let peer = mesh.pop().unwrap();
        let mut fabric = mesh.pop().unwrap();
        drop(peer);
        fabric.queue_receive(WorkerId(1), 1).unwrap();
        assert_eq!(
            fabric.dispatch().unwrap_err(),
            FabricError::Disconnected { peer: WorkerId(1) }
        );
    }
}
