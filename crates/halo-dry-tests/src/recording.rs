// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operation-recording fabric wrapper.

use bytes::Bytes;
use halo_core::{Delivery, Fabric, FabricError, Ticket, WorkerId};

/// One queued fabric operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// All-to-all publish with its counts.
    AllToAllSend {
        /// One count per worker.
        counts: Vec<u32>,
    },
    /// All-to-all gather.
    AllToAllReceive,
    /// Point-to-point send.
    Send {
        /// Destination.
        to: WorkerId,
        /// Payload bytes.
        len: usize,
        /// Queued as a variable-length send.
        variable: bool,
    },
    /// Point-to-point receive.
    Receive {
        /// Source.
        from: WorkerId,
        /// Expected bytes.
        len: usize,
        /// Queued as a variable-length receive.
        variable: bool,
    },
}

impl Op {
    /// `true` for sends and receives between a pair of workers.
    pub fn is_point_to_point(&self) -> bool {
        matches!(self, Self::Send { .. } | Self::Receive { .. })
    }
}

/// Wraps a [`Fabric`] and records every operation, grouped by batch.
///
/// Operations that the inner fabric rejects are still recorded, so a test can
/// see what was attempted.
#[derive(Debug)]
pub struct RecordingFabric<F> {
    inner: F,
    current: Vec<Op>,
    batches: Vec<Vec<Op>>,
}

impl<F> RecordingFabric<F> {
    /// Starts recording around `inner`.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            current: Vec::new(),
            batches: Vec::new(),
        }
    }

    /// Dispatched batches, oldest first.
    pub fn batches(&self) -> &[Vec<Op>] {
        &self.batches
    }

    /// Operations queued since the last dispatch.
    pub fn pending(&self) -> &[Op] {
        &self.current
    }

    /// Every recorded operation, dispatched or not, in queue order.
    pub fn ops(&self) -> impl Iterator<Item = &Op> {
        self.batches.iter().flatten().chain(&self.current)
    }

    /// Number of `dispatch` calls.
    pub fn dispatch_count(&self) -> usize {
        self.batches.len()
    }

    /// Number of point-to-point sends plus receives.
    pub fn point_to_point_count(&self) -> usize {
        self.ops().filter(|op| op.is_point_to_point()).count()
    }

    /// Drops the recording and returns the wrapped fabric.
    pub fn into_inner(self) -> F {
        self.inner
    }

    /// Dispatched batches, consuming the wrapper.
    pub fn into_batches(self) -> Vec<Vec<Op>> {
        self.batches
    }
}

impl<F: Fabric> Fabric for RecordingFabric<F> {
    fn rank(&self) -> WorkerId {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn queue_all_to_all_send(&mut self, counts: &[u32]) -> Result<(), FabricError> {
        self.current.push(Op::AllToAllSend {
            counts: counts.to_vec(),
        });
        self.inner.queue_all_to_all_send(counts)
    }

    fn queue_all_to_all_receive(&mut self) -> Ticket {
        self.current.push(Op::AllToAllReceive);
        self.inner.queue_all_to_all_receive()
    }

    fn queue_send(&mut self, to: WorkerId, payload: Bytes) -> Result<(), FabricError> {
        self.current.push(Op::Send {
            to,
            len: payload.len(),
            variable: false,
        });
        self.inner.queue_send(to, payload)
    }

    fn queue_receive(&mut self, from: WorkerId, len: usize) -> Result<Ticket, FabricError> {
        self.current.push(Op::Receive {
            from,
            len,
            variable: false,
        });
        self.inner.queue_receive(from, len)
    }

    fn queue_send_variable(&mut self, to: WorkerId, payload: Bytes) -> Result<(), FabricError> {
        self.current.push(Op::Send {
            to,
            len: payload.len(),
            variable: true,
        });
        self.inner.queue_send_variable(to, payload)
    }

    fn queue_receive_variable(
        &mut self,
        from: WorkerId,
        len: usize,
    ) -> Result<Ticket, FabricError> {
        self.current.push(Op::Receive {
            from,
            len,
            variable: true,
        });
        self.inner.queue_receive_variable(from, len)
    }

    fn dispatch(&mut self) -> Result<Delivery, FabricError> {
        self.batches.push(std::mem::take(&mut self.current));
        self.inner.dispatch()
    }
}

/// Checks that every worker's batches pair up position by position.
///
/// `logs[w]` is worker `w`'s list of dispatched batches. For each batch index
/// and ordered pair `(a, b)`, the sends `a → b` must match the receives
/// `b ← a` in count, byte length and kind. Returns a description of the first
/// mismatch.
pub fn check_pairwise(logs: &[Vec<Vec<Op>>]) -> Result<(), String> {
    let Some(first) = logs.first() else {
        return Ok(());
    };
    for (w, log) in logs.iter().enumerate() {
        if log.len() != first.len() {
            return Err(format!(
                "worker {w} dispatched {} batches, worker 0 dispatched {}",
                log.len(),
                first.len()
            ));
        }
    }
    for batch in 0..first.len() {
        for (a, sender_log) in logs.iter().enumerate() {
            for (b, receiver_log) in logs.iter().enumerate() {
                let sends: Vec<(usize, bool)> = sender_log[batch]
                    .iter()
                    .filter_map(|op| match op {
                        Op::Send { to, len, variable } if to.0 == b => Some((*len, *variable)),
                        _ => None,
                    })
                    .collect();
                let receives: Vec<(usize, bool)> = receiver_log[batch]
                    .iter()
                    .filter_map(|op| match op {
                        Op::Receive {
                            from,
                            len,
                            variable,
                        } if from.0 == a => Some((*len, *variable)),
                        _ => None,
                    })
                    .collect();
                if sends != receives {
                    return Err(format!(
                        "batch {batch}: sends {a}->{b} {sends:?} do not match receives {receives:?}"
                    ));
                }
            }
        }
    }
    Ok(())
}
