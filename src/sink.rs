//! Downstream record consumers.

use crate::types::ChangeRecord;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Duration;

/// Accepts change records on behalf of the host pipeline.
///
/// `accept` may block; a blocked call holds up the registry's notification
/// thread, which is how a slow consumer throttles intake. Failures inside
/// `accept` are the sink's own concern.
pub trait Sink: Send + Sync {
    fn accept(&self, record: ChangeRecord);
}

impl<F> Sink for F
where
    F: Fn(ChangeRecord) + Send + Sync,
{
    fn accept(&self, record: ChangeRecord) {
        self(record)
    }
}

/// Sink backed by a bounded channel. `accept` blocks while the channel is full.
#[derive(Clone)]
pub struct ChannelSink {
    sender: Sender<ChangeRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiving half, buffering at most `capacity` records.
    pub fn bounded(capacity: usize) -> (Self, RecordReceiver) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, RecordReceiver { receiver })
    }
}

impl Sink for ChannelSink {
    fn accept(&self, record: ChangeRecord) {
        if self.sender.send(record).is_err() {
            tracing::warn!("Record receiver dropped, discarding change record");
        }
    }
}

/// Receiving half of a [`ChannelSink`].
pub struct RecordReceiver {
    receiver: Receiver<ChangeRecord>,
}

impl RecordReceiver {
    /// Receive the next record (blocking).
    pub fn recv(&self) -> Result<ChangeRecord, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a record (non-blocking).
    pub fn try_recv(&self) -> Result<ChangeRecord, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<ChangeRecord, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Number of records waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
