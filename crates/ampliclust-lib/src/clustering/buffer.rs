//! Rotating bounded candidate buffers.
//!
//! One bounded queue per consumer; producers push whole batches (one
//! sequence's worth of candidates) round-robin. A full queue blocks the
//! producer, an empty one blocks its consumer. Dropping every producer
//! handle closes the buffers: each consumer drains its queue and then sees
//! the end of its iterator, so no explicit close signal is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

pub struct RotatingBuffers<T> {
    senders: Vec<SyncSender<Vec<T>>>,
    next: Arc<AtomicUsize>,
}

impl<T> RotatingBuffers<T> {
    /// Create `consumers` queues holding at most `capacity` batches each.
    pub fn new(consumers: usize, capacity: usize) -> (Self, Vec<Receiver<Vec<T>>>) {
        let mut senders = Vec::with_capacity(consumers);
        let mut receivers = Vec::with_capacity(consumers);
        for _ in 0..consumers {
            let (tx, rx) = sync_channel(capacity);
            senders.push(tx);
            receivers.push(rx);
        }
        (
            Self {
                senders,
                next: Arc::new(AtomicUsize::new(0)),
            },
            receivers,
        )
    }

    /// Push one batch to the next queue in rotation. Empty batches are
    /// dropped; a batch aimed at a vanished consumer is discarded, which
    /// only happens during teardown.
    pub fn push(&self, batch: Vec<T>) {
        if batch.is_empty() {
            return;
        }
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        let _ = self.senders[slot].send(batch);
    }
}

impl<T> Clone for RotatingBuffers<T> {
    fn clone(&self) -> Self {
        Self {
            senders: self.senders.clone(),
            next: Arc::clone(&self.next),
        }
    }
}
