//! Hand-off queue between connection tasks and the host's drain loop.
//!
//! Connection tasks push `(Command, ReplySlot)` pairs; the drain loop takes
//! everything pending in one go on each tick. This is the only state shared
//! between the network side and the host thread.

use crate::protocol::{Command, Response};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

/// Write-once handle for delivering a command's response.
///
/// Consumed by [`ReplySlot::fulfil`], so a slot can never answer twice.
/// Dropping it unfulfilled closes the channel, which the waiting
/// connection observes and reports to its client.
#[derive(Debug)]
pub struct ReplySlot {
    tx: oneshot::Sender<Response>,
}

/// Receiving half of a reply channel, owned by the connection.
pub type ReplyReceiver = oneshot::Receiver<Response>;

impl ReplySlot {
    /// Create a fresh reply channel.
    pub fn channel() -> (Self, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver the response. Returns `false` if the connection already went
    /// away.
    pub fn fulfil(self, response: Response) -> bool {
        self.tx.send(response).is_ok()
    }
}

/// One pending unit of work.
#[derive(Debug)]
pub struct QueueItem {
    pub command: Command,
    pub reply: ReplySlot,
}

impl QueueItem {
    pub fn new(command: Command, reply: ReplySlot) -> Self {
        Self { command, reply }
    }
}

/// Errors from pushing onto the queue.
#[derive(Debug, Error)]
pub enum PushError {
    /// The queue is at capacity; the item is handed back unexecuted.
    #[error("command queue is full ({capacity} pending)")]
    Full { item: QueueItem, capacity: usize },
}

/// Multi-producer, single-consumer FIFO mailbox.
#[derive(Debug)]
pub struct HandoffQueue {
    items: Mutex<VecDeque<QueueItem>>,
    /// Maximum pending items (0 = unbounded)
    capacity: usize,
}

impl HandoffQueue {
    /// Create a queue. `capacity` of 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Append an item. Never waits for space: a full queue rejects at once.
    pub fn push(&self, item: QueueItem) -> Result<(), PushError> {
        let mut items = self.lock();
        if self.capacity > 0 && items.len() >= self.capacity {
            return Err(PushError::Full {
                item,
                capacity: self.capacity,
            });
        }
        items.push_back(item);
        Ok(())
    }

    /// Remove and return every pending item in arrival order.
    pub fn drain_all(&self) -> Vec<QueueItem> {
        let mut items = self.lock();
        if items.is_empty() {
            return Vec::new();
        }
        std::mem::take(&mut *items).into()
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // The critical sections only move items in and out of the deque, so a
    // panic elsewhere cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
