//! Per-object FIFO task queue.
//!
//! Every state record owns one queue. Saves and fetches of the object run
//! their state-mutating bodies through it, so a later save never reads
//! generation 0 before an earlier save has processed its response.
//!
//! Each enqueued task draws a ticket synchronously. A ticket is released when
//! its task finishes, fails or is dropped; the queue then serves the next
//! unreleased ticket in order.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct Tickets {
    /// Next ticket to hand out.
    next: u64,
    /// Ticket allowed to run.
    serving: u64,
    /// Released tickets not yet reached by `serving`.
    released: BTreeSet<u64>,
}

#[derive(Debug, Default)]
struct QueueInner {
    tickets: Mutex<Tickets>,
    turn_changed: Notify,
}

/// A FIFO queue serializing asynchronous tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `task` to the queue.
    ///
    /// The position is fixed when this method is called, not when the
    /// returned future is first polled. The task body starts once every
    /// earlier entry has settled, and the future resolves with the task's own
    /// output. Dropping the future releases its slot.
    pub fn enqueue<F, Fut, T>(&self, task: F) -> impl Future<Output = T> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let ticket = {
            let mut tickets = self.inner.tickets.lock();
            let ticket = tickets.next;
            tickets.next += 1;
            ticket
        };
        trace!(ticket, "task enqueued");

        let turn = Turn {
            inner: Arc::clone(&self.inner),
            ticket,
        };
        async move {
            turn.wait().await;
            let output = task().await;
            drop(turn);
            output
        }
    }

    /// Returns the number of entries that have not settled yet.
    pub fn len(&self) -> usize {
        let tickets = self.inner.tickets.lock();
        (tickets.next - tickets.serving) as usize - tickets.released.len()
    }

    /// Returns true if no entry is waiting or running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A drawn ticket. Dropping it releases the slot.
struct Turn {
    inner: Arc<QueueInner>,
    ticket: u64,
}

impl Turn {
    async fn wait(&self) {
        loop {
            // Registered before the check so a release in between is not missed.
            let notified = self.inner.turn_changed.notified();
            if self.inner.tickets.lock().serving == self.ticket {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let mut tickets = self.inner.tickets.lock();
        tickets.released.insert(self.ticket);
        let mut advanced = false;
        loop {
            let serving = tickets.serving;
            if !tickets.released.remove(&serving) {
                break;
            }
            tickets.serving += 1;
            advanced = true;
        }
        drop(tickets);

        if advanced {
            trace!(ticket = self.ticket, "task settled");
            self.inner.turn_changed.notify_waiters();
        }
    }
}
