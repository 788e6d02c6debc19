//! Bounded change event queues.
//!
//! Each queue is a FIFO guarded by a mutex, with a semaphore counting free
//! slots. Producers wait for a slot in [`ChangeEventQueue::offer`]; consumers
//! take batches with [`ChangeEventQueue::drain`] or
//! [`ChangeEventQueue::poll`]. Closing the queue fails pending and future
//! offers with [`CdcError::Cancelled`] and wakes waiting consumers.
//!
//! Events of one table always land in the same queue (CRC32 of the table
//! name), which keeps per-table order while letting queues run in parallel.

use super::event::Event;
use super::position::KeyspaceTable;
use crate::common::{CdcError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

/// Bounded MPMC FIFO of events.
#[derive(Debug)]
pub struct ChangeEventQueue {
    id: usize,
    capacity: usize,
    max_batch_size: usize,
    events: Mutex<VecDeque<Event>>,
    slots: Semaphore,
    available: Notify,
    closed: AtomicBool,
}

impl ChangeEventQueue {
    pub fn new(id: usize, capacity: usize, max_batch_size: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id,
            capacity,
            max_batch_size: max_batch_size.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.min(8192))),
            slots: Semaphore::new(capacity),
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Enqueue an event, waiting while the queue is full.
    pub async fn offer(&self, event: Event) -> Result<()> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| CdcError::Cancelled)?;
        permit.forget();

        {
            let mut events = self.events.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(CdcError::Cancelled);
            }
            events.push_back(event);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Take up to `max_batch_size` events without waiting.
    pub fn drain(&self) -> Vec<Event> {
        let batch: Vec<Event> = {
            let mut events = self.events.lock();
            let n = events.len().min(self.max_batch_size);
            events.drain(..n).collect()
        };
        if !batch.is_empty() {
            self.slots.add_permits(batch.len());
        }
        batch
    }

    /// Drain, or wait up to `timeout` for events and drain then.
    pub async fn poll(&self, timeout: Duration) -> Vec<Event> {
        let batch = self.drain();
        if !batch.is_empty() || self.is_closed() {
            return batch;
        }

        let _ = tokio::time::timeout(timeout, self.available.notified()).await;
        self.drain()
    }

    /// Stop accepting events and wake every waiter.
    ///
    /// Events already enqueued stay available to `drain`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closing change event queue {}", self.id);
        }
        self.slots.close();
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn total_capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.events.lock().len()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Fixed set of queues with stable routing by table.
#[derive(Debug, Clone)]
pub struct ChangeEventQueues {
    queues: Vec<Arc<ChangeEventQueue>>,
}

impl ChangeEventQueues {
    pub fn new(count: usize, capacity: usize, max_batch_size: usize) -> Self {
        let queues = (0..count.max(1))
            .map(|id| Arc::new(ChangeEventQueue::new(id, capacity, max_batch_size)))
            .collect();
        Self { queues }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Index of the queue owning a table.
    pub fn index_for(&self, table: &KeyspaceTable) -> usize {
        let hash = crc32fast::hash(table.name().as_bytes());
        hash as usize % self.queues.len()
    }

    pub fn queue_for(&self, table: &KeyspaceTable) -> &Arc<ChangeEventQueue> {
        &self.queues[self.index_for(table)]
    }

    pub fn get(&self, index: usize) -> Option<&Arc<ChangeEventQueue>> {
        self.queues.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChangeEventQueue>> {
        self.queues.iter()
    }

    pub fn close_all(&self) {
        for queue in &self.queues {
            queue.close();
        }
    }

    /// Events waiting across all queues.
    pub fn total_len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}
