//! BLPOP coordination.
//!
//! A caller that finds nothing to pop registers a waiter holding the sending
//! half of a one-shot slot and then waits on the receiving half with the
//! keyspace lock released. Producers pushing to that key hand values
//! straight to the oldest waiter instead of storing them. Both the hand-off
//! and a timed-out waiter's self-removal happen under the keyspace lock, so
//! each waiter leaves its queue exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::store::{Keyspace, ListEnd, StoreError};

struct Waiter {
    id: u64,
    slot: oneshot::Sender<Vec<u8>>,
}

/// Per-key FIFO queues of blocked callers.
#[derive(Default)]
pub(crate) struct WaiterQueues {
    queues: HashMap<Vec<u8>, VecDeque<Waiter>>,
    len: usize,
}

impl WaiterQueues {
    /// Append a waiter to the back of `key`'s queue and return the slot it
    /// will be served through.
    pub(crate) fn register(&mut self, key: &[u8], id: u64) -> oneshot::Receiver<Vec<u8>> {
        let (slot, rx) = oneshot::channel();
        let queue = self.queues.entry(key.to_vec()).or_default();
        let before = queue.len();
        // Callers that were cancelled while blocked leave closed slots behind.
        queue.retain(|w| !w.slot.is_closed());
        self.len -= before - queue.len();
        queue.push_back(Waiter { id, slot });
        self.len += 1;
        self.publish();
        rx
    }

    /// Deliver `value` to the oldest live waiter on `key`, returning its id.
    /// The value comes back unchanged when nobody is waiting.
    pub(crate) fn hand_off(&mut self, key: &[u8], mut value: Vec<u8>) -> Result<u64, Vec<u8>> {
        let Some(queue) = self.queues.get_mut(key) else {
            return Err(value);
        };
        let outcome = loop {
            let Some(waiter) = queue.pop_front() else {
                break Err(value);
            };
            self.len -= 1;
            match waiter.slot.send(value) {
                Ok(()) => break Ok(waiter.id),
                Err(returned) => value = returned,
            }
        };
        if queue.is_empty() {
            self.queues.remove(key);
        }
        self.publish();
        outcome
    }

    /// Remove waiter `id` from `key`'s queue. Returns false if it was already
    /// served.
    pub(crate) fn remove(&mut self, key: &[u8], id: u64) -> bool {
        let Some(queue) = self.queues.get_mut(key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|w| w.id != id);
        let removed = queue.len() < before;
        if removed {
            self.len -= 1;
        }
        if queue.is_empty() {
            self.queues.remove(key);
        }
        self.publish();
        removed
    }

    #[cfg(test)]
    pub(crate) fn waiting_on(&self, key: &[u8]) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }

    fn publish(&self) {
        metrics::gauge!("kvq_blocked_clients").set(self.len as f64);
    }
}

impl Keyspace {
    /// Pop the head of the list at `key`, waiting for a push if it is empty.
    ///
    /// `timeout` of `None` waits indefinitely. Returns `Ok(None)` when the
    /// timeout elapses without a value being delivered.
    pub async fn blocking_pop_front(
        &self,
        key: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let (id, mut slot) = {
            let mut db = self.db.lock().await;
            if let Some(value) = db.pop(key, ListEnd::Front)? {
                return Ok(Some(value));
            }
            let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
            (id, db.waiters.register(key, id))
        };
        debug!(key = %String::from_utf8_lossy(key), waiter = id, ?timeout, "BLPOP blocked");

        let delivered = match timeout {
            None => (&mut slot).await.ok(),
            Some(limit) => tokio::time::timeout(limit, &mut slot)
                .await
                .ok()
                .and_then(Result::ok),
        };
        match delivered {
            Some(value) => Ok(Some(value)),
            None => Ok(self.abandon(key, id, slot).await),
        }
    }

    /// Withdraw a timed-out waiter. A producer may have filled the slot
    /// between the timer firing and the lock being taken; that value wins.
    pub(crate) async fn abandon(
        &self,
        key: &[u8],
        id: u64,
        mut slot: oneshot::Receiver<Vec<u8>>,
    ) -> Option<Vec<u8>> {
        let withdrawn = self.db.lock().await.waiters.remove(key, id);
        match slot.try_recv() {
            Ok(value) => {
                debug!(key = %String::from_utf8_lossy(key), waiter = id, "BLPOP served at timeout");
                Some(value)
            }
            Err(_) => {
                debug!(key = %String::from_utf8_lossy(key), waiter = id, withdrawn, "BLPOP timed out");
                None
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn blocked_on(&self, key: &[u8]) -> usize {
        self.db.lock().await.waiters.waiting_on(key)
    }
}
