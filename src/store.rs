use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::blocking::WaiterQueues;
use crate::list::Sequence;

pub(crate) enum Value {
    String(Vec<u8>),
    List(Sequence),
}

pub(crate) struct Entry {
    pub(crate) value: Value,
    pub(crate) expiry: Option<Instant>,
}

impl Entry {
    pub(crate) fn string(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value: Value::String(value),
            expiry: ttl.map(|d| Instant::now() + d),
        }
    }

    pub(crate) fn list() -> Self {
        Self {
            value: Value::List(Sequence::new()),
            expiry: None,
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|e| Instant::now() >= e)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListEnd {
    Front,
    Back,
}

/// State guarded by the keyspace lock: every entry plus every BLPOP queue.
#[derive(Default)]
pub(crate) struct Db {
    pub(crate) entries: HashMap<Vec<u8>, Entry>,
    pub(crate) waiters: WaiterQueues,
}

impl Db {
    /// Look up `key`, dropping it first if its expiry has passed.
    fn live_entry(&mut self, key: &[u8]) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(Entry::is_expired) {
            self.entries.remove(key);
            debug!(key = %String::from_utf8_lossy(key), "expired key removed on access");
            metrics::counter!("kvq_expired_keys_total").increment(1);
            self.publish_key_count();
        }
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: &[u8], entry: Entry) {
        self.entries.insert(key.to_vec(), entry);
        self.publish_key_count();
    }

    fn publish_key_count(&self) {
        metrics::gauge!("kvq_keys_total").set(self.entries.len() as f64);
    }

    /// The list stored at `key`, or `None` when the key is absent.
    pub(crate) fn list_mut(&mut self, key: &[u8]) -> Result<Option<&mut Sequence>, StoreError> {
        match self.live_entry(key) {
            None => Ok(None),
            Some(Entry { value: Value::List(seq), .. }) => Ok(Some(seq)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    fn list_or_create(&mut self, key: &[u8]) -> Result<&mut Sequence, StoreError> {
        if self.live_entry(key).is_none() {
            self.insert(key, Entry::list());
        }
        self.list_mut(key)?.ok_or(StoreError::WrongType)
    }

    pub(crate) fn pop(&mut self, key: &[u8], end: ListEnd) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.list_mut(key)?.and_then(|seq| match end {
            ListEnd::Front => seq.pop_front(),
            ListEnd::Back => seq.pop_back(),
        }))
    }
}

/// The shared keyspace. One lock covers the entry map and the waiter queues,
/// and no operation awaits anything but that lock while holding it.
pub struct Keyspace {
    pub(crate) db: Mutex<Db>,
    default_ttl: Option<Duration>,
    pub(crate) next_waiter_id: AtomicU64,
}

pub type Store = Arc<Keyspace>;

impl Keyspace {
    /// `default_ttl` is the expiry given to keys written by a plain `SET`.
    pub fn new(default_ttl: Option<Duration>) -> Self {
        metrics::gauge!("kvq_keys_total").set(0.0);
        Self {
            db: Mutex::new(Db::default()),
            default_ttl,
            next_waiter_id: AtomicU64::new(1),
        }
    }

    pub async fn set_string(&self, key: &[u8], value: Vec<u8>) {
        self.put_string(key, value, self.default_ttl).await;
    }

    pub async fn set_string_with_expiry(&self, key: &[u8], value: Vec<u8>, ttl: Duration) {
        self.put_string(key, value, Some(ttl)).await;
    }

    async fn put_string(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) {
        debug!(key = %String::from_utf8_lossy(key), ttl = ?ttl, "SET");
        self.db.lock().await.insert(key, Entry::string(value, ttl));
    }

    /// The string at `key`. Absent, expired and list-valued keys all read as
    /// `None`.
    pub async fn get_string(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.db.lock().await.live_entry(key) {
            Some(Entry { value: Value::String(bytes), .. }) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub async fn push_back(&self, key: &[u8], value: Vec<u8>) -> Result<usize, StoreError> {
        self.push(key, vec![value], ListEnd::Back).await
    }

    pub async fn push_front(&self, key: &[u8], value: Vec<u8>) -> Result<usize, StoreError> {
        self.push(key, vec![value], ListEnd::Front).await
    }

    /// Push `values` in order onto one end of the list at `key`.
    ///
    /// Each value goes to the longest-blocked BLPOP caller on `key` if there
    /// is one and only lands in the list otherwise. The returned length counts
    /// handed-off values as if they had been pushed and then popped.
    pub async fn push(
        &self,
        key: &[u8],
        values: Vec<Vec<u8>>,
        end: ListEnd,
    ) -> Result<usize, StoreError> {
        let mut guard = self.db.lock().await;
        let db = &mut *guard;
        let existing = db.list_mut(key)?.map_or(0, |seq| seq.len());

        let mut values = values.into_iter();
        let mut handed_off = 0usize;
        let mut leftover = None;
        for value in values.by_ref() {
            match db.waiters.hand_off(key, value) {
                Ok(waiter) => {
                    handed_off += 1;
                    debug!(key = %String::from_utf8_lossy(key), waiter, "handed value to blocked client");
                }
                Err(value) => {
                    leftover = Some(value);
                    break;
                }
            }
        }

        // Nobody can register as a waiter while we hold the lock, so once one
        // value misses the queue every remaining value goes to the list.
        let len = match leftover {
            None => existing,
            Some(first) => {
                let seq = db.list_or_create(key)?;
                for value in std::iter::once(first).chain(values) {
                    match end {
                        ListEnd::Front => seq.push_front(value),
                        ListEnd::Back => seq.push_back(value),
                    }
                }
                seq.len()
            }
        };
        debug!(key = %String::from_utf8_lossy(key), ?end, len, handed_off, "push");
        Ok(len + handed_off)
    }

    pub async fn list_len(&self, key: &[u8]) -> Result<usize, StoreError> {
        Ok(self
            .db
            .lock()
            .await
            .list_mut(key)?
            .map_or(0, |seq| seq.len()))
    }

    pub async fn range(&self, key: &[u8], start: i64, end: i64) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self
            .db
            .lock()
            .await
            .list_mut(key)?
            .map(|seq| seq.range(start, end))
            .unwrap_or_default())
    }

    pub async fn pop_front(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db.lock().await.pop(key, ListEnd::Front)
    }

    pub async fn pop_back(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db.lock().await.pop(key, ListEnd::Back)
    }

    /// Pop up to `count` values from one end. `None` means the key is absent;
    /// an existing but empty list yields an empty vector.
    pub async fn pop_many(
        &self,
        key: &[u8],
        count: usize,
        end: ListEnd,
    ) -> Result<Option<Vec<Vec<u8>>>, StoreError> {
        let mut db = self.db.lock().await;
        let Some(seq) = db.list_mut(key)? else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(count.min(seq.len()));
        while out.len() < count {
            let popped = match end {
                ListEnd::Front => seq.pop_front(),
                ListEnd::Back => seq.pop_back(),
            };
            match popped {
                Some(value) => out.push(value),
                None => break,
            }
        }
        Ok(Some(out))
    }
}
