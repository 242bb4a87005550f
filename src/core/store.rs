use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A staged write: `Some(bytes)` sets the key, `None` deletes it.
pub type Write = (String, Option<Vec<u8>>);

/// What a transaction observed for a key when it first read it.
pub type Read = (String, Option<Vec<u8>>);

#[derive(Debug)]
pub enum CommitError {
    /// A key read by the transaction changed before the commit landed
    Conflict(String),
    Store(anyhow::Error),
}

impl From<anyhow::Error> for CommitError {
    fn from(err: anyhow::Error) -> Self {
        CommitError::Store(err)
    }
}

/// Minimal key-value persistence the app runs on.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Add `delta` to the counter at `key` and return the new value. Applied
    /// immediately, outside any transaction.
    fn increment(&self, key: &str, delta: i64) -> anyhow::Result<i64>;

    /// Apply the writes, refusing the commit with [`CommitError::Conflict`]
    /// when a value in `reads` has changed since it was read.
    fn commit(&self, reads: &[Read], writes: Vec<Write>) -> Result<(), CommitError>;
}

/// Compare what a transaction saw against the store's current values.
fn check_reads<F>(reads: &[Read], mut current: F) -> Result<(), CommitError>
where
    F: FnMut(&str) -> anyhow::Result<Option<Vec<u8>>>,
{
    for (key, seen) in reads {
        if current(key)? != *seen {
            return Err(CommitError::Conflict(key.clone()));
        }
    }
    Ok(())
}

fn parse_counter(bytes: &[u8]) -> anyhow::Result<i64> {
    std::str::from_utf8(bytes)?
        .trim()
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("counter is not an integer: {}", e))
}

/// Process-local store shared by every worker of the native server.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().map(|d| d.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn increment(&self, key: &str, delta: i64) -> anyhow::Result<i64> {
        let mut data = self.lock()?;
        let current = match data.get(key) {
            Some(bytes) => parse_counter(bytes)?,
            None => 0,
        };
        let next = current + delta;
        data.insert(key.to_string(), next.to_string().into_bytes());
        Ok(next)
    }

    /// Atomic: the check and every write happen under one lock.
    fn commit(&self, reads: &[Read], writes: Vec<Write>) -> Result<(), CommitError> {
        let mut data = self.lock()?;
        check_reads(reads, |key| Ok(data.get(key).cloned()))?;

        for (key, value) in writes {
            match value {
                Some(bytes) => data.insert(key, bytes),
                None => data.remove(&key),
            };
        }
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
mod spin_kv {
    use std::collections::{HashMap, HashSet};

    use spin_sdk::wit::wasi::keyvalue::atomics::{self, Cas, CasError};
    use spin_sdk::wit::wasi::keyvalue::store::{self, Bucket};

    use super::{check_reads, CommitError, KvStore, Read, Write};

    /// Spin's key-value store over `wasi:keyvalue`. Counters use the host's
    /// atomic increment; commits compare-and-swap every key the transaction
    /// read before overwriting it.
    pub struct SpinStore {
        bucket: Bucket,
    }

    impl SpinStore {
        pub fn open_default() -> anyhow::Result<Self> {
            let bucket = store::open("default")
                .map_err(|e| anyhow::anyhow!("Failed to open key-value store: {:?}", e))?;
            Ok(Self { bucket })
        }

        fn cas(&self, key: &str) -> anyhow::Result<Cas> {
            Cas::new(&self.bucket, key).map_err(|e| anyhow::anyhow!("Failed to watch {}: {:?}", key, e))
        }
    }

    impl KvStore for SpinStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            self.bucket
                .get(key)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {:?}", key, e))
        }

        fn increment(&self, key: &str, delta: i64) -> anyhow::Result<i64> {
            atomics::increment(&self.bucket, key, delta)
                .map_err(|e| anyhow::anyhow!("Failed to increment {}: {:?}", key, e))
        }

        fn commit(&self, reads: &[Read], writes: Vec<Write>) -> Result<(), CommitError> {
            let read_keys: HashSet<&str> = reads.iter().map(|(k, _)| k.as_str()).collect();

            // Pin a version of every read-then-written key and validate all
            // reads before the first write lands.
            let mut guarded = HashMap::new();
            for (key, _) in &writes {
                if read_keys.contains(key.as_str()) {
                    guarded.insert(key.clone(), self.cas(key)?);
                }
            }
            check_reads(reads, |key| match guarded.get(key) {
                Some(cas) => cas
                    .current()
                    .map_err(|e| anyhow::anyhow!("Failed to read {}: {:?}", key, e)),
                None => self.get(key),
            })?;

            // Checked keys go first, so a conflict stops the commit before any
            // unchecked write lands.
            let (checked, plain): (Vec<Write>, Vec<Write>) =
                writes.into_iter().partition(|(key, _)| guarded.contains_key(key));
            for (key, value) in checked.into_iter().chain(plain) {
                match (guarded.remove(&key), value) {
                    (Some(cas), Some(bytes)) => match atomics::swap(cas, &bytes) {
                        Ok(()) => {}
                        Err(CasError::CasFailed(_)) => return Err(CommitError::Conflict(key)),
                        Err(CasError::StoreError(e)) => {
                            return Err(anyhow::anyhow!("Failed to write {}: {:?}", key, e).into())
                        }
                    },
                    (None, Some(bytes)) => self
                        .bucket
                        .set(&key, &bytes)
                        .map_err(|e| anyhow::anyhow!("Failed to write {}: {:?}", key, e))?,
                    (_, None) => self
                        .bucket
                        .delete(&key)
                        .map_err(|e| anyhow::anyhow!("Failed to delete {}: {:?}", key, e))?,
                }
            }
            Ok(())
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use spin_kv::SpinStore;

/// Request-scoped unit of work. Reads see this transaction's own staged
/// writes; nothing reaches the store until [`Transaction::commit`], so
/// dropping it is a rollback.
pub struct Transaction<'a> {
    store: &'a dyn KvStore,
    reads: RefCell<HashMap<String, Option<Vec<u8>>>>,
    writes: RefCell<HashMap<String, Option<Vec<u8>>>>,
}

impl<'a> Transaction<'a> {
    pub fn begin(store: &'a dyn KvStore) -> Self {
        Self {
            store,
            reads: RefCell::new(HashMap::new()),
            writes: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(staged) = self.writes.borrow().get(key) {
            return Ok(staged.clone());
        }
        if let Some(seen) = self.reads.borrow().get(key) {
            return Ok(seen.clone());
        }
        let value = self.store.get(key)?;
        self.reads.borrow_mut().insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Bump a counter in the store right away. Rolling back the transaction
    /// does not undo it, so sequences may have gaps.
    pub fn increment(&self, key: &str) -> anyhow::Result<u64> {
        let value = self.store.increment(key, 1)?;
        u64::try_from(value).map_err(|_| anyhow::anyhow!("counter {} went negative", key))
    }

    pub fn set(&self, key: &str, value: Vec<u8>) {
        self.writes.borrow_mut().insert(key.to_string(), Some(value));
    }

    pub fn delete(&self, key: &str) {
        self.writes.borrow_mut().insert(key.to_string(), None);
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.set(key, serde_json::to_vec(value)?);
        Ok(())
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.borrow().is_empty()
    }

    pub fn commit(self) -> Result<(), CommitError> {
        let writes: Vec<Write> = self.writes.into_inner().into_iter().collect();
        if writes.is_empty() {
            return Ok(());
        }
        let reads: Vec<Read> = self.reads.into_inner().into_iter().collect();
        self.store.commit(&reads, writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_see_own_writes() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        tx.set_json("k", &vec![1, 2, 3]).unwrap();
        assert_eq!(tx.get_json::<Vec<i32>>("k").unwrap(), Some(vec![1, 2, 3]));
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn dropping_a_transaction_discards_writes() {
        let store = MemoryStore::new();
        {
            let tx = Transaction::begin(&store);
            tx.set("a", b"1".to_vec());
            tx.set("b", b"2".to_vec());
        }
        assert!(store.is_empty());
    }

    #[test]
    fn commit_applies_all_writes() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        tx.set("a", b"1".to_vec());
        tx.set("b", b"2".to_vec());
        tx.commit().unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.len(), 2);

        let tx = Transaction::begin(&store);
        tx.delete("a");
        assert!(tx.get("a").unwrap().is_none());
        tx.commit().unwrap();
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn stale_read_rejects_commit() {
        let store = MemoryStore::new();
        let first = Transaction::begin(&store);
        let second = Transaction::begin(&store);

        assert!(first.get("counter").unwrap().is_none());
        assert!(second.get("counter").unwrap().is_none());
        first.set("counter", b"1".to_vec());
        second.set("counter", b"1".to_vec());

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(CommitError::Conflict(key)) if key == "counter"));
    }

    #[test]
    fn counters_survive_rollback() {
        let store = MemoryStore::new();
        {
            let tx = Transaction::begin(&store);
            assert_eq!(tx.increment("seq").unwrap(), 1);
        }
        let first = Transaction::begin(&store);
        let second = Transaction::begin(&store);
        assert_eq!(first.increment("seq").unwrap(), 2);
        assert_eq!(second.increment("seq").unwrap(), 3);
        assert_eq!(store.increment("seq", 10).unwrap(), 13);
    }

    #[test]
    fn read_only_transaction_commits_trivially() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        assert!(tx.get("missing").unwrap().is_none());
        assert!(!tx.has_writes());
        tx.commit().unwrap();
    }
}
