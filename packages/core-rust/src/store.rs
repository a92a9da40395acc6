//! The in-memory key/value store and its concurrency discipline.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Errors the store can report to a caller.
///
/// `Put` and `Delete` are infallible under the current contract; the
/// `Result` they return exists to permit future constraints (e.g. quotas)
/// without a breaking signature change.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no such key")]
    NoSuchKey,
}

/// Thread-safe `string -> string` map with point Get/Put/Delete.
///
/// Every operation, including `get`, takes the same exclusive lock. A
/// single mutex is the simplest correct design: the backing map's
/// invariants must not be observed mid-mutation by a concurrent reader.
/// A reader-writer lock is a permitted optimization as long as `get`'s
/// visibility semantics (always see the latest completed write) are
/// preserved.
///
/// The store has no knowledge of the transaction logger: durability is
/// the frontend's responsibility (see `cloudkv_server::frontend`).
#[derive(Debug, Default)]
pub struct KvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KvStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or overwrites `key`. Never fails under the current contract.
    pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Removes `key` if present. Removing an absent key is a successful
    /// no-op at this layer; callers that want to distinguish "deleted
    /// something" from "nothing there" must check `get` first.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    /// Returns the current value for `key`, or [`StoreError::NoSuchKey`].
    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or(StoreError::NoSuchKey)
    }

    /// Number of keys currently stored. Exposed for tests and metrics, not
    /// part of the spec's client-facing contract.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
