//! Execution context shared by every handler of one run.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, SchedulerError};

/// Mutable key/value bag passed to every handler of a run.
///
/// Cloning is cheap and clones share state, which is what lets handlers in a
/// parallel bucket see each other's writes. Locks are only held inside the
/// accessor methods, never across an `.await`.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    values: RwLock<HashMap<String, Value>>,
    error: RwLock<Option<SchedulerError>>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with values.
    pub fn from_values(values: HashMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                values: RwLock::new(values),
                error: RwLock::new(None),
            }),
        }
    }

    /// Get a copy of a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    /// Get a value deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Store a raw JSON value, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values_mut().insert(key.into(), value)
    }

    /// Serialize and store a value.
    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.insert(key, value);
        Ok(())
    }

    /// Read-modify-write a value under a single lock acquisition.
    ///
    /// A missing key starts out as `Value::Null`.
    pub fn update<F, R>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Value) -> R,
    {
        let mut values = self.values_mut();
        let slot = values.entry(key.to_string()).or_insert(Value::Null);
        f(slot)
    }

    /// Append to the array stored under `key`, creating it if needed.
    ///
    /// A non-array value is replaced by a new array.
    pub fn push(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        self.update(key, move |slot| match slot {
            Value::Array(items) => items.push(value),
            other => *other = Value::Array(vec![value]),
        });
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values_mut().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of every value, e.g. for reporting after a run.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values().clone()
    }

    /// The error recorded by the last failing handler, if any.
    pub fn error(&self) -> Option<SchedulerError> {
        self.error_slot().clone()
    }

    pub fn has_error(&self) -> bool {
        self.error_slot().is_some()
    }

    /// Record an error, replacing any earlier one.
    pub fn set_error(&self, error: SchedulerError) {
        *self.error_slot_mut() = Some(error);
    }

    pub fn take_error(&self) -> Option<SchedulerError> {
        self.error_slot_mut().take()
    }

    fn values(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.inner
            .values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn values_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.inner
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn error_slot(&self) -> RwLockReadGuard<'_, Option<SchedulerError>> {
        self.inner
            .error
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn error_slot_mut(&self) -> RwLockWriteGuard<'_, Option<SchedulerError>> {
        self.inner
            .error
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("keys", &self.keys())
            .field("error", &self.error().map(|e| e.to_string()))
            .finish()
    }
}
