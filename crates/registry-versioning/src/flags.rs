//! Feature-flag source contract and an in-process implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::error::FlagError;

/// Supplies structured flag values by key.
///
/// Implementations must be cheap and side-effect free: the versioned
/// session reads the versioning flag on every flush. A key the service
/// does not know resolves to `Value::Null`, which is the flag default;
/// errors are reserved for a service that cannot answer at all.
pub trait FlagSource: Send + Sync {
    /// Returns the current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns `FlagError::Unavailable` if the flag service cannot answer.
    fn value(&self, key: &str) -> Result<Value, FlagError>;
}

impl<T: FlagSource + ?Sized> FlagSource for Arc<T> {
    fn value(&self, key: &str) -> Result<Value, FlagError> {
        (**self).value(key)
    }
}

/// Flag values held in process memory.
///
/// Values can be replaced at any time with [`StaticFlags::set`]; sessions
/// observe the change on their next flush.
#[derive(Debug, Default)]
pub struct StaticFlags {
    values: RwLock<HashMap<String, Value>>,
}

impl StaticFlags {
    /// Creates an empty flag set; every key resolves to `Value::Null`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a flag set seeded with `values`.
    pub fn from_values(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: RwLock::new(values.into_iter().collect()),
        }
    }

    /// Replaces the value of `key`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        tracing::debug!(flag = %key, %value, "flag value updated");
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    /// Removes `key`, so it resolves to `Value::Null` again.
    pub fn unset(&self, key: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

impl FlagSource for StaticFlags {
    fn value(&self, key: &str) -> Result<Value, FlagError> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or(Value::Null))
    }
}
