use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{constants, DimError, Result};

/// Objects owned by one daemon.
///
/// Cloning yields another handle to the same map. Every method takes the
/// lock once, so concurrent operations on one key serialize.
#[derive(Debug, Clone, Default)]
pub struct PeerStore {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Bytes>>> {
        self.objects
            .lock()
            .map_err(|_| DimError::LockPoisoned(constants::ERR_STORE_LOCK))
    }

    /// Store `value` under `key`, returning the object it replaced.
    pub fn insert(&self, key: impl Into<String>, value: Bytes) -> Result<Option<Bytes>> {
        Ok(self.lock()?.insert(key.into(), value))
    }

    pub fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.lock()?.get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    pub fn remove(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.lock()?.remove(key))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }
}
