//! Store keys: which object, how large it was, and which daemon owns it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DimError, Result};
use crate::transport::address::PeerUrl;

/// Random bytes behind a minted key id
const KEY_ID_BYTES: usize = 16;

/// Immutable handle to one stored object.
///
/// `object_size` is the payload length at creation time and sizes receive
/// buffers; the owning daemon does not check it against what it stores.
/// `owner` never changes, and every operation on the key is sent there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    key_id: String,
    object_size: u64,
    owner: PeerUrl,
}

impl StoreKey {
    pub fn new(key_id: impl Into<String>, object_size: u64, owner: PeerUrl) -> Self {
        Self {
            key_id: key_id.into(),
            object_size,
            owner,
        }
    }

    /// Fresh key with a random 128-bit id.
    pub fn mint(object_size: u64, owner: PeerUrl) -> Result<Self> {
        let mut raw = [0u8; KEY_ID_BYTES];
        getrandom::fill(&mut raw).map_err(|e| DimError::KeyGeneration(e.to_string()))?;
        let key_id = raw.iter().map(|b| format!("{b:02x}")).collect::<String>();
        Ok(Self::new(key_id, object_size, owner))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    pub fn owner(&self) -> &PeerUrl {
        &self.owner
    }

    /// Same object and owner with a different recorded size.
    pub fn with_size(&self, object_size: u64) -> Self {
        Self {
            object_size,
            ..self.clone()
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({} bytes)", self.key_id, self.owner, self.object_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::address::Protocol;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_minted_ids_are_unique_hex() {
        let owner = PeerUrl::new(Protocol::Tcp, "127.0.0.1", 6367);
        let a = StoreKey::mint(5, owner.clone()).unwrap();
        let b = StoreKey::mint(5, owner.clone()).unwrap();

        assert_ne!(a.key_id(), b.key_id());
        assert_eq!(a.key_id().len(), 32);
        assert!(a.key_id().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.owner(), &owner);
        assert_eq!(a.object_size(), 5);
    }

    #[test]
    fn test_display_names_owner() {
        let key = StoreKey::new("k", 5, PeerUrl::new(Protocol::OfiTcp, "10.0.0.5", 6367));
        assert_eq!(key.to_string(), "k@ofi+tcp://10.0.0.5:6367 (5 bytes)");
        assert_eq!(key.with_size(9).object_size(), 9);
    }
}
