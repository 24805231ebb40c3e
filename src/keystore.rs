//! Key store seam for encryption material
//!
//! Supplies key material by (key reference, version), enabling rotation:
//! old versions stay retrievable for decrypting records sealed before the
//! active version advanced. Network-backed implementations may block, so
//! the codec wraps every lookup in a timeout.

use crate::error::{ProtectError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw key bytes, zeroized on drop
///
/// `Debug` is redacted so key material never reaches logs.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Wrap raw key bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial({} bytes, redacted)", self.0.len())
    }
}

/// Trait for key material backends
///
/// Implementations resolve (key reference, version) pairs to key bytes.
/// `get_key` must keep serving old versions after rotation for as long as
/// the material exists; a destroyed version surfaces `UnknownKeyVersion`.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch key material for a specific version of a key reference
    async fn get_key(&self, key_ref: &str, version: u32) -> Result<KeyMaterial>;

    /// The version new encryptions should use for this key reference
    async fn active_version(&self, key_ref: &str) -> Result<u32>;
}

/// One key reference's registered versions plus the active pointer
struct KeyRing {
    versions: BTreeMap<u32, KeyMaterial>,
    active: u32,
}

/// In-memory key store for development and testing
///
/// Keys are lost on process restart. The first version added for a key
/// reference becomes active; `rotate_to` advances the pointer.
#[derive(Default)]
pub struct MemoryKeyStore {
    rings: RwLock<HashMap<String, KeyRing>>,
}

impl MemoryKeyStore {
    /// Create a new empty key store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register key material for a version
    ///
    /// Creates the key ring if the reference is new, making this version
    /// active. Re-adding an existing version replaces its material.
    pub fn add_version(&self, key_ref: impl Into<String>, version: u32, key: &[u8]) -> Result<()> {
        let mut rings = self.rings.write().map_err(|e| {
            ProtectError::Config(format!("Failed to acquire key ring lock: {}", e))
        })?;
        rings
            .entry(key_ref.into())
            .and_modify(|ring| {
                ring.versions.insert(version, KeyMaterial::new(key));
            })
            .or_insert_with(|| KeyRing {
                versions: BTreeMap::from([(version, KeyMaterial::new(key))]),
                active: version,
            });
        Ok(())
    }

    /// Rotate the active version for a key reference
    ///
    /// The target version must already be registered via `add_version`.
    pub fn rotate_to(&self, key_ref: &str, version: u32) -> Result<()> {
        let mut rings = self.rings.write().map_err(|e| {
            ProtectError::Config(format!("Failed to acquire key ring lock: {}", e))
        })?;
        let ring = rings.get_mut(key_ref).ok_or_else(|| {
            ProtectError::Config(format!("No key material registered for '{}'", key_ref))
        })?;
        if !ring.versions.contains_key(&version) {
            return Err(ProtectError::Config(format!(
                "Version {} of key '{}' not registered, add it first",
                version, key_ref
            )));
        }
        ring.active = version;
        tracing::info!(key_ref = %key_ref, version, "Key rotated");
        Ok(())
    }

    /// Remove a version's material (expiry, compromise)
    ///
    /// Records sealed under the destroyed version become undecryptable.
    /// The active version cannot be destroyed.
    pub fn destroy_version(&self, key_ref: &str, version: u32) -> Result<()> {
        let mut rings = self.rings.write().map_err(|e| {
            ProtectError::Config(format!("Failed to acquire key ring lock: {}", e))
        })?;
        let ring = rings.get_mut(key_ref).ok_or_else(|| {
            ProtectError::Config(format!("No key material registered for '{}'", key_ref))
        })?;
        if ring.active == version {
            return Err(ProtectError::Config(format!(
                "Cannot destroy active version {} of key '{}', rotate first",
                version, key_ref
            )));
        }
        if ring.versions.remove(&version).is_none() {
            return Err(ProtectError::UnknownKeyVersion {
                key_ref: key_ref.to_string(),
                version,
            });
        }
        tracing::info!(key_ref = %key_ref, version, "Key version destroyed");
        Ok(())
    }

    /// List registered versions for a key reference, ascending
    pub fn versions(&self, key_ref: &str) -> Vec<u32> {
        self.rings
            .read()
            .ok()
            .and_then(|rings| rings.get(key_ref).map(|r| r.versions.keys().copied().collect()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_key(&self, key_ref: &str, version: u32) -> Result<KeyMaterial> {
        let rings = self.rings.read().map_err(|e| {
            ProtectError::Config(format!("Failed to acquire key ring lock: {}", e))
        })?;
        rings
            .get(key_ref)
            .and_then(|ring| ring.versions.get(&version))
            .cloned()
            .ok_or_else(|| ProtectError::UnknownKeyVersion {
                key_ref: key_ref.to_string(),
                version,
            })
    }

    async fn active_version(&self, key_ref: &str) -> Result<u32> {
        let rings = self.rings.read().map_err(|e| {
            ProtectError::Config(format!("Failed to acquire key ring lock: {}", e))
        })?;
        rings
            .get(key_ref)
            .map(|ring| ring.active)
            .ok_or_else(|| {
                ProtectError::Config(format!("No key material registered for '{}'", key_ref))
            })
    }
}
