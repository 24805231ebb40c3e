//! Field-level ciphers and the wire envelope for protected values
//!
//! The cryptographic primitive is a pluggable capability: each algorithm
//! implements `FieldCipher`, and the codec dispatches through a
//! `CipherRegistry` keyed by the rule's algorithm identifier.

use crate::error::{ProtectError, Result};
use crate::keystore::KeyMaterial;
use crate::types::SensitivityClass;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Cipher algorithm identifier, tagged on every protected field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256-GCM with a 96-bit nonce
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::Aes256Gcm => f.write_str("aes-256-gcm"),
        }
    }
}

/// Nonce strategy for sealing
///
/// `Random` is the default: identical plaintexts produce distinct
/// ciphertexts. `Deterministic` derives the nonce from the key and
/// plaintext, so equal inputs seal identically (for rules that opt in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceMode {
    Random,
    Deterministic,
}

/// Output of a seal operation
pub struct Sealed {
    /// Nonce used for this encryption
    pub nonce: Vec<u8>,
    /// Ciphertext including the authentication tag
    pub ciphertext: Vec<u8>,
}

/// Trait for field-level cipher implementations
pub trait FieldCipher: Send + Sync {
    /// The algorithm this cipher implements
    fn algorithm(&self) -> Algorithm;

    /// Encrypt a field's serialized plaintext
    fn seal(&self, key: &KeyMaterial, plaintext: &[u8], mode: NonceMode) -> Result<Sealed>;

    /// Decrypt a field's ciphertext
    fn open(&self, key: &KeyMaterial, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM field cipher
///
/// Requires 32-byte keys. Deterministic mode derives the nonce as the
/// first 96 bits of SHA-256(key || plaintext).
pub struct Aes256GcmCipher;

impl Aes256GcmCipher {
    fn cipher(key: &KeyMaterial) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| {
            ProtectError::Crypto(format!(
                "AES-256-GCM requires a 32-byte key, got {} bytes",
                key.len()
            ))
        })
    }

    fn derive_nonce(key: &KeyMaterial, plaintext: &[u8]) -> [u8; 12] {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(plaintext);
        let digest = hasher.finalize();
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&digest[..12]);
        nonce
    }
}

impl FieldCipher for Aes256GcmCipher {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Aes256Gcm
    }

    fn seal(&self, key: &KeyMaterial, plaintext: &[u8], mode: NonceMode) -> Result<Sealed> {
        let cipher = Self::cipher(key)?;
        let nonce_bytes = match mode {
            NonceMode::Random => Aes256Gcm::generate_nonce(&mut OsRng).to_vec(),
            NonceMode::Deterministic => Self::derive_nonce(key, plaintext).to_vec(),
        };
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| ProtectError::Crypto(format!("Encryption failed: {}", e)))?;

        Ok(Sealed {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    fn open(&self, key: &KeyMaterial, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != 12 {
            return Err(ProtectError::Crypto(format!(
                "AES-256-GCM requires a 96-bit nonce, got {} bytes",
                nonce.len()
            )));
        }
        let cipher = Self::cipher(key)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ProtectError::Crypto(format!("Decryption failed: {}", e)))
    }
}

/// Registry of cipher implementations keyed by algorithm
///
/// `Default` registers AES-256-GCM. Custom algorithms plug in via
/// `register`.
pub struct CipherRegistry {
    ciphers: HashMap<Algorithm, Box<dyn FieldCipher>>,
}

impl CipherRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            ciphers: HashMap::new(),
        }
    }

    /// Register a cipher, replacing any existing one for its algorithm
    pub fn register(&mut self, cipher: Box<dyn FieldCipher>) {
        self.ciphers.insert(cipher.algorithm(), cipher);
    }

    /// Look up the cipher for an algorithm
    pub fn get(&self, algorithm: Algorithm) -> Result<&dyn FieldCipher> {
        self.ciphers
            .get(&algorithm)
            .map(|c| c.as_ref())
            .ok_or_else(|| {
                ProtectError::Config(format!("No cipher registered for algorithm '{}'", algorithm))
            })
    }
}

impl Default for CipherRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(Aes256GcmCipher));
        registry
    }
}

/// Wire envelope replacing a sensitive field's value
///
/// Carries everything needed to decrypt later without external lookup of
/// which rule applied: the class, algorithm, key reference and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedField {
    /// Sensitivity class the classifier assigned
    pub class: SensitivityClass,

    /// Algorithm that sealed this field
    pub algorithm: Algorithm,

    /// Key reference from the protection rule
    pub key_ref: String,

    /// Key version the field was sealed under
    pub key_version: u32,

    /// Base64-encoded nonce
    pub nonce: String,

    /// Base64-encoded ciphertext
    pub ciphertext: String,

    /// Marker to identify protected values on the wire
    #[serde(default = "default_protected")]
    pub protected: bool,
}

fn default_protected() -> bool {
    true
}

impl ProtectedField {
    /// Build an envelope from a seal result
    pub fn new(
        class: SensitivityClass,
        algorithm: Algorithm,
        key_ref: impl Into<String>,
        key_version: u32,
        sealed: Sealed,
    ) -> Self {
        Self {
            class,
            algorithm,
            key_ref: key_ref.into(),
            key_version,
            nonce: BASE64.encode(sealed.nonce),
            ciphertext: BASE64.encode(sealed.ciphertext),
            protected: true,
        }
    }

    /// Check if a JSON value carries the protected-field marker
    pub fn is_protected(value: &serde_json::Value) -> bool {
        value
            .get("protected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Parse a marked JSON value into an envelope
    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| ProtectError::Encoding(format!("Corrupt protection envelope: {}", e)))
    }

    /// Decode the nonce
    pub fn nonce_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.nonce)
            .map_err(|e| ProtectError::Encoding(format!("Invalid nonce encoding: {}", e)))
    }

    /// Decode the ciphertext
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.ciphertext)
            .map_err(|e| ProtectError::Encoding(format!("Invalid ciphertext encoding: {}", e)))
    }
}
