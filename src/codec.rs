//! Protection codec: seal and open record fields per policy
//!
//! The codec is stateless per call: output depends only on the record,
//! the classification, the policy snapshot, and the caller, plus key-store
//! lookups and best-effort audit emission. Key material is fetched up
//! front and owned by the call future, so cancelling a call releases
//! everything without leaving shared state inconsistent.
//!
//! Both directions are all-or-nothing per record: a rejected record never
//! partially appears in clear form.

use crate::audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::classify::Classification;
use crate::crypto::{CipherRegistry, NonceMode, ProtectedField};
use crate::error::{ProtectError, Result};
use crate::keystore::{KeyMaterial, KeyStore};
use crate::policy::{PolicySnapshot, ProtectionRule};
use crate::types::{join_path, CallerIdentity, Record, SensitivityClass};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_KEY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved material for sealing one class's fields
struct SealKey {
    rule: ProtectionRule,
    version: u32,
    material: KeyMaterial,
}

/// Encrypts and decrypts record fields according to protection rules
///
/// Safe for concurrent use from parallel producer and consumer workers.
pub struct ProtectionCodec {
    keys: Arc<dyn KeyStore>,
    ciphers: CipherRegistry,
    audit: Arc<dyn AuditSink>,
    key_timeout: Duration,
}

impl ProtectionCodec {
    /// Create a codec over a key store with the default cipher registry,
    /// tracing audit sink, and a 5 second key-store timeout
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self {
            keys,
            ciphers: CipherRegistry::default(),
            audit: Arc::new(TracingAuditSink),
            key_timeout: DEFAULT_KEY_TIMEOUT,
        }
    }

    /// Replace the audit sink
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replace the cipher registry
    pub fn with_ciphers(mut self, ciphers: CipherRegistry) -> Self {
        self.ciphers = ciphers;
        self
    }

    /// Set the timeout applied to each key-store lookup
    pub fn with_key_timeout(mut self, timeout: Duration) -> Self {
        self.key_timeout = timeout;
        self
    }

    /// Seal every sensitive field of a record into a protection envelope
    ///
    /// `NONE` fields are copied unchanged. The output has exactly the same
    /// field paths as the input, in the same order. Key material for each
    /// class is resolved once, at the active version of the rule's key
    /// reference.
    pub async fn protect(
        &self,
        record: &Record,
        classification: &Classification,
        policy: &PolicySnapshot,
        caller: &CallerIdentity,
    ) -> Result<Record> {
        let mut seal_keys: HashMap<SensitivityClass, SealKey> = HashMap::new();
        for (path, class) in classification.iter() {
            if seal_keys.contains_key(&class) {
                continue;
            }
            let rule = policy.rule_for(class)?.clone();
            let resolved = async {
                let version = self
                    .timed(&rule.key_ref, self.keys.active_version(&rule.key_ref))
                    .await?;
                let material = self
                    .timed(&rule.key_ref, self.keys.get_key(&rule.key_ref, version))
                    .await?;
                Ok::<_, ProtectError>((version, material))
            }
            .await;
            match resolved {
                Ok((version, material)) => {
                    seal_keys.insert(
                        class,
                        SealKey {
                            rule,
                            version,
                            material,
                        },
                    );
                }
                Err(e) => {
                    self.audit.emit(AuditEvent::new(
                        path.as_str(),
                        class,
                        AuditAction::Protect,
                        caller.id.as_str(),
                        AuditOutcome::Failed,
                    ));
                    return Err(e);
                }
            }
        }

        let mut events = Vec::with_capacity(classification.len());
        let sealed = self.seal_walk(record, "", classification, &seal_keys, caller, &mut events)?;
        for event in events {
            self.audit.emit(event);
        }
        Ok(sealed)
    }

    /// Reverse protection envelopes back into clear fields
    ///
    /// The caller's roles are checked against every envelope's rule before
    /// any decryption happens: a single missing role rejects the whole
    /// record with zero fields decrypted. Decryption uses the key version
    /// tagged on each envelope, so records sealed before a rotation still
    /// open as long as that version's material remains retrievable.
    pub async fn unprotect(
        &self,
        protected: &Record,
        policy: &PolicySnapshot,
        caller: &CallerIdentity,
    ) -> Result<Record> {
        let mut envelopes = Vec::new();
        collect_envelopes(protected, "", &mut envelopes)?;

        // Authorization gate over every field before touching any key
        for (path, envelope) in &envelopes {
            let rule = policy.rule_for(envelope.class)?;
            if !caller.has_any_role(&rule.authorized_roles) {
                self.audit.emit(AuditEvent::new(
                    path.as_str(),
                    envelope.class,
                    AuditAction::Unprotect,
                    caller.id.as_str(),
                    AuditOutcome::Denied,
                ));
                return Err(ProtectError::Authorization {
                    field: path.clone(),
                    caller: caller.id.clone(),
                });
            }
        }

        let mut open_keys: HashMap<(String, u32), KeyMaterial> = HashMap::new();
        for (path, envelope) in &envelopes {
            let slot = (envelope.key_ref.clone(), envelope.key_version);
            if open_keys.contains_key(&slot) {
                continue;
            }
            match self
                .timed(
                    &envelope.key_ref,
                    self.keys.get_key(&envelope.key_ref, envelope.key_version),
                )
                .await
            {
                Ok(material) => {
                    open_keys.insert(slot, material);
                }
                Err(e) => {
                    self.audit.emit(AuditEvent::new(
                        path.as_str(),
                        envelope.class,
                        AuditAction::Unprotect,
                        caller.id.as_str(),
                        AuditOutcome::Failed,
                    ));
                    return Err(e);
                }
            }
        }

        let mut events = Vec::with_capacity(envelopes.len());
        let opened = self.open_walk(protected, "", &open_keys, caller, &mut events)?;
        for event in events {
            self.audit.emit(event);
        }
        Ok(opened)
    }

    fn seal_walk(
        &self,
        record: &Record,
        prefix: &str,
        classification: &Classification,
        seal_keys: &HashMap<SensitivityClass, SealKey>,
        caller: &CallerIdentity,
        events: &mut Vec<AuditEvent>,
    ) -> Result<Record> {
        let mut out = Record::new();
        for (name, value) in record {
            let path = join_path(prefix, name);
            let class = classification.class_for(&path);
            if class.is_sensitive() {
                let seal_key = seal_keys
                    .get(&class)
                    .ok_or(ProtectError::UnknownClass(class))?;
                match self.seal_field(class, seal_key, value) {
                    Ok(envelope) => {
                        out.insert(name.clone(), envelope);
                        events.push(AuditEvent::new(
                            path.as_str(),
                            class,
                            AuditAction::Protect,
                            caller.id.as_str(),
                            AuditOutcome::Success,
                        ));
                    }
                    Err(e) => {
                        self.audit.emit(AuditEvent::new(
                            path.as_str(),
                            class,
                            AuditAction::Protect,
                            caller.id.as_str(),
                            AuditOutcome::Failed,
                        ));
                        return Err(e);
                    }
                }
            } else if let Value::Object(nested) = value {
                let sealed =
                    self.seal_walk(nested, &path, classification, seal_keys, caller, events)?;
                out.insert(name.clone(), Value::Object(sealed));
            } else {
                out.insert(name.clone(), value.clone());
            }
        }
        Ok(out)
    }

    fn seal_field(
        &self,
        class: SensitivityClass,
        seal_key: &SealKey,
        value: &Value,
    ) -> Result<Value> {
        let plaintext = serde_json::to_vec(value)?;
        let cipher = self.ciphers.get(seal_key.rule.algorithm)?;
        let mode = if seal_key.rule.deterministic {
            NonceMode::Deterministic
        } else {
            NonceMode::Random
        };
        let sealed = cipher.seal(&seal_key.material, &plaintext, mode)?;
        let field = ProtectedField::new(
            class,
            seal_key.rule.algorithm,
            &seal_key.rule.key_ref,
            seal_key.version,
            sealed,
        );
        Ok(serde_json::to_value(field)?)
    }

    fn open_walk(
        &self,
        record: &Record,
        prefix: &str,
        open_keys: &HashMap<(String, u32), KeyMaterial>,
        caller: &CallerIdentity,
        events: &mut Vec<AuditEvent>,
    ) -> Result<Record> {
        let mut out = Record::new();
        for (name, value) in record {
            let path = join_path(prefix, name);
            if ProtectedField::is_protected(value) {
                let envelope = ProtectedField::parse(value)?;
                let material = open_keys
                    .get(&(envelope.key_ref.clone(), envelope.key_version))
                    .ok_or_else(|| ProtectError::UnknownKeyVersion {
                        key_ref: envelope.key_ref.clone(),
                        version: envelope.key_version,
                    })?;
                match self.open_field(&envelope, material) {
                    Ok(plain) => {
                        out.insert(name.clone(), plain);
                        events.push(AuditEvent::new(
                            path.as_str(),
                            envelope.class,
                            AuditAction::Unprotect,
                            caller.id.as_str(),
                            AuditOutcome::Success,
                        ));
                    }
                    Err(e) => {
                        self.audit.emit(AuditEvent::new(
                            path.as_str(),
                            envelope.class,
                            AuditAction::Unprotect,
                            caller.id.as_str(),
                            AuditOutcome::Failed,
                        ));
                        return Err(e);
                    }
                }
            } else if let Value::Object(nested) = value {
                let opened = self.open_walk(nested, &path, open_keys, caller, events)?;
                out.insert(name.clone(), Value::Object(opened));
            } else {
                out.insert(name.clone(), value.clone());
            }
        }
        Ok(out)
    }

    fn open_field(&self, envelope: &ProtectedField, material: &KeyMaterial) -> Result<Value> {
        let cipher = self.ciphers.get(envelope.algorithm)?;
        let plaintext = cipher.open(
            material,
            &envelope.nonce_bytes()?,
            &envelope.ciphertext_bytes()?,
        )?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| ProtectError::Encoding(format!("Decrypted field is not valid JSON: {}", e)))
    }

    async fn timed<T>(
        &self,
        key_ref: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.key_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProtectError::Timeout(format!(
                "Key store lookup for '{}' timed out after {:?}",
                key_ref, self.key_timeout
            ))),
        }
    }
}

/// Collect every protection envelope in a record, depth first
fn collect_envelopes(
    record: &Record,
    prefix: &str,
    out: &mut Vec<(String, ProtectedField)>,
) -> Result<()> {
    for (name, value) in record {
        let path = join_path(prefix, name);
        if ProtectedField::is_protected(value) {
            out.push((path, ProtectedField::parse(value)?));
        } else if let Value::Object(nested) = value {
            collect_envelopes(nested, &path, out)?;
        }
    }
    Ok(())
}
