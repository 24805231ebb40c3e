//! Policy store: classification patterns and protection rules
//!
//! Loads a policy document from a pluggable source, compiles it into an
//! immutable snapshot, and hot-reloads by atomically swapping the active
//! snapshot. In-flight classify/protect calls keep the snapshot they
//! started with; a failed reload leaves the previous snapshot active.

use crate::crypto::Algorithm;
use crate::error::{ProtectError, Result};
use crate::types::SensitivityClass;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A classification pattern mapping matching fields to a sensitivity class
///
/// At least one of `field_pattern` (matched against the dotted field path)
/// and `value_pattern` (matched against the scalar's string form) must be
/// set; when both are set, both must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRule {
    /// Rule name for diagnostics
    pub name: String,

    /// Regex matched against the dotted field path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_pattern: Option<String>,

    /// Regex matched against the field's scalar value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_pattern: Option<String>,

    /// Class assigned on match
    pub class: SensitivityClass,

    /// Evaluation priority: higher runs first, declaration order breaks ties
    #[serde(default)]
    pub priority: i32,
}

/// Protection rule bound to a sensitivity class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionRule {
    /// Class this rule protects
    pub class: SensitivityClass,

    /// Cipher algorithm for fields of this class
    pub algorithm: Algorithm,

    /// Key reference resolved through the key store
    pub key_ref: String,

    /// Roles allowed to unprotect fields of this class
    #[serde(default)]
    pub authorized_roles: Vec<String>,

    /// Seal identical plaintexts to identical ciphertexts
    ///
    /// Defaults to false (randomized nonce).
    #[serde(default)]
    pub deterministic: bool,
}

/// The configuration document a policy source supplies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    /// Classification patterns
    #[serde(default)]
    pub rules: Vec<ClassificationRule>,

    /// Per-class protection rules
    #[serde(default)]
    pub protections: Vec<ProtectionRule>,
}

/// A classification rule with its patterns compiled
#[derive(Debug)]
pub(crate) struct CompiledRule {
    pub(crate) name: String,
    pub(crate) field_re: Option<Regex>,
    pub(crate) value_re: Option<Regex>,
    pub(crate) class: SensitivityClass,
}

/// An immutable, validated view of the policy
///
/// All patterns compiled, all class references checked. Classification
/// against a snapshot is total: it cannot fail on any input.
#[derive(Debug)]
pub struct PolicySnapshot {
    pub(crate) classifiers: Vec<CompiledRule>,
    rules: HashMap<SensitivityClass, ProtectionRule>,
}

impl PolicySnapshot {
    /// Compile and validate a policy document
    pub fn compile(doc: PolicyDocument) -> Result<Self> {
        let mut rules = HashMap::new();
        for protection in doc.protections {
            if protection.class == SensitivityClass::None {
                return Err(ProtectError::Config(
                    "Protection rule may not target class 'NONE'".to_string(),
                ));
            }
            let class = protection.class;
            if rules.insert(class, protection).is_some() {
                return Err(ProtectError::Config(format!(
                    "Duplicate protection rule for class '{}'",
                    class
                )));
            }
        }

        let mut indexed: Vec<(usize, ClassificationRule)> =
            doc.rules.into_iter().enumerate().collect();
        // Higher priority first; declaration order breaks ties
        indexed.sort_by_key(|(idx, rule)| (std::cmp::Reverse(rule.priority), *idx));

        let mut classifiers = Vec::with_capacity(indexed.len());
        for (_, rule) in indexed {
            if rule.field_pattern.is_none() && rule.value_pattern.is_none() {
                return Err(ProtectError::Config(format!(
                    "Classification rule '{}' must define fieldPattern or valuePattern",
                    rule.name
                )));
            }
            if rule.class.is_sensitive() && !rules.contains_key(&rule.class) {
                return Err(ProtectError::Config(format!(
                    "Classification rule '{}' references class '{}' with no protection rule",
                    rule.name, rule.class
                )));
            }

            let field_re = rule
                .field_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| {
                    ProtectError::Config(format!(
                        "Invalid field pattern for rule '{}': {}",
                        rule.name, e
                    ))
                })?;
            let value_re = rule
                .value_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| {
                    ProtectError::Config(format!(
                        "Invalid value pattern for rule '{}': {}",
                        rule.name, e
                    ))
                })?;

            classifiers.push(CompiledRule {
                name: rule.name,
                field_re,
                value_re,
                class: rule.class,
            });
        }

        Ok(Self { classifiers, rules })
    }

    /// Look up the protection rule for a class
    pub fn rule_for(&self, class: SensitivityClass) -> Result<&ProtectionRule> {
        self.rules
            .get(&class)
            .ok_or(ProtectError::UnknownClass(class))
    }

    /// Number of classification rules
    pub fn classifier_count(&self) -> usize {
        self.classifiers.len()
    }

    /// Number of protection rules
    pub fn protection_count(&self) -> usize {
        self.rules.len()
    }
}

/// Trait for policy configuration sources
///
/// A source supplies the raw policy document; the store owns compilation
/// and the active-snapshot lifecycle. Remote sources may block in `fetch`,
/// so reloads support a caller-specified timeout.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Fetch the current policy document
    async fn fetch(&self) -> Result<PolicyDocument>;
}

#[async_trait]
impl<T: PolicySource + ?Sized> PolicySource for Arc<T> {
    async fn fetch(&self) -> Result<PolicyDocument> {
        (**self).fetch().await
    }
}

/// JSON file-backed policy source
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    /// Create a source reading from the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicySource for FilePolicySource {
    async fn fetch(&self) -> Result<PolicyDocument> {
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            ProtectError::Config(format!(
                "Failed to read policy file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            ProtectError::Config(format!(
                "Failed to parse policy file {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// In-memory policy source for tests and embedded configuration
///
/// `set` replaces the document, simulating an updated remote source; the
/// change becomes visible only after the store's next reload.
#[derive(Default)]
pub struct MemoryPolicySource {
    doc: RwLock<PolicyDocument>,
}

impl MemoryPolicySource {
    /// Create a source with an initial document
    pub fn new(doc: PolicyDocument) -> Self {
        Self {
            doc: RwLock::new(doc),
        }
    }

    /// Replace the document
    pub fn set(&self, doc: PolicyDocument) {
        if let Ok(mut current) = self.doc.write() {
            *current = doc;
        }
    }
}

#[async_trait]
impl PolicySource for MemoryPolicySource {
    async fn fetch(&self) -> Result<PolicyDocument> {
        self.doc
            .read()
            .map(|doc| doc.clone())
            .map_err(|e| ProtectError::Config(format!("Failed to acquire policy lock: {}", e)))
    }
}

/// Holds the active policy snapshot and its source
///
/// Shared-read, single-writer-swap: readers clone an `Arc` to the current
/// snapshot; `reload` is the only writer and holds the lock only for the
/// pointer swap.
pub struct PolicyStore {
    source: Box<dyn PolicySource>,
    active: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyStore {
    /// Load the initial policy from a source
    ///
    /// Fatal on failure: a store is never created without a valid snapshot.
    pub async fn load(source: impl PolicySource + 'static) -> Result<Self> {
        let doc = source.fetch().await?;
        let snapshot = Arc::new(PolicySnapshot::compile(doc)?);
        tracing::info!(
            classification_rules = snapshot.classifier_count(),
            protection_rules = snapshot.protection_count(),
            "Policy loaded"
        );
        Ok(Self {
            source: Box::new(source),
            active: RwLock::new(snapshot),
        })
    }

    /// Re-fetch and atomically swap the active snapshot
    ///
    /// On any failure the previous snapshot stays active and the error is
    /// returned; the store is never left half-updated.
    pub async fn reload(&self) -> Result<()> {
        let doc = self.source.fetch().await?;
        let snapshot = Arc::new(PolicySnapshot::compile(doc)?);

        let mut active = self.active.write().map_err(|e| {
            ProtectError::Config(format!("Failed to acquire policy lock: {}", e))
        })?;
        *active = snapshot;
        tracing::info!(
            classification_rules = active.classifier_count(),
            protection_rules = active.protection_count(),
            "Policy reloaded"
        );
        Ok(())
    }

    /// Reload with a bound on how long the source fetch may take
    pub async fn reload_with_timeout(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.reload()).await {
            Ok(result) => result,
            Err(_) => Err(ProtectError::Timeout(format!(
                "Policy reload timed out after {:?}",
                timeout
            ))),
        }
    }

    /// The current snapshot
    ///
    /// Callers hold the returned `Arc` for the duration of one operation so
    /// a concurrent reload never changes rules mid-call.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        match self.active.read() {
            Ok(active) => Arc::clone(&active),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Look up the protection rule for a class in the current snapshot
    pub fn rule_for(&self, class: SensitivityClass) -> Result<ProtectionRule> {
        self.snapshot().rule_for(class).cloned()
    }
}
