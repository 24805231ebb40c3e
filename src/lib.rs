//! # fieldgate
//!
//! Policy-driven field-level protection codec for message-queue payloads.
//!
//! ## Overview
//!
//! `fieldgate` sits at the serialization boundary of a message queue and
//! protects sensitive fields in structured records: outbound records are
//! classified against configured patterns and sensitive fields are
//! envelope-encrypted per class; inbound records are decrypted only for
//! callers whose roles the class's rule authorizes. Key versions are
//! tagged on every envelope, so rotation never breaks old messages.
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldgate::policy::{
//!     ClassificationRule, MemoryPolicySource, PolicyDocument, PolicyStore, ProtectionRule,
//! };
//! use fieldgate::{
//!     Algorithm, CallerIdentity, MemoryKeyStore, ProtectionCodec, ProtectionPipeline,
//!     Record, SensitivityClass,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> fieldgate::Result<()> {
//! // Classify 10-12 digit values as account numbers and protect them
//! let doc = PolicyDocument {
//!     rules: vec![ClassificationRule {
//!         name: "account-number".to_string(),
//!         field_pattern: None,
//!         value_pattern: Some(r"^\d{10,12}$".to_string()),
//!         class: SensitivityClass::PiiAccount,
//!         priority: 0,
//!     }],
//!     protections: vec![ProtectionRule {
//!         class: SensitivityClass::PiiAccount,
//!         algorithm: Algorithm::Aes256Gcm,
//!         key_ref: "accounts".to_string(),
//!         authorized_roles: vec!["payments".to_string()],
//!         deterministic: false,
//!     }],
//! };
//! let policy = Arc::new(PolicyStore::load(MemoryPolicySource::new(doc)).await?);
//!
//! let keys = Arc::new(MemoryKeyStore::new());
//! keys.add_version("accounts", 1, &[0x42; 32])?;
//!
//! let pipeline = ProtectionPipeline::new(
//!     Arc::clone(&policy),
//!     ProtectionCodec::new(keys),
//!     CallerIdentity::new("order-service", Vec::<&str>::new()),
//! );
//!
//! let record: Record =
//!     serde_json::from_str(r#"{"accountNumber": "1234567890", "note": "hello"}"#)?;
//! let bytes = pipeline.on_send(&record).await?;
//!
//! let consumer = CallerIdentity::new("billing", ["payments"]);
//! let received = pipeline.on_receive(&bytes, &consumer).await?;
//! assert_eq!(received, record);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **PolicyStore** — classification patterns and protection rules,
//!   compiled into immutable snapshots with atomic hot reload
//! - **Classifier** — deterministic first-match field tagging over one
//!   snapshot
//! - **ProtectionCodec** — seals and opens fields through pluggable
//!   `FieldCipher` algorithms and a `KeyStore` seam, all-or-nothing per
//!   record
//! - **ProtectionPipeline** — the `on_send`/`on_receive` boundary the
//!   transport layer calls
//! - **AuditSink** — best-effort per-field audit trail

pub mod audit;
pub mod classify;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod pipeline;
pub mod policy;
pub mod types;

// Re-export core types
pub use audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use classify::{Classification, Classifier};
pub use codec::ProtectionCodec;
pub use crypto::{
    Aes256GcmCipher, Algorithm, CipherRegistry, FieldCipher, NonceMode, ProtectedField, Sealed,
};
pub use error::{ProtectError, Result};
pub use keystore::{KeyMaterial, KeyStore, MemoryKeyStore};
pub use pipeline::ProtectionPipeline;
pub use policy::{
    ClassificationRule, FilePolicySource, MemoryPolicySource, PolicyDocument, PolicySnapshot,
    PolicySource, PolicyStore, ProtectionRule,
};
pub use types::{CallerIdentity, Record, SensitivityClass};
