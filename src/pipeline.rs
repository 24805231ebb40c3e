//! Message-queue boundary adapter
//!
//! `ProtectionPipeline` is the surface the surrounding transport layer
//! talks to: `on_send` turns an outbound record into protected wire bytes,
//! `on_receive` turns inbound bytes back into a clear record under the
//! caller's authorization. The transport owns retry and dead-letter
//! policy; this layer only accepts or rejects whole records.

use crate::classify::Classifier;
use crate::codec::ProtectionCodec;
use crate::error::{ProtectError, Result};
use crate::policy::PolicyStore;
use crate::types::{CallerIdentity, Record};
use std::sync::Arc;
use std::time::Duration;

/// Classify-protect-encode on send, decode-unprotect on receive
///
/// Each call takes one policy snapshot up front, so classification and
/// protection within a call always see the same rules even when a reload
/// lands mid-call.
pub struct ProtectionPipeline {
    policy: Arc<PolicyStore>,
    codec: ProtectionCodec,
    identity: CallerIdentity,
}

impl ProtectionPipeline {
    /// Create a pipeline
    ///
    /// `identity` is the local party (the producer side) recorded on audit
    /// events emitted by the send path.
    pub fn new(policy: Arc<PolicyStore>, codec: ProtectionCodec, identity: CallerIdentity) -> Self {
        Self {
            policy,
            codec,
            identity,
        }
    }

    /// Classify and protect an outbound record, returning wire bytes
    pub async fn on_send(&self, record: &Record) -> Result<Vec<u8>> {
        let snapshot = self.policy.snapshot();
        let classification = Classifier::new(Arc::clone(&snapshot)).classify(record);
        let protected = self
            .codec
            .protect(record, &classification, &snapshot, &self.identity)
            .await?;
        Ok(serde_json::to_vec(&protected)?)
    }

    /// Decode and unprotect inbound wire bytes
    ///
    /// The transport supplies the consumer's identity and roles. Malformed
    /// bytes surface as `Encoding` for the transport's dead-letter path.
    pub async fn on_receive(&self, bytes: &[u8], caller: &CallerIdentity) -> Result<Record> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtectError::Encoding(format!("Malformed wire bytes: {}", e)))?;
        let serde_json::Value::Object(record) = value else {
            return Err(ProtectError::Encoding(
                "Wire payload is not a JSON object".to_string(),
            ));
        };

        let snapshot = self.policy.snapshot();
        self.codec.unprotect(&record, &snapshot, caller).await
    }

    /// Reload the policy from its source
    pub async fn reload_policy(&self) -> Result<()> {
        self.policy.reload().await
    }

    /// Reload the policy with a bound on the source fetch
    pub async fn reload_policy_with_timeout(&self, timeout: Duration) -> Result<()> {
        self.policy.reload_with_timeout(timeout).await
    }

    /// The underlying policy store
    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }
}
