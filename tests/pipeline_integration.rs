//! Pipeline integration tests
//!
//! End-to-end tests exercising the full protect/unprotect lifecycle
//! through the boundary adapter. Covers round trips, authorization
//! gating, key rotation, policy reload atomicity, wire encoding
//! failures, audit, and concurrency.

use fieldgate::policy::{
    ClassificationRule, MemoryPolicySource, PolicyDocument, PolicyStore, ProtectionRule,
};
use fieldgate::{
    Aes256GcmCipher, Algorithm, AuditAction, AuditOutcome, AuditSink, CallerIdentity, FieldCipher,
    KeyMaterial, MemoryAuditSink, MemoryKeyStore, NonceMode, ProtectError, ProtectedField,
    ProtectionCodec, ProtectionPipeline, Record, SensitivityClass,
};
use std::sync::Arc;

fn policy_doc() -> PolicyDocument {
    PolicyDocument {
        rules: vec![
            ClassificationRule {
                name: "account-number".to_string(),
                field_pattern: None,
                value_pattern: Some(r"^\d{10,12}$".to_string()),
                class: SensitivityClass::PiiAccount,
                priority: 0,
            },
            ClassificationRule {
                name: "ssn".to_string(),
                field_pattern: Some(r"(^|\.)ssn$".to_string()),
                value_pattern: None,
                class: SensitivityClass::PiiSsn,
                priority: 10,
            },
        ],
        protections: vec![
            ProtectionRule {
                class: SensitivityClass::PiiAccount,
                algorithm: Algorithm::Aes256Gcm,
                key_ref: "accounts".to_string(),
                authorized_roles: vec!["payments".to_string()],
                deterministic: false,
            },
            ProtectionRule {
                class: SensitivityClass::PiiSsn,
                algorithm: Algorithm::Aes256Gcm,
                key_ref: "identity".to_string(),
                authorized_roles: vec!["compliance".to_string()],
                deterministic: false,
            },
        ],
    }
}

struct Harness {
    pipeline: ProtectionPipeline,
    source: Arc<MemoryPolicySource>,
    keys: Arc<MemoryKeyStore>,
    audit: Arc<MemoryAuditSink>,
}

async fn harness() -> Harness {
    let source = Arc::new(MemoryPolicySource::new(policy_doc()));
    let policy = Arc::new(PolicyStore::load(Arc::clone(&source)).await.unwrap());

    let keys = Arc::new(MemoryKeyStore::new());
    keys.add_version("accounts", 1, &[0x11; 32]).unwrap();
    keys.add_version("identity", 1, &[0x22; 32]).unwrap();

    let audit = Arc::new(MemoryAuditSink::default());
    let codec = ProtectionCodec::new(Arc::clone(&keys) as Arc<dyn fieldgate::KeyStore>)
        .with_audit(Arc::clone(&audit) as Arc<dyn AuditSink>);

    let pipeline = ProtectionPipeline::new(
        policy,
        codec,
        CallerIdentity::new("order-service", Vec::<&str>::new()),
    );

    Harness {
        pipeline,
        source,
        keys,
        audit,
    }
}

fn consumer() -> CallerIdentity {
    CallerIdentity::new("billing-consumer", ["payments", "compliance"])
}

fn record(json: &str) -> Record {
    serde_json::from_str(json).unwrap()
}

// ─── Round Trip ──────────────────────────────────────────────────

#[tokio::test]
async fn test_send_receive_roundtrip() {
    let h = harness().await;
    let original = record(
        r#"{"accountNumber": "1234567890", "amount": "500.00", "note": "hello"}"#,
    );

    let bytes = h.pipeline.on_send(&original).await.unwrap();

    // The wire form carries a tagged envelope for the account, clear text
    // for the rest
    let wire: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(wire["accountNumber"]["protected"], true);
    assert_eq!(wire["accountNumber"]["class"], "PII_ACCOUNT");
    assert_eq!(wire["amount"], "500.00");
    assert_eq!(wire["note"], "hello");

    let received = h.pipeline.on_receive(&bytes, &consumer()).await.unwrap();
    assert_eq!(received, original);
}

#[tokio::test]
async fn test_nested_record_roundtrip() {
    let h = harness().await;
    let original = record(
        r#"{"customer": {"ssn": "123-45-6789", "name": "Ada",
                         "billing": {"account": "9876543210"}},
            "total": 42.0}"#,
    );

    let bytes = h.pipeline.on_send(&original).await.unwrap();
    let wire: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(wire["customer"]["ssn"]["protected"], true);
    assert_eq!(wire["customer"]["billing"]["account"]["protected"], true);
    assert_eq!(wire["customer"]["name"], "Ada");

    let received = h.pipeline.on_receive(&bytes, &consumer()).await.unwrap();
    assert_eq!(received, original);
}

#[tokio::test]
async fn test_field_order_preserved_on_wire() {
    let h = harness().await;
    let original = record(r#"{"zeta": "1234567890", "alpha": "x", "omega": "y"}"#);

    let bytes = h.pipeline.on_send(&original).await.unwrap();
    let wire: Record = serde_json::from_slice(&bytes).unwrap();
    let keys: Vec<&String> = wire.keys().collect();
    assert_eq!(keys, ["zeta", "alpha", "omega"]);
}

#[tokio::test]
async fn test_record_without_sensitive_fields_passes_through() {
    let h = harness().await;
    let original = record(r#"{"amount": "9.99", "note": "plain"}"#);

    let bytes = h.pipeline.on_send(&original).await.unwrap();
    let wire: Record = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(serde_json::Value::Object(wire), serde_json::json!({
        "amount": "9.99",
        "note": "plain"
    }));
}

// ─── Authorization ───────────────────────────────────────────────

#[tokio::test]
async fn test_missing_role_rejects_record() {
    let h = harness().await;
    let original = record(r#"{"accountNumber": "1234567890", "ssn": "123-45-6789"}"#);
    let bytes = h.pipeline.on_send(&original).await.unwrap();

    // Holds compliance but not payments
    let partial = CallerIdentity::new("partial-consumer", ["compliance"]);
    let err = h.pipeline.on_receive(&bytes, &partial).await.unwrap_err();
    assert!(matches!(err, ProtectError::Authorization { .. }));

    // All-or-nothing: no field was decrypted, only denial was audited
    let unprotect_events: Vec<_> = h
        .audit
        .list(100)
        .into_iter()
        .filter(|e| e.action == AuditAction::Unprotect)
        .collect();
    assert!(!unprotect_events.is_empty());
    assert!(unprotect_events
        .iter()
        .all(|e| e.outcome == AuditOutcome::Denied));
}

#[tokio::test]
async fn test_roleless_caller_rejected() {
    let h = harness().await;
    let bytes = h
        .pipeline
        .on_send(&record(r#"{"accountNumber": "1234567890"}"#))
        .await
        .unwrap();

    let nobody = CallerIdentity::new("anonymous", Vec::<&str>::new());
    assert!(h.pipeline.on_receive(&bytes, &nobody).await.is_err());
}

// ─── Key Rotation ────────────────────────────────────────────────

#[tokio::test]
async fn test_rotation_keeps_old_messages_readable() {
    let h = harness().await;
    let original = record(r#"{"accountNumber": "1234567890"}"#);

    let old_bytes = h.pipeline.on_send(&original).await.unwrap();

    h.keys.add_version("accounts", 2, &[0x33; 32]).unwrap();
    h.keys.rotate_to("accounts", 2).unwrap();

    let new_bytes = h.pipeline.on_send(&original).await.unwrap();
    let new_wire: serde_json::Value = serde_json::from_slice(&new_bytes).unwrap();
    assert_eq!(new_wire["accountNumber"]["keyVersion"], 2);

    // Old message still tagged v1 and still decrypts
    let old_wire: serde_json::Value = serde_json::from_slice(&old_bytes).unwrap();
    assert_eq!(old_wire["accountNumber"]["keyVersion"], 1);
    assert_eq!(
        h.pipeline.on_receive(&old_bytes, &consumer()).await.unwrap(),
        original
    );
    assert_eq!(
        h.pipeline.on_receive(&new_bytes, &consumer()).await.unwrap(),
        original
    );
}

#[tokio::test]
async fn test_destroyed_version_surfaces_unknown_key_version() {
    let h = harness().await;
    let bytes = h
        .pipeline
        .on_send(&record(r#"{"accountNumber": "1234567890"}"#))
        .await
        .unwrap();

    h.keys.add_version("accounts", 2, &[0x33; 32]).unwrap();
    h.keys.rotate_to("accounts", 2).unwrap();
    h.keys.destroy_version("accounts", 1).unwrap();

    let err = h.pipeline.on_receive(&bytes, &consumer()).await.unwrap_err();
    assert!(matches!(
        err,
        ProtectError::UnknownKeyVersion { version: 1, .. }
    ));
}

// ─── Policy Reload ───────────────────────────────────────────────

#[tokio::test]
async fn test_reload_applies_new_rules() {
    let h = harness().await;

    // Card numbers are not classified under the initial policy
    let card_record = record(r#"{"card": "4111111111111111"}"#);
    let bytes = h.pipeline.on_send(&card_record).await.unwrap();
    let wire: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(wire["card"], "4111111111111111");

    let mut updated = policy_doc();
    updated.rules.push(ClassificationRule {
        name: "card-number".to_string(),
        field_pattern: None,
        value_pattern: Some(r"^\d{16}$".to_string()),
        class: SensitivityClass::PiiCard,
        priority: 20,
    });
    updated.protections.push(ProtectionRule {
        class: SensitivityClass::PiiCard,
        algorithm: Algorithm::Aes256Gcm,
        key_ref: "cards".to_string(),
        authorized_roles: vec!["payments".to_string()],
        deterministic: false,
    });
    h.source.set(updated);
    h.keys.add_version("cards", 1, &[0x44; 32]).unwrap();
    h.pipeline.reload_policy().await.unwrap();

    let bytes = h.pipeline.on_send(&card_record).await.unwrap();
    let wire: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(wire["card"]["class"], "PII_CARD");
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_behavior() {
    let h = harness().await;
    let original = record(r#"{"accountNumber": "1234567890"}"#);

    // Broken policy: classification rule with no protection rule
    let mut broken = policy_doc();
    broken.protections.clear();
    h.source.set(broken);
    assert!(h.pipeline.reload_policy().await.is_err());

    // Behavior identical to before the failed reload
    let bytes = h.pipeline.on_send(&original).await.unwrap();
    let wire: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(wire["accountNumber"]["class"], "PII_ACCOUNT");
    assert_eq!(
        h.pipeline.on_receive(&bytes, &consumer()).await.unwrap(),
        original
    );
}

// ─── Wire Encoding ───────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_bytes_rejected() {
    let h = harness().await;
    let err = h
        .pipeline
        .on_receive(b"not json at all", &consumer())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtectError::Encoding(_)));
}

#[tokio::test]
async fn test_non_object_payload_rejected() {
    let h = harness().await;
    let err = h
        .pipeline
        .on_receive(b"[1, 2, 3]", &consumer())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtectError::Encoding(_)));
}

#[tokio::test]
async fn test_corrupt_envelope_rejected() {
    let h = harness().await;
    let bytes = h
        .pipeline
        .on_send(&record(r#"{"accountNumber": "1234567890"}"#))
        .await
        .unwrap();

    let mut wire: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    wire["accountNumber"]
        .as_object_mut()
        .unwrap()
        .remove("ciphertext");
    let corrupted = serde_json::to_vec(&wire).unwrap();

    let err = h
        .pipeline
        .on_receive(&corrupted, &consumer())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtectError::Encoding(_)));
}

#[tokio::test]
async fn test_envelope_with_unknown_class_rejected() {
    let h = harness().await;

    // Seal a field under a class the active policy has no rule for
    let key = KeyMaterial::new(vec![0x55; 32]);
    let sealed = Aes256GcmCipher
        .seal(&key, br#""4111111111111111""#, NonceMode::Random)
        .unwrap();
    let envelope = ProtectedField::new(
        SensitivityClass::PiiCard,
        Algorithm::Aes256Gcm,
        "cards",
        1,
        sealed,
    );
    let wire = serde_json::json!({ "card": serde_json::to_value(&envelope).unwrap() });
    let bytes = serde_json::to_vec(&wire).unwrap();

    let err = h.pipeline.on_receive(&bytes, &consumer()).await.unwrap_err();
    assert!(matches!(
        err,
        ProtectError::UnknownClass(SensitivityClass::PiiCard)
    ));
}

// ─── Audit ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_audit_records_both_directions() {
    let h = harness().await;
    let original = record(r#"{"accountNumber": "1234567890", "note": "x"}"#);

    let bytes = h.pipeline.on_send(&original).await.unwrap();
    h.pipeline.on_receive(&bytes, &consumer()).await.unwrap();

    let events = h.audit.list(100);
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| e.action == AuditAction::Protect
        && e.caller == "order-service"
        && e.field_path == "accountNumber"));
    assert!(events.iter().any(|e| e.action == AuditAction::Unprotect
        && e.caller == "billing-consumer"
        && e.field_path == "accountNumber"));
}

// ─── Concurrency ─────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_roundtrips() {
    let h = harness().await;
    let pipeline = Arc::new(h.pipeline);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let pipeline = Arc::clone(&pipeline);
        tasks.push(tokio::spawn(async move {
            let original = record(&format!(
                r#"{{"accountNumber": "12345678{:02}", "seq": {}}}"#,
                i, i
            ));
            let bytes = pipeline.on_send(&original).await.unwrap();
            let received = pipeline.on_receive(&bytes, &consumer()).await.unwrap();
            assert_eq!(received, original);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_reload_concurrent_with_traffic() {
    let h = harness().await;
    let pipeline = Arc::new(h.pipeline);
    let source = h.source;

    let traffic = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            for _ in 0..50 {
                let original = record(r#"{"accountNumber": "1234567890"}"#);
                let bytes = pipeline.on_send(&original).await.unwrap();
                let received = pipeline.on_receive(&bytes, &consumer()).await.unwrap();
                assert_eq!(received, original);
            }
        })
    };

    let reloader = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            for _ in 0..10 {
                source.set(policy_doc());
                pipeline.reload_policy().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    traffic.await.unwrap();
    reloader.await.unwrap();
}
