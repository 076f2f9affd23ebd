//! End-to-end tests of the key service: the full lifecycle from
//! startup through encryption, exhaustion-driven rotation, revocation,
//! and audit export.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use qkes::generator::KeyGenerator;
use qkes::prelude::*;
use qkes::{CryptoError, DilithiumVariant, KemProvider, KyberKem, KyberVariant};

fn test_config(max_key_uses: u64) -> QuantumSafeConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    QuantumSafeConfig {
        // The smallest variant keeps keygen fast in tests
        algorithm: "CRYSTALS-Kyber512".to_string(),
        max_key_uses,
        rotation_backoff_base_ms: 20,
        ..Default::default()
    }
}

#[tokio::test]
async fn round_trip_various_sizes() {
    let service = KeyService::start(test_config(1000)).await.unwrap();

    for size in [0usize, 1, 1024, 1024 * 1024] {
        let payload = vec![0xC3u8; size];
        let envelope = service.encrypt(&payload, None).await.unwrap();
        let plaintext = service.decrypt(&envelope).await.unwrap();
        assert_eq!(plaintext, payload, "round trip failed for {} bytes", size);
    }

    service.shutdown().await;
}

// Scenario: ten encrypt calls against a fresh service all use one key.
#[tokio::test]
async fn ten_encrypts_use_one_key() {
    let service = KeyService::start(test_config(1000)).await.unwrap();

    let mut key_ids = Vec::new();
    for _ in 0..10 {
        key_ids.push(service.encrypt(b"payload", None).await.unwrap().key_id);
    }
    key_ids.dedup();
    assert_eq!(key_ids.len(), 1);
    assert_eq!(service.active_key_id().unwrap(), key_ids[0]);
    assert_eq!(service.metrics().encryption_ops, 10);

    service.shutdown().await;
}

// Scenario: spending the use budget rotates transparently; the audit
// log shows a KeyRotated entry between the encryptions.
#[tokio::test]
async fn exhaustion_rotates_to_new_key() {
    let service = KeyService::start(test_config(5)).await.unwrap();

    let mut envelopes = Vec::new();
    for _ in 0..5 {
        envelopes.push(service.encrypt(b"payload", None).await.unwrap());
    }
    let first_key = envelopes[0].key_id.clone();
    assert!(envelopes.iter().all(|e| e.key_id == first_key));

    // Sixth call succeeds against a new key
    let sixth = service.encrypt(b"payload", None).await.unwrap();
    assert_ne!(sixth.key_id, first_key);
    assert_eq!(service.metrics().key_rotations, 1);

    // Envelopes under the old key still decrypt during its grace period
    for envelope in &envelopes {
        assert!(service.decrypt(envelope).await.is_ok());
    }

    service.audit_flush().await.unwrap();
    let rotated = service
        .audit_query(AuditFilter::default())
        .filter_map(Result::ok)
        .filter(|e| e.operation == AuditOperation::KeyRotated)
        .count();
    assert_eq!(rotated, 1);

    service.shutdown().await;
}

// Scenario: a revoked key can no longer decrypt its envelopes.
#[tokio::test]
async fn revoked_key_cannot_decrypt() {
    let service = KeyService::start(test_config(1000)).await.unwrap();

    let envelope = service.encrypt(b"payload", None).await.unwrap();
    service.revoke(&envelope.key_id).await.unwrap();

    assert!(matches!(
        service.decrypt(&envelope).await,
        Err(CryptoError::KeyRevoked { .. })
    ));
    // Revocation is idempotent
    service.revoke(&envelope.key_id).await.unwrap();

    service.shutdown().await;
}

// Scenario: an oversized payload is rejected before any key is touched.
#[tokio::test]
async fn oversized_payload_rejected() {
    let service = KeyService::start(test_config(1000)).await.unwrap();
    let key_before = service.active_key_id().unwrap();

    let payload = vec![0u8; MAX_PAYLOAD_BYTES + 1];
    assert!(matches!(
        service.encrypt(&payload, None).await,
        Err(CryptoError::PayloadTooLarge { .. })
    ));

    assert_eq!(service.active_key_id().unwrap(), key_before);
    assert_eq!(service.metrics().encryption_ops, 0);
    assert_eq!(service.metrics().error_count, 1);

    service.shutdown().await;
}

/// Provider that succeeds until armed, then fails the next N keypair
/// generations. Used to drive the rotation-retry scenario end to end.
struct ArmableKem {
    inner: KyberKem,
    failures_left: AtomicU32,
}

impl ArmableKem {
    fn new() -> Self {
        Self {
            inner: KyberKem::new(),
            failures_left: AtomicU32::new(0),
        }
    }

    fn arm(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }
}

impl KemProvider for ArmableKem {
    fn generate_keypair(&self, variant: KyberVariant) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let armed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            });
        if armed.is_ok() {
            return Err(CryptoError::key_generation(
                "kyber_keypair",
                "injected primitive failure",
            ));
        }
        self.inner.generate_keypair(variant)
    }

    fn encapsulate(
        &self,
        variant: KyberVariant,
        public_key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        self.inner.encapsulate(variant, public_key)
    }

    fn decapsulate(
        &self,
        variant: KyberVariant,
        secret_key: &[u8],
        kem_ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.inner.decapsulate(variant, secret_key, kem_ciphertext)
    }

    fn probe(&self, variant: KyberVariant) -> Result<(), CryptoError> {
        self.inner.probe(variant)
    }
}

// Scenario: generation fails three times during a forced rotation. The
// scheduler logs three OperationFailed entries with increasing backoff
// delays and leaves the expiring key serving requests.
#[tokio::test]
async fn failed_rotation_keeps_serving_old_key() {
    let provider = Arc::new(ArmableKem::new());
    let generator = KeyGenerator::with_provider(provider.clone());
    let service = KeyService::start_with_generator(test_config(1000), generator)
        .await
        .unwrap();

    let old_key = service.active_key_id().unwrap();
    provider.arm(3);

    let started = Instant::now();
    let result = service.rotate_now().await;
    let elapsed = started.elapsed();

    match result {
        Err(CryptoError::RotationFailed { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected RotationFailed, got {:?}", other),
    }
    // Backoff delays of 1x, 2x and 4x the 20ms base were observed
    assert!(elapsed >= Duration::from_millis(140), "elapsed {:?}", elapsed);

    // The expiring key keeps serving
    assert_eq!(service.active_key_id().unwrap(), old_key);
    let envelope = service.encrypt(b"still serving", None).await.unwrap();
    assert_eq!(envelope.key_id, old_key);

    service.audit_flush().await.unwrap();
    let failures = service
        .audit_query(AuditFilter::for_key(&old_key))
        .filter_map(Result::ok)
        .filter(|e| e.operation == AuditOperation::OperationFailed)
        .count();
    assert_eq!(failures, 3);

    // Once the primitive recovers, rotation succeeds
    let new_key = service.rotate_now().await.unwrap();
    assert_ne!(new_key, old_key);

    service.shutdown().await;
}

#[tokio::test]
async fn tampered_envelope_is_a_security_event() {
    let service = KeyService::start(test_config(1000)).await.unwrap();

    let envelope = service.encrypt(b"payload", None).await.unwrap();
    let mut tampered = envelope.clone();
    tampered.ciphertext[0] ^= 0xFF;

    let err = service.decrypt(&tampered).await.unwrap_err();
    assert!(matches!(err, CryptoError::IntegrityVerification { .. }));
    assert!(err.is_security_event());

    service.shutdown().await;
}

// Every operation leaves an audit entry: for N encrypts, M decrypts
// and R rotations the log holds at least N + M + R entries.
#[tokio::test]
async fn audit_totals_cover_all_operations() {
    let service = KeyService::start(test_config(1000)).await.unwrap();

    let n = 4;
    let m = 2;
    let r = 1;

    let mut envelopes = Vec::new();
    for _ in 0..n {
        envelopes.push(service.encrypt(b"payload", None).await.unwrap());
    }
    for envelope in envelopes.iter().take(m) {
        service.decrypt(envelope).await.unwrap();
    }
    service.rotate_now().await.unwrap();

    service.audit_flush().await.unwrap();
    let total = service.audit_query(AuditFilter::default()).count();
    assert!(total >= n + m + r, "expected at least {} entries, got {}", n + m + r, total);

    service.shutdown().await;
}

#[tokio::test]
async fn audit_entries_are_signed() {
    let service = KeyService::start(test_config(1000)).await.unwrap();
    service.encrypt(b"payload", None).await.unwrap();
    service.audit_flush().await.unwrap();

    let entries: Vec<_> = service
        .audit_query(AuditFilter::default())
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(!entries.is_empty());
    for entry in &entries {
        assert!(entry
            .verify_signature(DilithiumVariant::Dilithium3, service.audit_public_key())
            .unwrap());
    }

    service.shutdown().await;
}

#[tokio::test]
async fn health_reports_fresh_key() {
    let service = KeyService::start(test_config(1000)).await.unwrap();

    let health = service.health();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.last_rotation.is_some());
    assert!(health.active_key_age.unwrap() < Duration::from_secs(60));

    service.shutdown().await;
}

#[tokio::test]
async fn invalid_configuration_fails_startup() {
    let config = QuantumSafeConfig {
        max_key_uses: 0,
        ..test_config(0)
    };
    assert!(matches!(
        KeyService::start(config).await,
        Err(CryptoError::Configuration { .. })
    ));

    let config = QuantumSafeConfig {
        algorithm: "ROT13".to_string(),
        ..test_config(1000)
    };
    assert!(matches!(
        KeyService::start(config).await,
        Err(CryptoError::Configuration { .. })
    ));
}

// Audit entries survive a restart; envelopes do not decrypt across
// restarts because private keys live only in process memory.
#[tokio::test]
async fn restart_is_a_cold_start_with_durable_audit() {
    let dir = tempfile::tempdir().unwrap();
    let config = QuantumSafeConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..test_config(1000)
    };

    let envelope = {
        let service = KeyService::start(config.clone()).await.unwrap();
        let envelope = service.encrypt(b"payload", None).await.unwrap();
        service.audit_flush().await.unwrap();
        service.shutdown().await;
        envelope
    };

    let service = KeyService::start(config).await.unwrap();

    // Old envelope is not decryptable after restart
    assert!(matches!(
        service.decrypt(&envelope).await,
        Err(CryptoError::KeyNotFound { .. })
    ));

    // But the first run's audit trail is still queryable
    service.audit_flush().await.unwrap();
    let old_entries = service
        .audit_query(AuditFilter::for_key(&envelope.key_id))
        .filter_map(Result::ok)
        .count();
    assert!(old_entries >= 2, "expected KeyGenerated + Encrypted, got {}", old_entries);

    service.shutdown().await;
}

#[tokio::test]
async fn classical_fallback_algorithm_works_end_to_end() {
    let config = QuantumSafeConfig {
        algorithm: "AES-256-GCM".to_string(),
        ..test_config(1000)
    };
    let service = KeyService::start(config).await.unwrap();

    let envelope = service.encrypt(b"payload", None).await.unwrap();
    assert!(envelope.kem_ciphertext.is_empty());
    assert_eq!(envelope.algorithm, KeyAlgorithm::Aes256Gcm);
    assert_eq!(service.decrypt(&envelope).await.unwrap(), b"payload");

    service.shutdown().await;
}
