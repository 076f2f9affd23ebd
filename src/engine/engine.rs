use chrono::Utc;
use hkdf::Hkdf;
use sha2::Sha256;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::audit::{AuditEntry, AuditLogger, AuditOperation};
use crate::engine::envelope::{EncryptionEnvelope, ENVELOPE_VERSION};
use crate::error::{CryptoError, CryptoResult};
use crate::fallback::{AesGcmCipher, TAG_SIZE};
use crate::kem::KemProvider;
use crate::keystore::{KeyAlgorithm, KeyRecord, KeyStatus, KeyStore};
use crate::metrics::Metrics;
use crate::rotation::SchedulerHandle;

/// Maximum accepted payload size: 10 MB. Checked before any key or
/// store state is touched.
pub const MAX_PAYLOAD_BYTES: usize = 10_485_760;

const ENVELOPE_KDF_INFO: &[u8] = b"qkes-envelope-v1";

/// Builds and opens encryption envelopes.
///
/// The engine is the only component callers use for data operations.
/// It resolves keys through the store, never mutates key state except
/// through the store's API, and leaves exactly one audit entry per
/// operation (`Encrypted`/`Decrypted` on success, `OperationFailed`
/// otherwise).
pub struct EncryptionEngine {
    store: Arc<KeyStore>,
    kem: Arc<dyn KemProvider>,
    scheduler: SchedulerHandle,
    audit: Arc<AuditLogger>,
    metrics: Metrics,
    default_algorithm: KeyAlgorithm,
}

impl EncryptionEngine {
    pub fn new(
        store: Arc<KeyStore>,
        kem: Arc<dyn KemProvider>,
        scheduler: SchedulerHandle,
        audit: Arc<AuditLogger>,
        metrics: Metrics,
        default_algorithm: KeyAlgorithm,
    ) -> Self {
        Self {
            store,
            kem,
            scheduler,
            audit,
            metrics,
            default_algorithm,
        }
    }

    /// Encrypt a payload into an envelope.
    ///
    /// Uses the current active key for the default algorithm, or the
    /// named key when `key_id` is given (which must be Active; retired
    /// and revoked keys never encrypt new payloads).
    ///
    /// The payload size limit is enforced before any key is touched.
    /// If the use-count increment loses the race to exhaustion, the
    /// just-produced envelope is discarded and the engine retries
    /// exactly once against the newly rotated key.
    pub async fn encrypt(
        &self,
        payload: &[u8],
        key_id: Option<&str>,
    ) -> CryptoResult<EncryptionEnvelope> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            let err = CryptoError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_BYTES,
            };
            return self.fail(key_id.unwrap_or_default(), err).await;
        }

        let record = match self.resolve_encrypt_key(key_id) {
            Ok(record) => record,
            Err(e) => return self.fail(key_id.unwrap_or_default(), e).await,
        };

        let envelope = match self.seal(&record, payload) {
            Ok(envelope) => envelope,
            Err(e) => return self.fail(&record.key_id, e).await,
        };

        match self.store.increment_use(&record.key_id) {
            Ok(_) => self.finish_encrypt(record.algorithm, envelope).await,
            Err(CryptoError::KeyExhausted { .. }) if key_id.is_none() => {
                // Race lost: another request spent the last use between
                // our key resolution and the increment. The envelope is
                // discarded; rotate and retry once against the new key.
                drop(envelope);
                self.retry_encrypt_after_exhaustion(&record, payload).await
            }
            Err(e) => self.fail(&record.key_id, e).await,
        }
    }

    async fn retry_encrypt_after_exhaustion(
        &self,
        exhausted: &KeyRecord,
        payload: &[u8],
    ) -> CryptoResult<EncryptionEnvelope> {
        if let Err(e) = self.scheduler.rotate_if_due(exhausted.algorithm).await {
            return self.fail(&exhausted.key_id, e).await;
        }

        let fresh = match self.store.get_active_key(exhausted.algorithm) {
            Ok(record) => record,
            Err(e) => return self.fail(&exhausted.key_id, e).await,
        };
        let envelope = match self.seal(&fresh, payload) {
            Ok(envelope) => envelope,
            Err(e) => return self.fail(&fresh.key_id, e).await,
        };
        match self.store.increment_use(&fresh.key_id) {
            Ok(_) => self.finish_encrypt(fresh.algorithm, envelope).await,
            Err(e) => self.fail(&fresh.key_id, e).await,
        }
    }

    async fn finish_encrypt(
        &self,
        algorithm: KeyAlgorithm,
        envelope: EncryptionEnvelope,
    ) -> CryptoResult<EncryptionEnvelope> {
        // Let the scheduler observe the use-count advance immediately
        // rather than waiting for its next tick.
        self.scheduler.notify_usage(algorithm);
        self.audit
            .record(AuditEntry::success(
                AuditOperation::Encrypted,
                &envelope.key_id,
            ))
            .await;
        self.metrics.record_encryption();
        Ok(envelope)
    }

    /// Open an envelope.
    ///
    /// Succeeds for Active keys and for Retiring keys inside their
    /// grace period. Never mutates the key's use count: the budget
    /// tracks encryption cost, not decryption.
    pub async fn decrypt(&self, envelope: &EncryptionEnvelope) -> CryptoResult<Vec<u8>> {
        let record = match self.store.key_for_decrypt(&envelope.key_id) {
            Ok(record) => record,
            Err(e) => return self.fail(&envelope.key_id, e).await,
        };

        match self.open(&record, envelope) {
            Ok(plaintext) => {
                self.audit
                    .record(AuditEntry::success(
                        AuditOperation::Decrypted,
                        &envelope.key_id,
                    ))
                    .await;
                self.metrics.record_decryption();
                Ok(plaintext)
            }
            Err(e) => self.fail(&envelope.key_id, e).await,
        }
    }

    fn resolve_encrypt_key(&self, key_id: Option<&str>) -> CryptoResult<KeyRecord> {
        match key_id {
            Some(id) => {
                let record = self.store.get_key(id)?;
                if record.status != KeyStatus::Active {
                    return Err(CryptoError::KeyRevoked {
                        key_id: id.to_string(),
                    });
                }
                Ok(record)
            }
            None => self.store.get_active_key(self.default_algorithm),
        }
    }

    /// Assemble an envelope: encapsulate (KEM path), derive the AEAD
    /// key, encrypt under a fresh nonce with the key id as associated
    /// data, and detach the tag. Pure with respect to key state.
    fn seal(&self, record: &KeyRecord, payload: &[u8]) -> CryptoResult<EncryptionEnvelope> {
        let nonce = AesGcmCipher::generate_nonce();

        let (kem_ciphertext, cipher) = match record.algorithm {
            KeyAlgorithm::Kyber(variant) => {
                let (kem_ciphertext, shared) =
                    self.kem.encapsulate(variant, &record.public_key)?;
                let shared = Zeroizing::new(shared);
                let key = derive_envelope_key(&shared, &record.key_id)?;
                (kem_ciphertext, AesGcmCipher::new(&key[..])?)
            }
            KeyAlgorithm::Aes256Gcm => {
                // Classical fallback: the sealed record secret is the
                // AEAD key itself, no encapsulation step.
                (Vec::new(), AesGcmCipher::new(record.private_key.expose())?)
            }
        };

        let mut sealed = cipher.encrypt(payload, &nonce, Some(record.key_id.as_bytes()))?;
        let auth_tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(EncryptionEnvelope {
            version: ENVELOPE_VERSION,
            key_id: record.key_id.clone(),
            kem_ciphertext,
            nonce,
            ciphertext: sealed,
            auth_tag,
            algorithm: record.algorithm,
            created_at: Utc::now(),
        })
    }

    /// Mirror of `seal`. Any mismatch or verification failure is
    /// treated as tamper evidence, not a retryable condition.
    fn open(&self, record: &KeyRecord, envelope: &EncryptionEnvelope) -> CryptoResult<Vec<u8>> {
        let integrity_failure = || CryptoError::IntegrityVerification {
            key_id: envelope.key_id.clone(),
        };

        if envelope.version != ENVELOPE_VERSION
            || envelope.algorithm != record.algorithm
            || envelope.auth_tag.len() != TAG_SIZE
        {
            return Err(integrity_failure());
        }

        let cipher = match record.algorithm {
            KeyAlgorithm::Kyber(variant) => {
                let shared = Zeroizing::new(
                    self.kem
                        .decapsulate(
                            variant,
                            record.private_key.expose(),
                            &envelope.kem_ciphertext,
                        )
                        .map_err(|_| integrity_failure())?,
                );
                let key = derive_envelope_key(&shared, &record.key_id)?;
                AesGcmCipher::new(&key[..])?
            }
            KeyAlgorithm::Aes256Gcm => AesGcmCipher::new(record.private_key.expose())?,
        };

        let mut data = Vec::with_capacity(envelope.ciphertext.len() + TAG_SIZE);
        data.extend_from_slice(&envelope.ciphertext);
        data.extend_from_slice(&envelope.auth_tag);

        cipher
            .decrypt(&data, &envelope.nonce, Some(envelope.key_id.as_bytes()))
            .map_err(|_| integrity_failure())
    }

    async fn fail<T>(&self, key_id: &str, error: CryptoError) -> CryptoResult<T> {
        if error.is_security_event() {
            log::error!("security event during envelope operation: {}", error);
        }
        self.metrics.record_error();
        self.audit.record(AuditEntry::failure(key_id, &error)).await;
        Err(error)
    }
}

/// Derive the per-envelope AEAD key from a KEM shared secret, binding
/// the key id and envelope version into the KDF info
fn derive_envelope_key(
    shared_secret: &[u8],
    key_id: &str,
) -> CryptoResult<Zeroizing<[u8; 32]>> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut info = Vec::with_capacity(ENVELOPE_KDF_INFO.len() + key_id.len());
    info.extend_from_slice(ENVELOPE_KDF_INFO);
    info.extend_from_slice(key_id.as_bytes());

    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(&info, &mut key[..])
        .map_err(|e| CryptoError::aead("derive_envelope_key", e))?;
    Ok(key)
}
