use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};
use crate::keystore::KeyAlgorithm;

/// Current envelope wire version
pub const ENVELOPE_VERSION: u8 = 1;

/// Self-describing ciphertext container returned by `encrypt`.
///
/// Carries everything `decrypt` needs to locate the key and verify the
/// payload: the key id, the KEM ciphertext (empty under the classical
/// fallback), the AEAD nonce, the detached authentication tag, and the
/// algorithm label. Envelopes are immutable once created; decryption
/// has no side effects on them.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() -> Result<(), qkes::CryptoError> {
/// use qkes::{KeyService, QuantumSafeConfig};
///
/// let service = KeyService::start(QuantumSafeConfig::default()).await?;
/// let envelope = service.encrypt(b"payload", None).await?;
///
/// // The envelope round-trips through its wire form
/// let bytes = envelope.to_bytes()?;
/// let restored = qkes::EncryptionEnvelope::from_bytes(&bytes)?;
/// assert_eq!(service.decrypt(&restored).await?, b"payload");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionEnvelope {
    pub version: u8,
    /// Id of the key that produced this envelope
    pub key_id: String,
    /// KEM-encapsulated shared secret; empty for the classical fallback
    pub kem_ciphertext: Vec<u8>,
    /// AEAD nonce, fresh per envelope
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    /// Detached 16-byte GCM authentication tag
    pub auth_tag: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    pub created_at: DateTime<Utc>,
}

impl EncryptionEnvelope {
    /// Serialize the envelope to its wire form
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Deserialize an envelope from its wire form
    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        bincode::deserialize(data).map_err(|e| CryptoError::Serialization(e.to_string()))
    }
}
