use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kem::KyberVariant;
use crate::sealed::SealedKey;

/// Algorithm under which a key was generated
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// KEM-primary: CRYSTALS-Kyber key encapsulation
    Kyber(KyberVariant),
    /// Classical fallback: AES-256-GCM with a directly held symmetric key
    Aes256Gcm,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Kyber(KyberVariant::Kyber512) => write!(f, "CRYSTALS-Kyber512"),
            KeyAlgorithm::Kyber(KyberVariant::Kyber768) => write!(f, "CRYSTALS-Kyber768"),
            KeyAlgorithm::Kyber(KyberVariant::Kyber1024) => write!(f, "CRYSTALS-Kyber1024"),
            KeyAlgorithm::Aes256Gcm => write!(f, "AES-256-GCM"),
        }
    }
}

impl KeyAlgorithm {
    /// Parse a configuration algorithm name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "CRYSTALS-Kyber512" => Some(KeyAlgorithm::Kyber(KyberVariant::Kyber512)),
            "CRYSTALS-Kyber768" => Some(KeyAlgorithm::Kyber(KyberVariant::Kyber768)),
            "CRYSTALS-Kyber1024" => Some(KeyAlgorithm::Kyber(KyberVariant::Kyber1024)),
            "AES-256-GCM" => Some(KeyAlgorithm::Aes256Gcm),
            _ => None,
        }
    }
}

/// Lifecycle status of a key record
///
/// Transitions: `Active -> Retiring` (demoted by a rotation),
/// `Retiring -> Revoked` (grace period elapsed, or operator revoke),
/// `Active -> Revoked` (operator revoke). Revocation is irreversible.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyStatus {
    /// Current key for its algorithm; the only status allowed to encrypt
    Active,
    /// Demoted by rotation; may decrypt existing envelopes during the
    /// grace period but never encrypts new payloads
    Retiring,
    /// May neither encrypt nor decrypt; terminal
    Revoked,
}

/// A managed key with its material and lifecycle metadata
///
/// Private halves are held in [`SealedKey`] containers: cloning a
/// record shares rather than copies the material, and no serialization
/// path exists for it (see [`StoredKeyRecord`] for what persists).
#[derive(Clone, Debug)]
pub struct KeyRecord {
    /// Opaque identifier, format `qk_YYYY_MM_DD_<random hex>`
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    /// KEM public key; empty for the classical fallback
    pub public_key: Vec<u8>,
    pub(crate) private_key: SealedKey,
    /// Companion Dilithium signing public key
    pub signing_public_key: Vec<u8>,
    /// Companion signing secret, sealed like the private key
    pub signing_private_key: SealedKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set when the record is demoted to Retiring; anchors the grace
    /// period countdown
    pub retired_at: Option<DateTime<Utc>>,
    pub max_uses: u64,
    pub use_count: u64,
    pub status: KeyStatus,
}

impl KeyRecord {
    /// Whether the rotation deadline has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the use-count budget is spent
    pub fn is_exhausted(&self) -> bool {
        self.use_count >= self.max_uses
    }

    /// Age of the key relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Whether a Retiring record is still inside its grace period
    pub(crate) fn in_grace(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self.retired_at {
            Some(retired) => now < retired + grace,
            None => false,
        }
    }
}

/// The persisted projection of a [`KeyRecord`].
///
/// Contains everything except the sealed private halves, which have no
/// serialization path at all. This is what lands in the durable store,
/// keyed by `key_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredKeyRecord {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub public_key: Vec<u8>,
    pub signing_public_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub max_uses: u64,
    pub use_count: u64,
    pub status: KeyStatus,
}

impl From<&KeyRecord> for StoredKeyRecord {
    fn from(record: &KeyRecord) -> Self {
        Self {
            key_id: record.key_id.clone(),
            algorithm: record.algorithm,
            public_key: record.public_key.clone(),
            signing_public_key: record.signing_public_key.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            retired_at: record.retired_at,
            max_uses: record.max_uses,
            use_count: record.use_count,
            status: record.status,
        }
    }
}

/// Mint a fresh key identifier: `qk_YYYY_MM_DD_<12 hex chars>`
pub(crate) fn mint_key_id(now: DateTime<Utc>) -> String {
    let mut random = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut random);
    format!("qk_{}_{}", now.format("%Y_%m_%d"), hex::encode(random))
}
