use oqs::kem::{Algorithm, Kem};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CryptoError;

/// CRYSTALS-Kyber algorithm variants with different security levels
///
/// Kyber offers three parameter sets that trade off between security
/// and performance/key size. Each variant corresponds to a different
/// NIST security level.
///
/// # Security Levels
///
/// * Kyber512: NIST Level 1 (equivalent to AES-128)
/// * Kyber768: NIST Level 3 (equivalent to AES-192)
/// * Kyber1024: NIST Level 5 (equivalent to AES-256)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum KyberVariant {
    /// Kyber512 (NIST security level 1)
    Kyber512,
    /// Kyber768 (NIST security level 3)
    Kyber768,
    /// Kyber1024 (NIST security level 5, default for this service)
    Kyber1024,
}

impl fmt::Display for KyberVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KyberVariant::Kyber512 => write!(f, "Kyber512"),
            KyberVariant::Kyber768 => write!(f, "Kyber768"),
            KyberVariant::Kyber1024 => write!(f, "Kyber1024"),
        }
    }
}

impl KyberVariant {
    /// Get the OQS algorithm for this variant
    fn oqs_algorithm(&self) -> Algorithm {
        match self {
            KyberVariant::Kyber512 => Algorithm::Kyber512,
            KyberVariant::Kyber768 => Algorithm::Kyber768,
            KyberVariant::Kyber1024 => Algorithm::Kyber1024,
        }
    }

    /// Get the NIST security level (1, 3, or 5)
    pub fn security_level(&self) -> u8 {
        match self {
            KyberVariant::Kyber512 => 1,
            KyberVariant::Kyber768 => 3,
            KyberVariant::Kyber1024 => 5,
        }
    }

    /// Public key size in bytes
    pub fn public_key_size(&self) -> usize {
        match self {
            KyberVariant::Kyber512 => 800,
            KyberVariant::Kyber768 => 1184,
            KyberVariant::Kyber1024 => 1568,
        }
    }

    /// Secret key size in bytes
    pub fn secret_key_size(&self) -> usize {
        match self {
            KyberVariant::Kyber512 => 1632,
            KyberVariant::Kyber768 => 2400,
            KyberVariant::Kyber1024 => 3168,
        }
    }

    /// Ciphertext (encapsulated key) size in bytes
    pub fn ciphertext_size(&self) -> usize {
        match self {
            KyberVariant::Kyber512 => 768,
            KyberVariant::Kyber768 => 1088,
            KyberVariant::Kyber1024 => 1568,
        }
    }

    /// Shared secret size in bytes (32 for all variants)
    pub fn shared_secret_size(&self) -> usize {
        32
    }
}

/// Pluggable key encapsulation mechanism.
///
/// The service never depends on a concrete KEM: the key generator and
/// encryption engine operate through this trait, so an alternative
/// post-quantum primitive (or a failing test double) can be substituted
/// without touching the key lifecycle.
pub trait KemProvider: Send + Sync {
    /// Generate a fresh keypair, returning `(public_key, secret_key)`
    fn generate_keypair(&self, variant: KyberVariant) -> Result<(Vec<u8>, Vec<u8>), CryptoError>;

    /// Encapsulate a fresh shared secret against the given public key,
    /// returning `(kem_ciphertext, shared_secret)`
    fn encapsulate(
        &self,
        variant: KyberVariant,
        public_key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError>;

    /// Recover the shared secret from a KEM ciphertext using the secret key
    fn decapsulate(
        &self,
        variant: KyberVariant,
        secret_key: &[u8],
        kem_ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Check that the underlying primitive library is available for the
    /// given variant. Called once at service startup; failure here is
    /// fatal (the service refuses to start with a broken crypto backend).
    fn probe(&self, variant: KyberVariant) -> Result<(), CryptoError>;
}

/// Default `KemProvider` backed by the OQS CRYSTALS-Kyber implementation
///
/// # Examples
///
/// ```no_run
/// use qkes::kem::{KemProvider, KyberKem, KyberVariant};
///
/// let kem = KyberKem::new();
/// let (public_key, secret_key) = kem.generate_keypair(KyberVariant::Kyber1024).unwrap();
/// let (ciphertext, shared) = kem.encapsulate(KyberVariant::Kyber1024, &public_key).unwrap();
/// let recovered = kem
///     .decapsulate(KyberVariant::Kyber1024, &secret_key, &ciphertext)
///     .unwrap();
/// assert_eq!(shared, recovered);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct KyberKem;

impl KyberKem {
    pub fn new() -> Self {
        Self
    }

    fn kem_for(variant: KyberVariant) -> Result<Kem, CryptoError> {
        Kem::new(variant.oqs_algorithm()).map_err(|e| {
            CryptoError::key_generation(
                "kyber_init",
                &format!("failed to initialize {}: {}", variant, e),
            )
        })
    }
}

impl KemProvider for KyberKem {
    fn generate_keypair(&self, variant: KyberVariant) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let kem = Self::kem_for(variant)?;
        let (public_key, secret_key) = kem.keypair().map_err(|e| {
            CryptoError::key_generation("kyber_keypair", &e.to_string())
        })?;
        Ok((public_key.into_vec(), secret_key.into_vec()))
    }

    fn encapsulate(
        &self,
        variant: KyberVariant,
        public_key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let kem = Self::kem_for(variant)?;
        let pk = kem.public_key_from_bytes(public_key).ok_or_else(|| {
            CryptoError::key_generation(
                "kyber_encapsulate",
                "failed to create public key from bytes",
            )
        })?;
        let (ciphertext, shared_secret) = kem.encapsulate(&pk).map_err(|e| {
            CryptoError::key_generation("kyber_encapsulate", &e.to_string())
        })?;
        Ok((ciphertext.into_vec(), shared_secret.into_vec()))
    }

    fn decapsulate(
        &self,
        variant: KyberVariant,
        secret_key: &[u8],
        kem_ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let kem = Self::kem_for(variant)?;
        let sk = kem.secret_key_from_bytes(secret_key).ok_or_else(|| {
            CryptoError::key_generation(
                "kyber_decapsulate",
                "failed to create secret key from bytes",
            )
        })?;
        let ct = kem.ciphertext_from_bytes(kem_ciphertext).ok_or_else(|| {
            CryptoError::key_generation(
                "kyber_decapsulate",
                "failed to create ciphertext from bytes",
            )
        })?;
        let shared_secret = kem.decapsulate(&sk, &ct).map_err(|e| {
            CryptoError::key_generation("kyber_decapsulate", &e.to_string())
        })?;
        Ok(shared_secret.into_vec())
    }

    fn probe(&self, variant: KyberVariant) -> Result<(), CryptoError> {
        Self::kem_for(variant).map(|_| ())
    }
}
