/*!
 * Key generation
 *
 * Produces the material for a new key record: a KEM keypair through the
 * pluggable provider (or a random symmetric secret for the classical
 * fallback), always alongside a Dilithium companion signing keypair at
 * the matching security level.
 *
 * Generation never silently downgrades: if the post-quantum primitive
 * fails, the error surfaces as `KeyGeneration` and falling back to the
 * classical algorithm is the caller's explicit decision under a
 * different algorithm label.
 */

use std::sync::Arc;

use crate::error::{CryptoError, CryptoResult};
use crate::fallback::AesGcmCipher;
use crate::kem::{KemProvider, KyberKem};
use crate::keystore::KeyAlgorithm;
use crate::sealed::SealedKey;
use crate::signing::{DilithiumVariant, SigningKeyPair};

/// Freshly generated material for one key record
pub struct KeyMaterial {
    /// KEM public key; empty for the classical fallback
    pub public_key: Vec<u8>,
    /// KEM secret key, or the AEAD key itself for the fallback
    pub private_key: SealedKey,
    /// Companion signing public key
    pub signing_public_key: Vec<u8>,
    /// Companion signing secret key
    pub signing_private_key: SealedKey,
}

/// Produces keypairs for the key store via the pluggable KEM seam
pub struct KeyGenerator {
    kem: Arc<dyn KemProvider>,
}

impl KeyGenerator {
    /// Generator over the default OQS-backed Kyber provider
    pub fn new() -> Self {
        Self::with_provider(Arc::new(KyberKem::new()))
    }

    /// Generator over an injected provider (alternative primitive or
    /// test double)
    pub fn with_provider(kem: Arc<dyn KemProvider>) -> Self {
        Self { kem }
    }

    pub fn provider(&self) -> Arc<dyn KemProvider> {
        Arc::clone(&self.kem)
    }

    /// Generate material for the given algorithm.
    ///
    /// For `Kyber(variant)` this performs KEM keypair generation plus a
    /// Dilithium companion keypair at the paired security level. For
    /// the classical fallback a random 32-byte AEAD key stands in for
    /// the keypair (no public half).
    pub fn generate(&self, algorithm: KeyAlgorithm) -> CryptoResult<KeyMaterial> {
        match algorithm {
            KeyAlgorithm::Kyber(variant) => {
                let (public_key, secret_key) = self.kem.generate_keypair(variant)?;
                let signing = SigningKeyPair::generate(DilithiumVariant::companion_for(variant))?;
                Ok(KeyMaterial {
                    public_key,
                    private_key: SealedKey::new(secret_key),
                    signing_public_key: signing.public_key.clone(),
                    signing_private_key: signing.secret().clone(),
                })
            }
            KeyAlgorithm::Aes256Gcm => {
                let key = AesGcmCipher::generate_key();
                let signing = SigningKeyPair::generate(DilithiumVariant::Dilithium3)?;
                Ok(KeyMaterial {
                    public_key: Vec::new(),
                    private_key: SealedKey::new(key.to_vec()),
                    signing_public_key: signing.public_key.clone(),
                    signing_private_key: signing.secret().clone(),
                })
            }
        }
    }

    /// Standalone signing keypair for the service's audit identity
    pub fn generate_signing(&self, variant: DilithiumVariant) -> CryptoResult<SigningKeyPair> {
        SigningKeyPair::generate(variant)
    }

    /// Startup probe: verify the primitive library backs the configured
    /// algorithm before the service becomes ready
    pub fn probe(&self, algorithm: KeyAlgorithm) -> CryptoResult<()> {
        match algorithm {
            KeyAlgorithm::Kyber(variant) => self.kem.probe(variant),
            KeyAlgorithm::Aes256Gcm => Ok(()),
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::kem::KyberVariant;

    #[test]
    fn test_generate_kyber_material() {
        let generator = KeyGenerator::new();
        let material = generator
            .generate(KeyAlgorithm::Kyber(KyberVariant::Kyber768))
            .unwrap();

        assert_eq!(
            material.public_key.len(),
            KyberVariant::Kyber768.public_key_size()
        );
        assert_eq!(
            material.private_key.len(),
            KyberVariant::Kyber768.secret_key_size()
        );
        assert!(!material.signing_public_key.is_empty());
        assert!(!material.signing_private_key.is_empty());
    }

    #[test]
    fn test_generate_fallback_material() {
        let generator = KeyGenerator::new();
        let material = generator.generate(KeyAlgorithm::Aes256Gcm).unwrap();

        assert!(material.public_key.is_empty());
        assert_eq!(material.private_key.len(), 32);
        assert!(!material.signing_public_key.is_empty());
    }

    #[test]
    fn test_failing_provider_surfaces_error() {
        let generator =
            KeyGenerator::with_provider(Arc::new(test_support::FlakyKem::failing(1)));

        let first = generator.generate(KeyAlgorithm::Kyber(KyberVariant::Kyber768));
        assert!(matches!(first, Err(CryptoError::KeyGeneration { .. })));

        // The double recovers after its injected failures
        assert!(generator
            .generate(KeyAlgorithm::Kyber(KyberVariant::Kyber768))
            .is_ok());
    }

    #[test]
    fn test_probe() {
        let generator = KeyGenerator::new();
        assert!(generator
            .probe(KeyAlgorithm::Kyber(KyberVariant::Kyber1024))
            .is_ok());
        assert!(generator.probe(KeyAlgorithm::Aes256Gcm).is_ok());
    }
}
