/*!
 * CRYSTALS-Dilithium companion signatures
 *
 * Every generated encryption key carries a companion signing keypair,
 * and the audit logger authenticates entries with a service-level
 * signing identity. Both are Dilithium keypairs wrapped here over the
 * OQS library.
 */

use oqs::sig::{Algorithm, Sig};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CryptoError;
use crate::kem::KyberVariant;
use crate::sealed::SealedKey;

/// CRYSTALS-Dilithium algorithm variants
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DilithiumVariant {
    /// Dilithium2 (NIST security level 2)
    Dilithium2,
    /// Dilithium3 (NIST security level 3)
    Dilithium3,
    /// Dilithium5 (NIST security level 5)
    Dilithium5,
}

impl fmt::Display for DilithiumVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DilithiumVariant::Dilithium2 => write!(f, "Dilithium2"),
            DilithiumVariant::Dilithium3 => write!(f, "Dilithium3"),
            DilithiumVariant::Dilithium5 => write!(f, "Dilithium5"),
        }
    }
}

impl DilithiumVariant {
    fn oqs_algorithm(&self) -> Algorithm {
        match self {
            DilithiumVariant::Dilithium2 => Algorithm::Dilithium2,
            DilithiumVariant::Dilithium3 => Algorithm::Dilithium3,
            DilithiumVariant::Dilithium5 => Algorithm::Dilithium5,
        }
    }

    /// The Dilithium variant paired with a Kyber variant at the same
    /// NIST security level
    pub fn companion_for(kem: KyberVariant) -> Self {
        match kem {
            KyberVariant::Kyber512 => DilithiumVariant::Dilithium2,
            KyberVariant::Kyber768 => DilithiumVariant::Dilithium3,
            KyberVariant::Kyber1024 => DilithiumVariant::Dilithium5,
        }
    }
}

/// A Dilithium signing keypair with the secret half sealed
pub struct SigningKeyPair {
    pub algorithm: DilithiumVariant,
    pub public_key: Vec<u8>,
    secret_key: SealedKey,
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key_len", &self.public_key.len())
            .field("secret_key", &self.secret_key)
            .finish()
    }
}

impl SigningKeyPair {
    /// Generate a fresh keypair for the given variant
    pub fn generate(variant: DilithiumVariant) -> Result<Self, CryptoError> {
        let sig = sig_for(variant)?;
        let (public_key, secret_key) = sig.keypair().map_err(|e| {
            CryptoError::key_generation("dilithium_keypair", &e.to_string())
        })?;
        Ok(Self {
            algorithm: variant,
            public_key: public_key.into_vec(),
            secret_key: SealedKey::new(secret_key.into_vec()),
        })
    }

    pub(crate) fn secret(&self) -> &SealedKey {
        &self.secret_key
    }

    /// Sign a message with the sealed secret key
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let sig = sig_for(self.algorithm)?;
        let sk = sig
            .secret_key_from_bytes(self.secret_key.expose())
            .ok_or_else(|| {
                CryptoError::key_generation(
                    "dilithium_sign",
                    "failed to create secret key from bytes",
                )
            })?;
        let signature = sig.sign(message, &sk).map_err(|e| {
            CryptoError::key_generation("dilithium_sign", &e.to_string())
        })?;
        Ok(signature.into_vec())
    }

    /// Verify a signature against this keypair's public half
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        verify(self.algorithm, &self.public_key, message, signature)
    }
}

/// Verify a detached Dilithium signature
pub fn verify(
    variant: DilithiumVariant,
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let sig = sig_for(variant)?;
    let pk = sig.public_key_from_bytes(public_key).ok_or_else(|| {
        CryptoError::key_generation(
            "dilithium_verify",
            "failed to create public key from bytes",
        )
    })?;
    let sig_obj = match sig.signature_from_bytes(signature) {
        Some(s) => s,
        None => return Ok(false),
    };
    Ok(sig.verify(message, &sig_obj, &pk).is_ok())
}

fn sig_for(variant: DilithiumVariant) -> Result<Sig, CryptoError> {
    Sig::new(variant.oqs_algorithm()).map_err(|e| {
        CryptoError::key_generation(
            "dilithium_init",
            &format!("failed to initialize {}: {}", variant, e),
        )
    })
}
