use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// AES-256-GCM key size in bytes
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM cipher for authenticated encryption
///
/// Combines encryption for confidentiality with authentication for
/// integrity and authenticity. The tag produced by `encrypt` is
/// appended to the ciphertext; the envelope layer detaches it.
///
/// # Security Properties
///
/// 1. Confidentiality through AES-256 encryption
/// 2. Integrity and authenticity through GCM authentication
/// 3. 256-bit keys for post-quantum-appropriate symmetric security
///
/// # Examples
///
/// ```
/// use qkes::fallback::AesGcmCipher;
///
/// let key = [0x42; 32];
/// let cipher = AesGcmCipher::new(&key).unwrap();
///
/// let nonce = AesGcmCipher::generate_nonce();
/// let ciphertext = cipher.encrypt(b"payload", &nonce, Some(b"context")).unwrap();
/// let plaintext = cipher.decrypt(&ciphertext, &nonce, Some(b"context")).unwrap();
/// assert_eq!(plaintext, b"payload");
/// ```
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Arc<Aes256Gcm>,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("cipher", &"[AES-256-GCM]")
            .finish()
    }
}

impl AesGcmCipher {
    /// Create a new cipher with the given 32-byte key
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not exactly 32 bytes long
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::aead(
                "key_init",
                format!("expected {} byte key, got {}", KEY_SIZE, key.len()),
            ));
        }

        let key = Key::<Aes256Gcm>::from_slice(key);
        let cipher = Arc::new(Aes256Gcm::new(key));

        Ok(Self { cipher })
    }

    /// Generate a cryptographically secure random 32-byte key
    ///
    /// Used for the classical fallback algorithm, where the record's
    /// sealed secret is the AEAD key itself.
    pub fn generate_key() -> Zeroizing<Vec<u8>> {
        let mut key = Zeroizing::new(vec![0u8; KEY_SIZE]);
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    /// Generate a random 12-byte nonce
    ///
    /// A unique nonce must be used for each encryption with the same key.
    pub fn generate_nonce() -> Vec<u8> {
        Aes256Gcm::generate_nonce(&mut OsRng).to_vec()
    }

    /// Encrypt plaintext, returning ciphertext with the 16-byte tag appended
    ///
    /// # Arguments
    ///
    /// * `plaintext` - The data to encrypt
    /// * `nonce` - A 12-byte nonce, unique per encryption
    /// * `associated_data` - Additional data to authenticate but not encrypt
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        nonce: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::aead(
                "encrypt",
                format!("expected {} byte nonce, got {}", NONCE_SIZE, nonce.len()),
            ));
        }

        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: plaintext,
            aad: associated_data.unwrap_or(&[]),
        };

        self.cipher
            .encrypt(nonce, payload)
            .map_err(|e| CryptoError::aead("encrypt", e))
    }

    /// Decrypt ciphertext produced by `encrypt` (tag appended)
    ///
    /// # Errors
    ///
    /// Fails when the tag does not verify, which the envelope layer
    /// treats as tamper evidence, or when the nonce length is wrong.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::aead(
                "decrypt",
                format!("expected {} byte nonce, got {}", NONCE_SIZE, nonce.len()),
            ));
        }
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::aead(
                "decrypt",
                "ciphertext shorter than the authentication tag",
            ));
        }

        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext,
            aad: associated_data.unwrap_or(&[]),
        };

        self.cipher
            .decrypt(nonce, payload)
            .map_err(|e| CryptoError::aead("decrypt", e))
    }
}
