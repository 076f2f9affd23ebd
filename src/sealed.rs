/*!
 * Sealed containers for private key material
 *
 * Private keys are exclusively owned by the key store and must never
 * cross the process boundary. `SealedKey` enforces this structurally:
 * it carries no `Serialize`/`Deserialize` implementations, so no
 * persistence or logging path can accept it, its `Debug` output is
 * redacted, and the underlying bytes are zeroed when the last handle
 * is dropped.
 */

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

/// A sealed, zeroize-on-drop container for private key material.
///
/// Cloning a `SealedKey` shares the underlying allocation instead of
/// copying the key bytes; the material exists exactly once in process
/// memory regardless of how many records reference it.
///
/// # Security Properties
///
/// 1. No serialization path exists; persisting a sealed key is a
///    compile error, not a runtime policy check
/// 2. The bytes are zeroed when the last reference is dropped
/// 3. `Debug` and `Display` never reveal the contents
#[derive(Clone)]
pub struct SealedKey {
    inner: Arc<Zeroizing<Vec<u8>>>,
}

impl SealedKey {
    /// Seal the given key material. The input vector is moved into the
    /// container and zeroed on drop.
    pub fn new(material: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Zeroizing::new(material)),
        }
    }

    /// An empty sealed key, used for algorithms that have no private
    /// component on one side (e.g. the classical fallback's public half).
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Borrow the sealed bytes for a cryptographic operation.
    ///
    /// Crate-private: only the key store, generator, engine and audit
    /// signer operate on raw key material.
    pub(crate) fn expose(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedKey")
            .field("len", &self.inner.len())
            .field("material", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_output_is_redacted() {
        let key = SealedKey::new(vec![0x42; 32]);
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("66")); // 0x42
    }

    #[test]
    fn test_clone_shares_material() {
        let key = SealedKey::new(vec![1, 2, 3]);
        let clone = key.clone();
        assert_eq!(key.expose(), clone.expose());
        assert_eq!(key.len(), 3);
        assert!(!key.is_empty());
    }

    #[test]
    fn test_empty_key() {
        let key = SealedKey::empty();
        assert!(key.is_empty());
        assert_eq!(key.len(), 0);
    }
}
