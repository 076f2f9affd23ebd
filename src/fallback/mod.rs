/*!
 * Classical AEAD fallback cipher
 *
 * AES-256-GCM serves two roles: the symmetric layer under the Kyber
 * KEM, and the standalone classical fallback algorithm when the
 * post-quantum primitive is unavailable.
 */

mod aes;

pub use aes::*;

#[cfg(test)]
mod tests;
