/*!
 * QKES: Quantum-safe Key & Envelope Service
 *
 * This crate implements a key lifecycle and envelope encryption
 * service built on post-quantum primitives, with a focus on managing
 * cryptographic key state correctly under rotation, expiry, and
 * concurrent use.
 *
 * The main building blocks are:
 *
 * - CRYSTALS-Kyber for key encapsulation (KEM), with AES-256-GCM as
 *   the classical fallback algorithm
 * - CRYSTALS-Dilithium companion signatures authenticating audit
 *   entries
 * - A single-writer key store enforcing the lifecycle invariants:
 *   one active key per algorithm, bounded use counts, grace-period
 *   decryption for retired keys, irreversible revocation
 * - A background rotation scheduler with bounded exponential backoff
 * - An append-only, signed audit log that never blocks the crypto
 *   path beyond a bounded timeout
 *
 * Callers interact with [`KeyService`]: `encrypt` and `decrypt` move
 * opaque byte payloads in and out of self-describing
 * [`EncryptionEnvelope`]s, while `health` and `metrics` expose the
 * service state.
 */

/// Append-only audit log of key and crypto operations
pub mod audit;

/// Typed YAML-backed service configuration
pub mod config;

/// Envelope encryption engine
pub mod engine;

/// Common error types for the service
pub mod error;

/// Classical AES-256-GCM fallback cipher
pub mod fallback;

/// Key generation over the pluggable KEM seam
pub mod generator;

/// Key encapsulation mechanisms (CRYSTALS-Kyber)
pub mod kem;

/// Key record store and lifecycle invariants
pub mod keystore;

/// Operation counters
pub mod metrics;

/// Background rotation scheduler
pub mod rotation;

/// Sealed containers for private key material
pub mod sealed;

/// Service composition root
pub mod service;

/// CRYSTALS-Dilithium companion signatures
pub mod signing;

// Re-export main types for convenience
pub use audit::{AuditEntry, AuditFilter, AuditOperation, AuditResult};
pub use config::QuantumSafeConfig;
pub use engine::{EncryptionEnvelope, MAX_PAYLOAD_BYTES};
pub use error::{CryptoError, CryptoResult, ErrorKind};
pub use kem::{KemProvider, KyberKem, KyberVariant};
pub use keystore::{KeyAlgorithm, KeyRecord, KeyStatus};
pub use metrics::MetricsSnapshot;
pub use sealed::SealedKey;
pub use service::{HealthReport, HealthStatus, KeyService};
pub use signing::DilithiumVariant;

/// The most commonly used types in one import
pub mod prelude {
    pub use crate::audit::{AuditEntry, AuditFilter, AuditOperation, AuditResult};
    pub use crate::config::QuantumSafeConfig;
    pub use crate::engine::{EncryptionEnvelope, MAX_PAYLOAD_BYTES};
    pub use crate::error::{CryptoError, CryptoResult};
    pub use crate::kem::{KemProvider, KyberVariant};
    pub use crate::keystore::{KeyAlgorithm, KeyStatus};
    pub use crate::metrics::MetricsSnapshot;
    pub use crate::service::{HealthReport, HealthStatus, KeyService};
}
