/*!
 * Error Handling for the Quantum-safe Key & Envelope Service
 *
 * Provides the closed error taxonomy for every key-lifecycle and
 * envelope-encryption operation, with numeric error codes and a
 * classification that drives the propagation policy: caller-input and
 * security errors surface immediately, retryable-internal errors are
 * retried with bounded backoff, and fatal errors prevent the service
 * from reaching a ready state.
 */

use thiserror::Error;

use crate::keystore::KeyAlgorithm;

/// Comprehensive error type for all key-lifecycle and envelope operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid configuration: {field} - {cause}")]
    Configuration { field: String, cause: String },

    #[error("key generation failed: {operation} - {cause}")]
    KeyGeneration { operation: String, cause: String },

    #[error("no active key for algorithm {algorithm}")]
    NoActiveKey { algorithm: KeyAlgorithm },

    #[error("key not found: {key_id}")]
    KeyNotFound { key_id: String },

    #[error("key {key_id} exhausted: use count reached the limit of {max_uses}")]
    KeyExhausted { key_id: String, max_uses: u64 },

    #[error("key revoked: {key_id}")]
    KeyRevoked { key_id: String },

    #[error("payload too large: {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("integrity verification failed for envelope under key {key_id}")]
    IntegrityVerification { key_id: String },

    #[error("AEAD operation failed: {operation} - {cause}")]
    Aead { operation: String, cause: String },

    #[error("rotation failed after {attempts} attempts: {cause}")]
    RotationFailed { attempts: u32, cause: String },

    #[error("rotation cancelled by operator revoke for algorithm {algorithm}")]
    RotationCancelled { algorithm: KeyAlgorithm },

    #[error("storage error: {operation} - {cause}")]
    Storage { operation: String, cause: String },

    #[error("audit log error: {0}")]
    Audit(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("scheduler unavailable: {0}")]
    Scheduler(String),

    #[error("key store lock poisoned")]
    LockPoisoned,
}

/// Classification of an error for propagation policy decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Startup-time failure; the service refuses to become ready
    Fatal,
    /// Transient operational failure, retried locally with bounded backoff
    Retryable,
    /// Caller-visible failure, surfaced immediately and never auto-retried
    Caller,
    /// Tamper evidence or policy violation; logged at high severity
    Security,
    /// Internal failure of a supporting component
    Internal,
}

/// Error code constants, grouped by category
pub mod error_codes {
    // Configuration errors: 1000-1999
    pub const CONFIG_INVALID: u32 = 1000;

    // Key generation errors: 2000-2999
    pub const KEY_GENERATION_FAILED: u32 = 2001;

    // Key state errors: 3000-3999
    pub const NO_ACTIVE_KEY: u32 = 3001;
    pub const KEY_NOT_FOUND: u32 = 3002;
    pub const KEY_EXHAUSTED: u32 = 3003;
    pub const KEY_REVOKED: u32 = 3004;

    // Envelope errors: 4000-4999
    pub const PAYLOAD_TOO_LARGE: u32 = 4001;
    pub const INTEGRITY_VERIFICATION_FAILED: u32 = 4002;
    pub const AEAD_OPERATION_FAILED: u32 = 4003;

    // Rotation errors: 5000-5999
    pub const ROTATION_RETRIES_EXHAUSTED: u32 = 5001;
    pub const ROTATION_CANCELLED: u32 = 5002;

    // Storage and internal errors: 6000-6999
    pub const STORAGE_FAILED: u32 = 6001;
    pub const AUDIT_FAILED: u32 = 6002;
    pub const SERIALIZATION_FAILED: u32 = 6003;
    pub const SCHEDULER_UNAVAILABLE: u32 = 6004;
    pub const LOCK_POISONED: u32 = 6005;
}

impl CryptoError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            CryptoError::Configuration { .. } => error_codes::CONFIG_INVALID,
            CryptoError::KeyGeneration { .. } => error_codes::KEY_GENERATION_FAILED,
            CryptoError::NoActiveKey { .. } => error_codes::NO_ACTIVE_KEY,
            CryptoError::KeyNotFound { .. } => error_codes::KEY_NOT_FOUND,
            CryptoError::KeyExhausted { .. } => error_codes::KEY_EXHAUSTED,
            CryptoError::KeyRevoked { .. } => error_codes::KEY_REVOKED,
            CryptoError::PayloadTooLarge { .. } => error_codes::PAYLOAD_TOO_LARGE,
            CryptoError::IntegrityVerification { .. } => {
                error_codes::INTEGRITY_VERIFICATION_FAILED
            }
            CryptoError::Aead { .. } => error_codes::AEAD_OPERATION_FAILED,
            CryptoError::RotationFailed { .. } => error_codes::ROTATION_RETRIES_EXHAUSTED,
            CryptoError::RotationCancelled { .. } => error_codes::ROTATION_CANCELLED,
            CryptoError::Storage { .. } => error_codes::STORAGE_FAILED,
            CryptoError::Audit(_) => error_codes::AUDIT_FAILED,
            CryptoError::Serialization(_) => error_codes::SERIALIZATION_FAILED,
            CryptoError::Scheduler(_) => error_codes::SCHEDULER_UNAVAILABLE,
            CryptoError::LockPoisoned => error_codes::LOCK_POISONED,
        }
    }

    /// Classify this error for propagation policy decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::Configuration { .. } => ErrorKind::Fatal,
            CryptoError::KeyGeneration { .. } => ErrorKind::Retryable,
            CryptoError::NoActiveKey { .. }
            | CryptoError::KeyNotFound { .. }
            | CryptoError::KeyExhausted { .. }
            | CryptoError::KeyRevoked { .. }
            | CryptoError::PayloadTooLarge { .. } => ErrorKind::Caller,
            CryptoError::IntegrityVerification { .. } => ErrorKind::Security,
            CryptoError::Aead { .. }
            | CryptoError::RotationFailed { .. }
            | CryptoError::RotationCancelled { .. }
            | CryptoError::Storage { .. }
            | CryptoError::Audit(_)
            | CryptoError::Serialization(_)
            | CryptoError::Scheduler(_)
            | CryptoError::LockPoisoned => ErrorKind::Internal,
        }
    }

    /// Whether this error indicates tampering or another security event
    /// that must be logged at high severity and never retried
    pub fn is_security_event(&self) -> bool {
        self.kind() == ErrorKind::Security
    }

    /// Short stable identifier used in audit entries
    pub fn audit_kind(&self) -> &'static str {
        match self {
            CryptoError::Configuration { .. } => "Configuration",
            CryptoError::KeyGeneration { .. } => "KeyGeneration",
            CryptoError::NoActiveKey { .. } => "NoActiveKey",
            CryptoError::KeyNotFound { .. } => "KeyNotFound",
            CryptoError::KeyExhausted { .. } => "KeyExhausted",
            CryptoError::KeyRevoked { .. } => "KeyRevoked",
            CryptoError::PayloadTooLarge { .. } => "PayloadTooLarge",
            CryptoError::IntegrityVerification { .. } => "IntegrityVerification",
            CryptoError::Aead { .. } => "Aead",
            CryptoError::RotationFailed { .. } => "RotationFailed",
            CryptoError::RotationCancelled { .. } => "RotationCancelled",
            CryptoError::Storage { .. } => "Storage",
            CryptoError::Audit(_) => "Audit",
            CryptoError::Serialization(_) => "Serialization",
            CryptoError::Scheduler(_) => "Scheduler",
            CryptoError::LockPoisoned => "LockPoisoned",
        }
    }
}

/// Convenience constructors for common error shapes
impl CryptoError {
    pub fn configuration(field: &str, cause: &str) -> Self {
        CryptoError::Configuration {
            field: field.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn key_generation(operation: &str, cause: &str) -> Self {
        CryptoError::KeyGeneration {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        CryptoError::Storage {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn aead(operation: &str, cause: impl std::fmt::Display) -> Self {
        CryptoError::Aead {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for key-lifecycle and envelope operations
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kem::KyberVariant;

    #[test]
    fn test_error_codes() {
        let err = CryptoError::KeyExhausted {
            key_id: "qk_2026_01_01_ab".to_string(),
            max_uses: 1000,
        };
        assert_eq!(err.error_code(), error_codes::KEY_EXHAUSTED);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            CryptoError::configuration("max_key_uses", "must be positive").kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            CryptoError::key_generation("kyber_keypair", "library unavailable").kind(),
            ErrorKind::Retryable
        );
        assert_eq!(
            CryptoError::PayloadTooLarge {
                size: 11_000_000,
                limit: 10_485_760
            }
            .kind(),
            ErrorKind::Caller
        );
        assert_eq!(
            CryptoError::NoActiveKey {
                algorithm: KeyAlgorithm::Kyber(KyberVariant::Kyber1024)
            }
            .kind(),
            ErrorKind::Caller
        );
    }

    #[test]
    fn test_security_event_flag() {
        let err = CryptoError::IntegrityVerification {
            key_id: "qk_2026_01_01_ab".to_string(),
        };
        assert!(err.is_security_event());
        assert!(!CryptoError::LockPoisoned.is_security_event());
    }
}
