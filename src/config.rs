/*!
 * Service configuration
 *
 * A single typed configuration struct, deserialized from YAML with
 * serde-level defaults and validated exhaustively at startup. Invalid
 * combinations are rejected before the service becomes ready; defaults
 * are never sprinkled through the code.
 */

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CryptoError, CryptoResult};
use crate::keystore::KeyAlgorithm;

fn default_algorithm() -> String {
    "CRYSTALS-Kyber1024".to_string()
}

fn default_key_rotation_hours() -> i64 {
    24
}

fn default_max_key_uses() -> u64 {
    1000
}

fn default_backup_algorithm() -> String {
    "AES-256-GCM".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_audit_logging() -> bool {
    true
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_audit_timeout_ms() -> u64 {
    50
}

fn default_rotation_backoff_base_ms() -> u64 {
    1000
}

/// Configuration for a [`crate::KeyService`]
///
/// # Examples
///
/// ```
/// use qkes::QuantumSafeConfig;
///
/// let config = QuantumSafeConfig::from_yaml_str(
///     "algorithm: CRYSTALS-Kyber768\nkey_rotation_hours: 12\nmax_key_uses: 500\n",
/// )
/// .unwrap();
/// assert_eq!(config.key_rotation_hours, 12);
/// assert_eq!(config.max_key_uses, 500);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuantumSafeConfig {
    /// Primary algorithm: `CRYSTALS-Kyber512`, `CRYSTALS-Kyber768`,
    /// `CRYSTALS-Kyber1024`, or `AES-256-GCM`
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Rotation interval; also the default grace period
    #[serde(default = "default_key_rotation_hours")]
    pub key_rotation_hours: i64,

    /// Encryption-use budget per key
    #[serde(default = "default_max_key_uses")]
    pub max_key_uses: u64,

    /// Classical fallback algorithm; only `AES-256-GCM` is supported
    #[serde(default = "default_backup_algorithm")]
    pub backup_algorithm: String,

    /// Key-generation attempts per rotation before escalating
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Exponential backoff multiplier between rotation attempts
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,

    /// Whether audit entries are recorded at all
    #[serde(default = "default_audit_logging")]
    pub audit_logging: bool,

    /// Scheduler threshold-check period
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Bound on how long an audit write may block the crypto path
    #[serde(default = "default_audit_timeout_ms")]
    pub audit_timeout_ms: u64,

    /// First rotation backoff delay
    #[serde(default = "default_rotation_backoff_base_ms")]
    pub rotation_backoff_base_ms: u64,

    /// Grace period override; defaults to one rotation interval
    #[serde(default)]
    pub grace_period_hours: Option<i64>,

    /// Durable store location; a temporary database when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for QuantumSafeConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            key_rotation_hours: default_key_rotation_hours(),
            max_key_uses: default_max_key_uses(),
            backup_algorithm: default_backup_algorithm(),
            retry_attempts: default_retry_attempts(),
            backoff_factor: default_backoff_factor(),
            audit_logging: default_audit_logging(),
            tick_interval_secs: default_tick_interval_secs(),
            audit_timeout_ms: default_audit_timeout_ms(),
            rotation_backoff_base_ms: default_rotation_backoff_base_ms(),
            grace_period_hours: None,
            data_dir: None,
        }
    }
}

impl QuantumSafeConfig {
    /// Load and validate a configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> CryptoResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CryptoError::configuration("config_file", &format!("failed to read: {}", e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a configuration from a YAML string
    pub fn from_yaml_str(contents: &str) -> CryptoResult<Self> {
        let config: Self = serde_yaml::from_str(contents).map_err(|e| {
            CryptoError::configuration("config_file", &format!("failed to parse YAML: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every field. Called by the YAML loaders and again by
    /// `KeyService::start`, so hand-constructed configurations get the
    /// same checks.
    pub fn validate(&self) -> CryptoResult<()> {
        self.primary_algorithm()?;

        match KeyAlgorithm::from_name(&self.backup_algorithm) {
            Some(KeyAlgorithm::Aes256Gcm) => {}
            _ => {
                return Err(CryptoError::configuration(
                    "backup_algorithm",
                    &format!(
                        "unsupported fallback '{}'; only AES-256-GCM is available",
                        self.backup_algorithm
                    ),
                ))
            }
        }

        if self.key_rotation_hours < 1 {
            return Err(CryptoError::configuration(
                "key_rotation_hours",
                "must be at least 1",
            ));
        }
        if self.max_key_uses == 0 {
            return Err(CryptoError::configuration(
                "max_key_uses",
                "must be positive",
            ));
        }
        if self.retry_attempts == 0 {
            return Err(CryptoError::configuration(
                "retry_attempts",
                "must be at least 1",
            ));
        }
        if self.backoff_factor == 0 {
            return Err(CryptoError::configuration(
                "backoff_factor",
                "must be at least 1",
            ));
        }
        if self.tick_interval_secs == 0 {
            return Err(CryptoError::configuration(
                "tick_interval_secs",
                "must be at least 1",
            ));
        }
        if self.audit_timeout_ms == 0 {
            return Err(CryptoError::configuration(
                "audit_timeout_ms",
                "must be at least 1",
            ));
        }
        if self.rotation_backoff_base_ms == 0 {
            return Err(CryptoError::configuration(
                "rotation_backoff_base_ms",
                "must be at least 1",
            ));
        }
        if let Some(grace) = self.grace_period_hours {
            if grace < 1 {
                return Err(CryptoError::configuration(
                    "grace_period_hours",
                    "must be at least 1 when set",
                ));
            }
        }
        Ok(())
    }

    /// The parsed primary algorithm
    pub fn primary_algorithm(&self) -> CryptoResult<KeyAlgorithm> {
        KeyAlgorithm::from_name(&self.algorithm).ok_or_else(|| {
            CryptoError::configuration(
                "algorithm",
                &format!("unknown algorithm '{}'", self.algorithm),
            )
        })
    }

    pub fn rotation_interval(&self) -> ChronoDuration {
        ChronoDuration::hours(self.key_rotation_hours)
    }

    /// Grace period: explicit override or one rotation interval
    pub fn grace_period(&self) -> ChronoDuration {
        match self.grace_period_hours {
            Some(hours) => ChronoDuration::hours(hours),
            None => self.rotation_interval(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }

    pub fn rotation_backoff_base(&self) -> Duration {
        Duration::from_millis(self.rotation_backoff_base_ms)
    }
}
