/*!
 * Service composition root
 *
 * `KeyService` owns the key store, encryption engine, rotation
 * scheduler, and audit logger. It is constructed once at startup and
 * handed to callers by reference; there are no ambient globals.
 * Startup is fail-closed: an unavailable primitive, an invalid
 * configuration, or a failed initial key generation all prevent the
 * service from reaching a ready state.
 */

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::audit::{AuditEntry, AuditFilter, AuditLogger, AuditOperation, AuditQuery};
use crate::config::QuantumSafeConfig;
use crate::engine::{EncryptionEngine, EncryptionEnvelope};
use crate::error::{CryptoError, CryptoResult};
use crate::generator::KeyGenerator;
use crate::keystore::{KeyAlgorithm, KeyStore, StorePolicy};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::rotation::{RotationScheduler, SchedulerConfig, SchedulerHandle};
use crate::signing::DilithiumVariant;

/// Overall service health
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Report returned by [`KeyService::health`]
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Age of the current active key, if one exists
    pub active_key_age: Option<Duration>,
    pub last_rotation: Option<DateTime<Utc>>,
}

/// The quantum-safe key lifecycle and envelope encryption service.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() -> Result<(), qkes::CryptoError> {
/// use qkes::{KeyService, QuantumSafeConfig};
///
/// let service = KeyService::start(QuantumSafeConfig::default()).await?;
///
/// let envelope = service.encrypt(b"opaque payload", None).await?;
/// let plaintext = service.decrypt(&envelope).await?;
/// assert_eq!(plaintext, b"opaque payload");
///
/// println!("{}", service.health().status);
/// service.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct KeyService {
    algorithm: KeyAlgorithm,
    rotation_interval: ChronoDuration,
    store: Arc<KeyStore>,
    engine: EncryptionEngine,
    scheduler: SchedulerHandle,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    audit: Arc<AuditLogger>,
    audit_public_key: Vec<u8>,
    metrics: Metrics,
    last_rotation: Arc<RwLock<Option<DateTime<Utc>>>>,
    // Held so the temporary database outlives the service
    _db: sled::Db,
}

impl KeyService {
    /// Start the service with the default OQS-backed key generator
    pub async fn start(config: QuantumSafeConfig) -> CryptoResult<Self> {
        Self::start_with_generator(config, KeyGenerator::new()).await
    }

    /// Start the service with an injected generator (alternative KEM
    /// primitive, or a test double)
    pub async fn start_with_generator(
        config: QuantumSafeConfig,
        generator: KeyGenerator,
    ) -> CryptoResult<Self> {
        config.validate()?;
        let algorithm = config.primary_algorithm()?;
        let generator = Arc::new(generator);

        // Fail closed: refuse to start when the configured primitive is
        // unavailable rather than serving with a broken crypto backend.
        generator.probe(algorithm).map_err(|e| {
            CryptoError::configuration(
                "algorithm",
                &format!("configured algorithm {} is unavailable: {}", algorithm, e),
            )
        })?;

        let db = match &config.data_dir {
            Some(dir) => sled::open(dir.join("qkes.db"))
                .map_err(|e| CryptoError::storage("open_database", e))?,
            None => sled::Config::new()
                .temporary(true)
                .open()
                .map_err(|e| CryptoError::storage("open_database", e))?,
        };

        let metrics = Metrics::new();

        let audit_identity = generator.generate_signing(DilithiumVariant::Dilithium3)?;
        let audit_public_key = audit_identity.public_key.clone();
        let audit = Arc::new(AuditLogger::spawn(
            &db,
            Some(audit_identity),
            config.audit_logging,
            config.audit_timeout(),
            metrics.clone(),
        )?);

        let store = Arc::new(KeyStore::open(
            &db,
            StorePolicy {
                rotation_interval: config.rotation_interval(),
                grace_period: config.grace_period(),
                max_uses: config.max_key_uses,
            },
        )?);

        // Eager initial key so the engine never cold-starts into
        // NoActiveKey; a generation failure here is a startup failure.
        let material = generator.generate(algorithm)?;
        let record = store.generate_key(algorithm, material)?;
        audit
            .record(AuditEntry::success(
                AuditOperation::KeyGenerated,
                &record.key_id,
            ))
            .await;
        log::info!("initial {} key {} generated", algorithm, record.key_id);

        let last_rotation = Arc::new(RwLock::new(Some(Utc::now())));

        let (scheduler, scheduler_task) = RotationScheduler::spawn(
            Arc::clone(&store),
            Arc::clone(&generator),
            Arc::clone(&audit),
            metrics.clone(),
            Arc::clone(&last_rotation),
            SchedulerConfig {
                algorithm,
                tick_interval: config.tick_interval(),
                retry_attempts: config.retry_attempts,
                backoff_factor: config.backoff_factor,
                backoff_base: config.rotation_backoff_base(),
            },
        );

        let engine = EncryptionEngine::new(
            Arc::clone(&store),
            generator.provider(),
            scheduler.clone(),
            Arc::clone(&audit),
            metrics.clone(),
            algorithm,
        );

        Ok(Self {
            algorithm,
            rotation_interval: config.rotation_interval(),
            store,
            engine,
            scheduler,
            scheduler_task: Mutex::new(Some(scheduler_task)),
            audit,
            audit_public_key,
            metrics,
            last_rotation,
            _db: db,
        })
    }

    /// Encrypt an opaque payload into an envelope
    pub async fn encrypt(
        &self,
        payload: &[u8],
        key_id: Option<&str>,
    ) -> CryptoResult<EncryptionEnvelope> {
        self.engine.encrypt(payload, key_id).await
    }

    /// Decrypt an envelope back into its payload
    pub async fn decrypt(&self, envelope: &EncryptionEnvelope) -> CryptoResult<Vec<u8>> {
        self.engine.decrypt(envelope).await
    }

    /// Force a rotation of the primary algorithm's key
    pub async fn rotate_now(&self) -> CryptoResult<String> {
        self.scheduler.rotate_now(self.algorithm).await
    }

    /// Operator revoke: immediate, irreversible, and short-circuits any
    /// in-flight rotation backoff
    pub async fn revoke(&self, key_id: &str) -> CryptoResult<()> {
        self.scheduler.revoke(key_id).await
    }

    /// Id of the current active key for the primary algorithm
    pub fn active_key_id(&self) -> CryptoResult<String> {
        Ok(self.store.get_active_key(self.algorithm)?.key_id)
    }

    /// Current health, derived from the active key's age against the
    /// rotation interval
    pub fn health(&self) -> HealthReport {
        let age = self.store.active_key_age(self.algorithm).unwrap_or(None);
        let last_rotation = self
            .last_rotation
            .read()
            .ok()
            .and_then(|guard| *guard);

        HealthReport {
            status: health_status(age, self.rotation_interval),
            active_key_age: age.and_then(|a| a.to_std().ok()),
            last_rotation,
        }
    }

    /// Point-in-time operation counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Compliance query over the audit log
    pub fn audit_query(&self, filter: AuditFilter) -> AuditQuery {
        self.audit.query(filter)
    }

    /// Drain pending audit entries to the durable store
    pub async fn audit_flush(&self) -> CryptoResult<()> {
        self.audit.flush().await
    }

    /// Public half of the Dilithium identity that signs audit entries
    pub fn audit_public_key(&self) -> &[u8] {
        &self.audit_public_key
    }

    /// Stop the background tasks and flush the audit log
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        let task = self
            .scheduler_task
            .lock()
            .expect("scheduler task lock")
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.audit.shutdown().await;
    }
}

/// Health thresholds follow the key-strength model: a key younger than
/// half the rotation interval is optimal, one inside the interval is
/// acceptable, and an overdue or missing key makes the service
/// unhealthy.
fn health_status(age: Option<ChronoDuration>, interval: ChronoDuration) -> HealthStatus {
    match age {
        Some(age) if age < interval / 2 => HealthStatus::Healthy,
        Some(age) if age < interval => HealthStatus::Degraded,
        Some(_) => HealthStatus::Unhealthy,
        None => HealthStatus::Unhealthy,
    }
}
