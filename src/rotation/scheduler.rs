use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::audit::{AuditEntry, AuditLogger, AuditOperation};
use crate::error::{CryptoError, CryptoResult};
use crate::generator::KeyGenerator;
use crate::keystore::{KeyAlgorithm, KeyStore};
use crate::metrics::Metrics;

/// Scheduler tuning, resolved from the service configuration
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Algorithm whose key lifecycle this scheduler manages
    pub algorithm: KeyAlgorithm,
    /// Periodic threshold check (default 60s)
    pub tick_interval: Duration,
    /// Generation attempts per rotation before escalating
    pub retry_attempts: u32,
    /// Multiplier applied to the backoff delay after each failure
    pub backoff_factor: u32,
    /// First backoff delay
    pub backoff_base: Duration,
}

/// What caused a rotation to start; recorded in logs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationTrigger {
    /// Rotation deadline reached
    Expiry,
    /// Use-count budget spent
    UsageThreshold,
    /// Explicit request (engine exhaustion retry or operator)
    Forced,
}

/// Per-algorithm scheduler state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RotationState {
    Idle,
    /// A threshold was crossed but rotation has not succeeded yet; the
    /// expiring key keeps serving until it does
    RotationDue,
}

enum RotationCommand {
    RotateNow {
        algorithm: KeyAlgorithm,
        /// When set, skip the rotation if the active key is already
        /// fresh (another caller won the race) and reply with its id
        only_if_due: bool,
        reply: oneshot::Sender<CryptoResult<String>>,
    },
    NotifyUsage {
        algorithm: KeyAlgorithm,
    },
    Revoke {
        key_id: String,
        reply: oneshot::Sender<CryptoResult<()>>,
    },
    Shutdown,
}

/// Cloneable handle for talking to the scheduler task
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<RotationCommand>,
    revocation_epoch: Arc<watch::Sender<u64>>,
}

impl SchedulerHandle {
    /// Force a rotation and wait for the outcome. Returns the new
    /// active key id on success.
    pub async fn rotate_now(&self, algorithm: KeyAlgorithm) -> CryptoResult<String> {
        self.request_rotation(algorithm, false).await
    }

    /// Rotate only if a threshold is actually crossed; when another
    /// caller already rotated, replies with the fresh active key id
    /// instead of rotating again. Used by the engine when it loses the
    /// exhaustion race.
    pub async fn rotate_if_due(&self, algorithm: KeyAlgorithm) -> CryptoResult<String> {
        self.request_rotation(algorithm, true).await
    }

    async fn request_rotation(
        &self,
        algorithm: KeyAlgorithm,
        only_if_due: bool,
    ) -> CryptoResult<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RotationCommand::RotateNow {
                algorithm,
                only_if_due,
                reply,
            })
            .map_err(|_| CryptoError::Scheduler("scheduler stopped".to_string()))?;
        rx.await
            .map_err(|_| CryptoError::Scheduler("scheduler stopped".to_string()))?
    }

    /// Fire-and-forget notification that a key's use count advanced;
    /// the scheduler re-checks the rotation thresholds immediately
    /// instead of waiting for the next tick.
    pub fn notify_usage(&self, algorithm: KeyAlgorithm) {
        let _ = self.tx.send(RotationCommand::NotifyUsage { algorithm });
    }

    /// Operator revoke. Bumps the revocation epoch first so an
    /// in-flight rotation backoff is short-circuited, then applies the
    /// revocation in the scheduler task.
    pub async fn revoke(&self, key_id: &str) -> CryptoResult<()> {
        self.revocation_epoch.send_modify(|epoch| *epoch += 1);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RotationCommand::Revoke {
                key_id: key_id.to_string(),
                reply,
            })
            .map_err(|_| CryptoError::Scheduler("scheduler stopped".to_string()))?;
        rx.await
            .map_err(|_| CryptoError::Scheduler("scheduler stopped".to_string()))?
    }

    /// Stop the scheduler task
    pub fn shutdown(&self) {
        let _ = self.tx.send(RotationCommand::Shutdown);
    }
}

/// Background rotation task.
///
/// Rotation is strictly serialized: this task is the only place
/// rotations run, so no two rotations for the same service are ever in
/// flight simultaneously.
pub struct RotationScheduler {
    store: Arc<KeyStore>,
    generator: Arc<KeyGenerator>,
    audit: Arc<AuditLogger>,
    metrics: Metrics,
    last_rotation: Arc<RwLock<Option<DateTime<Utc>>>>,
    config: SchedulerConfig,
    states: HashMap<KeyAlgorithm, RotationState>,
    revocation_rx: watch::Receiver<u64>,
}

impl RotationScheduler {
    /// Spawn the scheduler task, returning its handle and join handle
    pub fn spawn(
        store: Arc<KeyStore>,
        generator: Arc<KeyGenerator>,
        audit: Arc<AuditLogger>,
        metrics: Metrics,
        last_rotation: Arc<RwLock<Option<DateTime<Utc>>>>,
        config: SchedulerConfig,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (epoch_tx, epoch_rx) = watch::channel(0u64);

        let mut states = HashMap::new();
        states.insert(config.algorithm, RotationState::Idle);

        let scheduler = Self {
            store,
            generator,
            audit,
            metrics,
            last_rotation,
            config,
            states,
            revocation_rx: epoch_rx,
        };

        let handle = SchedulerHandle {
            tx,
            revocation_epoch: Arc::new(epoch_tx),
        };
        let task = tokio::spawn(scheduler.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RotationCommand>) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        // The first interval tick completes immediately; consume it so
        // the initial threshold check happens one interval after start.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.on_tick().await;
                }
                command = rx.recv() => {
                    match command {
                        Some(RotationCommand::RotateNow { algorithm, only_if_due, reply }) => {
                            let result = self.handle_rotate_now(algorithm, only_if_due).await;
                            let _ = reply.send(result);
                        }
                        Some(RotationCommand::NotifyUsage { algorithm }) => {
                            self.check_due(algorithm, RotationTrigger::UsageThreshold).await;
                        }
                        Some(RotationCommand::Revoke { key_id, reply }) => {
                            let result = self.apply_revoke(&key_id).await;
                            let _ = reply.send(result);
                        }
                        Some(RotationCommand::Shutdown) | None => break,
                    }
                }
            }
        }
        log::debug!("rotation scheduler stopped");
    }

    async fn on_tick(&mut self) {
        let now = Utc::now();

        // Grace-period garbage collection: Retiring keys whose window
        // elapsed become Revoked.
        match self.store.collect_expired_grace(now) {
            Ok(collected) => {
                for key_id in collected {
                    log::info!("key {} grace period elapsed; revoked", key_id);
                    self.audit
                        .record(AuditEntry::success(AuditOperation::KeyRevoked, &key_id))
                        .await;
                }
            }
            Err(e) => log::error!("grace-period collection failed: {}", e),
        }

        self.check_due(self.config.algorithm, RotationTrigger::Expiry).await;
    }

    async fn handle_rotate_now(
        &mut self,
        algorithm: KeyAlgorithm,
        only_if_due: bool,
    ) -> CryptoResult<String> {
        if only_if_due && !self.store.rotation_due(algorithm, Utc::now())? {
            // Another caller already rotated; hand back the fresh key.
            return Ok(self.store.get_active_key(algorithm)?.key_id);
        }
        self.rotate(algorithm, RotationTrigger::Forced).await
    }

    async fn check_due(&mut self, algorithm: KeyAlgorithm, trigger: RotationTrigger) {
        match self.store.rotation_due(algorithm, Utc::now()) {
            Ok(true) => {
                self.states.insert(algorithm, RotationState::RotationDue);
                // Failure keeps the state at RotationDue; the expiring
                // key continues serving and the next tick retries.
                let _ = self.rotate(algorithm, trigger).await;
            }
            Ok(false) => {}
            Err(e) => log::error!("rotation-due check failed for {}: {}", algorithm, e),
        }
    }

    /// Run one rotation: generate (off the scheduler thread), publish
    /// through the store, audit. Retries with exponential backoff on
    /// generation failure; an operator revoke short-circuits the
    /// backoff sleep.
    async fn rotate(
        &mut self,
        algorithm: KeyAlgorithm,
        trigger: RotationTrigger,
    ) -> CryptoResult<String> {
        let expiring = self.store.get_active_key(algorithm).ok().map(|r| r.key_id);
        log::info!(
            "rotating {} (trigger {:?}, expiring key {:?})",
            algorithm,
            trigger,
            expiring
        );

        // Mark the current epoch as seen so only revokes issued during
        // this rotation cancel it.
        let _ = self.revocation_rx.borrow_and_update();

        let attempts = self.config.retry_attempts.max(1);
        let mut delay = self.config.backoff_base;
        let mut last_cause = String::new();

        for attempt in 1..=attempts {
            let generator = Arc::clone(&self.generator);
            let generated = tokio::task::spawn_blocking(move || generator.generate(algorithm))
                .await
                .unwrap_or_else(|e| {
                    Err(CryptoError::Scheduler(format!(
                        "key generation task failed: {}",
                        e
                    )))
                });

            let result = generated.and_then(|material| self.store.generate_key(algorithm, material));
            match result {
                Ok(record) => {
                    let operation = if expiring.is_some() {
                        AuditOperation::KeyRotated
                    } else {
                        AuditOperation::KeyGenerated
                    };
                    if expiring.is_some() {
                        self.metrics.record_rotation();
                    }
                    *self
                        .last_rotation
                        .write()
                        .map_err(|_| CryptoError::LockPoisoned)? = Some(Utc::now());
                    self.audit
                        .record(AuditEntry::success(operation, &record.key_id))
                        .await;
                    self.states.insert(algorithm, RotationState::Idle);
                    log::info!("rotated {} to {}", algorithm, record.key_id);
                    return Ok(record.key_id);
                }
                Err(e) => {
                    last_cause = e.to_string();
                    self.metrics.record_error();
                    self.audit
                        .record(AuditEntry::failure(
                            expiring.clone().unwrap_or_default(),
                            &e,
                        ))
                        .await;
                    log::warn!(
                        "rotation attempt {}/{} for {} failed: {}",
                        attempt,
                        attempts,
                        algorithm,
                        e
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.revocation_rx.changed() => {
                            self.states.insert(algorithm, RotationState::RotationDue);
                            log::warn!("rotation of {} cancelled by operator revoke", algorithm);
                            return Err(CryptoError::RotationCancelled { algorithm });
                        }
                    }
                    delay *= self.config.backoff_factor.max(1);
                }
            }
        }

        self.states.insert(algorithm, RotationState::RotationDue);
        log::error!(
            "rotation of {} failed after {} attempts; continuing to serve the expiring key",
            algorithm,
            attempts
        );
        Err(CryptoError::RotationFailed {
            attempts,
            cause: last_cause,
        })
    }

    async fn apply_revoke(&mut self, key_id: &str) -> CryptoResult<()> {
        match self.store.revoke(key_id) {
            Ok(()) => {
                log::warn!("key {} revoked by operator", key_id);
                self.audit
                    .record(AuditEntry::success(AuditOperation::KeyRevoked, key_id))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error();
                self.audit.record(AuditEntry::failure(key_id, &e)).await;
                Err(e)
            }
        }
    }
}
