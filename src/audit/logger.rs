use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{CryptoError, CryptoResult};
use crate::metrics::Metrics;
use crate::signing::{self, SigningKeyPair};

/// Default bound on how long `record` may block the crypto path
pub const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_millis(50);

const CHANNEL_CAPACITY: usize = 1024;

/// Operation kinds recorded in the audit log
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditOperation {
    KeyGenerated,
    KeyRotated,
    KeyRevoked,
    Encrypted,
    Decrypted,
    OperationFailed,
}

/// Outcome recorded for an operation
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditResult {
    Success,
    Failure,
}

/// One immutable audit record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub operation: AuditOperation,
    pub key_id: String,
    pub timestamp: DateTime<Utc>,
    pub result: AuditResult,
    pub error_kind: Option<String>,
    /// Dilithium signature over the entry's canonical form, added by
    /// the writer task
    pub signature: Option<Vec<u8>>,
}

impl AuditEntry {
    /// Entry for a successful operation
    pub fn success(operation: AuditOperation, key_id: impl Into<String>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            operation,
            key_id: key_id.into(),
            timestamp: Utc::now(),
            result: AuditResult::Success,
            error_kind: None,
            signature: None,
        }
    }

    /// `OperationFailed` entry carrying the error kind
    pub fn failure(key_id: impl Into<String>, error: &CryptoError) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            operation: AuditOperation::OperationFailed,
            key_id: key_id.into(),
            timestamp: Utc::now(),
            result: AuditResult::Failure,
            error_kind: Some(error.audit_kind().to_string()),
            signature: None,
        }
    }

    /// Canonical byte form used for signing: the JSON encoding with the
    /// signature field cleared
    fn canonical_bytes(&self) -> CryptoResult<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        serde_json::to_vec(&unsigned).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Verify the entry's signature against the audit identity's public key
    pub fn verify_signature(
        &self,
        algorithm: crate::signing::DilithiumVariant,
        public_key: &[u8],
    ) -> CryptoResult<bool> {
        let signature = match &self.signature {
            Some(s) => s,
            None => return Ok(false),
        };
        signing::verify(algorithm, public_key, &self.canonical_bytes()?, signature)
    }
}

/// Filter for compliance queries over the audit log
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub key_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn for_key(key_id: impl Into<String>) -> Self {
        Self {
            key_id: Some(key_id.into()),
            ..Default::default()
        }
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}

enum AuditMessage {
    Entry(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// Append-only audit logger.
///
/// `record` pushes onto a bounded channel with a timeout; the writer
/// task signs and persists entries off the crypto critical path. On
/// timeout the calling operation still succeeds (fail-open for
/// availability) but the dropped entry is counted and escalated, so the
/// gap stays detectable.
pub struct AuditLogger {
    tx: mpsc::Sender<AuditMessage>,
    tree: sled::Tree,
    enabled: bool,
    timeout: Duration,
    metrics: Metrics,
    writer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Spawn the logger and its writer task over the `audit` tree.
    ///
    /// Entries are signed with `signer` (the service's audit identity);
    /// pass `None` only in tests that do not inspect signatures.
    pub fn spawn(
        db: &sled::Db,
        signer: Option<SigningKeyPair>,
        enabled: bool,
        timeout: Duration,
        metrics: Metrics,
    ) -> CryptoResult<Self> {
        let tree = db
            .open_tree("audit")
            .map_err(|e| CryptoError::storage("open_audit_tree", e))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let writer = tokio::spawn(writer_loop(rx, tree.clone(), signer));

        Ok(Self {
            tx,
            tree,
            enabled,
            timeout,
            metrics,
            writer: std::sync::Mutex::new(Some(writer)),
        })
    }

    /// Append an entry.
    ///
    /// Never returns an error and never blocks longer than the bounded
    /// timeout; failure to log is escalated as a high-severity internal
    /// event instead of failing the crypto operation.
    pub async fn record(&self, entry: AuditEntry) {
        if !self.enabled {
            return;
        }
        let deadline = tokio::time::timeout(self.timeout, self.tx.send(AuditMessage::Entry(entry)));
        match deadline.await {
            Ok(Ok(())) => {}
            _ => {
                self.metrics.record_audit_drop();
                log::error!(
                    "audit log write exceeded {:?}; entry dropped (gap is counted in metrics)",
                    self.timeout
                );
            }
        }
    }

    /// Lazy, restartable iterator over persisted entries matching the
    /// filter. Entries written after the query started may or may not
    /// be observed; the sequence is always finite.
    pub fn query(&self, filter: AuditFilter) -> AuditQuery {
        let iter = match &filter.key_id {
            Some(key_id) => {
                let mut prefix = key_id.as_bytes().to_vec();
                prefix.push(0);
                self.tree.scan_prefix(prefix)
            }
            None => self.tree.iter(),
        };
        AuditQuery { iter, filter }
    }

    /// Drain the channel and flush the durable tree. Used by shutdown
    /// and by tests that assert on persisted entries.
    pub async fn flush(&self) -> CryptoResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AuditMessage::Flush(reply_tx))
            .await
            .map_err(|_| CryptoError::Audit("writer task stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CryptoError::Audit("writer task stopped".to_string()))
    }

    /// Stop the writer task after draining pending entries
    pub async fn shutdown(&self) {
        let _ = self.flush().await;
        let handle = self.writer.lock().expect("writer handle lock").take();
        if let Some(handle) = handle {
            // Closing our sender would not stop the task while other
            // clones exist; aborting after a flush is equivalent since
            // the channel has been drained.
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// Iterator returned by [`AuditLogger::query`]
pub struct AuditQuery {
    iter: sled::Iter,
    filter: AuditFilter,
}

impl Iterator for AuditQuery {
    type Item = CryptoResult<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.iter.next()?;
            match item {
                Ok((_, value)) => match serde_json::from_slice::<AuditEntry>(&value) {
                    Ok(entry) => {
                        if self.filter.matches(&entry) {
                            return Some(Ok(entry));
                        }
                    }
                    Err(e) => return Some(Err(CryptoError::Serialization(e.to_string()))),
                },
                Err(e) => return Some(Err(CryptoError::storage("audit_scan", e))),
            }
        }
    }
}

/// Composite key: `key_id \0 timestamp_millis_be seq_be`, prefix-scannable
/// by key id and ordered by time within a key
fn composite_key(entry: &AuditEntry, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(entry.key_id.len() + 1 + 16);
    key.extend_from_slice(entry.key_id.as_bytes());
    key.push(0);
    key.extend_from_slice(&(entry.timestamp.timestamp_millis().max(0) as u64).to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

async fn writer_loop(
    mut rx: mpsc::Receiver<AuditMessage>,
    tree: sled::Tree,
    signer: Option<SigningKeyPair>,
) {
    let mut seq: u64 = 0;
    while let Some(message) = rx.recv().await {
        match message {
            AuditMessage::Entry(mut entry) => {
                if let Some(signer) = &signer {
                    match entry
                        .canonical_bytes()
                        .and_then(|bytes| signer.sign(&bytes))
                    {
                        Ok(signature) => entry.signature = Some(signature),
                        Err(e) => log::warn!("audit entry signing failed: {}", e),
                    }
                }
                let key = composite_key(&entry, seq);
                seq = seq.wrapping_add(1);
                match serde_json::to_vec(&entry) {
                    Ok(bytes) => {
                        if let Err(e) = tree.insert(key, bytes) {
                            log::error!("audit entry persist failed: {}", e);
                        }
                    }
                    Err(e) => log::error!("audit entry encode failed: {}", e),
                }
            }
            AuditMessage::Flush(reply) => {
                if let Err(e) = tree.flush() {
                    log::error!("audit flush failed: {}", e);
                }
                let _ = reply.send(());
            }
        }
    }
    let _ = tree.flush();
}
