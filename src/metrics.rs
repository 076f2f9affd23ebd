/*!
 * Operation counters exposed through `KeyService::metrics`
 */

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct MetricsInner {
    encryption_ops: AtomicU64,
    decryption_ops: AtomicU64,
    key_rotations: AtomicU64,
    error_count: AtomicU64,
    audit_entries_dropped: AtomicU64,
}

/// Shared atomic counters for service operations. Cloning shares the
/// underlying counters.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_encryption(&self) {
        self.inner.encryption_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decryption(&self) {
        self.inner.decryption_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation(&self) {
        self.inner.key_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.inner.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_audit_drop(&self) {
        self.inner
            .audit_entries_dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent point-in-time view of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            encryption_ops: self.inner.encryption_ops.load(Ordering::Relaxed),
            decryption_ops: self.inner.decryption_ops.load(Ordering::Relaxed),
            key_rotations: self.inner.key_rotations.load(Ordering::Relaxed),
            error_count: self.inner.error_count.load(Ordering::Relaxed),
            audit_entries_dropped: self.inner.audit_entries_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Counter values returned by `KeyService::metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub encryption_ops: u64,
    pub decryption_ops: u64,
    pub key_rotations: u64,
    pub error_count: u64,
    /// Audit entries lost to the bounded write timeout; a nonzero value
    /// means the append-only log has detectable gaps
    pub audit_entries_dropped: u64,
}
