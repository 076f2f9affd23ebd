use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{CryptoError, CryptoResult};
use crate::generator::KeyMaterial;
use crate::keystore::record::{mint_key_id, KeyAlgorithm, KeyRecord, KeyStatus, StoredKeyRecord};

/// Lifecycle policy applied to every key the store creates
#[derive(Clone, Copy, Debug)]
pub struct StorePolicy {
    /// Time from creation to the rotation deadline
    pub rotation_interval: Duration,
    /// How long a Retiring key may still decrypt
    pub grace_period: Duration,
    /// Encryption-use budget per key
    pub max_uses: u64,
}

/// The single source of truth for key material and lifecycle state.
///
/// Mutating operations are serialized behind the write lock; reads of
/// the current active key proceed concurrently. A revoke is visible to
/// every subsequent read-lock acquisition, so no new encryption can
/// observe a revoked key.
///
/// Every mutation persists the record's public projection to the
/// durable `keys` tree. Private key material never reaches the tree:
/// [`StoredKeyRecord`] has no field for it, and the sealed containers
/// cannot be serialized.
pub struct KeyStore {
    records: RwLock<HashMap<String, KeyRecord>>,
    tree: sled::Tree,
    policy: StorePolicy,
}

impl KeyStore {
    /// Open the store over the `keys` tree of the given database.
    ///
    /// The in-memory map starts empty: persisted records from earlier
    /// process lifetimes have no private material and are retained in
    /// the tree for compliance inspection only. Decrypting against
    /// them reports `KeyNotFound`.
    pub fn open(db: &sled::Db, policy: StorePolicy) -> CryptoResult<Self> {
        let tree = db
            .open_tree("keys")
            .map_err(|e| CryptoError::storage("open_keys_tree", e))?;
        Ok(Self {
            records: RwLock::new(HashMap::new()),
            tree,
            policy,
        })
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    /// Install freshly generated material as the Active key for its
    /// algorithm, atomically demoting the prior Active key (if any) to
    /// Retiring. The demotion and the insertion happen inside one write
    /// critical section, so concurrent readers observe either the old
    /// key or the new one, never an intermediate state.
    pub fn generate_key(
        &self,
        algorithm: KeyAlgorithm,
        material: KeyMaterial,
    ) -> CryptoResult<KeyRecord> {
        let now = Utc::now();
        let mut records = self.records.write().map_err(|_| CryptoError::LockPoisoned)?;

        let mut demoted = Vec::new();
        for record in records.values_mut() {
            if record.algorithm == algorithm && record.status == KeyStatus::Active {
                record.status = KeyStatus::Retiring;
                record.retired_at = Some(now);
                demoted.push(StoredKeyRecord::from(&*record));
            }
        }

        let mut key_id = mint_key_id(now);
        while records.contains_key(&key_id) {
            key_id = mint_key_id(now);
        }

        let record = KeyRecord {
            key_id: key_id.clone(),
            algorithm,
            public_key: material.public_key,
            private_key: material.private_key,
            signing_public_key: material.signing_public_key,
            signing_private_key: material.signing_private_key,
            created_at: now,
            expires_at: now + self.policy.rotation_interval,
            retired_at: None,
            max_uses: self.policy.max_uses,
            use_count: 0,
            status: KeyStatus::Active,
        };

        records.insert(key_id, record.clone());
        drop(records);

        for stored in &demoted {
            self.persist(stored)?;
        }
        self.persist(&StoredKeyRecord::from(&record))?;

        Ok(record)
    }

    /// Current Active key for the algorithm
    ///
    /// # Errors
    ///
    /// `NoActiveKey` when none exists, e.g. at cold start before the
    /// first generation.
    pub fn get_active_key(&self, algorithm: KeyAlgorithm) -> CryptoResult<KeyRecord> {
        let records = self.records.read().map_err(|_| CryptoError::LockPoisoned)?;
        records
            .values()
            .find(|r| r.algorithm == algorithm && r.status == KeyStatus::Active)
            .cloned()
            .ok_or(CryptoError::NoActiveKey { algorithm })
    }

    /// Look up a key by id regardless of status
    pub fn get_key(&self, key_id: &str) -> CryptoResult<KeyRecord> {
        let records = self.records.read().map_err(|_| CryptoError::LockPoisoned)?;
        records.get(key_id).cloned().ok_or_else(|| CryptoError::KeyNotFound {
            key_id: key_id.to_string(),
        })
    }

    /// Look up a key for decryption, enforcing the status rules:
    /// Active always decrypts, Retiring only inside its grace period,
    /// Revoked never. The grace check does not depend on the scheduler
    /// tick having collected the record yet.
    pub fn key_for_decrypt(&self, key_id: &str) -> CryptoResult<KeyRecord> {
        self.key_for_decrypt_at(key_id, Utc::now())
    }

    pub(crate) fn key_for_decrypt_at(
        &self,
        key_id: &str,
        now: DateTime<Utc>,
    ) -> CryptoResult<KeyRecord> {
        let record = self.get_key(key_id)?;
        match record.status {
            KeyStatus::Active => Ok(record),
            KeyStatus::Retiring if record.in_grace(now, self.policy.grace_period) => Ok(record),
            _ => Err(CryptoError::KeyRevoked {
                key_id: key_id.to_string(),
            }),
        }
    }

    /// Count one successful encryption against the key.
    ///
    /// Fails with `KeyExhausted` once the budget is spent, forcing the
    /// caller to request a rotation before further encryptions. A
    /// record that was demoted to Retiring after the caller resolved it
    /// still counts its in-flight use; only Revoked is refused.
    pub fn increment_use(&self, key_id: &str) -> CryptoResult<u64> {
        let mut records = self.records.write().map_err(|_| CryptoError::LockPoisoned)?;
        let record = records.get_mut(key_id).ok_or_else(|| CryptoError::KeyNotFound {
            key_id: key_id.to_string(),
        })?;

        if record.status == KeyStatus::Revoked {
            return Err(CryptoError::KeyRevoked {
                key_id: key_id.to_string(),
            });
        }
        if record.use_count >= record.max_uses {
            return Err(CryptoError::KeyExhausted {
                key_id: key_id.to_string(),
                max_uses: record.max_uses,
            });
        }

        record.use_count += 1;
        let count = record.use_count;
        let stored = StoredKeyRecord::from(&*record);
        drop(records);

        self.persist(&stored)?;
        Ok(count)
    }

    /// Transition a key to Revoked, immediately and irreversibly.
    /// Revoking an already-revoked key is a no-op that still succeeds.
    pub fn revoke(&self, key_id: &str) -> CryptoResult<()> {
        let mut records = self.records.write().map_err(|_| CryptoError::LockPoisoned)?;
        let record = records.get_mut(key_id).ok_or_else(|| CryptoError::KeyNotFound {
            key_id: key_id.to_string(),
        })?;

        if record.status == KeyStatus::Revoked {
            return Ok(());
        }

        record.status = KeyStatus::Revoked;
        if record.retired_at.is_none() {
            record.retired_at = Some(Utc::now());
        }
        let stored = StoredKeyRecord::from(&*record);
        drop(records);

        self.persist(&stored)
    }

    /// Collect Retiring records whose grace period has elapsed,
    /// transitioning them to Revoked. Returns the ids of the keys that
    /// were collected; the caller records the audit entries.
    pub fn collect_expired_grace(&self, now: DateTime<Utc>) -> CryptoResult<Vec<String>> {
        let mut records = self.records.write().map_err(|_| CryptoError::LockPoisoned)?;

        let mut collected = Vec::new();
        let mut stored = Vec::new();
        for record in records.values_mut() {
            if record.status == KeyStatus::Retiring
                && !record.in_grace(now, self.policy.grace_period)
            {
                record.status = KeyStatus::Revoked;
                collected.push(record.key_id.clone());
                stored.push(StoredKeyRecord::from(&*record));
            }
        }
        drop(records);

        for record in &stored {
            self.persist(record)?;
        }
        Ok(collected)
    }

    /// Age of the current active key, if one exists
    pub fn active_key_age(&self, algorithm: KeyAlgorithm) -> CryptoResult<Option<Duration>> {
        let records = self.records.read().map_err(|_| CryptoError::LockPoisoned)?;
        Ok(records
            .values()
            .find(|r| r.algorithm == algorithm && r.status == KeyStatus::Active)
            .map(|r| r.age(Utc::now())))
    }

    /// Whether the algorithm's active key has crossed a rotation
    /// threshold (expiry or use budget), or no active key exists at all
    pub fn rotation_due(&self, algorithm: KeyAlgorithm, now: DateTime<Utc>) -> CryptoResult<bool> {
        let records = self.records.read().map_err(|_| CryptoError::LockPoisoned)?;
        match records
            .values()
            .find(|r| r.algorithm == algorithm && r.status == KeyStatus::Active)
        {
            Some(record) => Ok(record.is_expired(now) || record.is_exhausted()),
            None => Ok(true),
        }
    }

    fn persist(&self, record: &StoredKeyRecord) -> CryptoResult<()> {
        let bytes = bincode::serialize(record)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        self.tree
            .insert(record.key_id.as_bytes(), bytes)
            .map_err(|e| CryptoError::storage("persist_key_record", e))?;
        Ok(())
    }

    /// Read a persisted record projection straight from the durable
    /// tree (compliance inspection; survives restarts).
    pub fn stored_record(&self, key_id: &str) -> CryptoResult<Option<StoredKeyRecord>> {
        match self
            .tree
            .get(key_id.as_bytes())
            .map_err(|e| CryptoError::storage("read_key_record", e))?
        {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| CryptoError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}
