//! RocksDB-backed task store
//!
//! Provides persistent storage with column families for logical data separation.
//! Uses bincode for efficient binary serialization internally.
//!
//! Reads share the database lock; every conditional write takes it
//! exclusively for its read-check-write, so compare-and-set is atomic within
//! the process. RocksDB itself refuses a second process on the same path.

use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::rules::{IgnoreRule, RuleStore};
use super::schema::{self, keys, ALL_CFS};
use super::store::{MarkOutcome, SharedTaskStore, StoreError, StoreResult, TaskStore};
use crate::collab::AuthOutcome;
use crate::escalation::{Escalation, EscalationChain};
use crate::status::TaskStatus;
use crate::task::{Response, TaskRecord};

/// RocksDB-backed persistent task store
pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create a task store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedTaskStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, DB>> {
        self.db.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, DB>> {
        self.db.write().map_err(|_| StoreError::LockPoisoned)
    }

    // =========================================================================
    // Generic operations (caller holds the lock)
    // =========================================================================

    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    fn put<T: Serialize>(db: &DB, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let cf = Self::cf(db, cf_name)?;
        db.put_cf(&cf, key.as_bytes(), Self::encode(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let cf = Self::cf(db, cf_name)?;
        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn cf<'a>(db: &'a DB, cf_name: &str) -> StoreResult<&'a ColumnFamily> {
        db.cf_handle(cf_name)
            .ok_or_else(|| StoreError::Backend(format!("column family not found: {}", cf_name)))
    }

    /// Decode every entry whose key starts with `prefix`, in key order
    fn scan_keyed<T: DeserializeOwned>(
        db: &DB,
        cf_name: &str,
        prefix: &str,
    ) -> StoreResult<Vec<(Vec<u8>, T)>> {
        let cf = Self::cf(db, cf_name)?;
        let mut entries = Vec::new();

        for result in db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, value) = result?;
            if !key.starts_with(prefix.as_bytes()) {
                break; // Prefix no longer matches
            }
            entries.push((key.to_vec(), Self::decode(&value)?));
        }

        Ok(entries)
    }

    /// Decode every value whose key starts with `prefix`
    fn scan<T: DeserializeOwned>(db: &DB, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        Ok(Self::scan_keyed(db, cf_name, prefix)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Alert row stripped of its chain; the chain lives in its own rows.
    fn alert_row(record: &TaskRecord) -> TaskRecord {
        TaskRecord {
            escalation: EscalationChain::empty(),
            ..record.clone()
        }
    }

    fn load_chain(db: &DB, hash: &str) -> StoreResult<EscalationChain> {
        let rows: Vec<Escalation> =
            Self::scan(db, schema::CF_ESCALATION, &keys::escalation_prefix(hash))?;
        EscalationChain::new(rows).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    fn load(db: &DB, hash: &str) -> StoreResult<Option<TaskRecord>> {
        let Some(mut record) = Self::get::<TaskRecord>(db, schema::CF_ALERTS, &keys::alert(hash))?
        else {
            return Ok(None);
        };
        record.escalation = Self::load_chain(db, hash)?;
        Ok(Some(record))
    }

    fn load_all(db: &DB) -> StoreResult<Vec<TaskRecord>> {
        let rows: Vec<TaskRecord> = Self::scan(db, schema::CF_ALERTS, keys::ALERT_PREFIX)?;
        rows.into_iter()
            .map(|mut record| {
                record.escalation = Self::load_chain(db, &record.hash)?;
                Ok(record)
            })
            .collect()
    }

    fn require(db: &DB, hash: &str) -> StoreResult<TaskRecord> {
        Self::get::<TaskRecord>(db, schema::CF_ALERTS, &keys::alert(hash))?
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))
    }
}

#[async_trait]
impl TaskStore for RocksStore {
    async fn insert(&self, record: &TaskRecord) -> StoreResult<()> {
        let db = self.write()?;
        let alert_key = keys::alert(&record.hash);
        if Self::get::<TaskRecord>(&db, schema::CF_ALERTS, &alert_key)?.is_some() {
            return Err(StoreError::Duplicate(record.hash.clone()));
        }

        let alerts = Self::cf(&db, schema::CF_ALERTS)?;
        let escalation = Self::cf(&db, schema::CF_ESCALATION)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&alerts, alert_key.as_bytes(), Self::encode(&Self::alert_row(record))?);
        for (index, entry) in record.escalation.iter().enumerate() {
            let key = keys::escalation(&record.hash, index);
            batch.put_cf(&escalation, key.as_bytes(), Self::encode(entry)?);
        }
        db.write(batch)?;
        Ok(())
    }

    async fn get(&self, hash: &str) -> StoreResult<Option<TaskRecord>> {
        let db = self.read()?;
        Self::load(&db, hash)
    }

    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>> {
        let db = self.read()?;
        let rows: Vec<TaskRecord> = Self::scan(&db, schema::CF_ALERTS, keys::ALERT_PREFIX)?;
        rows.into_iter()
            .filter(|r| r.status == status)
            .map(|mut record| {
                record.escalation = Self::load_chain(&db, &record.hash)?;
                Ok(record)
            })
            .collect()
    }

    async fn list_all(&self) -> StoreResult<Vec<TaskRecord>> {
        let db = self.read()?;
        Self::load_all(&db)
    }

    async fn escalations(&self, hash: &str) -> StoreResult<Vec<Escalation>> {
        let db = self.read()?;
        Self::require(&db, hash)?;
        Ok(Self::load_chain(&db, hash)?.entries().to_vec())
    }

    async fn update_status(
        &self,
        hash: &str,
        expected: Option<TaskStatus>,
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let db = self.write()?;
        let mut row = Self::require(&db, hash)?;
        if expected.is_some_and(|e| e != row.status) {
            return Ok(false);
        }
        row.apply_status(to, at);
        Self::put(&db, schema::CF_ALERTS, &keys::alert(hash), &row)?;
        Ok(true)
    }

    async fn record_response(
        &self,
        hash: &str,
        response: &Response,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let db = self.write()?;
        let mut row = Self::require(&db, hash)?;
        if row.status != TaskStatus::InProgress {
            return Ok(false);
        }
        row.apply_response(response, at);
        Self::put(&db, schema::CF_ALERTS, &keys::alert(hash), &row)?;
        Ok(true)
    }

    async fn reopen(
        &self,
        hash: &str,
        waiting_since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let db = self.write()?;
        let mut row = Self::require(&db, hash)?;
        if row.status != TaskStatus::InProgress || row.waiting_since != Some(waiting_since) {
            return Ok(false);
        }
        row.apply_status(TaskStatus::Open, at);
        Self::put(&db, schema::CF_ALERTS, &keys::alert(hash), &row)?;
        Ok(true)
    }

    async fn mark_escalated(
        &self,
        hash: &str,
        subject: &str,
        delay_secs: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome> {
        let db = self.write()?;
        let row = Self::require(&db, hash)?;

        let rows: Vec<(Vec<u8>, Escalation)> =
            Self::scan_keyed(&db, schema::CF_ESCALATION, &keys::escalation_prefix(hash))?;
        let Some((key, mut entry)) = rows
            .into_iter()
            .find(|(_, e)| e.matches(subject, delay_secs))
        else {
            return Ok(MarkOutcome::UnknownEscalation);
        };
        if let Some(prev) = entry.notified_at {
            return Ok(MarkOutcome::AlreadyNotified(prev));
        }
        if row.status != TaskStatus::InProgress {
            return Ok(MarkOutcome::WrongStatus(row.status));
        }

        entry.notified_at = Some(at);
        let cf = Self::cf(&db, schema::CF_ESCALATION)?;
        db.put_cf(&cf, &key, Self::encode(&entry)?)?;
        Ok(MarkOutcome::Marked)
    }

    async fn mark_challenged(&self, hash: &str, at: DateTime<Utc>) -> StoreResult<MarkOutcome> {
        let db = self.write()?;
        let mut row = Self::require(&db, hash)?;
        if row.status != TaskStatus::Verification {
            return Ok(MarkOutcome::WrongStatus(row.status));
        }
        if let Some(prev) = row.challenged_at {
            return Ok(MarkOutcome::AlreadyNotified(prev));
        }
        row.challenged_at = Some(at);
        row.updated_at = at;
        Self::put(&db, schema::CF_ALERTS, &keys::alert(hash), &row)?;
        Ok(MarkOutcome::Marked)
    }

    async fn record_auth_outcome(
        &self,
        hash: &str,
        outcome: AuthOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AuthOutcome>> {
        let db = self.write()?;
        let mut row = Self::require(&db, hash)?;
        if row.status != TaskStatus::Verification {
            return Ok(None);
        }
        if let Some(prev) = row.auth_outcome {
            return Ok(Some(prev));
        }
        row.auth_outcome = Some(outcome);
        row.updated_at = at;
        Self::put(&db, schema::CF_ALERTS, &keys::alert(hash), &row)?;
        Ok(Some(outcome))
    }
}

#[async_trait]
impl RuleStore for RocksStore {
    async fn put_ignore(&self, rule: &IgnoreRule) -> StoreResult<()> {
        let db = self.write()?;
        Self::put(&db, schema::CF_IGNORED, &keys::ignore(&rule.ldap, &rule.title), rule)
    }

    async fn get_ignore(&self, ldap: &str, title: &str) -> StoreResult<Option<IgnoreRule>> {
        let db = self.read()?;
        Self::get(&db, schema::CF_IGNORED, &keys::ignore(ldap, title))
    }

    async fn list_ignores(&self) -> StoreResult<Vec<IgnoreRule>> {
        let db = self.read()?;
        Self::scan(&db, schema::CF_IGNORED, keys::IGNORE_PREFIX)
    }

    async fn add_blacklist(&self, ldap: &str) -> StoreResult<bool> {
        let db = self.write()?;
        let key = keys::blacklist(ldap);
        if Self::get::<String>(&db, schema::CF_BLACKLIST, &key)?.is_some() {
            return Ok(false);
        }
        Self::put(&db, schema::CF_BLACKLIST, &key, &ldap.to_string())?;
        Ok(true)
    }

    async fn is_blacklisted(&self, ldap: &str) -> StoreResult<bool> {
        let db = self.read()?;
        Ok(Self::get::<String>(&db, schema::CF_BLACKLIST, &keys::blacklist(ldap))?.is_some())
    }

    async fn list_blacklist(&self) -> StoreResult<Vec<String>> {
        let db = self.read()?;
        Self::scan(&db, schema::CF_BLACKLIST, keys::BLACKLIST_PREFIX)
    }
}
