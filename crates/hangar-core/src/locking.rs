// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource locking primitives.
//!
//! Two layers:
//!
//! - [`ResourceLocker`]: process-local locksets, one per namespace (resource
//!   kind), holding the keys currently owned by some task in this process.
//! - [`AdvisoryLocker`]: PostgreSQL session advisory locks for exclusivity
//!   across server replicas.
//!
//! In-process locksets are a short-circuit only. Anything that mutates shared
//! state pairs them with a database-visible claim (lease token or advisory lock).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;

/// Backoff between attempts in [`ResourceLocker::lock`].
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// In-process locksets
// ============================================================================

/// Keys currently held in one namespace, plus the mutex that serializes
/// select-then-claim sequences on it.
#[derive(Debug)]
pub struct Lockset {
    namespace: String,
    mutex: tokio::sync::Mutex<()>,
    keys: Mutex<HashSet<String>>,
}

impl Lockset {
    fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            mutex: tokio::sync::Mutex::new(()),
            keys: Mutex::new(HashSet::new()),
        }
    }

    /// Namespace this lockset guards.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Acquire the namespace mutex.
    ///
    /// Hold it across "read locked keys, query the store, claim" so two tasks
    /// in this process cannot pick the same row.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.mutex.lock().await
    }

    /// Whether `key` is currently held.
    pub fn contains(&self, key: &str) -> bool {
        self.keys().contains(key)
    }

    /// Snapshot of the held keys.
    pub fn locked_keys(&self) -> Vec<String> {
        self.keys().iter().cloned().collect()
    }

    /// Snapshot of the held keys that are UUIDs.
    pub fn locked_ids(&self) -> Vec<Uuid> {
        self.keys()
            .iter()
            .filter_map(|k| Uuid::parse_str(k).ok())
            .collect()
    }

    /// Number of held keys.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Whether no key is held.
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Claim all `keys` if none of them is held.
    ///
    /// Test and insert happen under one lock of the key set.
    pub fn try_claim<I, K>(self: &Arc<Self>, keys: I) -> Option<KeyLockGuard>
    where
        I: IntoIterator<Item = K>,
        K: ToString,
    {
        let keys = sorted_keys(keys);
        let mut held = self.keys();
        if keys.iter().any(|k| held.contains(k)) {
            return None;
        }
        held.extend(keys.iter().cloned());
        drop(held);

        Some(KeyLockGuard {
            lockset: Arc::clone(self),
            keys,
        })
    }

    fn release(&self, keys: &[String]) {
        let mut held = self.keys();
        for key in keys {
            held.remove(key);
        }
    }

    fn keys(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its keys from the lockset when dropped, on every exit path.
#[derive(Debug)]
pub struct KeyLockGuard {
    lockset: Arc<Lockset>,
    keys: Vec<String>,
}

impl KeyLockGuard {
    /// Keys held by this guard, sorted.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        self.lockset.release(&self.keys);
    }
}

/// Process-local registry of locksets keyed by namespace.
///
/// Construct one per process and share it; tests create isolated instances.
#[derive(Debug, Default)]
pub struct ResourceLocker {
    locksets: Mutex<HashMap<String, Arc<Lockset>>>,
}

impl ResourceLocker {
    /// Create an empty locker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lockset for `namespace`, creating it on first use.
    pub fn get_lockset(&self, namespace: &str) -> Arc<Lockset> {
        let mut locksets = self
            .locksets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locksets
                .entry(namespace.to_string())
                .or_insert_with(|| Arc::new(Lockset::new(namespace))),
        )
    }

    /// Wait until every key in `keys` is free, then hold them all.
    ///
    /// Keys are sorted and deduplicated first. The namespace mutex is held only
    /// while testing and inserting, never while waiting. There is no timeout;
    /// holders are expected to be short-lived.
    pub async fn lock<I, K>(&self, namespace: &str, keys: I) -> KeyLockGuard
    where
        I: IntoIterator<Item = K>,
        K: ToString,
    {
        let lockset = self.get_lockset(namespace);
        let keys = sorted_keys(keys);
        loop {
            {
                let _guard = lockset.lock().await;
                if let Some(held) = lockset.try_claim(keys.iter()) {
                    return held;
                }
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }
}

fn sorted_keys<I, K>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = K>,
    K: ToString,
{
    let mut keys: Vec<String> = keys.into_iter().map(|k| k.to_string()).collect();
    keys.sort();
    keys.dedup();
    keys
}

// ============================================================================
// Advisory locks
// ============================================================================

/// Stable 63-bit lock id for `resource`: the low 63 bits of its SHA-256 digest.
pub fn advisory_lock_id(resource: &str) -> i64 {
    let digest = Sha256::digest(resource.as_bytes());
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&digest[digest.len() - 8..]);
    (u64::from_be_bytes(tail) & (i64::MAX as u64)) as i64
}

/// Cross-replica advisory locks.
///
/// Stores without advisory locks get the `Unsupported` variant, whose locks are
/// no-ops that always report success.
#[derive(Debug, Clone)]
pub enum AdvisoryLocker {
    /// Session-scoped `pg_advisory_lock` on a dedicated pool connection.
    Postgres(PgPool),
    /// No cross-process exclusivity.
    Unsupported,
}

impl AdvisoryLocker {
    /// Block until the lock for `resource` is held.
    pub async fn lock(&self, resource: &str) -> Result<AdvisoryLockGuard, CoreError> {
        let lock_id = advisory_lock_id(resource);
        match self {
            Self::Postgres(pool) => {
                let mut conn = pool.acquire().await?;
                sqlx::query("SELECT pg_advisory_lock($1)")
                    .bind(lock_id)
                    .execute(&mut *conn)
                    .await?;
                debug!(resource, lock_id, "Advisory lock acquired");
                Ok(AdvisoryLockGuard::held(conn, resource, lock_id))
            }
            Self::Unsupported => Ok(AdvisoryLockGuard::noop(resource, lock_id)),
        }
    }

    /// Try to take the lock for `resource` without blocking.
    ///
    /// Returns `None` if another session holds it; nothing needs unlocking then.
    pub async fn try_lock(&self, resource: &str) -> Result<Option<AdvisoryLockGuard>, CoreError> {
        let lock_id = advisory_lock_id(resource);
        match self {
            Self::Postgres(pool) => {
                let mut conn = pool.acquire().await?;
                let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
                    .bind(lock_id)
                    .fetch_one(&mut *conn)
                    .await?;
                if !acquired {
                    debug!(resource, lock_id, "Advisory lock busy");
                    return Ok(None);
                }
                Ok(Some(AdvisoryLockGuard::held(conn, resource, lock_id)))
            }
            Self::Unsupported => Ok(Some(AdvisoryLockGuard::noop(resource, lock_id))),
        }
    }

    /// Run `f` while holding the lock for `resource`.
    pub async fn with_lock<F, Fut, T>(&self, resource: &str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let guard = self.lock(resource).await?;
        let out = f().await;
        guard.release().await?;
        Ok(out)
    }
}

/// A held advisory lock.
///
/// Call [`release`](Self::release) to unlock. Dropping without releasing closes
/// the underlying session, which frees the lock on the server.
#[derive(Debug)]
pub struct AdvisoryLockGuard {
    conn: Option<PoolConnection<sqlx::Postgres>>,
    resource: String,
    lock_id: i64,
}

impl AdvisoryLockGuard {
    fn held(conn: PoolConnection<sqlx::Postgres>, resource: &str, lock_id: i64) -> Self {
        Self {
            conn: Some(conn),
            resource: resource.to_string(),
            lock_id,
        }
    }

    fn noop(resource: &str, lock_id: i64) -> Self {
        Self {
            conn: None,
            resource: resource.to_string(),
            lock_id,
        }
    }

    /// Numeric lock id.
    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }

    /// Unlock and return the connection to the pool.
    pub async fn release(mut self) -> Result<(), CoreError> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.lock_id)
                .execute(&mut *conn)
                .await?;
            debug!(resource = %self.resource, lock_id = self.lock_id, "Advisory lock released");
        }
        Ok(())
    }
}

impl Drop for AdvisoryLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                resource = %self.resource,
                lock_id = self.lock_id,
                "Advisory lock dropped without release, closing session"
            );
            drop(conn.detach());
        }
    }
}
