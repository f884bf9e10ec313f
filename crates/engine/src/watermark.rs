//! Watermark store: durable "last processed" markers.
//!
//! Two key families live here:
//! - `last_check_time`: timestamp of the newest notified feed event
//! - `issue/<id>`: last-known pipeline id of a board issue
//!
//! The backing cache is best-effort. Entries may be evicted at any time, so a
//! miss or a backend error is treated exactly like "never seen" and a failed
//! write is only logged. The worst outcome is a duplicate notification on the
//! next cycle.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use boardwatch_common::error::AppError;
use boardwatch_common::types::{format_timestamp, parse_timestamp};

/// Key of the event-feed watermark.
pub const LAST_CHECK_TIME_KEY: &str = "last_check_time";

/// Key of a board issue's last-known pipeline.
pub fn issue_key(issue_id: &str) -> String {
    format!("issue/{}", issue_id)
}

/// Raw key/value access to the watermark cache.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
}

/// Redis-backed watermark store. Keys carry no TTL.
#[derive(Clone)]
pub struct RedisWatermarkStore {
    redis: ConnectionManager,
}

impl RedisWatermarkStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl WatermarkStore for RedisWatermarkStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}

/// Process-local store, used by tests and single-process dry runs.
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove an entry, as an eviction by the real cache would.
    pub fn evict(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map of strings.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Read a key, folding every failure into "not found".
pub async fn get_or_unseen(store: &dyn WatermarkStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            tracing::debug!(key, "Watermark not in cache");
            None
        }
        Err(e) => {
            tracing::error!(key, error = %e, "Failed to read watermark, treating as unseen");
            None
        }
    }
}

/// Write a key, logging and swallowing failures.
pub async fn set_or_log(store: &dyn WatermarkStore, key: &str, value: &str) -> bool {
    match store.set(key, value).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(key, value, error = %e, "Failed to write watermark");
            false
        }
    }
}

/// Load `last_check_time`. A malformed stored value counts as absent.
pub async fn load_last_check_time(store: &dyn WatermarkStore) -> Option<DateTime<Utc>> {
    let raw = get_or_unseen(store, LAST_CHECK_TIME_KEY).await?;
    match parse_timestamp(&raw) {
        Ok(at) => Some(at),
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "Stored last_check_time is malformed, ignoring");
            None
        }
    }
}

pub async fn store_last_check_time(store: &dyn WatermarkStore, at: DateTime<Utc>) -> bool {
    set_or_log(store, LAST_CHECK_TIME_KEY, &format_timestamp(at)).await
}

pub async fn load_issue_pipeline(store: &dyn WatermarkStore, issue_id: &str) -> Option<String> {
    get_or_unseen(store, &issue_key(issue_id)).await
}

pub async fn store_issue_pipeline(
    store: &dyn WatermarkStore,
    issue_id: &str,
    pipeline_id: &str,
) -> bool {
    set_or_log(store, &issue_key(issue_id), pipeline_id).await
}
