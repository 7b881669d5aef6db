//! Idempotency store: check-and-lock on a client-supplied request key.
//!
//! Every mutating command carries an `x-idempotency-key`. The store maps
//! that key to `{status, cached response}` with a TTL:
//!
//! - `check_and_lock` atomically claims the key (set-if-not-exists). The
//!   winner owns the request and must eventually `complete` or `release`.
//! - A key someone else holds is `InProgress` — the edge answers 409.
//! - A `Completed` key returns the cached response verbatim, **regardless
//!   of the new request's body**. That asymmetry is the feature: a client
//!   can blindly retry and always observe the first execution's outcome.
//!
//! The key namespace is global, not partitioned by endpoint: a key used on
//! `/deposit` first will shadow a later `/withdraw` with the same key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from the idempotency store.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Backend (Redis) failure; the edge treats it as transient
    /// infrastructure.
    #[error("Idempotency backend failure: {0}")]
    Backend(String),

    /// A stored record could not be (de)serialized.
    #[error("Idempotency record serialization failure: {0}")]
    Serialization(String),
}

/// Result of a check-and-lock.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckAndLock {
    /// The caller claimed the key and owns the request.
    NewLock,
    /// Another worker holds the key.
    InProgress,
    /// The key completed earlier; here is the cached response.
    Completed(serde_json::Value),
}

/// Stored record for one idempotency key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    /// `IN_PROGRESS` or `COMPLETED`.
    pub status: String,
    /// Cached response, present once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    /// When the lock was first taken.
    pub created_at: DateTime<Utc>,
    /// When the request completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status string for a held lock.
pub const STATUS_IN_PROGRESS: &str = "IN_PROGRESS";
/// Status string for a completed request.
pub const STATUS_COMPLETED: &str = "COMPLETED";

/// The check-and-lock protocol.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claim the key or report its current state.
    async fn check_and_lock(&self, key: &str) -> Result<CheckAndLock, IdempotencyError>;

    /// Store the response for a held key. The record keeps the TTL
    /// anchored at the original lock, so a completed key expires exactly
    /// when its in-progress form would have.
    async fn complete(
        &self,
        key: &str,
        response: &serde_json::Value,
    ) -> Result<(), IdempotencyError>;

    /// Drop the lock so the client may retry (used when processing fails
    /// or times out).
    async fn release(&self, key: &str) -> Result<(), IdempotencyError>;
}

/// Redis-backed idempotency store.
///
/// `check_and_lock` is `SET key record NX EX ttl`; `complete` is
/// `SET key record XX KEEPTTL` (the XX guard means a completed record is
/// only ever written over a live lock).
pub struct RedisIdempotencyStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisIdempotencyStore {
    /// Create a store with the given TTL (default in production: 24 h).
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Backend`] if the Redis URL is invalid.
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, IdempotencyError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| IdempotencyError::Backend(format!("Invalid Redis URL: {e}")))?;
        Ok(Self { client, ttl })
    }

    fn cache_key(key: &str) -> String {
        format!("idempotency:{key}")
    }

    async fn connection(
        &self,
    ) -> Result<redis::aio::MultiplexedConnection, IdempotencyError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| IdempotencyError::Backend(format!("Redis connection error: {e}")))
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn check_and_lock(&self, key: &str) -> Result<CheckAndLock, IdempotencyError> {
        let mut conn = self.connection().await?;
        let cache_key = Self::cache_key(key);

        let record = IdempotencyRecord {
            status: STATUS_IN_PROGRESS.to_string(),
            response: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| IdempotencyError::Serialization(e.to_string()))?;

        // SET NX EX: atomically claim the key with the TTL.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&cache_key)
            .arg(&json)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| IdempotencyError::Backend(format!("Redis SET error: {e}")))?;

        if claimed.is_some() {
            metrics::counter!("idempotency.check", "result" => "new_lock").increment(1);
            return Ok(CheckAndLock::NewLock);
        }

        let existing: Option<String> = conn
            .get(&cache_key)
            .await
            .map_err(|e| IdempotencyError::Backend(format!("Redis GET error: {e}")))?;

        match existing {
            // Expired between SET NX and GET; treat as a fresh claim on the
            // retry the caller will make.
            None => {
                metrics::counter!("idempotency.check", "result" => "in_progress").increment(1);
                Ok(CheckAndLock::InProgress)
            }
            Some(json) => {
                let record: IdempotencyRecord = serde_json::from_str(&json)
                    .map_err(|e| IdempotencyError::Serialization(e.to_string()))?;

                if record.status == STATUS_COMPLETED {
                    metrics::counter!("idempotency.check", "result" => "cached").increment(1);
                    Ok(CheckAndLock::Completed(
                        record.response.unwrap_or(serde_json::Value::Null),
                    ))
                } else {
                    metrics::counter!("idempotency.check", "result" => "in_progress").increment(1);
                    Ok(CheckAndLock::InProgress)
                }
            }
        }
    }

    async fn complete(
        &self,
        key: &str,
        response: &serde_json::Value,
    ) -> Result<(), IdempotencyError> {
        let mut conn = self.connection().await?;
        let cache_key = Self::cache_key(key);

        // `created_at` records when the request was first accepted, so the
        // completed record keeps the lock's original value; only
        // `completed_at` is stamped now.
        let existing: Option<String> = conn
            .get(&cache_key)
            .await
            .map_err(|e| IdempotencyError::Backend(format!("Redis GET error: {e}")))?;
        let created_at = existing
            .as_deref()
            .and_then(|json| serde_json::from_str::<IdempotencyRecord>(json).ok())
            .map_or_else(Utc::now, |record| record.created_at);

        let record = IdempotencyRecord {
            status: STATUS_COMPLETED.to_string(),
            response: Some(response.clone()),
            created_at,
            completed_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| IdempotencyError::Serialization(e.to_string()))?;

        // XX + KEEPTTL: overwrite the live lock, keep its original expiry.
        let _: Option<String> = redis::cmd("SET")
            .arg(&cache_key)
            .arg(&json)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await
            .map_err(|e| IdempotencyError::Backend(format!("Redis SET error: {e}")))?;

        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(Self::cache_key(key))
            .await
            .map_err(|e| IdempotencyError::Backend(format!("Redis DEL error: {e}")))?;
        Ok(())
    }
}
